//! # Macros
//!
//! Shorthand constructors for the two value containers callers build most
//! often.
//!
//! ## record!
//!
//! Builds a [`Record`](crate::types::Record) of named values, in order:
//!
//! ```ignore
//! let values = record! { "name" => "Alice", "age" => 30 };
//! // Record::new().with("name", "Alice").with("age", 30)
//! ```
//!
//! ## params!
//!
//! Builds a [`ParamMap`](crate::engine::ParamMap) bound at `1..=n`:
//!
//! ```ignore
//! session.query_all("select * from t_user where name = ? and age > ?", params!["Alice", 18])?;
//! ```

/// Builds a `Record` from `key => value` pairs.
#[macro_export]
macro_rules! record {
    () => {
        $crate::types::Record::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::types::Record::new()$(.with($key, $value))+
    };
}

/// Builds a positional `ParamMap` from values of mixed types.
#[macro_export]
macro_rules! params {
    () => {
        $crate::engine::ParamMap::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::engine::ParamMap::from_values(::std::vec![$($crate::types::Value::from($value)),+])
    };
}
