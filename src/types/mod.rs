//! # Value and Record Types
//!
//! The two data types shared by every layer of the engine.
//!
//! ## Key Types
//!
//! | Type     | Purpose                                                    |
//! |----------|------------------------------------------------------------|
//! | `Value`  | Owned SQL value (parameters, placeholder values, cells)    |
//! | `FromValue` | Conversion of a cell into a plain Rust scalar          |
//! | `Record` | Ordered label → value mapping (row records, named values)  |
//!
//! ## Usage
//!
//! ```ignore
//! use txsession::types::{Record, Value};
//!
//! let params = Record::new().with("name", "Alice").with("age", 30);
//! assert_eq!(params.get("age"), Some(&Value::Int(30)));
//! ```

mod record;
mod value;

pub use record::Record;
pub use value::{quote_literal, FromValue, Value, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
