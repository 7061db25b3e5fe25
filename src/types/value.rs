//! # Owned SQL Values
//!
//! This module provides `Value`, the fully-owned SQL value that flows through
//! every layer of the engine: template placeholders, positional statement
//! parameters, and the cells of row records read back from a cursor.
//!
//! ## Design
//!
//! Drivers hand values across the statement boundary by value, and row
//! records must stay valid after their cursor is closed, so `Value` owns all
//! of its data. There is no borrowed counterpart.
//!
//! ## Variants
//!
//! | Variant     | Rust payload                | Notes                        |
//! |-------------|-----------------------------|------------------------------|
//! | `Null`      | -                           | SQL NULL / absent value      |
//! | `Bool`      | `bool`                      |                              |
//! | `Int`       | `i64`                       | numeric                      |
//! | `Float`     | `f64`                       | numeric                      |
//! | `Text`      | `String`                    |                              |
//! | `Blob`      | `Vec<u8>`                   |                              |
//! | `Date`      | `chrono::NaiveDate`         |                              |
//! | `Time`      | `chrono::NaiveTime`         |                              |
//! | `Timestamp` | `chrono::NaiveDateTime`     |                              |
//! | `Json`      | `serde_json::Value`         | lists and maps from callers  |
//!
//! ## Conversion
//!
//! `From` is implemented for the common Rust primitives, string types,
//! chrono types, `serde_json::Value` and `Option<T>` (where `None` becomes
//! `Null`), so parameters can be written inline:
//!
//! ```ignore
//! let v: Value = 42.into();
//! let t: Value = "Alice".into();
//! let n: Value = Option::<i64>::None.into();
//! ```
//!
//! [`FromValue`] goes the other way for scalar query results. Numeric
//! targets accept any numeric value (floats truncate toward zero) and numeric
//! text; `String` accepts every non-null value in its display form.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use eyre::{bail, Result};
use std::fmt;

/// Canonical date-time pattern used when values are rendered into SQL text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Fully-owned SQL value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for `Int` and `Float`. Numeric values are rendered unquoted by
    /// the quoting template renderer.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Value::Date(_) | Value::Time(_) | Value::Timestamp(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Json(_) => "JSON",
        }
    }

    /// Raw string conversion with no SQL quoting.
    ///
    /// `Null` renders as the empty string; temporal values use the canonical
    /// patterns; JSON values render as compact JSON text.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::Time(t) => t.format(TIME_FORMAT).to_string(),
            Value::Timestamp(ts) => ts.format(DATETIME_FORMAT).to_string(),
            Value::Json(j) => j.to_string(),
        }
    }

    /// Renders the value as a SQL literal suitable for direct inclusion in
    /// statement text.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    if f.is_sign_positive() {
                        "'Infinity'".to_string()
                    } else {
                        "'-Infinity'".to_string()
                    }
                } else {
                    f.to_string()
                }
            }
            Value::Blob(_) => format!("X'{}'", self.display_string()),
            other => quote_literal(&other.display_string()),
        }
    }
}

/// Wraps `text` in single quotes, doubling any embedded quote.
pub fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            other => f.write_str(&other.display_string()),
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32, isize);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            other => Value::Json(other),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

/// Conversion out of a non-null [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            other => match other.as_int() {
                Some(i) => Ok(i),
                None => bail!("cannot convert {} value {:?} to an integer", other.type_name(), other),
            },
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        match i32::try_from(wide) {
            Ok(narrow) => Ok(narrow),
            Err(_) => bail!("integer {} out of range for i32", wide),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_float() {
            Some(f) => Ok(f),
            None => bail!("cannot convert {} value {:?} to a float", value.type_name(), value),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => bail!("cannot convert {} value {:?} to a bool", other.type_name(), other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.display_string())
    }
}
