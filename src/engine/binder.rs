//! # Parameter Binding
//!
//! A [`ParamMap`] maps 1-based positional indices to values. It is built
//! from whatever shape the caller has at hand:
//!
//! | Source                     | Indices                                   |
//! |----------------------------|-------------------------------------------|
//! | `[V; N]`, `Vec<V>`, slice  | `1..=n` in order                          |
//! | `BTreeMap<usize, Value>`   | as given (index 0 dropped)                |
//! | `Record`                   | numeric keys only (`"1"`, `"+2"`)         |
//! | `()`                       | none                                      |
//!
//! [`bind`] applies the map to a prepared statement. When the statement
//! reports how many `?` markers it has, indices beyond that count are
//! skipped; when it cannot tell, every parameter is applied.

use crate::driver::Statement;
use crate::types::{Record, Value};
use eyre::{Result, WrapErr};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    values: BTreeMap<usize, Value>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional values bound at `1..=values.len()`.
    pub fn from_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            values: values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i + 1, v.into()))
                .collect(),
        }
    }

    /// Keeps entries whose key is a positive integer, optionally written with
    /// a leading `+`. All other keys are ignored.
    pub fn from_record(record: &Record) -> Self {
        let values = record
            .iter()
            .filter_map(|(key, value)| {
                let digits = key.strip_prefix('+').unwrap_or(key);
                match digits.parse::<usize>() {
                    Ok(index) if index > 0 => Some((index, value.clone())),
                    _ => None,
                }
            })
            .collect();
        Self { values }
    }

    pub fn set<V: Into<Value>>(&mut self, index: usize, value: V) {
        if index > 0 {
            self.values.insert(index, value.into());
        }
    }

    pub fn with<V: Into<Value>>(mut self, index: usize, value: V) -> Self {
        self.set(index, value);
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(&index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.values.iter().map(|(i, v)| (*i, v))
    }
}

impl<V: Into<Value>> From<Vec<V>> for ParamMap {
    fn from(values: Vec<V>) -> Self {
        Self::from_values(values)
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for ParamMap {
    fn from(values: [V; N]) -> Self {
        Self::from_values(values)
    }
}

impl From<&[Value]> for ParamMap {
    fn from(values: &[Value]) -> Self {
        Self::from_values(values.iter().cloned())
    }
}

impl From<BTreeMap<usize, Value>> for ParamMap {
    fn from(mut values: BTreeMap<usize, Value>) -> Self {
        values.remove(&0);
        Self { values }
    }
}

impl From<Record> for ParamMap {
    fn from(record: Record) -> Self {
        Self::from_record(&record)
    }
}

impl From<&Record> for ParamMap {
    fn from(record: &Record) -> Self {
        Self::from_record(record)
    }
}

impl From<()> for ParamMap {
    fn from(_: ()) -> Self {
        Self::new()
    }
}

/// Applies `params` to `statement`. Returns the number of values set.
pub fn bind<S: Statement>(statement: &mut S, params: &ParamMap) -> Result<usize> {
    let limit = statement.parameter_count()?;
    let mut applied = 0;
    for (index, value) in params.iter() {
        if limit.is_some_and(|n| index > n) {
            log::trace!("skipping parameter {} beyond statement count {:?}", index, limit);
            continue;
        }
        statement
            .set_value(index, value)
            .wrap_err_with(|| format!("binding parameter {}", index))?;
        applied += 1;
    }
    Ok(applied)
}

/// Counts `?` markers outside string literals, quoted identifiers and
/// comments.
pub fn count_placeholders(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut count = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'?' => {
                count += 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    count
}
