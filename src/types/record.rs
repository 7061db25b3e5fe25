//! # Row Records
//!
//! `Record` is an ordered mapping from column label to [`Value`]. It serves
//! two roles:
//!
//! - the row record produced by the result stream reader, one per cursor row;
//! - the named-value record callers hand to templates and parameter binding.
//!
//! ## Label Sharing
//!
//! Labels are stored as `Arc<str>`. The stream reader captures a cursor's
//! labels once and every row it produces clones the same `Arc`s, so reading
//! a row costs one value copy per column and no label allocation.
//!
//! Records own their values and hold no reference to the cursor, statement
//! or connection that produced them; they remain valid after the stream is
//! closed.
//!
//! ## Lookup
//!
//! Lookup by label is a linear scan. Row widths are small and the scan avoids
//! allocating a hash index per row.

use super::Value;
use eyre::{bail, Result};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default, PartialEq)]
pub struct Record {
    entries: SmallVec<[(Arc<str>, Value); 8]>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: SmallVec::with_capacity(capacity),
        }
    }

    /// Builds a row record from pre-captured labels and the row's values.
    ///
    /// Extra values beyond the label count are dropped; missing values are
    /// filled with `Null`.
    pub fn from_row(labels: &[Arc<str>], values: Vec<Value>) -> Self {
        let mut values = values.into_iter();
        let entries = labels
            .iter()
            .map(|label| (Arc::clone(label), values.next().unwrap_or(Value::Null)))
            .collect();
        Self { entries }
    }

    /// Builder-style insert, see [`Record::set`].
    pub fn with<K: AsRef<str>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key` to `value`, replacing an existing entry in place so column
    /// order is preserved.
    pub fn set<K: AsRef<str>, V: Into<Value>>(&mut self, key: K, value: V) {
        let key = key.as_ref();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k.as_ref() == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((Arc::from(key), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k.as_ref() == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    /// Case-insensitive label lookup. Drivers differ in the case they report
    /// for unaliased expressions.
    pub fn get_ignore_case(&self, key: &str) -> Option<&Value> {
        self.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, v)| v)
    }

    pub fn label_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(k, _)| k.as_ref())
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.get(key) {
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => match other.as_int() {
                Some(i) => Ok(i),
                None => bail!("column '{}': expected INT, got {:?}", key, other),
            },
            None => bail!("column '{}' not found", key),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.get(key) {
            Some(v) => match v.as_float() {
                Some(f) => Ok(f),
                None => bail!("column '{}': expected FLOAT, got {:?}", key, v),
            },
            None => bail!("column '{}' not found", key),
        }
    }

    pub fn get_text(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(Value::Text(s)) => Ok(s),
            Some(other) => bail!("column '{}': expected TEXT, got {:?}", key, other),
            None => bail!("column '{}' not found", key),
        }
    }

    pub fn is_null(&self, key: &str) -> bool {
        matches!(self.get(key), Some(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_ref())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.entries.into_iter().map(|(_, v)| v).collect()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k.as_ref(), v)))
            .finish()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut rec = Record::new();
        for (k, v) in iter {
            rec.set(k, v);
        }
        rec
    }
}
