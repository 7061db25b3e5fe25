//! Placeholder substitution.
//!
//! Placeholders are `#name` (quoted unless numeric) and `##name` (always
//! raw). Substitution is a single regex pass; each match is handed to a
//! renderer together with the value looked up under capture group 1.

use crate::types::{quote_literal, Record, Value};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Default placeholder pattern. Group 1 is the field name.
pub static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"#+(\w+)").unwrap());

pub fn substitute<F>(template: &str, pattern: &Regex, values: &Record, mut renderer: F) -> String
where
    F: FnMut(&str, Option<&Value>) -> String,
{
    pattern
        .replace_all(template, |caps: &Captures| {
            let literal = caps.get(0).map_or("", |m| m.as_str());
            let name = caps.get(1).map_or(literal, |m| m.as_str());
            renderer(literal, values.get(name))
        })
        .into_owned()
}

/// Renders a placeholder for inclusion in SQL text.
///
/// `##` placeholders and numeric values are emitted raw, absent and `Null`
/// values become the empty string, everything else is single-quoted with
/// temporal values in their canonical patterns.
pub fn quoting(literal: &str, value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) if literal.starts_with("##") || v.is_numeric() => v.display_string(),
        Some(v) => quote_literal(&v.display_string()),
    }
}

pub fn plain(_literal: &str, value: Option<&Value>) -> String {
    value.map(Value::display_string).unwrap_or_default()
}

pub fn quote_substitute(template: &str, values: &Record) -> String {
    substitute(template, &PLACEHOLDER, values, quoting)
}

pub fn plain_substitute(template: &str, values: &Record) -> String {
    substitute(template, &PLACEHOLDER, values, plain)
}

/// Placeholder names in order of first appearance.
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        if let Some(m) = caps.get(1) {
            if !names.iter().any(|n| n == m.as_str()) {
                names.push(m.as_str().to_string());
            }
        }
    }
    names
}
