//! Positional `{n}` formatting and its escaping rules.
//!
//! Substituted SQL may go through a second formatting stage where `{0}`,
//! `{1}`, ... are positional arguments, single quotes delimit literal text
//! and `''` is a literal quote. [`escape_format`] protects text so that this
//! stage reproduces it exactly.

use crate::types::Value;

/// `'` becomes `''` and `{` becomes `'{'`.
///
/// The quoted section opened for a brace extends over any braces and quotes
/// that follow it (`{{` becomes `'{{'`, `{'` becomes `'{'''`). A closing
/// quote is never directly followed by another quote, which would otherwise
/// read as a literal `'`.
pub fn escape_format(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => out.push_str("''"),
            '{' => {
                out.push_str("'{");
                while let Some(&next) = chars.peek() {
                    match next {
                        '{' => out.push('{'),
                        '\'' => out.push_str("''"),
                        _ => break,
                    }
                    chars.next();
                }
                out.push('\'');
            }
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_format`].
pub fn unescape_format(text: &str) -> String {
    format_indexed(text, &[])
}

/// Replaces `{n}` with the display form of `args[n]`.
///
/// Text between single quotes is literal and `''` yields one quote. An
/// index with no matching argument, or an unterminated brace, is copied
/// through unchanged.
pub fn format_indexed(pattern: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut quoted = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    quoted = !quoted;
                }
            }
            '{' if !quoted => {
                let mut index = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    index.push(c);
                }
                let arg = if closed {
                    index.trim().parse::<usize>().ok().and_then(|i| args.get(i))
                } else {
                    None
                };
                match arg {
                    Some(v) => out.push_str(&v.display_string()),
                    None => {
                        out.push('{');
                        out.push_str(&index);
                        if closed {
                            out.push('}');
                        }
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}
