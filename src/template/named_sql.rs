//! # Named-SQL Scripts
//!
//! A named-SQL script is a plain SQL file in which blocks of statements are
//! labelled by marker lines. The parsed form is a [`NamedSqlTable`], a lookup
//! table from block name to SQL text.
//!
//! ## Script Format
//!
//! ```text
//! -- --------------------------
//! -- # count_users
//! -- --------------------------
//! select count(*) from t_user   -- trailing comments are stripped
//! where name = #name
//! ```
//!
//! Parsing is line oriented:
//!
//! | Line kind                        | Pattern                       | Effect              |
//! |----------------------------------|-------------------------------|---------------------|
//! | Marker                           | `^([\s-])*#\s+([^\s#]+)\s*$`  | starts a new block  |
//! | Pure comment                     | `^\s*--.*$`                   | skipped             |
//! | Blank                            |                               | skipped             |
//! | Anything else                    |                               | appended to block   |
//!
//! A hash must be followed by whitespace to form a marker, so `#name:` inside
//! a comment is documentation. A marker may carry a trailing inline comment.
//! Lines before the first marker belong to no block and are dropped. Blocks
//! with no SQL lines are not recorded, and a repeated name keeps the last
//! definition.
//!
//! ## Named References
//!
//! A template whose entire (trimmed) text is `#name` or `##name` is a named
//! reference; [`NamedSqlTable::resolve`] replaces it with the block's SQL.
//!
//! Reference names are identifiers (`[A-Za-z_][A-Za-z0-9_]*`). A marker may
//! carry any name without whitespace or `#`, but a block whose name is not an
//! identifier (`-- # list-users`) is reachable only through
//! [`NamedSqlTable::get`].

use eyre::{bail, Result, WrapErr};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

static MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\s-])*#\s+([^\s#]+)\s*$").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*--.*$").unwrap());
static INLINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"--\s+.*$").unwrap());
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#+([A-Za-z_][A-Za-z0-9_]*)$").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedSqlTable {
    entries: BTreeMap<String, String>,
}

impl NamedSqlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses script lines with inline comment stripping enabled.
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::parse_with(lines, true)
    }

    pub fn parse_with<I, S>(lines: I, strip_inline_comments: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        let mut current: Option<String> = None;
        let mut body: Vec<String> = Vec::new();

        for line in lines {
            let line = line.as_ref();

            if let Some(name) = marker_name(line) {
                table.flush_block(current.take(), &mut body);
                current = Some(name.to_string());
                continue;
            }

            if line.trim().is_empty() || COMMENT.is_match(line) {
                continue;
            }

            let text = if strip_inline_comments {
                INLINE_COMMENT.replace(line, "")
            } else {
                Cow::Borrowed(line)
            };

            if let Some(name) = marker_name(&text) {
                table.flush_block(current.take(), &mut body);
                current = Some(name.to_string());
                continue;
            }

            let text = text.trim_end();
            if text.trim().is_empty() {
                continue;
            }

            if current.is_some() {
                body.push(text.to_string());
            }
        }

        table.flush_block(current, &mut body);
        table
    }

    pub fn from_script(script: &str) -> Self {
        Self::parse(script.lines())
    }

    /// Reads and parses a script file. A missing file yields an empty table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(script) => Ok(Self::from_script(&script)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("named-sql script {} not found, using empty table", path.display());
                Ok(Self::new())
            }
            Err(e) => Err(e).wrap_err_with(|| format!("reading named-sql script {}", path.display())),
        }
    }

    /// Serializes the table back into marker format.
    pub fn to_script(&self) -> String {
        let mut out = String::new();
        for (name, sql) in &self.entries {
            out.push_str("-- # ");
            out.push_str(name);
            out.push('\n');
            out.push_str(sql);
            out.push('\n');
        }
        out
    }

    fn flush_block(&mut self, name: Option<String>, body: &mut Vec<String>) {
        let lines = std::mem::take(body);
        if let Some(name) = name {
            if !lines.is_empty() {
                self.entries.insert(name, lines.join("\n"));
            }
        }
    }

    pub fn insert<N: Into<String>, S: Into<String>>(&mut self, name: N, sql: S) {
        self.entries.insert(name.into(), sql.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Replaces a named reference with its SQL. Non-reference templates and
    /// unknown names come back unchanged.
    pub fn resolve<'a>(&'a self, template: &'a str) -> Cow<'a, str> {
        let Some(name) = reference_name(template) else {
            return Cow::Borrowed(template);
        };
        match self.get(name) {
            Some(sql) => Cow::Borrowed(sql),
            None => {
                log::warn!("named sql '{}' not found, using template text as-is", name);
                Cow::Borrowed(template)
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but an unknown name is an error.
    pub fn resolve_strict<'a>(&'a self, template: &'a str) -> Result<Cow<'a, str>> {
        match reference_name(template) {
            None => Ok(Cow::Borrowed(template)),
            Some(name) => match self.get(name) {
                Some(sql) => Ok(Cow::Borrowed(sql)),
                None => bail!("named sql '{}' not found", name),
            },
        }
    }
}

fn marker_name(line: &str) -> Option<&str> {
    MARKER
        .captures(line)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

/// Returns the referenced block name when the whole template is a reference.
pub fn reference_name(template: &str) -> Option<&str> {
    REFERENCE
        .captures(template.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
