//! # SQL Templates
//!
//! Turns a textual SQL template plus a record of named values into the SQL
//! text handed to the driver.
//!
//! ## Pipeline
//!
//! ```text
//! template ──► named lookup ──► placeholder substitution ──► SQL text
//!              (#name → block)   (#field, ##field)
//! ```
//!
//! Named lookup always runs first. A template that is exactly `#name`
//! resolves to the named block, and the block's own placeholders are then
//! substituted from the supplied values. Bare `?` markers are left alone for
//! positional binding.
//!
//! ## Modules
//!
//! - `named_sql`: script parsing and the name → SQL table
//! - `substitute`: placeholder regex pass and renderers
//! - `format`: `{n}` positional formatting and its escaping

pub mod format;
pub mod named_sql;
pub mod substitute;

pub use format::{escape_format, format_indexed, unescape_format};
pub use named_sql::{reference_name, NamedSqlTable};
pub use substitute::{
    placeholder_names, plain, plain_substitute, quote_substitute, quoting, substitute, PLACEHOLDER,
};

use crate::types::Record;
use eyre::{ensure, Result};

/// Named-SQL table plus substitution policy.
///
/// In lenient mode an unknown named reference is used verbatim and a
/// placeholder without a value renders empty. In strict mode both are errors.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    table: NamedSqlTable,
    strict: bool,
}

impl TemplateEngine {
    pub fn new(table: NamedSqlTable) -> Self {
        Self {
            table,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn table(&self) -> &NamedSqlTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut NamedSqlTable {
        &mut self.table
    }

    pub fn render(&self, template: &str, values: &Record) -> Result<String> {
        let sql = if self.strict {
            self.table.resolve_strict(template)?
        } else {
            self.table.resolve(template)
        };

        if self.strict {
            for name in placeholder_names(&sql) {
                ensure!(
                    values.contains_key(&name),
                    "no value supplied for placeholder '#{}'",
                    name
                );
            }
        }

        Ok(quote_substitute(&sql, values))
    }
}
