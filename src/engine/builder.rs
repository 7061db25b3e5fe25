//! # Engine Builder
//!
//! Fluent configuration for [`Engine`]. Every option left unset falls back
//! to [`EngineConfig::default`].
//!
//! ```ignore
//! let engine = Engine::builder(SqliteDriver::open("./app.db"))
//!     .debug_sql(true)
//!     .named_sql_file("./sql/users.sql")?
//!     .build();
//! ```

use super::config::EngineConfig;
use super::Engine;
use crate::driver::Driver;
use crate::template::{NamedSqlTable, TemplateEngine};
use eyre::Result;
use std::path::Path;

pub struct EngineBuilder<D: Driver> {
    driver: D,
    debug_sql: Option<bool>,
    strict_templates: Option<bool>,
    default_page_size: Option<usize>,
    named_sql: Option<NamedSqlTable>,
}

impl<D: Driver> EngineBuilder<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            debug_sql: None,
            strict_templates: None,
            default_page_size: None,
            named_sql: None,
        }
    }

    /// Logs every statement's SQL text and elapsed time at info level.
    pub fn debug_sql(mut self, enabled: bool) -> Self {
        self.debug_sql = Some(enabled);
        self
    }

    /// Makes unknown named references and placeholders without a value
    /// errors instead of empty substitutions.
    pub fn strict_templates(mut self, strict: bool) -> Self {
        self.strict_templates = Some(strict);
        self
    }

    pub fn default_page_size(mut self, rows: usize) -> Self {
        self.default_page_size = Some(rows);
        self
    }

    pub fn named_sql(mut self, table: NamedSqlTable) -> Self {
        self.named_sql = Some(table);
        self
    }

    pub fn named_sql_script(self, script: &str) -> Self {
        self.named_sql(NamedSqlTable::from_script(script))
    }

    /// Loads a named-SQL script. A missing file yields an empty table.
    pub fn named_sql_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let table = NamedSqlTable::load(path)?;
        Ok(self.named_sql(table))
    }

    /// Replaces every option with the values from `config`.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.debug_sql = Some(config.debug_sql);
        self.strict_templates = Some(config.strict_templates);
        self.default_page_size = Some(config.default_page_size);
        self
    }

    pub fn build(self) -> Engine<D> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            debug_sql: self.debug_sql.unwrap_or(defaults.debug_sql),
            strict_templates: self.strict_templates.unwrap_or(defaults.strict_templates),
            default_page_size: self
                .default_page_size
                .filter(|&n| n > 0)
                .unwrap_or(defaults.default_page_size),
        };
        let templates =
            TemplateEngine::new(self.named_sql.unwrap_or_default()).strict(config.strict_templates);
        Engine::from_parts(self.driver, config, templates)
    }
}
