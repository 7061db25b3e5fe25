//! Engine configuration.
//!
//! | Option              | Default | Description                                   |
//! |---------------------|---------|-----------------------------------------------|
//! | `debug_sql`         | false   | log every SQL text with its elapsed time      |
//! | `strict_templates`  | false   | unknown names and missing values are errors   |
//! | `default_page_size` | 500     | page size for `Session::query_pages` when 0   |
//!
//! The configuration is fixed when the engine is built and shared read-only
//! by every session it opens.

pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub debug_sql: bool,
    pub strict_templates: bool,
    pub default_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_sql: false,
            strict_templates: false,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
