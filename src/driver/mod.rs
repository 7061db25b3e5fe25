//! # Driver Abstraction Layer
//!
//! This module defines the blocking driver interface the engine executes
//! against: a [`Driver`] hands out [`Connection`]s, connections prepare
//! [`Statement`]s, and statements produce forward-only (or scrollable)
//! [`Cursor`]s.
//!
//! ## Ownership
//!
//! Every level owns the next through an associated type, so a whole stack
//! is monomorphized per driver with no trait objects on the row path:
//!
//! ```text
//! Driver ──connect──► Connection ──prepare──► Statement ──execute──► Cursor
//! ```
//!
//! Connections take `&self` for every operation. The engine shares one
//! connection between a session and the close handlers of its open streams,
//! so implementations keep their mutable state behind interior mutability.
//!
//! ## Release Contract
//!
//! The engine calls `close` exactly once on every statement and cursor it
//! obtains and on every connection it acquires from `connect`. Implementations
//! may treat a second `close` as a no-op but must not rely on `Drop` running
//! in any particular order.
//!
//! ## Parameter Indices
//!
//! Statement parameters are 1-based. `Statement::parameter_count` reports the
//! number of `?` markers, or `None` when the driver cannot tell; the binder
//! then applies every supplied parameter.
//!
//! ## Backends
//!
//! | Backend        | Feature  | Notes                                         |
//! |----------------|----------|-----------------------------------------------|
//! | `SqliteDriver` | `sqlite` | rusqlite, query cursors stepped row by row    |

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::types::Value;
use eyre::Result;

/// Column label under which drivers report a generated key.
pub const GENERATED_KEY: &str = "GENERATED_KEY";

/// How a statement will be executed. Drivers may use this to pick a cursor
/// type at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecuteMode {
    /// Forward-only query cursor.
    Query,
    /// Scrollable query cursor, used when the row count is needed up front.
    QueryScroll,
    /// Data modification returning an affected count and generated keys.
    Update,
}

impl ExecuteMode {
    pub fn is_query(self) -> bool {
        matches!(self, ExecuteMode::Query | ExecuteMode::QueryScroll)
    }
}

/// Source of connections. One connection is acquired per unit of work.
pub trait Driver {
    type Connection: Connection + 'static;

    fn connect(&self) -> Result<Self::Connection>;
}

pub trait Connection {
    type Statement: Statement + 'static;

    fn prepare(&self, sql: &str, mode: ExecuteMode) -> Result<Self::Statement>;

    fn auto_commit(&self) -> Result<bool>;

    /// Disabling auto-commit starts a driver transaction. Re-enabling it
    /// commits any pending work.
    fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Whether a base table named `name` exists, optionally within `schema`.
    /// Names are matched case-sensitively.
    fn table_exists(&self, name: &str, schema: Option<&str>) -> Result<bool>;
}

pub trait Statement {
    type Cursor: Cursor + 'static;

    /// Number of positional parameters, or `None` when unsupported.
    fn parameter_count(&self) -> Result<Option<usize>>;

    /// Sets the 1-based parameter `index`.
    fn set_value(&mut self, index: usize, value: &Value) -> Result<()>;

    fn execute_query(&mut self) -> Result<Self::Cursor>;

    /// Runs a data modification statement and returns the affected count.
    fn execute_update(&mut self) -> Result<u64>;

    /// Keys generated by the last update, if the driver reports any.
    fn generated_keys(&mut self) -> Result<Option<Self::Cursor>>;

    /// Result set produced by the last update (e.g. `RETURNING`), if any.
    fn result_cursor(&mut self) -> Result<Option<Self::Cursor>>;

    fn close(&mut self) -> Result<()>;
}

pub trait Cursor {
    fn column_labels(&self) -> Result<Vec<String>>;

    /// Advances to the next row. Returns `false` once the cursor is exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Value of the 0-based column `index` in the current row.
    fn value(&self, index: usize) -> Result<Value>;

    fn close(&mut self) -> Result<()>;

    /// Total rows in a scrollable cursor. Forward-only cursors return `None`.
    fn row_count(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}
