//! # Statement Timing Statistics
//!
//! Global counters for the statement path, accumulated by every engine in
//! the process whether or not SQL logging is enabled.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  STATEMENTS_EXECUTED │  statements that reached the driver   │
//! │  EXECUTE_TIME_NS     │  time spent in driver execute calls   │
//! │  ROWS_READ           │  rows produced by stream readers      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each counter is an `AtomicU64` updated with Relaxed ordering. Values are
//! approximate across threads and meant for profiling.
//!
//! ```ignore
//! use txsession::engine::{get_statement_stats, reset_statement_stats};
//!
//! reset_statement_stats();
//! engine.query_all("select * from t_user", ())?;
//! let stats = get_statement_stats();
//! println!("{} statements, {}µs", stats.statements, stats.execute_ns / 1_000);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) static STATEMENTS_EXECUTED: AtomicU64 = AtomicU64::new(0);
pub(crate) static EXECUTE_TIME_NS: AtomicU64 = AtomicU64::new(0);
pub(crate) static ROWS_READ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementStats {
    pub statements: u64,
    pub execute_ns: u64,
    pub rows_read: u64,
}

pub(crate) fn record_statement(elapsed_ns: u64) {
    STATEMENTS_EXECUTED.fetch_add(1, Ordering::Relaxed);
    EXECUTE_TIME_NS.fetch_add(elapsed_ns, Ordering::Relaxed);
}

pub(crate) fn record_row() {
    ROWS_READ.fetch_add(1, Ordering::Relaxed);
}

/// Resets all statement statistics to zero.
pub fn reset_statement_stats() {
    STATEMENTS_EXECUTED.store(0, Ordering::Relaxed);
    EXECUTE_TIME_NS.store(0, Ordering::Relaxed);
    ROWS_READ.store(0, Ordering::Relaxed);
}

pub fn get_statement_stats() -> StatementStats {
    StatementStats {
        statements: STATEMENTS_EXECUTED.load(Ordering::Relaxed),
        execute_ns: EXECUTE_TIME_NS.load(Ordering::Relaxed),
        rows_read: ROWS_READ.load(Ordering::Relaxed),
    }
}
