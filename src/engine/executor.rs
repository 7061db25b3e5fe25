//! Statement execution.
//!
//! [`execute`] prepares a statement, binds its parameters and runs it in the
//! requested mode. The statement is handed back inside a [`CloseHandler`]
//! so it stays open for as long as the cursor it produced is being read.
//!
//! For updates the returned cursor is, in order of preference, the
//! generated-keys cursor, the statement's own result cursor, or nothing.
//!
//! A failure anywhere in prepare/bind/execute closes the statement and
//! returns the driver error wrapped in a [`StatementFailed`] context, which
//! callers can recover with `report.downcast_ref::<StatementFailed>()`.

use super::binder::{self, ParamMap};
use super::config::EngineConfig;
use super::stream::CloseHandler;
use super::timing;
use crate::driver::{Connection, ExecuteMode, Statement};
use eyre::{Result, WrapErr};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailed {
    pub sql: String,
}

impl fmt::Display for StatementFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "statement failed: {}", self.sql)
    }
}

pub struct Execution<S: Statement> {
    pub cursor: Option<S::Cursor>,
    pub on_close: CloseHandler,
    /// Affected row count, for updates.
    pub affected: Option<u64>,
}

impl<S: Statement> fmt::Debug for Execution<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("has_cursor", &self.cursor.is_some())
            .field("on_close", &self.on_close)
            .field("affected", &self.affected)
            .finish()
    }
}

pub fn execute<C: Connection>(
    connection: &C,
    mode: ExecuteMode,
    sql: &str,
    params: &ParamMap,
    config: &EngineConfig,
) -> Result<Execution<C::Statement>> {
    let started = Instant::now();
    let result = run(connection, mode, sql, params);
    let elapsed = started.elapsed();
    timing::record_statement(elapsed.as_nanos() as u64);

    if config.debug_sql {
        log::info!(
            "[{:?}] {} | {} param(s) | {:.3}ms",
            mode,
            sql,
            params.len(),
            elapsed.as_secs_f64() * 1_000.0
        );
    }

    result.wrap_err(StatementFailed {
        sql: sql.to_string(),
    })
}

fn run<C: Connection>(
    connection: &C,
    mode: ExecuteMode,
    sql: &str,
    params: &ParamMap,
) -> Result<Execution<C::Statement>> {
    let mut statement = connection.prepare(sql, mode)?;

    match run_prepared(&mut statement, mode, params) {
        Ok((cursor, affected)) => Ok(Execution {
            cursor,
            on_close: CloseHandler::new(move || statement.close()),
            affected,
        }),
        Err(e) => {
            if let Err(close_err) = statement.close() {
                log::warn!("closing failed statement: {:#}", close_err);
            }
            Err(e)
        }
    }
}

type Executed<S> = (Option<<S as Statement>::Cursor>, Option<u64>);

fn run_prepared<S: Statement>(
    statement: &mut S,
    mode: ExecuteMode,
    params: &ParamMap,
) -> Result<Executed<S>> {
    binder::bind(statement, params)?;

    match mode {
        ExecuteMode::Query | ExecuteMode::QueryScroll => {
            Ok((Some(statement.execute_query()?), None))
        }
        ExecuteMode::Update => {
            let affected = statement.execute_update()?;
            let cursor = match statement.generated_keys()? {
                Some(keys) => Some(keys),
                None => statement.result_cursor()?,
            };
            Ok((cursor, Some(affected)))
        }
    }
}
