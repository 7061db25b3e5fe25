//! # Transactional Execution Engine
//!
//! `Engine` runs units of work against a [`Driver`]. Each unit of work gets
//! its own connection with auto-commit disabled and a [`Session`] through
//! which it issues statements.
//!
//! ## Unit-of-Work Lifecycle
//!
//! ```text
//!   connect ──► set_auto_commit(false) ──► seed attributes
//!      │
//!      ▼
//!   action(&session)
//!      │
//!      ├── Ok ────────► commit ──┬── Ok ──► success
//!      │                         └── Err ─► rollback ──► failure
//!      ├── Err ───────► rollback ─────────────────────► failure
//!      └── panic ─────► rollback ─────────────────────► failure (panic)
//!      │
//!      ▼
//!   close_all(streams) ──► close(connection)
//! ```
//!
//! Rollback runs at most once. Failures while rolling back or releasing
//! resources are logged and never replace the error that triggered them.
//!
//! ## Entry Points
//!
//! | Method             | Returns        | Notes                                 |
//! |--------------------|----------------|---------------------------------------|
//! | `with_transaction` | `Outcome`      | errors and panics captured            |
//! | `transaction`      | `Result<R>`    | errors propagated, panics resumed     |
//! | `query_all`        | `Vec<Record>`  | one-shot auto-commit query            |
//! | `update`           | `Vec<Record>`  | one-shot auto-commit update           |
//!
//! ## Concurrency
//!
//! Units of work on one engine are serialized across threads by an internal
//! reentrant lock. A unit started from inside another unit's action on the
//! same thread runs on its own connection and transaction. Sessions and
//! streams are `!Send`, so a connection never leaves the thread running its
//! unit of work.
//!
//! ## Modules
//!
//! - `binder`: positional parameter maps and statement binding
//! - `executor`: prepare/bind/execute with error context
//! - `stream`: lazy row reader and managed streams
//! - `registry`: stream registry closed at the end of a unit of work
//! - `session`: the unit-of-work context
//! - `outcome`: result of `with_transaction`
//! - `builder`, `config`: engine construction
//! - `timing`: global statement counters

pub mod binder;
pub mod builder;
pub mod config;
pub mod executor;
pub mod outcome;
pub mod registry;
pub mod session;
pub mod stream;
pub mod timing;

pub use binder::{bind, count_placeholders, ParamMap};
pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use executor::{Execution, StatementFailed};
pub use outcome::Outcome;
pub use registry::{StreamHandle, StreamId, StreamRegistry};
pub use session::{generated_ids, Attributes, CursorOf, Session, ERROR_SQL_KEY, RESULT_KEY};
pub use stream::{CloseHandler, ManagedStream, RowReader};
pub use timing::{get_statement_stats, reset_statement_stats, StatementStats};

use crate::driver::{Connection, Driver, ExecuteMode};
use crate::template::TemplateEngine;
use crate::types::{Record, Value};
use eyre::{Result, WrapErr};
use parking_lot::ReentrantMutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

pub struct Engine<D: Driver> {
    driver: D,
    config: EngineConfig,
    templates: TemplateEngine,
    unit_lock: ReentrantMutex<()>,
}

enum UnitFailure {
    Error(eyre::Report),
    Panic(Box<dyn Any + Send>),
}

impl<D: Driver> Engine<D> {
    pub fn new(driver: D) -> Self {
        EngineBuilder::new(driver).build()
    }

    pub fn builder(driver: D) -> EngineBuilder<D> {
        EngineBuilder::new(driver)
    }

    pub(crate) fn from_parts(driver: D, config: EngineConfig, templates: TemplateEngine) -> Self {
        Self {
            driver,
            config,
            templates,
            unit_lock: ReentrantMutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Runs `action` as one unit of work and reports what happened.
    ///
    /// `attrs` seeds the session's attribute bag. The session's `"result"`
    /// attribute, if set, is returned in [`Outcome::result`].
    pub fn with_transaction<F, A>(&self, action: F, attrs: A) -> Outcome
    where
        F: FnOnce(&Session<D::Connection>) -> Result<()>,
        A: Into<Attributes>,
    {
        let (result, value) = self.run_unit(attrs.into(), action);
        match result {
            Ok(()) => Outcome::committed(value),
            Err(UnitFailure::Error(e)) => Outcome::failed(e, value),
            Err(UnitFailure::Panic(payload)) => Outcome::panicked(payload, value),
        }
    }

    /// Runs `action` as one unit of work and returns its value.
    ///
    /// Errors are returned after rollback and cleanup. A panic in `action`
    /// resumes unwinding once the connection has been released.
    pub fn transaction<R, F>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&Session<D::Connection>) -> Result<R>,
    {
        match self.run_unit(Attributes::new(), action).0 {
            Ok(value) => Ok(value),
            Err(UnitFailure::Error(e)) => Err(e),
            Err(UnitFailure::Panic(payload)) => panic::resume_unwind(payload),
        }
    }

    fn run_unit<R, F>(&self, mut attrs: Attributes, action: F) -> (Result<R, UnitFailure>, Option<Value>)
    where
        F: FnOnce(&Session<D::Connection>) -> Result<R>,
    {
        let _guard = self.unit_lock.lock();

        let connection = match self.driver.connect().wrap_err("acquiring connection") {
            Ok(c) => Rc::new(c),
            Err(e) => return (Err(UnitFailure::Error(e)), None),
        };
        if let Err(e) = connection.set_auto_commit(false) {
            close_connection(connection.as_ref());
            return (
                Err(UnitFailure::Error(e.wrap_err("disabling auto-commit"))),
                None,
            );
        }

        attrs.insert_extension(self.templates.clone());
        let session = Session::open(Rc::clone(&connection), self.config.clone(), attrs);
        let tx_id = session.tx_id();

        let result = match panic::catch_unwind(AssertUnwindSafe(|| action(&session))) {
            Ok(Ok(value)) => match connection.commit() {
                Ok(()) => {
                    log::debug!("session {} committed", tx_id);
                    Ok(value)
                }
                Err(e) => {
                    rollback(connection.as_ref(), tx_id);
                    Err(UnitFailure::Error(e.wrap_err("commit failed")))
                }
            },
            Ok(Err(e)) => {
                rollback(connection.as_ref(), tx_id);
                Err(UnitFailure::Error(e))
            }
            Err(payload) => {
                rollback(connection.as_ref(), tx_id);
                Err(UnitFailure::Panic(payload))
            }
        };

        let value = session.result();
        if let Err(e) = session.close_streams() {
            log::warn!("session {}: closing streams failed: {:#}", tx_id, e);
        }
        drop(session);
        close_connection(connection.as_ref());

        (result, value)
    }

    /// One-shot query on a fresh auto-commit connection.
    pub fn query_all<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        self.one_shot(ExecuteMode::Query, sql, params.into())
    }

    /// One-shot update on a fresh auto-commit connection. Returns the
    /// generated-key records.
    pub fn update<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        self.one_shot(ExecuteMode::Update, sql, params.into())
    }

    fn one_shot(&self, mode: ExecuteMode, sql: &str, params: ParamMap) -> Result<Vec<Record>> {
        let connection = Rc::new(self.driver.connect().wrap_err("acquiring connection")?);
        let execution = match executor::execute(connection.as_ref(), mode, sql, &params, &self.config) {
            Ok(execution) => execution,
            Err(e) => {
                close_connection(connection.as_ref());
                return Err(e);
            }
        };

        let Execution {
            cursor, on_close, ..
        } = execution;
        let owned = Rc::clone(&connection);
        let mut on_close = on_close.then(move || owned.close());
        match cursor {
            Some(cursor) => RowReader::open(cursor, on_close)?.collect(),
            None => {
                on_close.run()?;
                Ok(Vec::new())
            }
        }
    }
}

fn rollback<C: Connection>(connection: &C, tx_id: u64) {
    match connection.rollback() {
        Ok(()) => log::debug!("session {} rolled back", tx_id),
        Err(e) => log::error!("session {}: rollback failed: {:#}", tx_id, e),
    }
}

fn close_connection<C: Connection>(connection: &C) {
    if let Err(e) = connection.close() {
        log::warn!("closing connection failed: {:#}", e);
    }
}
