//! # txsession - Transactional SQL Sessions
//!
//! txsession sits directly on top of a blocking SQL driver (connection,
//! prepared statement and cursor primitives) and provides:
//!
//! - **SQL templates**: named-SQL scripts and `#field` / `##field`
//!   placeholder substitution
//! - **Parameter binding**: positional parameters from arrays, vectors or
//!   numeric-keyed records
//! - **Lazy row streams**: cursors read one row ahead, released exactly once
//!   even when abandoned
//! - **Units of work**: one connection and one driver transaction per unit,
//!   commit on success, rollback on error or panic
//!
//! ## Quick Start
//!
//! ```ignore
//! use txsession::driver::sqlite::SqliteDriver;
//! use txsession::{params, record, Engine};
//!
//! let engine = Engine::builder(SqliteDriver::open("./app.db"))
//!     .named_sql_script("-- # by_name\nselect * from t_user where name = #name\n")
//!     .build();
//!
//! let outcome = engine.with_transaction(|s| {
//!     s.execute("insert into t_user (name) values (?)", params!["Alice"])?;
//!     let rows: Vec<_> = s.query_template("#by_name", &record! { "name" => "Alice" })?
//!         .collect::<eyre::Result<_>>()?;
//!     s.set_result(rows.len() as i64);
//!     Ok(())
//! }, ());
//! assert!(outcome.success);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        Engine / Session (units of work)       │
//! ├──────────────────────────────────────────────┤
//! │  Template Engine  │  Parameter Binder          │
//! ├──────────────────────────────────────────────┤
//! │  Statement Executor  │  Stream Reader/Registry │
//! ├──────────────────────────────────────────────┤
//! │      Driver traits (Connection/Statement)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`types`]: `Value` and `Record`
//! - [`driver`]: driver traits, SQLite backend
//! - [`template`]: named-SQL tables, placeholder substitution
//! - [`engine`]: engine, session, binder, executor, streams

#[macro_use]
mod macros;

pub mod driver;
pub mod engine;
pub mod template;
pub mod types;

pub use engine::{Engine, EngineBuilder, EngineConfig, Outcome, ParamMap, Session};
pub use template::{NamedSqlTable, TemplateEngine};
pub use types::{FromValue, Record, Value};
