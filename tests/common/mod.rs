//! Scripted in-memory driver for engine tests.
//!
//! Every query returns `rows` rows with columns `id` and `name`. Statements
//! whose SQL contains `fail` error at execute. Commit, rollback and close can
//! be switched to fail; they are counted either way. Every driver call that
//! acquires or releases a resource is counted in [`MockStats`].

#![allow(dead_code)]

use eyre::{bail, Result};
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use txsession::driver::{Connection, Cursor, Driver, ExecuteMode, Statement};
use txsession::engine::count_placeholders;
use txsession::Value;

#[derive(Default)]
pub struct MockStats {
    pub connects: AtomicUsize,
    pub connection_closes: AtomicUsize,
    pub statement_closes: AtomicUsize,
    pub cursor_closes: AtomicUsize,
    pub rows_read: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub bound: Mutex<Vec<(usize, Value)>>,
    pub executed: Mutex<Vec<String>>,
}

impl MockStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn bound_indices(&self) -> Vec<usize> {
        self.bound.lock().iter().map(|(i, _)| *i).collect()
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub commit: bool,
    pub rollback: bool,
    pub close: bool,
}

pub struct MockDriver {
    pub rows: usize,
    pub report_param_count: bool,
    pub failures: Failures,
    pub tables: Vec<String>,
    pub stats: Arc<MockStats>,
}

impl MockDriver {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            report_param_count: true,
            failures: Failures::default(),
            tables: vec!["t".to_string()],
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn without_param_count(mut self) -> Self {
        self.report_param_count = false;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.failures.commit = true;
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.failures.rollback = true;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.failures.close = true;
        self
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection> {
        bump(&self.stats.connects);
        Ok(MockConnection {
            rows: self.rows,
            report_param_count: self.report_param_count,
            failures: self.failures,
            tables: self.tables.clone(),
            stats: Arc::clone(&self.stats),
            auto_commit: Cell::new(true),
            closed: Cell::new(false),
        })
    }
}

pub struct MockConnection {
    rows: usize,
    report_param_count: bool,
    failures: Failures,
    tables: Vec<String>,
    stats: Arc<MockStats>,
    auto_commit: Cell<bool>,
    closed: Cell<bool>,
}

impl Connection for MockConnection {
    type Statement = MockStatement;

    fn prepare(&self, sql: &str, _mode: ExecuteMode) -> Result<MockStatement> {
        if self.closed.get() {
            bail!("connection closed");
        }
        Ok(MockStatement {
            sql: sql.to_string(),
            rows: self.rows,
            report_param_count: self.report_param_count,
            stats: Arc::clone(&self.stats),
        })
    }

    fn auto_commit(&self) -> Result<bool> {
        Ok(self.auto_commit.get())
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.auto_commit.set(auto_commit);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        bump(&self.stats.commits);
        if self.failures.commit {
            bail!("mock commit failure");
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        bump(&self.stats.rollbacks);
        if self.failures.rollback {
            bail!("mock rollback failure");
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        bump(&self.stats.connection_closes);
        self.closed.set(true);
        if self.failures.close {
            bail!("mock close failure");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn table_exists(&self, name: &str, _schema: Option<&str>) -> Result<bool> {
        if self.closed.get() {
            bail!("connection closed");
        }
        Ok(self.tables.iter().any(|t| t == name))
    }
}

pub struct MockStatement {
    sql: String,
    rows: usize,
    report_param_count: bool,
    stats: Arc<MockStats>,
}

impl MockStatement {
    fn check(&self) -> Result<()> {
        self.stats.executed.lock().push(self.sql.clone());
        if self.sql.contains("fail") {
            bail!("mock failure executing '{}'", self.sql);
        }
        Ok(())
    }
}

impl Statement for MockStatement {
    type Cursor = MockCursor;

    fn parameter_count(&self) -> Result<Option<usize>> {
        Ok(self
            .report_param_count
            .then(|| count_placeholders(&self.sql)))
    }

    fn set_value(&mut self, index: usize, value: &Value) -> Result<()> {
        self.stats.bound.lock().push((index, value.clone()));
        Ok(())
    }

    fn execute_query(&mut self) -> Result<MockCursor> {
        self.check()?;
        Ok(MockCursor::new(self.rows, &self.stats))
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.check()?;
        Ok(1)
    }

    fn generated_keys(&mut self) -> Result<Option<MockCursor>> {
        Ok(None)
    }

    fn result_cursor(&mut self) -> Result<Option<MockCursor>> {
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        bump(&self.stats.statement_closes);
        Ok(())
    }
}

pub struct MockCursor {
    total: usize,
    position: usize,
    stats: Arc<MockStats>,
}

impl MockCursor {
    pub fn new(total: usize, stats: &Arc<MockStats>) -> Self {
        Self {
            total,
            position: 0,
            stats: Arc::clone(stats),
        }
    }
}

impl Cursor for MockCursor {
    fn column_labels(&self) -> Result<Vec<String>> {
        Ok(vec!["id".to_string(), "name".to_string()])
    }

    fn next(&mut self) -> Result<bool> {
        if self.position >= self.total {
            return Ok(false);
        }
        self.position += 1;
        bump(&self.stats.rows_read);
        Ok(true)
    }

    fn value(&self, index: usize) -> Result<Value> {
        match index {
            0 => Ok(Value::Int(self.position as i64)),
            1 => Ok(Value::Text(format!("row{}", self.position))),
            _ => bail!("no column {}", index),
        }
    }

    fn close(&mut self) -> Result<()> {
        bump(&self.stats.cursor_closes);
        Ok(())
    }
}
