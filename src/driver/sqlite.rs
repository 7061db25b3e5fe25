//! SQLite backend built on rusqlite.
//!
//! ## Statements and Cursors
//!
//! A `SqliteStatement` keeps the SQL text and its bound parameters. Every
//! execute takes the compiled statement from rusqlite's statement cache, so
//! the SQL is compiled once per connection however often it runs.
//!
//! | Mode          | Cursor                                                  |
//! |---------------|---------------------------------------------------------|
//! | `Query`       | live: one `sqlite3_step` per `Cursor::next`             |
//! | `QueryScroll` | buffered at execute, so `row_count` is known            |
//! | `Update`      | `RETURNING` rows buffered, affected count from SQLite   |
//!
//! rusqlite's `Rows` borrows its statement, which borrows the connection.
//! A live cursor owns all three in one self-referential `LiveRows` and holds
//! its own handle on the connection, so it stays valid until it is closed.
//!
//! ## Transactions
//!
//! Transactions start lazily: disabling auto-commit only records the mode,
//! and `BEGIN` is issued right before the first statement executes. Commit
//! and rollback are no-ops when no transaction is open.
//!
//! `SqliteDriver::memory()` names a shared-cache in-memory database and keeps
//! one anchor connection open, so every connection handed out sees the same
//! data for the life of the driver.

use super::{Connection, Cursor, Driver, ExecuteMode, Statement, GENERATED_KEY};
use crate::types::Value;
use eyre::{bail, ensure, eyre, Result, WrapErr};
use ouroboros::self_referencing;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{CachedStatement, OpenFlags, Rows};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const BUSY_TIMEOUT_MS: u64 = 5_000;

static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    SharedMemory(String),
}

#[derive(Debug)]
pub struct SqliteDriver {
    target: Target,
    _anchor: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteDriver {
    /// Driver for a database file. The file is created on first connect.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            target: Target::File(path.as_ref().to_path_buf()),
            _anchor: None,
        }
    }

    pub fn memory() -> Result<Self> {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let target = Target::SharedMemory(format!(
            "file:txsession-mem-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            seq
        ));
        let anchor = open_target(&target)?;
        Ok(Self {
            target,
            _anchor: Some(Mutex::new(anchor)),
        })
    }
}

fn open_target(target: &Target) -> Result<rusqlite::Connection> {
    let conn = match target {
        Target::File(path) => rusqlite::Connection::open(path)
            .wrap_err_with(|| format!("opening sqlite database {}", path.display()))?,
        Target::SharedMemory(uri) => rusqlite::Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err_with(|| format!("opening sqlite database {}", uri))?,
    };
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection> {
        let conn = open_target(&self.target)?;
        Ok(SqliteConnection {
            state: Rc::new(SqliteState {
                conn: RefCell::new(Some(Rc::new(conn))),
                auto_commit: Cell::new(true),
            }),
        })
    }
}

struct SqliteState {
    conn: RefCell<Option<Rc<rusqlite::Connection>>>,
    auto_commit: Cell<bool>,
}

impl SqliteState {
    fn handle(&self) -> Result<Rc<rusqlite::Connection>> {
        match self.conn.borrow().as_ref() {
            Some(conn) => Ok(Rc::clone(conn)),
            None => bail!("sqlite connection is closed"),
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<R>) -> Result<R> {
        let conn = self.handle()?;
        f(&conn)
    }

    fn begin_if_needed(&self, conn: &rusqlite::Connection) -> Result<()> {
        if !self.auto_commit.get() && conn.is_autocommit() {
            conn.execute_batch("BEGIN")
                .wrap_err("starting sqlite transaction")?;
        }
        Ok(())
    }

    fn finish_transaction(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch(sql)
                    .wrap_err_with(|| format!("sqlite {}", sql))?;
            }
            Ok(())
        })
    }
}

pub struct SqliteConnection {
    state: Rc<SqliteState>,
}

impl Connection for SqliteConnection {
    type Statement = SqliteStatement;

    fn prepare(&self, sql: &str, mode: ExecuteMode) -> Result<SqliteStatement> {
        let param_count = self.state.with_conn(|conn| {
            let stmt = conn.prepare_cached(sql)?;
            Ok(stmt.parameter_count())
        })?;
        Ok(SqliteStatement {
            state: Rc::clone(&self.state),
            sql: sql.to_string(),
            mode,
            param_count,
            params: BTreeMap::new(),
            generated_key: None,
            returned: None,
            closed: false,
        })
    }

    fn auto_commit(&self) -> Result<bool> {
        ensure!(!self.is_closed(), "sqlite connection is closed");
        Ok(self.state.auto_commit.get())
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        if auto_commit && !self.state.auto_commit.get() {
            self.commit()?;
        }
        self.state.auto_commit.set(auto_commit);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.finish_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.state.finish_transaction("ROLLBACK")
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.state.conn.borrow_mut().take() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                log::warn!("rollback of open transaction on close failed: {}", e);
            }
        }
        match Rc::try_unwrap(conn) {
            Ok(conn) => conn
                .close()
                .map_err(|(_, e)| e)
                .wrap_err("closing sqlite connection"),
            Err(_) => {
                log::debug!("sqlite connection closes when its last open cursor is released");
                Ok(())
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.state.conn.borrow().is_none()
    }

    fn table_exists(&self, name: &str, schema: Option<&str>) -> Result<bool> {
        let sql = match schema {
            Some(schema) => format!(
                "select count(*) from \"{}\".sqlite_master where type = 'table' and name = ?1",
                schema.replace('"', "\"\"")
            ),
            None => "select count(*) from sqlite_master where type = 'table' and name = ?1".to_string(),
        };
        self.state.with_conn(|conn| {
            let found: i64 = conn
                .prepare_cached(&sql)?
                .query_row([name], |row| row.get(0))
                .wrap_err_with(|| format!("looking up table {}", name))?;
            Ok(found > 0)
        })
    }
}

pub struct SqliteStatement {
    state: Rc<SqliteState>,
    sql: String,
    mode: ExecuteMode,
    param_count: usize,
    params: BTreeMap<usize, SqlValue>,
    generated_key: Option<i64>,
    returned: Option<SqliteCursor>,
    closed: bool,
}

impl SqliteStatement {
    /// Connection handle with the lazy transaction started.
    fn begin(&self) -> Result<Rc<rusqlite::Connection>> {
        ensure!(!self.closed, "statement is closed");
        let conn = self.state.handle()?;
        self.state.begin_if_needed(&conn)?;
        Ok(conn)
    }
}

impl Statement for SqliteStatement {
    type Cursor = SqliteCursor;

    fn parameter_count(&self) -> Result<Option<usize>> {
        Ok(Some(self.param_count))
    }

    fn set_value(&mut self, index: usize, value: &Value) -> Result<()> {
        ensure!(!self.closed, "statement is closed");
        ensure!(
            index >= 1 && index <= self.param_count,
            "parameter index {} out of range (statement has {} parameters)",
            index,
            self.param_count
        );
        self.params.insert(index, to_sql_value(value));
        Ok(())
    }

    fn execute_query(&mut self) -> Result<SqliteCursor> {
        let conn = self.begin()?;
        if self.mode == ExecuteMode::QueryScroll {
            let mut stmt = prepare_bound(&conn, &self.sql, &self.params)?;
            return buffer(&mut stmt, true);
        }
        SqliteCursor::live(conn, &self.sql, &self.params)
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.generated_key = None;
        self.returned = None;

        let conn = self.begin()?;
        let mut stmt = prepare_bound(&conn, &self.sql, &self.params)?;
        let (changes, returned) = if stmt.column_count() > 0 {
            let cursor = buffer(&mut stmt, false)?;
            // changes() still describes the previous DML statement after a query
            let changes = if stmt.readonly() { 0 } else { conn.changes() as u64 };
            (changes, Some(cursor))
        } else {
            (stmt.raw_execute()? as u64, None)
        };
        drop(stmt);

        if changes > 0 && is_insert(&self.sql) {
            self.generated_key = Some(conn.last_insert_rowid());
        }
        self.returned = returned;
        Ok(changes)
    }

    fn generated_keys(&mut self) -> Result<Option<SqliteCursor>> {
        Ok(self.generated_key.take().map(|id| {
            SqliteCursor::new(vec![GENERATED_KEY.to_string()], vec![vec![Value::Int(id)]], false)
        }))
    }

    fn result_cursor(&mut self) -> Result<Option<SqliteCursor>> {
        Ok(self.returned.take())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.params.clear();
        self.returned = None;
        Ok(())
    }
}

fn is_insert(sql: &str) -> bool {
    sql.split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("insert") || word.eq_ignore_ascii_case("replace"))
}

fn prepare_bound<'c>(
    conn: &'c rusqlite::Connection,
    sql: &str,
    params: &BTreeMap<usize, SqlValue>,
) -> Result<CachedStatement<'c>> {
    let mut stmt = conn.prepare_cached(sql)?;
    for (index, value) in params {
        stmt.raw_bind_parameter(*index, value)?;
    }
    Ok(stmt)
}

fn column_labels(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn read_row(rows: &mut Rows<'_>, width: usize) -> Result<Option<Vec<Value>>> {
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut values = Vec::with_capacity(width);
    for i in 0..width {
        values.push(from_sql_value(row.get_ref(i)?));
    }
    Ok(Some(values))
}

/// Steps `stmt` to completion and keeps every row.
fn buffer(stmt: &mut rusqlite::Statement<'_>, scrollable: bool) -> Result<SqliteCursor> {
    let labels = column_labels(stmt);
    let width = labels.len();
    let mut rows = Vec::new();
    let mut result = stmt.raw_query();
    while let Some(values) = read_row(&mut result, width)? {
        rows.push(values);
    }
    Ok(SqliteCursor::new(labels, rows, scrollable))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
        other => SqlValue::Text(other.display_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// A statement being stepped, with the connection and compiled statement it
/// borrows from.
#[self_referencing]
struct LiveRows {
    conn: Rc<rusqlite::Connection>,
    #[borrows(conn)]
    #[not_covariant]
    stmt: CachedStatement<'this>,
    #[borrows(mut stmt)]
    #[not_covariant]
    rows: Rows<'this>,
}

enum Source {
    Live(LiveRows),
    Buffered(std::vec::IntoIter<Vec<Value>>),
    Closed,
}

pub struct SqliteCursor {
    labels: Vec<String>,
    source: Source,
    current: Option<Vec<Value>>,
    total: Option<u64>,
    scrollable: bool,
}

impl SqliteCursor {
    fn new(labels: Vec<String>, rows: Vec<Vec<Value>>, scrollable: bool) -> Self {
        Self {
            labels,
            total: Some(rows.len() as u64),
            source: Source::Buffered(rows.into_iter()),
            current: None,
            scrollable,
        }
    }

    fn live(
        conn: Rc<rusqlite::Connection>,
        sql: &str,
        params: &BTreeMap<usize, SqlValue>,
    ) -> Result<Self> {
        let mut labels = Vec::new();
        let rows = LiveRows::try_new(
            conn,
            |conn| {
                prepare_bound(conn, sql, params).map(|stmt| {
                    labels = column_labels(&stmt);
                    stmt
                })
            },
            |stmt| Ok::<_, eyre::Report>(stmt.raw_query()),
        )?;
        Ok(Self {
            labels,
            source: Source::Live(rows),
            current: None,
            total: None,
            scrollable: false,
        })
    }
}

impl Cursor for SqliteCursor {
    fn column_labels(&self) -> Result<Vec<String>> {
        Ok(self.labels.clone())
    }

    fn next(&mut self) -> Result<bool> {
        let width = self.labels.len();
        self.current = match &mut self.source {
            Source::Live(rows) => rows.with_rows_mut(|rows| read_row(rows, width))?,
            Source::Buffered(rows) => rows.next(),
            Source::Closed => bail!("cursor is closed"),
        };
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| eyre!("cursor is not positioned on a row"))?;
        row.get(index)
            .cloned()
            .ok_or_else(|| eyre!("column index {} out of range ({} columns)", index, row.len()))
    }

    fn close(&mut self) -> Result<()> {
        self.source = Source::Closed;
        self.current = None;
        Ok(())
    }

    fn row_count(&mut self) -> Result<Option<u64>> {
        Ok(self.total.filter(|_| self.scrollable))
    }
}
