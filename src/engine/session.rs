//! # Transactional Session
//!
//! A `Session` is the context handed to a unit of work. It binds one
//! connection, one transaction id and one stream registry to a chain of
//! operations.
//!
//! ## Structure
//!
//! ```text
//! Session<C, D>
//! ├── shared: Rc<Shared<C>>      connection, tx id, registry, config
//! ├── attrs: RefCell<Attributes> string-keyed values + typed extensions
//! └── value: Option<D>           current value of the chain
//! ```
//!
//! ## Chaining
//!
//! `fmap` and `bind` never mutate the session they are called on. They
//! return a new session sharing `shared` with a copy of the attribute bag
//! and the mapped value:
//!
//! ```ignore
//! let users = session.monad(42)
//!     .bind(|id, s| s.query_first("select * from t_user where id = ?", [*id]))?;
//! ```
//!
//! ## Reserved Attributes
//!
//! | Key         | Written by                 | Meaning                          |
//! |-------------|----------------------------|----------------------------------|
//! | `result`    | `set_result`               | reported in `Outcome::result`    |
//! | `error_sql` | failed statement execution | SQL text of the failed statement |

use super::binder::ParamMap;
use super::config::EngineConfig;
use super::executor::{self, Execution};
use super::registry::StreamRegistry;
use super::stream::{ManagedStream, RowReader};
use crate::driver::{Connection, Cursor, ExecuteMode, Statement, GENERATED_KEY};
use crate::template::TemplateEngine;
use crate::types::{FromValue, Record, Value};
use eyre::{bail, Result, WrapErr};
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const RESULT_KEY: &str = "result";
pub const ERROR_SQL_KEY: &str = "error_sql";

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

static SCRIPT_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r";[ \t]*(\r?\n)+").unwrap());

/// Cursor type produced by a connection's statements.
pub type CursorOf<C> = <<C as Connection>::Statement as Statement>::Cursor;

/// String-keyed values plus extensions keyed by type.
#[derive(Clone, Default)]
pub struct Attributes {
    values: HashMap<String, Value>,
    extensions: HashMap<TypeId, Rc<dyn Any>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    pub fn set<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.extensions.is_empty()
    }

    pub fn insert_extension<T: Any>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Rc::new(value));
    }

    pub fn extension<T: Any>(&self) -> Option<Rc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|ext| Rc::clone(ext).downcast::<T>().ok())
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("values", &self.values)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl From<Record> for Attributes {
    fn from(record: Record) -> Self {
        let mut attrs = Self::new();
        for (key, value) in record.iter() {
            attrs.set(key, value.clone());
        }
        attrs
    }
}

impl From<()> for Attributes {
    fn from(_: ()) -> Self {
        Self::new()
    }
}

struct Shared<C: Connection> {
    connection: Rc<C>,
    tx_id: u64,
    registry: Rc<RefCell<StreamRegistry>>,
    config: EngineConfig,
}

pub struct Session<C: Connection + 'static, D = ()> {
    shared: Rc<Shared<C>>,
    attrs: RefCell<Attributes>,
    value: Option<D>,
}

impl<C: Connection + 'static> Session<C, ()> {
    pub(crate) fn open(connection: Rc<C>, config: EngineConfig, attrs: Attributes) -> Self {
        let tx_id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("session {} opened", tx_id);
        Self {
            shared: Rc::new(Shared {
                connection,
                tx_id,
                registry: Rc::new(RefCell::new(StreamRegistry::new())),
                config,
            }),
            attrs: RefCell::new(attrs),
            value: None,
        }
    }
}

impl<C: Connection + 'static, D> Session<C, D> {
    pub fn tx_id(&self) -> u64 {
        self.shared.tx_id
    }

    pub fn connection(&self) -> &C {
        &self.shared.connection
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn value(&self) -> Option<&D> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<D> {
        self.value
    }

    /// Number of streams still registered with this unit of work.
    pub fn open_streams(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    fn derive<X>(&self, value: Option<X>) -> Session<C, X> {
        Session {
            shared: Rc::clone(&self.shared),
            attrs: RefCell::new(self.attrs.borrow().clone()),
            value,
        }
    }

    /// New session view holding `mapper(start, self)`.
    pub fn fmap<T, X, F>(&self, start: T, mapper: F) -> Result<Session<C, X>>
    where
        F: FnOnce(T, &Self) -> Result<X>,
    {
        let mapped = mapper(start, self)?;
        Ok(self.derive(Some(mapped)))
    }

    /// Applies `mapper` to the current value. Returns `Ok(None)` without
    /// calling `mapper` when there is no current value.
    pub fn bind<X, F>(&self, mapper: F) -> Result<Option<Session<C, X>>>
    where
        F: FnOnce(&D, &Self) -> Result<X>,
    {
        match self.value.as_ref() {
            Some(value) => self.fmap(value, mapper).map(Some),
            None => Ok(None),
        }
    }

    /// Infallible map over the current value.
    pub fn map<X, F>(&self, f: F) -> Session<C, X>
    where
        F: FnOnce(&D) -> X,
    {
        self.derive(self.value.as_ref().map(f))
    }

    /// New session view holding `value`.
    pub fn monad<X>(&self, value: X) -> Session<C, X> {
        self.derive(Some(value))
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attrs.borrow().get(key).cloned()
    }

    pub fn set_attribute<K: Into<String>, V: Into<Value>>(&self, key: K, value: V) {
        self.attrs.borrow_mut().set(key, value);
    }

    pub fn attributes(&self) -> Attributes {
        self.attrs.borrow().clone()
    }

    pub fn extension<T: Any>(&self) -> Option<Rc<T>> {
        self.attrs.borrow().extension::<T>()
    }

    pub fn set_extension<T: Any>(&self, value: T) {
        self.attrs.borrow_mut().insert_extension(value);
    }

    pub fn result(&self) -> Option<Value> {
        self.attribute(RESULT_KEY)
    }

    pub fn set_result<V: Into<Value>>(&self, value: V) {
        self.set_attribute(RESULT_KEY, value);
    }

    /// SQL text of the last statement that failed in this session.
    pub fn error_sql(&self) -> Option<String> {
        self.attribute(ERROR_SQL_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn execute_raw(
        &self,
        mode: ExecuteMode,
        sql: &str,
        params: &ParamMap,
    ) -> Result<Execution<C::Statement>> {
        let result = executor::execute(
            self.shared.connection.as_ref(),
            mode,
            sql,
            params,
            &self.shared.config,
        );
        if result.is_err() {
            self.set_attribute(ERROR_SQL_KEY, sql);
        }
        result
    }

    /// Runs a query and returns its rows as a lazily read, managed stream.
    ///
    /// The stream is closed when fully read, dropped, closed explicitly, or
    /// at the end of the unit of work, whichever comes first.
    pub fn query<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<ManagedStream<CursorOf<C>>> {
        let Execution {
            cursor, on_close, ..
        } = self.execute_raw(ExecuteMode::Query, sql, &params.into())?;
        let Some(cursor) = cursor else {
            let mut on_close = on_close;
            on_close.run()?;
            bail!("query produced no cursor: {}", sql);
        };
        let reader = RowReader::open(cursor, on_close)?;
        Ok(ManagedStream::register(reader, &self.shared.registry))
    }

    pub fn query_all<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        self.query(sql, params)?.collect()
    }

    pub fn query_first<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<Option<Record>> {
        let mut stream = self.query(sql, params)?;
        let first = stream.next().transpose()?;
        stream.close()?;
        Ok(first)
    }

    /// First column of the first row, converted to `T`. `None` when the
    /// query yields no rows or that cell is NULL.
    pub fn query_scalar<T: FromValue, P: Into<ParamMap>>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Option<T>> {
        let Some(row) = self.query_first(sql, params)? else {
            return Ok(None);
        };
        match row.value_at(0) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_value(value)
                .map(Some)
                .wrap_err_with(|| format!("scalar result of: {}", sql)),
        }
    }

    /// Whether a table named `name` exists in the connection's default schema.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        self.shared.connection.table_exists(name, None)
    }

    pub fn table_exists_in(&self, name: &str, schema: &str) -> Result<bool> {
        self.shared.connection.table_exists(name, Some(schema))
    }

    /// Runs a data modification and returns the generated-key records (or
    /// the statement's returned rows when no keys are reported).
    pub fn update<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<Vec<Record>> {
        let Execution {
            cursor,
            mut on_close,
            ..
        } = self.execute_raw(ExecuteMode::Update, sql, &params.into())?;
        match cursor {
            Some(cursor) => RowReader::open(cursor, on_close)?.collect(),
            None => {
                on_close.run()?;
                Ok(Vec::new())
            }
        }
    }

    /// Runs a data modification and returns the affected row count.
    pub fn execute<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<u64> {
        let Execution {
            cursor,
            mut on_close,
            affected,
        } = self.execute_raw(ExecuteMode::Update, sql, &params.into())?;
        match cursor {
            Some(cursor) => RowReader::open(cursor, on_close)?.close()?,
            None => on_close.run()?,
        }
        Ok(affected.unwrap_or(0))
    }

    /// Number of rows a query returns, using a scrollable cursor when the
    /// driver can count without reading.
    pub fn row_count<P: Into<ParamMap>>(&self, sql: &str, params: P) -> Result<u64> {
        let Execution {
            cursor,
            mut on_close,
            ..
        } = self.execute_raw(ExecuteMode::QueryScroll, sql, &params.into())?;
        let Some(mut cursor) = cursor else {
            on_close.run()?;
            return Ok(0);
        };

        match cursor.row_count() {
            Ok(Some(n)) => {
                let closed = cursor.close();
                on_close.run()?;
                closed?;
                Ok(n)
            }
            Ok(None) => {
                let mut n = 0;
                for row in RowReader::open(cursor, on_close)? {
                    row?;
                    n += 1;
                }
                Ok(n)
            }
            Err(e) => {
                if let Err(close_err) = cursor.close() {
                    log::warn!("closing cursor after row count failure: {:#}", close_err);
                }
                if let Err(close_err) = on_close.run() {
                    log::warn!("closing statement after row count failure: {:#}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Resolves a named reference and substitutes placeholders from `values`.
    pub fn render(&self, template: &str, values: &Record) -> Result<String> {
        match self.extension::<TemplateEngine>() {
            Some(templates) => templates.render(template, values),
            None => TemplateEngine::default()
                .strict(self.shared.config.strict_templates)
                .render(template, values),
        }
    }

    /// Renders `template` and runs it as a query. Numeric keys in `values`
    /// are also bound as positional parameters.
    pub fn query_template(&self, template: &str, values: &Record) -> Result<ManagedStream<CursorOf<C>>> {
        let sql = self.render(template, values)?;
        self.query(&sql, ParamMap::from_record(values))
    }

    pub fn execute_template(&self, template: &str, values: &Record) -> Result<u64> {
        let sql = self.render(template, values)?;
        self.execute(&sql, ParamMap::from_record(values))
    }

    /// Splits `script` on `;` at line ends and executes each statement in
    /// order. Returns the affected count of every statement run.
    pub fn execute_script(&self, script: &str) -> Result<Vec<u64>> {
        let mut counts = Vec::new();
        for (i, chunk) in SCRIPT_SPLIT.split(script).enumerate() {
            let sql = chunk.trim().trim_end_matches(';').trim_end();
            if is_blank_statement(sql) {
                continue;
            }
            let n = self
                .execute(sql, ())
                .wrap_err_with(|| format!("script statement {}", i + 1))?;
            counts.push(n);
        }
        Ok(counts)
    }

    /// Reads a query in pages of `page_size` rows (0 uses the configured
    /// default), handing each page to `on_page`. Returns the number of pages.
    pub fn query_pages<P, F>(&self, sql: &str, params: P, page_size: usize, mut on_page: F) -> Result<usize>
    where
        P: Into<ParamMap>,
        F: FnMut(Vec<Record>) -> Result<()>,
    {
        let page_size = if page_size == 0 {
            self.shared.config.default_page_size.max(1)
        } else {
            page_size
        };
        let params = params.into();
        let base = sql.trim().trim_end_matches(';');
        let mut pages = 0;
        let mut offset = 0usize;

        loop {
            let paged = format!("select * from ({}) limit {} offset {}", base, page_size, offset);
            let rows = self.query_all(&paged, params.clone())?;
            let len = rows.len();
            if len == 0 {
                break;
            }
            pages += 1;
            on_page(rows)?;
            if len < page_size {
                break;
            }
            offset += len;
        }
        Ok(pages)
    }

    pub(crate) fn close_streams(&self) -> Result<()> {
        self.shared.registry.borrow_mut().close_all()
    }
}

impl<C: Connection + 'static, D: fmt::Debug> fmt::Debug for Session<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tx_id", &self.shared.tx_id)
            .field("attrs", &self.attrs.borrow())
            .field("value", &self.value)
            .finish()
    }
}

fn is_blank_statement(sql: &str) -> bool {
    sql.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with("--")
    })
}

/// Extracts the `GENERATED_KEY` column of each record as an integer.
pub fn generated_ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.get_ignore_case(GENERATED_KEY).and_then(Value::as_int))
        .collect()
}
