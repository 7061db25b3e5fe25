//! # Result Stream Reader
//!
//! `RowReader` turns a driver cursor into a lazily produced sequence of
//! [`Record`]s with guaranteed release of the cursor and whatever owns it.
//!
//! ## Read-Ahead
//!
//! The reader always holds the next row before the caller asks for it:
//!
//! ```text
//! open ──► read row 1 ──► [pending = 1]
//! next ──► return 1, read row 2 ──► [pending = 2]
//! ...
//! next ──► return n, cursor exhausted ──► close cursor, run close handler
//! ```
//!
//! An empty cursor is therefore detected at `open` and released right
//! away. Reaching the end closes the cursor and runs the close handler once;
//! afterwards the reader yields `None` forever.
//!
//! ## Errors
//!
//! A cursor error while reading ahead is held back until the row before it
//! has been returned, then yielded once. The reader is closed at that point.
//!
//! ## Managed Streams
//!
//! `ManagedStream` shares a reader with the session's [`StreamRegistry`] so
//! that a stream abandoned by the caller is still closed when the unit of
//! work ends. A stream that runs to completion, is closed, or is dropped
//! removes itself from the registry.

use super::registry::{StreamHandle, StreamId, StreamRegistry};
use super::timing;
use crate::driver::Cursor;
use crate::types::Record;
use eyre::Result;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Releases whatever produced a cursor (statement, auto-commit connection).
/// Runs at most once.
pub struct CloseHandler {
    inner: Option<Box<dyn FnOnce() -> Result<()>>>,
}

impl CloseHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        Self { inner: Some(Box::new(f)) }
    }

    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Chains `next` after this handler. Both run even if the first fails.
    pub fn then<F>(self, next: F) -> Self
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let mut first = self;
        Self::new(move || {
            let r1 = first.run();
            let r2 = next();
            match (r1, r2) {
                (Err(e), Err(e2)) => {
                    log::warn!("secondary close failure: {:#}", e2);
                    Err(e)
                }
                (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
                (Ok(()), Ok(())) => Ok(()),
            }
        })
    }

    pub fn run(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    pub fn is_spent(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for CloseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandler")
            .field("spent", &self.is_spent())
            .finish()
    }
}

pub struct RowReader<K: Cursor> {
    cursor: Option<K>,
    labels: Vec<Arc<str>>,
    pending: Option<Record>,
    pending_error: Option<eyre::Report>,
    on_close: CloseHandler,
    rows_read: u64,
}

impl<K: Cursor> RowReader<K> {
    /// Captures the cursor's labels and reads the first row.
    ///
    /// On failure the cursor and close handler are released before the error
    /// is returned.
    pub fn open(cursor: K, on_close: CloseHandler) -> Result<Self> {
        let mut reader = Self {
            cursor: Some(cursor),
            labels: Vec::new(),
            pending: None,
            pending_error: None,
            on_close,
            rows_read: 0,
        };

        let labels = match reader.cursor.as_ref().map(Cursor::column_labels) {
            Some(Ok(labels)) => labels,
            Some(Err(e)) => return Err(reader.fail(e)),
            None => Vec::new(),
        };
        reader.labels = labels.into_iter().map(Arc::from).collect();

        match reader.read_row() {
            Ok(Some(row)) => reader.pending = Some(row),
            Ok(None) => reader.finish()?,
            Err(e) => return Err(reader.fail(e)),
        }
        Ok(reader)
    }

    fn fail(&mut self, e: eyre::Report) -> eyre::Report {
        if let Err(close_err) = self.finish() {
            log::warn!("closing failed stream: {:#}", close_err);
        }
        e
    }

    fn read_row(&mut self) -> Result<Option<Record>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        if !cursor.next()? {
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.labels.len());
        for i in 0..self.labels.len() {
            values.push(cursor.value(i)?);
        }
        self.rows_read += 1;
        timing::record_row();
        Ok(Some(Record::from_row(&self.labels, values)))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut cursor) = self.cursor.take() else {
            return self.on_close.run();
        };
        let cursor_result = cursor.close();
        let handler_result = self.on_close.run();
        log::debug!("row stream closed after {} row(s)", self.rows_read);
        match (cursor_result, handler_result) {
            (Err(e), Err(e2)) => {
                log::warn!("close handler failed after cursor close failure: {:#}", e2);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Stops reading and releases the cursor. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.pending = None;
        self.pending_error = None;
        self.finish()
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// True when no further item will be produced.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_none() && self.pending_error.is_none()
    }

    pub fn labels(&self) -> &[Arc<str>] {
        &self.labels
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl<K: Cursor> Iterator for RowReader<K> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        let current = self.pending.take()?;
        match self.read_row() {
            Ok(Some(row)) => self.pending = Some(row),
            Ok(None) => {
                if let Err(e) = self.finish() {
                    log::warn!("closing exhausted stream: {:#}", e);
                }
            }
            Err(e) => {
                self.pending_error = Some(e);
                if let Err(close_err) = self.finish() {
                    log::warn!("closing failed stream: {:#}", close_err);
                }
            }
        }
        Some(Ok(current))
    }
}

impl<K: Cursor> Drop for RowReader<K> {
    fn drop(&mut self) {
        if !self.is_closed() || !self.on_close.is_spent() {
            if let Err(e) = self.finish() {
                log::warn!("closing dropped stream: {:#}", e);
            }
        }
    }
}

impl<K: Cursor> StreamHandle for RefCell<RowReader<K>> {
    fn close_stream(&self) -> Result<()> {
        match self.try_borrow_mut() {
            Ok(mut reader) => reader.close(),
            Err(_) => eyre::bail!("stream is in use and cannot be closed"),
        }
    }
}

/// A row stream registered with a unit of work for forced cleanup.
pub struct ManagedStream<K: Cursor + 'static> {
    reader: Rc<RefCell<RowReader<K>>>,
    id: StreamId,
    registry: Weak<RefCell<StreamRegistry>>,
}

impl<K: Cursor + 'static> ManagedStream<K> {
    pub(crate) fn register(reader: RowReader<K>, registry: &Rc<RefCell<StreamRegistry>>) -> Self {
        let reader = Rc::new(RefCell::new(reader));
        let id = if reader.borrow().is_exhausted() {
            0
        } else {
            let handle: Rc<dyn StreamHandle> = reader.clone();
            registry.borrow_mut().register(handle)
        };
        Self {
            reader,
            id,
            registry: Rc::downgrade(registry),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn labels(&self) -> Vec<Arc<str>> {
        self.reader.borrow().labels().to_vec()
    }

    pub fn is_closed(&self) -> bool {
        self.reader.borrow().is_closed()
    }

    pub fn close(&mut self) -> Result<()> {
        let result = self.reader.borrow_mut().close();
        self.unregister();
        result
    }

    fn unregister(&mut self) {
        if self.id == 0 {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.try_borrow_mut() {
                registry.forget(self.id);
            }
        }
        self.id = 0;
    }
}

impl<K: Cursor + 'static> Iterator for ManagedStream<K> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        let (item, exhausted) = {
            let mut reader = self.reader.borrow_mut();
            let item = reader.next();
            (item, reader.is_exhausted())
        };
        if exhausted {
            self.unregister();
        }
        item
    }
}

impl<K: Cursor + 'static> Drop for ManagedStream<K> {
    fn drop(&mut self) {
        let id = self.id;
        if let Err(e) = self.close() {
            log::warn!("closing dropped stream {}: {:#}", id, e);
        }
    }
}

impl<K: Cursor + 'static> fmt::Debug for ManagedStream<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedStream")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
