//! Managed stream registry.
//!
//! Every lazily consumed row stream opened inside a unit of work is
//! registered here. When the unit of work ends, `close_all` force-closes
//! whatever the caller left open. Streams that terminate on their own
//! remove themselves with `forget`.

use eyre::Result;
use hashbrown::HashMap;
use std::rc::Rc;

pub type StreamId = u64;

/// Type-erased close capability of a registered stream.
pub trait StreamHandle {
    /// Closes the stream. Must be idempotent.
    fn close_stream(&self) -> Result<()>;
}

#[derive(Default)]
pub struct StreamRegistry {
    streams: HashMap<StreamId, Rc<dyn StreamHandle>>,
    next_id: StreamId,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: Rc<dyn StreamHandle>) -> StreamId {
        self.next_id += 1;
        let id = self.next_id;
        self.streams.insert(id, handle);
        id
    }

    /// Removes and closes the stream, if still registered.
    pub fn deregister(&mut self, id: StreamId) -> Result<()> {
        match self.streams.remove(&id) {
            Some(handle) => handle.close_stream(),
            None => Ok(()),
        }
    }

    /// Removes the stream without closing it.
    pub fn forget(&mut self, id: StreamId) -> bool {
        self.streams.remove(&id).is_some()
    }

    /// Closes every registered stream in registration order and clears the
    /// registry. Returns the first close error; later ones are logged.
    pub fn close_all(&mut self) -> Result<()> {
        let mut streams: Vec<_> = std::mem::take(&mut self.streams).into_iter().collect();
        if streams.is_empty() {
            return Ok(());
        }
        streams.sort_unstable_by_key(|(id, _)| *id);
        log::debug!("force-closing {} open stream(s)", streams.len());

        let mut first_err = None;
        for (id, handle) in streams {
            if let Err(e) = handle.close_stream() {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    log::warn!("closing stream {} failed: {:#}", id, e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
