//! # Handler Registry
//!
//! Per-kind handler lists kept sorted by ascending priority. Entries with equal
//! priority keep registration order because new entries are inserted after
//! every existing entry of the same priority.

use crate::errors::HandlerError;
use crate::events::{Event, EventKind};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identity of a subscription, returned by `subscribe*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(u64);

impl HandlerId {
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Synchronous handler, invoked inline by `publish`.
pub type SyncHandler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Asynchronous handler. The token is cancelled when the handler times out.
pub type AsyncHandler = Arc<
    dyn Fn(Arc<Event>, CancellationToken) -> BoxFuture<'static, Result<(), HandlerError>>
        + Send
        + Sync,
>;

/// The callable half of a handler entry.
#[derive(Clone)]
pub enum HandlerCallback {
    Sync(SyncHandler),
    Async {
        handler: AsyncHandler,
        timeout: Duration,
    },
}

impl fmt::Debug for HandlerCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "Sync"),
            Self::Async { timeout, .. } => write!(f, "Async(timeout={timeout:?})"),
        }
    }
}

/// A registered handler.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    pub id: HandlerId,
    pub kind: EventKind,
    pub priority: i32,
    pub callback: HandlerCallback,
}

impl HandlerEntry {
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.callback, HandlerCallback::Async { .. })
    }

    /// Timeout for async handlers, `None` for sync ones.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match &self.callback {
            HandlerCallback::Sync(_) => None,
            HandlerCallback::Async { timeout, .. } => Some(*timeout),
        }
    }
}

/// Handler lists keyed by event kind.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Arc<HandlerEntry>>>,
    next_id: u64,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler and return its id.
    pub fn insert(&mut self, kind: EventKind, priority: i32, callback: HandlerCallback) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        let entry = Arc::new(HandlerEntry {
            id,
            kind,
            priority,
            callback,
        });

        let list = self.handlers.entry(kind).or_default();
        let position = list.partition_point(|existing| existing.priority <= priority);
        list.insert(position, entry);
        id
    }

    /// Remove a handler. Returns whether it existed.
    pub fn remove(&mut self, kind: EventKind, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        removed
    }

    /// Snapshot of the handlers for a kind, in dispatch order.
    #[must_use]
    pub fn snapshot(&self, kind: EventKind) -> Vec<Arc<HandlerEntry>> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }

    /// `(sync, async)` subscriber counts for a kind.
    #[must_use]
    pub fn counts(&self, kind: EventKind) -> (usize, usize) {
        self.handlers.get(&kind).map_or((0, 0), |list| {
            let asynchronous = list.iter().filter(|entry| entry.is_async()).count();
            (list.len() - asynchronous, asynchronous)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
