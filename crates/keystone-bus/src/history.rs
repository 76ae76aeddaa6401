//! Bounded event history.

use crate::events::{Event, EventKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// One dispatched event as recorded in the history buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventHistoryRecord {
    /// Monotonic across the life of the bus, never reused after eviction.
    pub sequence_id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

/// Fixed-capacity ring of history records, oldest evicted first.
#[derive(Debug)]
pub struct EventHistory {
    records: VecDeque<EventHistoryRecord>,
    capacity: usize,
    next_sequence: u64,
}

impl EventHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_sequence: 0,
        }
    }

    /// Record an event and return its sequence id.
    pub fn record(&mut self, event: &Event) -> u64 {
        self.next_sequence += 1;
        let sequence_id = self.next_sequence;
        if self.capacity == 0 {
            return sequence_id;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(EventHistoryRecord {
            sequence_id,
            timestamp: Utc::now(),
            kind: event.kind(),
            payload: event.snapshot(),
        });
        sequence_id
    }

    /// The most recent `count` records, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<EventHistoryRecord> {
        let skip = self.records.len().saturating_sub(count);
        self.records.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all records. Sequence ids keep counting.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
