// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Live Ring Buffer
//!
//! Bounded tail of the most recent envelopes. Only the admission path
//! (and warm-up at open) pushes; readers copy `Arc` pointers under a
//! short read lock.

use crate::envelope::{Cursor, SharedEnvelope};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Retained entries after a cursor, taken under one lock.
#[derive(Debug, Clone, Default)]
pub struct RingWindow {
    /// Oldest retained sequence when the window was taken; None if empty.
    pub oldest: Option<u64>,
    pub entries: Vec<SharedEnvelope>,
}

#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    entries: RwLock<VecDeque<SharedEnvelope>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<SharedEnvelope>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<SharedEnvelope>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Append, evicting the oldest entry when full.
    pub fn push(&self, envelope: SharedEnvelope) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(envelope);
    }

    pub fn extend<I: IntoIterator<Item = SharedEnvelope>>(&self, envelopes: I) {
        for envelope in envelopes {
            self.push(envelope);
        }
    }

    /// Most recent `min(limit, len)` entries, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<SharedEnvelope> {
        let entries = self.read();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.read().front().map(|e| e.sequence)
    }

    pub fn newest_sequence(&self) -> Option<u64> {
        self.read().back().map(|e| e.sequence)
    }

    /// Oldest retained sequence plus every entry with `sequence > cursor`.
    pub fn window_after(&self, cursor: Cursor) -> RingWindow {
        let entries = self.read();
        let oldest = entries.front().map(|e| e.sequence);
        let start = entries.partition_point(|e| e.sequence <= cursor);
        RingWindow {
            oldest,
            entries: entries.range(start..).cloned().collect(),
        }
    }
}
