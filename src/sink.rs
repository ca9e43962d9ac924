// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sink capabilities.
//!
//! The Gate only needs a durable append and the Replay Service only needs
//! a durable read, so both sit behind a trait. `Recorder` and `Archive`
//! are the file-backed pair; `MemoryLog` is an in-process pair for
//! embedding and tests. Live delivery sits behind `EventFanout`, which
//! the `Broker` implements.

use crate::broker::Reservation;
use crate::envelope::{Cursor, Envelope, SharedEnvelope};
use crate::error::{FabricError, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Durable append side. Owned exclusively by the admission path.
pub trait EventSink: Send {
    /// Persist one envelope. Must not return Ok() until the record survives a crash.
    fn append(&mut self, envelope: &Envelope) -> Result<()>;

    /// Last durably written sequence, 0 when empty.
    fn last_sequence(&self) -> u64;

    fn last_timestamp(&self) -> Option<DateTime<Utc>>;

    fn sync(&mut self) -> Result<()>;
}

/// Durable read side. Shared by any number of readers.
pub trait ArchiveSource: Send + Sync {
    fn read_range(&self, from: Cursor, limit: usize) -> Result<Vec<Envelope>>;

    fn latest_sequence(&self) -> Result<u64>;

    fn tail(&self, limit: usize) -> Result<Vec<Envelope>>;

    fn read_since_time(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Envelope>>;
}

/// Live delivery of admitted envelopes.
///
/// `reserve` runs before the durable append and may reject the admission;
/// `deliver` runs after it, in sequence order, under the admission lock.
pub trait EventFanout: Send + Sync {
    fn reserve(&self, timeout: Duration) -> Result<Reservation>;

    fn deliver(&self, reservation: Reservation, envelope: &SharedEnvelope);
}

/// In-memory log implementing both capabilities over one shared vector.
///
/// Clones share storage: hand one clone to the Gate as the sink and
/// another to the Replay Service as the source.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Arc<RwLock<Vec<Envelope>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemoryLog {
    fn append(&mut self, envelope: &Envelope) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let expected = records.last().map_or(1, |e| e.sequence + 1);
        if envelope.sequence != expected {
            return Err(FabricError::SequenceGap {
                expected,
                found: envelope.sequence,
            });
        }
        records.push(envelope.clone());
        Ok(())
    }

    fn last_sequence(&self) -> u64 {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.last().map_or(0, |e| e.sequence)
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.last().map(|e| e.timestamp)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ArchiveSource for MemoryLog {
    fn read_range(&self, from: Cursor, limit: usize) -> Result<Vec<Envelope>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        // Dense from 1, so the index of `from + 1` is `from`
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(records.len());
        Ok(records[start..].iter().take(limit).cloned().collect())
    }

    fn latest_sequence(&self) -> Result<u64> {
        Ok(EventSink::last_sequence(self))
    }

    fn tail(&self, limit: usize) -> Result<Vec<Envelope>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }

    fn read_since_time(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Envelope>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|e| e.timestamp >= since)
            .take(limit)
            .cloned()
            .collect())
    }
}
