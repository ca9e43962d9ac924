// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replay Service
//!
//! Answers "everything after cursor C" by stitching the Archive prefix to
//! the Ring Buffer window.
//!
//! # Seam Protocol
//! 1. Take the ring window after C (oldest + entries, one read lock)
//! 2. C >= oldest - 1: the window is the answer
//! 3. Otherwise read (C, oldest - 1] from the Archive, then the window
//!
//! Everything below `oldest` was durable before it entered the ring, so
//! step 3 never races the writer. Reads never touch the admission lock.

use crate::envelope::{Cursor, Envelope, SharedEnvelope};
use crate::error::Result;
use crate::ring::RingBuffer;
use crate::sink::ArchiveSource;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct ReplayService {
    ring: Arc<RingBuffer>,
    archive: Arc<dyn ArchiveSource>,
}

fn share(envelopes: Vec<Envelope>) -> impl Iterator<Item = SharedEnvelope> {
    envelopes.into_iter().map(Arc::new)
}

impl ReplayService {
    pub fn new(ring: Arc<RingBuffer>, archive: Arc<dyn ArchiveSource>) -> Self {
        Self { ring, archive }
    }

    /// Most recent `min(limit, retained)` envelopes from memory.
    pub fn snapshot(&self, limit: usize) -> Vec<SharedEnvelope> {
        self.ring.snapshot(limit)
    }

    /// Every envelope with `sequence > cursor`, ascending, gap-free.
    pub fn since(&self, cursor: Cursor) -> Result<Vec<SharedEnvelope>> {
        self.since_page(cursor, usize::MAX)
    }

    /// First `limit` envelopes of `since(cursor)`. Empty means caught up.
    pub fn since_page(&self, cursor: Cursor, limit: usize) -> Result<Vec<SharedEnvelope>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let window = self.ring.window_after(cursor);
        let Some(oldest) = window.oldest else {
            return Ok(share(self.archive.read_range(cursor, limit)?).collect());
        };
        if cursor.saturating_add(1) >= oldest {
            return Ok(window.entries.into_iter().take(limit).collect());
        }

        let below_ring = usize::try_from(oldest - 1 - cursor).unwrap_or(usize::MAX);
        let wanted = below_ring.min(limit);
        let mut prefix = self.archive.read_range(cursor, wanted)?;
        prefix.retain(|e| e.sequence < oldest);

        let complete = prefix.len() == wanted
            && prefix.first().map_or(true, |e| e.sequence == cursor + 1);
        if !complete {
            tracing::warn!(
                "Replay seam shortfall after cursor {}: archive returned {} of {} envelopes below ring start {}",
                cursor,
                prefix.len(),
                wanted,
                oldest
            );
        }

        let mut out: Vec<SharedEnvelope> = share(prefix).collect();
        if out.len() < limit {
            let room = limit - out.len();
            out.extend(window.entries.into_iter().take(room));
        }
        Ok(out)
    }

    /// Most recent `limit` envelopes, oldest first, reaching into the Archive if needed.
    pub fn latest(&self, limit: usize) -> Result<Vec<SharedEnvelope>> {
        let recent = self.ring.snapshot(limit);
        if recent.len() >= limit {
            return Ok(recent);
        }
        let Some(first) = recent.first() else {
            return Ok(share(self.archive.tail(limit)?).collect());
        };

        let first_sequence = first.sequence;
        let need = (limit - recent.len()) as u64;
        let upper = first_sequence - 1;
        let from = upper.saturating_sub(need);
        let count = usize::try_from(upper - from).unwrap_or(usize::MAX);

        let mut older = self.archive.read_range(from, count)?;
        older.retain(|e| e.sequence < first_sequence);

        let mut out: Vec<SharedEnvelope> = share(older).collect();
        out.extend(recent);
        Ok(out)
    }

    /// Envelopes with `timestamp >= since`, in sequence order.
    pub fn since_time(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<SharedEnvelope>> {
        let window = self.ring.window_after(0);
        let Some(oldest) = window.oldest else {
            return Ok(share(self.archive.read_since_time(since, limit)?).collect());
        };

        // Timestamps never decrease, so nothing older than the ring can match
        let ring_covers = window.entries.first().map_or(false, |e| e.timestamp < since);
        let ring_matches = window.entries.into_iter().filter(|e| e.timestamp >= since);
        if ring_covers {
            return Ok(ring_matches.take(limit).collect());
        }

        let mut older = self.archive.read_since_time(since, limit)?;
        older.retain(|e| e.sequence < oldest);
        let mut out: Vec<SharedEnvelope> = share(older).collect();
        out.extend(ring_matches);
        out.truncate(limit);
        Ok(out)
    }
}
