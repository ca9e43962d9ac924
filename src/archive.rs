// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Archive - Read-Only View Over Durable Segments
//!
//! Everything the Recorder has acknowledged is readable here.
//!
//! # Read Contract
//! - Results are ascending by sequence and never contain a gap
//! - A frame that fails validation ends the scan of its segment
//! - Corruption is logged and counted, never returned as an error
//!
//! Readers open their own file handles; the Recorder owns the only
//! writer, so no lock is shared with the admission path.

use crate::envelope::{Cursor, Envelope};
use crate::error::Result;
use crate::segment::{self, SegmentInfo, SegmentReader, TORN_TAIL_REASON};
use crate::sink::ArchiveSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Diagnostic for a frame that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Corruption {
    pub segment: PathBuf,
    /// Byte offset of the first invalid frame.
    pub offset: u64,
    pub reason: String,
}

impl Corruption {
    pub fn is_torn_tail(&self) -> bool {
        self.reason == TORN_TAIL_REASON
    }
}

pub(crate) fn report_corruption(corruption: &Corruption) {
    tracing::warn!(
        "Archive corruption in {:?} at offset {}: {}",
        corruption.segment,
        corruption.offset,
        corruption.reason
    );
    metrics::increment_counter!("fabric_archive_corruption_total");
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub path: PathBuf,
    pub first_sequence: u64,
    pub last_sequence: Option<u64>,
    pub records: u64,
    pub bytes: u64,
    pub valid_bytes: u64,
    pub corruption: Option<Corruption>,
}

/// Missing sequences between two adjacent segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub after: u64,
    pub next: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveReport {
    pub segments: Vec<SegmentReport>,
    pub total_records: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub gaps: Vec<Gap>,
}

impl ArchiveReport {
    pub fn corruptions(&self) -> impl Iterator<Item = &Corruption> {
        self.segments.iter().filter_map(|s| s.corruption.as_ref())
    }

    pub fn is_healthy(&self) -> bool {
        self.gaps.is_empty() && self.corruptions().next().is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        Ok(segment::list_segments(&self.dir)?)
    }

    /// Envelopes with `sequence > from`, ascending, at most `limit`.
    pub fn read_range(&self, from: Cursor, limit: usize) -> Result<Vec<Envelope>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        self.scan(from, |envelope| {
            out.push(envelope);
            out.len() < limit
        })?;
        Ok(out)
    }

    /// Walk envelopes after `from` in sequence order until `visit` returns
    /// false, the archive ends, or a gap or invalid frame is reached.
    ///
    /// Segments wholly at or below the cursor are not opened; frames below
    /// it inside the first segment are skipped by header.
    fn scan(&self, from: Cursor, mut visit: impl FnMut(Envelope) -> bool) -> Result<()> {
        let segments = self.segments()?;
        let last_index = segments.len().saturating_sub(1);
        let mut expected: Option<u64> = None;

        for (index, info) in segments.iter().enumerate() {
            if let Some(next) = segments.get(index + 1) {
                if next.first_sequence <= from.saturating_add(1) {
                    continue;
                }
            }

            let mut reader = SegmentReader::open(info)?;
            reader.skip_through(from)?;
            for item in reader {
                let envelope = match item {
                    Ok(envelope) => envelope,
                    Err(corruption) => {
                        self.note(&corruption, index == last_index);
                        break;
                    }
                };
                if envelope.sequence <= from {
                    continue;
                }
                if let Some(want) = expected {
                    if envelope.sequence != want {
                        tracing::warn!(
                            "Archive gap in {:?}: expected sequence {}, found {}. Stopping read",
                            self.dir,
                            want,
                            envelope.sequence
                        );
                        return Ok(());
                    }
                }
                expected = Some(envelope.sequence + 1);
                if !visit(envelope) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Highest verified sequence, 0 when nothing has been written.
    pub fn latest_sequence(&self) -> Result<u64> {
        let segments = self.segments()?;
        let last_index = segments.len().saturating_sub(1);
        for (index, info) in segments.iter().enumerate().rev() {
            let mut reader = SegmentReader::open(info)?;
            for item in reader.by_ref() {
                if let Err(corruption) = item {
                    self.note(&corruption, index == last_index);
                }
            }
            if let Some(last) = reader.last_sequence() {
                return Ok(last);
            }
        }
        Ok(0)
    }

    /// The last `limit` envelopes, oldest first.
    pub fn tail(&self, limit: usize) -> Result<Vec<Envelope>> {
        let latest = self.latest_sequence()?;
        let from = latest.saturating_sub(limit as u64);
        self.read_range(from, limit)
    }

    /// Envelopes with `timestamp >= since`, in sequence order. One pass.
    pub fn read_since_time(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Envelope>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        self.scan(0, |envelope| {
            if envelope.timestamp >= since {
                out.push(envelope);
            }
            out.len() < limit
        })?;
        Ok(out)
    }

    /// Full scan of every segment.
    pub fn verify(&self) -> Result<ArchiveReport> {
        let mut report = ArchiveReport::default();
        let mut previous_last: Option<u64> = None;

        for info in self.segments()? {
            let bytes = std::fs::metadata(&info.path)?.len();
            let mut reader = SegmentReader::open(&info)?;
            let mut records = 0u64;
            let mut corruption = None;
            for item in reader.by_ref() {
                match item {
                    Ok(_) => records += 1,
                    Err(c) => {
                        report_corruption(&c);
                        corruption = Some(c);
                    }
                }
            }
            let last_sequence = reader.last_sequence();

            if records > 0 {
                if let Some(after) = previous_last {
                    if info.first_sequence != after + 1 {
                        report.gaps.push(Gap {
                            after,
                            next: info.first_sequence,
                        });
                    }
                }
                report.first_sequence.get_or_insert(info.first_sequence);
                report.last_sequence = last_sequence;
                previous_last = last_sequence;
            }
            report.total_records += records;
            report.segments.push(SegmentReport {
                path: info.path.clone(),
                first_sequence: info.first_sequence,
                last_sequence,
                records,
                bytes,
                valid_bytes: reader.valid_len(),
                corruption,
            });
        }

        tracing::info!(
            "Archive verify {:?}: {} segments, {} records, {} gaps",
            self.dir,
            report.segments.len(),
            report.total_records,
            report.gaps.len()
        );
        Ok(report)
    }

    /// A torn tail on the active segment may be a write still in flight.
    fn note(&self, corruption: &Corruption, active_segment: bool) {
        if active_segment && corruption.is_torn_tail() {
            tracing::debug!(
                "Partial frame at end of {:?} (offset {})",
                corruption.segment,
                corruption.offset
            );
        } else {
            report_corruption(corruption);
        }
    }
}

impl ArchiveSource for Archive {
    fn read_range(&self, from: Cursor, limit: usize) -> Result<Vec<Envelope>> {
        Archive::read_range(self, from, limit)
    }

    fn latest_sequence(&self) -> Result<u64> {
        Archive::latest_sequence(self)
    }

    fn tail(&self, limit: usize) -> Result<Vec<Envelope>> {
        Archive::tail(self, limit)
    }

    fn read_since_time(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Envelope>> {
        Archive::read_since_time(self, since, limit)
    }
}
