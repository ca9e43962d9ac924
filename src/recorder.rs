// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-Only Segment Recorder
//!
//! This is the durability layer.
//! - Every frame is fsync'd before `append` returns
//! - Frames are never rewritten; only a torn tail is truncated on open
//! - Segments roll over by size without breaking sequence continuity
//!
//! # Recovery
//! `open` scans the last segment frame by frame. A partial final frame
//! (a crash mid-write) is cut off and the last durable sequence is
//! reported. Any other invalid frame fails the open with
//! `ArchiveCorrupted`: the frames behind it were acknowledged and their
//! sequences must never be handed out again.
//!
//! A failed write whose rewind also fails poisons the recorder; every
//! later `append` fails until it is reopened.

use crate::archive::{report_corruption, Corruption};
use crate::codec::{self, FRAME_MAGIC};
use crate::envelope::Envelope;
use crate::error::{FabricError, Result};
use crate::segment::{self, SegmentInfo, SegmentReader};
use crate::sink::EventSink;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct Recorder {
    dir: PathBuf,
    file: File,
    active_path: PathBuf,
    active_len: u64,
    segment_max_bytes: u64,
    last_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
    poisoned: bool,
}

impl Recorder {
    /// Open or create the segment log in `dir`, recovering the tail.
    pub fn open(dir: impl AsRef<Path>, segment_max_bytes: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segments = segment::list_segments(&dir)?;
        let Some(active) = segments.last().cloned() else {
            let first = SegmentInfo {
                path: dir.join(segment::segment_file_name(1)),
                first_sequence: 1,
            };
            let file = open_segment(&first.path)?;
            sync_dir(&dir)?;
            tracing::info!("Recorder initialized new archive at {:?}", dir);
            return Ok(Self {
                dir,
                file,
                active_path: first.path,
                active_len: 0,
                segment_max_bytes,
                last_sequence: 0,
                last_timestamp: None,
                poisoned: false,
            });
        };

        let scan = scan_segment(&active)?;
        let mut file = open_segment(&active.path)?;
        if let Some(corruption) = &scan.corruption {
            if !is_torn_tail(&mut file, corruption)? {
                tracing::error!(
                    "Refusing to open {:?}: {} at offset {} is not a partial final frame",
                    active.path,
                    corruption.reason,
                    corruption.offset
                );
                return Err(FabricError::ArchiveCorrupted {
                    segment: corruption.segment.clone(),
                    offset: corruption.offset,
                    reason: corruption.reason.clone(),
                });
            }
            let on_disk = file.metadata()?.len();
            tracing::warn!(
                "Truncating {} bytes of a partial frame at end of {:?} (offset {})",
                on_disk - scan.valid_len,
                active.path,
                scan.valid_len
            );
            file.set_len(scan.valid_len)?;
            file.sync_data()?;
        }

        let mut last_sequence = scan.last_sequence.unwrap_or(active.first_sequence - 1);
        let mut last_timestamp = scan.last_timestamp;

        // Active segment is empty: the previous segment holds the tail.
        if scan.last_sequence.is_none() && segments.len() > 1 {
            let previous = &segments[segments.len() - 2];
            let prev_scan = scan_segment(previous)?;
            if let Some(prev_last) = prev_scan.last_sequence {
                if prev_last + 1 != active.first_sequence {
                    tracing::warn!(
                        "Segment {:?} starts at {} but previous segment ends at {}",
                        active.path,
                        active.first_sequence,
                        prev_last
                    );
                }
                last_sequence = last_sequence.max(prev_last);
            }
            last_timestamp = prev_scan.last_timestamp;
        }

        tracing::info!(
            "Recorder recovered {:?}: last durable sequence {} ({} segments)",
            dir,
            last_sequence,
            segments.len()
        );

        Ok(Self {
            dir,
            file,
            active_path: active.path,
            active_len: scan.valid_len,
            segment_max_bytes,
            last_sequence,
            last_timestamp,
            poisoned: false,
        })
    }

    /// Durably append one envelope.
    ///
    /// Only returns Ok() after the frame is on stable storage. The envelope's
    /// sequence must be exactly `last_sequence + 1`.
    pub fn append(&mut self, envelope: &Envelope) -> Result<()> {
        if self.poisoned {
            return Err(FabricError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{:?} holds an unrewound partial frame; reopen the recorder", self.active_path),
            )));
        }
        let expected = self.last_sequence + 1;
        if envelope.sequence != expected {
            return Err(FabricError::SequenceGap {
                expected,
                found: envelope.sequence,
            });
        }

        let frame = codec::encode_frame(envelope)?;
        if self.active_len > 0 && self.active_len + frame.len() as u64 > self.segment_max_bytes {
            self.roll_segment(envelope.sequence)?;
        }

        if let Err(e) = self.write_durable(&frame) {
            // Cut any partial frame so a later success never follows garbage
            tracing::error!(
                "Durable append of sequence {} failed: {}. Rewinding {:?} to {}",
                envelope.sequence,
                e,
                self.active_path,
                self.active_len
            );
            if let Err(rewind) = self.file.set_len(self.active_len).and_then(|_| self.file.sync_data()) {
                tracing::error!(
                    "Rewind of {:?} failed: {}. Recorder is poisoned until reopened",
                    self.active_path,
                    rewind
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }

        self.active_len += frame.len() as u64;
        self.last_sequence = envelope.sequence;
        self.last_timestamp = Some(envelope.timestamp);
        Ok(())
    }

    /// True once a failed write could not be rewound.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn write_durable(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        // Force fsync (critical for crash safety)
        self.file.sync_data()
    }

    fn roll_segment(&mut self, first_sequence: u64) -> Result<()> {
        self.file.sync_all()?;

        let path = self.dir.join(segment::segment_file_name(first_sequence));
        let file = open_segment(&path)?;
        sync_dir(&self.dir)?;

        tracing::info!(
            "Segment rollover: {:?} closed at {} bytes, {:?} opened",
            self.active_path,
            self.active_len,
            path
        );
        metrics::increment_counter!("fabric_segment_rollovers_total");

        self.file = file;
        self.active_path = path;
        self.active_len = 0;
        Ok(())
    }

    /// Force data and metadata of the active segment to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn active_segment(&self) -> &Path {
        &self.active_path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EventSink for Recorder {
    fn append(&mut self, envelope: &Envelope) -> Result<()> {
        Recorder::append(self, envelope)
    }

    fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    fn sync(&mut self) -> Result<()> {
        Recorder::sync(self)
    }
}

struct SegmentScan {
    valid_len: u64,
    last_sequence: Option<u64>,
    last_timestamp: Option<DateTime<Utc>>,
    corruption: Option<Corruption>,
}

fn scan_segment(segment: &SegmentInfo) -> Result<SegmentScan> {
    let mut reader = SegmentReader::open(segment)?;
    let mut last_timestamp = None;
    let mut corruption = None;
    for item in reader.by_ref() {
        match item {
            Ok(envelope) => last_timestamp = Some(envelope.timestamp),
            Err(c) => {
                report_corruption(&c);
                corruption = Some(c);
            }
        }
    }
    Ok(SegmentScan {
        valid_len: reader.valid_len(),
        last_sequence: reader.last_sequence(),
        last_timestamp,
        corruption,
    })
}

/// A crash leaves at most one partial frame: the decode ran out of bytes
/// and no later frame header starts after the bad offset.
fn is_torn_tail(file: &mut File, corruption: &Corruption) -> io::Result<bool> {
    if !corruption.is_torn_tail() {
        return Ok(false);
    }
    let mut rest = Vec::new();
    file.seek(SeekFrom::Start(corruption.offset))?;
    file.read_to_end(&mut rest)?;
    let later_frame = rest
        .windows(FRAME_MAGIC.len())
        .skip(1)
        .any(|w| w == FRAME_MAGIC);
    Ok(!later_frame)
}

fn open_segment(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).read(true).open(path)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn envelope(sequence: u64) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            module: "reasoning".to_string(),
            signal: "reasoning.verdict".to_string(),
            payload: json!({ "confidence": 0.8, "n": sequence }),
            timestamp: Utc::now(),
            sequence,
        }
    }

    #[test]
    fn test_recorder_create_and_append() {
        let dir = tempdir().unwrap();
        let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(recorder.last_sequence(), 0);

        recorder.append(&envelope(1)).unwrap();
        recorder.append(&envelope(2)).unwrap();

        assert_eq!(recorder.last_sequence(), 2);
        assert!(recorder.active_segment().ends_with(segment::segment_file_name(1)));
    }

    #[test]
    fn test_recorder_rejects_gap() {
        let dir = tempdir().unwrap();
        let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        recorder.append(&envelope(1)).unwrap();

        match recorder.append(&envelope(3)) {
            Err(FabricError::SequenceGap { expected: 2, found: 3 }) => (),
            other => panic!("Expected SequenceGap, got {:?}", other),
        }
        assert_eq!(recorder.last_sequence(), 1);
    }

    #[test]
    fn test_recorder_reopen_continues() {
        let dir = tempdir().unwrap();
        let last_ts;
        {
            let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
            for seq in 1..=5 {
                recorder.append(&envelope(seq)).unwrap();
            }
            last_ts = recorder.last_timestamp();
        }

        let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(recorder.last_sequence(), 5);
        assert_eq!(recorder.last_timestamp(), last_ts);
        recorder.append(&envelope(6)).unwrap();
    }

    #[test]
    fn test_recorder_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let segment_path;
        let full_len;
        {
            let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
            for seq in 1..=3 {
                recorder.append(&envelope(seq)).unwrap();
            }
            segment_path = recorder.active_segment().to_path_buf();
            full_len = fs::metadata(&segment_path).unwrap().len();
        }

        // Simulate a crash mid-write of a 4th frame
        let partial = codec::encode_frame(&envelope(4)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&segment_path).unwrap();
            file.write_all(&partial[..partial.len() / 2]).unwrap();
        }

        let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(recorder.last_sequence(), 3);
        assert_eq!(fs::metadata(&segment_path).unwrap().len(), full_len);

        // The slot is reusable after truncation
        recorder.append(&envelope(4)).unwrap();
        assert_eq!(recorder.last_sequence(), 4);
    }

    fn frame_offsets(path: &Path) -> Vec<u64> {
        let bytes = fs::read(path).unwrap();
        let mut reader = &bytes[..];
        let mut offsets = Vec::new();
        let mut position = 0;
        while let Some(frame) = codec::read_frame(&mut reader).unwrap() {
            offsets.push(position);
            position += frame.len;
        }
        offsets
    }

    fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(bytes).unwrap();
    }

    fn write_five(dir: &Path) -> PathBuf {
        let mut recorder = Recorder::open(dir, 1024 * 1024).unwrap();
        for seq in 1..=5 {
            recorder.append(&envelope(seq)).unwrap();
        }
        recorder.active_segment().to_path_buf()
    }

    #[test]
    fn test_mid_segment_corruption_refuses_open() {
        let dir = tempdir().unwrap();
        let segment_path = write_five(dir.path());
        let offsets = frame_offsets(&segment_path);
        let full_len = fs::metadata(&segment_path).unwrap().len();

        // One flipped body byte in frame 2 of 5
        overwrite(&segment_path, offsets[1] + codec::FRAME_HEADER_SIZE as u64 + 2, b"#");

        match Recorder::open(dir.path(), 1024 * 1024) {
            Err(FabricError::ArchiveCorrupted { offset, .. }) => assert_eq!(offset, offsets[1]),
            Err(other) => panic!("Expected ArchiveCorrupted, got {:?}", other),
            Ok(r) => panic!("Opened with last sequence {}", r.last_sequence()),
        }
        // Frames 3..=5 are still on disk
        assert_eq!(fs::metadata(&segment_path).unwrap().len(), full_len);
    }

    #[test]
    fn test_garbage_length_mid_segment_is_not_a_torn_tail() {
        let dir = tempdir().unwrap();
        let segment_path = write_five(dir.path());
        let offsets = frame_offsets(&segment_path);
        let full_len = fs::metadata(&segment_path).unwrap().len();

        // body_len of frame 3 now points far past the end of the file
        overwrite(&segment_path, offsets[2] + 12, &(16u32 << 20).to_le_bytes());

        assert!(matches!(
            Recorder::open(dir.path(), 1024 * 1024),
            Err(FabricError::ArchiveCorrupted { .. })
        ));
        assert_eq!(fs::metadata(&segment_path).unwrap().len(), full_len);
    }

    #[test]
    fn test_failed_rewind_poisons_recorder() {
        let dir = tempdir().unwrap();
        let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        recorder.append(&envelope(1)).unwrap();

        // A read-only handle fails the write and the truncate alike
        let path = recorder.active_segment().to_path_buf();
        let writable = std::mem::replace(&mut recorder.file, File::open(&path).unwrap());
        assert!(matches!(recorder.append(&envelope(2)), Err(FabricError::Io(_))));
        assert!(recorder.is_poisoned());

        // Even with a working handle back, nothing more is acknowledged
        recorder.file = writable;
        assert!(matches!(recorder.append(&envelope(2)), Err(FabricError::Io(_))));
        assert_eq!(recorder.last_sequence(), 1);
        drop(recorder);

        let mut reopened = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(reopened.last_sequence(), 1);
        reopened.append(&envelope(2)).unwrap();
    }

    #[test]
    fn test_recorder_rolls_segments() {
        let dir = tempdir().unwrap();
        let frame_len = codec::encode_frame(&envelope(1)).unwrap().len() as u64;
        // Room for two frames per segment
        let mut recorder = Recorder::open(dir.path(), frame_len * 2 + frame_len / 2).unwrap();
        for seq in 1..=5 {
            recorder.append(&envelope(seq)).unwrap();
        }

        let firsts: Vec<u64> = segment::list_segments(dir.path())
            .unwrap()
            .into_iter()
            .map(|s| s.first_sequence)
            .collect();
        assert_eq!(firsts, vec![1, 3, 5]);
    }

    #[test]
    fn test_recorder_reopen_on_empty_rolled_segment() {
        let dir = tempdir().unwrap();
        {
            let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
            recorder.append(&envelope(1)).unwrap();
            recorder.append(&envelope(2)).unwrap();
        }
        // A rollover that crashed before the first frame landed
        File::create(dir.path().join(segment::segment_file_name(3))).unwrap();

        let mut recorder = Recorder::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(recorder.last_sequence(), 2);
        assert!(recorder.last_timestamp().is_some());
        recorder.append(&envelope(3)).unwrap();
    }
}
