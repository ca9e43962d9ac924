// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Segment files.
//!
//! A segment covers a contiguous sequence range and is named for its
//! first sequence: `segment-{first_sequence:020}.log`.

use crate::archive::Corruption;
use crate::codec::{self, FrameError, FrameHeader, FRAME_HEADER_SIZE, MAX_FRAME_BODY};
use crate::envelope::Envelope;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".log";

/// Reason recorded when a segment ends part-way through a frame.
pub const TORN_TAIL_REASON: &str = "truncated trailing record";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub first_sequence: u64,
}

pub fn segment_file_name(first_sequence: u64) -> String {
    format!("{SEGMENT_PREFIX}{first_sequence:020}{SEGMENT_SUFFIX}")
}

pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// List segments in `dir`, ordered by first sequence. A missing directory is empty.
pub fn list_segments(dir: &Path) -> io::Result<Vec<SegmentInfo>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(first_sequence) = name.to_str().and_then(parse_segment_name) else {
            continue;
        };
        segments.push(SegmentInfo {
            path: entry.path(),
            first_sequence,
        });
    }
    segments.sort_by_key(|s| s.first_sequence);
    Ok(segments)
}

/// Sequential reader over one segment.
///
/// Yields envelopes until the end of the file or the first frame that
/// fails validation. A failure is yielded once as `Err(Corruption)` and
/// the reader is exhausted afterwards. `valid_len()` is the byte length
/// of the verified prefix.
pub struct SegmentReader {
    path: PathBuf,
    reader: BufReader<File>,
    file_len: u64,
    valid_len: u64,
    expected_sequence: u64,
    done: bool,
}

impl SegmentReader {
    pub fn open(segment: &SegmentInfo) -> io::Result<Self> {
        let file = File::open(&segment.path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            path: segment.path.clone(),
            reader: BufReader::new(file),
            file_len,
            valid_len: 0,
            expected_sequence: segment.first_sequence,
            done: false,
        })
    }

    /// Move past every frame with `sequence <= cursor` reading headers only.
    ///
    /// Skipped bodies are neither checksummed nor decoded. Skipping stops
    /// in front of the first header that is unreadable, out of sequence or
    /// longer than the file, so iteration reports it as usual.
    pub fn skip_through(&mut self, cursor: u64) -> io::Result<()> {
        const HEADER: u64 = FRAME_HEADER_SIZE as u64;
        while !self.done && self.expected_sequence <= cursor {
            if self.valid_len + HEADER > self.file_len {
                break;
            }
            let mut buf = [0u8; FRAME_HEADER_SIZE];
            match self.reader.read_exact(&mut buf) {
                Ok(()) => {}
                // Shrunk underneath us by a rewind; nothing past here is durable
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.done = true;
                    break;
                }
                Err(e) => return Err(e),
            }

            let frame_len = match FrameHeader::parse(&buf) {
                Ok(header)
                    if header.sequence == self.expected_sequence
                        && header.body_len <= MAX_FRAME_BODY =>
                {
                    HEADER + u64::from(header.body_len)
                }
                _ => {
                    self.reader.seek_relative(-(HEADER as i64))?;
                    break;
                }
            };
            if self.valid_len + frame_len > self.file_len {
                self.reader.seek_relative(-(HEADER as i64))?;
                break;
            }

            self.reader.seek_relative((frame_len - HEADER) as i64)?;
            self.valid_len += frame_len;
            self.expected_sequence += 1;
        }
        Ok(())
    }

    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Sequence of the last verified frame, if any.
    pub fn last_sequence(&self) -> Option<u64> {
        if self.valid_len == 0 {
            None
        } else {
            Some(self.expected_sequence - 1)
        }
    }

    fn corruption(&self, reason: String) -> Corruption {
        Corruption {
            segment: self.path.clone(),
            offset: self.valid_len,
            reason,
        }
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Envelope, Corruption>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let frame = match codec::read_frame(&mut self.reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                let reason = match e {
                    FrameError::Truncated => TORN_TAIL_REASON.to_string(),
                    other => other.to_string(),
                };
                return Some(Err(self.corruption(reason)));
            }
        };

        if frame.envelope.sequence != self.expected_sequence {
            self.done = true;
            let reason = format!(
                "sequence discontinuity: expected {}, found {}",
                self.expected_sequence, frame.envelope.sequence
            );
            return Some(Err(self.corruption(reason)));
        }

        self.valid_len += frame.len;
        self.expected_sequence += 1;
        Some(Ok(frame.envelope))
    }
}
