// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Envelope Codec
//!
//! One frame per record. The body is self-describing JSON; the header
//! exists so a reader can detect torn and corrupted records.
//!
//! # Frame Format
//! ```text
//! [magic: "XFR1"][sequence: u64][body_len: u32][crc64: u64][body: JSON]
//! ```
//!
//! All integers little-endian. The checksum covers
//! `sequence || body_len || body`.

use crate::envelope::Envelope;
use crate::error::{FabricError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc64fast::Digest;
use std::io::{self, Read, Write};
use thiserror::Error;

pub const FRAME_MAGIC: [u8; 4] = *b"XFR1";
pub const FRAME_HEADER_SIZE: usize = 4 + 8 + 4 + 8; // 24 bytes

/// Upper bound on a frame body; anything larger is treated as a garbage length.
pub const MAX_FRAME_BODY: u32 = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("truncated frame")]
    Truncated,

    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("frame body length {0} exceeds maximum")]
    Oversized(u32),

    #[error("checksum mismatch: expected {expected:#018x}, found {found:#018x}")]
    ChecksumMismatch { expected: u64, found: u64 },

    #[error("header sequence {header} does not match body sequence {body}")]
    SequenceMismatch { header: u64, body: u64 },

    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u64,
    pub body_len: u32,
    pub checksum: u64,
}

impl FrameHeader {
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&FRAME_MAGIC)?;
        writer.write_u64::<LittleEndian>(self.sequence)?;
        writer.write_u32::<LittleEndian>(self.body_len)?;
        writer.write_u64::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> std::result::Result<Self, FrameError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        Ok(Self {
            sequence: LittleEndian::read_u64(&buf[4..12]),
            body_len: LittleEndian::read_u32(&buf[12..16]),
            checksum: LittleEndian::read_u64(&buf[16..24]),
        })
    }
}

pub fn checksum(sequence: u64, body: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&sequence.to_le_bytes());
    digest.write(&(body.len() as u32).to_le_bytes());
    digest.write(body);
    digest.sum64()
}

/// Encode an envelope into a complete frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(envelope)?;
    let body_len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_BODY)
        .ok_or_else(|| FabricError::Codec(format!("frame body of {} bytes is too large", body.len())))?;

    let header = FrameHeader {
        sequence: envelope.sequence,
        body_len,
        checksum: checksum(envelope.sequence, &body),
    };

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    header.write_to(&mut frame)?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// A frame read back from disk.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub envelope: Envelope,
    /// Bytes consumed, header included.
    pub len: u64,
}

/// Read the next frame.
///
/// `Ok(None)` is a clean end of input (zero bytes left). Any partial
/// header or body is `FrameError::Truncated`.
pub fn read_frame<R: Read>(reader: &mut R) -> std::result::Result<Option<DecodedFrame>, FrameError> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    match read_full(reader, &mut header_buf)? {
        0 => return Ok(None),
        n if n < FRAME_HEADER_SIZE => return Err(FrameError::Truncated),
        _ => {}
    }

    let header = FrameHeader::parse(&header_buf)?;
    if header.body_len > MAX_FRAME_BODY {
        return Err(FrameError::Oversized(header.body_len));
    }

    let mut body = vec![0u8; header.body_len as usize];
    if read_full(reader, &mut body)? < body.len() {
        return Err(FrameError::Truncated);
    }

    let found = checksum(header.sequence, &body);
    if found != header.checksum {
        return Err(FrameError::ChecksumMismatch {
            expected: header.checksum,
            found,
        });
    }

    let envelope: Envelope =
        serde_json::from_slice(&body).map_err(|e| FrameError::Malformed(e.to_string()))?;
    if envelope.sequence != header.sequence {
        return Err(FrameError::SequenceMismatch {
            header: header.sequence,
            body: envelope.sequence,
        });
    }

    Ok(Some(DecodedFrame {
        envelope,
        len: (FRAME_HEADER_SIZE + body.len()) as u64,
    }))
}

/// Like `read_exact`, but reports how much was read instead of failing at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
