// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricError {
    /// Module is empty or missing from the allow-list.
    #[error("Policy violation: module {module:?} is not authorized to publish")]
    PolicyViolation { module: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid signal: signal must be non-empty")]
    InvalidSignal,

    /// Durable write failed; nothing was admitted.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Admission path is under backpressure; the call failed fast.
    #[error("Sink saturated: {reason}")]
    SinkSaturated { reason: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    /// An invalid frame sits before the end of the active segment. Records
    /// after it were acknowledged, so the Recorder refuses to cut them off.
    #[error("Archive corrupted: {reason} in {segment:?} at offset {offset}")]
    ArchiveCorrupted {
        segment: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Fabric is shut down")]
    Closed,
}

impl FabricError {
    /// Stable short name, used for metric labels and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FabricError::PolicyViolation { .. } => "policy_violation",
            FabricError::PayloadTooLarge { .. } => "payload_too_large",
            FabricError::InvalidSignal => "invalid_signal",
            FabricError::Io(_) => "io_error",
            FabricError::SinkSaturated { .. } => "sink_saturated",
            FabricError::Codec(_) => "codec_error",
            FabricError::SequenceGap { .. } => "sequence_gap",
            FabricError::ArchiveCorrupted { .. } => "archive_corrupted",
            FabricError::InvalidConfig(_) => "invalid_config",
            FabricError::Closed => "closed",
        }
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;
