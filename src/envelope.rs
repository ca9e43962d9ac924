// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The unit of record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Resumption token: the last `sequence` a consumer has fully processed.
pub type Cursor = u64;

/// Envelopes are immutable once admitted, so readers share them.
pub type SharedEnvelope = Arc<Envelope>;

/// One admitted record.
///
/// `id`, `timestamp` and `sequence` are assigned by the Publisher Gate.
/// `sequence` is the total order; `timestamp` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub module: String,
    pub signal: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}
