// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Shared fixtures for cross-component tests.

use crate::config::FabricConfig;
use crate::envelope::{Envelope, SharedEnvelope};
use crate::error::{FabricError, Result};
use crate::sink::{EventSink, MemoryLog};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MODULES: [&str; 5] = ["planning", "reasoning", "action", "knowledge", "learning"];

pub fn config(dir: &Path, retention: usize) -> FabricConfig {
    FabricConfig::new(dir, retention, 64 * 1024, 64)
        .with_allowed_modules(MODULES)
        .with_sensitive_fields(["api_key", "password"])
}

pub fn sequences(envelopes: &[SharedEnvelope]) -> Vec<u64> {
    envelopes.iter().map(|e| e.sequence).collect()
}

/// Sink that can be switched into failing mode from the outside.
pub struct FailingSink {
    inner: MemoryLog,
    fail: Arc<AtomicBool>,
}

impl FailingSink {
    pub fn new(inner: MemoryLog) -> (Self, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                fail: Arc::clone(&fail),
            },
            fail,
        )
    }
}

impl EventSink for FailingSink {
    fn append(&mut self, envelope: &Envelope) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FabricError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.append(envelope)
    }

    fn last_sequence(&self) -> u64 {
        self.inner.last_sequence()
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.last_timestamp()
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }
}

/// Sink whose appends take a fixed amount of time.
pub struct SlowSink {
    inner: MemoryLog,
    delay: Duration,
}

impl SlowSink {
    pub fn new(inner: MemoryLog, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl EventSink for SlowSink {
    fn append(&mut self, envelope: &Envelope) -> Result<()> {
        std::thread::sleep(self.delay);
        self.inner.append(envelope)
    }

    fn last_sequence(&self) -> u64 {
        self.inner.last_sequence()
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.last_timestamp()
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }
}
