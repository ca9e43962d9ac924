// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Fabric - Owned Service Instance
//!
//! Wires the Gate, Ring Buffer, Broker and Replay Service over one pair
//! of sinks. Each instance is fully isolated; there is no global hub.
//!
//! # Open Protocol
//! 1. Validate config
//! 2. Open the Recorder (recovers and truncates a torn tail)
//! 3. Warm the Ring Buffer with the Archive's last `retention_count` envelopes
//! 4. Seed sequence counter and last timestamp from the recovered tail

use crate::archive::Archive;
use crate::broker::{Broker, Subscription};
use crate::config::FabricConfig;
use crate::envelope::{Cursor, SharedEnvelope};
use crate::error::Result;
use crate::gate::PublisherGate;
use crate::recorder::Recorder;
use crate::replay::ReplayService;
use crate::ring::RingBuffer;
use crate::sink::{ArchiveSource, EventFanout, EventSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FabricStatus {
    pub latest_sequence: u64,
    pub oldest_retained: Option<u64>,
    pub retained: usize,
    pub subscribers: usize,
    pub allowed_modules: Vec<String>,
    pub closed: bool,
}

pub struct Fabric {
    config: FabricConfig,
    gate: PublisherGate,
    ring: Arc<RingBuffer>,
    broker: Arc<Broker>,
    replay: ReplayService,
}

impl Fabric {
    /// Open the file-backed fabric rooted at `config.archive_dir`.
    pub fn open(config: FabricConfig) -> Result<Self> {
        config.validate()?;
        let recorder = Recorder::open(&config.archive_dir, config.segment_max_bytes)?;
        let archive = Archive::new(&config.archive_dir);
        Self::with_sinks(config, Box::new(recorder), Arc::new(archive))
    }

    /// Same lifecycle over substituted transports.
    pub fn with_sinks(
        config: FabricConfig,
        sink: Box<dyn EventSink>,
        archive: Arc<dyn ArchiveSource>,
    ) -> Result<Self> {
        config.validate()?;

        let ring = Arc::new(RingBuffer::new(config.retention_count));
        let warm = archive.tail(config.retention_count)?;
        let warmed = warm.len();
        ring.extend(warm.into_iter().map(Arc::new));

        let broker = Arc::new(Broker::new(
            config.subscriber_backlog_limit,
            config.subscriber_overflow_policy,
        ));
        broker.set_position(sink.last_sequence());

        let fanout: Arc<dyn EventFanout> = broker.clone();
        let gate = PublisherGate::new(&config, sink, Arc::clone(&ring), fanout);
        let replay = ReplayService::new(Arc::clone(&ring), archive);

        tracing::info!(
            "Fabric opened at {:?}: latest sequence {}, {} envelopes warmed into ring",
            config.archive_dir,
            gate.latest_sequence(),
            warmed
        );
        metrics::gauge!("fabric_latest_sequence", gate.latest_sequence() as f64);

        Ok(Self {
            config,
            gate,
            ring,
            broker,
            replay,
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn publish(&self, module: &str, signal: &str, payload: Value) -> Result<SharedEnvelope> {
        self.gate.publish(module, signal, payload)
    }

    pub fn snapshot(&self, limit: usize) -> Vec<SharedEnvelope> {
        self.replay.snapshot(limit)
    }

    pub fn since(&self, cursor: Cursor) -> Result<Vec<SharedEnvelope>> {
        self.replay.since(cursor)
    }

    pub fn since_page(&self, cursor: Cursor, limit: usize) -> Result<Vec<SharedEnvelope>> {
        self.replay.since_page(cursor, limit)
    }

    pub fn latest(&self, limit: usize) -> Result<Vec<SharedEnvelope>> {
        self.replay.latest(limit)
    }

    pub fn since_time(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<SharedEnvelope>> {
        self.replay.since_time(since, limit)
    }

    pub fn replay(&self) -> &ReplayService {
        &self.replay
    }

    pub fn subscribe(&self) -> Subscription {
        self.broker.subscribe()
    }

    pub fn latest_sequence(&self) -> u64 {
        self.gate.latest_sequence()
    }

    pub fn authorize(&self, module: &str) -> Result<bool> {
        self.gate.authorize(module)
    }

    pub fn revoke(&self, module: &str) -> bool {
        self.gate.revoke(module)
    }

    pub fn allowed_modules(&self) -> Vec<String> {
        self.gate.allowed_modules()
    }

    pub fn status(&self) -> FabricStatus {
        FabricStatus {
            latest_sequence: self.gate.latest_sequence(),
            oldest_retained: self.ring.oldest_sequence(),
            retained: self.ring.len(),
            subscribers: self.broker.subscriber_count(),
            allowed_modules: self.gate.allowed_modules(),
            closed: self.gate.is_closed(),
        }
    }

    /// Stop admissions, flush the sink and close every subscription.
    pub fn shutdown(&self) -> Result<()> {
        let result = self.gate.close();
        self.broker.close_all();
        tracing::info!(
            "Fabric at {:?} shut down at sequence {}",
            self.config.archive_dir,
            self.gate.latest_sequence()
        );
        result
    }
}
