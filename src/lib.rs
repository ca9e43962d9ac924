// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! experience-fabric: a durable, replayable event log shared by cognitive modules.
//!
//! # Architecture
//! - Publisher Gate = single admission point (authorize, order, timestamp)
//! - Recorder = append-only segment log, fsync per record
//! - Archive = read-only view over every durable segment
//! - Ring Buffer = bounded in-memory tail for low-latency reads
//! - Broker = live fan-out with an explicit overflow policy
//! - Replay = gap-free, duplicate-free reads from any cursor
//!
//! # Guarantees
//! - `sequence` is dense and strictly increasing from 1
//! - `publish` returns only after the record is durable
//! - Nothing is visible to readers unless it is durable
//! - Replay output is independent of where the Ring/Archive seam falls

pub mod archive;
pub mod broker;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fabric;
pub mod gate;
pub mod recorder;
pub mod replay;
pub mod ring;
pub mod scrub;
pub mod segment;
pub mod sink;

pub use archive::{Archive, ArchiveReport, Corruption};
pub use broker::{Broker, Reservation, Subscription, SubscriptionEvent};
pub use config::{FabricConfig, OverflowPolicy};
pub use envelope::{Cursor, Envelope, SharedEnvelope};
pub use error::{FabricError, Result};
pub use fabric::{Fabric, FabricStatus};
pub use recorder::Recorder;
pub use replay::ReplayService;
pub use ring::RingBuffer;
pub use sink::{ArchiveSource, EventFanout, EventSink, MemoryLog};

#[cfg(test)]
pub mod tests;
