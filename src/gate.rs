// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Publisher Gate - Single Admission Point
//!
//! # Admission Protocol
//! 1. Authorize module against the allow-list (every call)
//! 2. Validate signal, scrub payload, bound its size
//! 3. Take an in-flight slot (fail fast when saturated)
//! 4. Under the admission lock:
//!    a. reserve subscriber capacity (block-publisher only)
//!    b. assign sequence, id, timestamp
//!    c. durable append (fsync)
//!    d. commit: advance counter, push to ring, fan out
//!
//! # Invariants
//! - Sequences are dense and strictly increasing from 1
//! - Timestamps never decrease along the sequence
//! - A failed append leaves no trace: counter, ring and subscribers untouched

use crate::config::FabricConfig;
use crate::envelope::{Envelope, SharedEnvelope};
use crate::error::{FabricError, Result};
use crate::ring::RingBuffer;
use crate::scrub::Scrubber;
use crate::sink::{EventFanout, EventSink};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Admission {
    sink: Box<dyn EventSink>,
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

pub struct PublisherGate {
    allowlist: RwLock<BTreeSet<String>>,
    scrubber: Scrubber,
    payload_size_limit: usize,
    max_pending: usize,
    block_timeout: Duration,
    pending: AtomicUsize,
    committed: AtomicU64,
    closed: AtomicBool,
    admission: Mutex<Admission>,
    ring: Arc<RingBuffer>,
    fanout: Arc<dyn EventFanout>,
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PublisherGate {
    /// Build a gate over `sink`, continuing from its last durable record.
    pub fn new(
        config: &FabricConfig,
        sink: Box<dyn EventSink>,
        ring: Arc<RingBuffer>,
        fanout: Arc<dyn EventFanout>,
    ) -> Self {
        let last_sequence = sink.last_sequence();
        let last_timestamp = sink.last_timestamp();
        Self {
            allowlist: RwLock::new(config.module_allowlist.clone()),
            scrubber: Scrubber::new(&config.sensitive_fields),
            payload_size_limit: config.payload_size_limit,
            max_pending: config.max_pending_publishes,
            block_timeout: config.publish_block_timeout(),
            pending: AtomicUsize::new(0),
            committed: AtomicU64::new(last_sequence),
            closed: AtomicBool::new(false),
            admission: Mutex::new(Admission {
                sink,
                next_sequence: last_sequence + 1,
                last_timestamp,
            }),
            ring,
            fanout,
        }
    }

    fn lock_admission(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit one record. Returns only after it is durable.
    pub fn publish(&self, module: &str, signal: &str, payload: Value) -> Result<SharedEnvelope> {
        let start = Instant::now();
        match self.admit(module, signal, payload) {
            Ok(envelope) => {
                metrics::increment_counter!("fabric_envelopes_published_total");
                metrics::histogram!("fabric_publish_duration_seconds", start.elapsed().as_secs_f64());
                metrics::gauge!("fabric_latest_sequence", envelope.sequence as f64);
                Ok(envelope)
            }
            Err(e) => {
                metrics::increment_counter!("fabric_publish_rejected_total", "reason" => e.kind());
                tracing::debug!("Rejected publish from {:?} ({}): {}", module, signal, e);
                Err(e)
            }
        }
    }

    fn admit(&self, module: &str, signal: &str, mut payload: Value) -> Result<SharedEnvelope> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }
        if !self.is_authorized(module) {
            return Err(FabricError::PolicyViolation {
                module: module.to_string(),
            });
        }
        if signal.trim().is_empty() {
            return Err(FabricError::InvalidSignal);
        }

        self.scrubber.scrub(&mut payload);
        let size = serde_json::to_vec(&payload)?.len();
        if size > self.payload_size_limit {
            return Err(FabricError::PayloadTooLarge {
                size,
                limit: self.payload_size_limit,
            });
        }

        let _slot = self.try_acquire_slot()?;
        let mut admission = self.lock_admission();
        if self.closed.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }

        let reservation = self.fanout.reserve(self.block_timeout)?;

        let sequence = admission.next_sequence;
        let now = Utc::now();
        let timestamp = match admission.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        let envelope = Envelope {
            id: Uuid::new_v4(),
            module: module.to_string(),
            signal: signal.to_string(),
            payload,
            timestamp,
            sequence,
        };

        // Durability first; nothing below runs if this fails
        admission.sink.append(&envelope)?;

        admission.next_sequence = sequence + 1;
        admission.last_timestamp = Some(timestamp);
        self.committed.store(sequence, Ordering::SeqCst);

        let shared = Arc::new(envelope);
        self.ring.push(Arc::clone(&shared));
        self.fanout.deliver(reservation, &shared);
        drop(admission);

        tracing::debug!("Admitted sequence {} from {} ({})", sequence, module, signal);
        Ok(shared)
    }

    fn try_acquire_slot(&self) -> Result<InFlightGuard<'_>> {
        let previous = self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            counter: &self.pending,
        };
        if previous >= self.max_pending {
            return Err(FabricError::SinkSaturated {
                reason: format!("{} publishes already pending", self.max_pending),
            });
        }
        Ok(guard)
    }

    fn is_authorized(&self, module: &str) -> bool {
        !module.trim().is_empty()
            && self
                .allowlist
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(module)
    }

    /// Allow `module` to publish from the next call on. Returns false if it already could.
    pub fn authorize(&self, module: &str) -> Result<bool> {
        if module.trim().is_empty() {
            return Err(FabricError::PolicyViolation {
                module: module.to_string(),
            });
        }
        let added = self
            .allowlist
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.to_string());
        if added {
            tracing::info!("Module {:?} authorized", module);
        }
        Ok(added)
    }

    /// Remove `module` from the allow-list. Returns false if it was not present.
    pub fn revoke(&self, module: &str) -> bool {
        let removed = self
            .allowlist
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module);
        if removed {
            tracing::info!("Module {:?} revoked", module);
        }
        removed
    }

    pub fn allowed_modules(&self) -> Vec<String> {
        self.allowlist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Sequence of the last committed admission.
    pub fn latest_sequence(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse further admissions and flush the sink.
    ///
    /// Waits for any admission already holding the lock to finish.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut admission = self.lock_admission();
        admission.sink.sync()
    }
}
