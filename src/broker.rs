// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Subscription Broker
//!
//! Live fan-out of admitted envelopes. Every subscriber owns a bounded
//! channel of `subscriber_backlog_limit` entries; what happens when one
//! fills up is decided by the configured `OverflowPolicy`.
//!
//! Live delivery is best-effort. A subscriber that needs every envelope
//! resynchronizes through the Replay Service from `last_delivered`.

use crate::config::OverflowPolicy;
use crate::envelope::SharedEnvelope;
use crate::error::{FabricError, Result};
use crate::sink::EventFanout;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError, OwnedPermit};
use tokio_stream::Stream;

const RESERVE_BACKOFF: Duration = Duration::from_millis(1);

/// What a subscriber observes.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Envelope(SharedEnvelope),
    /// The subscriber fell behind and was dropped. Resume with `since(last_delivered)`.
    Overflow { last_delivered: u64 },
    /// The fabric shut down.
    Closed,
}

#[derive(Debug, Default)]
struct SubscriberFlags {
    overflowed: AtomicBool,
    closed: AtomicBool,
}

struct Subscriber {
    sender: mpsc::Sender<SharedEnvelope>,
    flags: Arc<SubscriberFlags>,
}

type Registry = Arc<Mutex<HashMap<u64, Subscriber>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<u64, Subscriber>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Broker {
    backlog_limit: usize,
    policy: OverflowPolicy,
    registry: Registry,
    next_id: AtomicU64,
    /// Sequence of the last envelope handed to fan-out.
    position: AtomicU64,
    closed: AtomicBool,
}

impl Broker {
    pub fn new(backlog_limit: usize, policy: OverflowPolicy) -> Self {
        Self {
            backlog_limit: backlog_limit.max(1),
            policy,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            position: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Seed the live position after recovery.
    pub fn set_position(&self, sequence: u64) {
        self.position.store(sequence, Ordering::SeqCst);
    }

    /// Receive every envelope admitted from now on.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.backlog_limit);
        let flags = Arc::new(SubscriberFlags::default());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = lock(&self.registry);
        // Read under the registry lock so no fan-out slips between position and registration
        let position = self.position.load(Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            flags.closed.store(true, Ordering::SeqCst);
            drop(sender);
        } else {
            registry.insert(
                id,
                Subscriber {
                    sender,
                    flags: Arc::clone(&flags),
                },
            );
        }
        drop(registry);

        tracing::debug!("Subscriber {} attached at sequence {}", id, position);
        Subscription {
            id,
            receiver,
            flags,
            registry: Arc::clone(&self.registry),
            last_delivered: position,
            finished: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Claim one slot in every subscriber channel before an admission.
    ///
    /// Under `DropSubscriber` this never waits. Under `BlockPublisher` it
    /// retries until `timeout` and fails with `SinkSaturated` if any
    /// subscriber is still full.
    pub fn reserve(&self, timeout: Duration) -> Result<Reservation> {
        if self.policy == OverflowPolicy::DropSubscriber {
            return Ok(Reservation::none());
        }

        let mut pending: Vec<(u64, mpsc::Sender<SharedEnvelope>)> = lock(&self.registry)
            .iter()
            .map(|(id, s)| (*id, s.sender.clone()))
            .collect();
        let mut permits = Vec::with_capacity(pending.len());
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let mut still_full = Vec::new();
            for (id, sender) in pending {
                match sender.try_reserve_owned() {
                    Ok(permit) => permits.push((id, permit)),
                    Err(TrySendError::Full(sender)) => still_full.push((id, sender)),
                    Err(TrySendError::Closed(_)) => {}
                }
            }
            if still_full.is_empty() {
                let waited = started.elapsed();
                metrics::histogram!("fabric_publish_blocked_seconds", waited.as_secs_f64());
                return Ok(Reservation {
                    permits: Some(permits),
                    waited,
                });
            }
            if Instant::now() >= deadline {
                metrics::histogram!(
                    "fabric_publish_blocked_seconds",
                    started.elapsed().as_secs_f64()
                );
                tracing::warn!(
                    "{} subscriber(s) still full after {:?}; rejecting admission",
                    still_full.len(),
                    timeout
                );
                return Err(FabricError::SinkSaturated {
                    reason: format!("{} subscriber channel(s) full", still_full.len()),
                });
            }
            pending = still_full;
            std::thread::sleep(RESERVE_BACKOFF);
        }
    }

    /// Hand an admitted envelope to every live subscriber.
    pub fn deliver(&self, reservation: Reservation, envelope: &SharedEnvelope) {
        let mut registry = lock(&self.registry);
        self.position.store(envelope.sequence, Ordering::SeqCst);

        let mut reserved = HashMap::new();
        if let Some(permits) = reservation.permits {
            for (id, permit) in permits {
                reserved.insert(id, permit);
            }
        }

        let mut dropped = Vec::new();
        for (id, subscriber) in registry.iter() {
            if let Some(permit) = reserved.remove(id) {
                permit.send(Arc::clone(envelope));
                continue;
            }
            match subscriber.sender.try_send(Arc::clone(envelope)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    subscriber.flags.overflowed.store(true, Ordering::SeqCst);
                    tracing::warn!(
                        "Subscriber {} exceeded backlog of {} at sequence {}; dropping it",
                        id,
                        self.backlog_limit,
                        envelope.sequence
                    );
                    metrics::increment_counter!("fabric_subscriber_overflow_total");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            registry.remove(&id);
        }
    }

    /// Fan out without a prior reservation.
    pub fn fan_out(&self, envelope: &SharedEnvelope) {
        self.deliver(Reservation::none(), envelope);
    }

    /// Detach every subscriber; each observes `Closed` after draining.
    pub fn close_all(&self) {
        let mut registry = lock(&self.registry);
        self.closed.store(true, Ordering::SeqCst);
        for subscriber in registry.values() {
            subscriber.flags.closed.store(true, Ordering::SeqCst);
        }
        let count = registry.len();
        registry.clear();
        tracing::info!("Broker closed {} subscription(s)", count);
    }
}

impl EventFanout for Broker {
    fn reserve(&self, timeout: Duration) -> Result<Reservation> {
        Broker::reserve(self, timeout)
    }

    fn deliver(&self, reservation: Reservation, envelope: &SharedEnvelope) {
        Broker::deliver(self, reservation, envelope)
    }
}

/// Channel slots claimed ahead of an admission. Dropping it releases them.
pub struct Reservation {
    permits: Option<Vec<(u64, OwnedPermit<SharedEnvelope>)>>,
    waited: Duration,
}

impl Reservation {
    /// A reservation that claims nothing; delivery falls back to `try_send`.
    pub fn none() -> Self {
        Self {
            permits: None,
            waited: Duration::ZERO,
        }
    }

    /// Time spent waiting for full subscriber channels.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// Live subscription handle. Dropping it detaches from the broker.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<SharedEnvelope>,
    flags: Arc<SubscriberFlags>,
    registry: Registry,
    last_delivered: u64,
    finished: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence of the last envelope received, or the position at subscribe time.
    pub fn last_delivered(&self) -> u64 {
        self.last_delivered
    }

    /// Next event; `None` once the terminal event has been returned.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Non-blocking receive; `None` when nothing is ready or the subscription is finished.
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        if self.finished {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(envelope) => Some(self.accept(envelope)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.terminal(),
        }
    }

    /// Detach now.
    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> impl Stream<Item = SubscriptionEvent> + Send + Unpin {
        self
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<SubscriptionEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(envelope)) => Poll::Ready(Some(self.accept(envelope))),
            Poll::Ready(None) => Poll::Ready(self.terminal()),
            Poll::Pending => Poll::Pending,
        }
    }

    fn accept(&mut self, envelope: SharedEnvelope) -> SubscriptionEvent {
        self.last_delivered = envelope.sequence;
        SubscriptionEvent::Envelope(envelope)
    }

    fn terminal(&mut self) -> Option<SubscriptionEvent> {
        self.finished = true;
        if self.flags.overflowed.load(Ordering::SeqCst) {
            Some(SubscriptionEvent::Overflow {
                last_delivered: self.last_delivered,
            })
        } else {
            Some(SubscriptionEvent::Closed)
        }
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_event(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if lock(&self.registry).remove(&self.id).is_some() {
            tracing::debug!("Subscriber {} detached", self.id);
        }
    }
}
