//! Per-job publish/subscribe bus backed by `tokio::sync::broadcast` channels.
//!
//! [`JobBus`] keeps one broadcast channel per job identifier. Channels are
//! created by the first subscriber and removed when the last
//! [`Subscription`] is dropped. Payloads are opaque strings delivered
//! verbatim; a payload published while nobody is subscribed is dropped.
//!
//! Shared via `Arc<JobBus>` between the worker pool and the API.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quboflow_core::messages::JobMessage;
use quboflow_core::types::JobId;
use tokio::sync::broadcast;

/// Default buffer capacity of each job channel.
const DEFAULT_CAPACITY: usize = 1024;

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>;

/// In-process fan-out bus keyed by channel name (the job id).
#[derive(Clone)]
pub struct JobBus {
    channels: Channels,
    capacity: usize,
}

impl JobBus {
    /// Create a bus whose channels buffer `capacity` payloads each.
    ///
    /// When a channel's buffer is full, the oldest un-consumed payloads are
    /// dropped and slow subscribers observe a lag.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Publish a raw payload. Returns how many subscribers it reached.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        let channels = self.channels.lock();
        match channels.get(channel) {
            // A send error only means there are zero receivers.
            Some(sender) => sender.send(payload.into()).unwrap_or(0),
            None => 0,
        }
    }

    /// Publish a job message on the job's channel.
    pub fn publish_message(&self, job_id: JobId, message: &JobMessage) -> usize {
        let delivered = self.publish(&job_id.to_string(), message.to_payload());
        tracing::trace!(
            job_id = %job_id,
            terminal = message.is_terminal(),
            delivered,
            "Published job message",
        );
        delivered
    }

    /// Subscribe to a channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let mut channels = self.channels.lock();
        let receiver = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            channel: channel.to_string(),
            receiver,
            channels: Arc::clone(&self.channels),
        }
    }

    /// Number of channels with at least one live subscription.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for JobBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Outcome of [`Subscription::recv`] other than a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The subscriber fell behind and this many payloads were skipped.
    Lagged(u64),
    /// The bus was dropped.
    Closed,
}

/// A live subscription to one channel. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
    channels: Channels,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload, in publish order.
    pub async fn recv(&mut self) -> Result<String, RecvError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => RecvError::Lagged(n),
            broadcast::error::RecvError::Closed => RecvError::Closed,
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = self.channels.lock();
        // `self.receiver` is still alive here, so the last subscriber sees 1.
        let is_last = channels
            .get(&self.channel)
            .is_some_and(|sender| sender.receiver_count() <= 1);
        if is_last {
            channels.remove(&self.channel);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
