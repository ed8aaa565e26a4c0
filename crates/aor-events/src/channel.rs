// AOR Events - Channel primitives
//
// Each subscriber owns an independent bounded queue. The channel's overflow
// policy decides what happens when a queue is full at publish time; the
// publisher never observes a slow subscriber under the drop policies.

use aor_core::{AorError, AorResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Behavior when a subscriber queue is full at publish time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room (observability default)
    #[default]
    DropOldest,
    /// Discard the incoming event
    DropNewest,
    /// Suspend the publisher until the subscriber drains (command channels)
    BlockPublisher,
    /// Fail the publish with EVENT_BUS_FULL
    FailPublisher,
}

/// Per-channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Per-subscriber queue capacity
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Serialize delivery across publishers when true
    #[serde(default)]
    pub strict_order: bool,

    /// Retain published envelopes for replay
    #[serde(default)]
    pub enable_history: bool,
}

fn default_buffer_size() -> usize {
    256
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            overflow_policy: OverflowPolicy::default(),
            strict_order: false,
            enable_history: false,
        }
    }
}

impl ChannelConfig {
    /// Defaults suited to command channels: blocking publisher, ordered.
    pub fn command() -> Self {
        Self {
            overflow_policy: OverflowPolicy::BlockPublisher,
            strict_order: true,
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_strict_order(mut self, strict_order: bool) -> Self {
        self.strict_order = strict_order;
        self
    }

    pub fn with_history(mut self, enable_history: bool) -> Self {
        self.enable_history = enable_history;
        self
    }
}

/// Serialized event with delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: String,
    pub channel: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub payload: Bytes,
}

/// Decoded event handed to a subscriber.
#[derive(Debug, Clone)]
pub struct TypedEvent<T> {
    pub id: String,
    pub channel: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub payload: T,
}

/// Envelope predicate applied per subscriber at delivery time.
pub type EventFilter = Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>;

/// An event the bus could not deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub envelope: EventEnvelope,
    pub failure_kind: String,
    pub failure_message: String,
    pub received_at: DateTime<Utc>,
}

/// Bounded single-consumer queue feeding one subscriber.
pub(crate) struct SubscriberQueue {
    queue: Mutex<VecDeque<EventEnvelope>>,
    capacity: usize,
    policy: OverflowPolicy,
    ready: Notify,
    space: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            policy,
            ready: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue under the channel's overflow policy. Ok(true) when the event
    /// was enqueued, Ok(false) when it was dropped.
    pub(crate) async fn push(&self, envelope: EventEnvelope, channel: &str) -> AorResult<bool> {
        let mut pending = Some(envelope);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(false);
            }
            {
                let mut queue = self.queue.lock();
                if queue.len() < self.capacity {
                    queue.push_back(pending.take().expect("pending envelope"));
                    drop(queue);
                    self.ready.notify_one();
                    return Ok(true);
                }
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(pending.take().expect("pending envelope"));
                        drop(queue);
                        self.ready.notify_one();
                        return Ok(true);
                    }
                    OverflowPolicy::DropNewest => return Ok(false),
                    OverflowPolicy::FailPublisher => {
                        return Err(AorError::event_bus_full(channel));
                    }
                    OverflowPolicy::BlockPublisher => {}
                }
            }
            self.space.notified().await;
        }
    }

    /// Dequeue the next envelope; None once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<EventEnvelope> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(envelope) = queue.pop_front() {
                    drop(queue);
                    self.space.notify_one();
                    return Some(envelope);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.ready.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.space.notify_waiters();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}
