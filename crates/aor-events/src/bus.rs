// AOR Events - Unified event bus
//
// Typed channels over registered schemas, fan-out to per-subscriber bounded
// queues, and a dead-letter path for payloads that fail the channel's decode
// probe. Per-channel per-publisher ordering is preserved; `strict_order`
// additionally serializes delivery across publishers.

use crate::channel::{
    ChannelConfig, DeadLetterEntry, EventEnvelope, EventFilter, SubscriberQueue, TypedEvent,
};
use crate::schema::{SchemaCodec, SchemaRegistry};
use aor_core::{AorError, AorResult};
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const DEAD_LETTER_RETENTION: usize = 1024;

struct SubscriberSlot {
    id: u64,
    filter: Option<EventFilter>,
    queue: Arc<SubscriberQueue>,
}

pub(crate) struct ChannelState {
    name: String,
    type_name: String,
    version: u32,
    config: ChannelConfig,
    codec: SchemaCodec,
    subscribers: RwLock<Vec<SubscriberSlot>>,
    next_subscriber_id: AtomicU64,
    history: Mutex<Vec<EventEnvelope>>,
    publish_gate: tokio::sync::Mutex<()>,
    published: AtomicU64,
    consumed: AtomicU64,
    dead_lettered: AtomicU64,
}

struct BusShared {
    registry: SchemaRegistry,
    channels: DashMap<String, Arc<ChannelState>>,
    dead_letters: Mutex<VecDeque<DeadLetterEntry>>,
    published: AtomicU64,
    consumed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl BusShared {
    fn dead_letter(
        &self,
        channel: Option<&ChannelState>,
        envelope: EventEnvelope,
        failure_kind: &str,
        failure_message: String,
    ) {
        warn!(
            channel = %envelope.channel,
            event = %envelope.id,
            kind = failure_kind,
            "routing event to dead letter"
        );
        if let Some(channel) = channel {
            channel.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);

        let mut letters = self.dead_letters.lock();
        if letters.len() >= DEAD_LETTER_RETENTION {
            letters.pop_front();
        }
        letters.push_back(DeadLetterEntry {
            envelope,
            failure_kind: failure_kind.to_string(),
            failure_message,
            received_at: Utc::now(),
        });
    }
}

/// Lightweight typed reference to a channel. Handles for the same channel
/// name share the same underlying state.
pub struct ChannelHandle<T> {
    state: Arc<ChannelState>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ChannelHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            _marker: PhantomData,
        }
    }
}

impl<T> ChannelHandle<T> {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn type_name(&self) -> &str {
        &self.state.type_name
    }

    pub fn version(&self) -> u32 {
        self.state.version
    }
}

impl<T> std::fmt::Debug for ChannelHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.state.name)
            .field("type_name", &self.state.type_name)
            .field("version", &self.state.version)
            .finish()
    }
}

/// Per-channel counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub published: u64,
    pub consumed: u64,
    pub dead_lettered: u64,
}

/// Bus-wide counter snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventBusStats {
    pub published: u64,
    pub consumed: u64,
    pub dead_lettered: u64,
    pub per_channel: HashMap<String, ChannelStats>,
}

/// The unified pub/sub bus.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                registry: SchemaRegistry::new(),
                channels: DashMap::new(),
                dead_letters: Mutex::new(VecDeque::new()),
                published: AtomicU64::new(0),
                consumed: AtomicU64::new(0),
                dead_lettered: AtomicU64::new(0),
            }),
        }
    }

    pub fn schema_registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    /// Convenience delegate to the schema registry.
    pub fn register_schema<T: DeserializeOwned + 'static>(
        &self,
        type_name: impl Into<String>,
        version: u32,
    ) {
        self.shared.registry.register::<T>(type_name, version);
    }

    /// Create or fetch a typed channel.
    ///
    /// Fails with a Configuration error when `(type_name, version)` is not
    /// registered, when `T` is not the registered type, or when an existing
    /// channel with the same name carries a different type or version.
    pub fn channel<T: 'static>(
        &self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        version: u32,
        config: ChannelConfig,
    ) -> AorResult<ChannelHandle<T>> {
        let name = name.into();
        let type_name = type_name.into();

        let codec = self.shared.registry.codec(&type_name, version)?;
        if codec.type_id != TypeId::of::<T>() {
            return Err(AorError::config(format!(
                "channel '{}' requested with a type other than the one registered for '{}' v{}",
                name, type_name, version
            )));
        }

        let state = match self.shared.channels.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let state = Arc::clone(existing.get());
                if state.type_name != type_name || state.version != version {
                    return Err(AorError::config(format!(
                        "channel '{}' already exists as '{}' v{}",
                        name, state.type_name, state.version
                    )));
                }
                state
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                debug!(channel = %name, schema = %type_name, version, "creating event channel");
                let state = Arc::new(ChannelState {
                    name: name.clone(),
                    type_name,
                    version,
                    config,
                    codec,
                    subscribers: RwLock::new(Vec::new()),
                    next_subscriber_id: AtomicU64::new(0),
                    history: Mutex::new(Vec::new()),
                    publish_gate: tokio::sync::Mutex::new(()),
                    published: AtomicU64::new(0),
                    consumed: AtomicU64::new(0),
                    dead_lettered: AtomicU64::new(0),
                });
                vacant.insert(Arc::clone(&state));
                state
            }
        };

        Ok(ChannelHandle {
            state,
            _marker: PhantomData,
        })
    }

    /// Publish a typed event. Returns the envelope id.
    pub async fn publish<T: Serialize>(
        &self,
        handle: &ChannelHandle<T>,
        event: &T,
        metadata: HashMap<String, serde_json::Value>,
    ) -> AorResult<String> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| AorError::serialization("json", e.to_string()))?;
        self.deliver(&handle.state, Bytes::from(payload), metadata)
            .await
    }

    /// Publish pre-serialized bytes onto a channel by name. Payloads that
    /// fail the channel's decode probe are dead-lettered, not delivered.
    pub async fn publish_raw(
        &self,
        channel: &str,
        payload: Bytes,
        metadata: HashMap<String, serde_json::Value>,
    ) -> AorResult<String> {
        let state = self
            .shared
            .channels
            .get(channel)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AorError::config(format!("unknown event channel '{}'", channel)))?;
        self.deliver(&state, payload, metadata).await
    }

    async fn deliver(
        &self,
        state: &Arc<ChannelState>,
        payload: Bytes,
        metadata: HashMap<String, serde_json::Value>,
    ) -> AorResult<String> {
        let envelope = EventEnvelope {
            id: Uuid::new_v4().to_string(),
            channel: state.name.clone(),
            version: state.version,
            timestamp: Utc::now(),
            metadata,
            payload,
        };
        let envelope_id = envelope.id.clone();

        let _gate = if state.config.strict_order {
            Some(state.publish_gate.lock().await)
        } else {
            None
        };

        state.published.fetch_add(1, Ordering::Relaxed);
        self.shared.published.fetch_add(1, Ordering::Relaxed);

        if let Err(reason) = state.codec.probe(&envelope.payload) {
            self.shared
                .dead_letter(Some(state.as_ref()), envelope, "deserialization", reason);
            return Ok(envelope_id);
        }

        if state.config.enable_history {
            state.history.lock().push(envelope.clone());
        }

        let slots: Vec<(Option<EventFilter>, Arc<SubscriberQueue>)> = state
            .subscribers
            .read()
            .iter()
            .map(|slot| (slot.filter.clone(), Arc::clone(&slot.queue)))
            .collect();

        for (filter, queue) in slots {
            let matches = filter.as_ref().map_or(true, |f| f(&envelope));
            if matches {
                queue.push(envelope.clone(), &state.name).await?;
            }
        }

        Ok(envelope_id)
    }

    /// Subscribe to a channel with no filter.
    pub fn subscribe<T>(&self, handle: &ChannelHandle<T>) -> Subscription<T> {
        self.subscribe_filtered(handle, None)
    }

    /// Subscribe with an envelope filter evaluated at delivery time.
    pub fn subscribe_filtered<T>(
        &self,
        handle: &ChannelHandle<T>,
        filter: Option<EventFilter>,
    ) -> Subscription<T> {
        let state = Arc::clone(&handle.state);
        let queue = Arc::new(SubscriberQueue::new(
            state.config.buffer_size,
            state.config.overflow_policy,
        ));
        let id = state.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        state.subscribers.write().push(SubscriberSlot {
            id,
            filter,
            queue: Arc::clone(&queue),
        });
        debug!(channel = %state.name, subscriber = id, "subscriber attached");

        Subscription {
            queue,
            state,
            shared: Arc::clone(&self.shared),
            id,
            _marker: PhantomData,
        }
    }

    /// Retained envelopes of a history-enabled channel, in publish order.
    pub fn history<T>(&self, handle: &ChannelHandle<T>) -> Vec<EventEnvelope> {
        handle.state.history.lock().clone()
    }

    /// Snapshot of retained dead-letter entries, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.shared.dead_letters.lock().iter().cloned().collect()
    }

    /// Counter snapshot across the bus and per channel.
    pub fn stats(&self) -> EventBusStats {
        let per_channel = self
            .shared
            .channels
            .iter()
            .map(|entry| {
                let state = entry.value();
                (
                    state.name.clone(),
                    ChannelStats {
                        published: state.published.load(Ordering::Relaxed),
                        consumed: state.consumed.load(Ordering::Relaxed),
                        dead_lettered: state.dead_lettered.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        EventBusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            consumed: self.shared.consumed.load(Ordering::Relaxed),
            dead_lettered: self.shared.dead_lettered.load(Ordering::Relaxed),
            per_channel,
        }
    }
}

/// A subscriber's lazy sequence of typed events. Single consumer; dropping
/// the subscription detaches it from the channel.
pub struct Subscription<T> {
    queue: Arc<SubscriberQueue>,
    state: Arc<ChannelState>,
    shared: Arc<BusShared>,
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Await the next event. Returns None once the subscription is closed
    /// and drained. Envelopes that fail to decode are dead-lettered and
    /// skipped without surfacing to the caller.
    pub async fn recv(&mut self) -> Option<TypedEvent<T>> {
        loop {
            let envelope = self.queue.pop().await?;
            match serde_json::from_slice::<T>(&envelope.payload) {
                Ok(payload) => {
                    self.state.consumed.fetch_add(1, Ordering::Relaxed);
                    self.shared.consumed.fetch_add(1, Ordering::Relaxed);
                    return Some(TypedEvent {
                        id: envelope.id,
                        channel: envelope.channel,
                        version: envelope.version,
                        timestamp: envelope.timestamp,
                        metadata: envelope.metadata,
                        payload,
                    });
                }
                Err(e) => {
                    self.shared.dead_letter(
                        Some(self.state.as_ref()),
                        envelope,
                        "deserialization",
                        e.to_string(),
                    );
                }
            }
        }
    }

    /// Await the next event, giving up after the deadline.
    pub async fn recv_timeout(&mut self, timeout: std::time::Duration) -> Option<TypedEvent<T>> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Events currently buffered for this subscriber.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.queue.close();
        self.state.subscribers.write().retain(|slot| slot.id != self.id);
    }
}
