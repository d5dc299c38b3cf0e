//! Subscriber Hub
//!
//! Registry of connected subscribers and the fan-out primitive used for
//! both acknowledgments and relayed records.
//!
//! Each subscriber owns a bounded outbound queue drained by its own writer
//! task. Fan-out only ever uses `try_send`, so a slow subscriber cannot
//! stall the inbound stream or other subscribers; a subscriber whose queue
//! is full or closed is evicted once the iteration is done.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::producer::RecordSink;
use crate::record::Record;
use crate::wire::Envelope;

/// Unique identifier for a subscriber connection
pub type SubscriberId = String;

/// An encoded text frame, shared between all recipients
pub type Frame = Arc<str>;

/// Manages all subscriber connections
pub struct SubscriberHub {
    /// Active subscribers: SubscriberId → SubscriberHandle
    subscribers: RwLock<HashMap<SubscriberId, SubscriberHandle>>,
    /// Records fanned out since startup
    records_relayed: AtomicU64,
    /// Subscribers dropped for falling behind
    evictions: AtomicU64,
    config: HubConfig,
}

/// Configuration for the subscriber hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent subscribers
    pub max_subscribers: usize,
    /// Frames a subscriber may have queued before it is dropped
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 1000,
            subscriber_buffer: 256,
        }
    }
}

/// Handle for sending frames to one subscriber
struct SubscriberHandle {
    sender: mpsc::Sender<Frame>,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

/// Point-in-time view of a subscriber
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    /// The writer side of the connection is still draining its queue
    pub alive: bool,
    pub queued: usize,
}

impl SubscriberHub {
    /// Create a new subscriber hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            records_relayed: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new subscriber
    ///
    /// Returns the subscriber ID, or an error if the limit has been reached.
    pub async fn register(
        &self,
        peer: Option<SocketAddr>,
        sender: mpsc::Sender<Frame>,
    ) -> Result<SubscriberId, HubError> {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.len() >= self.config.max_subscribers {
            return Err(HubError::TooManySubscribers(self.config.max_subscribers));
        }

        let id = Uuid::new_v4().to_string();
        subscribers.insert(
            id.clone(),
            SubscriberHandle {
                sender,
                peer,
                connected_at: Utc::now(),
            },
        );
        drop(subscribers);

        tracing::info!(subscriber_id = %id, peer = ?peer, "Subscriber connected");
        Ok(id)
    }

    /// Remove a subscriber; returns false if it was already gone
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.subscribers.write().await.remove(id).is_some();
        if removed {
            tracing::info!(subscriber_id = %id, "Subscriber disconnected");
        }
        removed
    }

    /// Queue an event for a single subscriber
    pub async fn send_to(&self, id: &str, envelope: &Envelope) -> Result<(), HubError> {
        let frame = encode(envelope)?;
        let subscribers = self.subscribers.read().await;
        let handle = subscribers.get(id).ok_or(HubError::SubscriberNotFound)?;

        handle.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => HubError::SubscriberLagging,
            TrySendError::Closed(_) => HubError::SendFailed,
        })
    }

    /// Fan an event out to every subscriber except `origin`
    ///
    /// Returns how many subscribers accepted it. Subscribers that cannot
    /// keep up are disconnected.
    pub async fn publish(&self, envelope: &Envelope, origin: Option<&str>) -> usize {
        let frame = match encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(event = %envelope.event, error = %e, "Failed to encode event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut evicted = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, handle) in subscribers.iter() {
                if origin == Some(id.as_str()) {
                    continue;
                }
                match handle.sender.try_send(Arc::clone(&frame)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(subscriber_id = %id, "Subscriber queue full, disconnecting");
                        evicted.push(id.clone());
                    }
                    Err(TrySendError::Closed(_)) => evicted.push(id.clone()),
                }
            }
        }

        for id in evicted {
            if self.unregister(&id).await {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::trace!(event = %envelope.event, subscribers = delivered, "Broadcast event");
        delivered
    }

    /// Relay a record under the given data event name
    pub async fn publish_record(&self, event: &str, record: &Record, origin: Option<&str>) -> usize {
        let envelope = match Envelope::record(event, record) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(event = %event, error = %e, "Failed to encode record");
                return 0;
            }
        };
        self.records_relayed.fetch_add(1, Ordering::Relaxed);
        self.publish(&envelope, origin).await
    }

    /// Get the current subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Snapshot of all subscribers
    pub async fn subscribers(&self) -> Vec<SubscriberInfo> {
        let subscribers = self.subscribers.read().await;
        let mut infos: Vec<SubscriberInfo> = subscribers
            .iter()
            .map(|(id, handle)| SubscriberInfo {
                id: id.clone(),
                peer: handle.peer,
                connected_at: handle.connected_at,
                alive: !handle.sender.is_closed(),
                queued: handle.sender.max_capacity() - handle.sender.capacity(),
            })
            .collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }

    /// Records relayed since startup
    pub fn records_relayed(&self) -> u64 {
        self.records_relayed.load(Ordering::Relaxed)
    }

    /// Subscribers dropped for falling behind
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

fn encode(envelope: &Envelope) -> Result<Frame, HubError> {
    envelope
        .encode()
        .map(Frame::from)
        .map_err(|e| HubError::Encode(e.to_string()))
}

/// Publishes records straight into the hub (embedded producer)
pub struct HubSink {
    hub: Arc<SubscriberHub>,
    data_event: String,
}

impl HubSink {
    pub fn new(hub: Arc<SubscriberHub>, data_event: impl Into<String>) -> Self {
        Self {
            hub,
            data_event: data_event.into(),
        }
    }
}

#[async_trait]
impl RecordSink for HubSink {
    type Error = HubError;

    async fn send(&mut self, record: &Record) -> Result<(), HubError> {
        self.hub.publish_record(&self.data_event, record, None).await;
        Ok(())
    }
}

/// Errors that can occur in the subscriber hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many subscribers (limit: {0})")]
    TooManySubscribers(usize),

    #[error("Subscriber not found")]
    SubscriberNotFound,

    #[error("Subscriber queue is full")]
    SubscriberLagging,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Failed to encode event: {0}")]
    Encode(String),
}
