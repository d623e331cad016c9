// src/bus.rs
//! In-process event distribution after a successful store write.
//!
//! Registered subscribers are awaited in registration order; a failing
//! subscriber is logged and skipped, never surfaced to the writer. Every
//! event is also pushed onto a broadcast channel for stream consumers.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::NewErrorEvent;
use crate::types::Severity;

const DEFAULT_STREAM_CAPACITY: usize = 256;

/// A row was inserted or bumped.
#[derive(Debug, Clone, Serialize)]
pub struct SavedEvent {
    pub id: i64,
    pub is_new: bool,
    pub occurrence_count: i64,
    pub data: NewErrorEvent,
}

/// A fingerprint was seen for the first time and the caller asked for
/// alerting.
#[derive(Debug, Clone, Serialize)]
pub struct NewErrorSignal {
    pub id: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Saved(SavedEvent),
    NewError(NewErrorSignal),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Subscriber '{name}' failed: {reason}")]
    SubscriberFailed { name: String, reason: String },
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscriber name (for logging)
    fn name(&self) -> &str;

    async fn handle(&self, event: &LogEvent) -> Result<(), BusError>;
}

pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    sender: broadcast::Sender<LogEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            subscribers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        debug!("Registered event subscriber '{}'", subscriber.name());
        self.subscribers.write().push(subscriber);
    }

    /// Receiver for every event published from now on. Slow receivers lag
    /// and lose the oldest events rather than blocking publication.
    pub fn stream(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver to every subscriber, then to stream receivers. Returns how
    /// many subscribers handled the event without error.
    pub async fn publish(&self, event: LogEvent) -> usize {
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self.subscribers.read().clone();

        let mut delivered = 0;
        for subscriber in subscribers {
            match subscriber.handle(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Event subscriber '{}' failed: {}", subscriber.name(), e),
            }
        }

        // No receivers is fine
        let _ = self.sender.send(event);

        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
