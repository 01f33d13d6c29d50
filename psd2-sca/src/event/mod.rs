//! Event handling for the SCA engine
//!
//! Every state change the service commits is published on the [`EventBus`]:
//! to a tokio broadcast channel for loosely coupled listeners, and to the
//! registered [`EventSubscriber`]s which are awaited in order.

pub mod logger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use psd2_spi::{AuthorisationKind, ScaApproach};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::record::ScaStatus;
use crate::response::ParentStatus;

pub use logger::{EventLogger, EventLoggerConfig, LogDestination};

/// Events emitted by the SCA engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new authorisation was stored
    AuthorisationCreated {
        authorisation_id: String,
        parent_id: String,
        kind: AuthorisationKind,
        status: ScaStatus,
    },
    /// A step moved the authorisation to another status
    StatusChanged {
        authorisation_id: String,
        kind: AuthorisationKind,
        from: ScaStatus,
        to: ScaStatus,
    },
    /// The approach was switched to DECOUPLED for this authorisation
    ApproachForced {
        authorisation_id: String,
        previous: Option<ScaApproach>,
    },
    /// The PSU was sent out of the API channel
    HandoffIssued {
        authorisation_id: String,
        approach: ScaApproach,
        expires_at: Option<DateTime<Utc>>,
    },
    /// The consent or payment secured by the authorisation changed status
    ParentStatusChanged {
        authorisation_id: String,
        parent_id: String,
        status: ParentStatus,
    },
}

impl EngineEvent {
    pub fn authorisation_id(&self) -> &str {
        match self {
            EngineEvent::AuthorisationCreated {
                authorisation_id, ..
            }
            | EngineEvent::StatusChanged {
                authorisation_id, ..
            }
            | EngineEvent::ApproachForced {
                authorisation_id, ..
            }
            | EngineEvent::HandoffIssued {
                authorisation_id, ..
            }
            | EngineEvent::ParentStatusChanged {
                authorisation_id, ..
            } => authorisation_id,
        }
    }
}

/// Event subscriber trait for receiving engine events
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle an engine event
    async fn handle_event(&self, event: EngineEvent);
}

/// Event bus for publishing and subscribing to engine events
#[derive(Clone)]
pub struct EventBus {
    /// Sender for the broadcast channel
    sender: broadcast::Sender<EngineEvent>,
    /// Subscribers, shared between clones of the bus
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Create a new event bus whose channel buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to engine events
    pub async fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.push(subscriber);
    }

    /// Get a receiver for engine events
    pub fn subscribe_channel(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Remove a subscriber from the event bus
    pub async fn unsubscribe(&self, subscriber: &Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Publish an event to the channel and every subscriber
    pub async fn publish(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.sender.send(event.clone());

        for subscriber in self.subscribers.read().await.iter() {
            subscriber.handle_event(event.clone()).await;
        }
    }

    pub async fn publish_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<EngineEvent>>,
    }

    #[async_trait]
    impl EventSubscriber for Collector {
        async fn handle_event(&self, event: EngineEvent) {
            self.events.lock().await.push(event);
        }
    }

    fn status_changed() -> EngineEvent {
        EngineEvent::StatusChanged {
            authorisation_id: "auth-1".to_string(),
            kind: AuthorisationKind::Consent,
            from: ScaStatus::Received,
            to: ScaStatus::PsuIdentified,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_channel_and_subscribers() {
        let bus = EventBus::new();
        let collector = Arc::new(Collector::default());
        bus.subscribe(collector.clone()).await;
        let mut rx = bus.subscribe_channel();

        bus.publish(status_changed()).await;

        assert_eq!(rx.recv().await.unwrap(), status_changed());
        assert_eq!(collector.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let collector = Arc::new(Collector::default());
        bus.subscribe(collector.clone()).await;

        bus.clone().publish(status_changed()).await;
        assert_eq!(collector.events.lock().await.len(), 1);

        let as_dyn: Arc<dyn EventSubscriber> = collector.clone();
        bus.unsubscribe(&as_dyn).await;
        bus.publish(status_changed()).await;
        assert_eq!(collector.events.lock().await.len(), 1);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(status_changed()).unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["from"], "received");
        assert_eq!(json["to"], "psuIdentified");
        assert_eq!(status_changed().authorisation_id(), "auth-1");
    }
}
