use crate::models::{JobKey, NodeId};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast publisher for node lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    published: Arc<AtomicU64>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    /// Node id carried in the event context, if any
    pub fn node_id(&self) -> Option<&str> {
        self.context.get("node_id").and_then(Value::as_str)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context.get("request_id").and_then(Value::as_str)
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event with the given name and context
    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        // send() only fails when nobody is subscribed, which is fine
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Publish a node lifecycle event with the standard context fields
    pub async fn publish_node_event(
        &self,
        event_name: &str,
        key: &JobKey,
        request_id: Uuid,
        details: Value,
    ) -> Result<(), PublishError> {
        let context = json!({
            "node_id": key.node_id.as_str(),
            "fingerprint": key.fingerprint.as_str(),
            "request_id": request_id.to_string(),
            "details": details,
        });
        self.publish(event_name, context).await
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events published since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

/// Collect every event currently buffered for `receiver` that concerns `node_id`
pub fn drain_for_node(
    receiver: &mut broadcast::Receiver<PublishedEvent>,
    node_id: &NodeId,
) -> Vec<PublishedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if event.node_id() == Some(node_id.as_str()) {
            events.push(event);
        }
    }
    events
}
