//! Publish/subscribe port shared by the coordinator and the agent.
//!
//! Each subscription owns a bounded queue, so every topic is drained by its
//! own task and a slow handler on one topic never stalls another.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

/// Capacity of the per-subscription queue.
pub const SUBSCRIPTION_QUEUE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// Messages arriving on one topic, in delivery order.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next raw payload, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Payload already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Next payload decoded as `T`. Decode failures are returned so the
    /// caller can log and skip them.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Option<Result<T, serde_json::Error>> {
        self.rx
            .recv()
            .await
            .map(|payload| serde_json::from_str(&payload))
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// Serialize `value` as JSON and publish it on `topic`.
pub async fn publish_json<T>(bus: &dyn MessageBus, topic: &str, value: &T) -> Result<(), BusError>
where
    T: Serialize + Sync + ?Sized,
{
    let payload = serde_json::to_string(value).map_err(|source| BusError::Encode {
        topic: topic.to_string(),
        source,
    })?;
    bus.publish(topic, payload).await
}
