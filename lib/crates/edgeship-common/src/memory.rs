//! In-process [`MessageBus`] used by tests and single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BusError, MessageBus, SUBSCRIPTION_QUEUE, Subscription};

#[derive(Default)]
struct Inner {
    subscribers: HashMap<String, Vec<mpsc::Sender<String>>>,
    published: Vec<(String, String)>,
}

/// Fan-out bus keeping a log of everything published.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Payloads published on `topic`, decoded. Undecodable entries are skipped.
    pub fn published_json<T: serde::de::DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the others.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "bus unavailable".to_string(),
            });
        }

        let senders = {
            let mut inner = self.lock();
            inner.published.push((topic.to_string(), payload.clone()));
            let senders = inner.subscribers.entry(topic.to_string()).or_default();
            senders.retain(|tx| !tx.is_closed());
            senders.clone()
        };

        for tx in senders {
            // Receiver dropped between the retain above and now.
            let _ = tx.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);
        self.lock()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(topic, rx))
    }
}
