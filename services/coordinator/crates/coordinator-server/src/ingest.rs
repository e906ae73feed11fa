//! Bus consumers: one task per topic the coordinator listens on.

use std::sync::Arc;

use edgeship_common::keys::{inventory_ttl, validate_app_key, validate_key_segment};
use edgeship_common::topics;
use edgeship_common::{
    AgentInventoryRecord, BusError, DeploymentCondition, LogLine, MessageBus, Subscription,
};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::forwarder::LogForwarder;
use crate::store::StateStore;
use crate::watchdog::HeartbeatWatchdog;

pub struct Ingest {
    store: Arc<dyn StateStore>,
    watchdog: Arc<HeartbeatWatchdog>,
    forwarder: Option<Arc<LogForwarder>>,
}

impl Ingest {
    pub fn new(
        store: Arc<dyn StateStore>,
        watchdog: Arc<HeartbeatWatchdog>,
        forwarder: Option<Arc<LogForwarder>>,
    ) -> Self {
        Self {
            store,
            watchdog,
            forwarder,
        }
    }

    pub async fn handle_condition(&self, condition: DeploymentCondition) {
        if let Err(reason) = validate_app_key(&condition.app_key())
            .and_then(|()| validate_key_segment(&condition.host, false))
        {
            tracing::warn!(host = %condition.host, reason, "dropping condition with invalid key");
            return;
        }

        tracing::info!(
            app = %condition.app_key(),
            host = %condition.host,
            status = %condition.status,
            error = %condition.error,
            "deployment condition received"
        );
        if let Err(e) = self.store.write_condition(&condition).await {
            tracing::warn!(host = %condition.host, error = %e, "failed to store condition");
        }
    }

    pub async fn handle_inventory(&self, record: AgentInventoryRecord) {
        if let Err(reason) = validate_app_key(&record.app_key())
            .and_then(|()| validate_key_segment(&record.host, false))
        {
            tracing::warn!(host = %record.host, reason, "dropping inventory with invalid key");
            return;
        }

        if let Err(e) = self
            .store
            .write_inventory(&record, inventory_ttl(record.transient))
            .await
        {
            tracing::warn!(host = %record.host, error = %e, "failed to store inventory");
        }
        if !record.transient {
            self.watchdog.reset(&record.host);
        }
    }

    pub async fn handle_log(&self, line: LogLine) {
        let Some(forwarder) = &self.forwarder else {
            tracing::debug!(host = %line.host, app = %line.config, "no log forwarder configured");
            return;
        };
        tracing::info!(
            target: "edgeship::forwarded",
            host = %line.host,
            app = %line.config,
            message = %line.message,
        );
        if let Err(e) = forwarder.forward(&line).await {
            tracing::error!(host = %line.host, app = %line.config, error = %e, "forwarding app logs failed");
        }
    }
}

async fn drain<T, F, Fut>(mut subscription: Subscription, handle: F)
where
    T: DeserializeOwned,
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(decoded) = subscription.recv_json::<T>().await {
        match decoded {
            Ok(payload) => handle(payload).await,
            Err(e) => {
                tracing::warn!(topic = subscription.topic(), error = %e, "skipping malformed message");
            }
        }
    }
    tracing::info!(topic = subscription.topic(), "subscription closed");
}

/// Subscribe to every coordinator topic and start one consumer task each.
pub async fn spawn(
    bus: &dyn MessageBus,
    ingest: Arc<Ingest>,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let status = bus.subscribe(topics::REPO_PUSH_STATUS).await?;
    let inventory = bus.subscribe(topics::AGENT_INVENTORY).await?;
    let logs = bus.subscribe(topics::LOGS).await?;

    let for_status = Arc::clone(&ingest);
    let for_inventory = Arc::clone(&ingest);
    let for_logs = ingest;

    Ok(vec![
        tokio::spawn(async move {
            drain(status, |c: DeploymentCondition| for_status.handle_condition(c)).await;
        }),
        tokio::spawn(async move {
            drain(inventory, |r: AgentInventoryRecord| {
                for_inventory.handle_inventory(r)
            })
            .await;
        }),
        tokio::spawn(async move {
            drain(logs, |l: LogLine| for_logs.handle_log(l)).await;
        }),
    ])
}
