//! Application service: the long-running agent.
//!
//! Consumes build-available and service-action messages, publishes
//! heartbeats and forwards app logs. Every topic is drained by its own task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use edgeship_common::bus::SUBSCRIPTION_QUEUE;
use edgeship_common::{
    AgentInventoryRecord, AppKey, Artifact, BusError, DeploymentCondition, LogLine, MessageBus,
    ServiceAction, ServiceActionRequest, Subscription, publish_json, timing, topics,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::ports::LogSource;
use crate::application::services::dispatch::PushQueues;
use crate::application::services::updater::{Deployer, UpdateOutcome};
use crate::domain::ManagedAppConfig;

pub struct Agent {
    host: String,
    transient: bool,
    deployer: Arc<Deployer>,
    bus: Arc<dyn MessageBus>,
    logs: Arc<dyn LogSource>,
    pushes: Arc<PushQueues>,
}

enum PushTarget {
    SelfUpdate,
    App(ManagedAppConfig),
}

impl Agent {
    pub fn new(
        host: impl Into<String>,
        transient: bool,
        deployer: Arc<Deployer>,
        bus: Arc<dyn MessageBus>,
        logs: Arc<dyn LogSource>,
    ) -> Self {
        Self {
            host: host.into(),
            transient,
            deployer,
            bus,
            logs,
            pushes: Arc::new(PushQueues::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn report(&self, condition: &DeploymentCondition) {
        if let Err(e) = publish_json(self.bus.as_ref(), topics::REPO_PUSH_STATUS, condition).await {
            tracing::error!(
                app = %condition.app_key(),
                status = %condition.status,
                error = %e,
                "failed to publish deployment condition"
            );
        }
    }

    async fn managed(&self, app: &AppKey) -> Option<ManagedAppConfig> {
        match self.deployer.apps().get(app).await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(%app, error = %e, "failed to read managed apps");
                None
            }
        }
    }

    async fn target(&self, app: &AppKey) -> Option<PushTarget> {
        if self.deployer.is_self(app) {
            Some(PushTarget::SelfUpdate)
        } else {
            self.managed(app).await.map(PushTarget::App)
        }
    }

    // ── Build-available ───────────────────────────────────────────────────────

    /// Queue a build-available event. Pushes of one app apply in arrival
    /// order; different apps update concurrently.
    pub fn submit_push(self: &Arc<Self>, artifact: Artifact) {
        let agent = Arc::clone(self);
        self.pushes.submit(artifact, move |artifact| {
            let agent = Arc::clone(&agent);
            async move { agent.handle_push(artifact).await }
        });
    }

    /// Apps with queued or running updates.
    pub fn busy_apps(&self) -> usize {
        self.pushes.active()
    }

    /// Apply a build-available event now if it names an app on this host.
    /// Callers order pushes of one app; the daemon does so via `submit_push`.
    pub async fn handle_push(&self, artifact: Artifact) {
        let app = artifact.app_key();
        let Some(target) = self.target(&app).await else {
            tracing::debug!(%app, "ignoring push for unmanaged app");
            return;
        };

        tracing::info!(%app, sha = %artifact.sha, name = %artifact.name, "update requested");
        self.report(&DeploymentCondition::in_progress(&app, &self.host))
            .await;

        let result = match &target {
            PushTarget::SelfUpdate => self.deployer.apply_self(&artifact).await,
            PushTarget::App(config) => self.deployer.apply_app(&artifact, config, false).await,
        };

        match result {
            Ok(UpdateOutcome::Completed) => {
                self.report(&DeploymentCondition::success(&app, &self.host))
                    .await;
            }
            Ok(UpdateOutcome::RestartPending) => {
                tracing::info!(%app, "agent restart queued");
            }
            Err(e) => {
                tracing::error!(%app, phase = %e.phase, error = %e.message, "update failed");
                self.report(&DeploymentCondition::failed(&app, &self.host, e.to_string()))
                    .await;
            }
        }
    }

    // ── Service actions ───────────────────────────────────────────────────────

    pub async fn handle_service(&self, request: ServiceActionRequest) {
        let app = request.app_key();
        if self.managed(&app).await.is_none() {
            tracing::debug!(%app, "ignoring service action for unmanaged app");
            return;
        }

        let unit = &request.manifest_name;
        let services = self.deployer.services();
        let result = match request.action {
            ServiceAction::Start => services.start(unit).await,
            ServiceAction::Stop => services.stop(unit).await,
            ServiceAction::Restart => services.restart(unit).await,
        };
        match result {
            Ok(()) => tracing::info!(%app, action = %request.action, "service action applied"),
            Err(e) => {
                tracing::error!(%app, action = %request.action, error = %e, "service action failed");
            }
        }
    }

    // ── Inventory ─────────────────────────────────────────────────────────────

    /// One heartbeat per managed app plus one for the agent itself.
    pub async fn publish_inventory(&self, now: DateTime<Utc>) {
        let mut apps = match self.deployer.apps().list().await {
            Ok(configs) => configs.iter().map(ManagedAppConfig::app_key).collect(),
            Err(e) => {
                tracing::error!(error = %e, "failed to read managed apps for inventory");
                Vec::new()
            }
        };
        apps.push(self.deployer.self_app().clone());

        for app in apps {
            let record = AgentInventoryRecord::new(&app, &self.host, now, self.transient);
            if let Err(e) = publish_json(self.bus.as_ref(), topics::AGENT_INVENTORY, &record).await {
                tracing::warn!(%app, error = %e, "failed to publish inventory");
            }
        }
    }

    // ── Log forwarding ────────────────────────────────────────────────────────

    /// Follow one app's journal and publish every line until the source ends.
    pub async fn forward_logs(&self, config: ManagedAppConfig) {
        let app = config.app_key();
        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_QUEUE);

        let follow = self.logs.follow(&config.manifest_name, tx);
        let publish = async {
            while let Some(entry) = rx.recv().await {
                for message in parse_journal_entry(&entry) {
                    let line = LogLine {
                        message,
                        host: self.host.clone(),
                        config: app.clone(),
                    };
                    if let Err(e) = publish_json(self.bus.as_ref(), topics::LOGS, &line).await {
                        tracing::warn!(%app, error = %e, "failed to publish log line");
                    }
                }
            }
        };

        let (followed, ()) = tokio::join!(follow, publish);
        match followed {
            Ok(()) => tracing::info!(%app, "log source ended"),
            Err(e) => tracing::error!(%app, error = %e, "log forwarding stopped"),
        }
    }
}

/// Lines worth forwarding from one `journalctl --output json` entry.
pub fn parse_journal_entry(entry: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(entry) else {
        return Vec::new();
    };
    if value.get("SYSLOG_IDENTIFIER").and_then(|v| v.as_str()) == Some("systemd") {
        return Vec::new();
    }

    let message = match value.get("MESSAGE") {
        Some(serde_json::Value::String(s)) => s.clone(),
        // Non UTF-8 messages come as byte arrays.
        Some(serde_json::Value::Array(bytes)) => {
            let raw: Vec<u8> = bytes
                .iter()
                .filter_map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            String::from_utf8_lossy(&raw).into_owned()
        }
        _ => return Vec::new(),
    };
    if message.contains("Logs begin at") {
        return Vec::new();
    }

    message
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
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

/// Subscribe to the agent topics and start the consumer, heartbeat and
/// log-forwarding tasks.
pub async fn spawn(agent: Arc<Agent>) -> Result<Vec<JoinHandle<()>>, BusError> {
    let pushes = agent.bus.subscribe(topics::REPO_PUSH).await?;
    let actions = agent.bus.subscribe(topics::SERVICE).await?;

    let mut handles = Vec::new();

    let for_pushes = Arc::clone(&agent);
    handles.push(tokio::spawn(async move {
        drain(pushes, |artifact: Artifact| {
            for_pushes.submit_push(artifact);
            std::future::ready(())
        })
        .await;
    }));

    let for_actions = Arc::clone(&agent);
    handles.push(tokio::spawn(async move {
        drain(actions, |request: ServiceActionRequest| {
            for_actions.handle_service(request)
        })
        .await;
    }));

    let for_heartbeat = Arc::clone(&agent);
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timing::INVENTORY_INTERVAL);
        loop {
            ticker.tick().await;
            for_heartbeat.publish_inventory(Utc::now()).await;
        }
    }));

    match agent.deployer.apps().list().await {
        Ok(configs) => {
            for config in configs.into_iter().filter(|c| c.log_forwarding) {
                tracing::info!(app = %config.app_key(), "forwarding logs");
                let agent = Arc::clone(&agent);
                tokio::spawn(async move { agent.forward_logs(config).await });
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to read managed apps for log forwarding"),
    }

    Ok(handles)
}
