//! Application service: finishing a self-update after the restart.
//!
//! The marker is read before the bus connection exists and acted on once it
//! does. A marker is consumed exactly once, whether or not the report made
//! it onto the bus.

use edgeship_common::{AppKey, Artifact, DeploymentCondition, MessageBus, publish_json, topics};

use crate::application::ports::HostFs;
use crate::domain::AgentPaths;

/// A self-update marker found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelfUpdate {
    /// Artifact that was being applied. `None` if the marker was unreadable.
    pub artifact: Option<Artifact>,
}

/// Check for a marker left by the previous process.
pub async fn take_pending(fs: &dyn HostFs, paths: &AgentPaths) -> Option<PendingSelfUpdate> {
    let marker = paths.self_update_marker();
    if !fs.exists(&marker).await {
        return None;
    }

    let artifact = match fs.read_to_string(&marker).await {
        Ok(Some(text)) => match serde_json::from_str::<Artifact>(&text) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::warn!(error = %e, "self-update marker is malformed");
                None
            }
        },
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read self-update marker");
            None
        }
    };
    Some(PendingSelfUpdate { artifact })
}

/// Report the finished self-update and remove the marker.
pub async fn resume(
    bus: &dyn MessageBus,
    fs: &dyn HostFs,
    paths: &AgentPaths,
    host: &str,
    self_app: &AppKey,
    pending: &PendingSelfUpdate,
) {
    let sha = pending
        .artifact
        .as_ref()
        .map_or("unknown", |a| a.sha.as_str());
    tracing::info!(sha, "self-update finished");

    let condition = DeploymentCondition::success(self_app, host);
    if let Err(e) = publish_json(bus, topics::REPO_PUSH_STATUS, &condition).await {
        tracing::error!(error = %e, "failed to report self-update");
    }

    if let Err(e) = fs.remove_file(&paths.self_update_marker()).await {
        tracing::error!(error = %e, "failed to remove self-update marker");
    }
}
