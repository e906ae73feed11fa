use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one managed application: a repository plus one of its manifests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppKey {
    pub repo_name: String,
    pub manifest_name: String,
}

impl AppKey {
    pub fn new(repo_name: impl Into<String>, manifest_name: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            manifest_name: manifest_name.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_name, self.manifest_name)
    }
}

/// A build of one application, announced on `repo/push`.
///
/// `archive_download_url` is never supplied by the publisher; agents resolve
/// it before downloading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        rename = "archiveDownloadURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub archive_download_url: Option<String>,
    #[serde(default)]
    pub manifest_name: String,
}

/// Validation failure for an incoming [`Artifact`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required artifact fields: {}", .0.join(", "))]
pub struct MissingFields(pub Vec<&'static str>);

impl Artifact {
    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.repo_name, &self.manifest_name)
    }

    /// Every required field must be non-empty. All missing fields are
    /// reported together.
    pub fn validate(&self) -> Result<(), MissingFields> {
        let missing: Vec<&'static str> = [
            ("repoName", &self.repo_name),
            ("name", &self.name),
            ("sha", &self.sha),
            ("manifestName", &self.manifest_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingFields(missing))
        }
    }
}

/// Outcome of the most recent install/update attempt on one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionStatus {
    #[default]
    Unknown,
    InProgress,
    Error,
    Success,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::InProgress => "IN_PROGRESS",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        };
        f.write_str(s)
    }
}

/// Last reported deployment outcome for one (app, host) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCondition {
    #[serde(default)]
    pub status: ConditionStatus,
    pub repo_name: String,
    pub manifest_name: String,
    pub host: String,
    #[serde(default)]
    pub error: String,
}

impl DeploymentCondition {
    pub fn new(app: &AppKey, host: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            status,
            repo_name: app.repo_name.clone(),
            manifest_name: app.manifest_name.clone(),
            host: host.into(),
            error: String::new(),
        }
    }

    pub fn in_progress(app: &AppKey, host: impl Into<String>) -> Self {
        Self::new(app, host, ConditionStatus::InProgress)
    }

    pub fn success(app: &AppKey, host: impl Into<String>) -> Self {
        Self::new(app, host, ConditionStatus::Success)
    }

    pub fn failed(app: &AppKey, host: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::new(app, host, ConditionStatus::Error)
        }
    }

    pub fn unknown(app: &AppKey, host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: reason.into(),
            ..Self::new(app, host, ConditionStatus::Unknown)
        }
    }

    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.repo_name, &self.manifest_name)
    }
}

/// Heartbeat: `host` is configured to run the app as of `timestamp`
/// (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInventoryRecord {
    pub repo_name: String,
    pub manifest_name: String,
    pub host: String,
    pub timestamp: i64,
    /// Ephemeral hosts publish transient records which the store expires.
    #[serde(default)]
    pub transient: bool,
}

impl AgentInventoryRecord {
    pub fn new(app: &AppKey, host: impl Into<String>, at: DateTime<Utc>, transient: bool) -> Self {
        Self {
            repo_name: app.repo_name.clone(),
            manifest_name: app.manifest_name.clone(),
            host: host.into(),
            timestamp: at.timestamp(),
            transient,
        }
    }

    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.repo_name, &self.manifest_name)
    }

    /// The heartbeat time, or `None` when the timestamp is out of range.
    #[must_use]
    pub fn heartbeat_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Imperative command for the OS service of one managed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    /// The matching `systemctl` verb.
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceActionRequest {
    pub repo_name: String,
    pub manifest_name: String,
    pub action: ServiceAction,
}

impl ServiceActionRequest {
    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.repo_name, &self.manifest_name)
    }
}

/// One forwarded line of application output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub message: String,
    pub host: String,
    pub config: AppKey,
}

/// Query body for `GET /deploy/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatusQuery {
    pub repo_name: String,
    pub manifest_name: String,
}

impl DeployStatusQuery {
    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.repo_name, &self.manifest_name)
    }
}

/// Per-host verdict for one app, keyed by host name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatus {
    pub successful_hosts: BTreeMap<String, DeploymentCondition>,
    pub unsuccessful_hosts: BTreeMap<String, DeploymentCondition>,
}
