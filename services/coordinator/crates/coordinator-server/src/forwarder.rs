//! Relays application log lines to per-repository HTTP endpoints.

use std::collections::HashMap;
use std::time::Duration;

use edgeship_common::LogLine;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardTarget {
    pub api_key: String,
    pub endpoint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("invalid forwarder config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("no forwarder configured for {0}")]
    NoTarget(String),

    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered {status}")]
    Rejected { endpoint: String, status: u16 },
}

pub struct LogForwarder {
    client: reqwest::Client,
    targets: HashMap<String, ForwardTarget>,
}

impl LogForwarder {
    /// Parse a YAML map of repository name to `{apiKey, endpoint}`.
    pub fn from_yaml(yaml: &str) -> Result<Self, ForwarderError> {
        let targets: HashMap<String, ForwardTarget> = if yaml.trim().is_empty() {
            HashMap::new()
        } else {
            serde_yaml::from_str(yaml)?
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ForwarderError::Client)?;
        Ok(Self { client, targets })
    }

    pub fn target(&self, repo_name: &str) -> Option<&ForwardTarget> {
        self.targets.get(repo_name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// POST the line as JSON to the repository's endpoint.
    pub async fn forward(&self, line: &LogLine) -> Result<(), ForwarderError> {
        let target = self
            .target(&line.config.repo_name)
            .ok_or_else(|| ForwarderError::NoTarget(line.config.repo_name.clone()))?;

        let response = self
            .client
            .post(&target.endpoint)
            .header("api-key", &target.api_key)
            .json(line)
            .send()
            .await
            .map_err(|source| ForwarderError::Request {
                endpoint: target.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwarderError::Rejected {
                endpoint: target.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
