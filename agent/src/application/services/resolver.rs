//! Artifact URL resolution with backoff.
//!
//! A freshly pushed build may not be listed by the artifact API for a while,
//! so every lookup attempt is preceded by the next delay of the schedule.

use std::sync::Arc;
use std::time::Duration;

use edgeship_common::Artifact;

use crate::application::ports::ArtifactLookup;
use crate::domain::ResolveError;

/// Delay before each lookup attempt.
pub const BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(10),
    Duration::from_secs(15),
    Duration::from_secs(20),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

#[derive(Clone)]
pub struct Resolver {
    lookup: Arc<dyn ArtifactLookup>,
    schedule: Vec<Duration>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn ArtifactLookup>) -> Self {
        Self::with_schedule(lookup, BACKOFF_SCHEDULE.to_vec())
    }

    pub fn with_schedule(lookup: Arc<dyn ArtifactLookup>, schedule: Vec<Duration>) -> Self {
        Self { lookup, schedule }
    }

    /// Download URL of `artifact`, or of the newest build when `want_latest`.
    pub async fn resolve(&self, artifact: &Artifact, want_latest: bool) -> Result<String, ResolveError> {
        let mut last = String::from("no lookup attempted");

        for (attempt, delay) in self.schedule.iter().enumerate() {
            tokio::time::sleep(*delay).await;

            match self.lookup.find(artifact, want_latest).await {
                Ok(Some(url)) => {
                    tracing::info!(
                        app = %artifact.app_key(),
                        name = %artifact.name,
                        attempt = attempt + 1,
                        "resolved artifact download URL"
                    );
                    return Ok(url);
                }
                Ok(None) => {
                    last = if want_latest {
                        format!("no artifacts found for {}", artifact.repo_name)
                    } else {
                        format!("artifact {} not found for {}", artifact.name, artifact.repo_name)
                    };
                }
                Err(e) => last = format!("{e:#}"),
            }
            tracing::warn!(
                app = %artifact.app_key(),
                attempt = attempt + 1,
                error = %last,
                "artifact lookup failed"
            );
        }

        Err(ResolveError::Exhausted {
            attempts: self.schedule.len(),
            last,
        })
    }
}
