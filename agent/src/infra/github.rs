//! `ArtifactLookup` backed by the GitHub Actions artifact API.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use edgeship_common::Artifact;
use serde::Deserialize;

use crate::application::ports::ArtifactLookup;

pub const GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct ArtifactList {
    #[serde(default)]
    artifacts: Vec<ListedArtifact>,
}

#[derive(Debug, Deserialize)]
struct ListedArtifact {
    name: String,
    archive_download_url: String,
}

pub struct GithubArtifacts {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl GithubArtifacts {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edgeship-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

/// Newest first, as the API lists them.
fn pick(list: ArtifactList, artifact: &Artifact, want_latest: bool) -> Option<String> {
    let mut artifacts = list.artifacts.into_iter();
    let found = if want_latest {
        artifacts.next()
    } else {
        artifacts.find(|a| a.name == artifact.name)
    };
    found.map(|a| a.archive_download_url)
}

#[async_trait]
impl ArtifactLookup for GithubArtifacts {
    async fn find(&self, artifact: &Artifact, want_latest: bool) -> Result<Option<String>> {
        let url = format!(
            "{}/repos/{}/actions/artifacts",
            self.api_base, artifact.repo_name
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("failed to query {url}"))?;

        if !response.status().is_success() {
            bail!("artifact query failed: HTTP {} from {url}", response.status());
        }

        let list: ArtifactList = response
            .json()
            .await
            .context("failed to parse artifact list")?;
        Ok(pick(list, artifact, want_latest))
    }
}
