//! `ArtifactFetcher` that downloads a zip archive and unpacks it.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use crate::application::ports::ArtifactFetcher;

pub struct ZipFetcher {
    client: reqwest::Client,
    token: String,
}

impl ZipFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edgeship-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }
}

/// Unpack `data` into `dest`, keeping unix modes. Entries escaping `dest`
/// are skipped.
pub fn extract(data: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))
        .context("artifact is not a zip archive")?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("failed to read zip entry {i}"))?;
        let Some(outpath) = file.enclosed_name().map(|p| dest.join(p)) else {
            tracing::warn!(entry = file.name(), "skipping zip entry outside the archive root");
            continue;
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("failed to create {}", outpath.display()))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("failed to read zip entry {}", file.name()))?;
        std::fs::write(&outpath, &buffer)
            .with_context(|| format!("failed to write {}", outpath.display()))?;

        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set mode on {}", outpath.display()))?;
        }
    }
    Ok(())
}

#[async_trait]
impl ArtifactFetcher for ZipFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("failed to download {url}"))?;
        if !response.status().is_success() {
            bail!("download failed: HTTP {} from {url}", response.status());
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body from {url}"))?;

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract(&bytes, &dest))
            .await
            .context("spawn_blocking for extract")?
    }
}
