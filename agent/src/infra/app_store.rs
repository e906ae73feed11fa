//! `AppStore` backed by the YAML managed-app file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use edgeship_common::AppKey;
use tokio::sync::Mutex;

use crate::application::ports::{AppStore, HostFs};
use crate::domain::{ManagedAppConfig, ManagedApps};

/// Every operation holds the lock for its whole read-modify-write.
pub struct YamlAppStore {
    path: PathBuf,
    fs: Arc<dyn HostFs>,
    lock: Mutex<()>,
}

impl YamlAppStore {
    pub fn new(path: PathBuf, fs: Arc<dyn HostFs>) -> Self {
        Self {
            path,
            fs,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<ManagedApps> {
        let Some(text) = self.fs.read_to_string(&self.path).await? else {
            return Ok(ManagedApps::default());
        };
        if text.trim().is_empty() {
            return Ok(ManagedApps::default());
        }
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    async fn store(&self, apps: &ManagedApps) -> Result<()> {
        let text = serde_yaml::to_string(apps).context("serializing managed apps")?;
        self.fs.write_file(&self.path, text.as_bytes(), 0o600).await
    }
}

#[async_trait]
impl AppStore for YamlAppStore {
    async fn list(&self) -> Result<Vec<ManagedAppConfig>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.iter().cloned().collect())
    }

    async fn get(&self, app: &AppKey) -> Result<Option<ManagedAppConfig>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.get(app).cloned())
    }

    async fn save(&self, config: ManagedAppConfig) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut apps = self.load().await?;
        apps.upsert(config);
        self.store(&apps).await
    }

    async fn remove(&self, app: &AppKey) -> Result<Option<ManagedAppConfig>> {
        let _guard = self.lock.lock().await;
        let mut apps = self.load().await?;
        let removed = apps.remove(app);
        if removed.is_some() {
            self.store(&apps).await?;
        }
        Ok(removed)
    }
}
