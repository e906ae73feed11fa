//! Locally managed apps, persisted as one YAML map on the host.

use std::collections::BTreeMap;

use edgeship_common::AppKey;
use serde::{Deserialize, Serialize};

fn default_app_user() -> String {
    "pi".to_string()
}

/// How one app is installed on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedAppConfig {
    pub repo_name: String,
    pub manifest_name: String,
    #[serde(default = "default_app_user")]
    pub app_user: String,
    #[serde(default)]
    pub log_forwarding: bool,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// Binary name from the manifest, filled in after the first install.
    #[serde(default)]
    pub executable: String,
}

impl ManagedAppConfig {
    pub fn new(app: &AppKey) -> Self {
        Self {
            repo_name: app.repo_name.clone(),
            manifest_name: app.manifest_name.clone(),
            app_user: default_app_user(),
            log_forwarding: false,
            env_vars: BTreeMap::new(),
            executable: String::new(),
        }
    }

    #[must_use]
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.repo_name, &self.manifest_name)
    }
}

/// Key of an app in the local file: `repo_manifest` with `/` replaced by `_`.
pub fn registry_key(app: &AppKey) -> String {
    format!("{}_{}", app.repo_name, app.manifest_name).replace('/', "_")
}

/// Contents of the managed-app file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagedApps {
    apps: BTreeMap<String, ManagedAppConfig>,
}

impl ManagedApps {
    pub fn get(&self, app: &AppKey) -> Option<&ManagedAppConfig> {
        self.apps.get(&registry_key(app))
    }

    pub fn contains(&self, app: &AppKey) -> bool {
        self.get(app).is_some()
    }

    /// Insert or replace the entry for `config`'s app.
    pub fn upsert(&mut self, config: ManagedAppConfig) {
        self.apps.insert(registry_key(&config.app_key()), config);
    }

    pub fn remove(&mut self, app: &AppKey) -> Option<ManagedAppConfig> {
        self.apps.remove(&registry_key(app))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedAppConfig> {
        self.apps.values()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
