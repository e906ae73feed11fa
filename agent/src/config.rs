//! Agent configuration from `EDGESHIP_AGENT_*` environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use edgeship_common::ValkeySettings;
use serde::Deserialize;

use crate::infra::github::GITHUB_API;

/// Prefix shared by every agent environment variable.
pub const ENV_PREFIX: &str = "EDGESHIP_AGENT_";

/// Each field maps to `EDGESHIP_AGENT_<FIELD>`:
///   - `VALKEY_URL`          (required)
///   - `VALKEY_USER`         (optional ACL user)
///   - `VALKEY_PASSWORD`     (optional ACL password)
///   - `VALKEY_CA`           (optional, PEM CA bundle for TLS)
///   - `GITHUB_TOKEN`        (required, artifact API token)
///   - `GITHUB_API`          (default `https://api.github.com`)
///   - `HOST`                (default: the kernel hostname)
///   - `SELF_REPO`           (repository publishing the agent itself)
///   - `APP_UID`/`APP_GID`   (optional owner of installed files)
///   - `INVENTORY_TRANSIENT` (default `false`)
#[derive(Clone, Deserialize)]
pub struct AgentConfig {
    pub valkey_url: String,
    pub valkey_user: Option<String>,
    pub valkey_password: Option<String>,
    pub valkey_ca: Option<PathBuf>,
    pub github_token: String,
    #[serde(default = "default_github_api")]
    pub github_api: String,
    pub host: Option<String>,
    #[serde(default = "default_self_repo")]
    pub self_repo: String,
    pub app_uid: Option<u32>,
    pub app_gid: Option<u32>,
    #[serde(default)]
    pub inventory_transient: bool,
}

fn default_github_api() -> String {
    GITHUB_API.to_string()
}

fn default_self_repo() -> String {
    "edgeship/edgeship".to_string()
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("valkey_url", &self.valkey_url)
            .field("valkey_user", &self.valkey_user)
            .field("valkey_password", &self.valkey_password.as_ref().map(|_| "<redacted>"))
            .field("valkey_ca", &self.valkey_ca)
            .field("github_token", &"<redacted>")
            .field("github_api", &self.github_api)
            .field("host", &self.host)
            .field("self_repo", &self.self_repo)
            .field("app_uid", &self.app_uid)
            .field("app_gid", &self.app_gid)
            .field("inventory_transient", &self.inventory_transient)
            .finish()
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed(ENV_PREFIX).from_env().context(
            "failed to load config from EDGESHIP_AGENT_* env vars \
             (EDGESHIP_AGENT_VALKEY_URL and EDGESHIP_AGENT_GITHUB_TOKEN are required)",
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_iter<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.valkey_url.trim().is_empty() {
            bail!("EDGESHIP_AGENT_VALKEY_URL must not be empty");
        }
        if self.github_token.trim().is_empty() {
            bail!("EDGESHIP_AGENT_GITHUB_TOKEN must not be empty");
        }
        if self.app_uid.is_some() != self.app_gid.is_some() {
            bail!("EDGESHIP_AGENT_APP_UID and EDGESHIP_AGENT_APP_GID must be set together");
        }
        Ok(())
    }

    pub fn valkey_settings(&self) -> ValkeySettings {
        ValkeySettings::new(&self.valkey_url)
            .with_auth(self.valkey_user.clone(), self.valkey_password.clone())
            .with_ca(self.valkey_ca.clone())
    }

    /// Owner for installed files.
    pub fn owner(&self) -> Option<(u32, u32)> {
        self.app_uid.zip(self.app_gid)
    }

    /// Name this host reports under.
    pub fn hostname(&self) -> Result<String> {
        if let Some(host) = self.host.as_deref().filter(|h| !h.trim().is_empty()) {
            return Ok(host.trim().to_string());
        }
        let host = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .context("failed to read hostname; set EDGESHIP_AGENT_HOST")?;
        let host = host.trim();
        if host.is_empty() {
            bail!("hostname is empty; set EDGESHIP_AGENT_HOST");
        }
        Ok(host.to_string())
    }

    /// Variables for the agent unit's environment file.
    pub fn to_env_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        let mut put = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(format!("{ENV_PREFIX}{name}"), value);
            }
        };
        put("VALKEY_URL", Some(self.valkey_url.clone()));
        put("VALKEY_USER", self.valkey_user.clone());
        put("VALKEY_PASSWORD", self.valkey_password.clone());
        put(
            "VALKEY_CA",
            self.valkey_ca.as_ref().map(|p| p.display().to_string()),
        );
        put("GITHUB_TOKEN", Some(self.github_token.clone()));
        put("GITHUB_API", Some(self.github_api.clone()));
        put("HOST", self.host.clone());
        put("SELF_REPO", Some(self.self_repo.clone()));
        put("APP_UID", self.app_uid.map(|v| v.to_string()));
        put("APP_GID", self.app_gid.map(|v| v.to_string()));
        put(
            "INVENTORY_TRANSIENT",
            Some(self.inventory_transient.to_string()),
        );
        vars
    }
}
