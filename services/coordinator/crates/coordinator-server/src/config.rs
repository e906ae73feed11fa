use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use edgeship_common::ValkeySettings;
use edgeship_common::config::default_valkey_url;
use serde::Deserialize;

/// Prefix shared by every coordinator environment variable.
pub const ENV_PREFIX: &str = "EDGESHIP_";

/// Coordinator configuration loaded from environment variables via `envy`.
///
/// Each field maps to `EDGESHIP_<FIELD>`:
///   - `EDGESHIP_LISTEN_ADDR`      (default `0.0.0.0:8080`)
///   - `EDGESHIP_VALKEY_URL`       (default `redis://valkey:6379`)
///   - `EDGESHIP_VALKEY_USER`      (optional ACL user)
///   - `EDGESHIP_VALKEY_PASS_FILE` (optional, path to the ACL password)
///   - `EDGESHIP_VALKEY_CA`        (optional, PEM CA bundle for TLS)
///   - `EDGESHIP_API_KEY`          (required, shared ingress key)
///   - `EDGESHIP_FORWARDER_CONFIG` (optional, YAML map repo -> {apiKey, endpoint})
///   - `EDGESHIP_TLS_CERT`         (optional, path to TLS cert)
///   - `EDGESHIP_TLS_KEY`          (optional, path to TLS key)
#[derive(Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_valkey_url")]
    pub valkey_url: String,

    pub valkey_user: Option<String>,

    pub valkey_pass_file: Option<PathBuf>,

    pub valkey_ca: Option<PathBuf>,

    pub api_key: String,

    pub forwarder_config: Option<String>,

    pub tls_cert: Option<String>,

    pub tls_key: Option<String>,
}

// The API key and the forwarder config (which holds per-repo API keys) are
// secrets.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("valkey_url", &self.valkey_url)
            .field("valkey_user", &self.valkey_user)
            .field("valkey_pass_file", &self.valkey_pass_file)
            .field("valkey_ca", &self.valkey_ca)
            .field("api_key", &"<redacted>")
            .field(
                "forwarder_config",
                &self.forwarder_config.as_ref().map(|_| "<redacted>"),
            )
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .finish()
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed(ENV_PREFIX).from_env().context(
            "failed to load config from EDGESHIP_* env vars (EDGESHIP_API_KEY is required)",
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
        if self.api_key.trim().is_empty() {
            bail!("EDGESHIP_API_KEY must not be empty");
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            bail!("EDGESHIP_TLS_CERT and EDGESHIP_TLS_KEY must be set together");
        }
        Ok(())
    }

    /// Valkey settings with the password read from `valkey_pass_file`.
    pub fn valkey_settings(&self) -> Result<ValkeySettings> {
        let password = match &self.valkey_pass_file {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read password from {}", path.display()))?
                    .trim()
                    .to_string(),
            ),
            None => None,
        };
        Ok(ValkeySettings::new(&self.valkey_url)
            .with_auth(self.valkey_user.clone(), password)
            .with_ca(self.valkey_ca.clone()))
    }
}
