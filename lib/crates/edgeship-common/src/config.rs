use std::fmt;
use std::path::PathBuf;

/// Default Valkey URL used by both processes.
pub const DEFAULT_VALKEY_URL: &str = "redis://valkey:6379";

pub fn default_valkey_url() -> String {
    DEFAULT_VALKEY_URL.to_string()
}

/// Connection settings for the Valkey store and pub/sub bus.
///
/// `rediss://` URLs enable TLS with the platform roots; `ca_path` replaces
/// those roots with a single PEM bundle.
#[derive(Clone, Default)]
pub struct ValkeySettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ca_path: Option<PathBuf>,
}

impl ValkeySettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auth(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    #[must_use]
    pub fn with_ca(mut self, ca_path: Option<PathBuf>) -> Self {
        self.ca_path = ca_path;
        self
    }

    pub fn tls_requested(&self) -> bool {
        self.url.starts_with("rediss://") || self.ca_path.is_some()
    }
}

impl fmt::Debug for ValkeySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValkeySettings")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ca_path", &self.ca_path)
            .finish()
    }
}
