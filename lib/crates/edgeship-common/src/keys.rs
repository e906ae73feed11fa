use std::time::Duration;

use crate::types::AppKey;

/// Pub/sub channel names
pub mod topics {
    /// Build-available events. Payload: Artifact
    pub const REPO_PUSH: &str = "repo/push";

    /// Deployment outcomes. Payload: DeploymentCondition
    pub const REPO_PUSH_STATUS: &str = "repo/push/status";

    /// Heartbeats. Payload: AgentInventoryRecord
    pub const AGENT_INVENTORY: &str = "agent/inventory";

    /// Imperative service commands. Payload: ServiceActionRequest
    pub const SERVICE: &str = "service";

    /// Forwarded application output. Payload: LogLine
    pub const LOGS: &str = "logs";
}

/// State-store key prefixes
pub mod keys {
    /// Last deployment outcome per host
    /// Format: repo/push/status/{repo}/{manifest}/{host}
    /// Value: JSON-serialized DeploymentCondition
    /// TTL: None (cleared on the next push for the app)
    pub const CONDITION: &str = "repo/push/status";

    /// Last heartbeat per host
    /// Format: agent/inventory/{repo}/{manifest}/{host}
    /// Value: JSON-serialized AgentInventoryRecord
    /// TTL: None, or TRANSIENT_INVENTORY for transient hosts
    pub const INVENTORY: &str = "agent/inventory";
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Agents publish inventory on this interval
    pub const INVENTORY_INTERVAL: Duration = Duration::from_secs(30);

    /// Silence longer than this marks a host as stale
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    /// Store expiry for transient inventory records
    pub const TRANSIENT_INVENTORY: Duration = Duration::from_secs(60);
}

pub fn condition_key(app: &AppKey, host: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        keys::CONDITION,
        app.repo_name,
        app.manifest_name,
        host
    )
}

/// SCAN pattern matching every condition of one app
pub fn conditions_pattern(app: &AppKey) -> String {
    format!(
        "{}/{}/{}/*",
        keys::CONDITION,
        app.repo_name,
        app.manifest_name
    )
}

pub fn inventory_key(app: &AppKey, host: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        keys::INVENTORY,
        app.repo_name,
        app.manifest_name,
        host
    )
}

/// SCAN pattern matching every inventory record of one app
pub fn inventory_pattern(app: &AppKey) -> String {
    format!(
        "{}/{}/{}/*",
        keys::INVENTORY,
        app.repo_name,
        app.manifest_name
    )
}

/// Host segment of `key` when the key is exactly `{prefix}/{repo}/{manifest}/{host}`
/// for `app`. Keys of other apps that a SCAN glob also matched yield `None`.
pub fn scoped_host<'k>(key: &'k str, prefix: &str, app: &AppKey) -> Option<&'k str> {
    let host = key
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_prefix(app.repo_name.as_str())?
        .strip_prefix('/')?
        .strip_prefix(app.manifest_name.as_str())?
        .strip_prefix('/')?;
    (!host.is_empty() && !host.contains('/')).then_some(host)
}

/// Returns the last path segment of a key, which is always the host.
pub fn host_from_key(key: &str) -> Option<&str> {
    key.rsplit_once('/')
        .map(|(_, host)| host)
        .filter(|host| !host.is_empty())
}

/// Validate a segment taken from untrusted input before it goes into a key.
///
/// Repository names are `owner/name` so they must contain exactly one `/`.
/// Manifest names and hosts may not contain any. Glob metacharacters are
/// rejected everywhere so a SCAN pattern built from the segment cannot
/// match other apps.
pub fn validate_key_segment(segment: &str, allow_slash: bool) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("key segment must not be empty");
    }
    if segment.len() > 200 {
        return Err("key segment must be at most 200 characters");
    }
    if segment
        .chars()
        .any(|c| matches!(c, '*' | '?' | '[' | ']' | '\\') || c.is_whitespace())
    {
        return Err("key segment must not contain glob characters or whitespace");
    }
    let slashes = segment.matches('/').count();
    if allow_slash {
        if slashes != 1 || segment.starts_with('/') || segment.ends_with('/') {
            return Err("repository name must be of the form owner/name");
        }
    } else if slashes > 0 {
        return Err("key segment must not contain '/'");
    }
    Ok(())
}

/// Validate both halves of an app identity.
pub fn validate_app_key(app: &AppKey) -> Result<(), &'static str> {
    validate_key_segment(&app.repo_name, true)?;
    validate_key_segment(&app.manifest_name, false)
}

/// True when the store should expire this inventory record.
pub fn inventory_ttl(transient: bool) -> Option<Duration> {
    transient.then_some(timing::TRANSIENT_INVENTORY)
}
