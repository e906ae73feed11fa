//! Access layer over the shared state store.
//!
//! Conditions and inventory records are stored as JSON strings under the
//! key layout in `edgeship_common::keys`. Prefix reads use `SCAN` followed
//! by `MGET`; values that fail to decode are skipped with a warning.
//!
//! A SCAN glob can match keys of a different app whose repository and
//! manifest names share a prefix, so every prefix read keeps only keys whose
//! segments equal the requested app and records that name that same app.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use edgeship_common::keys::{
    self as layout, condition_key, conditions_pattern, inventory_key, inventory_pattern,
    scoped_host,
};
use edgeship_common::{AgentInventoryRecord, AppKey, DeploymentCondition};
use fred::prelude::*;
use fred::types::scan::Scanner;
use futures::stream::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

/// SCAN page size.
pub const SCAN_COUNT: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store request failed: {0}")]
    Backend(String),

    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<fred::error::Error> for StoreError {
    fn from(e: fred::error::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn write_condition(&self, condition: &DeploymentCondition) -> Result<(), StoreError>;

    async fn read_condition(
        &self,
        app: &AppKey,
        host: &str,
    ) -> Result<Option<DeploymentCondition>, StoreError>;

    /// Every stored condition of `app`, keyed by host.
    async fn read_conditions(
        &self,
        app: &AppKey,
    ) -> Result<BTreeMap<String, DeploymentCondition>, StoreError>;

    async fn delete_condition(&self, app: &AppKey, host: &str) -> Result<(), StoreError>;

    /// Remove every condition of `app`. Returns how many were removed.
    async fn delete_conditions(&self, app: &AppKey) -> Result<usize, StoreError>;

    async fn write_inventory(
        &self,
        record: &AgentInventoryRecord,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    async fn read_inventory_record(
        &self,
        app: &AppKey,
        host: &str,
    ) -> Result<Option<AgentInventoryRecord>, StoreError>;

    /// Every stored inventory record of `app`, keyed by host.
    async fn read_inventory(
        &self,
        app: &AppKey,
    ) -> Result<BTreeMap<String, AgentInventoryRecord>, StoreError>;

    async fn delete_inventory(&self, app: &AppKey, host: &str) -> Result<(), StoreError>;
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, json: &str) -> Option<T> {
    match serde_json::from_str::<T>(json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "skipping malformed stored value");
            None
        }
    }
}

/// Stored values that carry their own app and host.
trait Scoped {
    fn scope_app(&self) -> AppKey;
    fn scope_host(&self) -> &str;
}

impl Scoped for DeploymentCondition {
    fn scope_app(&self) -> AppKey {
        self.app_key()
    }

    fn scope_host(&self) -> &str {
        &self.host
    }
}

impl Scoped for AgentInventoryRecord {
    fn scope_app(&self) -> AppKey {
        self.app_key()
    }

    fn scope_host(&self) -> &str {
        &self.host
    }
}

fn decode_scoped<T: DeserializeOwned + Scoped>(
    key: &str,
    json: &str,
    prefix: &str,
    app: &AppKey,
) -> Option<(String, T)> {
    let host = scoped_host(key, prefix, app)?;
    let value: T = decode(key, json)?;
    if value.scope_app() != *app || value.scope_host() != host {
        tracing::warn!(key, "skipping record that names a different app or host");
        return None;
    }
    Some((host.to_string(), value))
}

// ===================================================================
// Valkey
// ===================================================================

#[derive(Clone)]
pub struct ValkeyStore {
    client: Client,
}

impl ValkeyStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Keys matching `pattern` that belong to `app` under `prefix`.
    async fn scan_keys(
        &self,
        pattern: &str,
        prefix: &str,
        app: &AppKey,
    ) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut stream = self.client.scan(pattern, Some(SCAN_COUNT), None);

        while let Some(mut page) = stream.try_next().await? {
            if let Some(results) = page.take_results() {
                for key in results {
                    let key = key.as_str_lossy().to_string();
                    if scoped_host(&key, prefix, app).is_some() {
                        keys.push(key);
                    }
                }
            }
        }

        Ok(keys)
    }

    async fn read_prefix<T: DeserializeOwned + Scoped>(
        &self,
        pattern: &str,
        prefix: &str,
        app: &AppKey,
    ) -> Result<BTreeMap<String, T>, StoreError> {
        let matched_keys = self.scan_keys(pattern, prefix, app).await?;
        if matched_keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let values: Vec<Value> = self.client.mget(matched_keys.clone()).await?;

        let mut results = BTreeMap::new();
        for (key, value) in matched_keys.iter().zip(values) {
            // Nil when the key expired between SCAN and MGET.
            if let Some(json) = value.as_str() {
                if let Some((host, decoded)) = decode_scoped(key, &json, prefix, app) {
                    results.insert(host, decoded);
                }
            }
        }
        Ok(results)
    }

    async fn read_one<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self.client.get(key).await?;
        Ok(raw.and_then(|json| decode(key, &json)))
    }
}

#[async_trait]
impl StateStore for ValkeyStore {
    async fn write_condition(&self, condition: &DeploymentCondition) -> Result<(), StoreError> {
        let key = condition_key(&condition.app_key(), &condition.host);
        let json = encode(&key, condition)?;
        self.client
            .set::<(), _, _>(&key, json, None, None, false)
            .await?;
        tracing::debug!(key = %key, status = %condition.status, "stored condition");
        Ok(())
    }

    async fn read_condition(
        &self,
        app: &AppKey,
        host: &str,
    ) -> Result<Option<DeploymentCondition>, StoreError> {
        self.read_one(&condition_key(app, host)).await
    }

    async fn read_conditions(
        &self,
        app: &AppKey,
    ) -> Result<BTreeMap<String, DeploymentCondition>, StoreError> {
        self.read_prefix(&conditions_pattern(app), layout::keys::CONDITION, app)
            .await
    }

    async fn delete_condition(&self, app: &AppKey, host: &str) -> Result<(), StoreError> {
        self.client.del::<(), _>(condition_key(app, host)).await?;
        Ok(())
    }

    async fn delete_conditions(&self, app: &AppKey) -> Result<usize, StoreError> {
        let matched_keys = self
            .scan_keys(&conditions_pattern(app), layout::keys::CONDITION, app)
            .await?;
        if matched_keys.is_empty() {
            return Ok(0);
        }
        let removed: i64 = self.client.del(matched_keys).await?;
        Ok(usize::try_from(removed).unwrap_or(0))
    }

    async fn write_inventory(
        &self,
        record: &AgentInventoryRecord,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let key = inventory_key(&record.app_key(), &record.host);
        let json = encode(&key, record)?;
        let expiration =
            ttl.map(|ttl| Expiration::EX(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)));
        self.client
            .set::<(), _, _>(&key, json, expiration, None, false)
            .await?;
        Ok(())
    }

    async fn read_inventory_record(
        &self,
        app: &AppKey,
        host: &str,
    ) -> Result<Option<AgentInventoryRecord>, StoreError> {
        self.read_one(&inventory_key(app, host)).await
    }

    async fn read_inventory(
        &self,
        app: &AppKey,
    ) -> Result<BTreeMap<String, AgentInventoryRecord>, StoreError> {
        self.read_prefix(&inventory_pattern(app), layout::keys::INVENTORY, app)
            .await
    }

    async fn delete_inventory(&self, app: &AppKey, host: &str) -> Result<(), StoreError> {
        self.client.del::<(), _>(inventory_key(app, host)).await?;
        Ok(())
    }
}

// ===================================================================
// In-memory
// ===================================================================

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Store with the same key layout and expiry rules, held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw string under `key`, bypassing encoding.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn put(&self, key: String, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().insert(key, Entry { value, expires_at });
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let raw = self
            .lock()
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone())?;
        decode(key, &raw)
    }

    /// Live `(key, value)` pairs stored under `prefix` for `app`.
    fn matching(&self, prefix: &str, app: &AppKey) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, e| e.live(now));
        entries
            .iter()
            .filter(|(k, _)| scoped_host(k, prefix, app).is_some())
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    fn read_prefix<T: DeserializeOwned + Scoped>(
        &self,
        prefix: &str,
        app: &AppKey,
    ) -> BTreeMap<String, T> {
        self.matching(prefix, app)
            .into_iter()
            .filter_map(|(key, json)| decode_scoped(&key, &json, prefix, app))
            .collect()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn write_condition(&self, condition: &DeploymentCondition) -> Result<(), StoreError> {
        let key = condition_key(&condition.app_key(), &condition.host);
        let json = encode(&key, condition)?;
        self.put(key, json, None);
        Ok(())
    }

    async fn read_condition(
        &self,
        app: &AppKey,
        host: &str,
    ) -> Result<Option<DeploymentCondition>, StoreError> {
        Ok(self.get(&condition_key(app, host)))
    }

    async fn read_conditions(
        &self,
        app: &AppKey,
    ) -> Result<BTreeMap<String, DeploymentCondition>, StoreError> {
        Ok(self.read_prefix(layout::keys::CONDITION, app))
    }

    async fn delete_condition(&self, app: &AppKey, host: &str) -> Result<(), StoreError> {
        self.lock().remove(&condition_key(app, host));
        Ok(())
    }

    async fn delete_conditions(&self, app: &AppKey) -> Result<usize, StoreError> {
        let keys: Vec<String> = self
            .matching(layout::keys::CONDITION, app)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        let mut entries = self.lock();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }

    async fn write_inventory(
        &self,
        record: &AgentInventoryRecord,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let key = inventory_key(&record.app_key(), &record.host);
        let json = encode(&key, record)?;
        self.put(key, json, ttl);
        Ok(())
    }

    async fn read_inventory_record(
        &self,
        app: &AppKey,
        host: &str,
    ) -> Result<Option<AgentInventoryRecord>, StoreError> {
        Ok(self.get(&inventory_key(app, host)))
    }

    async fn read_inventory(
        &self,
        app: &AppKey,
    ) -> Result<BTreeMap<String, AgentInventoryRecord>, StoreError> {
        Ok(self.read_prefix(layout::keys::INVENTORY, app))
    }

    async fn delete_inventory(&self, app: &AppKey, host: &str) -> Result<(), StoreError> {
        self.lock().remove(&inventory_key(app, host));
        Ok(())
    }
}
