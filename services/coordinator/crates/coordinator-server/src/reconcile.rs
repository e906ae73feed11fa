//! Joins heartbeats with deployment conditions into a per-host verdict.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use edgeship_common::timing::HEARTBEAT_TIMEOUT;
use edgeship_common::{
    AgentInventoryRecord, AppKey, ConditionStatus, DeployStatus, DeploymentCondition,
};

use crate::store::{StateStore, StoreError};

pub const NOT_REPORTING: &str = "agent not reporting a deployment condition";
pub const STALE_HEARTBEAT: &str = "agent heartbeat is stale";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no agents configured for this app")]
    NoAgentsConfigured,

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn is_stale(record: &AgentInventoryRecord, now: DateTime<Utc>) -> bool {
    let Some(last) = record.heartbeat_at() else {
        return true;
    };
    // A heartbeat from the future counts as fresh.
    (now - last)
        .to_std()
        .is_ok_and(|silence| silence > HEARTBEAT_TIMEOUT)
}

/// Classify every host that has an inventory record for `app`.
///
/// A host without a condition is not reporting, whatever its heartbeat. A
/// stale heartbeat wins over any condition that is stored, so a host is only
/// successful with a fresh heartbeat and a `SUCCESS` condition.
pub fn classify(
    app: &AppKey,
    inventory: &BTreeMap<String, AgentInventoryRecord>,
    conditions: &BTreeMap<String, DeploymentCondition>,
    now: DateTime<Utc>,
) -> Result<DeployStatus, ReconcileError> {
    if inventory.is_empty() {
        return Err(ReconcileError::NoAgentsConfigured);
    }

    let mut status = DeployStatus::default();
    for (host, record) in inventory {
        let Some(condition) = conditions.get(host) else {
            status.unsuccessful_hosts.insert(
                host.clone(),
                DeploymentCondition::unknown(app, host, NOT_REPORTING),
            );
            continue;
        };

        if is_stale(record, now) {
            status.unsuccessful_hosts.insert(
                host.clone(),
                DeploymentCondition::unknown(app, host, STALE_HEARTBEAT),
            );
            continue;
        }

        let bucket = if condition.status == ConditionStatus::Success {
            &mut status.successful_hosts
        } else {
            &mut status.unsuccessful_hosts
        };
        bucket.insert(host.clone(), condition.clone());
    }
    Ok(status)
}

pub async fn get_deploy_status(
    store: &dyn StateStore,
    app: &AppKey,
    now: DateTime<Utc>,
) -> Result<DeployStatus, ReconcileError> {
    let inventory = store.read_inventory(app).await?;
    let conditions = store.read_conditions(app).await?;
    let status = classify(app, &inventory, &conditions, now)?;
    tracing::debug!(
        app = %app,
        successful = status.successful_hosts.len(),
        unsuccessful = status.unsuccessful_hosts.len(),
        "reconciled deploy status"
    );
    Ok(status)
}
