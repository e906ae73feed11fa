//! edgeship coordinator.
//!
//! Accepts build-available events over HTTP, fans them out on the bus,
//! records what agents report and reconciles it into per-host verdicts.

pub mod api;
pub mod config;
pub mod forwarder;
pub mod ingest;
pub mod reconcile;
pub mod store;
pub mod watchdog;
