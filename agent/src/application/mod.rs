//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain` and the shared payload types,
//! never on `crate::infra` or `crate::commands`.

pub mod ports;
pub mod services;

pub use ports::{
    AppStore, ArtifactFetcher, ArtifactLookup, CommandRunner, HostFs, LogSource, ServiceManager,
};
