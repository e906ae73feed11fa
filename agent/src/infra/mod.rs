//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, systemd
//! and journald, the artifact API, archive extraction and the host filesystem.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` are forbidden.

pub mod app_store;
pub mod command_runner;
pub mod download;
pub mod fs;
pub mod github;
pub mod journal;
pub mod systemd;
