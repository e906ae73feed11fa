//! Unit tests for the edgeship agent
//!
//! These tests use mocked ports over a temporary host root and run without
//! systemd, the network or a message broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod mocks;

mod daemon;
mod lifecycle;
mod self_update;
mod systemd;
mod updater;
