//! Application services: use-case orchestration.
//!
//! Each service module implements a single use-case by composing domain logic
//! with port trait calls. Services import only from `crate::domain` and
//! `crate::application::ports`, never from `crate::infra` or `crate::commands`.

pub mod daemon;
pub mod dispatch;
pub mod install;
pub mod resolver;
pub mod self_update;
pub mod uninstall;
pub mod updater;
