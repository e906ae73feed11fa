//! Domain layer: pure types and rules, no I/O.

pub mod apps;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod render;

pub use apps::{ManagedAppConfig, ManagedApps};
pub use error::{AgentError, InPhase, ManifestError, ResolveError, UpdateError, UpdatePhase};
pub use manifest::Manifest;
pub use paths::{AGENT_MANIFEST, AGENT_UNIT, AgentPaths};
