pub mod bus;
pub mod config;
pub mod keys;
pub mod memory;
pub mod types;
pub mod valkey;

pub use bus::{BusError, MessageBus, Subscription, publish_json};
pub use config::ValkeySettings;
pub use keys::{condition_key, inventory_key, keys as store_keys, timing, topics};
pub use memory::MemoryBus;
pub use types::*;
pub use valkey::ValkeyBus;
