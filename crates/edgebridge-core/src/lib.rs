//! Core types for the edgebridge device-state bridge.
//!
//! This crate holds what every other edgebridge crate agrees on: the
//! bridge events that flow between the Bus adapter and the bridge, the
//! broadcast event bus that carries them, and the bridge configuration.

pub mod alias;
pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;

pub use alias::{AliasTemplate, MAX_ALIAS_LEN};
pub use config::{BridgeConfig, ChangeDetection};
pub use error::{Error, Result};
pub use event::{BridgeEvent, DiscoveredDevice, EventMetadata};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilteredReceiver, SharedEventBus,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::error::{Error, Result};
    pub use crate::event::{BridgeEvent, EventMetadata};
    pub use crate::eventbus::{EventBus, SharedEventBus};
}
