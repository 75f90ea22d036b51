//! Bridge event types.
//!
//! The Bus adapter translates device-bus notifications into these events
//! and publishes them on the [`EventBus`](crate::eventbus::EventBus). The
//! bridge service is the only consumer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Events that drive the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    // ========== Change Events ==========
    /// A device state changed on the Bus.
    StateChanged {
        device_id: String,
        state: String,
        value: Value,
        timestamp: i64,
    },

    /// A device fired an event on the Bus.
    EventFired {
        device_id: String,
        event: String,
        value: Value,
        timestamp: i64,
    },

    // ========== Lifecycle Events ==========
    /// A device appeared on the Bus.
    DeviceDiscovered {
        device_id: String,
        device: DiscoveredDevice,
        timestamp: i64,
    },

    /// A device was unregistered from the Bus.
    DeviceUnregistered { device_id: String, timestamp: i64 },

    // ========== Runtime Configuration ==========
    /// A new Cloud API key was issued.
    CloudKeyRotated {
        #[serde(skip_serializing)]
        api_key: String,
        timestamp: i64,
    },
}

impl BridgeEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "StateChanged",
            Self::EventFired { .. } => "EventFired",
            Self::DeviceDiscovered { .. } => "DeviceDiscovered",
            Self::DeviceUnregistered { .. } => "DeviceUnregistered",
            Self::CloudKeyRotated { .. } => "CloudKeyRotated",
        }
    }

    /// The Bus device this event concerns, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::StateChanged { device_id, .. }
            | Self::EventFired { device_id, .. }
            | Self::DeviceDiscovered { device_id, .. }
            | Self::DeviceUnregistered { device_id, .. } => Some(device_id),
            Self::CloudKeyRotated { .. } => None,
        }
    }

    /// Check if this is a state or event change.
    pub fn is_change_event(&self) -> bool {
        matches!(self, Self::StateChanged { .. } | Self::EventFired { .. })
    }

    /// Check if this is a discovery or unregister notification.
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceDiscovered { .. } | Self::DeviceUnregistered { .. }
        )
    }

    /// Build a state change stamped with the current time.
    pub fn state_changed(
        device_id: impl Into<String>,
        state: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::StateChanged {
            device_id: device_id.into(),
            state: state.into(),
            value,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Build an event notification stamped with the current time.
    pub fn event_fired(
        device_id: impl Into<String>,
        event: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::EventFired {
            device_id: device_id.into(),
            event: event.into(),
            value,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl fmt::Display for BridgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_id() {
            Some(id) => write!(f, "{}({})", self.type_name(), id),
            None => write!(f, "{}", self.type_name()),
        }
    }
}

/// Resource information the Bus reports for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Declared device type.
    #[serde(rename = "type", default)]
    pub device_type: String,
    /// Capabilities the device advertises, when already known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<String>>,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub reachable: bool,
}

impl DiscoveredDevice {
    /// A registered, reachable device of the given type.
    pub fn new(device_type: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            interfaces: None,
            registered: true,
            reachable: true,
        }
    }

    /// Attach the advertised capability list.
    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = Some(interfaces.into_iter().map(Into::into).collect());
        self
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Event source (component that published)
    pub source: String,
    /// Event timestamp
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}
