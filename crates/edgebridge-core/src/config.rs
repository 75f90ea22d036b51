//! Bridge configuration.
//!
//! Loaded once at startup from TOML, then read-only for the bridge core.
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! relay_id = "WWRL000001"
//! white_list_only = false
//! ignore_devices_by_id = ["LegacyThermostat"]
//! reconcile_interval_secs = 30
//!
//! [change_detection]
//! mode = "numeric_tolerance"
//! epsilon = 0.001
//! ```

use crate::alias::{AliasTemplate, DEFAULT_ENDPOINT_TEMPLATE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder relay id shipped in the default configuration.
pub const DEFAULT_RELAY_ID: &str = "OVERRIDE_ME";

/// Devices that are never bridged unless `use_defaults` is turned off.
pub const DEFAULT_IGNORED_DEVICES: &[&str] = &[
    "DevStateManager",
    "Scheduler",
    "BacnetDriver",
    "WigWag/MobileUI",
    "WigWag/AppServer",
    "TILE-DEVICE",
    "VirtualDeviceDriver",
    "RUNNER",
    "RelayStats",
    "WigWag/DevicePairer",
    "SixlbrMonitor1",
];

/// Environment variable names.
pub mod env_vars {
    pub const RELAY_ID: &str = "EDGEBRIDGE_RELAY_ID";
    pub const CLOUD_API_KEY: &str = "EDGEBRIDGE_CLOUD_API_KEY";
    /// `true` switches log output to JSON.
    pub const LOG_JSON: &str = "EDGEBRIDGE_LOG_JSON";
}

/// How the reconciliation loop decides that a polled value differs from
/// the value last pushed to the Edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Deep structural equality.
    #[default]
    Structural,
    /// Numbers within `epsilon` of each other are equal; everything else
    /// compares structurally.
    NumericTolerance { epsilon: f64 },
}

impl ChangeDetection {
    /// Returns `true` when `polled` should be pushed over `last_pushed`.
    pub fn differs(&self, polled: &Value, last_pushed: &Value) -> bool {
        match self {
            Self::Structural => polled != last_pushed,
            Self::NumericTolerance { epsilon } => match (polled.as_f64(), last_pushed.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() > *epsilon,
                _ => polled != last_pushed,
            },
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Identity of the gateway this bridge runs on.
    pub relay_id: String,
    /// Alias template, see [`AliasTemplate`].
    pub endpoint_template: String,
    /// Bus selection used for the initial bulk scan.
    pub selection_for_discovery: String,
    /// Bridge only whitelisted devices.
    pub white_list_only: bool,
    pub white_list_by_id: Vec<String>,
    pub ignore_devices_by_id: Vec<String>,
    /// Union the built-in ignore list with `ignore_devices_by_id`.
    pub use_defaults: bool,
    /// Device type substring identifying shadow devices the Edge created.
    pub edge_device_type_marker: String,
    /// Owner tag passed when creating Edge devices.
    pub owner_tag: String,
    pub cloud_api_key: Option<String>,
    /// Extra capability mappings (JSON).
    pub mapping_rules: Option<PathBuf>,
    pub reconcile_interval_secs: u64,
    pub initial_push_delay_secs: u64,
    pub interface_retry_secs: u64,
    pub change_detection: ChangeDetection,
    /// Read back and re-push state after inbound writes, suppressing the
    /// outbound echo while the write is in flight.
    pub reflect_inbound_writes: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_id: DEFAULT_RELAY_ID.to_string(),
            endpoint_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
            selection_for_discovery: "id=*".to_string(),
            white_list_only: false,
            white_list_by_id: Vec::new(),
            ignore_devices_by_id: Vec::new(),
            use_defaults: true,
            edge_device_type_marker: "Mbed".to_string(),
            owner_tag: "mbed-devicejs-bridge".to_string(),
            cloud_api_key: None,
            mapping_rules: None,
            reconcile_interval_secs: 30,
            initial_push_delay_secs: 5,
            interface_retry_secs: 20,
            change_detection: ChangeDetection::Structural,
            reflect_inbound_writes: false,
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        tracing::info!(
            category = "config",
            path = %path.display(),
            relay_id = %config.relay_id,
            "Loaded bridge configuration"
        );
        if config.relay_id == DEFAULT_RELAY_ID {
            tracing::warn!(
                category = "config",
                "relay_id is still {}; aliases will not be unique across gateways",
                DEFAULT_RELAY_ID
            );
        }
        Ok(config)
    }

    /// Apply `EDGEBRIDGE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(relay_id) = std::env::var(env_vars::RELAY_ID) {
            if !relay_id.is_empty() {
                tracing::info!(category = "config", "relay_id overridden from environment");
                self.relay_id = relay_id;
            }
        }
        if let Ok(key) = std::env::var(env_vars::CLOUD_API_KEY) {
            if !key.is_empty() {
                self.cloud_api_key = Some(key);
            }
        }
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay_id.trim().is_empty() {
            return Err(Error::Validation("relay_id must not be empty".into()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(Error::Validation(
                "reconcile_interval_secs must be at least 1".into(),
            ));
        }
        if self.interface_retry_secs == 0 {
            return Err(Error::Validation(
                "interface_retry_secs must be at least 1".into(),
            ));
        }
        if let ChangeDetection::NumericTolerance { epsilon } = self.change_detection {
            if !(epsilon >= 0.0) {
                return Err(Error::Validation(format!(
                    "change_detection epsilon must be non-negative, got {}",
                    epsilon
                )));
            }
        }
        Ok(())
    }

    /// The alias template, falling back to the default when the configured
    /// one is invalid.
    pub fn alias_template(&self) -> AliasTemplate {
        match AliasTemplate::parse(self.endpoint_template.clone()) {
            Ok(template) => template,
            Err(e) => {
                tracing::error!(
                    category = "config",
                    error = %e,
                    "Invalid endpoint_template, using {}",
                    DEFAULT_ENDPOINT_TEMPLATE
                );
                AliasTemplate::default()
            }
        }
    }

    /// Effective ignore list.
    pub fn ignored_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self.ignore_devices_by_id.iter().cloned().collect();
        if self.use_defaults {
            ids.extend(DEFAULT_IGNORED_DEVICES.iter().map(|id| id.to_string()));
        }
        ids
    }

    /// Effective whitelist.
    pub fn whitelisted_ids(&self) -> HashSet<String> {
        self.white_list_by_id.iter().cloned().collect()
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn initial_push_delay(&self) -> Duration {
        Duration::from_secs(self.initial_push_delay_secs)
    }

    pub fn interface_retry_interval(&self) -> Duration {
        Duration::from_secs(self.interface_retry_secs)
    }
}
