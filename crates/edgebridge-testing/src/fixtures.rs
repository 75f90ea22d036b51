//! Shared fixtures: a bridge wired to simulated Bus, Edge and Cloud.

use crate::bus_simulator::{SimulatedBus, SimulatedDevice};
use crate::cloud_simulator::SimulatedCloud;
use crate::edge_simulator::{SimulatedEdge, SimulatedEdgeDevice};
use edgebridge_core::BridgeConfig;
use edgebridge_devices::{Bridge, BridgeServices, DeviceSession, MappingRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_RELAY_ID: &str = "relay-test";
pub const TEST_API_KEY: &str = "test-key";

/// How long [`eventually`] waits before failing a test.
pub const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for tests: timers far in the future so tests drive
/// initial pushes and reconciliation explicitly.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        relay_id: TEST_RELAY_ID.to_string(),
        cloud_api_key: Some(TEST_API_KEY.to_string()),
        reconcile_interval_secs: 3600,
        initial_push_delay_secs: 3600,
        interface_retry_secs: 1,
        ..BridgeConfig::default()
    }
}

/// Install a test-friendly tracing subscriber once.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds, panicking after [`EVENTUALLY_TIMEOUT`].
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A lamp with power and brightness.
pub fn dimmable_lamp(id: &str) -> SimulatedDevice {
    SimulatedDevice::new(id, "Core/Devices/Lamp")
        .with_interface("Facades/Switchable")
        .with_interface("Facades/Dimmable")
        .with_state("power", json!("on"))
        .with_state("brightness", json!(0.5))
}

/// A temperature sensor.
pub fn thermometer(id: &str) -> SimulatedDevice {
    SimulatedDevice::new(id, "Core/Devices/Thermometer")
        .with_interface("Facades/HasTemperature")
        .with_state("temperature", json!(21.5))
}

/// A bridge plus the simulators it talks to.
pub struct TestBridge {
    pub bus: Arc<SimulatedBus>,
    pub edge: Arc<SimulatedEdge>,
    pub cloud: Arc<SimulatedCloud>,
    pub bridge: Bridge,
}

impl TestBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_bus(config, SimulatedBus::new())
    }

    pub fn with_bus(config: BridgeConfig, bus: SimulatedBus) -> Self {
        init_test_tracing();
        let bus = Arc::new(bus);
        let edge = Arc::new(SimulatedEdge::new());
        let cloud = Arc::new(SimulatedCloud::new());
        let services = BridgeServices {
            bus: bus.clone(),
            edge: edge.clone(),
            cloud: Some(cloud.clone()),
        };
        let bridge = Bridge::new(config, MappingRegistry::builtin(), services);
        Self {
            bus,
            edge,
            cloud,
            bridge,
        }
    }

    pub async fn start(&self) {
        if let Err(e) = self.bridge.start().await {
            panic!("bridge failed to start: {}", e);
        }
    }

    /// Edge alias the bridge derives for a device id.
    pub fn alias(&self, device_id: &str) -> String {
        self.bridge.lifecycle().mapper().alias_for(device_id)
    }

    pub fn session(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.bridge.registry().get(device_id)
    }

    /// The Edge shadow of a bridged device.
    pub fn edge_device(&self, device_id: &str) -> Option<Arc<SimulatedEdgeDevice>> {
        self.edge.device(&self.alias(device_id))
    }

    /// Wait until a device is active in the registry.
    pub async fn wait_bridged(&self, device_id: &str) -> Arc<SimulatedEdgeDevice> {
        eventually(&format!("{} to be bridged", device_id), || {
            self.bridge.registry().contains(device_id)
        })
        .await;
        match self.edge_device(device_id) {
            Some(device) => device,
            None => panic!("{} is bridged but has no Edge device", device_id),
        }
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.bridge.stop();
    }
}
