//! Device bus simulator for testing
//!
//! Holds a set of scripted devices, answers selector calls the way a live
//! bus does (including unreachable devices and device-reported errors) and
//! publishes state, event and lifecycle notifications on its event bus.

use async_trait::async_trait;
use edgebridge_core::{BridgeEvent, DiscoveredDevice, EventBus, SharedEventBus};
use edgebridge_devices::{
    AdapterError, AdapterResult, DeviceBus, DeviceResponse, SelectionResponse, StateSnapshot,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A simulated bus device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Device ID
    pub id: String,

    /// Device type
    #[serde(rename = "type")]
    pub device_type: String,

    /// Advertised capabilities
    pub interfaces: Vec<String>,

    /// Current state values
    pub states: HashMap<String, Value>,

    /// Whether the device answers selector calls
    pub reachable: bool,

    /// Error the device reports for every call
    pub error: Option<String>,

    /// Number of capability queries that fail before one succeeds
    #[serde(default)]
    pub interface_failures: usize,
}

impl SimulatedDevice {
    /// Create a reachable device with no capabilities
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            interfaces: Vec::new(),
            states: HashMap::new(),
            reachable: true,
            error: None,
            interface_failures: 0,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>, value: Value) -> Self {
        self.states.insert(state.into(), value);
        self
    }

    /// Make the device drop every selector call
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Make the device answer every call with an error
    pub fn failing_with(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Fail the first `n` capability queries
    pub fn with_interface_failures(mut self, n: usize) -> Self {
        self.interface_failures = n;
        self
    }

    fn response(&self, result: Value) -> DeviceResponse {
        if !self.reachable {
            return DeviceResponse::unreachable();
        }
        match &self.error {
            Some(error) => DeviceResponse::error(error.clone()),
            None => DeviceResponse::ok(result),
        }
    }
}

/// A selector call received by the simulator
#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    Get {
        device_id: String,
        state: Option<String>,
    },
    Set {
        device_id: String,
        state: String,
        value: Value,
    },
    Call {
        device_id: String,
        command: String,
        args: Vec<Value>,
    },
}

/// In-memory device bus
pub struct SimulatedBus {
    events: SharedEventBus,
    devices: RwLock<BTreeMap<String, SimulatedDevice>>,
    calls: Mutex<Vec<BusCall>>,
    interface_queries: AtomicUsize,
    echo_writes: AtomicBool,
    cache_available: AtomicBool,
}

impl SimulatedBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            events: Arc::new(EventBus::with_name("simulated-bus")),
            devices: RwLock::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            interface_queries: AtomicUsize::new(0),
            echo_writes: AtomicBool::new(false),
            cache_available: AtomicBool::new(true),
        }
    }

    /// Publish a state notification for every successful `set`, the way a
    /// real device reports its new state
    pub fn with_echo_writes(self) -> Self {
        self.echo_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Add a device without announcing it
    pub fn add_device(&self, device: SimulatedDevice) {
        self.devices.write().insert(device.id.clone(), device);
    }

    /// Add a device and announce it on the event bus
    pub fn discover(&self, device: SimulatedDevice) {
        let device_id = device.id.clone();
        let discovered = DiscoveredDevice::new(device.device_type.clone());
        tracing::debug!(device_id = %device_id, "Simulated device discovered");
        self.add_device(device);
        self.events.publish(BridgeEvent::DeviceDiscovered {
            device_id,
            device: discovered,
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    /// Remove a device and announce its removal
    pub fn unregister(&self, device_id: &str) {
        self.devices.write().remove(device_id);
        tracing::debug!(device_id, "Simulated device unregistered");
        self.events.publish(BridgeEvent::DeviceUnregistered {
            device_id: device_id.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    /// Change a state and publish the notification
    pub fn set_state(&self, device_id: &str, state: &str, value: Value) {
        self.set_state_silently(device_id, state, value.clone());
        self.events
            .publish(BridgeEvent::state_changed(device_id, state, value));
    }

    /// Change a state without a notification, as when one is lost
    pub fn set_state_silently(&self, device_id: &str, state: &str, value: Value) {
        if let Some(device) = self.devices.write().get_mut(device_id) {
            device.states.insert(state.to_string(), value);
        }
    }

    /// Publish an event notification
    pub fn fire_event(&self, device_id: &str, event: &str, value: Value) {
        self.events
            .publish(BridgeEvent::event_fired(device_id, event, value));
    }

    /// Announce a new Cloud API key
    pub fn rotate_cloud_key(&self, api_key: &str) {
        self.events.publish(BridgeEvent::CloudKeyRotated {
            api_key: api_key.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    pub fn set_reachable(&self, device_id: &str, reachable: bool) {
        if let Some(device) = self.devices.write().get_mut(device_id) {
            device.reachable = reachable;
        }
    }

    /// Make the state cache query fail
    pub fn set_cache_available(&self, available: bool) {
        self.cache_available.store(available, Ordering::SeqCst);
    }

    pub fn state(&self, device_id: &str, state: &str) -> Option<Value> {
        self.devices
            .read()
            .get(device_id)
            .and_then(|device| device.states.get(state).cloned())
    }

    /// Selector calls received so far
    pub fn calls(&self) -> Vec<BusCall> {
        self.calls.lock().clone()
    }

    /// Selector calls that write (`set` and `call`)
    pub fn writes(&self) -> Vec<BusCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| !matches!(call, BusCall::Get { .. }))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of capability queries received
    pub fn interface_queries(&self) -> usize {
        self.interface_queries.load(Ordering::SeqCst)
    }

    fn record(&self, call: BusCall) {
        self.calls.lock().push(call);
    }

    fn answer(&self, device_id: &str, result: impl FnOnce(&SimulatedDevice) -> Value) -> SelectionResponse {
        let devices = self.devices.read();
        let mut responses = HashMap::new();
        if let Some(device) = devices.get(device_id) {
            responses.insert(device_id.to_string(), device.response(result(device)));
        }
        responses
    }

    fn matches_selection(selection: &str, device_id: &str) -> bool {
        match selection.strip_prefix("id=") {
            Some("*") | None => true,
            Some(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => device_id.starts_with(prefix),
                None => device_id == pattern,
            },
        }
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBus for SimulatedBus {
    fn events(&self) -> SharedEventBus {
        self.events.clone()
    }

    async fn get(&self, device_id: &str, state: Option<&str>) -> AdapterResult<SelectionResponse> {
        self.record(BusCall::Get {
            device_id: device_id.to_string(),
            state: state.map(str::to_string),
        });
        Ok(self.answer(device_id, |device| match state {
            Some(state) => device.states.get(state).cloned().unwrap_or(Value::Null),
            None => Value::Object(
                device
                    .states
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>(),
            ),
        }))
    }

    async fn set(&self, device_id: &str, state: &str, value: Value) -> AdapterResult<SelectionResponse> {
        self.record(BusCall::Set {
            device_id: device_id.to_string(),
            state: state.to_string(),
            value: value.clone(),
        });
        let responses = self.answer(device_id, |_| Value::Null);
        let applied = responses
            .get(device_id)
            .is_some_and(|r| r.received_response && r.error.is_none());
        if applied {
            if self.echo_writes.load(Ordering::SeqCst) {
                self.set_state(device_id, state, value);
            } else {
                self.set_state_silently(device_id, state, value);
            }
        }
        Ok(responses)
    }

    async fn call(&self, device_id: &str, command: &str, args: Vec<Value>) -> AdapterResult<SelectionResponse> {
        self.record(BusCall::Call {
            device_id: device_id.to_string(),
            command: command.to_string(),
            args,
        });
        Ok(self.answer(device_id, |_| Value::Null))
    }

    async fn list_interfaces(&self, device_id: &str) -> AdapterResult<Vec<String>> {
        self.interface_queries.fetch_add(1, Ordering::SeqCst);
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| AdapterError::DeviceNotFound(device_id.to_string()))?;
        if device.interface_failures > 0 {
            device.interface_failures -= 1;
            return Err(AdapterError::Communication("interface query timed out".into()));
        }
        Ok(device.interfaces.clone())
    }

    async fn list_resources(&self, selection: &str) -> AdapterResult<HashMap<String, DiscoveredDevice>> {
        Ok(self
            .devices
            .read()
            .values()
            .filter(|device| Self::matches_selection(selection, &device.id))
            .map(|device| {
                let mut discovered = DiscoveredDevice::new(device.device_type.clone());
                discovered.reachable = device.reachable;
                (device.id.clone(), discovered)
            })
            .collect())
    }

    async fn state_cache(&self) -> AdapterResult<StateSnapshot> {
        if !self.cache_available.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection("state cache unavailable".into()));
        }
        Ok(self
            .devices
            .read()
            .values()
            .map(|device| (device.id.clone(), device.states.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lamp() -> SimulatedDevice {
        SimulatedDevice::new("lamp", "Core/Devices/Lamp")
            .with_interface("Facades/Switchable")
            .with_state("power", json!("off"))
    }

    #[tokio::test]
    async fn test_get_and_set() {
        let bus = SimulatedBus::new();
        bus.add_device(lamp());

        let r = bus.set("lamp", "power", json!("on")).await.unwrap();
        assert!(r["lamp"].received_response);
        assert_eq!(bus.state("lamp", "power"), Some(json!("on")));

        let r = bus.get("lamp", None).await.unwrap();
        assert_eq!(r["lamp"].result, json!({"power": "on"}));
        assert_eq!(bus.calls().len(), 2);
        assert_eq!(bus.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_device_does_not_apply_writes() {
        let bus = SimulatedBus::new();
        bus.add_device(lamp().unreachable());

        let r = bus.set("lamp", "power", json!("on")).await.unwrap();
        assert!(!r["lamp"].received_response);
        assert_eq!(bus.state("lamp", "power"), Some(json!("off")));
    }

    #[tokio::test]
    async fn test_interface_failures() {
        let bus = SimulatedBus::new();
        bus.add_device(lamp().with_interface_failures(2));

        assert!(bus.list_interfaces("lamp").await.is_err());
        assert!(bus.list_interfaces("lamp").await.is_err());
        assert_eq!(
            bus.list_interfaces("lamp").await.unwrap(),
            vec!["Facades/Switchable".to_string()]
        );
        assert_eq!(bus.interface_queries(), 3);
    }

    #[tokio::test]
    async fn test_list_resources_selection() {
        let bus = SimulatedBus::new();
        bus.add_device(lamp());
        bus.add_device(SimulatedDevice::new("sensor-1", "Core/Devices/Sensor"));

        assert_eq!(bus.list_resources("id=*").await.unwrap().len(), 2);
        assert_eq!(bus.list_resources("id=sensor*").await.unwrap().len(), 1);
        assert!(bus.list_resources("id=lamp").await.unwrap().contains_key("lamp"));
    }

    #[tokio::test]
    async fn test_notifications() {
        let bus = SimulatedBus::new();
        let mut rx = bus.events().subscribe();
        bus.discover(lamp());
        bus.set_state("lamp", "power", json!("on"));

        let (first, _) = rx.recv().await.unwrap();
        assert_eq!(first.type_name(), "DeviceDiscovered");
        let (second, _) = rx.recv().await.unwrap();
        assert_eq!(second.type_name(), "StateChanged");
    }
}
