//! Device Session: one live bridged device.
//!
//! A session is created only after the Edge accepted the registration, so
//! the Edge identity is always present. The binding is immutable; the
//! mutable parts (Cloud id, last pushed values, echo guard count) are
//! behind their own small locks and only change through session methods.

use crate::adapter::EdgeDevice;
use crate::mapper::DeviceBinding;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Live state of a bridged device.
pub struct DeviceSession {
    binding: DeviceBinding,
    edge: Arc<dyn EdgeDevice>,
    edge_identity: String,
    cloud_id: RwLock<Option<String>>,
    last_known_edge_state: Mutex<HashMap<String, Value>>,
    inbound_in_flight: AtomicUsize,
}

impl DeviceSession {
    /// Build a session for a registered device. The last known Edge state
    /// starts as the values the resources were registered with.
    pub fn new(binding: DeviceBinding, edge: Arc<dyn EdgeDevice>, edge_identity: impl Into<String>) -> Self {
        let initial = binding.initial_states().clone();
        Self {
            binding,
            edge,
            edge_identity: edge_identity.into(),
            cloud_id: RwLock::new(None),
            last_known_edge_state: Mutex::new(initial),
            inbound_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn device_id(&self) -> &str {
        self.binding.device_id()
    }

    pub fn edge_alias(&self) -> &str {
        self.binding.edge_alias()
    }

    pub fn binding(&self) -> &DeviceBinding {
        &self.binding
    }

    pub fn edge(&self) -> &Arc<dyn EdgeDevice> {
        &self.edge
    }

    /// Endpoint name the Edge assigned at registration.
    pub fn edge_identity(&self) -> &str {
        &self.edge_identity
    }

    pub fn cloud_id(&self) -> Option<String> {
        self.cloud_id.read().clone()
    }

    pub fn set_cloud_id(&self, cloud_id: impl Into<String>) {
        *self.cloud_id.write() = Some(cloud_id.into());
    }

    /// Record a value successfully pushed to the Edge.
    pub fn record_pushed(&self, state: &str, value: Value) {
        self.last_known_edge_state
            .lock()
            .insert(state.to_string(), value);
    }

    pub fn last_known(&self, state: &str) -> Option<Value> {
        self.last_known_edge_state.lock().get(state).cloned()
    }

    /// Snapshot of every tracked state and its last pushed value.
    pub fn tracked_states(&self) -> Vec<(String, Value)> {
        self.last_known_edge_state
            .lock()
            .iter()
            .map(|(state, value)| (state.clone(), value.clone()))
            .collect()
    }

    /// Mark an inbound propagation as in flight. Pair with [`Self::end_inbound`].
    pub fn begin_inbound(&self) {
        self.inbound_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_inbound(&self) {
        let _ = self
            .inbound_in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Whether outbound triggers are currently suppressed as echoes.
    pub fn is_echo_suppressed(&self) -> bool {
        self.inbound_in_flight.load(Ordering::SeqCst) > 0
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id())
            .field("edge_alias", &self.edge_alias())
            .field("edge_identity", &self.edge_identity)
            .field("cloud_id", &self.cloud_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterResult, OperationListener};
    use crate::mapper::DeviceMapper;
    use crate::mapping_registry::MappingRegistry;
    use crate::protocol::{Operation, ResourceSpec};
    use async_trait::async_trait;
    use edgebridge_core::AliasTemplate;
    use serde_json::json;

    struct NullEdge;

    #[async_trait]
    impl EdgeDevice for NullEdge {
        fn alias(&self) -> &str {
            "null"
        }
        async fn register(&self, _: Vec<ResourceSpec>, _: bool) -> AdapterResult<String> {
            Ok("null".into())
        }
        async fn deregister(&self) -> AdapterResult<()> {
            Ok(())
        }
        async fn set_value(&self, _: &str, _: Value) -> AdapterResult<()> {
            Ok(())
        }
        fn has_resource(&self, _: &str) -> bool {
            true
        }
        fn on(&self, _: Operation, _: OperationListener) {}
    }

    fn session() -> DeviceSession {
        let mapper = DeviceMapper::new(Arc::new(MappingRegistry::builtin()), "relay", AliasTemplate::default());
        let binding = mapper
            .resolve("light-1", &["Facades/Dimmable".to_string()])
            .unwrap()
            .binding()
            .unwrap();
        DeviceSession::new(binding, Arc::new(NullEdge), "endpoint-1")
    }

    #[test]
    fn test_session_seeds_last_known_state() {
        let session = session();
        assert_eq!(session.last_known("brightness"), Some(json!(0)));
        session.record_pushed("brightness", json!(0.42));
        assert_eq!(session.last_known("brightness"), Some(json!(0.42)));
        assert_eq!(session.tracked_states().len(), 1);
        assert_eq!(session.edge_identity(), "endpoint-1");
    }

    #[test]
    fn test_echo_guard_nesting() {
        let session = session();
        assert!(!session.is_echo_suppressed());
        session.begin_inbound();
        session.begin_inbound();
        session.end_inbound();
        assert!(session.is_echo_suppressed());
        session.end_inbound();
        session.end_inbound();
        assert!(!session.is_echo_suppressed());
    }

    #[test]
    fn test_cloud_id() {
        let session = session();
        assert!(session.cloud_id().is_none());
        session.set_cloud_id("016d1f0b");
        assert_eq!(session.cloud_id().as_deref(), Some("016d1f0b"));
    }
}
