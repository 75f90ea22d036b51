//! Edge simulator for testing
//!
//! Records every shadow device the bridge creates, the resources it
//! registers and the values it writes. Tests drive the inbound direction
//! with [`SimulatedEdgeDevice::inject`].

use async_trait::async_trait;
use dashmap::DashMap;
use edgebridge_devices::{
    AdapterError, AdapterResult, EdgeClient, EdgeDevice, EdgeReply, EdgeResponder, InboundError,
    InboundRequest, Operation, OperationListener, ResourceSpec,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A shadow device on the simulated Edge
pub struct SimulatedEdgeDevice {
    alias: String,
    owner_tag: String,
    reject_registration: bool,
    fail_writes: AtomicBool,
    hang_writes: AtomicBool,
    resources: RwLock<Vec<ResourceSpec>>,
    values: RwLock<HashMap<String, Value>>,
    writes: Mutex<Vec<(String, Value)>>,
    listeners: RwLock<HashMap<Operation, OperationListener>>,
    update_capable: Mutex<Option<bool>>,
    registrations: AtomicUsize,
    deregistrations: AtomicUsize,
    hung_writes: AtomicUsize,
}

impl SimulatedEdgeDevice {
    fn new(alias: &str, owner_tag: &str, reject_registration: bool) -> Self {
        Self {
            alias: alias.to_string(),
            owner_tag: owner_tag.to_string(),
            reject_registration,
            fail_writes: AtomicBool::new(false),
            hang_writes: AtomicBool::new(false),
            resources: RwLock::new(Vec::new()),
            values: RwLock::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            listeners: RwLock::new(HashMap::new()),
            update_capable: Mutex::new(None),
            registrations: AtomicUsize::new(0),
            deregistrations: AtomicUsize::new(0),
            hung_writes: AtomicUsize::new(0),
        }
    }

    pub fn owner_tag(&self) -> &str {
        &self.owner_tag
    }

    /// Registered resource set
    pub fn resources(&self) -> Vec<ResourceSpec> {
        self.resources.read().clone()
    }

    pub fn resource(&self, path: &str) -> Option<ResourceSpec> {
        self.resources.read().iter().find(|r| r.path == path).cloned()
    }

    /// Current value of a resource (initial value until written)
    pub fn value(&self, path: &str) -> Option<Value> {
        self.values.read().get(path).cloned()
    }

    /// Every `set_value` call so far
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().clone()
    }

    /// Values written to one path, oldest first
    pub fn writes_to(&self, path: &str) -> Vec<Value> {
        self.writes
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Make `set_value` fail until turned off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `set_value` never complete until turned off again
    pub fn set_hang_writes(&self, hang: bool) {
        self.hang_writes.store(hang, Ordering::SeqCst);
    }

    /// Number of `set_value` calls currently stuck
    pub fn hung_writes(&self) -> usize {
        self.hung_writes.load(Ordering::SeqCst)
    }

    pub fn update_capable(&self) -> Option<bool> {
        *self.update_capable.lock()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn deregistrations(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registrations() > self.deregistrations()
    }

    /// The listener installed for an operation
    pub fn listener(&self, operation: Operation) -> Option<OperationListener> {
        self.listeners.read().get(&operation).cloned()
    }

    /// Deliver an inbound operation and wait for its reply
    pub async fn inject(&self, operation: Operation, path: &str, value: Value) -> EdgeReply {
        let Some(listener) = self.listener(operation) else {
            return Err(InboundError::NoHandler);
        };
        let (responder, reply) = EdgeResponder::channel();
        listener(InboundRequest::new(operation, path, value), responder);
        reply.await.unwrap_or(Err(InboundError::MappingFailed))
    }
}

#[async_trait]
impl EdgeDevice for SimulatedEdgeDevice {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn register(&self, resources: Vec<ResourceSpec>, update_capable: bool) -> AdapterResult<String> {
        if self.reject_registration {
            return Err(AdapterError::Rejected(format!("registration of {} refused", self.alias)));
        }
        {
            let mut values = self.values.write();
            values.clear();
            for resource in &resources {
                values.insert(resource.path.clone(), resource.value.clone());
            }
        }
        *self.resources.write() = resources;
        *self.update_capable.lock() = Some(update_capable);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(alias = %self.alias, "Simulated Edge registration");
        Ok(self.alias.clone())
    }

    async fn deregister(&self) -> AdapterResult<()> {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().clear();
        Ok(())
    }

    async fn set_value(&self, path: &str, value: Value) -> AdapterResult<()> {
        if self.hang_writes.load(Ordering::SeqCst) {
            tracing::debug!(alias = %self.alias, path, "Simulated Edge write hanging");
            self.hung_writes.fetch_add(1, Ordering::SeqCst);
            // also released when the caller drops the future
            let _stuck = scopeguard::guard(&self.hung_writes, |count| {
                count.fetch_sub(1, Ordering::SeqCst);
            });
            while self.hang_writes.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AdapterError::Communication("Edge unavailable".into()));
        }
        if !self.has_resource(path) {
            return Err(AdapterError::Rejected(format!("unknown resource {}", path)));
        }
        self.values.write().insert(path.to_string(), value.clone());
        self.writes.lock().push((path.to_string(), value));
        Ok(())
    }

    fn has_resource(&self, path: &str) -> bool {
        self.resources.read().iter().any(|r| r.path == path)
    }

    fn on(&self, operation: Operation, listener: OperationListener) {
        self.listeners.write().insert(operation, listener);
    }
}

/// Simulated Edge: a factory of [`SimulatedEdgeDevice`]s
#[derive(Default)]
pub struct SimulatedEdge {
    devices: DashMap<String, Arc<SimulatedEdgeDevice>>,
    created: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    reject_registrations: AtomicBool,
}

impl SimulatedEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse registrations of devices created from now on
    pub fn set_reject_registrations(&self, reject: bool) {
        self.reject_registrations.store(reject, Ordering::SeqCst);
    }

    /// Shadow device by alias
    pub fn device(&self, alias: &str) -> Option<Arc<SimulatedEdgeDevice>> {
        self.devices.get(alias).map(|d| d.value().clone())
    }

    /// Live shadow device aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.devices.iter().map(|d| d.key().clone()).collect();
        aliases.sort();
        aliases
    }

    /// Number of `create_device` calls
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Aliases passed to `delete_device`
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl EdgeClient for SimulatedEdge {
    async fn create_device(&self, alias: &str, owner_tag: &str) -> AdapterResult<Arc<dyn EdgeDevice>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let device = Arc::new(SimulatedEdgeDevice::new(
            alias,
            owner_tag,
            self.reject_registrations.load(Ordering::SeqCst),
        ));
        self.devices.insert(alias.to_string(), device.clone());
        Ok(device)
    }

    async fn delete_device(&self, alias: &str) -> AdapterResult<()> {
        self.deleted.lock().push(alias.to_string());
        self.devices
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| AdapterError::DeviceNotFound(alias.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(path: &str) -> ResourceSpec {
        ResourceSpec {
            path: path.to_string(),
            operations: vec![Operation::Get, Operation::Put],
            value: json!(0),
            value_type: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_write() {
        let edge = SimulatedEdge::new();
        let device = edge.create_device("gw-r-lamp", "owner").await.unwrap();
        let endpoint = device.register(vec![spec("/3311/0/5851")], false).await.unwrap();
        assert_eq!(endpoint, "gw-r-lamp");

        device.set_value("/3311/0/5851", json!(42)).await.unwrap();
        assert!(device.set_value("/9/9/9", json!(1)).await.is_err());

        let sim = edge.device("gw-r-lamp").unwrap();
        assert_eq!(sim.writes_to("/3311/0/5851"), vec![json!(42)]);
        assert_eq!(sim.update_capable(), Some(false));
        assert!(sim.is_registered());
    }

    #[tokio::test]
    async fn test_inject_without_listener() {
        let edge = SimulatedEdge::new();
        edge.create_device("a", "owner").await.unwrap();
        let sim = edge.device("a").unwrap();
        assert_eq!(
            sim.inject(Operation::Get, "/1/0/1", Value::Null).await,
            Err(InboundError::NoHandler)
        );
    }

    #[tokio::test]
    async fn test_rejected_registration() {
        let edge = SimulatedEdge::new();
        edge.set_reject_registrations(true);
        let device = edge.create_device("a", "owner").await.unwrap();
        assert!(device.register(vec![], false).await.is_err());
    }
}
