//! Device Mapper: capability set → per-device binding.
//!
//! Resolution merges every known capability's entries into one
//! [`DeviceBinding`]. Collisions on the same `(operation, path)` or on the
//! same state/event sender are resolved last-wins in capability order, with
//! a warning. Malformed entries are reported as [`MappingError::Configuration`]
//! and skipped without affecting the rest of the device.

use crate::mapping_registry::MappingRegistry;
use crate::protocol::{
    AddressEntry, BusAction, CapabilityMapping, Handler, Operation, ResourceSpec, Sender,
    TransformError, ValueType,
};
use edgebridge_core::{AliasTemplate, BridgeConfig};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Binding resolution errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("Device id must not be empty")]
    EmptyDeviceId,

    /// A malformed mapping entry. Reported and skipped, never returned from
    /// [`DeviceMapper::resolve`].
    #[error("Configuration error in {capability} at {path}: {reason}")]
    Configuration {
        capability: String,
        path: String,
        reason: String,
    },
}

impl MappingError {
    fn configuration(mapping: &CapabilityMapping, entry: &AddressEntry, reason: String) -> Self {
        Self::Configuration {
            capability: mapping.capability.clone(),
            path: entry.path.clone(),
            reason,
        }
    }
}

/// A handler bound to one `(operation, path)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundHandler {
    pub capability: String,
    pub state: Option<String>,
    pub handler: Handler,
}

impl BoundHandler {
    pub fn prepare(&self, value: &Value) -> Result<BusAction, TransformError> {
        self.handler.prepare(self.state.as_deref(), value)
    }
}

/// A sender bound to one Bus state or event name.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSender {
    pub capability: String,
    pub path: String,
    pub sender: Sender,
    pub value_type: Option<ValueType>,
}

impl BoundSender {
    /// Transform a Bus value into the Edge value for [`Self::path`].
    pub fn transform(&self, value: &Value) -> Option<Value> {
        let out = self.sender.apply(value)?;
        Some(match self.value_type {
            Some(value_type) => value_type.coerce(out),
            None => out,
        })
    }
}

/// Resolved, immutable bridging table for one device.
#[derive(Debug, Clone)]
pub struct DeviceBinding {
    device_id: String,
    edge_alias: String,
    capabilities: Vec<String>,
    operations: HashMap<(Operation, String), BoundHandler>,
    state_senders: HashMap<String, BoundSender>,
    event_senders: HashMap<String, BoundSender>,
    initial_push: Vec<String>,
    initial_states: HashMap<String, Value>,
    reflectors: HashMap<String, String>,
    resources: Vec<ResourceSpec>,
    issues: Vec<MappingError>,
}

impl DeviceBinding {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn edge_alias(&self) -> &str {
        &self.edge_alias
    }

    /// Capabilities that contributed at least one resource.
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn handler(&self, operation: Operation, path: &str) -> Option<&BoundHandler> {
        self.operations.get(&(operation, path.to_string()))
    }

    pub fn state_sender(&self, state: &str) -> Option<&BoundSender> {
        self.state_senders.get(state)
    }

    pub fn event_sender(&self, event: &str) -> Option<&BoundSender> {
        self.event_senders.get(event)
    }

    /// States whose current Bus value is pushed after registration.
    pub fn initial_push(&self) -> &[String] {
        &self.initial_push
    }

    /// Registered value of every state with an outbound sender.
    pub fn initial_states(&self) -> &HashMap<String, Value> {
        &self.initial_states
    }

    /// State written through a writable path, for read-back after inbound writes.
    pub fn reflected_state(&self, path: &str) -> Option<&str> {
        self.reflectors.get(path).map(String::as_str)
    }

    /// Every resource handed to the Edge at registration.
    pub fn resources(&self) -> &[ResourceSpec] {
        &self.resources
    }

    /// Distinct paths that accept at least one inbound operation.
    pub fn operation_paths(&self) -> BTreeSet<&str> {
        self.operations.keys().map(|(_, path)| path.as_str()).collect()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Configuration errors found while resolving.
    pub fn issues(&self) -> &[MappingError] {
        &self.issues
    }
}

/// Outcome of resolving a device.
#[derive(Debug, Clone)]
pub enum Resolution {
    Bound(DeviceBinding),
    /// No capability contributed a resource; the device is not registered.
    NothingToBridge,
}

impl Resolution {
    pub fn binding(self) -> Option<DeviceBinding> {
        match self {
            Resolution::Bound(binding) => Some(binding),
            Resolution::NothingToBridge => None,
        }
    }
}

/// Builds device bindings from the mapping registry.
#[derive(Debug, Clone)]
pub struct DeviceMapper {
    registry: Arc<MappingRegistry>,
    relay_id: String,
    template: AliasTemplate,
}

impl DeviceMapper {
    pub fn new(registry: Arc<MappingRegistry>, relay_id: impl Into<String>, template: AliasTemplate) -> Self {
        Self {
            registry,
            relay_id: relay_id.into(),
            template,
        }
    }

    pub fn from_config(registry: Arc<MappingRegistry>, config: &BridgeConfig) -> Self {
        Self::new(registry, config.relay_id.clone(), config.alias_template())
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    /// Edge alias for a device.
    pub fn alias_for(&self, device_id: &str) -> String {
        self.template.render(&self.relay_id, device_id)
    }

    /// Resolve a device's capabilities into a binding.
    pub fn resolve(&self, device_id: &str, capabilities: &[String]) -> Result<Resolution, MappingError> {
        if device_id.is_empty() {
            return Err(MappingError::EmptyDeviceId);
        }

        let mut builder = BindingBuilder::new(device_id);
        for capability in capabilities {
            if builder.capabilities.contains(capability) {
                continue;
            }
            match self.registry.lookup(capability) {
                Some(mapping) if mapping.path_count() > 0 => builder.merge(&mapping),
                Some(_) => {}
                None => tracing::trace!(device_id, capability = %capability, "No mapping for capability"),
            }
        }

        if builder.resources.is_empty() {
            tracing::debug!(device_id, "No mapped paths; nothing to bridge");
            return Ok(Resolution::NothingToBridge);
        }

        for issue in &builder.issues {
            tracing::error!(device_id, error = %issue, "Skipping malformed mapping entry");
        }

        Ok(Resolution::Bound(builder.finish(self.alias_for(device_id))))
    }
}

struct BindingBuilder {
    device_id: String,
    capabilities: Vec<String>,
    operations: HashMap<(Operation, String), BoundHandler>,
    state_senders: HashMap<String, BoundSender>,
    event_senders: HashMap<String, BoundSender>,
    initial_push: Vec<String>,
    initial_states: HashMap<String, Value>,
    reflectors: HashMap<String, String>,
    resources: Vec<ResourceSpec>,
    resource_index: HashMap<String, usize>,
    issues: Vec<MappingError>,
}

impl BindingBuilder {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            capabilities: Vec::new(),
            operations: HashMap::new(),
            state_senders: HashMap::new(),
            event_senders: HashMap::new(),
            initial_push: Vec::new(),
            initial_states: HashMap::new(),
            reflectors: HashMap::new(),
            resources: Vec::new(),
            resource_index: HashMap::new(),
            issues: Vec::new(),
        }
    }

    fn merge(&mut self, mapping: &CapabilityMapping) {
        self.capabilities.push(mapping.capability.clone());

        for entry in &mapping.entries {
            self.add_resource(mapping, entry);
            self.bind_operations(mapping, entry);
            self.bind_senders(mapping, entry);
        }
        for entry in &mapping.static_entries {
            self.add_resource(mapping, entry);
        }
    }

    fn add_resource(&mut self, mapping: &CapabilityMapping, entry: &AddressEntry) {
        let (_, invalid) = entry.parsed_operations();
        for raw in invalid {
            self.issues.push(MappingError::configuration(
                mapping,
                entry,
                format!("invalid operation '{}'", raw),
            ));
        }

        let spec = ResourceSpec::from_entry(entry);
        match self.resource_index.get(&entry.path) {
            Some(&index) => {
                tracing::warn!(
                    device_id = %self.device_id,
                    path = %entry.path,
                    capability = %mapping.capability,
                    "Resource path claimed twice; later capability wins"
                );
                // bindings of the replaced resource must not outlive it
                self.operations.retain(|(_, path), _| path != &entry.path);
                self.reflectors.remove(&entry.path);
                self.resources[index] = spec;
            }
            None => {
                self.resource_index.insert(entry.path.clone(), self.resources.len());
                self.resources.push(spec);
            }
        }
    }

    fn bind_operations(&mut self, mapping: &CapabilityMapping, entry: &AddressEntry) {
        let (operations, invalid) = entry.parsed_operations();
        if !invalid.is_empty() {
            return;
        }

        let mut bound = Vec::new();
        for op in operations {
            let Some(name) = entry.handler_for(op) else {
                if op != Operation::Get {
                    self.issues.push(MappingError::configuration(
                        mapping,
                        entry,
                        format!("{} listed without a handler", op),
                    ));
                    return;
                }
                continue;
            };
            let Some(handler) = mapping.handlers.get(name) else {
                self.issues.push(MappingError::configuration(
                    mapping,
                    entry,
                    format!("unknown {} handler '{}'", op, name),
                ));
                return;
            };
            if handler.needs_state() && mapping.state.is_none() {
                self.issues.push(MappingError::configuration(
                    mapping,
                    entry,
                    format!("{} handler '{}' needs a state", op, name),
                ));
                return;
            }
            bound.push((
                op,
                BoundHandler {
                    capability: mapping.capability.clone(),
                    state: mapping.state.clone(),
                    handler: handler.clone(),
                },
            ));
        }

        for (op, handler) in bound {
            if let Some(previous) = self.operations.insert((op, entry.path.clone()), handler) {
                tracing::warn!(
                    device_id = %self.device_id,
                    operation = %op,
                    path = %entry.path,
                    replaced = %previous.capability,
                    capability = %mapping.capability,
                    "Operation handler collision; later capability wins"
                );
            }
        }
    }

    fn bind_senders(&mut self, mapping: &CapabilityMapping, entry: &AddressEntry) {
        if let Some(name) = &entry.state_sender {
            match (&mapping.state, mapping.senders.get(name)) {
                (Some(state), Some(sender)) => {
                    let bound = self.bound_sender(mapping, entry, sender);
                    if let Some(previous) = self.state_senders.insert(state.clone(), bound) {
                        tracing::warn!(
                            device_id = %self.device_id,
                            state = %state,
                            replaced = %previous.path,
                            path = %entry.path,
                            "State sender collision; later entry wins"
                        );
                    }
                    self.initial_states.insert(state.clone(), entry.value.clone());
                    if entry.init_send && !self.initial_push.contains(state) {
                        self.initial_push.push(state.clone());
                    }
                    let (operations, _) = entry.parsed_operations();
                    if operations.iter().any(|op| *op != Operation::Get) {
                        self.reflectors.insert(entry.path.clone(), state.clone());
                    }
                }
                (None, _) => self.issues.push(MappingError::configuration(
                    mapping,
                    entry,
                    "state sender on a capability without a state".to_string(),
                )),
                (_, None) => self.issues.push(MappingError::configuration(
                    mapping,
                    entry,
                    format!("unknown sender '{}'", name),
                )),
            }
        }

        if let Some(name) = &entry.event_sender {
            match (&mapping.event, mapping.senders.get(name)) {
                (Some(event), Some(sender)) => {
                    let bound = self.bound_sender(mapping, entry, sender);
                    if self.event_senders.insert(event.clone(), bound).is_some() {
                        tracing::warn!(
                            device_id = %self.device_id,
                            event = %event,
                            path = %entry.path,
                            "Event sender collision; later entry wins"
                        );
                    }
                }
                (None, _) => self.issues.push(MappingError::configuration(
                    mapping,
                    entry,
                    "event sender on a capability without an event".to_string(),
                )),
                (_, None) => self.issues.push(MappingError::configuration(
                    mapping,
                    entry,
                    format!("unknown sender '{}'", name),
                )),
            }
        }
    }

    fn bound_sender(&self, mapping: &CapabilityMapping, entry: &AddressEntry, sender: &Sender) -> BoundSender {
        BoundSender {
            capability: mapping.capability.clone(),
            path: entry.path.clone(),
            sender: sender.clone(),
            value_type: entry.value_type,
        }
    }

    fn finish(self, edge_alias: String) -> DeviceBinding {
        DeviceBinding {
            device_id: self.device_id,
            edge_alias,
            capabilities: self.capabilities,
            operations: self.operations,
            state_senders: self.state_senders,
            event_senders: self.event_senders,
            initial_push: self.initial_push,
            initial_states: self.initial_states,
            reflectors: self.reflectors,
            resources: self.resources,
            issues: self.issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operation::{Get, Post, Put};
    use serde_json::json;

    fn mapper(mappings: Vec<CapabilityMapping>) -> DeviceMapper {
        DeviceMapper::new(
            Arc::new(MappingRegistry::from_mappings(mappings)),
            "WWRL000001",
            AliasTemplate::default(),
        )
    }

    fn simple(capability: &str, state: &str, path: &str) -> CapabilityMapping {
        CapabilityMapping::new(capability)
            .with_state(state)
            .with_handler("get", Handler::GetState)
            .with_handler("put", Handler::SetState)
            .with_sender("send", Sender::Identity)
            .with_entry(
                AddressEntry::new(path)
                    .with_operations(&[Get, Put])
                    .with_get_handler("get")
                    .with_put_handler("put")
                    .with_state_sender("send"),
            )
    }

    fn caps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_binding_completeness() {
        let mapper = mapper(vec![simple("A", "a", "/p1"), simple("B", "b", "/p2")]);
        let binding = mapper
            .resolve("dev-1", &caps(&["A", "B", "Unmapped"]))
            .unwrap()
            .binding()
            .unwrap();

        assert_eq!(binding.operation_paths().into_iter().collect::<Vec<_>>(), vec!["/p1", "/p2"]);
        assert_eq!(binding.handler(Put, "/p1").unwrap().state.as_deref(), Some("a"));
        assert_eq!(binding.handler(Put, "/p2").unwrap().state.as_deref(), Some("b"));
        assert!(binding.handler(Post, "/p1").is_none());
        assert_eq!(binding.state_sender("a").unwrap().path, "/p1");
        assert_eq!(binding.state_sender("b").unwrap().path, "/p2");
        assert_eq!(binding.capabilities(), &["A".to_string(), "B".to_string()]);
        assert_eq!(binding.edge_alias(), "gw-WWRL000001-dev-1");
    }

    #[test]
    fn test_nothing_to_bridge() {
        let mapper = mapper(vec![simple("A", "a", "/p1"), CapabilityMapping::new("Empty")]);
        let resolution = mapper.resolve("dev-1", &caps(&["Empty", "Other"])).unwrap();
        assert!(matches!(resolution, Resolution::NothingToBridge));
    }

    #[test]
    fn test_empty_device_id() {
        let mapper = mapper(vec![]);
        assert_eq!(mapper.resolve("", &[]).unwrap_err(), MappingError::EmptyDeviceId);
    }

    #[test]
    fn test_collision_last_wins() {
        let mapper = mapper(vec![simple("A", "a", "/shared"), simple("B", "b", "/shared")]);
        let binding = mapper
            .resolve("dev-1", &caps(&["A", "B"]))
            .unwrap()
            .binding()
            .unwrap();
        assert_eq!(binding.handler(Put, "/shared").unwrap().capability, "B");
        assert_eq!(binding.resources().len(), 1);
    }

    #[test]
    fn test_replaced_resource_drops_stale_operations() {
        let read_only = CapabilityMapping::new("B")
            .with_state("b")
            .with_handler("get", Handler::GetState)
            .with_entry(
                AddressEntry::new("/shared")
                    .with_operations(&[Get])
                    .with_get_handler("get"),
            );
        let mapper = mapper(vec![simple("A", "a", "/shared"), read_only]);
        let binding = mapper
            .resolve("dev-1", &caps(&["A", "B"]))
            .unwrap()
            .binding()
            .unwrap();

        assert_eq!(binding.resources().len(), 1);
        assert_eq!(binding.handler(Get, "/shared").unwrap().capability, "B");
        assert!(binding.handler(Put, "/shared").is_none());
        assert_eq!(binding.operation_count(), 1);
        assert_eq!(binding.reflected_state("/shared"), None);
    }

    #[test]
    fn test_put_without_handler_is_skipped() {
        let broken = CapabilityMapping::new("Broken")
            .with_state("x")
            .with_handler("get", Handler::GetState)
            .with_entry(
                AddressEntry::new("/broken")
                    .with_operations(&[Get, Put])
                    .with_get_handler("get"),
            );
        let mapper = mapper(vec![broken, simple("A", "a", "/p1")]);
        let binding = mapper
            .resolve("dev-1", &caps(&["Broken", "A"]))
            .unwrap()
            .binding()
            .unwrap();

        assert!(binding.handler(Get, "/broken").is_none());
        assert!(binding.handler(Put, "/p1").is_some());
        assert_eq!(binding.resources().len(), 2);
        assert_eq!(binding.issues().len(), 1);
    }

    #[test]
    fn test_unknown_handler_and_operation_reported() {
        let mut bad_op = AddressEntry::new("/bad-op").with_get_handler("get");
        bad_op.operations = vec!["GET".into(), "FETCH".into()];
        let mapping = CapabilityMapping::new("Odd")
            .with_state("odd")
            .with_handler("get", Handler::GetState)
            .with_entry(bad_op)
            .with_entry(
                AddressEntry::new("/typo")
                    .with_operations(&[Put])
                    .with_put_handler("sett"),
            );
        let binding = mapper(vec![mapping])
            .resolve("dev-1", &caps(&["Odd"]))
            .unwrap()
            .binding()
            .unwrap();

        assert_eq!(binding.operation_count(), 0);
        assert_eq!(binding.issues().len(), 2);
    }

    #[test]
    fn test_initial_tables() {
        let registry = Arc::new(MappingRegistry::builtin());
        let mapper = DeviceMapper::new(registry, "relay", AliasTemplate::default());
        let binding = mapper
            .resolve("light-1", &caps(&["Facades/Switchable", "Facades/Dimmable"]))
            .unwrap()
            .binding()
            .unwrap();

        assert_eq!(binding.initial_push(), &["power".to_string(), "brightness".to_string()]);
        assert_eq!(binding.initial_states().get("brightness"), Some(&json!(0)));
        assert_eq!(binding.reflected_state("/3311/0/5851"), Some("brightness"));
        assert!(binding.issues().is_empty());
    }

    #[test]
    fn test_brightness_sender_rounds_to_int() {
        let mapper = DeviceMapper::new(Arc::new(MappingRegistry::builtin()), "relay", AliasTemplate::default());
        let binding = mapper
            .resolve("light-1", &caps(&["Facades/Dimmable"]))
            .unwrap()
            .binding()
            .unwrap();
        let sender = binding.state_sender("brightness").unwrap();
        assert_eq!(sender.transform(&json!(0.42)), Some(json!(42)));
    }
}
