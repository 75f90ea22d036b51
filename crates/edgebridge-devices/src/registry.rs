//! Device Registry - live sessions keyed by Bus device id and Edge alias
//!
//! The registry is the only table shared between the lifecycle manager, the
//! propagation flows and the reconciliation loop. Lookups are lock-free per
//! key; a session becomes visible only once it is fully built and leaves
//! both indexes on removal.
//!
//! ```rust,ignore
//! let registry = DeviceRegistry::new();
//! registry.insert(Arc::new(session))?;
//! let session = registry.get("ZigbeeLight1");
//! ```

use crate::session::DeviceSession;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Device already registered: {0}")]
    AlreadyRegistered(String),
}

/// Operational view of one bridged device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapEntry {
    pub edge_alias: String,
    pub edge_endpoint_name: String,
    pub cloud_id: Option<String>,
}

/// Live device sessions.
#[derive(Default)]
pub struct DeviceRegistry {
    by_id: DashMap<String, Arc<DeviceSession>>,
    by_alias: DashMap<String, Arc<DeviceSession>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a session. Fails if the device id is already present.
    pub fn insert(&self, session: Arc<DeviceSession>) -> Result<(), RegistryError> {
        match self.by_id.entry(session.device_id().to_string()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(
                session.device_id().to_string(),
            )),
            Entry::Vacant(slot) => {
                self.by_alias
                    .insert(session.edge_alias().to_string(), session.clone());
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Remove a session from both indexes.
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        let (_, session) = self.by_id.remove(device_id)?;
        self.by_alias
            .remove_if(session.edge_alias(), |_, s| Arc::ptr_eq(s, &session));
        Some(session)
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.by_id.get(device_id).map(|s| s.value().clone())
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<Arc<DeviceSession>> {
        self.by_alias.get(alias).map(|s| s.value().clone())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.by_id.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Snapshot of all sessions.
    pub fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.by_id.iter().map(|s| s.value().clone()).collect()
    }

    /// Device id → alias, Edge endpoint name and Cloud id.
    pub fn device_map(&self) -> BTreeMap<String, DeviceMapEntry> {
        self.by_id
            .iter()
            .map(|s| {
                let session = s.value();
                (
                    s.key().clone(),
                    DeviceMapEntry {
                        edge_alias: session.edge_alias().to_string(),
                        edge_endpoint_name: session.edge_identity().to_string(),
                        cloud_id: session.cloud_id(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterResult, EdgeDevice, OperationListener};
    use crate::mapper::DeviceMapper;
    use crate::mapping_registry::MappingRegistry;
    use crate::protocol::{Operation, ResourceSpec};
    use async_trait::async_trait;
    use edgebridge_core::AliasTemplate;
    use serde_json::Value;

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

    fn session(device_id: &str) -> Arc<DeviceSession> {
        let mapper = DeviceMapper::new(Arc::new(MappingRegistry::builtin()), "relay", AliasTemplate::default());
        let binding = mapper
            .resolve(device_id, &["Facades/Switchable".to_string()])
            .unwrap()
            .binding()
            .unwrap();
        Arc::new(DeviceSession::new(binding, Arc::new(NullEdge), format!("ep-{}", device_id)))
    }

    #[test]
    fn test_insert_and_lookup_both_keys() {
        let registry = DeviceRegistry::new();
        registry.insert(session("switch-1")).unwrap();

        assert!(registry.contains("switch-1"));
        assert!(registry.get_by_alias("gw-relay-switch-1").is_some());
        assert_eq!(
            registry.insert(session("switch-1")),
            Err(RegistryError::AlreadyRegistered("switch-1".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let registry = DeviceRegistry::new();
        registry.insert(session("switch-1")).unwrap();

        assert!(registry.remove("switch-1").is_some());
        assert!(registry.get_by_alias("gw-relay-switch-1").is_none());
        assert!(registry.remove("switch-1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_device_map() {
        let registry = DeviceRegistry::new();
        let s = session("switch-1");
        s.set_cloud_id("cloud-1");
        registry.insert(s).unwrap();

        let map = registry.device_map();
        let entry = map.get("switch-1").unwrap();
        assert_eq!(entry.edge_endpoint_name, "ep-switch-1");
        assert_eq!(entry.cloud_id.as_deref(), Some("cloud-1"));
    }
}
