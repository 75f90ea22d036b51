//! Cloud directory simulator for testing

use async_trait::async_trait;
use edgebridge_devices::{AdapterError, AdapterResult, CloudConnector, CloudDevice, CloudDirectory};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type Directory = Arc<RwLock<HashMap<String, String>>>;

/// Simulated Cloud: alias → Cloud id, with per-key access
#[derive(Default)]
pub struct SimulatedCloud {
    entries: Directory,
    revoked: RwLock<HashSet<String>>,
    connections: Mutex<Vec<String>>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a Cloud id for an alias
    pub fn insert(&self, alias: impl Into<String>, cloud_id: impl Into<String>) {
        self.entries.write().insert(alias.into(), cloud_id.into());
    }

    /// Refuse connections and lookups made with this key
    pub fn revoke(&self, api_key: impl Into<String>) {
        self.revoked.write().insert(api_key.into());
    }

    /// Keys the bridge connected with, in order
    pub fn connections(&self) -> Vec<String> {
        self.connections.lock().clone()
    }
}

struct DirectoryClient {
    entries: Directory,
    api_key: String,
    revoked: bool,
}

#[async_trait]
impl CloudDirectory for DirectoryClient {
    async fn list_devices_by_alias(&self, alias: &str) -> AdapterResult<Vec<CloudDevice>> {
        if self.revoked {
            return Err(AdapterError::Rejected(format!("key {} revoked", self.api_key)));
        }
        Ok(self
            .entries
            .read()
            .get(alias)
            .map(|id| CloudDevice {
                id: Some(id.clone()),
                alias: Some(alias.to_string()),
            })
            .into_iter()
            .collect())
    }
}

impl CloudConnector for SimulatedCloud {
    fn connect(&self, api_key: &str) -> AdapterResult<Arc<dyn CloudDirectory>> {
        self.connections.lock().push(api_key.to_string());
        Ok(Arc::new(DirectoryClient {
            entries: self.entries.clone(),
            api_key: api_key.to_string(),
            revoked: self.revoked.read().contains(api_key),
        }))
    }
}
