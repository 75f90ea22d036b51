//! Best-effort Cloud identity resolution.
//!
//! The Cloud client is built from an API key and rebuilt when the key
//! rotates; nothing else in the bridge depends on it.

use crate::adapter::{AdapterError, CloudConnector, CloudDirectory};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("no API")]
    NoApi,

    #[error("malformed directory response for alias {0}")]
    Malformed(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Holds the current Cloud client.
pub struct CloudResolver {
    connector: Option<Arc<dyn CloudConnector>>,
    client: RwLock<Option<Arc<dyn CloudDirectory>>>,
}

impl CloudResolver {
    /// Create a resolver, connecting right away when a key is available.
    pub fn new(connector: Option<Arc<dyn CloudConnector>>, api_key: Option<&str>) -> Self {
        let resolver = Self {
            connector,
            client: RwLock::new(None),
        };
        match api_key {
            Some(key) => {
                if let Err(e) = resolver.rotate_key(key) {
                    tracing::error!(error = %e, "Cloud client unavailable");
                }
            }
            None => tracing::warn!("No Cloud API key provided; Cloud ids will not be resolved"),
        }
        resolver
    }

    /// A resolver that never resolves anything.
    pub fn disabled() -> Self {
        Self {
            connector: None,
            client: RwLock::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.read().is_some()
    }

    /// Rebuild the Cloud client for a new API key.
    pub fn rotate_key(&self, api_key: &str) -> Result<(), CloudError> {
        let connector = self.connector.as_ref().ok_or(CloudError::NoApi)?;
        let client = connector.connect(api_key)?;
        *self.client.write() = Some(client);
        tracing::info!("Cloud client (re)initialized");
        Ok(())
    }

    /// Look up the Cloud id of the device registered under `alias`.
    pub async fn fetch_cloud_id(&self, alias: &str) -> Result<String, CloudError> {
        let client = self.client.read().clone().ok_or(CloudError::NoApi)?;
        let devices = client.list_devices_by_alias(alias).await?;
        devices
            .into_iter()
            .next()
            .and_then(|device| device.id)
            .ok_or_else(|| CloudError::Malformed(alias.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterResult, CloudDevice};
    use async_trait::async_trait;

    struct FixedDirectory(Vec<CloudDevice>);

    #[async_trait]
    impl CloudDirectory for FixedDirectory {
        async fn list_devices_by_alias(&self, _alias: &str) -> AdapterResult<Vec<CloudDevice>> {
            Ok(self.0.clone())
        }
    }

    struct KeyedConnector;

    impl CloudConnector for KeyedConnector {
        fn connect(&self, api_key: &str) -> AdapterResult<Arc<dyn CloudDirectory>> {
            if api_key.is_empty() {
                return Err(AdapterError::Rejected("empty key".into()));
            }
            Ok(Arc::new(FixedDirectory(vec![CloudDevice {
                id: Some(format!("cloud-{api_key}")),
                alias: Some("gw-r-d".into()),
            }])))
        }
    }

    #[tokio::test]
    async fn test_disabled_resolver() {
        let resolver = CloudResolver::disabled();
        assert!(!resolver.is_available());
        assert!(matches!(
            resolver.fetch_cloud_id("gw-r-d").await,
            Err(CloudError::NoApi)
        ));
        assert!(matches!(resolver.rotate_key("k"), Err(CloudError::NoApi)));
    }

    #[tokio::test]
    async fn test_rotation_rebuilds_client() {
        let resolver = CloudResolver::new(Some(Arc::new(KeyedConnector)), None);
        assert!(!resolver.is_available());

        resolver.rotate_key("one").unwrap();
        assert_eq!(resolver.fetch_cloud_id("gw-r-d").await.unwrap(), "cloud-one");

        resolver.rotate_key("two").unwrap();
        assert_eq!(resolver.fetch_cloud_id("gw-r-d").await.unwrap(), "cloud-two");
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_previous_client() {
        let resolver = CloudResolver::new(Some(Arc::new(KeyedConnector)), Some("one"));
        assert!(resolver.rotate_key("").is_err());
        assert_eq!(resolver.fetch_cloud_id("gw-r-d").await.unwrap(), "cloud-one");
    }
}
