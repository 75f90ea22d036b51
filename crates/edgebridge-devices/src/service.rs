//! Bridge service: wires the components together and runs them.
//!
//! ```text
//!  DeviceBus events ──► dispatcher ──┬─► OutboundQueues (one per device) ──► Edge
//!                                    ├─► LifecycleManager (discover / remove)
//!                                    └─► CloudResolver::rotate_key
//!  reconciliation timer ─────────────► PropagationEngine::reconcile_once
//!  Edge GET/PUT/POST ────────────────► PropagationEngine::handle_inbound ──► Bus
//! ```

use crate::adapter::{AdapterError, CloudConnector, DeviceBus, EdgeClient};
use crate::cloud::CloudResolver;
use crate::lifecycle::{FilterPolicy, LifecycleManager, LifecycleSettings};
use crate::mapper::DeviceMapper;
use crate::mapping_registry::MappingRegistry;
use crate::outbound::OutboundQueues;
use crate::propagation::{ChangeKind, PropagationConfig, PropagationEngine};
use crate::registry::{DeviceMapEntry, DeviceRegistry};
use edgebridge_core::{BridgeConfig, BridgeEvent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors starting the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] edgebridge_core::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] AdapterError),
}

/// External systems the bridge talks to.
#[derive(Clone)]
pub struct BridgeServices {
    pub bus: Arc<dyn DeviceBus>,
    pub edge: Arc<dyn EdgeClient>,
    pub cloud: Option<Arc<dyn CloudConnector>>,
}

/// The running bridge.
pub struct Bridge {
    config: BridgeConfig,
    bus: Arc<dyn DeviceBus>,
    registry: Arc<DeviceRegistry>,
    engine: Arc<PropagationEngine>,
    lifecycle: Arc<LifecycleManager>,
    cloud: Arc<CloudResolver>,
    outbound: Arc<OutboundQueues>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Build a bridge from configuration, loading the builtin mappings plus
    /// any `mapping_rules` file.
    pub fn from_config(config: BridgeConfig, services: BridgeServices) -> Result<Self, BridgeError> {
        let mut mappings = MappingRegistry::builtin();
        if let Some(path) = &config.mapping_rules {
            let added = mappings.extend_from_json_file(path)?;
            tracing::info!(category = "config", path = %path.display(), added, "Loaded mapping rules");
        }
        Ok(Self::new(config, mappings, services))
    }

    /// Build a bridge with an explicit mapping registry.
    pub fn new(config: BridgeConfig, mappings: MappingRegistry, services: BridgeServices) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let engine = Arc::new(PropagationEngine::new(
            services.bus.clone(),
            registry.clone(),
            PropagationConfig::from(&config),
        ));
        let cloud = Arc::new(CloudResolver::new(
            services.cloud,
            config.cloud_api_key.as_deref(),
        ));
        let outbound = Arc::new(OutboundQueues::new(engine.clone()));
        let mapper = DeviceMapper::from_config(Arc::new(mappings), &config);
        let lifecycle = Arc::new(LifecycleManager::new(
            mapper,
            registry.clone(),
            services.bus.clone(),
            services.edge,
            engine.clone(),
            cloud.clone(),
            FilterPolicy::from(&config),
            LifecycleSettings::from(&config),
        ));

        Self {
            config,
            bus: services.bus,
            registry,
            engine,
            lifecycle,
            cloud,
            outbound,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<PropagationEngine> {
        &self.engine
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn cloud(&self) -> &Arc<CloudResolver> {
        &self.cloud
    }

    pub fn outbound(&self) -> &Arc<OutboundQueues> {
        &self.outbound
    }

    /// Start listening, reconciling and scanning.
    ///
    /// The Bus subscription is taken before the initial scan so devices
    /// appearing during the scan are not missed; duplicates are filtered.
    pub async fn start(&self) -> Result<(), BridgeError> {
        if !self.tasks.lock().is_empty() {
            tracing::warn!("Bridge already started");
            return Ok(());
        }
        tracing::info!(relay_id = %self.config.relay_id, "Starting bridge");

        if let Err(e) = self.engine.warm_cache().await {
            tracing::warn!(error = %e, "State cache unavailable; initial pushes will query devices");
        }

        let dispatcher = self.spawn_dispatcher();
        let reconciler = self
            .engine
            .spawn_reconciliation(self.config.reconcile_interval());

        let lifecycle = self.lifecycle.clone();
        let scan = tokio::spawn(async move {
            match lifecycle.initial_scan().await {
                Ok(results) => {
                    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                    tracing::info!(devices = results.len(), failed, "Initial scan complete");
                }
                Err(e) => tracing::error!(error = %e, "Initial scan failed"),
            }
        });

        self.tasks.lock().extend([dispatcher, reconciler, scan]);
        Ok(())
    }

    fn spawn_dispatcher(&self) -> JoinHandle<()> {
        let mut rx = self.bus.events().subscribe();
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        let lifecycle = self.lifecycle.clone();
        let cloud = self.cloud.clone();

        tokio::spawn(async move {
            while let Some((event, _)) = rx.recv().await {
                match event {
                    BridgeEvent::StateChanged {
                        device_id,
                        state,
                        value,
                        ..
                    } if registry.contains(&device_id) => {
                        outbound.enqueue(&device_id, ChangeKind::State, state, value);
                    }
                    BridgeEvent::EventFired {
                        device_id,
                        event,
                        value,
                        ..
                    } if registry.contains(&device_id) => {
                        outbound.enqueue(&device_id, ChangeKind::Event, event, value);
                    }
                    BridgeEvent::StateChanged { device_id, .. }
                    | BridgeEvent::EventFired { device_id, .. } => {
                        tracing::trace!(device_id = %device_id, "Change for a device that is not bridged");
                    }
                    BridgeEvent::DeviceDiscovered {
                        device_id, device, ..
                    } => lifecycle.spawn_discovery(device_id, device),
                    BridgeEvent::DeviceUnregistered { device_id, .. } => {
                        outbound.close(&device_id);
                        let lifecycle = lifecycle.clone();
                        tokio::spawn(async move {
                            let _ = lifecycle.remove_device(&device_id).await;
                        });
                    }
                    BridgeEvent::CloudKeyRotated { api_key, .. } => {
                        if let Err(e) = cloud.rotate_key(&api_key) {
                            tracing::error!(error = %e, "Cloud key rotation failed");
                        }
                    }
                }
            }
            tracing::info!("Bus event stream closed");
        })
    }

    /// Rotate the Cloud API key.
    pub fn rotate_cloud_key(&self, api_key: &str) -> Result<(), crate::cloud::CloudError> {
        self.cloud.rotate_key(api_key)
    }

    /// Device id → Edge alias, endpoint name and Cloud id.
    pub fn device_map(&self) -> BTreeMap<String, DeviceMapEntry> {
        self.registry.device_map()
    }

    /// Stop background work. Registered Edge devices are left in place.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.outbound.stop();
        self.lifecycle.stop();
        tracing::info!("Bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
