//! Lifecycle Manager: discovery, filtering, registration and removal.
//!
//! Per-device phases:
//!
//! ```text
//! Unseen → Evaluating → Mapped → Registering → Active → Removing → (Unseen)
//!              │           │          │
//!              └───────────┴──────────┴─ rejected / failed → Unseen
//! ```
//!
//! In-flight phases live in a claim table so concurrent discoveries of the
//! same device are rejected; `Active` is membership in the
//! [`DeviceRegistry`]. A failed registration is not retried until the
//! device is discovered again.

use crate::adapter::{
    AdapterError, DeviceBus, EdgeClient, EdgeResponder, InboundError, InboundRequest,
    OperationListener,
};
use crate::cloud::CloudResolver;
use crate::mapper::{DeviceMapper, MappingError, Resolution};
use crate::propagation::PropagationEngine;
use crate::protocol::Operation;
use crate::registry::{DeviceRegistry, RegistryError};
use crate::session::DeviceSession;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use edgebridge_core::{BridgeConfig, DiscoveredDevice};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Registration of {device_id} failed: {source}")]
    Registration {
        device_id: String,
        #[source]
        source: AdapterError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Can't find a mapped ID of {0}")]
    NotMapped(String),

    #[error("Deregistration of {device_id} failed: {source}")]
    Deregistration {
        device_id: String,
        #[source]
        source: AdapterError,
    },

    #[error("Bus query failed: {0}")]
    Bus(#[source] AdapterError),
}

/// Where a device is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Unseen,
    Evaluating,
    Mapped,
    Registering,
    Active,
    Removing,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Unseen => "unseen",
            LifecyclePhase::Evaluating => "evaluating",
            LifecyclePhase::Mapped => "mapped",
            LifecyclePhase::Registering => "registering",
            LifecyclePhase::Active => "active",
            LifecyclePhase::Removing => "removing",
        };
        f.write_str(name)
    }
}

/// Result of the discovery filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    AlreadyActive,
    /// The device is a shadow the Edge itself created.
    EdgeShadow,
    InFlight,
    NotWhitelisted,
    Ignored,
}

impl fmt::Display for FilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FilterDecision::Accept => "accepted",
            FilterDecision::AlreadyActive => "ignored, already registered",
            FilterDecision::EdgeShadow => "ignored, Edge shadow device",
            FilterDecision::InFlight => "ignored, registration in progress",
            FilterDecision::NotWhitelisted => "ignored, not whitelisted",
            FilterDecision::Ignored => "ignored by id",
        };
        f.write_str(reason)
    }
}

/// Outcome of processing a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Rejected(FilterDecision),
    NothingToBridge,
    Registered { alias: String, endpoint: String },
}

/// Discovery filter settings.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    pub whitelist: HashSet<String>,
    pub ignored: HashSet<String>,
    pub whitelist_only: bool,
    pub edge_type_marker: String,
}

impl From<&BridgeConfig> for FilterPolicy {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            whitelist: config.whitelisted_ids(),
            ignored: config.ignored_ids(),
            whitelist_only: config.white_list_only,
            edge_type_marker: config.edge_device_type_marker.clone(),
        }
    }
}

/// Timing and identity settings for registration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub owner_tag: String,
    pub selection: String,
    pub initial_push_delay: Duration,
    pub interface_retry: Duration,
}

impl From<&BridgeConfig> for LifecycleSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            owner_tag: config.owner_tag.clone(),
            selection: config.selection_for_discovery.clone(),
            initial_push_delay: config.initial_push_delay(),
            interface_retry: config.interface_retry_interval(),
        }
    }
}

/// Drives devices from discovery to removal.
pub struct LifecycleManager {
    mapper: DeviceMapper,
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn DeviceBus>,
    edge: Arc<dyn EdgeClient>,
    engine: Arc<PropagationEngine>,
    cloud: Arc<CloudResolver>,
    policy: FilterPolicy,
    settings: LifecycleSettings,
    in_flight: DashMap<String, LifecyclePhase>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        mapper: DeviceMapper,
        registry: Arc<DeviceRegistry>,
        bus: Arc<dyn DeviceBus>,
        edge: Arc<dyn EdgeClient>,
        engine: Arc<PropagationEngine>,
        cloud: Arc<CloudResolver>,
        policy: FilterPolicy,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            mapper,
            registry,
            bus,
            edge,
            engine,
            cloud,
            policy,
            settings,
            in_flight: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn mapper(&self) -> &DeviceMapper {
        &self.mapper
    }

    /// Current phase of a device.
    pub fn phase(&self, device_id: &str) -> LifecyclePhase {
        if let Some(phase) = self.in_flight.get(device_id) {
            return *phase;
        }
        if self.registry.contains(device_id) {
            LifecyclePhase::Active
        } else {
            LifecyclePhase::Unseen
        }
    }

    /// Apply the discovery filter, first match wins.
    pub fn evaluate(&self, device_id: &str, device_type: &str) -> FilterDecision {
        let policy = &self.policy;
        if self.registry.contains(device_id) {
            return FilterDecision::AlreadyActive;
        }
        if !policy.edge_type_marker.is_empty() && device_type.contains(&policy.edge_type_marker) {
            return FilterDecision::EdgeShadow;
        }
        if self.in_flight.contains_key(device_id) {
            return FilterDecision::InFlight;
        }
        if !policy.whitelist.contains(device_id) {
            if policy.whitelist_only {
                return FilterDecision::NotWhitelisted;
            }
            if policy.ignored.contains(device_id) {
                return FilterDecision::Ignored;
            }
        }
        FilterDecision::Accept
    }

    /// Evaluate, map and register a discovered device.
    pub async fn process_new_device(
        self: &Arc<Self>,
        device_id: &str,
        device: &DiscoveredDevice,
    ) -> Result<DiscoveryOutcome, LifecycleError> {
        let decision = self.evaluate(device_id, &device.device_type);
        if decision != FilterDecision::Accept {
            tracing::debug!(device_id, reason = %decision, "Discovery rejected");
            return Ok(DiscoveryOutcome::Rejected(decision));
        }

        match self.in_flight.entry(device_id.to_string()) {
            Entry::Occupied(_) => return Ok(DiscoveryOutcome::Rejected(FilterDecision::InFlight)),
            Entry::Vacant(slot) => {
                slot.insert(LifecyclePhase::Evaluating);
            }
        }
        let _claim = scopeguard::guard((), |_| {
            self.in_flight.remove(device_id);
        });

        let result = self.register_device(device_id, device).await;
        if let Err(e) = &result {
            tracing::error!(device_id, error = %e, "Device not bridged");
        }
        result
    }

    /// Process a discovery in the background. The task is aborted by
    /// [`Self::stop`], including a pending interface retry.
    pub fn spawn_discovery(self: &Arc<Self>, device_id: String, device: DiscoveredDevice) {
        let manager = self.clone();
        self.track(tokio::spawn(async move {
            let _ = manager.process_new_device(&device_id, &device).await;
        }));
    }

    async fn register_device(
        self: &Arc<Self>,
        device_id: &str,
        device: &DiscoveredDevice,
    ) -> Result<DiscoveryOutcome, LifecycleError> {
        let interfaces = match &device.interfaces {
            Some(interfaces) => interfaces.clone(),
            None => self.fetch_interfaces(device_id).await,
        };

        let binding = match self.mapper.resolve(device_id, &interfaces)? {
            Resolution::Bound(binding) => binding,
            Resolution::NothingToBridge => {
                tracing::info!(device_id, "No mappable capabilities; skipping");
                return Ok(DiscoveryOutcome::NothingToBridge);
            }
        };
        self.set_phase(device_id, LifecyclePhase::Mapped);

        let alias = binding.edge_alias().to_string();
        self.set_phase(device_id, LifecyclePhase::Registering);
        let registration_error = |source| LifecycleError::Registration {
            device_id: device_id.to_string(),
            source,
        };
        let edge_device = self
            .edge
            .create_device(&alias, &self.settings.owner_tag)
            .await
            .map_err(registration_error)?;
        // TODO: pass true once firmware-update capability detection exists
        let endpoint = match edge_device
            .register(binding.resources().to_vec(), false)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Err(cleanup) = self.edge.delete_device(&alias).await {
                    tracing::warn!(device_id, alias = %alias, error = %cleanup, "Deleting unregistered Edge device failed");
                }
                return Err(registration_error(e));
            }
        };

        let session = Arc::new(DeviceSession::new(binding, edge_device, endpoint.clone()));
        self.install_listeners(&session);
        if let Err(e) = self.registry.insert(session.clone()) {
            if let Err(cleanup) = session.edge().deregister().await {
                tracing::warn!(device_id, error = %cleanup, "Deregistering duplicate failed");
            }
            return Err(e.into());
        }

        tracing::info!(
            device_id,
            alias = %alias,
            endpoint = %endpoint,
            capabilities = ?session.binding().capabilities(),
            "Device bridged"
        );

        self.schedule_initial_push(&session);
        self.schedule_cloud_lookup(&session);

        Ok(DiscoveryOutcome::Registered { alias, endpoint })
    }

    fn set_phase(&self, device_id: &str, phase: LifecyclePhase) {
        if let Some(mut current) = self.in_flight.get_mut(device_id) {
            *current = phase;
        }
    }

    /// Query capabilities until the Bus answers.
    async fn fetch_interfaces(&self, device_id: &str) -> Vec<String> {
        loop {
            match self.bus.list_interfaces(device_id).await {
                Ok(interfaces) => return interfaces,
                Err(e) => {
                    tracing::warn!(
                        device_id,
                        error = %e,
                        retry_in = ?self.settings.interface_retry,
                        "Interface query failed"
                    );
                    tokio::time::sleep(self.settings.interface_retry).await;
                }
            }
        }
    }

    fn install_listeners(&self, session: &Arc<DeviceSession>) {
        for operation in Operation::ALL {
            let engine = self.engine.clone();
            let weak: Weak<DeviceSession> = Arc::downgrade(session);
            let listener: OperationListener = Arc::new(move |request: InboundRequest, responder: EdgeResponder| {
                let Some(session) = weak.upgrade() else {
                    responder.respond(Err(InboundError::NoHandler));
                    return;
                };
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.handle_inbound(session, request, responder).await;
                });
            });
            session.edge().on(operation, listener);
        }
    }

    fn schedule_initial_push(&self, session: &Arc<DeviceSession>) {
        if session.binding().initial_push().is_empty() {
            return;
        }
        let engine = self.engine.clone();
        let registry = self.registry.clone();
        let weak = Arc::downgrade(session);
        let delay = self.settings.initial_push_delay;
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            // skip devices removed (or replaced) while waiting
            let still_active = registry
                .get(session.device_id())
                .is_some_and(|current| Arc::ptr_eq(&current, &session));
            if still_active {
                let pushed = engine.initial_push(&session).await;
                tracing::debug!(device_id = %session.device_id(), pushed, "Initial values pushed");
            }
        }));
    }

    fn schedule_cloud_lookup(&self, session: &Arc<DeviceSession>) {
        if !self.cloud.is_available() {
            return;
        }
        let cloud = self.cloud.clone();
        let session = session.clone();
        self.track(tokio::spawn(async move {
            match cloud.fetch_cloud_id(session.edge_alias()).await {
                Ok(cloud_id) => {
                    tracing::info!(device_id = %session.device_id(), cloud_id = %cloud_id, "Resolved Cloud id");
                    session.set_cloud_id(cloud_id);
                }
                Err(e) => tracing::warn!(
                    device_id = %session.device_id(),
                    error = %e,
                    "Cloud id lookup failed"
                ),
            }
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Deregister and forget a device.
    pub async fn remove_device(&self, device_id: &str) -> Result<(), LifecycleError> {
        let Some(session) = self.registry.get(device_id) else {
            let err = LifecycleError::NotMapped(device_id.to_string());
            tracing::error!(device_id, error = %err, "Removal of unmapped device");
            return Err(err);
        };

        self.in_flight
            .insert(device_id.to_string(), LifecyclePhase::Removing);
        let _claim = scopeguard::guard((), |_| {
            self.in_flight.remove(device_id);
        });

        let deregistered = session.edge().deregister().await;
        self.registry.remove(device_id);
        if let Err(e) = self.edge.delete_device(session.edge_alias()).await {
            tracing::warn!(device_id, error = %e, "Deleting Edge device object failed");
        }

        deregistered.map_err(|source| {
            let err = LifecycleError::Deregistration {
                device_id: device_id.to_string(),
                source,
            };
            tracing::error!(device_id, error = %err, "Device removed with errors");
            err
        })?;
        tracing::info!(device_id, "Device unbridged");
        Ok(())
    }

    /// Bulk-scan the Bus and process every registered device concurrently.
    pub async fn initial_scan(
        self: &Arc<Self>,
    ) -> Result<Vec<(String, Result<DiscoveryOutcome, LifecycleError>)>, LifecycleError> {
        let resources = self
            .bus
            .list_resources(&self.settings.selection)
            .await
            .map_err(LifecycleError::Bus)?;
        tracing::info!(
            selection = %self.settings.selection,
            devices = resources.len(),
            "Initial device scan"
        );

        let scans = resources
            .into_iter()
            .filter(|(_, device)| device.registered)
            .map(|(device_id, device)| {
                let manager = self.clone();
                async move {
                    let outcome = manager.process_new_device(&device_id, &device).await;
                    (device_id, outcome)
                }
            });
        Ok(futures::future::join_all(scans).await)
    }

    /// Abort pending discoveries, initial pushes and Cloud lookups.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
