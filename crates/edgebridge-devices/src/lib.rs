//! Device bridging between the local device bus and the Edge.
//!
//! ## Architecture
//!
//! - **MappingRegistry**: capability name → Edge resource layout and transforms
//! - **DeviceMapper**: resolves a device's capabilities into a `DeviceBinding`
//! - **DeviceSession**: one bridged device (binding, Edge handle, last-known state)
//! - **PropagationEngine**: Bus → Edge pushes, Edge → Bus operations, reconciliation
//! - **OutboundQueues**: per-device ordering of Bus → Edge pushes
//! - **LifecycleManager**: discovery filter, registration and removal
//! - **Bridge**: wires everything to a `DeviceBus`, an `EdgeClient` and the Cloud
//!
//! External systems are reached only through the traits in [`adapter`].

pub mod adapter;
pub mod builtin_mappings;
pub mod cloud;
pub mod lifecycle;
pub mod mapper;
pub mod mapping_registry;
pub mod outbound;
pub mod propagation;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod session;

pub use adapter::{
    AdapterError, AdapterResult, CloudConnector, CloudDevice, CloudDirectory, DeviceBus,
    DeviceResponse, EdgeClient, EdgeDevice, EdgeReply, EdgeResponder, InboundError,
    InboundRequest, OperationListener, SelectionResponse, StateSnapshot,
};
pub use builtin_mappings::builtin_capability_mappings;
pub use cloud::{CloudError, CloudResolver};
pub use lifecycle::{
    DiscoveryOutcome, FilterDecision, FilterPolicy, LifecycleError, LifecycleManager,
    LifecyclePhase, LifecycleSettings,
};
pub use mapper::{DeviceBinding, DeviceMapper, MappingError, Resolution};
pub use mapping_registry::MappingRegistry;
pub use outbound::OutboundQueues;
pub use propagation::{
    ChangeKind, PropagationConfig, PropagationEngine, PropagationError, PushOutcome,
    ReconcileReport,
};
pub use protocol::{
    AddressEntry, BusAction, CapabilityMapping, Handler, Operation, ResourceSpec, Sender,
    ValueType,
};
pub use registry::{DeviceMapEntry, DeviceRegistry, RegistryError};
pub use service::{Bridge, BridgeError, BridgeServices};
pub use session::DeviceSession;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
