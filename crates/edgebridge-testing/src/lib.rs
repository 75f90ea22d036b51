//! Testing utilities for edgebridge
//!
//! This crate provides in-memory stand-ins for the systems the bridge
//! talks to:
//! - A simulated device bus with scriptable devices and failure injection
//! - A simulated Edge that records registrations and writes and lets tests
//!   inject inbound operations
//! - A simulated Cloud directory
//! - Fixtures wiring all of the above to a `Bridge`

pub mod bus_simulator;
pub mod cloud_simulator;
pub mod edge_simulator;
pub mod fixtures;

pub use bus_simulator::{BusCall, SimulatedBus, SimulatedDevice};
pub use cloud_simulator::SimulatedCloud;
pub use edge_simulator::{SimulatedEdge, SimulatedEdgeDevice};
pub use fixtures::{
    dimmable_lamp, eventually, init_test_tracing, test_config, thermometer, TestBridge,
    TEST_API_KEY, TEST_RELAY_ID,
};
