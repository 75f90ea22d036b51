//! Collaborator contracts for the bridge.
//!
//! The bridge core talks to three external systems and owns none of them:
//!
//! - the device bus ([`DeviceBus`]): selector calls, discovery queries and
//!   the canonical state cache, plus an [`EventBus`] of notifications;
//! - the Edge endpoint ([`EdgeClient`] / [`EdgeDevice`]): shadow device
//!   creation, registration, value updates and inbound operations;
//! - the Cloud directory ([`CloudDirectory`]): best-effort identity lookup.
//!
//! Transport details live in the adapters that implement these traits.

use crate::protocol::{Operation, ResourceSpec};
use async_trait::async_trait;
use edgebridge_core::{DiscoveredDevice, SharedEventBus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type for collaborator calls.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Communication error
    #[error("Communication error: {0}")]
    Communication(String),

    /// The remote side refused the request
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation timeout
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// Adapter stopped
    #[error("Adapter is stopped")]
    Stopped,

    /// Other error
    #[error("Adapter error: {0}")]
    Other(#[from] anyhow::Error),
}

// ========== Bus ==========

/// Per-device outcome of a Bus selector call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    /// Whether the device answered at all.
    pub received_response: bool,
    #[serde(default)]
    pub result: Value,
    /// Application-level error reported by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl DeviceResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            received_response: true,
            result,
            error: None,
        }
    }

    pub fn error(error: impl Into<Value>) -> Self {
        Self {
            received_response: true,
            result: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }
}

/// Selector responses keyed by device id.
pub type SelectionResponse = HashMap<String, DeviceResponse>;

/// Canonical Bus state: device id → state name → value.
pub type StateSnapshot = HashMap<String, HashMap<String, Value>>;

/// The local device bus.
#[async_trait]
pub trait DeviceBus: Send + Sync {
    /// Notification stream: state and event changes, discovery, unregister.
    fn events(&self) -> SharedEventBus;

    /// Read one state, or every state when `state` is `None`.
    async fn get(&self, device_id: &str, state: Option<&str>) -> AdapterResult<SelectionResponse>;

    /// Write a state.
    async fn set(&self, device_id: &str, state: &str, value: Value)
        -> AdapterResult<SelectionResponse>;

    /// Invoke a device command.
    async fn call(
        &self,
        device_id: &str,
        command: &str,
        args: Vec<Value>,
    ) -> AdapterResult<SelectionResponse>;

    /// Capabilities a device advertises.
    async fn list_interfaces(&self, device_id: &str) -> AdapterResult<Vec<String>>;

    /// Devices matching a selection string such as `id=*`.
    async fn list_resources(&self, selection: &str)
        -> AdapterResult<HashMap<String, DiscoveredDevice>>;

    /// The Bus's canonical state cache.
    async fn state_cache(&self) -> AdapterResult<StateSnapshot>;
}

// ========== Edge ==========

/// An inbound operation from the Edge.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub operation: Operation,
    pub path: String,
    pub value: Value,
}

impl InboundRequest {
    pub fn new(operation: Operation, path: impl Into<String>, value: Value) -> Self {
        Self {
            operation,
            path: path.into(),
            value,
        }
    }
}

/// Failure answers sent back to the Edge for an inbound operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InboundError {
    #[error("No handler")]
    NoHandler,

    #[error("Device Unreachable")]
    DeviceUnreachable,

    /// Error reported by the device itself.
    #[error("{0}")]
    Application(String),

    #[error("Error mapping data")]
    MappingFailed,
}

/// Answer to an inbound operation: `Ok("ok")` or a failure.
pub type EdgeReply = Result<String, InboundError>;

/// One-shot reply handle for an inbound operation.
///
/// A responder that is dropped without an answer replies
/// [`InboundError::MappingFailed`], so the Edge always receives exactly one
/// reply per request, including when the handling task panics.
pub struct EdgeResponder {
    reply: Option<Box<dyn FnOnce(EdgeReply) + Send>>,
}

impl EdgeResponder {
    /// Wrap a reply callback.
    pub fn from_fn(reply: impl FnOnce(EdgeReply) + Send + 'static) -> Self {
        Self {
            reply: Some(Box::new(reply)),
        }
    }

    /// A responder whose reply is delivered on a channel.
    pub fn channel() -> (Self, oneshot::Receiver<EdgeReply>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self::from_fn(move |reply| {
            let _ = tx.send(reply);
        });
        (responder, rx)
    }

    pub fn respond(mut self, reply: EdgeReply) {
        if let Some(reply_fn) = self.reply.take() {
            reply_fn(reply);
        }
    }
}

impl Drop for EdgeResponder {
    fn drop(&mut self) {
        if let Some(reply_fn) = self.reply.take() {
            tracing::warn!("Inbound request dropped without a reply; answering with mapping error");
            reply_fn(Err(InboundError::MappingFailed));
        }
    }
}

impl fmt::Debug for EdgeResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeResponder")
            .field("answered", &self.reply.is_none())
            .finish()
    }
}

/// Callback invoked for every inbound operation on an Edge device.
pub type OperationListener = Arc<dyn Fn(InboundRequest, EdgeResponder) + Send + Sync>;

/// Factory for Edge shadow devices.
#[async_trait]
pub trait EdgeClient: Send + Sync {
    /// Create (but do not register) a shadow device.
    async fn create_device(&self, alias: &str, owner_tag: &str) -> AdapterResult<Arc<dyn EdgeDevice>>;

    /// Remove a shadow device object.
    async fn delete_device(&self, alias: &str) -> AdapterResult<()>;
}

/// A shadow device on the Edge.
#[async_trait]
pub trait EdgeDevice: Send + Sync {
    fn alias(&self) -> &str;

    /// Register the resource set; returns the Edge endpoint name.
    async fn register(&self, resources: Vec<ResourceSpec>, update_capable: bool)
        -> AdapterResult<String>;

    async fn deregister(&self) -> AdapterResult<()>;

    async fn set_value(&self, path: &str, value: Value) -> AdapterResult<()>;

    /// Whether a resource path was registered.
    fn has_resource(&self, path: &str) -> bool;

    /// Install the listener for one operation, replacing any previous one.
    fn on(&self, operation: Operation, listener: OperationListener);
}

// ========== Cloud ==========

/// Entry returned by the Cloud directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudDevice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Remote device directory.
#[async_trait]
pub trait CloudDirectory: Send + Sync {
    /// Devices whose alias equals `alias`.
    async fn list_devices_by_alias(&self, alias: &str) -> AdapterResult<Vec<CloudDevice>>;
}

/// Builds a Cloud directory client for an API key.
pub trait CloudConnector: Send + Sync {
    fn connect(&self, api_key: &str) -> AdapterResult<Arc<dyn CloudDirectory>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_replies_once() {
        let (responder, rx) = EdgeResponder::channel();
        responder.respond(Ok("ok".into()));
        assert_eq!(rx.await.unwrap(), Ok("ok".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_responder_replies_mapping_error() {
        let (responder, rx) = EdgeResponder::channel();
        drop(responder);
        assert_eq!(rx.await.unwrap(), Err(InboundError::MappingFailed));
    }

    #[tokio::test]
    async fn test_panicking_task_still_replies() {
        let (responder, rx) = EdgeResponder::channel();
        let handle = tokio::spawn(async move {
            let _responder = responder;
            panic!("handler blew up");
        });
        assert!(handle.await.is_err());
        assert_eq!(rx.await.unwrap(), Err(InboundError::MappingFailed));
    }

    #[test]
    fn test_inbound_error_messages() {
        assert_eq!(InboundError::NoHandler.to_string(), "No handler");
        assert_eq!(InboundError::DeviceUnreachable.to_string(), "Device Unreachable");
        assert_eq!(InboundError::MappingFailed.to_string(), "Error mapping data");
        assert_eq!(
            InboundError::Application("busy".into()).to_string(),
            "busy"
        );
    }
}
