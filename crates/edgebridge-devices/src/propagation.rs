//! Change Propagation Engine.
//!
//! ## Architecture
//!
//! ```text
//!            inbound (Edge → Bus)                 outbound (Bus → Edge)
//! Edge op ──→ operation table ──→ Bus get/set/call    Bus change ──→ sender table ──→ Edge set_value
//!                  │                                                     ↑
//!                  └─ exactly one reply per request     reconcile loop ──┘ (state cache vs last pushed)
//! ```
//!
//! Each inbound request, each outbound change and the reconciliation loop
//! run as independent tasks. The only shared state they touch is the
//! [`DeviceRegistry`] and the per-session fields.

use crate::adapter::{
    AdapterError, DeviceBus, EdgeReply, EdgeResponder, InboundError, InboundRequest,
    SelectionResponse, StateSnapshot,
};
use crate::protocol::{BusAction, Operation};
use crate::registry::DeviceRegistry;
use crate::session::DeviceSession;
use edgebridge_core::{BridgeConfig, ChangeDetection};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Engine settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagationConfig {
    pub change_detection: ChangeDetection,
    /// Read back state after inbound writes and suppress outbound echoes
    /// while the write is in flight.
    pub reflect_inbound_writes: bool,
}

impl From<&BridgeConfig> for PropagationConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            change_detection: config.change_detection.clone(),
            reflect_inbound_writes: config.reflect_inbound_writes,
        }
    }
}

/// Kind of Bus change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    State,
    Event,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::State => f.write_str("state"),
            ChangeKind::Event => f.write_str("event"),
        }
    }
}

/// Outbound propagation failures.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Sender for {kind} '{name}' produced no value")]
    NoValue { kind: ChangeKind, name: String },

    #[error("Edge resource {0} is not registered")]
    MissingResource(String),

    #[error("Edge set-value on {path} failed: {source}")]
    Edge {
        path: String,
        #[source]
        source: AdapterError,
    },

    #[error("Bus query failed: {0}")]
    Bus(#[from] AdapterError),
}

/// Result of an outbound trigger that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Pushed { path: String, value: Value },
    /// Echo of an inbound write in flight.
    Suppressed,
    /// The device has no outbound mapping for this name.
    NoSender,
    /// The device is not bridged.
    NotBridged,
}

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub pushed: usize,
    pub failed: usize,
}

/// Bidirectional propagation between the Bus and the Edge.
pub struct PropagationEngine {
    bus: Arc<dyn DeviceBus>,
    registry: Arc<DeviceRegistry>,
    config: PropagationConfig,
    warm_cache: RwLock<StateSnapshot>,
}

impl PropagationEngine {
    pub fn new(bus: Arc<dyn DeviceBus>, registry: Arc<DeviceRegistry>, config: PropagationConfig) -> Self {
        Self {
            bus,
            registry,
            config,
            warm_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    // ========== Edge → Bus ==========

    /// Handle one inbound Edge operation and answer it exactly once.
    pub async fn handle_inbound(
        &self,
        session: Arc<DeviceSession>,
        request: InboundRequest,
        responder: EdgeResponder,
    ) {
        let reply = self.dispatch_inbound(&session, &request).await;
        match &reply {
            Ok(_) => tracing::debug!(
                device_id = %session.device_id(),
                operation = %request.operation,
                path = %request.path,
                "Inbound operation applied"
            ),
            Err(e) => tracing::warn!(
                device_id = %session.device_id(),
                operation = %request.operation,
                path = %request.path,
                error = %e,
                "Inbound operation rejected"
            ),
        }
        responder.respond(reply);
    }

    async fn dispatch_inbound(&self, session: &Arc<DeviceSession>, request: &InboundRequest) -> EdgeReply {
        let device_id = session.device_id();
        let Some(bound) = session.binding().handler(request.operation, &request.path) else {
            return Err(InboundError::NoHandler);
        };

        let writes = request.operation != Operation::Get;
        let _echo_guard = (self.config.reflect_inbound_writes && writes).then(|| {
            session.begin_inbound();
            scopeguard::guard(session.clone(), |s| s.end_inbound())
        });

        let action = bound.prepare(&request.value).map_err(|e| {
            tracing::error!(
                device_id,
                operation = %request.operation,
                path = %request.path,
                error = %e,
                "Inbound value could not be mapped"
            );
            InboundError::MappingFailed
        })?;

        let responses = self.execute(device_id, &action).await.map_err(|e| {
            tracing::error!(
                device_id,
                operation = %request.operation,
                path = %request.path,
                error = %e,
                "Bus call failed"
            );
            InboundError::MappingFailed
        })?;

        let reply = interpret_response(device_id, &responses)?;

        if self.config.reflect_inbound_writes && writes {
            if let Some(state) = session.binding().reflected_state(&request.path) {
                self.reflect(session, state).await;
            }
        }
        Ok(reply)
    }

    async fn execute(&self, device_id: &str, action: &BusAction) -> Result<SelectionResponse, AdapterError> {
        match action {
            BusAction::Get { state } => self.bus.get(device_id, Some(state)).await,
            BusAction::Set { state, value } => self.bus.set(device_id, state, value.clone()).await,
            BusAction::Call { command, args } => self.bus.call(device_id, command, args.clone()).await,
        }
    }

    /// Push the authoritative Bus value of `state` after an inbound write.
    async fn reflect(&self, session: &DeviceSession, state: &str) {
        let device_id = session.device_id();
        let value = match self.bus.get(device_id, Some(state)).await {
            Ok(responses) => match responses.get(device_id) {
                Some(r) if r.received_response && r.error.is_none() => r.result.clone(),
                _ => return,
            },
            Err(e) => {
                tracing::warn!(device_id, state, error = %e, "Read-back after write failed");
                return;
            }
        };
        if let Err(e) = self.push_unchecked(session, ChangeKind::State, state, &value).await {
            tracing::warn!(device_id, state, error = %e, "Reflecting state to Edge failed");
        }
    }

    // ========== Bus → Edge ==========

    /// Route a Bus change to the Edge. Failures are logged and returned.
    pub async fn on_change(
        &self,
        device_id: &str,
        kind: ChangeKind,
        name: &str,
        value: &Value,
    ) -> Result<PushOutcome, PropagationError> {
        let Some(session) = self.registry.get(device_id) else {
            tracing::trace!(device_id, name, "Change for a device that is not bridged");
            return Ok(PushOutcome::NotBridged);
        };
        let result = self.push_change(&session, kind, name, value).await;
        if let Err(e) = &result {
            tracing::error!(device_id, %kind, name, error = %e, "Outbound propagation failed");
        }
        result
    }

    /// Push a change for a known session.
    pub async fn push_change(
        &self,
        session: &DeviceSession,
        kind: ChangeKind,
        name: &str,
        value: &Value,
    ) -> Result<PushOutcome, PropagationError> {
        if session.is_echo_suppressed() {
            tracing::debug!(device_id = %session.device_id(), %kind, name, "Suppressing echo of inbound write");
            return Ok(PushOutcome::Suppressed);
        }
        self.push_unchecked(session, kind, name, value).await
    }

    async fn push_unchecked(
        &self,
        session: &DeviceSession,
        kind: ChangeKind,
        name: &str,
        value: &Value,
    ) -> Result<PushOutcome, PropagationError> {
        let binding = session.binding();
        let sender = match kind {
            ChangeKind::State => binding.state_sender(name),
            ChangeKind::Event => binding.event_sender(name),
        };
        let Some(sender) = sender else {
            tracing::trace!(device_id = %session.device_id(), %kind, name, "No outbound mapping");
            return Ok(PushOutcome::NoSender);
        };

        let edge_value = sender.transform(value).ok_or_else(|| PropagationError::NoValue {
            kind,
            name: name.to_string(),
        })?;

        let edge = session.edge();
        if !edge.has_resource(&sender.path) {
            return Err(PropagationError::MissingResource(sender.path.clone()));
        }
        edge.set_value(&sender.path, edge_value.clone())
            .await
            .map_err(|source| PropagationError::Edge {
                path: sender.path.clone(),
                source,
            })?;

        if kind == ChangeKind::State {
            session.record_pushed(name, value.clone());
        }
        tracing::debug!(
            device_id = %session.device_id(),
            %kind,
            name,
            path = %sender.path,
            value = %edge_value,
            "Pushed to Edge"
        );
        Ok(PushOutcome::Pushed {
            path: sender.path.clone(),
            value: edge_value,
        })
    }

    // ========== Reconciliation ==========

    /// Compare the Bus state cache with the last pushed values and push
    /// every difference.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, PropagationError> {
        let snapshot = self.bus.state_cache().await?;

        // a stuck device must not hold up the others
        let passes = self.registry.sessions().into_iter().filter_map(|session| {
            let polled = snapshot.get(session.device_id())?;
            Some(async move { self.reconcile_session(&session, polled).await })
        });
        let report = futures::future::join_all(passes)
            .await
            .into_iter()
            .fold(ReconcileReport::default(), |total, pass| ReconcileReport {
                checked: total.checked + pass.checked,
                pushed: total.pushed + pass.pushed,
                failed: total.failed + pass.failed,
            });

        if report.pushed > 0 || report.failed > 0 {
            tracing::info!(
                checked = report.checked,
                pushed = report.pushed,
                failed = report.failed,
                "Reconciliation pass corrected drift"
            );
        }
        Ok(report)
    }

    async fn reconcile_session(
        &self,
        session: &DeviceSession,
        polled: &HashMap<String, Value>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for (state, last_pushed) in session.tracked_states() {
            if session.binding().state_sender(&state).is_none() {
                continue;
            }
            let Some(current) = polled.get(&state) else {
                continue;
            };
            report.checked += 1;
            if !self.config.change_detection.differs(current, &last_pushed) {
                continue;
            }
            match self.push_change(session, ChangeKind::State, &state, current).await {
                Ok(PushOutcome::Pushed { .. }) => report.pushed += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        device_id = %session.device_id(),
                        state = %state,
                        error = %e,
                        "Reconciliation push failed; will retry next cycle"
                    );
                }
            }
        }
        report
    }

    /// Run [`Self::reconcile_once`] every `every`, starting one period from now.
    pub fn spawn_reconciliation(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            // skip the immediate first tick
            timer.tick().await;
            loop {
                timer.tick().await;
                if let Err(e) = engine.reconcile_once().await {
                    tracing::warn!(error = %e, "Reconciliation pass failed");
                }
            }
        })
    }

    // ========== Initial push ==========

    /// Load the Bus state cache so initial pushes avoid a live query.
    pub async fn warm_cache(&self) -> Result<usize, PropagationError> {
        let snapshot = self.bus.state_cache().await?;
        let count = snapshot.len();
        *self.warm_cache.write() = snapshot;
        tracing::info!(devices = count, "Warmed initial state cache");
        Ok(count)
    }

    /// Push every state flagged for initial push. Returns how many were pushed.
    ///
    /// Uses (and consumes) the warm cache entry for the device when there is
    /// one, otherwise queries the Bus once; a failed query is not retried.
    pub async fn initial_push(&self, session: &DeviceSession) -> usize {
        let device_id = session.device_id();
        let states = session.binding().initial_push();
        if states.is_empty() {
            return 0;
        }

        let cached = self.warm_cache.write().remove(device_id);
        let values = match cached {
            Some(values) => values,
            None => match self.live_states(device_id).await {
                Ok(values) => values,
                Err(e) => {
                    tracing::error!(device_id, error = %e, "Initial state query failed");
                    return 0;
                }
            },
        };

        let mut pushed = 0;
        for state in states {
            let Some(value) = values.get(state) else {
                continue;
            };
            match self.push_change(session, ChangeKind::State, state, value).await {
                Ok(PushOutcome::Pushed { .. }) => pushed += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(device_id, state = %state, error = %e, "Initial push failed"),
            }
        }
        pushed
    }

    async fn live_states(&self, device_id: &str) -> Result<HashMap<String, Value>, PropagationError> {
        let responses = self.bus.get(device_id, None).await?;
        match responses.get(device_id) {
            Some(r) if r.received_response && r.error.is_none() => Ok(r
                .result
                .as_object()
                .map(|states| states.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()),
            _ => Err(PropagationError::Bus(AdapterError::DeviceNotFound(
                device_id.to_string(),
            ))),
        }
    }
}

/// Map a selector response onto the Edge reply.
fn interpret_response(device_id: &str, responses: &SelectionResponse) -> EdgeReply {
    match responses.get(device_id) {
        Some(r) if r.received_response => match &r.error {
            None | Some(Value::Null) => Ok("ok".to_string()),
            Some(Value::String(message)) => Err(InboundError::Application(message.clone())),
            Some(other) => Err(InboundError::Application(other.to_string())),
        },
        _ => Err(InboundError::DeviceUnreachable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DeviceResponse;
    use serde_json::json;

    fn responses(device_id: &str, response: DeviceResponse) -> SelectionResponse {
        HashMap::from([(device_id.to_string(), response)])
    }

    #[test]
    fn test_interpret_ok() {
        let r = responses("d", DeviceResponse::ok(json!(null)));
        assert_eq!(interpret_response("d", &r), Ok("ok".to_string()));
    }

    #[test]
    fn test_interpret_application_error() {
        let r = responses("d", DeviceResponse::error("busy"));
        assert_eq!(
            interpret_response("d", &r),
            Err(InboundError::Application("busy".into()))
        );
        let r = responses("d", DeviceResponse::error(json!({"code": 7})));
        assert_eq!(
            interpret_response("d", &r),
            Err(InboundError::Application("{\"code\":7}".into()))
        );
    }

    #[test]
    fn test_interpret_unreachable() {
        let r = responses("d", DeviceResponse::unreachable());
        assert_eq!(interpret_response("d", &r), Err(InboundError::DeviceUnreachable));
        assert_eq!(
            interpret_response("d", &HashMap::new()),
            Err(InboundError::DeviceUnreachable)
        );
    }
}
