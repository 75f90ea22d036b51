//! Event bus for the bridge.
//!
//! The Bus adapter publishes [`BridgeEvent`]s here; the bridge service
//! subscribes once and dispatches each event to the lifecycle manager or
//! the propagation engine. Slow subscribers skip lagged events rather than
//! blocking publishers.

use crate::event::{BridgeEvent, EventMetadata};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events buffered per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(BridgeEvent, EventMetadata)>,
    name: String,
}

impl EventBus {
    /// A bus buffering [`DEFAULT_CHANNEL_CAPACITY`] events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// A bus buffering `capacity` events per subscriber before it lags.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// A named bus, for logs.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event from the Bus adapter. `false` when nobody listens.
    pub fn publish(&self, event: BridgeEvent) -> bool {
        self.publish_with_source(event, "bus")
    }

    /// Publish an event, recording `source` in its metadata.
    pub fn publish_with_source(&self, event: BridgeEvent, source: impl Into<String>) -> bool {
        self.tx.send((event, EventMetadata::new(source))).is_ok()
    }

    /// Every event from now on.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Events for which `filter` returns `true`.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&BridgeEvent) -> bool + Send + 'static,
    {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Subscribe to state and event changes only.
    pub fn change_events(&self) -> FilteredReceiver<fn(&BridgeEvent) -> bool> {
        self.subscribe_filtered(BridgeEvent::is_change_event as fn(&BridgeEvent) -> bool)
    }

    /// Subscribe to discovery and unregister notifications only.
    pub fn lifecycle_events(&self) -> FilteredReceiver<fn(&BridgeEvent) -> bool> {
        self.subscribe_filtered(BridgeEvent::is_lifecycle_event as fn(&BridgeEvent) -> bool)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

/// Unfiltered subscription.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(BridgeEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is closed. Lagged events are skipped
    /// with a warning.
    pub async fn recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged; reconciliation will catch up");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Subscription that drops events failing its filter.
pub struct FilteredReceiver<F>
where
    F: Fn(&BridgeEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(BridgeEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&BridgeEvent) -> bool + Send,
{
    pub async fn recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered matching event, if any.
    pub fn try_recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}
