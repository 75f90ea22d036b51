//! Per-device outbound queues.
//!
//! The Bus dispatcher only routes: each state change or event goes onto the
//! queue of its device, and one worker task per device drains that queue
//! into [`PropagationEngine::on_change`]. Changes of a device reach the Edge
//! in Bus order, and an Edge call that never returns stalls that device only.

use crate::propagation::{ChangeKind, PropagationEngine};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Change {
    kind: ChangeKind,
    name: String,
    value: Value,
}

struct Worker {
    tx: mpsc::UnboundedSender<Change>,
    task: JoinHandle<()>,
}

/// Ordered outbound work, one queue per bridged device.
pub struct OutboundQueues {
    engine: Arc<PropagationEngine>,
    workers: DashMap<String, Worker>,
}

impl OutboundQueues {
    pub fn new(engine: Arc<PropagationEngine>) -> Self {
        Self {
            engine,
            workers: DashMap::new(),
        }
    }

    /// Queue a change behind earlier changes of the same device.
    pub fn enqueue(&self, device_id: &str, kind: ChangeKind, name: String, value: Value) {
        let change = Change { kind, name, value };
        let mut worker = self
            .workers
            .entry(device_id.to_string())
            .or_insert_with(|| self.spawn_worker(device_id));
        if let Err(mpsc::error::SendError(change)) = worker.tx.send(change) {
            tracing::warn!(device_id, "Outbound worker exited; restarting");
            *worker = self.spawn_worker(device_id);
            let _ = worker.tx.send(change);
        }
    }

    /// Drop a device's queue, abandoning changes still waiting in it.
    pub fn close(&self, device_id: &str) {
        if let Some((_, worker)) = self.workers.remove(device_id) {
            worker.task.abort();
        }
    }

    /// Devices with a live queue.
    pub fn active_devices(&self) -> usize {
        self.workers.len()
    }

    pub fn stop(&self) {
        for entry in self.workers.iter() {
            entry.value().task.abort();
        }
        self.workers.clear();
    }

    fn spawn_worker(&self, device_id: &str) -> Worker {
        let (tx, mut rx) = mpsc::unbounded_channel::<Change>();
        let engine = self.engine.clone();
        let device_id = device_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let _ = engine
                    .on_change(&device_id, change.kind, &change.name, &change.value)
                    .await;
            }
        });
        Worker { tx, task }
    }
}

impl Drop for OutboundQueues {
    fn drop(&mut self) {
        for entry in self.workers.iter() {
            entry.value().task.abort();
        }
    }
}
