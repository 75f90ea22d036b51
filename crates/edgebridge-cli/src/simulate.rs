//! `simulate`: the bridge against in-process Bus, Edge and Cloud simulators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use edgebridge_core::config::DEFAULT_RELAY_ID;
use edgebridge_core::BridgeConfig;
use edgebridge_devices::{Bridge, BridgeServices, Operation};
use edgebridge_testing::{dimmable_lamp, thermometer, SimulatedBus, SimulatedCloud, SimulatedEdge};
use serde_json::json;

use crate::load_mappings;

pub async fn simulate(mut config: BridgeConfig, lamps: usize) -> Result<()> {
    if config.relay_id == DEFAULT_RELAY_ID {
        config.relay_id = "simulated".to_string();
    }
    config.initial_push_delay_secs = 0;

    let bus = Arc::new(SimulatedBus::new());
    let lamp_ids: Vec<String> = (1..=lamps).map(|i| format!("lamp-{}", i)).collect();
    for id in &lamp_ids {
        bus.add_device(dimmable_lamp(id));
    }
    bus.add_device(thermometer("thermo-1"));

    let edge = Arc::new(SimulatedEdge::new());
    let cloud = Arc::new(SimulatedCloud::new());
    let mappings = load_mappings(&config)?;
    let bridge = Bridge::new(
        config,
        mappings,
        BridgeServices {
            bus: bus.clone(),
            edge: edge.clone(),
            cloud: Some(cloud),
        },
    );
    bridge.start().await?;

    let expected = lamp_ids.len() + 1;
    tokio::time::timeout(Duration::from_secs(10), async {
        while bridge.registry().len() < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("Simulated devices were not bridged in time")?;

    // one change in each direction
    if let Some(first) = lamp_ids.first() {
        bus.set_state(first, "brightness", json!(0.75));
        let alias = bridge.lifecycle().mapper().alias_for(first);
        let Some(device) = edge.device(&alias) else {
            bail!("Edge device {} missing", alias);
        };
        let reply = device.inject(Operation::Put, "/3311/0/5850", json!(false)).await;
        tracing::info!(device_id = %first, ?reply, "Inbound PUT answered");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = bridge.engine().reconcile_once().await?;
    tracing::info!(
        checked = report.checked,
        pushed = report.pushed,
        "Reconciliation pass"
    );

    println!("{}", serde_json::to_string_pretty(&bridge.device_map())?);
    bridge.stop();
    Ok(())
}
