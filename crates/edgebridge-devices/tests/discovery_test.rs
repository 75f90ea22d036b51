//! Discovery, filtering and registration against simulated systems.

use edgebridge_core::{DiscoveredDevice, MAX_ALIAS_LEN};
use edgebridge_devices::{DiscoveryOutcome, FilterDecision, LifecycleError, LifecyclePhase, Operation};
use edgebridge_testing::{
    dimmable_lamp, eventually, test_config, thermometer, SimulatedBus, SimulatedDevice, TestBridge,
};
use serde_json::json;

fn lamp_type() -> DiscoveredDevice {
    DiscoveredDevice::new("Core/Devices/Lamp")
}

#[tokio::test]
async fn test_initial_scan_registers_devices() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(dimmable_lamp("lamp-1"));
    t.bus.add_device(thermometer("thermo-1"));
    t.start().await;

    let lamp = t.wait_bridged("lamp-1").await;
    t.wait_bridged("thermo-1").await;

    assert_eq!(t.alias("lamp-1"), "gw-relay-test-lamp-1");
    assert_eq!(lamp.owner_tag(), "mbed-devicejs-bridge");
    assert_eq!(lamp.update_capable(), Some(false));

    let power = lamp.resource("/3311/0/5850").unwrap();
    assert_eq!(power.operations, vec![Operation::Get, Operation::Put]);
    assert_eq!(power.value, json!(false));
    let brightness = lamp.resource("/3311/0/5851").unwrap();
    assert_eq!(brightness.value, json!(0));
    assert_eq!(lamp.resources().len(), 2);

    // listeners for every operation
    for op in Operation::ALL {
        assert!(lamp.listener(op).is_some(), "missing {} listener", op);
    }
}

#[tokio::test]
async fn test_binding_covers_every_capability() {
    let t = TestBridge::new(test_config());
    t.start().await;
    t.bus.discover(thermometer("thermo-1"));

    let thermo = t.wait_bridged("thermo-1").await;
    let paths: Vec<String> = thermo.resources().into_iter().map(|r| r.path).collect();
    assert!(paths.contains(&"/3303/0/5700".to_string()));
    // range statics
    assert!(paths.contains(&"/3303/0/5603".to_string()));
    assert!(paths.contains(&"/3303/0/5604".to_string()));

    let session = t.session("thermo-1").unwrap();
    assert_eq!(
        session.binding().capabilities(),
        &["Facades/HasTemperature".to_string()]
    );
}

#[tokio::test]
async fn test_repeated_discovery_registers_once() {
    let t = TestBridge::new(test_config());
    t.start().await;

    t.bus.discover(dimmable_lamp("lamp-1"));
    t.bus.discover(dimmable_lamp("lamp-1"));
    let lamp = t.wait_bridged("lamp-1").await;
    t.bus.discover(dimmable_lamp("lamp-1"));

    let lifecycle = t.bridge.lifecycle();
    let again = lifecycle
        .process_new_device("lamp-1", &lamp_type())
        .await
        .unwrap();
    assert_eq!(again, DiscoveryOutcome::Rejected(FilterDecision::AlreadyActive));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(t.edge.created(), 1);
    assert_eq!(lamp.registrations(), 1);
    assert_eq!(t.bridge.registry().len(), 1);
}

#[tokio::test]
async fn test_concurrent_discovery_registers_once() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(dimmable_lamp("lamp-1"));
    let lifecycle = t.bridge.lifecycle().clone();
    let device = lamp_type();

    let (a, b) = tokio::join!(
        lifecycle.process_new_device("lamp-1", &device),
        lifecycle.process_new_device("lamp-1", &device)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let registered = outcomes
        .iter()
        .filter(|o| matches!(o, DiscoveryOutcome::Registered { .. }))
        .count();
    assert_eq!(registered, 1);
    assert_eq!(t.edge.created(), 1);
    assert_eq!(lifecycle.phase("lamp-1"), LifecyclePhase::Active);
}

#[tokio::test]
async fn test_filter_precedence() {
    let mut config = test_config();
    config.white_list_by_id = vec!["both".to_string()];
    config.ignore_devices_by_id = vec!["both".to_string(), "ignored".to_string()];
    let t = TestBridge::new(config);
    let lifecycle = t.bridge.lifecycle();

    assert_eq!(lifecycle.evaluate("plain", "Lamp"), FilterDecision::Accept);
    assert_eq!(lifecycle.evaluate("ignored", "Lamp"), FilterDecision::Ignored);
    // whitelist wins over the ignore list
    assert_eq!(lifecycle.evaluate("both", "Lamp"), FilterDecision::Accept);
    assert_eq!(
        lifecycle.evaluate("plain", "MbedDeviceJSBridge"),
        FilterDecision::EdgeShadow
    );
    // default ignore list
    assert_eq!(lifecycle.evaluate("VirtualDeviceDriver", "x"), FilterDecision::Ignored);
}

#[tokio::test]
async fn test_whitelist_only() {
    let mut config = test_config();
    config.white_list_only = true;
    config.white_list_by_id = vec!["lamp-a".to_string()];
    let t = TestBridge::new(config);
    t.bus.add_device(dimmable_lamp("lamp-a"));
    t.bus.add_device(dimmable_lamp("lamp-b"));

    let lifecycle = t.bridge.lifecycle();
    let b = lifecycle.process_new_device("lamp-b", &lamp_type()).await.unwrap();
    assert_eq!(b, DiscoveryOutcome::Rejected(FilterDecision::NotWhitelisted));
    let a = lifecycle.process_new_device("lamp-a", &lamp_type()).await.unwrap();
    assert!(matches!(a, DiscoveryOutcome::Registered { .. }));
    assert_eq!(t.edge.aliases(), vec![t.alias("lamp-a")]);
}

#[tokio::test]
async fn test_device_without_mappable_capabilities() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(
        SimulatedDevice::new("odd", "Core/Devices/Odd").with_interface("Facades/Unknown"),
    );
    let outcome = t
        .bridge
        .lifecycle()
        .process_new_device("odd", &DiscoveredDevice::new("Core/Devices/Odd"))
        .await
        .unwrap();
    assert_eq!(outcome, DiscoveryOutcome::NothingToBridge);
    assert_eq!(t.edge.created(), 0);
    assert_eq!(t.bridge.lifecycle().phase("odd"), LifecyclePhase::Unseen);
}

#[tokio::test]
async fn test_interface_query_is_retried() {
    let t = TestBridge::new(test_config());
    t.start().await;
    t.bus.discover(thermometer("thermo-1").with_interface_failures(1));

    t.wait_bridged("thermo-1").await;
    assert_eq!(t.bus.interface_queries(), 2);
}

#[tokio::test]
async fn test_failed_registration_is_not_retained() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(dimmable_lamp("lamp-1"));
    t.edge.set_reject_registrations(true);

    let lifecycle = t.bridge.lifecycle();
    let err = lifecycle
        .process_new_device("lamp-1", &lamp_type())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Registration { .. }));
    assert!(!t.bridge.registry().contains("lamp-1"));
    assert_eq!(lifecycle.phase("lamp-1"), LifecyclePhase::Unseen);
    assert!(t.edge.aliases().is_empty());
    assert_eq!(t.edge.deleted(), vec!["gw-relay-test-lamp-1".to_string()]);

    // a later discovery tries again
    t.edge.set_reject_registrations(false);
    let outcome = lifecycle.process_new_device("lamp-1", &lamp_type()).await.unwrap();
    assert!(matches!(outcome, DiscoveryOutcome::Registered { .. }));
    assert_eq!(t.edge.aliases(), vec!["gw-relay-test-lamp-1".to_string()]);
}

#[tokio::test]
async fn test_long_device_id_alias_is_truncated() {
    let t = TestBridge::new(test_config());
    t.start().await;
    let long_id = format!("sensor-{}", "x".repeat(120));
    t.bus.discover(thermometer(&long_id));

    t.wait_bridged(&long_id).await;
    let alias = t.alias(&long_id);
    assert!(alias.len() <= MAX_ALIAS_LEN);
    assert!(alias.starts_with("gw-relay-test-sensor-"));
    assert_eq!(t.edge.aliases(), vec![alias]);
}

#[tokio::test]
async fn test_distinct_long_ids_get_distinct_aliases() {
    let t = TestBridge::with_bus(test_config(), SimulatedBus::new());
    let base = "y".repeat(100);
    let a = t.alias(&format!("{}-a", base));
    let b = t.alias(&format!("{}-b", base));
    assert_ne!(a, b);
    assert!(a.len() <= MAX_ALIAS_LEN && b.len() <= MAX_ALIAS_LEN);
}

#[tokio::test]
async fn test_cloud_id_is_resolved() {
    let t = TestBridge::new(test_config());
    t.cloud.insert(t.alias("lamp-1"), "cloud-123");
    t.bus.add_device(dimmable_lamp("lamp-1"));
    t.start().await;

    t.wait_bridged("lamp-1").await;
    let session = t.session("lamp-1").unwrap();
    eventually("cloud id", || session.cloud_id().is_some()).await;

    let map = t.bridge.device_map();
    let entry = &map["lamp-1"];
    assert_eq!(entry.edge_alias, "gw-relay-test-lamp-1");
    assert_eq!(entry.edge_endpoint_name, "gw-relay-test-lamp-1");
    assert_eq!(entry.cloud_id.as_deref(), Some("cloud-123"));
}

#[tokio::test]
async fn test_cloud_key_rotation() {
    let t = TestBridge::new(test_config());
    t.start().await;
    t.bus.rotate_cloud_key("key-2");

    eventually("reconnect", || t.cloud.connections().len() == 2).await;
    assert_eq!(t.cloud.connections(), vec!["test-key".to_string(), "key-2".to_string()]);
}
