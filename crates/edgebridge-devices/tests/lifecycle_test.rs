//! Device removal and shutdown.

use edgebridge_devices::{InboundError, LifecycleError, LifecyclePhase, Operation};
use edgebridge_testing::{dimmable_lamp, eventually, test_config, TestBridge};
use serde_json::json;

#[tokio::test]
async fn test_unregister_cleans_up() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(dimmable_lamp("lamp-1"));
    t.start().await;
    let lamp = t.wait_bridged("lamp-1").await;
    let alias = t.alias("lamp-1");

    t.bus.unregister("lamp-1");
    eventually("removal", || {
        !t.bridge.registry().contains("lamp-1") && !t.edge.deleted().is_empty()
    })
    .await;

    assert_eq!(lamp.deregistrations(), 1);
    assert!(!lamp.is_registered());
    assert_eq!(t.edge.deleted(), vec![alias.clone()]);
    assert!(t.bridge.registry().get_by_alias(&alias).is_none());
    assert!(t.bridge.device_map().is_empty());
    assert_eq!(t.bridge.lifecycle().phase("lamp-1"), LifecyclePhase::Unseen);

    // late changes are no longer propagated
    t.bus.set_state("lamp-1", "brightness", json!(0.9));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(lamp.writes().is_empty());
    assert_eq!(
        lamp.inject(Operation::Put, "/3311/0/5851", json!(1)).await,
        Err(InboundError::NoHandler)
    );
}

#[tokio::test]
async fn test_removing_unknown_device_changes_nothing() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(dimmable_lamp("lamp-1"));
    t.start().await;
    let lamp = t.wait_bridged("lamp-1").await;

    let err = t.bridge.lifecycle().remove_device("nobody").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotMapped(ref id) if id == "nobody"));
    assert_eq!(err.to_string(), "Can't find a mapped ID of nobody");

    assert!(t.bridge.registry().contains("lamp-1"));
    assert_eq!(lamp.deregistrations(), 0);
    assert!(t.edge.deleted().is_empty());
}

#[tokio::test]
async fn test_device_can_return_after_removal() {
    let t = TestBridge::new(test_config());
    t.start().await;
    t.bus.discover(dimmable_lamp("lamp-1"));
    t.wait_bridged("lamp-1").await;

    t.bridge.lifecycle().remove_device("lamp-1").await.unwrap();
    assert!(!t.bridge.registry().contains("lamp-1"));

    t.bus.discover(dimmable_lamp("lamp-1"));
    let lamp = t.wait_bridged("lamp-1").await;
    assert_eq!(t.edge.created(), 2);
    assert_eq!(lamp.registrations(), 1);
}

#[tokio::test]
async fn test_stop_halts_propagation() {
    let t = TestBridge::new(test_config());
    t.bus.add_device(dimmable_lamp("lamp-1"));
    t.start().await;
    let lamp = t.wait_bridged("lamp-1").await;

    t.bridge.stop();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    t.bus.set_state("lamp-1", "brightness", json!(0.9));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(lamp.writes().is_empty());
    // Edge registrations survive a stop
    assert!(lamp.is_registered());
}
