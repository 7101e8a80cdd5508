//! Device lifecycle tests
//!
//! Uses a mock connector to check connection replacement, message handling
//! and the energy reset action without a broker.

mod common;

use common::MockConnector;
use grott_devices::{
    CapabilitySink, CapabilityValue, ConnectionSettings, ConnectionStatus, DriverError,
    GrottDevice, MemoryCapabilitySink,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn device(connector: &MockConnector, sink: &Arc<MemoryCapabilitySink>) -> GrottDevice {
    GrottDevice::new(
        "Grott MQTT",
        ConnectionSettings::new("broker-a").with_topic("energy/growatt"),
        sink.clone(),
        Arc::new(connector.clone()),
    )
}

#[tokio::test]
async fn test_init_registers_capabilities_and_connects() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);

    device.init().await.unwrap();

    assert!(sink.has_capability("measure_power").await);
    assert!(sink.has_capability("meter_power.today").await);
    assert!(device.is_connected().await);
    assert_eq!(device.status().await, ConnectionStatus::Connected);
    assert_eq!(connector.events(), vec!["open:1:broker-a:1883"]);
}

#[tokio::test]
async fn test_new_settings_close_previous_connection_first() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);

    device.init().await.unwrap();
    device
        .apply_settings(ConnectionSettings::new("broker-b").with_port(1884))
        .await
        .unwrap();
    device
        .apply_settings(ConnectionSettings::new("broker-c"))
        .await
        .unwrap();

    assert_eq!(
        connector.events(),
        vec![
            "open:1:broker-a:1883",
            "close:1",
            "open:2:broker-b:1884",
            "close:2",
            "open:3:broker-c:1883",
        ]
    );
    assert_eq!(connector.max_open_sessions(), 1);
    assert_eq!(connector.open_sessions(), 1);
    assert_eq!(device.settings().await.host, "broker-c");
}

#[tokio::test]
async fn test_invalid_settings_are_rejected_before_reconnecting() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);

    device.init().await.unwrap();
    let result = device.apply_settings(ConnectionSettings::new("")).await;

    assert!(matches!(result, Err(DriverError::Configuration(_))));
    assert_eq!(connector.events(), vec!["open:1:broker-a:1883"]);
    assert!(device.is_connected().await);
}

#[tokio::test]
async fn test_inbound_packet_updates_capabilities() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    let payload = json!({
        "device": "NTCRBLR00Y",
        "time": "2024-06-01T12:00:00",
        "values": {"pvserial": "ABC123", "pvpowerout": 12345, "pvenergytoday": 543}
    });
    connector
        .deliver("energy/growatt", payload.to_string().as_bytes())
        .await;

    assert_eq!(
        sink.capability_value("measure_power").await,
        Some(CapabilityValue::Number(1234.5))
    );
    assert_eq!(
        sink.capability_value("meter_power.today").await,
        Some(CapabilityValue::Number(54.3))
    );
    assert_eq!(
        device.last_packet().await.unwrap().device(),
        Some("NTCRBLR00Y")
    );
    assert!(device.last_seen().await.is_some());
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_and_next_message_processed() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    connector.deliver("energy/growatt", b"{not json").await;
    assert!(sink.writes().await.is_empty());
    assert!(device.last_packet().await.is_none());
    assert!(device.is_connected().await);

    connector
        .deliver("energy/growatt", br#"{"values":{"pvpowerout":20}}"#)
        .await;
    assert_eq!(
        sink.capability_value("measure_power").await,
        Some(CapabilityValue::Number(2.0))
    );
}

#[tokio::test]
async fn test_reset_without_packet_is_a_no_op() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    let republished = device.reset_energy_today().await.unwrap();

    assert!(!republished);
    assert!(connector.published().is_empty());
}

#[tokio::test]
async fn test_reset_republishes_packet_with_energy_today_zeroed() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    let original = json!({
        "device": "NTCRBLR00Y",
        "time": "2024-06-01T12:00:00",
        "values": {"pvenergytoday": 543, "pvenergytotal": 98765, "pvserial": "ABC123"}
    });
    connector
        .deliver("energy/growatt", original.to_string().as_bytes())
        .await;

    assert!(device.reset_energy_today().await.unwrap());

    let published = connector.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "energy/growatt");

    let republished: Value = serde_json::from_slice(&published[0].1).unwrap();
    let mut expected = original.clone();
    expected["values"]["pvenergytoday"] = json!(0);
    assert_eq!(republished, expected);
}

#[tokio::test]
async fn test_reset_minimal_packet() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    connector
        .deliver("energy/growatt", br#"{"values":{"pvenergytoday":543}}"#)
        .await;
    device.reset_energy_today().await.unwrap();

    let republished: Value = serde_json::from_slice(&connector.published()[0].1).unwrap();
    assert_eq!(republished, json!({"values": {"pvenergytoday": 0}}));
}

#[tokio::test]
async fn test_reset_uses_current_topic() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    connector
        .deliver("energy/growatt", br#"{"values":{"pvenergytoday":543}}"#)
        .await;
    device
        .apply_settings(ConnectionSettings::new("broker-a").with_topic("grott/data"))
        .await
        .unwrap();
    device.reset_energy_today().await.unwrap();

    assert_eq!(connector.published()[0].0, "grott/data");
}

#[tokio::test]
async fn test_reset_after_delete_is_a_no_op() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);
    device.init().await.unwrap();

    connector
        .deliver("energy/growatt", br#"{"values":{"pvenergytoday":543}}"#)
        .await;
    device.deleted().await;

    assert!(!device.is_connected().await);
    assert_eq!(connector.open_sessions(), 0);
    assert!(!device.reset_energy_today().await.unwrap());
}

#[tokio::test]
async fn test_reset_without_connection_fails() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);

    device
        .processor()
        .process_payload(br#"{"values":{"pvenergytoday":543}}"#)
        .await
        .unwrap();

    let result = device.reset_energy_today().await;
    assert!(matches!(result, Err(DriverError::NotConnected)));
}

#[tokio::test]
async fn test_rename_updates_name() {
    let connector = MockConnector::new();
    let sink = Arc::new(MemoryCapabilitySink::recording());
    let device = device(&connector, &sink);

    device.added().await;
    device.renamed("Roof inverter").await;

    assert_eq!(device.name().await, "Roof inverter");
}
