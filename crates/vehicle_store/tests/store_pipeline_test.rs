//! End-to-end store flows through the public API: vehicle list load, broker
//! push ingestion, and the switch/refresh lifecycle.

use common::{
    MockGeocodeClient, MockLinkControl, MockVehicleApi, MockWeatherClient, SignalMap,
    TelemetrySink, VehicleInfo,
};
use serde_json::json;
use std::sync::Arc;
use vehicle_store::VehicleStore;

fn vehicle(vin: &str) -> VehicleInfo {
    VehicleInfo {
        vin: vin.to_string(),
        marketing_name: Some("VF 8".to_string()),
        ..Default::default()
    }
}

fn telemetry_sample(object_id: &str, resource_id: &str, value: serde_json::Value) -> serde_json::Value {
    json!({
        "objectId": object_id,
        "instanceId": "1",
        "resourceId": resource_id,
        "value": value,
    })
}

fn store_with(api: MockVehicleApi) -> VehicleStore {
    let mut link = MockLinkControl::new();
    link.expect_switch_vehicle().returning(|_| Ok(()));
    VehicleStore::new(
        Arc::new(api),
        Arc::new(MockGeocodeClient::new()),
        Arc::new(MockWeatherClient::new()),
        Arc::new(link),
    )
}

#[tokio::test]
async fn load_then_push_then_switch_back_serves_cache() {
    let mut api = MockVehicleApi::new();
    api.expect_fetch_vehicles()
        .times(1)
        .returning(|| Ok(vec![vehicle("VIN111"), vehicle("VIN222")]));
    // Both the initial foreground fetch and the background prefetch answer
    // with battery level only.
    api.expect_fetch_telemetry()
        .returning(|_, _| Ok(vec![telemetry_sample("34100", "2", json!(55))]));

    let store = store_with(api);

    let first = store.load_vehicles().await.unwrap();
    assert_eq!(first.as_deref(), Some("VIN111"));

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.vehicles.len(), 2);
    assert_eq!(snapshot.signals["battery_level"], json!(55));
    assert!(snapshot.initialized);

    // A broker push updates the active vehicle without any REST traffic.
    store
        .ingest(
            "VIN111",
            SignalMap::from([("speed".to_string(), json!(88))]),
        )
        .await
        .unwrap();

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.signals["speed"], json!(88));
    assert_eq!(snapshot.signals["battery_level"], json!(55));
}

#[tokio::test]
async fn switching_between_vehicles_keeps_per_vehicle_state() {
    let mut api = MockVehicleApi::new();
    api.expect_fetch_vehicles()
        .times(1)
        .returning(|| Ok(vec![vehicle("VIN111"), vehicle("VIN222")]));
    api.expect_fetch_telemetry().returning(|vin, _| {
        let level = if vin == "VIN111" { 41 } else { 92 };
        Ok(vec![telemetry_sample("34100", "2", json!(level))])
    });

    let store = store_with(api);
    store.load_vehicles().await.unwrap();

    store.switch_vehicle("VIN222").await.unwrap();
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.active_vin.as_deref(), Some("VIN222"));
    assert_eq!(snapshot.signals["battery_level"], json!(92));

    // Back to the first vehicle: its cached telemetry is still there.
    store.switch_vehicle("VIN111").await.unwrap();
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.signals["battery_level"], json!(41));
}
