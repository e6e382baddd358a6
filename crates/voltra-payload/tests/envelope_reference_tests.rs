//! Reference payloads captured from the broker push channels, decoded
//! end-to-end through the envelope matcher and normalizer.

use serde_json::json;
use voltra_payload::{decode_envelope, normalize_batch, AliasLookup};

fn lookup() -> AliasLookup {
    AliasLookup::from_static_table()
}

#[test]
fn mobile_push_bare_array() {
    let payload = json!([
        {"objectId": 34100, "instanceId": 1, "resourceId": 2, "value": 76},
        {"objectId": 34101, "instanceId": 1, "resourceId": 1, "value": 284},
        {"objectId": 34103, "instanceId": 1, "resourceId": 1, "value": "21.028511"},
        {"objectId": 34103, "instanceId": 1, "resourceId": 2, "value": "105.804817"}
    ])
    .to_string();

    let elements = decode_envelope(payload.as_bytes()).unwrap();
    let signals = normalize_batch(&elements, &lookup());

    assert_eq!(signals["battery_level"], json!(76));
    assert_eq!(signals["range"], json!(284));
    assert_eq!(signals["latitude"], json!(21.028511));
    assert_eq!(signals["longitude"], json!(105.804817));
}

#[test]
fn monitoring_push_wraps_messages() {
    let payload = json!({
        "version": "1.2",
        "timestamp": 1_700_000_000_000i64,
        "messages": [
            {"path": "/34102/1/1", "value": 63},
            {"path": "/34104/1/1", "value": "30.5"}
        ]
    })
    .to_string();

    let elements = decode_envelope(payload.as_bytes()).unwrap();
    let signals = normalize_batch(&elements, &lookup());

    assert_eq!(signals["speed"], json!(63));
    assert_eq!(signals["outside_temp"], json!(30.5));
}

#[test]
fn remctrl_push_double_encoded_body() {
    // The remote-control channel stringifies its body before publishing.
    let body = json!([{"deviceKey": "34106_1_1", "value": false}]).to_string();
    let payload = json!({ "payload": body }).to_string();

    let elements = decode_envelope(payload.as_bytes()).unwrap();
    let signals = normalize_batch(&elements, &lookup());

    assert_eq!(signals["is_locked"], json!(false));
}

#[test]
fn mixed_batch_keeps_good_elements() {
    let payload = json!({
        "data": [
            {"objectId": 34108, "instanceId": 1, "resourceId": 1, "value": 2.4},
            {"comment": "no address on this one"},
            {"objectId": 60000, "instanceId": 1, "resourceId": 1, "value": 1}
        ]
    })
    .to_string();

    let elements = decode_envelope(payload.as_bytes()).unwrap();
    let signals = normalize_batch(&elements, &lookup());

    assert_eq!(signals.len(), 1);
    assert_eq!(signals["tire_pressure_fl"], json!(2.4));
}
