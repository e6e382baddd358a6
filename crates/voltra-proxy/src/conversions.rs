//! Tolerant decoding of upstream response bodies.
//!
//! The backend nests payloads inconsistently across services (`data`,
//! `data.data`, `resources`, bare arrays) and reports numbers as strings in
//! places, so every extractor here is best-effort.

use common::{AliasResource, VehicleInfo};
use serde_json::Value;

/// Pull the payload array out of a response body, wherever it is nested.
pub fn extract_data_array(body: &Value) -> Vec<Value> {
    if let Value::Array(items) = body {
        return items.clone();
    }
    if let Some(Value::Array(items)) = body.get("data") {
        return items.clone();
    }
    if let Some(Value::Array(items)) = body.get("data").and_then(|d| d.get("data")) {
        return items.clone();
    }
    Vec::new()
}

/// Pull the alias catalogue out of a get-alias response body.
pub fn extract_alias_resources(body: &Value) -> Vec<Value> {
    if let Some(Value::Array(items)) = body.get("data").and_then(|d| d.get("resources")) {
        return items.clone();
    }
    if let Some(Value::Array(items)) = body
        .get("data")
        .and_then(|d| d.get("data"))
        .and_then(|d| d.get("resources"))
    {
        return items.clone();
    }
    if let Some(Value::Array(items)) = body.get("resources") {
        return items.clone();
    }
    extract_data_array(body)
}

/// Decode one vehicle-list entry. Entries without a VIN are dropped.
pub fn vehicle_from_value(value: &Value) -> Option<VehicleInfo> {
    let vin = non_empty_string(value.get("vinCode"))?;

    Some(VehicleInfo {
        vin,
        marketing_name: non_empty_string(value.get("marketingName")),
        variant: non_empty_string(value.get("vehicleVariant")),
        exterior_color: non_empty_string(value.get("exteriorColor"))
            .or_else(|| non_empty_string(value.get("color"))),
        interior_color: non_empty_string(value.get("interiorColor")),
        model_year: value.get("yearOfProduct").and_then(Value::as_i64).map(|y| y as i32),
        customized_name: non_empty_string(value.get("customizedVehicleName"))
            .or_else(|| non_empty_string(value.get("vehicleName"))),
        owner_type: non_empty_string(value.get("userVehicleType")),
        image_url: non_empty_string(value.get("vehicleImage")),
        profile_image_url: non_empty_string(value.get("profileImage")),
        warranty_expiration: non_empty_string(value.get("warrantyExpirationDate")),
        warranty_mileage: value.get("warrantyMileage").and_then(Value::as_i64),
        battery_capacity_kwh: parse_battery_capacity(value),
        alias_version: non_empty_string(value.get("vehicleAliasVersion")),
        player_id: non_empty_string(value.get("userId")),
    })
}

/// Decode one alias-catalogue entry.
pub fn alias_resource_from_value(value: &Value) -> Option<AliasResource> {
    let object_id = id_string(value.get("devObjID"));
    object_id.as_ref()?;

    Some(AliasResource {
        alias: non_empty_string(value.get("alias")),
        resource_name: non_empty_string(value.get("resourceName")),
        object_id,
        instance_id: id_string(value.get("devObjInstID")).or_else(|| Some("0".to_string())),
        resource_id: id_string(value.get("devRsrcID")).or_else(|| Some("0".to_string())),
    })
}

/// Battery capacity appears under several keys, as a number or a numeric
/// string.
pub fn parse_battery_capacity(value: &Value) -> Option<f64> {
    let raw = ["batteryCapacity", "battery_capacity", "batteryCapacityKwh", "batteryCapacityKWH"]
        .iter()
        .find_map(|key| value.get(*key))?;

    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) if !text.trim().is_empty() => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// Identifier fields arrive as strings or numbers.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_array_nesting_variants() {
        assert_eq!(extract_data_array(&json!([1, 2])).len(), 2);
        assert_eq!(extract_data_array(&json!({"data": [1]})).len(), 1);
        assert_eq!(extract_data_array(&json!({"data": {"data": [1, 2, 3]}})).len(), 3);
        assert!(extract_data_array(&json!({"message": "ok"})).is_empty());
    }

    #[test]
    fn test_alias_resource_nesting_variants() {
        let entry = json!({"devObjID": 34100, "alias": "battery_level"});
        for body in [
            json!({"data": {"resources": [entry]}}),
            json!({"data": {"data": {"resources": [entry]}}}),
            json!({"resources": [entry]}),
            json!([entry]),
        ] {
            assert_eq!(extract_alias_resources(&body).len(), 1, "body {body}");
        }
    }

    #[test]
    fn test_vehicle_requires_vin() {
        assert!(vehicle_from_value(&json!({"marketingName": "VF 8"})).is_none());

        let vehicle = vehicle_from_value(&json!({
            "vinCode": "VIN123",
            "marketingName": "VF 8",
            "vehicleName": "Family car",
            "yearOfProduct": 2023,
            "batteryCapacity": "87.7",
            "userId": "player-1"
        }))
        .unwrap();
        assert_eq!(vehicle.vin, "VIN123");
        assert_eq!(vehicle.customized_name.as_deref(), Some("Family car"));
        assert_eq!(vehicle.battery_capacity_kwh, Some(87.7));
        assert_eq!(vehicle.model_year, Some(2023));
    }

    #[test]
    fn test_battery_capacity_tolerates_shapes() {
        assert_eq!(parse_battery_capacity(&json!({"batteryCapacity": 87.7})), Some(87.7));
        assert_eq!(parse_battery_capacity(&json!({"batteryCapacityKwh": "90"})), Some(90.0));
        assert_eq!(parse_battery_capacity(&json!({"batteryCapacity": ""})), None);
        assert_eq!(parse_battery_capacity(&json!({})), None);
    }

    #[test]
    fn test_alias_resource_defaults_instance_and_resource_ids() {
        let resource = alias_resource_from_value(&json!({"devObjID": "34100"})).unwrap();
        assert_eq!(resource.object_id.as_deref(), Some("34100"));
        assert_eq!(resource.instance_id.as_deref(), Some("0"));
        assert_eq!(resource.resource_id.as_deref(), Some("0"));

        assert!(alias_resource_from_value(&json!({"alias": "x"})).is_none());
    }
}
