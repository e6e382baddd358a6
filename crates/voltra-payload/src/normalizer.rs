use crate::alias::AliasLookup;
use crate::device_key::canonical_device_key;
use crate::envelope::extract_elements;
use crate::error::{PayloadError, Result};
use common::SignalMap;
use serde_json::Value;
use tracing::trace;

/// Fields a telemetry element may carry its reading under.
const VALUE_FIELDS: &[&str] = &["value", "resourceValue", "val", "data"];

/// Decode a raw broker payload into its telemetry elements.
///
/// The payload must be UTF-8 JSON; the envelope may take any of the shapes
/// handled by [`extract_elements`].
pub fn decode_envelope(payload: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let raw: Value = serde_json::from_str(text)
        .map_err(|_| PayloadError::NotJson(text.chars().take(100).collect()))?;
    Ok(extract_elements(&raw))
}

/// Normalize a batch of telemetry elements into a flat signal map.
///
/// Parsing is best-effort: elements with no derivable device key, no alias
/// match, or no readable value are dropped without failing the batch.
pub fn normalize_batch(elements: &[Value], aliases: &AliasLookup) -> SignalMap {
    let mut signals = SignalMap::new();

    for element in elements {
        if !element.is_object() {
            continue;
        }
        let Some(device_key) = canonical_device_key(element) else {
            trace!("dropping telemetry element without device key");
            continue;
        };
        let Some(alias) = aliases.alias_for(&device_key) else {
            trace!(device_key = %device_key, "dropping unmapped telemetry element");
            continue;
        };
        let Some(value) = element_value(element) else {
            continue;
        };
        signals.insert(alias.to_string(), value);
    }

    signals
}

/// Pull the reading out of an element, coercing numeric strings to numbers.
fn element_value(element: &Value) -> Option<Value> {
    let raw = VALUE_FIELDS.iter().find_map(|field| element.get(*field))?;
    match raw {
        Value::Null => None,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<f64>() {
                Ok(number) if number.is_finite() => {
                    serde_json::Number::from_f64(number).map(Value::Number)
                }
                _ => Some(Value::String(trimmed.to_string())),
            }
        }
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup() -> AliasLookup {
        AliasLookup::from_static_table()
    }

    #[test]
    fn test_normalize_maps_known_addresses() {
        let elements = vec![
            json!({"objectId": 34100, "instanceId": 1, "resourceId": 2, "value": 84}),
            json!({"deviceKey": "34103_1_1", "value": "21.0278"}),
        ];
        let signals = normalize_batch(&elements, &lookup());
        assert_eq!(signals["battery_level"], json!(84));
        assert_eq!(signals["latitude"], json!(21.0278));
    }

    #[test]
    fn test_malformed_elements_do_not_abort_the_batch() {
        let elements = vec![
            json!("not an object"),
            json!({"value": 12}),
            json!({"deviceKey": "1_2_3", "value": 9}),
            json!({"deviceKey": "34101_1_1", "value": 310}),
        ];
        let signals = normalize_batch(&elements, &lookup());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals["range"], json!(310));
    }

    #[test]
    fn test_value_field_variants() {
        let elements = vec![
            json!({"deviceKey": "34102_1_1", "resourceValue": 57}),
            json!({"deviceKey": "34104_1_1", "val": "31.5"}),
            json!({"deviceKey": "34106_1_1", "data": true}),
        ];
        let signals = normalize_batch(&elements, &lookup());
        assert_eq!(signals["speed"], json!(57));
        assert_eq!(signals["outside_temp"], json!(31.5));
        assert_eq!(signals["is_locked"], json!(true));
    }

    #[test]
    fn test_non_numeric_strings_pass_through() {
        let elements = vec![json!({"deviceKey": "34102_1_4", "value": "D"})];
        let signals = normalize_batch(&elements, &lookup());
        assert_eq!(signals["gear_position"], json!("D"));
    }

    #[test]
    fn test_null_and_empty_values_dropped() {
        let elements = vec![
            json!({"deviceKey": "34101_1_1", "value": null}),
            json!({"deviceKey": "34102_1_1", "value": "  "}),
        ];
        assert!(normalize_batch(&elements, &lookup()).is_empty());
    }

    #[test]
    fn test_decode_envelope_rejects_non_json() {
        assert!(matches!(
            decode_envelope(b"hello world"),
            Err(PayloadError::NotJson(_))
        ));
        assert!(matches!(
            decode_envelope(&[0xff, 0xfe]),
            Err(PayloadError::NotUtf8)
        ));
    }

    #[test]
    fn test_decode_envelope_unwraps_nested_shapes() {
        let payload = json!({"messages": [{"deviceKey": "34101_1_1", "value": 300}]}).to_string();
        let elements = decode_envelope(payload.as_bytes()).unwrap();
        assert_eq!(elements.len(), 1);
    }
}
