use serde_json::Value;

/// Maximum depth of string re-decoding. Device firmwares occasionally ship
/// payloads where the message body is itself a JSON-encoded string.
const MAX_REDECODE_DEPTH: u8 = 2;

/// Extract the telemetry elements from a heterogeneous message envelope.
///
/// Shapes are tried in order, first match wins:
/// 1. the value is itself an array
/// 2. an array under `messages`, `data`, `payloads`, `body`, or `data.data`
/// 3. a JSON-encoded string under `payload` or `message`, decoded once and
///    re-matched
/// 4. fallback: the value itself as a single element
pub fn extract_elements(raw: &Value) -> Vec<Value> {
    extract_inner(raw, MAX_REDECODE_DEPTH)
}

fn extract_inner(raw: &Value, depth: u8) -> Vec<Value> {
    if raw.is_null() {
        return Vec::new();
    }

    if let Value::Array(items) = raw {
        return items.clone();
    }

    for field in ["messages", "data", "payloads", "body"] {
        if let Some(Value::Array(items)) = raw.get(field) {
            return items.clone();
        }
    }
    if let Some(Value::Array(items)) = raw.get("data").and_then(|d| d.get("data")) {
        return items.clone();
    }

    if depth > 0 {
        for field in ["payload", "message"] {
            if let Some(decoded) = decode_string_field(raw.get(field)) {
                let nested = extract_inner(&decoded, depth - 1);
                if !nested.is_empty() {
                    return nested;
                }
            }
        }
    }

    vec![raw.clone()]
}

/// Decode a field holding either a nested value or a JSON-encoded string.
fn decode_string_field(field: Option<&Value>) -> Option<Value> {
    match field? {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}
