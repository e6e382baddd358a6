use serde_json::Value;

/// Derive the canonical device key for one telemetry element.
///
/// The key comes from an explicit field when present (`deviceKey`,
/// `device_key`, `path`, `deviceId`, `device_id`), otherwise from the
/// (objectId, instanceId, resourceId) triple. Slash-delimited (`/a/b/c`)
/// and underscore-delimited (`a_b_c`) forms canonicalize to `a_b_c`.
///
/// Returns `None` when no key can be derived; such elements are dropped by
/// the normalizer without failing the batch.
pub fn canonical_device_key(element: &Value) -> Option<String> {
    let explicit = ["deviceKey", "device_key", "path", "deviceId", "device_id"]
        .iter()
        .find_map(|field| element.get(*field).and_then(Value::as_str));

    if let Some(raw) = explicit {
        return canonicalize(raw);
    }

    let object_id = address_part(element, "objectId")?;
    let instance_id = address_part(element, "instanceId")?;
    let resource_id = address_part(element, "resourceId")?;
    Some(format!("{}_{}_{}", object_id, instance_id, resource_id))
}

/// Canonicalize a raw key string into the underscore form.
fn canonicalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.contains('/') {
        let parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() == 3 {
            return Some(format!("{}_{}_{}", parts[0], parts[1], parts[2]));
        }
    }

    Some(trimmed.to_string())
}

/// Address components arrive as JSON numbers or strings depending on the
/// producer.
fn address_part(element: &Value, field: &str) -> Option<String> {
    match element.get(field)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
