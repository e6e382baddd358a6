use common::{SignalMap, VehicleInfo};
use serde_json::Value;

/// Cached telemetry older than this is considered stale.
pub const CACHE_TTL_MS: i64 = 5 * 60 * 1000;

/// Entries timestamped further than this into the future are rejected as
/// clock skew.
pub const FUTURE_SKEW_MS: i64 = 5 * 60 * 1000;

/// Signals whose presence marks a cache entry as holding real telemetry.
pub const TELEMETRY_SIGNALS: &[&str] = &[
    "battery_level",
    "range",
    "speed",
    "odometer",
    "remaining_charging_time",
    "battery_health_12v",
    "soh_percentage",
    "tire_pressure_fl",
    "tire_pressure_fr",
    "tire_pressure_rl",
    "tire_pressure_rr",
    "latitude",
    "longitude",
    "outside_temp",
    "inside_temp",
];

/// Per-vehicle cache entry: merged signals plus the vehicle-list info that
/// seeded it. Entries are created on first fetch or vehicle-list retrieval
/// and never destroyed.
#[derive(Debug, Clone, Default)]
pub struct VehicleCacheEntry {
    pub vin: String,
    pub info: Option<VehicleInfo>,
    pub signals: SignalMap,
    pub last_updated_ms: Option<i64>,
}

impl VehicleCacheEntry {
    pub fn new(vin: &str) -> Self {
        Self {
            vin: vin.to_string(),
            ..Default::default()
        }
    }

    /// Merge incoming signals into the entry.
    ///
    /// With `skip_nulls` (REST partials) a null value means "no signal" and
    /// never wipes a previously known good value; without it (authoritative
    /// broker pushes) nulls overwrite.
    pub fn merge_signals(&mut self, incoming: &SignalMap, skip_nulls: bool, now_ms: i64) {
        for (key, value) in incoming {
            if skip_nulls && value.is_null() {
                continue;
            }
            self.signals.insert(key.clone(), value.clone());
        }
        self.last_updated_ms = Some(now_ms);
    }

    /// Whether the entry holds telemetry fresh enough to show without a
    /// refresh: recently updated, not timestamped in the future, and at
    /// least one real signal value.
    pub fn has_fresh_telemetry(&self, now_ms: i64) -> bool {
        let Some(last_updated) = self.last_updated_ms else {
            return false;
        };
        if last_updated > now_ms + FUTURE_SKEW_MS {
            return false;
        }
        if now_ms - last_updated > CACHE_TTL_MS {
            return false;
        }

        TELEMETRY_SIGNALS
            .iter()
            .any(|signal| self.signals.get(*signal).map(is_real_value).unwrap_or(false))
    }

    /// Valid coordinate pair from the cached signals, if any.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = coord_number(self.signals.get("latitude")?)?;
        let lon = coord_number(self.signals.get("longitude")?)?;
        valid_coordinates(lat, lon).then_some((lat, lon))
    }
}

/// Coordinates arrive as numbers or numeric strings.
pub fn coord_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

fn is_real_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) => true,
        Value::Number(number) => number.as_f64().map(f64::is_finite).unwrap_or(false),
        Value::String(text) => {
            let trimmed = text.trim();
            !trimmed.is_empty() && trimmed != "--"
        }
        _ => false,
    }
}

/// Read-only view of the store for the presentation layer.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub active_vin: Option<String>,
    pub vehicles: Vec<VehicleInfo>,
    pub signals: SignalMap,
    pub last_updated_ms: Option<i64>,
    pub refreshing: bool,
    pub enriching: bool,
    pub scanning: bool,
    pub initialized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn entry_with(signals: &[(&str, Value)], last_updated_ms: Option<i64>) -> VehicleCacheEntry {
        let mut entry = VehicleCacheEntry::new("VIN123");
        for (key, value) in signals {
            entry.signals.insert(key.to_string(), value.clone());
        }
        entry.last_updated_ms = last_updated_ms;
        entry
    }

    #[test]
    fn test_merge_skips_nulls_for_rest_partials() {
        let mut entry = entry_with(&[("battery_level", json!(80))], Some(NOW_MS - 1000));
        let mut incoming = SignalMap::new();
        incoming.insert("battery_level".to_string(), Value::Null);
        incoming.insert("odometer".to_string(), json!(12_000));

        entry.merge_signals(&incoming, true, NOW_MS);

        assert_eq!(entry.signals["battery_level"], json!(80));
        assert_eq!(entry.signals["odometer"], json!(12_000));
        assert_eq!(entry.last_updated_ms, Some(NOW_MS));
    }

    #[test]
    fn test_merge_preserves_nulls_for_broker_pushes() {
        let mut entry = entry_with(&[("battery_level", json!(80))], Some(NOW_MS - 1000));
        let mut incoming = SignalMap::new();
        incoming.insert("battery_level".to_string(), Value::Null);

        entry.merge_signals(&incoming, false, NOW_MS);

        assert!(entry.signals["battery_level"].is_null());
    }

    #[test]
    fn test_fresh_within_ttl_with_real_values() {
        let entry = entry_with(&[("battery_level", json!(80))], Some(NOW_MS - 2 * 60 * 1000));
        assert!(entry.has_fresh_telemetry(NOW_MS));
    }

    #[test]
    fn test_stale_beyond_ttl() {
        let entry = entry_with(&[("battery_level", json!(80))], Some(NOW_MS - 10 * 60 * 1000));
        assert!(!entry.has_fresh_telemetry(NOW_MS));
    }

    #[test]
    fn test_future_timestamp_is_not_fresh() {
        let entry = entry_with(&[("battery_level", json!(80))], Some(NOW_MS + 10 * 60 * 1000));
        assert!(!entry.has_fresh_telemetry(NOW_MS));
    }

    #[test]
    fn test_placeholder_values_are_not_real_telemetry() {
        let entry = entry_with(
            &[
                ("battery_level", Value::Null),
                ("battery_health_12v", json!("--")),
                ("inside_temp", json!("")),
            ],
            Some(NOW_MS),
        );
        assert!(!entry.has_fresh_telemetry(NOW_MS));
    }

    #[test]
    fn test_entry_without_timestamp_is_not_fresh() {
        let entry = entry_with(&[("battery_level", json!(80))], None);
        assert!(!entry.has_fresh_telemetry(NOW_MS));
    }

    #[test]
    fn test_coordinates_require_valid_ranges() {
        let entry = entry_with(
            &[("latitude", json!(21.02)), ("longitude", json!("105.80"))],
            Some(NOW_MS),
        );
        assert_eq!(entry.coordinates(), Some((21.02, 105.80)));

        let bad = entry_with(
            &[("latitude", json!(123.0)), ("longitude", json!(105.8))],
            Some(NOW_MS),
        );
        assert_eq!(bad.coordinates(), None);
    }
}
