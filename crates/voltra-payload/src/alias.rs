use common::TelemetryRequest;
use std::collections::HashMap;

/// One row of the static alias table: a named signal and the device address
/// it lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasMapping {
    pub alias: &'static str,
    pub object_id: &'static str,
    pub instance_id: &'static str,
    pub resource_id: &'static str,
}

impl AliasMapping {
    pub fn device_key(&self) -> String {
        format!("{}_{}_{}", self.object_id, self.instance_id, self.resource_id)
    }

    pub fn request(&self) -> TelemetryRequest {
        TelemetryRequest {
            object_id: self.object_id.to_string(),
            instance_id: self.instance_id.to_string(),
            resource_id: self.resource_id.to_string(),
        }
    }
}

const fn mapping(
    alias: &'static str,
    object_id: &'static str,
    instance_id: &'static str,
    resource_id: &'static str,
) -> AliasMapping {
    AliasMapping {
        alias,
        object_id,
        instance_id,
        resource_id,
    }
}

/// Static alias table shipped with the client, covering the signals the
/// dashboard renders without fetching the per-vehicle catalogue.
pub static STATIC_ALIAS_TABLE: &[AliasMapping] = &[
    // Traction battery
    mapping("battery_level", "34100", "1", "2"),
    mapping("charging_status", "34100", "1", "5"),
    mapping("target_soc", "34100", "1", "7"),
    mapping("soh_percentage", "34100", "1", "9"),
    mapping("remaining_charging_time", "34100", "1", "12"),
    mapping("battery_health_12v", "34100", "2", "1"),
    mapping("battery_nominal_capacity_kwh", "34100", "1", "15"),
    // Range and distance
    mapping("range", "34101", "1", "1"),
    mapping("odometer", "34101", "1", "3"),
    // Motion
    mapping("speed", "34102", "1", "1"),
    mapping("gear_position", "34102", "1", "4"),
    mapping("handbrake_status", "34102", "1", "6"),
    // Position
    mapping("latitude", "34103", "1", "1"),
    mapping("longitude", "34103", "1", "2"),
    mapping("heading", "34103", "1", "3"),
    // Climate
    mapping("outside_temp", "34104", "1", "1"),
    mapping("inside_temp", "34104", "1", "2"),
    mapping("fan_speed", "34104", "1", "5"),
    mapping("climate_driver_temp", "34104", "2", "1"),
    mapping("climate_passenger_temp", "34104", "2", "2"),
    // Closures
    mapping("is_locked", "34106", "1", "1"),
    mapping("central_lock_status", "34106", "1", "2"),
    mapping("door_fl", "34107", "1", "1"),
    mapping("door_fr", "34107", "1", "2"),
    mapping("door_rl", "34107", "1", "3"),
    mapping("door_rr", "34107", "1", "4"),
    mapping("trunk_status", "34107", "1", "5"),
    mapping("hood_status", "34107", "1", "6"),
    mapping("window_status", "34107", "2", "1"),
    // Tires
    mapping("tire_pressure_fl", "34108", "1", "1"),
    mapping("tire_pressure_fr", "34108", "1", "2"),
    mapping("tire_pressure_rl", "34108", "1", "3"),
    mapping("tire_pressure_rr", "34108", "1", "4"),
    mapping("tire_temp_fl", "34108", "1", "5"),
    mapping("tire_temp_fr", "34108", "1", "6"),
    mapping("tire_temp_rl", "34108", "1", "7"),
    mapping("tire_temp_rr", "34108", "1", "8"),
    // Vehicle status and versions
    mapping("firmware_version", "34183", "1", "10"),
    mapping("tbox_version", "34183", "1", "11"),
    mapping("thermal_warning", "34183", "1", "30"),
    mapping("service_alert", "34183", "1", "31"),
    mapping("ignition_status", "34183", "1", "54"),
];

/// Aliases polled by the core REST telemetry refresh (a subset of the full
/// table; the rest arrives over the broker push channels).
pub const CORE_TELEMETRY_ALIASES: &[&str] = &[
    "battery_level",
    "charging_status",
    "target_soc",
    "soh_percentage",
    "remaining_charging_time",
    "range",
    "odometer",
    "speed",
    "latitude",
    "longitude",
    "heading",
    "outside_temp",
    "inside_temp",
    "gear_position",
    "is_locked",
    "tire_pressure_fl",
    "tire_pressure_fr",
    "tire_pressure_rl",
    "tire_pressure_rr",
];

/// Resources polled even when absent from the static table; older vehicles
/// report these addresses only.
pub const FALLBACK_TELEMETRY_RESOURCES: &[&str] = &["/34183/1/54", "/34100/2/1", "/34101/1/1"];

/// Lookup from canonical device key to signal alias.
#[derive(Debug, Clone, Default)]
pub struct AliasLookup {
    by_key: HashMap<String, String>,
}

impl AliasLookup {
    /// Build the lookup from the static alias table.
    pub fn from_static_table() -> Self {
        let by_key = STATIC_ALIAS_TABLE
            .iter()
            .map(|m| (m.device_key(), m.alias.to_string()))
            .collect();
        Self { by_key }
    }

    /// Build a lookup from dynamically fetched catalogue entries, e.g. the
    /// per-vehicle alias API.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            by_key: entries.into_iter().collect(),
        }
    }

    pub fn alias_for(&self, device_key: &str) -> Option<&str> {
        self.by_key.get(device_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Build the request list for the core REST telemetry refresh: every core
/// alias resolved through the static table, plus the fallback resources,
/// deduplicated by address.
pub fn core_telemetry_requests() -> Vec<TelemetryRequest> {
    let mut requests: Vec<TelemetryRequest> = Vec::new();

    for alias in CORE_TELEMETRY_ALIASES {
        if let Some(mapping) = STATIC_ALIAS_TABLE.iter().find(|m| m.alias == *alias) {
            requests.push(mapping.request());
        }
    }

    for path in FALLBACK_TELEMETRY_RESOURCES {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() != 3 {
            continue;
        }
        let candidate = TelemetryRequest {
            object_id: parts[0].to_string(),
            instance_id: parts[1].to_string(),
            resource_id: parts[2].to_string(),
        };
        if !requests.contains(&candidate) {
            requests.push(candidate);
        }
    }

    requests
}
