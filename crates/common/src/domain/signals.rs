use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat map of named telemetry signals produced by the normalizer.
pub type SignalMap = BTreeMap<String, Value>;

/// One addressed sample request against the telemetry ping endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRequest {
    pub object_id: String,
    pub instance_id: String,
    pub resource_id: String,
}

/// One entry of the per-vehicle alias catalogue served by the model API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasResource {
    pub alias: Option<String>,
    pub resource_name: Option<String>,
    pub object_id: Option<String>,
    pub instance_id: Option<String>,
    pub resource_id: Option<String>,
}

/// Reverse-geocoding result used for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoAddress {
    /// "district, city, CC", shown next to the vehicle position.
    pub location_address: String,
    /// "city, CC", the coarser key used for weather display.
    pub weather_address: String,
}

/// Current-weather reading used for enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub temperature: Option<f64>,
    pub weather_code: Option<i64>,
}
