//! External enrichment clients: reverse geocoding and current weather.

use async_trait::async_trait;
use common::{DomainError, DomainResult, GeoAddress, GeocodeClient, WeatherClient, WeatherObservation};
use serde_json::Value;
use tracing::debug;

/// Administrative prefixes stripped from locality names before display.
const ADMIN_PREFIXES: &[&str] = &["Thành phố", "Tỉnh", "Quận", "Huyện", "Xã", "Phường"];

/// Reverse geocoder backed by a Nominatim-compatible endpoint.
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl GeocodeClient for NominatimClient {
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> DomainResult<Option<GeoAddress>> {
        let url = format!(
            "{}/reverse?format=json&lat={}&lon={}",
            self.base_url.trim_end_matches('/'),
            lat,
            lon
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "reverse geocode unavailable");
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DomainError::Parse(e.to_string()))?;
        Ok(address_from_body(&body))
    }
}

/// Build the display addresses from a reverse-geocode response body.
pub fn address_from_body(body: &Value) -> Option<GeoAddress> {
    let address = body.get("address")?;

    let district = first_field(address, &["city_district", "district", "county"]);
    let city = first_field(address, &["city", "town", "village", "state", "province"]);
    let country = address
        .get("country_code")
        .and_then(Value::as_str)
        .unwrap_or("VN")
        .to_uppercase();

    let location_address = join_parts(&[district.as_deref(), city.as_deref(), Some(&country)]);
    let weather_address = join_parts(&[city.as_deref(), Some(&country)]);
    if location_address == country && weather_address == country {
        return None;
    }

    Some(GeoAddress {
        location_address,
        weather_address,
    })
}

fn first_field(address: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| address.get(*field).and_then(Value::as_str))
        .map(strip_admin_prefix)
}

fn strip_admin_prefix(name: &str) -> String {
    let trimmed = name.trim();
    for prefix in ADMIN_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn join_parts(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .filter_map(|part| *part)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Current-weather client backed by an Open-Meteo-compatible endpoint.
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl WeatherClient for OpenMeteoClient {
    async fn current_weather(&self, lat: f64, lon: f64) -> DomainResult<Option<WeatherObservation>> {
        let url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&current_weather=true",
            self.base_url.trim_end_matches('/'),
            lat,
            lon
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "weather endpoint unavailable");
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DomainError::Parse(e.to_string()))?;
        let Some(current) = body.get("current_weather") else {
            return Ok(None);
        };

        Ok(Some(WeatherObservation {
            temperature: current.get("temperature").and_then(Value::as_f64),
            weather_code: current.get("weathercode").and_then(Value::as_i64),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_strips_admin_prefixes() {
        let body = json!({
            "address": {
                "city_district": "Quận Ba Đình",
                "city": "Thành phố Hà Nội",
                "country_code": "vn"
            }
        });
        let address = address_from_body(&body).unwrap();
        assert_eq!(address.location_address, "Ba Đình, Hà Nội, VN");
        assert_eq!(address.weather_address, "Hà Nội, VN");
    }

    #[test]
    fn test_address_falls_back_through_locality_fields() {
        let body = json!({
            "address": {"town": "Sa Pa", "country_code": "vn"}
        });
        let address = address_from_body(&body).unwrap();
        assert_eq!(address.location_address, "Sa Pa, VN");
        assert_eq!(address.weather_address, "Sa Pa, VN");
    }

    #[test]
    fn test_empty_address_yields_none() {
        assert!(address_from_body(&json!({})).is_none());
        assert!(address_from_body(&json!({"address": {}})).is_none());
    }
}
