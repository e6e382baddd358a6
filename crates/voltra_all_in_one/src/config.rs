use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Credential endpoint
    /// URL of the broker credential (token) endpoint
    #[serde(default)]
    pub credential_endpoint_url: String,

    // Broker configuration
    /// Primary broker WebSocket endpoint (host only)
    #[serde(default)]
    pub broker_endpoint: String,

    /// Optional fallback broker endpoint
    #[serde(default)]
    pub broker_fallback_endpoint: Option<String>,

    /// Signing region for the broker endpoint
    #[serde(default = "default_broker_region")]
    pub broker_region: String,

    /// MQTT keep-alive in seconds
    #[serde(default = "default_broker_keep_alive_secs")]
    pub broker_keep_alive_secs: u64,

    /// Heartbeat publish interval in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Base reconnect backoff delay in milliseconds
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    // Upstream REST gateway
    /// Regional API base URL
    #[serde(default)]
    pub api_base: String,

    /// Backup relay endpoints tried on rate limiting (comma-separated)
    #[serde(default)]
    pub backup_proxy_urls: String,

    /// Primary request-hash secret for signed upstream namespaces
    #[serde(default)]
    pub request_hash_secret: Option<String>,

    /// Platform tag reported to the upstream
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Install identifier reported to the upstream
    #[serde(default = "default_device_identifier")]
    pub device_identifier: String,

    /// Initial bearer token for the upstream session
    #[serde(default)]
    pub access_token: String,

    /// Endpoint used to renew the bearer token after a 401
    #[serde(default)]
    pub session_refresh_url: String,

    // External enrichment
    /// Reverse-geocoding endpoint base URL
    #[serde(default = "default_geocode_base_url")]
    pub geocode_base_url: String,

    /// Weather endpoint base URL
    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,

    // Scheduling
    /// Interval between periodic REST refreshes of the active vehicle
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// HTTP client timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for the OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_region() -> String {
    "ap-southeast-1".to_string()
}

fn default_broker_keep_alive_secs() -> u64 {
    300
}

fn default_heartbeat_interval_secs() -> u64 {
    120
}

fn default_reconnect_base_delay_ms() -> u64 {
    5000
}

fn default_platform() -> String {
    "VoltraDash".to_string()
}

fn default_device_identifier() -> String {
    "voltra-dashboard-community".to_string()
}

fn default_geocode_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_weather_base_url() -> String {
    "https://api.open-meteo.com".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "voltra-all-in-one".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("VOLTRA"))
            .build()?
            .try_deserialize()
    }

    /// Backup relay endpoints as a list.
    pub fn backup_bases(&self) -> Vec<String> {
        self.backup_proxy_urls
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        std::env::remove_var("VOLTRA_LOG_LEVEL");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.refresh_interval_secs, 60);
        assert!(config.backup_bases().is_empty());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        std::env::set_var("VOLTRA_LOG_LEVEL", "debug");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");

        std::env::remove_var("VOLTRA_LOG_LEVEL");
    }

    #[test]
    fn test_backup_bases_parsing() {
        let _lock = TEST_LOCK.lock().unwrap();

        let config = ServiceConfig {
            backup_proxy_urls: "https://a.example, https://b.example ,".to_string(),
            ..ServiceConfig::from_env().unwrap()
        };
        assert_eq!(
            config.backup_bases(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
