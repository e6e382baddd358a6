use crate::domain::{
    AliasResource, CredentialPayload, DomainResult, GeoAddress, SignalMap, TelemetryRequest,
    VehicleInfo, WeatherObservation,
};
use async_trait::async_trait;
use serde_json::Value;

/// Trait for fetching raw broker credentials from the token endpoint.
///
/// Implementations should:
/// - Perform the HTTP call to the credential endpoint
/// - Return the payload as-is (validation and expiry normalization happen
///   in the credential provider)
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> DomainResult<CredentialPayload>;
}

/// Trait for the manufacturer REST backend, reached through the signing
/// failover gateway.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VehicleApi: Send + Sync {
    /// List the vehicles on the account.
    async fn fetch_vehicles(&self) -> DomainResult<Vec<VehicleInfo>>;

    /// Fetch raw samples for the addressed resources of one vehicle.
    ///
    /// Elements are returned undecoded; the caller runs them through the
    /// normalizer.
    async fn fetch_telemetry(
        &self,
        vin: &str,
        requests: &[TelemetryRequest],
    ) -> DomainResult<Vec<Value>>;

    /// Fetch the alias catalogue for one vehicle at a given version.
    async fn fetch_aliases(&self, vin: &str, version: &str) -> DomainResult<Vec<AliasResource>>;
}

/// Trait for refreshing the upstream access token after a 401.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a fresh access token, or fail if the session cannot be renewed.
    async fn refresh_access_token(&self) -> DomainResult<String>;
}

/// Trait for reverse geocoding a coordinate pair.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GeocodeClient: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> DomainResult<Option<GeoAddress>>;
}

/// Trait for fetching the current weather at a coordinate pair.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait WeatherClient: Send + Sync {
    async fn current_weather(
        &self,
        lat: f64,
        lon: f64,
    ) -> DomainResult<Option<WeatherObservation>>;
}

/// Trait for consuming normalized telemetry pushed by the broker link.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn ingest(&self, vin: &str, signals: SignalMap) -> DomainResult<()>;
}

/// Trait for retargeting the live broker link to another vehicle.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LinkControl: Send + Sync {
    async fn switch_vehicle(&self, vin: &str) -> DomainResult<()>;
}
