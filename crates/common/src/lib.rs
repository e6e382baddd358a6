mod domain;
mod telemetry;

pub use domain::*;
pub use telemetry::*;

// Re-export mocks when the testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockCredentialSource;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockGeocodeClient;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockLinkControl;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTelemetrySink;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTokenRefresher;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockVehicleApi;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockWeatherClient;
