use crate::conversions::{
    alias_resource_from_value, extract_alias_resources, extract_data_array, vehicle_from_value,
};
use crate::failover::{FailoverRouter, ProxyTransport, UpstreamRequest, UpstreamResponse};
use crate::routes;
use crate::sign::ProxySigner;
use async_trait::async_trait;
use common::{
    AliasResource, DomainError, DomainResult, TelemetryRequest, TokenRefresher, VehicleApi,
    VehicleInfo,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Fixed client-identity headers the upstream validates on every call.
const SERVICE_NAME: &str = "CAPP";
const APP_VERSION: &str = "1.10.3";
const DEVICE_FAMILY: &str = "Community";
const DEVICE_OS_VERSION: &str = "1.0";
const DEVICE_LOCALE: &str = "en-US";
const TIMEZONE: &str = "Asia/Ho_Chi_Minh";

/// Business error code some services smuggle inside a 200 body when the
/// session has lapsed.
const BODY_CODE_SESSION_EXPIRED: i64 = 401_000;

#[derive(Debug, Clone)]
pub struct RestGatewayConfig {
    /// Regional API base URL.
    pub api_base: String,
    /// Backup relay endpoints used on rate limiting.
    pub backup_bases: Vec<String>,
    /// Primary request-hash secret; absent means signed paths fail fast.
    pub signing_secret: Option<String>,
    /// Platform tag sent as `x-device-platform` and hashed into `X-HASH-2`.
    pub platform: String,
    /// Install identifier sent as `x-device-identifier` and hashed into
    /// `X-HASH-2`.
    pub device_identifier: String,
}

struct SessionState {
    access_token: String,
    player_id: Option<String>,
}

/// Signing, failover-capable gateway to the manufacturer REST backend.
pub struct RestGateway {
    router: FailoverRouter,
    signer: ProxySigner,
    refresher: Arc<dyn TokenRefresher>,
    platform: String,
    device_identifier: String,
    session: RwLock<SessionState>,
}

impl RestGateway {
    pub fn new(
        config: RestGatewayConfig,
        transport: Arc<dyn ProxyTransport>,
        refresher: Arc<dyn TokenRefresher>,
        access_token: String,
    ) -> Self {
        let router = FailoverRouter::new(config.api_base, config.backup_bases, transport);
        let signer = ProxySigner::new(
            config.signing_secret,
            config.platform.clone(),
            config.device_identifier.clone(),
        );
        Self {
            router,
            signer,
            refresher,
            platform: config.platform,
            device_identifier: config.device_identifier,
            session: RwLock::new(SessionState {
                access_token,
                player_id: None,
            }),
        }
    }

    /// Replace the bearer token, e.g. after an external re-login.
    pub async fn set_access_token(&self, token: String) {
        self.session.write().await.access_token = token;
    }

    /// Relay one request: allowlist check, signing, failover dispatch, and
    /// the 401 refresh-once policy.
    async fn call(
        &self,
        method: &str,
        path_and_query: &str,
        vin: Option<&str>,
        body: Option<String>,
    ) -> DomainResult<UpstreamResponse> {
        let path = path_and_query.split('?').next().unwrap_or(path_and_query);
        if !routes::is_allowed(path) {
            return Err(DomainError::ForbiddenPath(path.to_string()));
        }

        debug!(method = %method, path = %path, "relaying upstream request");

        let request = self
            .build_request(method, path_and_query, vin, body.clone())
            .await?;
        let mut routed = self.router.dispatch(&request).await?;

        if routed.response.status == 401 {
            warn!(path = %path, "upstream returned 401, refreshing access token");
            let token = self
                .refresher
                .refresh_access_token()
                .await
                .map_err(|_| DomainError::SessionExpired)?;
            self.session.write().await.access_token = token;

            let request = self.build_request(method, path_and_query, vin, body).await?;
            routed = self.router.dispatch(&request).await?;
            if routed.response.status == 401 {
                return Err(DomainError::SessionExpired);
            }
        }

        if routed.attempts.len() > 1 {
            info!(
                path = %path,
                attempts = %serde_json::to_string(&routed.attempts).unwrap_or_default(),
                "request answered after failover"
            );
        }

        match routed.response.status {
            status if (200..300).contains(&status) => Ok(routed.response),
            429 => Err(DomainError::RateLimited {
                attempts: routed.attempts.len(),
            }),
            status => Err(DomainError::Upstream {
                status,
                body: routed.response.body.chars().take(200).collect(),
            }),
        }
    }

    async fn build_request(
        &self,
        method: &str,
        path_and_query: &str,
        vin: Option<&str>,
        body: Option<String>,
    ) -> DomainResult<UpstreamRequest> {
        let session = self.session.read().await;

        let mut headers: Vec<(String, String)> = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", session.access_token),
            ),
            ("x-service-name".to_string(), SERVICE_NAME.to_string()),
            ("x-app-version".to_string(), APP_VERSION.to_string()),
            ("x-device-platform".to_string(), self.platform.clone()),
            ("x-device-family".to_string(), DEVICE_FAMILY.to_string()),
            (
                "x-device-os-version".to_string(),
                DEVICE_OS_VERSION.to_string(),
            ),
            ("x-device-locale".to_string(), DEVICE_LOCALE.to_string()),
            ("x-timezone".to_string(), TIMEZONE.to_string()),
            (
                "x-device-identifier".to_string(),
                self.device_identifier.clone(),
            ),
        ];
        if let Some(vin) = vin {
            headers.push(("x-vin-code".to_string(), vin.to_string()));
        }
        if let Some(player_id) = &session.player_id {
            headers.push(("x-player-identifier".to_string(), player_id.clone()));
        }

        if routes::requires_signing(path_and_query) {
            let timestamp_ms = chrono::Utc::now().timestamp_millis();
            let signed = self
                .signer
                .sign(method, path_and_query, vin, timestamp_ms)?;
            headers.push(("X-HASH".to_string(), signed.hash));
            headers.push(("X-HASH-2".to_string(), signed.hash2));
            headers.push(("X-TIMESTAMP".to_string(), signed.timestamp));
        }

        Ok(UpstreamRequest {
            method: method.to_string(),
            path_and_query: path_and_query.to_string(),
            headers,
            body,
        })
    }

    fn parse_body(response: &UpstreamResponse) -> DomainResult<Value> {
        serde_json::from_str(&response.body)
            .map_err(|e| DomainError::Parse(format!("upstream body is not JSON: {}", e)))
    }
}

#[async_trait]
impl VehicleApi for RestGateway {
    async fn fetch_vehicles(&self) -> DomainResult<Vec<VehicleInfo>> {
        let response = self
            .call("GET", "ccarusermgnt/api/v1/user-vehicle", None, None)
            .await?;
        let body = Self::parse_body(&response)?;

        let vehicles: Vec<VehicleInfo> = extract_data_array(&body)
            .iter()
            .filter_map(vehicle_from_value)
            .collect();

        // The account identifier rides along on the vehicle list and is
        // echoed back as a header on subsequent calls.
        if let Some(player_id) = vehicles.iter().find_map(|v| v.player_id.clone()) {
            self.session.write().await.player_id = Some(player_id);
        }

        info!(count = vehicles.len(), "fetched account vehicles");
        Ok(vehicles)
    }

    async fn fetch_telemetry(
        &self,
        vin: &str,
        requests: &[TelemetryRequest],
    ) -> DomainResult<Vec<Value>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::to_string(requests)
            .map_err(|e| DomainError::Parse(format!("encoding telemetry request: {}", e)))?;
        let response = self
            .call(
                "POST",
                "ccaraccessmgmt/api/v1/telemetry/app/ping",
                Some(vin),
                Some(body),
            )
            .await?;
        let body = Self::parse_body(&response)?;
        Ok(extract_data_array(&body))
    }

    async fn fetch_aliases(&self, vin: &str, version: &str) -> DomainResult<Vec<AliasResource>> {
        let path = format!(
            "modelmgmt/api/v2/vehicle-model/mobile-app/vehicle/get-alias?version={}",
            version
        );
        let response = self.call("GET", &path, Some(vin), None).await?;
        let body = Self::parse_body(&response)?;

        let resources: Vec<AliasResource> = extract_alias_resources(&body)
            .iter()
            .filter_map(alias_resource_from_value)
            .collect();

        if resources.is_empty()
            && body.get("code").and_then(Value::as_i64) == Some(BODY_CODE_SESSION_EXPIRED)
        {
            return Err(DomainError::SessionExpired);
        }

        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::MockProxyTransport;
    use common::MockTokenRefresher;
    use mockall::Sequence;
    use serde_json::json;

    fn config() -> RestGatewayConfig {
        RestGatewayConfig {
            api_base: "https://api.region.example".to_string(),
            backup_bases: Vec::new(),
            signing_secret: Some("shared-secret".to_string()),
            platform: "VoltraDash".to_string(),
            device_identifier: "voltra-dashboard".to_string(),
        }
    }

    fn ok(body: Value) -> DomainResult<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn status(code: u16) -> DomainResult<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: code,
            body: "{}".to_string(),
        })
    }

    fn header<'a>(request: &'a UpstreamRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_disallowed_path_rejected_before_network() {
        let mut transport = MockProxyTransport::new();
        transport.expect_send().times(0);
        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        let result = gateway.call("GET", "admin/api/v1/users", None, None).await;
        assert!(matches!(result, Err(DomainError::ForbiddenPath(_))));
    }

    #[tokio::test]
    async fn test_signed_path_carries_both_hashes_and_timestamp() {
        let mut transport = MockProxyTransport::new();
        transport
            .expect_send()
            .withf(|_, request: &UpstreamRequest| {
                header(request, "X-HASH").is_some()
                    && header(request, "X-HASH-2").is_some()
                    && header(request, "X-TIMESTAMP")
                        .map(|t| t.chars().all(|c| c.is_ascii_digit()))
                        .unwrap_or(false)
                    && header(request, "x-vin-code") == Some("VIN123")
            })
            .times(1)
            .returning(|_, _| ok(json!({"data": []})));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        let requests = vec![TelemetryRequest {
            object_id: "34100".to_string(),
            instance_id: "1".to_string(),
            resource_id: "2".to_string(),
        }];
        gateway.fetch_telemetry("VIN123", &requests).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsigned_path_carries_no_hashes() {
        let mut transport = MockProxyTransport::new();
        transport
            .expect_send()
            .withf(|_, request: &UpstreamRequest| {
                header(request, "X-HASH").is_none()
                    && header(request, "Authorization") == Some("Bearer token-1")
            })
            .times(1)
            .returning(|_, _| ok(json!({"data": []})));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        gateway.fetch_vehicles().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_secret_fails_signed_path_without_network() {
        let mut transport = MockProxyTransport::new();
        transport.expect_send().times(0);
        let gateway = RestGateway::new(
            RestGatewayConfig {
                signing_secret: None,
                ..config()
            },
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        let requests = vec![TelemetryRequest {
            object_id: "34100".to_string(),
            instance_id: "1".to_string(),
            resource_id: "2".to_string(),
        }];
        let result = gateway.fetch_telemetry("VIN123", &requests).await;
        assert!(matches!(result, Err(DomainError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries_with_new_token() {
        let mut sequence = Sequence::new();
        let mut transport = MockProxyTransport::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| status(401));
        transport
            .expect_send()
            .withf(|_, request: &UpstreamRequest| {
                header(request, "Authorization") == Some("Bearer token-2")
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| ok(json!({"data": []})));

        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh_access_token()
            .times(1)
            .returning(|| Ok("token-2".to_string()));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(refresher),
            "token-1".to_string(),
        );

        gateway.fetch_vehicles().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_401_surfaces_session_expired() {
        let mut transport = MockProxyTransport::new();
        transport.expect_send().times(2).returning(|_, _| status(401));

        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh_access_token()
            .times(1)
            .returning(|| Ok("token-2".to_string()));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(refresher),
            "token-1".to_string(),
        );

        let result = gateway.fetch_vehicles().await;
        assert!(matches!(result, Err(DomainError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_session_expired() {
        let mut transport = MockProxyTransport::new();
        transport.expect_send().times(1).returning(|_, _| status(401));

        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh_access_token()
            .times(1)
            .returning(|| Err(DomainError::Upstream { status: 400, body: String::new() }));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(refresher),
            "token-1".to_string(),
        );

        let result = gateway.fetch_vehicles().await;
        assert!(matches!(result, Err(DomainError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_fetch_vehicles_captures_player_identifier() {
        let mut sequence = Sequence::new();
        let mut transport = MockProxyTransport::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                ok(json!({"data": [
                    {"vinCode": "VIN123", "userId": "player-7", "batteryCapacity": "87.7"},
                    {"vinCode": "VIN456"}
                ]}))
            });
        transport
            .expect_send()
            .withf(|_, request: &UpstreamRequest| {
                header(request, "x-player-identifier") == Some("player-7")
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| ok(json!({"data": []})));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        let vehicles = gateway.fetch_vehicles().await.unwrap();
        assert_eq!(vehicles.len(), 2);
        assert_eq!(vehicles[0].battery_capacity_kwh, Some(87.7));

        // Subsequent calls echo the captured identifier.
        gateway.fetch_vehicles().await.unwrap();
    }

    #[tokio::test]
    async fn test_alias_body_session_code_surfaces_session_expired() {
        let mut transport = MockProxyTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| ok(json!({"code": 401000, "message": "token expired"})));

        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        let result = gateway.fetch_aliases("VIN123", "1.0").await;
        assert!(matches!(result, Err(DomainError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_empty_request_list_skips_network() {
        let mut transport = MockProxyTransport::new();
        transport.expect_send().times(0);
        let gateway = RestGateway::new(
            config(),
            Arc::new(transport),
            Arc::new(MockTokenRefresher::new()),
            "token-1".to_string(),
        );

        let samples = gateway.fetch_telemetry("VIN123", &[]).await.unwrap();
        assert!(samples.is_empty());
    }
}
