mod config;
mod runner;
mod session;

use async_trait::async_trait;
use common::{
    init_telemetry, shutdown_telemetry, DomainResult, SignalMap, TelemetryConfig, TelemetrySink,
};
use config::ServiceConfig;
use runner::ServiceRunner;
use session::SessionTokenRefresher;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vehicle_link::{BrokerLink, BrokerLinkConfig, CredentialProvider, HttpCredentialSource};
use vehicle_store::{NominatimClient, OpenMeteoClient, VehicleStore};
use voltra_proxy::{HttpProxyTransport, RestGateway, RestGatewayConfig};

/// Breaks the construction cycle between the broker link (which needs a
/// telemetry sink) and the store (which needs the link for retargeting).
/// Pushes arriving before the store is bound are dropped.
#[derive(Default)]
struct SinkBridge {
    store: OnceLock<VehicleStore>,
}

#[async_trait]
impl TelemetrySink for SinkBridge {
    async fn ingest(&self, vin: &str, signals: SignalMap) -> DomainResult<()> {
        match self.store.get() {
            Some(store) => store.ingest(vin, signals).await,
            None => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        api_base = %config.api_base,
        broker_endpoint = %config.broker_endpoint,
        "Starting voltra-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let http_client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    // Upstream REST gateway: signing, allowlist, failover, refresh-once.
    let gateway = Arc::new(RestGateway::new(
        RestGatewayConfig {
            api_base: config.api_base.clone(),
            backup_bases: config.backup_bases(),
            signing_secret: config.request_hash_secret.clone(),
            platform: config.platform.clone(),
            device_identifier: config.device_identifier.clone(),
        },
        Arc::new(HttpProxyTransport::new(http_client.clone())),
        Arc::new(SessionTokenRefresher::new(
            http_client.clone(),
            config.session_refresh_url.clone(),
        )),
        config.access_token.clone(),
    ));

    // Broker link: credentials, signed URL, connection state machine.
    let credentials = Arc::new(CredentialProvider::new(Arc::new(HttpCredentialSource::new(
        http_client.clone(),
        config.credential_endpoint_url.clone(),
    ))));
    let sink_bridge = Arc::new(SinkBridge::default());
    let link = BrokerLink::new(
        BrokerLinkConfig {
            endpoint: config.broker_endpoint.clone(),
            fallback_endpoint: config.broker_fallback_endpoint.clone(),
            region: config.broker_region.clone(),
            keep_alive: Duration::from_secs(config.broker_keep_alive_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            reconnect_base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            channel_capacity: 100,
        },
        credentials,
        sink_bridge.clone(),
    );

    // Vehicle store: cache, dedup fetch, enrichment.
    let store = VehicleStore::new(
        gateway,
        Arc::new(NominatimClient::new(
            http_client.clone(),
            config.geocode_base_url.clone(),
        )),
        Arc::new(OpenMeteoClient::new(
            http_client,
            config.weather_base_url.clone(),
        )),
        Arc::new(link.clone()),
    );
    let _ = sink_bridge.store.set(store.clone());

    let refresh_interval = Duration::from_secs(config.refresh_interval_secs);

    let runner = ServiceRunner::new()
        .with_process("ingestion", {
            let store = store.clone();
            let link = link.clone();
            move |token| async move {
                let first_vin = store.load_vehicles().await?;
                match first_vin {
                    Some(vin) => link.connect(&vin).await?,
                    None => warn!("account has no vehicles, broker link stays down"),
                }
                token.cancelled().await;
                Ok(())
            }
        })
        .with_process("periodic-refresh", {
            let store = store.clone();
            move |token| async move {
                let mut interval = tokio::time::interval(refresh_interval);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = interval.tick() => {}
                    }
                    let active = store.snapshot().await.active_vin;
                    if let Some(vin) = active {
                        if let Err(e) = store.refresh_vehicle(&vin).await {
                            warn!(vin = %vin, error = %e, "periodic refresh failed");
                        }
                    }
                }
            }
        })
        .with_closer({
            let link = link.clone();
            move || async move {
                link.shutdown().await;
            }
        });

    runner.run().await;

    shutdown_telemetry(telemetry_providers);
    info!("voltra-all-in-one stopped");
}
