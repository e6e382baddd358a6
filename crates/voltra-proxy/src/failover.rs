use async_trait::async_trait;
use common::{DomainError, DomainResult};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One logical request forwarded by the router; the same request body and
/// headers go to whichever endpoint answers.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for delivering one request to one endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    async fn send(
        &self,
        base_url: &str,
        request: &UpstreamRequest,
    ) -> DomainResult<UpstreamResponse>;
}

/// One attempt in the routing log. Diagnostics only; the log never affects
/// control flow.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyAttempt {
    pub route: String,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RoutedResponse {
    pub response: UpstreamResponse,
    pub attempts: Vec<ProxyAttempt>,
}

/// Router that retries rate-limited requests against backup endpoints.
///
/// The primary is tried first, unconditionally, and any non-429 outcome is
/// final. On 429 the backups are shuffled (unbiased) and tried in turn; the
/// first non-429 answer wins, including error statuses: an answered 4xx/5xx
/// from a backup is still an answer. With everything rate-limited the last
/// response obtained is returned.
pub struct FailoverRouter {
    primary_base: String,
    backup_bases: Vec<String>,
    transport: Arc<dyn ProxyTransport>,
}

impl FailoverRouter {
    pub fn new(
        primary_base: String,
        backup_bases: Vec<String>,
        transport: Arc<dyn ProxyTransport>,
    ) -> Self {
        Self {
            primary_base,
            backup_bases,
            transport,
        }
    }

    pub async fn dispatch(&self, request: &UpstreamRequest) -> DomainResult<RoutedResponse> {
        let mut attempts = Vec::new();

        let started = Instant::now();
        let primary = self.transport.send(&self.primary_base, request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut last = match primary {
            Ok(response) => {
                attempts.push(ProxyAttempt {
                    route: "direct".to_string(),
                    status: Some(response.status),
                    elapsed_ms,
                    error: None,
                });
                if response.status != 429 {
                    return Ok(RoutedResponse { response, attempts });
                }
                response
            }
            Err(e) => {
                // Fail fast: transport failure on the primary is final.
                warn!(error = %e, "primary upstream unreachable");
                return Err(e);
            }
        };

        let mut backups = self.backup_bases.clone();
        backups.shuffle(&mut thread_rng());

        for backup in backups {
            let route = label_from_url(&backup);
            info!(route = %route, "rate limited, failing over");

            let started = Instant::now();
            match self.transport.send(&backup, request).await {
                Ok(response) => {
                    attempts.push(ProxyAttempt {
                        route: route.clone(),
                        status: Some(response.status),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        error: None,
                    });
                    if response.status != 429 {
                        return Ok(RoutedResponse { response, attempts });
                    }
                    last = response;
                }
                Err(e) => {
                    attempts.push(ProxyAttempt {
                        route: route.clone(),
                        status: None,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    });
                    warn!(route = %route, error = %e, "backup endpoint failed");
                }
            }
        }

        Ok(RoutedResponse {
            response: last,
            attempts,
        })
    }
}

/// Short route label for attempt logs: the hostname minus hosting-platform
/// suffixes.
pub fn label_from_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .unwrap_or(url)
            .replace(".vercel.app", "")
            .replace(".workers.dev", ""),
        Err(_) => url.to_string(),
    }
}

/// Transport backed by a shared reqwest client.
pub struct HttpProxyTransport {
    client: reqwest::Client,
}

impl HttpProxyTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProxyTransport for HttpProxyTransport {
    async fn send(
        &self,
        base_url: &str,
        request: &UpstreamRequest,
    ) -> DomainResult<UpstreamResponse> {
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            request.path_and_query.trim_start_matches('/')
        );
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| DomainError::Transport(format!("invalid method {}", request.method)))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))?;

        Ok(UpstreamResponse { status, body })
    }
}
