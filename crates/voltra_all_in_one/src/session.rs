use async_trait::async_trait;
use common::{DomainError, DomainResult, TokenRefresher};
use serde_json::Value;

/// Token refresher backed by the deployment's session endpoint.
///
/// The gateway calls this once per 401; a failure here surfaces to the
/// caller as a session-expired condition.
pub struct SessionTokenRefresher {
    client: reqwest::Client,
    refresh_url: String,
}

impl SessionTokenRefresher {
    pub fn new(client: reqwest::Client, refresh_url: String) -> Self {
        Self {
            client,
            refresh_url,
        }
    }
}

#[async_trait]
impl TokenRefresher for SessionTokenRefresher {
    async fn refresh_access_token(&self) -> DomainResult<String> {
        if self.refresh_url.is_empty() {
            return Err(DomainError::Configuration(
                "No session refresh endpoint configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.refresh_url)
            .send()
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::Upstream {
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DomainError::Parse(e.to_string()))?;
        let token = body
            .get("access_token")
            .or_else(|| body.get("accessToken"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                DomainError::Parse("session endpoint returned no access token".to_string())
            })?;

        Ok(token.to_string())
    }
}
