//! Session provisioning contract.
//!
//! Fresh session tokens are minted by an external registration service
//! (browser-automated account signup lives there, not here). The gateway
//! consumes it through this one-method contract.

use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::jimeng::region::SessionToken;

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Mint a fresh session token. The returned string must satisfy the
    /// session token constraints (non-empty, known region prefix set).
    async fn generate_session(&self) -> Result<String>;
}

/// Provider backed by an external HTTP service.
pub struct HttpSessionProvider {
    http: reqwest::Client,
    url: String,
}

impl HttpSessionProvider {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn generate_session(&self) -> Result<String> {
        let resp = self
            .http
            .post(&self.url)
            .timeout(std::time::Duration::from_secs(300))
            .send()
            .await
            .map_err(|e| GatewayError::Provisioning(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Provisioning(format!(
                "provider returned HTTP {}",
                resp.status()
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Provisioning(e.to_string()))?;
        let token = payload
            .pointer("/sessionId")
            .or_else(|| payload.pointer("/session_id"))
            .or_else(|| payload.pointer("/data/sessionId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Provisioning("no session id in provider response".into()))?;

        // Enforce the token contract before handing it out.
        SessionToken::parse(token)?;
        Ok(token.to_string())
    }
}

/// Fallback when no provider is configured.
pub struct DisabledSessionProvider;

#[async_trait]
impl SessionProvider for DisabledSessionProvider {
    async fn generate_session(&self) -> Result<String> {
        Err(GatewayError::Provisioning(
            "no session provider configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_provider_returns_the_minted_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mint"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sessionId": "us-fresh-token"
            })))
            .mount(&server)
            .await;

        let provider =
            HttpSessionProvider::new(reqwest::Client::new(), format!("{}/mint", server.uri()));
        assert_eq!(provider.generate_session().await.unwrap(), "us-fresh-token");
    }

    #[tokio::test]
    async fn provider_refusal_is_a_provisioning_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mint"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider =
            HttpSessionProvider::new(reqwest::Client::new(), format!("{}/mint", server.uri()));
        let err = provider.generate_session().await.unwrap_err();
        assert_eq!(err.kind(), "provisioning");
    }

    #[tokio::test]
    async fn disabled_provider_always_refuses() {
        let err = DisabledSessionProvider.generate_session().await.unwrap_err();
        assert_eq!(err.kind(), "provisioning");
    }
}
