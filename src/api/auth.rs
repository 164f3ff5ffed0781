//! Bearer token acquisition and single-flight refresh.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::error::AuthError;

/// A bearer credential as returned by the identity service.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub token_type: String,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: token_type.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"***")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Performs one credential exchange against an identity service.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self) -> Result<AccessToken, AuthError>;
}

/// OAuth 2.0 client-credentials exchange against an Entra ID style
/// `/oauth2/v2.0/token` endpoint.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl ClientCredentials {
    /// `authority_url` is the tenant authority, e.g.
    /// `https://login.microsoftonline.com/<tenant>`.
    pub fn new(
        authority_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            token_url: format!("{}/oauth2/v2.0/token", authority_url.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        })
    }
}

#[async_trait]
impl CredentialExchange for ClientCredentials {
    async fn exchange(&self) -> Result<AccessToken, AuthError> {
        tracing::info!("Requesting access token at {}", self.token_url);

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            let err: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
            tracing::error!(
                "Token request rejected with status {}: {} {}",
                status,
                err.error,
                err.error_description
            );
            return Err(AuthError::Rejected {
                error: if err.error.is_empty() {
                    status.to_string()
                } else {
                    err.error
                },
                description: err.error_description,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Malformed(e.to_string()))?;
        tracing::info!("Access token acquired");

        Ok(AccessToken::new(token.access_token, token.token_type))
    }
}

/// Caches the current bearer token and refreshes it single-flight.
///
/// Both the first acquisition and every refresh happen under one async
/// lock, so concurrent callers never trigger parallel exchanges.
pub struct TokenProvider {
    exchange: Box<dyn CredentialExchange>,
    current: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(exchange: impl CredentialExchange + 'static) -> Self {
        Self {
            exchange: Box::new(exchange),
            current: Mutex::new(None),
        }
    }

    /// Returns the cached token, exchanging credentials on first use.
    pub async fn get_token(&self) -> Result<AccessToken, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            return Ok(token.clone());
        }
        let token = self.exchange.exchange().await?;
        *current = Some(token.clone());
        Ok(token)
    }

    /// Replaces `stale` with a newly exchanged token.
    ///
    /// If another caller already replaced `stale` while this one waited for
    /// the lock, the newer token is returned without a second exchange.
    pub async fn refresh(&self, stale: &AccessToken) -> Result<AccessToken, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token != stale {
                tracing::debug!("Access token already refreshed by another request");
                return Ok(token.clone());
            }
        }
        tracing::warn!("Refreshing access token");
        let token = self.exchange.exchange().await?;
        *current = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out `token-1`, `token-2`, ... and counts exchanges.
    pub(crate) struct CountingExchange {
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) delay: Duration,
    }

    impl CountingExchange {
        pub(crate) fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    delay: Duration::ZERO,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl CredentialExchange for CountingExchange {
        async fn exchange(&self) -> Result<AccessToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AccessToken::new(format!("token-{}", n), "Bearer"))
        }
    }

    pub(crate) struct RejectingExchange;

    #[async_trait]
    impl CredentialExchange for RejectingExchange {
        async fn exchange(&self) -> Result<AccessToken, AuthError> {
            Err(AuthError::Rejected {
                error: "invalid_client".to_string(),
                description: "bad secret".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_get_token_is_cached() {
        let (exchange, calls) = CountingExchange::new();
        let provider = TokenProvider::new(exchange);

        let first = provider.get_token().await.unwrap();
        let second = provider.get_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.authorization(), "Bearer token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let (mut exchange, calls) = CountingExchange::new();
        exchange.delay = Duration::from_millis(20);
        let provider = Arc::new(TokenProvider::new(exchange));
        let stale = provider.get_token().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provider = provider.clone();
            let stale = stale.clone();
            handles.push(tokio::spawn(async move { provider.refresh(&stale).await }));
        }

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.token, "token-2");
        }
        // One initial exchange plus exactly one refresh.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_exchange_surfaces_auth_error() {
        let provider = TokenProvider::new(RejectingExchange);
        let err = provider.get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { .. }));
        assert!(err.to_string().contains("bad secret"));
    }

    #[tokio::test]
    async fn test_client_credentials_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=my-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc123",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = ClientCredentials::new(
            &format!("{}/tenant-1/", server.uri()),
            "my-client",
            "s3cret",
            "https://api.businesscentral.dynamics.com/.default",
            Duration::from_secs(5),
        )
        .unwrap();

        let token = exchange.exchange().await.unwrap();
        assert_eq!(token.authorization(), "Bearer abc123");
    }

    #[tokio::test]
    async fn test_client_credentials_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let exchange = ClientCredentials::new(
            &format!("{}/tenant-1", server.uri()),
            "my-client",
            "wrong",
            "scope",
            Duration::from_secs(5),
        )
        .unwrap();

        match exchange.exchange().await.unwrap_err() {
            AuthError::Rejected { error, description } => {
                assert_eq!(error, "invalid_client");
                assert!(description.contains("Invalid client secret"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_access_token_debug_masks_secret() {
        let token = AccessToken::new("super-secret", "Bearer");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
    }
}
