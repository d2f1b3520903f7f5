//! OAuthInterceptor: wraps outbound calls to MCP servers, acquiring and
//! refreshing tokens via the provider registry and `TokenStore`.

use crate::error::{OAuthError, OAuthResult};
use crate::provider::ProviderRegistry;
use crate::singleflight::SingleFlight;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use portal_tokenstore::TokenStore;
use portal_types::{AuditEvent, AuditOutcome, AuditSink, RetryPolicy, ServerName, StorageTier, TokenData, UserId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{instrument, warn};

const FAILURE_WARNING_THRESHOLD: u32 = 5;

/// An outbound HTTP request headed for an MCP server, before the
/// `Authorization` header is attached.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub server_name: ServerName,
    pub user_id: UserId,
    pub method: reqwest::Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct OutboundResponse {
    pub status: reqwest::StatusCode,
    pub body: Vec<u8>,
}

/// Refreshes `refresh_token` against the provider's token endpoint.
/// Implemented over raw `reqwest` rather than `oauth2`'s typestate
/// `BasicClient` — the portal only needs the refresh/code-exchange POST
/// bodies, not the full client builder.
async fn exchange_refresh_token(
    http: &reqwest::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> OAuthResult<TokenData> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }

    let resp = http.post(token_endpoint).form(&form).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(OAuthError::Unauthenticated(format!(
            "refresh rejected by provider: {status}"
        )));
    }
    let body: TokenResponseBody = resp.json().await?;
    Ok(body.into_token_data())
}

#[derive(serde::Deserialize)]
struct TokenResponseBody {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponseBody {
    fn into_token_data(self) -> TokenData {
        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let mut token = TokenData::new(
            self.access_token,
            self.refresh_token,
            ChronoDuration::seconds(self.expires_in),
            ChronoDuration::seconds(300),
            scopes,
        );
        token.id_token = self.id_token;
        token
    }
}

/// Per-process registry of providers, cached tokens, and refresh state.
pub struct OAuthInterceptor {
    providers: Arc<ProviderRegistry>,
    tokens: Arc<TokenStore>,
    http: reqwest::Client,
    audit: Arc<dyn AuditSink>,
    retry: RetryPolicy,
    refresh_flight: SingleFlight<(ServerName, UserId), Result<TokenData, String>>,
    failure_counts: DashMap<(ServerName, UserId), AtomicU32>,
}

impl OAuthInterceptor {
    pub fn new(providers: Arc<ProviderRegistry>, tokens: Arc<TokenStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            providers,
            tokens,
            http: reqwest::Client::new(),
            audit,
            retry: RetryPolicy::default(),
            refresh_flight: SingleFlight::new(),
            failure_counts: DashMap::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn record_failure(&self, server: &ServerName, user: &UserId) {
        let counter = self
            .failure_counts
            .entry((server.clone(), *user))
            .or_insert_with(|| AtomicU32::new(0));
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= FAILURE_WARNING_THRESHOLD {
            warn!(
                server = %server,
                user = %user,
                failures = count,
                "repeated OAuth failures for (server, user); system channel warning threshold crossed"
            );
        }
    }

    fn clear_failures(&self, server: &ServerName, user: &UserId) {
        self.failure_counts.remove(&(server.clone(), *user));
    }

    /// Performs a single-flight-coalesced refresh for `(server, user)`,
    /// persisting the result via `TokenStore` on success.
    async fn refresh(&self, server: &ServerName, user: &UserId, refresh_token: String) -> OAuthResult<TokenData> {
        let Some(config) = self.providers.get(server) else {
            return Err(OAuthError::NotConfigured);
        };
        let key = (server.clone(), *user);
        let http = self.http.clone();
        let result = self
            .refresh_flight
            .run(key, move || async move {
                exchange_refresh_token(
                    &http,
                    &config.token_endpoint,
                    &config.client_id,
                    config.client_secret.as_deref(),
                    &refresh_token,
                )
                .await
                .map_err(|e| e.to_string())
            })
            .await;

        match result {
            Ok(fresh) => {
                let stored = self
                    .tokens
                    .store(server, user, fresh, StorageTier::Vault)
                    .await?;
                self.audit.record(
                    AuditEvent::new("oauth.refresh", AuditOutcome::Success)
                        .with_user(*user)
                        .with_server(server.clone()),
                );
                self.clear_failures(server, user);
                Ok(stored)
            }
            Err(msg) => {
                self.audit.record(
                    AuditEvent::new("oauth.refresh", AuditOutcome::Failure)
                        .with_user(*user)
                        .with_server(server.clone())
                        .with_detail(msg.clone()),
                );
                self.record_failure(server, user);
                Err(OAuthError::Unauthenticated(msg))
            }
        }
    }

    /// Fetches or refreshes a token steps 2-3: absent → requires a
    /// fresh authorization-code flow; present-but-due-for-refresh → proactive
    /// single-flight refresh; otherwise the cached token is returned as-is.
    async fn acquire(&self, server: &ServerName, user: &UserId) -> OAuthResult<TokenData> {
        match self.tokens.get(server, user).await {
            Ok(token) => {
                if token.needs_refresh(Utc::now()) {
                    if let Some(refresh_token) = token.refresh_token.clone() {
                        return self.refresh(server, user, refresh_token).await;
                    }
                }
                Ok(token)
            }
            Err(e) if e.kind() == portal_types::ErrorKind::Validation => {
                let auth = self
                    .providers
                    .start_authorization(server)
                    .ok_or(OAuthError::NotConfigured)?;
                Err(OAuthError::AuthorizationRequired {
                    authorize_url: auth.authorize_url,
                    state: auth.state,
                })
            }
            Err(e) => Err(OAuthError::TokenStore(e)),
        }
    }

    /// `Intercept`. Forwards `req` with the `Authorization` header
    /// attached, handling 401 (invalidate+refresh+retry-once), 429/5xx
    /// (retry per `RetryPolicy`), and 403 (no retry).
    #[instrument(skip(self, req, send))]
    pub async fn intercept<F, Fut>(
        &self,
        req: OutboundRequest,
        send: F,
    ) -> OAuthResult<OutboundResponse>
    where
        F: Fn(OutboundRequest, Option<String>) -> Fut,
        Fut: std::future::Future<Output = Result<OutboundResponse, reqwest::Error>>,
    {
        if !self.providers.is_oauth_configured(&req.server_name) {
            return send(req, None).await.map_err(OAuthError::Transport);
        }

        let mut token = self.acquire(&req.server_name, &req.user_id).await?;
        self.audit.record(
            AuditEvent::new("oauth.acquire", AuditOutcome::Success)
                .with_user(req.user_id)
                .with_server(req.server_name.clone()),
        );

        let mut attempt = 0u32;
        let mut retried_after_401 = false;
        loop {
            let resp = send(req.clone(), Some(token.access_token.clone()))
                .await
                .map_err(OAuthError::Transport)?;

            match resp.status {
                s if s.is_success() => return Ok(resp),
                s if s == reqwest::StatusCode::UNAUTHORIZED => {
                    if retried_after_401 {
                        self.record_failure(&req.server_name, &req.user_id);
                        let _ = self.tokens.delete(&req.server_name, &req.user_id).await;
                        self.audit.record(
                            AuditEvent::new("auth_failed", AuditOutcome::Failure)
                                .with_user(req.user_id)
                                .with_server(req.server_name.clone())
                                .with_detail("second consecutive 401 after refresh"),
                        );
                        return Err(OAuthError::Unauthenticated(
                            "second consecutive 401 after refresh".into(),
                        ));
                    }
                    retried_after_401 = true;
                    let Some(refresh_token) = token.refresh_token.clone() else {
                        return Err(OAuthError::Unauthenticated("no refresh token available".into()));
                    };
                    token = self
                        .refresh(&req.server_name, &req.user_id, refresh_token)
                        .await?;
                    continue;
                }
                s if s == reqwest::StatusCode::FORBIDDEN => {
                    return Err(OAuthError::Forbidden(format!(
                        "server rejected request: {s}"
                    )));
                }
                s if s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                    if !self.retry.should_retry(attempt) {
                        return Err(OAuthError::RateLimited {
                            retry_after: self.retry.base_delay(attempt),
                        });
                    }
                    let delay = self.retry.delay_with_jitter(attempt, 0.5);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                s => {
                    return Err(OAuthError::ProviderInvalid(format!(
                        "unexpected upstream status {s}"
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::audit::default_audit_sink;

    fn sample_config() -> portal_types::ServerConfig {
        portal_types::ServerConfig {
            provider_type: "generic".into(),
            client_id: "client-123".into(),
            client_secret: Some("shh".into()),
            scopes: vec!["mcp:tools".into()],
            redirect_uri: "https://portal.example.com/oauth/callback".into(),
            authorization_endpoint: "https://idp.example.com/authorize".into(),
            token_endpoint: "https://idp.example.com/token".into(),
            registration_endpoint: None,
        }
    }

    #[tokio::test]
    async fn unconfigured_server_forwards_unchanged() {
        let providers = Arc::new(ProviderRegistry::new());
        let tokens = Arc::new(TokenStore::new_unencrypted());
        let interceptor = OAuthInterceptor::new(providers, tokens, default_audit_sink());

        let req = OutboundRequest {
            server_name: ServerName::new("alpha"),
            user_id: UserId::new(),
            method: reqwest::Method::GET,
            url: "https://alpha.example.com/mcp".into(),
            body: None,
        };

        let resp = interceptor
            .intercept(req, |_, auth_header| async move {
                assert!(auth_header.is_none());
                Ok(OutboundResponse { status: reqwest::StatusCode::OK, body: Vec::new() })
            })
            .await
            .unwrap();
        assert_eq!(resp.status, reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_requires_authorization() {
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(ServerName::new("alpha"), sample_config());
        let tokens = Arc::new(TokenStore::new_unencrypted());
        let interceptor = OAuthInterceptor::new(providers, tokens, default_audit_sink());

        let req = OutboundRequest {
            server_name: ServerName::new("alpha"),
            user_id: UserId::new(),
            method: reqwest::Method::GET,
            url: "https://alpha.example.com/mcp".into(),
            body: None,
        };

        let err = interceptor
            .intercept(req, |_, _| async {
                Ok(OutboundResponse { status: reqwest::StatusCode::OK, body: Vec::new() })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::AuthorizationRequired { .. }));
    }

    #[tokio::test]
    async fn valid_token_attaches_bearer_header() {
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(ServerName::new("alpha"), sample_config());
        let tokens = Arc::new(TokenStore::new_unencrypted());
        let server = ServerName::new("alpha");
        let user = UserId::new();
        tokens
            .store(
                &server,
                &user,
                TokenData::new(
                    "access-material".into(),
                    Some("refresh-material".into()),
                    ChronoDuration::seconds(3600),
                    ChronoDuration::seconds(300),
                    vec!["mcp:tools".into()],
                ),
                StorageTier::Vault,
            )
            .await
            .unwrap();

        let interceptor = OAuthInterceptor::new(providers, tokens, default_audit_sink());
        let req = OutboundRequest {
            server_name: server,
            user_id: user,
            method: reqwest::Method::GET,
            url: "https://alpha.example.com/mcp".into(),
            body: None,
        };

        let resp = interceptor
            .intercept(req, |_, auth_header| async move {
                assert_eq!(auth_header.as_deref(), Some("access-material"));
                Ok(OutboundResponse { status: reqwest::StatusCode::OK, body: Vec::new() })
            })
            .await
            .unwrap();
        assert_eq!(resp.status, reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() {
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(ServerName::new("alpha"), sample_config());
        let tokens = Arc::new(TokenStore::new_unencrypted());
        let server = ServerName::new("alpha");
        let user = UserId::new();
        tokens
            .store(
                &server,
                &user,
                TokenData::new(
                    "access-material".into(),
                    Some("refresh-material".into()),
                    ChronoDuration::seconds(3600),
                    ChronoDuration::seconds(300),
                    vec!["mcp:tools".into()],
                ),
                StorageTier::Vault,
            )
            .await
            .unwrap();

        let interceptor = OAuthInterceptor::new(providers, tokens, default_audit_sink());
        let calls = Arc::new(AtomicU32::new(0));
        let req = OutboundRequest {
            server_name: server,
            user_id: user,
            method: reqwest::Method::GET,
            url: "https://alpha.example.com/mcp".into(),
            body: None,
        };

        let calls_clone = calls.clone();
        let err = interceptor
            .intercept(req, move |_, _| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(OutboundResponse { status: reqwest::StatusCode::FORBIDDEN, body: Vec::new() })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Forbidden(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_consecutive_401_deletes_token_and_audits_auth_failed() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/token"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "refreshed-access",
                "refresh_token": "refreshed-refresh",
                "expires_in": 3600,
            })))
            .mount(&mock_server)
            .await;

        let mut config = sample_config();
        config.token_endpoint = format!("{}/token", mock_server.uri());
        let providers = Arc::new(ProviderRegistry::new());
        let server = ServerName::new("alpha");
        providers.register(server.clone(), config);

        let tokens = Arc::new(TokenStore::new_unencrypted());
        let user = UserId::new();
        tokens
            .store(
                &server,
                &user,
                TokenData::new(
                    "access-material".into(),
                    Some("refresh-material".into()),
                    ChronoDuration::seconds(3600),
                    ChronoDuration::seconds(300),
                    vec!["mcp:tools".into()],
                ),
                StorageTier::Vault,
            )
            .await
            .unwrap();

        let interceptor = OAuthInterceptor::new(providers, tokens.clone(), default_audit_sink());
        let req = OutboundRequest {
            server_name: server.clone(),
            user_id: user,
            method: reqwest::Method::GET,
            url: "https://alpha.example.com/mcp".into(),
            body: None,
        };

        // Every forwarded request comes back 401; the refresh in between
        // succeeds (mocked), so the second 401 is the one that must trip
        // deletion rather than a second refresh attempt.
        let err = interceptor
            .intercept(req, |_, _| async {
                Ok(OutboundResponse { status: reqwest::StatusCode::UNAUTHORIZED, body: Vec::new() })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Unauthenticated(_)));
        assert!(tokens.get(&server, &user).await.is_err());
    }
}
