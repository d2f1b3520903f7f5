//! DcrBridge: RFC 7591 Dynamic Client Registration against the
//! identity provider's native app-registration API.

use crate::error::{OAuthError, OAuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use portal_tokenstore::TokenStore;
use portal_types::{AuditEvent, AuditOutcome, AuditSink, StorageTier, TokenData};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use url::Url;

fn client_secret_key(client_id: &str) -> String {
    format!("oauth-client-{client_id}")
}

/// DCR-issued client secrets are not per-user; they're keyed into
/// `TokenStore`'s `(serverName, userID)` space under a fixed sentinel so
/// `register`/`delete` always agree on where to find them.
fn system_user() -> portal_types::UserId {
    portal_types::UserId(uuid::Uuid::nil())
}

/// RFC 7591 registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct DcrRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub contacts: Vec<String>,
    pub policy_uri: Option<String>,
    pub tos_uri: Option<String>,
}

/// RFC 7591 registration response.
#[derive(Debug, Clone, Serialize)]
pub struct DcrResponse {
    pub client_id: String,
    pub client_secret: String,
    pub client_id_issued_at: i64,
    pub client_secret_expires_at: i64,
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DcrPatch {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub scopes: Option<Vec<String>>,
}

/// What the provider handed back for a created app registration, before
/// the secret is minted.
pub struct ProviderRegistration {
    pub provider_object_id: String,
    pub client_id: String,
}

pub struct ProviderSecret {
    pub client_secret: String,
    pub expires_at: DateTime<Utc>,
}

/// External collaborator: the identity provider's native app-registration
/// API, used to create an app registration on the configured identity
/// provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn create_app_registration(&self, req: &DcrRequest) -> OAuthResult<ProviderRegistration>;
    async fn create_service_principal(&self, provider_object_id: &str) -> OAuthResult<()>;
    async fn create_client_secret(&self, provider_object_id: &str) -> OAuthResult<ProviderSecret>;
    async fn update_registration(&self, provider_object_id: &str, patch: &DcrPatch) -> OAuthResult<()>;
    async fn delete_registration(&self, provider_object_id: &str) -> OAuthResult<()>;
}

fn validate_redirect_uris(uris: &[String]) -> OAuthResult<()> {
    if uris.is_empty() {
        return Err(OAuthError::InvalidRedirectUri("redirect_uris must not be empty".into()));
    }
    for raw in uris {
        let url = Url::parse(raw).map_err(|e| OAuthError::InvalidRedirectUri(format!("{raw}: {e}")))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(OAuthError::InvalidRedirectUri(format!(
                "{raw}: scheme {} not permitted",
                url.scheme()
            )));
        }
    }
    Ok(())
}

struct RegisteredClient {
    provider_object_id: String,
}

/// Tracks every client this process has registered with the provider so
/// `update`/`delete` can find the provider-side object id again.
pub struct DcrBridge {
    provider: Arc<dyn ProviderClient>,
    tokens: Arc<TokenStore>,
    audit: Arc<dyn AuditSink>,
    registered: DashMap<String, RegisteredClient>,
}

impl DcrBridge {
    pub fn new(provider: Arc<dyn ProviderClient>, tokens: Arc<TokenStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { provider, tokens, audit, registered: DashMap::new() }
    }

    /// `Register`. On partial success (app created, secret creation
    /// failed) issues a compensating delete; if that also fails the orphan
    /// is logged with enough identifiers for manual cleanup.
    pub async fn register(&self, req: DcrRequest) -> OAuthResult<DcrResponse> {
        validate_redirect_uris(&req.redirect_uris)?;

        let registration = self.provider.create_app_registration(&req).await?;

        if let Err(e) = self.provider.create_service_principal(&registration.provider_object_id).await {
            self.compensate(&registration.provider_object_id, &registration.client_id, &e).await;
            return Err(e);
        }

        let secret = match self.provider.create_client_secret(&registration.provider_object_id).await {
            Ok(secret) => secret,
            Err(e) => {
                self.compensate(&registration.provider_object_id, &registration.client_id, &e).await;
                return Err(e);
            }
        };

        let issued_at = Utc::now();
        let persisted = TokenData::new(
            secret.client_secret.clone(),
            None,
            secret.expires_at - issued_at,
            chrono::Duration::zero(),
            req.scopes.clone(),
        );
        self.tokens
            .store(
                &portal_types::ServerName::new(client_secret_key(&registration.client_id)),
                &system_user(),
                persisted,
                StorageTier::Vault,
            )
            .await?;

        self.registered.insert(
            registration.client_id.clone(),
            RegisteredClient { provider_object_id: registration.provider_object_id.clone() },
        );

        self.audit.record(
            AuditEvent::new("dcr.register", AuditOutcome::Success)
                .with_detail(format!("client_id={}", registration.client_id)),
        );

        Ok(DcrResponse {
            client_id: registration.client_id,
            client_secret: secret.client_secret,
            client_id_issued_at: issued_at.timestamp(),
            client_secret_expires_at: secret.expires_at.timestamp(),
            redirect_uris: req.redirect_uris,
        })
    }

    /// `Update`: the in-memory map only reflects the patch once the
    /// provider confirms success.
    pub async fn update(&self, client_id: &str, patch: DcrPatch) -> OAuthResult<()> {
        let provider_object_id = self
            .registered
            .get(client_id)
            .map(|r| r.provider_object_id.clone())
            .ok_or_else(|| OAuthError::ProviderInvalid(format!("unknown client_id {client_id}")))?;

        self.provider.update_registration(&provider_object_id, &patch).await?;
        self.audit.record(
            AuditEvent::new("dcr.update", AuditOutcome::Success)
                .with_detail(format!("client_id={client_id}")),
        );
        Ok(())
    }

    /// `Delete`: removes the provider registration and the stored secret.
    pub async fn delete(&self, client_id: &str) -> OAuthResult<()> {
        let Some((_, registered)) = self.registered.remove(client_id) else {
            return Err(OAuthError::ProviderInvalid(format!("unknown client_id {client_id}")));
        };

        self.provider.delete_registration(&registered.provider_object_id).await?;
        self.tokens
            .delete(
                &portal_types::ServerName::new(client_secret_key(client_id)),
                &system_user(),
            )
            .await?;

        self.audit.record(
            AuditEvent::new("dcr.delete", AuditOutcome::Success)
                .with_detail(format!("client_id={client_id}")),
        );
        Ok(())
    }

    async fn compensate(&self, provider_object_id: &str, client_id: &str, cause: &OAuthError) {
        self.audit.record(
            AuditEvent::new("dcr.register", AuditOutcome::Failure)
                .with_detail(format!("client_id={client_id} cause={cause}")),
        );
        if let Err(compensation_err) = self.provider.delete_registration(provider_object_id).await {
            error!(
                client_id,
                provider_object_id,
                original_error = %cause,
                compensation_error = %compensation_err,
                "DCR compensating delete failed; orphaned provider registration requires manual cleanup"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::audit::default_audit_sink;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeProvider {
        fail_secret_creation: AtomicBool,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn create_app_registration(&self, req: &DcrRequest) -> OAuthResult<ProviderRegistration> {
            Ok(ProviderRegistration {
                provider_object_id: format!("obj-{}", req.client_name),
                client_id: format!("client-{}", req.client_name),
            })
        }

        async fn create_service_principal(&self, _provider_object_id: &str) -> OAuthResult<()> {
            Ok(())
        }

        async fn create_client_secret(&self, _provider_object_id: &str) -> OAuthResult<ProviderSecret> {
            if self.fail_secret_creation.load(Ordering::SeqCst) {
                return Err(OAuthError::ProviderUnavailable("secret service down".into()));
            }
            Ok(ProviderSecret {
                client_secret: "generated-secret".into(),
                expires_at: Utc::now() + chrono::Duration::days(90),
            })
        }

        async fn update_registration(&self, _provider_object_id: &str, _patch: &DcrPatch) -> OAuthResult<()> {
            Ok(())
        }

        async fn delete_registration(&self, provider_object_id: &str) -> OAuthResult<()> {
            self.deleted.lock().unwrap().push(provider_object_id.to_string());
            Ok(())
        }
    }

    fn sample_request() -> DcrRequest {
        DcrRequest {
            client_name: "demo".into(),
            redirect_uris: vec!["https://portal.example.com/callback".into()],
            scopes: vec!["mcp:tools".into()],
            contacts: vec!["ops@example.com".into()],
            policy_uri: None,
            tos_uri: None,
        }
    }

    #[tokio::test]
    async fn register_persists_secret_and_returns_rfc7591_shape() {
        let provider = Arc::new(FakeProvider { fail_secret_creation: AtomicBool::new(false), deleted: Mutex::new(Vec::new()) });
        let bridge = DcrBridge::new(provider, Arc::new(TokenStore::new_unencrypted()), default_audit_sink());

        let resp = bridge.register(sample_request()).await.unwrap();
        assert_eq!(resp.client_id, "client-demo");
        assert_eq!(resp.client_secret, "generated-secret");
        assert!(resp.client_secret_expires_at > resp.client_id_issued_at);
    }

    #[tokio::test]
    async fn secret_creation_failure_triggers_compensating_delete() {
        let provider = Arc::new(FakeProvider { fail_secret_creation: AtomicBool::new(true), deleted: Mutex::new(Vec::new()) });
        let bridge = DcrBridge::new(provider.clone(), Arc::new(TokenStore::new_unencrypted()), default_audit_sink());

        let err = bridge.register(sample_request()).await.unwrap_err();
        assert!(matches!(err, OAuthError::ProviderUnavailable(_)));
        assert_eq!(provider.deleted.lock().unwrap().as_slice(), ["obj-demo"]);
    }

    #[tokio::test]
    async fn empty_redirect_uris_rejected_before_touching_provider() {
        let provider = Arc::new(FakeProvider { fail_secret_creation: AtomicBool::new(false), deleted: Mutex::new(Vec::new()) });
        let bridge = DcrBridge::new(provider, Arc::new(TokenStore::new_unencrypted()), default_audit_sink());

        let mut req = sample_request();
        req.redirect_uris.clear();
        let err = bridge.register(req).await.unwrap_err();
        assert!(matches!(err, OAuthError::InvalidRedirectUri(_)));
    }

    #[tokio::test]
    async fn delete_removes_provider_registration_and_secret() {
        let provider = Arc::new(FakeProvider { fail_secret_creation: AtomicBool::new(false), deleted: Mutex::new(Vec::new()) });
        let bridge = DcrBridge::new(provider.clone(), Arc::new(TokenStore::new_unencrypted()), default_audit_sink());

        bridge.register(sample_request()).await.unwrap();
        bridge.delete("client-demo").await.unwrap();
        assert_eq!(provider.deleted.lock().unwrap().as_slice(), ["obj-demo"]);
    }
}
