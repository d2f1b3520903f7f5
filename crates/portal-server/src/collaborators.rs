//! Default implementations of the out-of-scope external-collaborator
//! traits (`FlagStore`, the identity provider behind `ProviderClient`).
//! Production deployments swap these for a relational store and a live
//! IdP client; this binary ships the narrowest thing that lets the core
//! run end to end.

use async_trait::async_trait;
use dashmap::DashMap;
use portal_flags::FlagStore;
use portal_oauth::{DcrPatch, DcrRequest, OAuthError, OAuthResult, ProviderClient, ProviderRegistration, ProviderSecret};
use portal_types::FeatureFlag;

/// In-memory `FlagStore`: flags are seeded at startup from config/CLI and
/// held for the process lifetime. A real deployment backs this with a
/// relational store instead.
#[derive(Default)]
pub struct InMemoryFlagStore {
    flags: DashMap<String, FeatureFlag>,
}

impl InMemoryFlagStore {
    pub fn upsert(&self, flag: FeatureFlag) {
        self.flags.insert(flag.name.clone(), flag);
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn load_all(&self) -> Vec<FeatureFlag> {
        self.flags.iter().map(|e| e.value().clone()).collect()
    }
}

/// A `ProviderClient` with no identity provider behind it. Every call
/// fails with `ProviderUnavailable` so `DcrBridge` is fully wired and
/// testable without a live IdP; `portal validate` uses this path by
/// design.
#[derive(Debug, Default)]
pub struct UnconfiguredProviderClient;

#[async_trait]
impl ProviderClient for UnconfiguredProviderClient {
    async fn create_app_registration(&self, _req: &DcrRequest) -> OAuthResult<ProviderRegistration> {
        Err(OAuthError::ProviderUnavailable("no identity provider configured".into()))
    }

    async fn create_service_principal(&self, _provider_object_id: &str) -> OAuthResult<()> {
        Err(OAuthError::ProviderUnavailable("no identity provider configured".into()))
    }

    async fn create_client_secret(&self, _provider_object_id: &str) -> OAuthResult<ProviderSecret> {
        Err(OAuthError::ProviderUnavailable("no identity provider configured".into()))
    }

    async fn update_registration(&self, _provider_object_id: &str, _patch: &DcrPatch) -> OAuthResult<()> {
        Err(OAuthError::ProviderUnavailable("no identity provider configured".into()))
    }

    async fn delete_registration(&self, _provider_object_id: &str) -> OAuthResult<()> {
        Err(OAuthError::ProviderUnavailable("no identity provider configured".into()))
    }
}

