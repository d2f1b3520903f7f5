//! Application state: wires every component crate together behind one
//! `Clone`-able handle threaded through every axum handler via
//! `State<AppState>`.

use crate::collaborators::{InMemoryFlagStore, UnconfiguredProviderClient};
use crate::config::PortalConfig;
use portal_bulk::{BulkEngine, InMemoryBulkStore};
use portal_events::EventFabric;
use portal_executor::{CommandExecutor, RateLimitConfig, SubprocessExecutor};
use portal_flags::FeatureFlags;
use portal_oauth::{DcrBridge, OAuthInterceptor, ProviderRegistry};
use portal_state::{InMemoryLongLivedCache, StateManager};
use portal_tokenstore::TokenStore;
use portal_types::audit::default_audit_sink;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub state: Arc<StateManager>,
    pub fabric: Arc<EventFabric>,
    pub executor: Arc<dyn CommandExecutor>,
    pub bulk: Arc<BulkEngine>,
    pub oauth: Arc<OAuthInterceptor>,
    pub dcr: Arc<DcrBridge>,
    pub flags: Arc<FeatureFlags>,
    pub providers: Arc<ProviderRegistry>,
}

impl AppState {
    /// Wires every component with its real/in-process collaborators. Used
    /// by both `serve` and `validate` — `validate` swaps the
    /// `CommandExecutor` for a no-op one beforehand.
    pub async fn bootstrap(config: &PortalConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        let audit = default_audit_sink();

        let fabric = Arc::new(EventFabric::default());
        let state = Arc::new(StateManager::new(Arc::new(InMemoryLongLivedCache::default()), Some(Arc::clone(&fabric))));

        let tokens = Arc::new(TokenStore::new_unencrypted());
        let providers = Arc::new(ProviderRegistry::new());
        let oauth = Arc::new(OAuthInterceptor::new(Arc::clone(&providers), Arc::clone(&tokens), Arc::clone(&audit)));
        let dcr = Arc::new(DcrBridge::new(Arc::new(UnconfiguredProviderClient), Arc::clone(&tokens), Arc::clone(&audit)));

        let flag_store = Arc::new(InMemoryFlagStore::default());
        for (name, override_) in &config.feature_oauth {
            flag_store.upsert(portal_types::FeatureFlag::boolean(
                name.clone(),
                override_.enabled,
                false,
            ).with_rollout(override_.rollout_percentage));
        }
        let flags = Arc::new(FeatureFlags::new(Arc::clone(&audit)));
        flags.refresh_from(flag_store.as_ref()).await;
        flags.spawn_watch(Arc::clone(&flag_store), config.flag_refresh_interval);

        let bulk = Arc::new(BulkEngine::new(
            Arc::clone(&executor),
            Arc::clone(&state),
            Arc::clone(&fabric),
            Arc::new(InMemoryBulkStore::default()),
            Arc::clone(&audit),
        ));

        Self { state, fabric, executor, bulk, oauth, dcr, flags, providers }
    }

    pub fn executor_for_config(config: &PortalConfig, audit: Arc<dyn portal_types::AuditSink>) -> Arc<dyn CommandExecutor> {
        Arc::new(SubprocessExecutor::new(config.executor_binary_path.clone(), RateLimitConfig::default(), audit))
    }
}
