//! Resolves boolean/percentage/variant flags by (flag, userID, serverID,
//! tenant).

use async_trait::async_trait;
use dashmap::DashMap;
use portal_types::{AuditEvent, AuditOutcome, AuditSink, FeatureFlag, FlagContext, FlagValue};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// External collaborator: where flag definitions are persisted. The
/// relational store backing this is out of scope for this crate; this
/// trait is the narrow seam it needs from it.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn load_all(&self) -> Vec<FeatureFlag>;
}

/// Why `Evaluate` returned the value it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalReason {
    FlagAbsentOrDisabled,
    UserOverride,
    ServerOverride,
    RuleMatch,
    PercentageRollout,
    Default,
}

fn stable_hash_mod_100(input: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let n = u64::from_be_bytes(digest[0..8].try_into().unwrap());
    (n % 100) as u8
}

/// An in-memory flag table refreshed from a `FlagStore` on a watch
/// interval, with a pure, sub-millisecond, no-I/O `evaluate`.
pub struct FeatureFlags {
    flags: DashMap<String, FeatureFlag>,
    audit: Arc<dyn AuditSink>,
    /// Fraction of evaluations that get an audit record when an audit
    /// sampling rule matches; deterministic on `(flag, user)` so repeated
    /// evaluations for the same pair sample consistently.
    audit_sample_percent: u8,
}

impl FeatureFlags {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { flags: DashMap::new(), audit, audit_sample_percent: 1 }
    }

    pub fn with_audit_sample_percent(mut self, percent: u8) -> Self {
        self.audit_sample_percent = percent.min(100);
        self
    }

    pub fn upsert(&self, flag: FeatureFlag) {
        self.flags.insert(flag.name.clone(), flag);
    }

    pub fn get(&self, name: &str) -> Option<FeatureFlag> {
        self.flags.get(name).map(|f| f.clone())
    }

    /// Replaces the whole table from `store`. Callers wire this on a
    /// periodic watch interval against persistent storage.
    pub async fn refresh_from(&self, store: &dyn FlagStore) {
        let loaded = store.load_all().await;
        self.flags.clear();
        for flag in loaded {
            self.flags.insert(flag.name.clone(), flag);
        }
        debug!(count = self.flags.len(), "feature flags refreshed");
    }

    /// Spawns a background task that calls `refresh_from` every `interval`
    /// until the returned handle is dropped/aborted.
    pub fn spawn_watch(self: &Arc<Self>, store: Arc<dyn FlagStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.refresh_from(store.as_ref()).await;
            }
        })
    }

    /// Pure evaluation's six steps. No I/O, no locking beyond the
    /// `DashMap` read.
    #[instrument(skip(self, ctx))]
    pub fn evaluate(&self, flag_name: &str, ctx: &FlagContext) -> (FlagValue, EvalReason) {
        let Some(flag) = self.flags.get(flag_name) else {
            return (FlagValue::Boolean(false), EvalReason::FlagAbsentOrDisabled);
        };

        if !flag.enabled {
            return (flag.default_value.clone(), EvalReason::FlagAbsentOrDisabled);
        }

        if let Some(v) = flag.user_overrides.get(&ctx.user_id.to_string()) {
            return (v.clone(), EvalReason::UserOverride);
        }

        if let Some(server) = &ctx.server_name {
            if let Some(v) = flag.server_overrides.get(server.as_str()) {
                return (v.clone(), EvalReason::ServerOverride);
            }
        }

        for rule in &flag.rules {
            let matches = rule.tenant_ids.is_empty()
                || ctx
                    .tenant_id
                    .map(|t| rule.tenant_ids.contains(&t))
                    .unwrap_or(false);
            if matches {
                return (rule.value.clone(), EvalReason::RuleMatch);
            }
        }

        if flag.rollout_percentage > 0 {
            let sample_key = format!("{}{}", ctx.user_id, flag.name);
            let bucket = stable_hash_mod_100(&sample_key);
            if bucket < flag.rollout_percentage {
                return (FlagValue::Boolean(true), EvalReason::PercentageRollout);
            }
        }

        (flag.default_value.clone(), EvalReason::Default)
    }

    /// `evaluate` plus the audit side effect: emits an evaluation audit
    /// record when an audit sampling rule matches, sampled
    /// deterministically.
    pub fn evaluate_and_audit(&self, flag_name: &str, ctx: &FlagContext) -> FlagValue {
        let (value, reason) = self.evaluate(flag_name, ctx);
        let sample_key = format!("audit:{}{}", ctx.user_id, flag_name);
        if stable_hash_mod_100(&sample_key) < self.audit_sample_percent {
            self.audit.record(
                AuditEvent::new("evaluation", AuditOutcome::Success)
                    .with_user(ctx.user_id)
                    .with_detail(format!(
                        "flag={flag_name} result={value:?} reason={reason:?}"
                    )),
            );
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{audit::default_audit_sink, FlagRule, FlagType, TenantId, UserId};
    use std::collections::HashMap;

    fn ctx(user: UserId) -> FlagContext {
        FlagContext { user_id: user, server_name: None, tenant_id: None }
    }

    #[test]
    fn disabled_flag_returns_default() {
        let flags = FeatureFlags::new(default_audit_sink());
        flags.upsert(FeatureFlag {
            name: "oauth_dcr".into(),
            flag_type: FlagType::Boolean,
            enabled: false,
            default_value: FlagValue::Boolean(false),
            rollout_percentage: 100,
            user_overrides: HashMap::new(),
            server_overrides: HashMap::new(),
            rules: Vec::new(),
            variants: HashMap::new(),
        });
        let (v, reason) = flags.evaluate("oauth_dcr", &ctx(UserId::new()));
        assert_eq!(v, FlagValue::Boolean(false));
        assert_eq!(reason, EvalReason::FlagAbsentOrDisabled);
    }

    #[test]
    fn rollout_zero_percent_always_default() {
        let flags = FeatureFlags::new(default_audit_sink());
        flags.upsert(FeatureFlag::boolean("oauth_dcr", true, false).with_rollout(0));
        for _ in 0..20 {
            let (v, _) = flags.evaluate("oauth_dcr", &ctx(UserId::new()));
            assert_eq!(v, FlagValue::Boolean(false));
        }
    }

    #[test]
    fn rollout_hundred_percent_always_enabled() {
        let flags = FeatureFlags::new(default_audit_sink());
        flags.upsert(FeatureFlag::boolean("oauth_dcr", true, false).with_rollout(100));
        for _ in 0..20 {
            let (v, reason) = flags.evaluate("oauth_dcr", &ctx(UserId::new()));
            assert_eq!(v, FlagValue::Boolean(true));
            assert_eq!(reason, EvalReason::PercentageRollout);
        }
    }

    #[test]
    fn user_override_wins_over_rollout() {
        let flags = FeatureFlags::new(default_audit_sink());
        let user = UserId::new();
        let mut overrides = HashMap::new();
        overrides.insert(user.to_string(), FlagValue::Boolean(false));
        let mut flag = FeatureFlag::boolean("oauth_dcr", true, true).with_rollout(100);
        flag.user_overrides = overrides;
        flags.upsert(flag);

        let (v, reason) = flags.evaluate("oauth_dcr", &ctx(user));
        assert_eq!(v, FlagValue::Boolean(false));
        assert_eq!(reason, EvalReason::UserOverride);
    }

    #[test]
    fn rule_list_evaluated_in_order_first_match_wins() {
        let flags = FeatureFlags::new(default_audit_sink());
        let tenant = TenantId::new();
        let mut flag = FeatureFlag::boolean("oauth_dcr", true, false);
        flag.rules = vec![
            FlagRule { tenant_ids: vec![tenant], value: FlagValue::Boolean(true) },
            FlagRule { tenant_ids: vec![], value: FlagValue::Boolean(false) },
        ];
        flags.upsert(flag);

        let ctx_with_tenant = FlagContext { user_id: UserId::new(), server_name: None, tenant_id: Some(tenant) };
        let (v, reason) = flags.evaluate("oauth_dcr", &ctx_with_tenant);
        assert_eq!(v, FlagValue::Boolean(true));
        assert_eq!(reason, EvalReason::RuleMatch);
    }

    #[test]
    fn absent_flag_is_disabled_default() {
        let flags = FeatureFlags::new(default_audit_sink());
        let (v, reason) = flags.evaluate("does-not-exist", &ctx(UserId::new()));
        assert_eq!(v, FlagValue::Boolean(false));
        assert_eq!(reason, EvalReason::FlagAbsentOrDisabled);
    }
}
