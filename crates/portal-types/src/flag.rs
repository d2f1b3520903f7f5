//! Feature flag data model.

use crate::ids::{ServerName, TenantId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    Percentage,
    Variant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Boolean(bool),
    Variant(String),
    Raw(Value),
}

/// One rule in the evaluation rule list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagRule {
    /// Matches when the context's tenant is in this list (empty = wildcard).
    pub tenant_ids: Vec<TenantId>,
    pub value: FlagValue,
}

/// The context passed to `Evaluate`.
#[derive(Debug, Clone)]
pub struct FlagContext {
    pub user_id: UserId,
    pub server_name: Option<ServerName>,
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub flag_type: FlagType,
    pub enabled: bool,
    pub default_value: FlagValue,
    pub rollout_percentage: u8,
    pub user_overrides: HashMap<String, FlagValue>,
    pub server_overrides: HashMap<String, FlagValue>,
    pub rules: Vec<FlagRule>,
    pub variants: HashMap<String, FlagValue>,
}

impl FeatureFlag {
    pub fn boolean(name: impl Into<String>, enabled: bool, default: bool) -> Self {
        Self {
            name: name.into(),
            flag_type: FlagType::Boolean,
            enabled,
            default_value: FlagValue::Boolean(default),
            rollout_percentage: 0,
            user_overrides: HashMap::new(),
            server_overrides: HashMap::new(),
            rules: Vec::new(),
            variants: HashMap::new(),
        }
    }

    pub fn with_rollout(mut self, percentage: u8) -> Self {
        self.rollout_percentage = percentage;
        self
    }
}
