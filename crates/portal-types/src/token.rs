//! OAuth token data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered storage tiers; lower = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum StorageTier {
    Vault = 0,
    HostSecretDaemon = 1,
    Env = 2,
}

impl StorageTier {
    pub const ALL_IN_PRIORITY_ORDER: [StorageTier; 3] =
        [StorageTier::Vault, StorageTier::HostSecretDaemon, StorageTier::Env];

    pub fn from_index(i: u8) -> Option<Self> {
        match i {
            0 => Some(StorageTier::Vault),
            1 => Some(StorageTier::HostSecretDaemon),
            2 => Some(StorageTier::Env),
            _ => None,
        }
    }
}

/// One OAuth token for `(serverName, userID)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub refresh_at: DateTime<Utc>,
    pub storage_tier: StorageTier,
}

impl TokenData {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: chrono::Duration,
        refresh_threshold: chrono::Duration,
        scopes: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        let expires_at = now + expires_in;
        Self {
            access_token,
            refresh_token,
            id_token: None,
            token_type: "Bearer".to_string(),
            scopes,
            expires_at,
            refresh_at: expires_at - refresh_threshold,
            storage_tier: StorageTier::Vault,
        }
    }

    /// Invariant: valid iff `now < expiresAt` (provider-specific validation is
    /// layered on by `portal-oauth`, which owns the provider registry).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at && self.refresh_token.is_some()
    }
}
