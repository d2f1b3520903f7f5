//! Tier adapters implementing the common `SecretTier` capability —
//! hierarchical storage that `TokenStore` iterates by priority.

use crate::error::{TokenStoreError, TokenStoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use portal_types::{ServerName, StorageTier, TokenData, UserId};

fn key(server: &ServerName, user: &UserId) -> String {
    format!("oauth-token-{server}-{user}")
}

#[async_trait]
pub trait SecretTier: Send + Sync {
    fn tier(&self) -> StorageTier;
    async fn get(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<Option<TokenData>>;
    async fn set(&self, server: &ServerName, user: &UserId, token: &TokenData) -> TokenStoreResult<()>;
    async fn delete(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<bool>;
    async fn list(&self, user: &UserId) -> TokenStoreResult<Vec<(ServerName, TokenData)>>;
}

/// Tier 0: a managed secret vault. Modeled here as an in-process encrypted
/// map standing in for an HTTP-backed KV-v2 style vault client; `TokenStore`
/// layers the `Cipher` on top, so what lands here is already ciphertext-sized
/// `TokenData` (plaintext fields, opaque bytes are handled one level up).
#[derive(Default)]
pub struct VaultTier {
    entries: DashMap<String, (ServerName, TokenData)>,
}

#[async_trait]
impl SecretTier for VaultTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Vault
    }

    async fn get(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<Option<TokenData>> {
        Ok(self.entries.get(&key(server, user)).map(|e| e.1.clone()))
    }

    async fn set(&self, server: &ServerName, user: &UserId, token: &TokenData) -> TokenStoreResult<()> {
        self.entries
            .insert(key(server, user), (server.clone(), token.clone()));
        Ok(())
    }

    async fn delete(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<bool> {
        Ok(self.entries.remove(&key(server, user)).is_some())
    }

    async fn list(&self, user: &UserId) -> TokenStoreResult<Vec<(ServerName, TokenData)>> {
        let prefix = format!("oauth-token-");
        let suffix = format!("-{user}");
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix) && e.key().ends_with(&suffix))
            .map(|e| e.value().clone())
            .collect())
    }
}

/// Tier 1: a host-local secret daemon, reached over a Redis wire protocol.
/// Behind the `host-daemon-redis` feature; an in-memory stand-in is used
/// otherwise so the crate builds without a live daemon in unit tests.
#[cfg(feature = "host-daemon-redis")]
pub struct HostSecretDaemonTier {
    client: redis::Client,
    prefix: String,
}

#[cfg(feature = "host-daemon-redis")]
impl HostSecretDaemonTier {
    pub fn new(connection_string: &str) -> TokenStoreResult<Self> {
        let client = redis::Client::open(connection_string)
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            prefix: "portal:token:".to_string(),
        })
    }
}

#[cfg(feature = "host-daemon-redis")]
#[async_trait]
impl SecretTier for HostSecretDaemonTier {
    fn tier(&self) -> StorageTier {
        StorageTier::HostSecretDaemon
    }

    async fn get(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<Option<TokenData>> {
        use redis::AsyncCommands;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        let raw: Option<String> = conn
            .get(format!("{}{}", self.prefix, key(server, user)))
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(TokenStoreError::from))
            .transpose()
    }

    async fn set(&self, server: &ServerName, user: &UserId, token: &TokenData) -> TokenStoreResult<()> {
        use redis::AsyncCommands;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        let raw = serde_json::to_string(token)?;
        let _: () = conn
            .set(format!("{}{}", self.prefix, key(server, user)), raw)
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<bool> {
        use redis::AsyncCommands;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        let removed: i64 = conn
            .del(format!("{}{}", self.prefix, key(server, user)))
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn list(&self, user: &UserId) -> TokenStoreResult<Vec<(ServerName, TokenData)>> {
        use redis::AsyncCommands;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        let pattern = format!("{}oauth-token-*-{}", self.prefix, user);
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        for k in keys {
            if let Some(raw) = conn
                .get::<_, Option<String>>(&k)
                .await
                .map_err(|e| TokenStoreError::TierUnavailable(e.to_string()))?
            {
                let token: TokenData = serde_json::from_str(&raw)?;
                let name = k
                    .trim_start_matches(&self.prefix)
                    .trim_start_matches("oauth-token-")
                    .rsplit_once('-')
                    .map(|(n, _)| n.to_string())
                    .unwrap_or_default();
                out.push((ServerName::new(name), token));
            }
        }
        Ok(out)
    }
}

#[cfg(not(feature = "host-daemon-redis"))]
#[derive(Default)]
pub struct HostSecretDaemonTier {
    entries: DashMap<String, (ServerName, TokenData)>,
}

#[cfg(not(feature = "host-daemon-redis"))]
#[async_trait]
impl SecretTier for HostSecretDaemonTier {
    fn tier(&self) -> StorageTier {
        StorageTier::HostSecretDaemon
    }

    async fn get(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<Option<TokenData>> {
        Ok(self.entries.get(&key(server, user)).map(|e| e.1.clone()))
    }

    async fn set(&self, server: &ServerName, user: &UserId, token: &TokenData) -> TokenStoreResult<()> {
        self.entries
            .insert(key(server, user), (server.clone(), token.clone()));
        Ok(())
    }

    async fn delete(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<bool> {
        Ok(self.entries.remove(&key(server, user)).is_some())
    }

    async fn list(&self, user: &UserId) -> TokenStoreResult<Vec<(ServerName, TokenData)>> {
        let suffix = format!("-{user}");
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().ends_with(&suffix))
            .map(|e| e.value().clone())
            .collect())
    }
}

/// Tier 2: process environment variables, e.g. `PORTAL_TOKEN_<SERVER>_<USER>`.
/// The lowest-priority, least-durable tier — a last resort when nothing else
/// is reachable (used heavily in local development).
#[derive(Default)]
pub struct EnvTier;

impl EnvTier {
    fn env_key(server: &ServerName, user: &UserId) -> String {
        format!(
            "PORTAL_TOKEN_{}_{}",
            server.as_str().to_uppercase().replace(['-', '.'], "_"),
            user.to_string().replace('-', "")
        )
    }
}

#[async_trait]
impl SecretTier for EnvTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Env
    }

    async fn get(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<Option<TokenData>> {
        match std::env::var(Self::env_key(server, user)) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(_) => Ok(None),
        }
    }

    async fn set(&self, server: &ServerName, user: &UserId, token: &TokenData) -> TokenStoreResult<()> {
        let raw = serde_json::to_string(token)?;
        // SAFETY: single-threaded mutation of the process environment is the
        // documented contract of this lowest-priority tier; callers accept
        // the same caveats std::env::set_var always carried.
        unsafe {
            std::env::set_var(Self::env_key(server, user), raw);
        }
        Ok(())
    }

    async fn delete(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<bool> {
        let had = std::env::var(Self::env_key(server, user)).is_ok();
        unsafe {
            std::env::remove_var(Self::env_key(server, user));
        }
        Ok(had)
    }

    async fn list(&self, _user: &UserId) -> TokenStoreResult<Vec<(ServerName, TokenData)>> {
        // Enumerating arbitrary server names out of the environment would
        // require a naming convention strict enough to reverse; the env
        // tier is a last-resort single-token fallback, not a catalog.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample_token() -> TokenData {
        TokenData::new(
            "access".into(),
            Some("refresh".into()),
            ChronoDuration::seconds(3600),
            ChronoDuration::seconds(300),
            vec!["mcp:tools".into()],
        )
    }

    #[tokio::test]
    async fn vault_tier_round_trips() {
        let tier = VaultTier::default();
        let server = ServerName::new("alpha");
        let user = UserId::new();
        assert!(tier.get(&server, &user).await.unwrap().is_none());
        tier.set(&server, &user, &sample_token()).await.unwrap();
        assert!(tier.get(&server, &user).await.unwrap().is_some());
        assert!(tier.delete(&server, &user).await.unwrap());
        assert!(tier.get(&server, &user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn env_tier_round_trips() {
        let tier = EnvTier;
        let server = ServerName::new("beta-env-test");
        let user = UserId::new();
        tier.set(&server, &user, &sample_token()).await.unwrap();
        let got = tier.get(&server, &user).await.unwrap();
        assert!(got.is_some());
        assert!(tier.delete(&server, &user).await.unwrap());
    }
}
