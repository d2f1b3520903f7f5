//! Hierarchical persistence of OAuth tokens across storage tiers.
//!
//! `TokenStore` composes [`tier::SecretTier`] adapters in priority order
//! (Vault → HostSecretDaemon → Env) and layers an optional [`cipher::Cipher`]
//! on top so callers never see ciphertext — tiers always receive and return
//! plaintext `TokenData`, with the secret fields swapped for their
//! base64-encoded ciphertext just before/after crossing the tier boundary.
//! The crypto capability is layered over the storage capability rather
//! than baked into each backend.

pub mod cipher;
pub mod error;
pub mod tier;

pub use cipher::{AeadCipher, Cipher, NoopCipher};
pub use error::{TokenStoreError, TokenStoreResult};
pub use tier::{EnvTier, HostSecretDaemonTier, SecretTier, VaultTier};

use base64::Engine as _;
use portal_types::{ServerName, StorageTier, TokenData, UserId};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn unb64(s: &str) -> TokenStoreResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| TokenStoreError::Crypto(format!("invalid base64: {e}")))
}

/// Classifies an error as "this tier is just unreachable" (eligible for
/// silent fallback,  "Failure semantics") vs. something that must
/// surface (authorization failure).
fn is_unavailability(err: &TokenStoreError) -> bool {
    matches!(err, TokenStoreError::TierUnavailable(_))
}

/// TokenStore: composes ordered tiers plus an optional at-rest cipher.
pub struct TokenStore {
    tiers: Vec<Arc<dyn SecretTier>>,
    cipher: Arc<dyn Cipher>,
}

impl TokenStore {
    /// Builds a store with the three standard tiers in priority order and a
    /// no-op cipher (tests / encryption disabled).
    pub fn new_unencrypted() -> Self {
        Self {
            tiers: vec![
                Arc::new(VaultTier::default()),
                Arc::new(HostSecretDaemonTier::default()),
                Arc::new(EnvTier),
            ],
            cipher: Arc::new(NoopCipher),
        }
    }

    /// Builds a store with an explicit tier list and cipher; used when the
    /// host-daemon tier is wired to a live Redis connection, or a custom
    /// tier ordering is required.
    pub fn new(tiers: Vec<Arc<dyn SecretTier>>, cipher: Arc<dyn Cipher>) -> Self {
        Self { tiers, cipher }
    }

    fn tier_at(&self, tier: StorageTier) -> Option<&Arc<dyn SecretTier>> {
        self.tiers.iter().find(|t| t.tier() == tier)
    }

    /// Tiers in priority order, starting at `preferred` and wrapping through
    /// the rest — used by `Store` to try the preferred tier first, then fall
    /// back
    fn order_from(&self, preferred: StorageTier) -> Vec<&Arc<dyn SecretTier>> {
        let mut ordered: Vec<&Arc<dyn SecretTier>> = self
            .tiers
            .iter()
            .filter(|t| t.tier() == preferred)
            .collect();
        ordered.extend(
            self.tiers
                .iter()
                .filter(|t| t.tier() != preferred)
                .collect::<Vec<_>>(),
        );
        ordered.sort_by_key(|t| if t.tier() == preferred { 0 } else { 1 + t.tier() as u8 });
        ordered
    }

    fn encrypt_secrets(&self, token: &TokenData) -> TokenStoreResult<TokenData> {
        let mut out = token.clone();
        out.access_token = b64(&self.cipher.encrypt(token.access_token.as_bytes())?);
        out.refresh_token = token
            .refresh_token
            .as_ref()
            .map(|t| -> TokenStoreResult<String> { Ok(b64(&self.cipher.encrypt(t.as_bytes())?)) })
            .transpose()?;
        out.id_token = token
            .id_token
            .as_ref()
            .map(|t| -> TokenStoreResult<String> { Ok(b64(&self.cipher.encrypt(t.as_bytes())?)) })
            .transpose()?;
        Ok(out)
    }

    fn decrypt_secrets(&self, token: TokenData) -> TokenStoreResult<TokenData> {
        let mut out = token;
        let raw = unb64(&out.access_token)?;
        out.access_token = String::from_utf8(self.cipher.decrypt(&raw)?)
            .map_err(|e| TokenStoreError::Crypto(format!("non-utf8 plaintext: {e}")))?;
        out.refresh_token = out
            .refresh_token
            .as_ref()
            .map(|t| -> TokenStoreResult<String> {
                let raw = unb64(t)?;
                String::from_utf8(self.cipher.decrypt(&raw)?)
                    .map_err(|e| TokenStoreError::Crypto(format!("non-utf8 plaintext: {e}")))
            })
            .transpose()?;
        out.id_token = out
            .id_token
            .as_ref()
            .map(|t| -> TokenStoreResult<String> {
                let raw = unb64(t)?;
                String::from_utf8(self.cipher.decrypt(&raw)?)
                    .map_err(|e| TokenStoreError::Crypto(format!("non-utf8 plaintext: {e}")))
            })
            .transpose()?;
        Ok(out)
    }

    /// Attempts tiers in priority order starting at `preferred_tier`; on
    /// failure falls back to the next tier and updates `token.storageTier`
    /// to reflect where it actually landed.
    #[instrument(skip(self, token), fields(server = %server, tier = ?preferred_tier))]
    pub async fn store(
        &self,
        server: &ServerName,
        user: &UserId,
        mut token: TokenData,
        preferred_tier: StorageTier,
    ) -> TokenStoreResult<TokenData> {
        let sealed = self.encrypt_secrets(&token)?;
        for candidate in self.order_from(preferred_tier) {
            match candidate.set(server, user, &sealed).await {
                Ok(()) => {
                    token.storage_tier = candidate.tier();
                    debug!(landed_tier = ?candidate.tier(), "token stored");
                    return Ok(token);
                }
                Err(e) if is_unavailability(&e) => {
                    warn!(tier = ?candidate.tier(), error = %e, "tier unavailable, falling back");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(TokenStoreError::StorageUnavailable)
    }

    /// Probes tiers in priority order; returns the first hit.
    /// Unavailability on the top tier falls through silently; authorization
    /// failures surface immediately.
    #[instrument(skip(self), fields(server = %server))]
    pub async fn get(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<TokenData> {
        for tier in &self.tiers {
            match tier.get(server, user).await {
                Ok(Some(sealed)) => return self.decrypt_secrets(sealed),
                Ok(None) => continue,
                Err(e) if is_unavailability(&e) => {
                    warn!(tier = ?tier.tier(), error = %e, "tier unavailable on read, falling through");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(TokenStoreError::NotFound)
    }

    /// Best-effort removal from every tier; succeeds if at least one tier
    /// had and removed the token.
    #[instrument(skip(self), fields(server = %server))]
    pub async fn delete(&self, server: &ServerName, user: &UserId) -> TokenStoreResult<bool> {
        let mut removed_any = false;
        for tier in &self.tiers {
            match tier.delete(server, user).await {
                Ok(removed) => removed_any |= removed,
                Err(e) if is_unavailability(&e) => {
                    warn!(tier = ?tier.tier(), error = %e, "tier unavailable on delete");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed_any)
    }

    /// Union across tiers; on collision (same `serverName` in two tiers) the
    /// higher-priority tier wins.
    pub async fn list(&self, user: &UserId) -> TokenStoreResult<Vec<(ServerName, TokenData)>> {
        use std::collections::HashMap;
        let mut by_name: HashMap<ServerName, (StorageTier, TokenData)> = HashMap::new();
        for tier in &self.tiers {
            let entries = match tier.list(user).await {
                Ok(entries) => entries,
                Err(e) if is_unavailability(&e) => continue,
                Err(e) => return Err(e),
            };
            for (name, sealed) in entries {
                let better = by_name
                    .get(&name)
                    .map(|(t, _)| tier.tier() < *t)
                    .unwrap_or(true);
                if better {
                    let plain = self.decrypt_secrets(sealed)?;
                    by_name.insert(name, (tier.tier(), plain));
                }
            }
        }
        Ok(by_name
            .into_iter()
            .map(|(name, (_, token))| (name, token))
            .collect())
    }

    /// Tier accessor used by `DCRBridge` to persist `oauth-client-<clientID>`
    /// entries through the same hierarchy without going through the
    /// `(serverName, userID)` keyspace.
    pub fn tier(&self, tier: StorageTier) -> Option<&Arc<dyn SecretTier>> {
        self.tier_at(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn sample() -> TokenData {
        TokenData::new(
            "access-material".into(),
            Some("refresh-material".into()),
            ChronoDuration::seconds(3600),
            ChronoDuration::seconds(300),
            vec!["mcp:tools".into()],
        )
    }

    #[tokio::test]
    async fn store_then_get_round_trips_plaintext() {
        let store = TokenStore::new_unencrypted();
        let server = ServerName::new("alpha");
        let user = UserId::new();
        let stored = store
            .store(&server, &user, sample(), StorageTier::Vault)
            .await
            .unwrap();
        assert_eq!(stored.storage_tier, StorageTier::Vault);

        let got = store.get(&server, &user).await.unwrap();
        assert_eq!(got.access_token, "access-material");
        assert_eq!(got.refresh_token.as_deref(), Some("refresh-material"));
    }

    #[tokio::test]
    async fn round_trips_with_aead_cipher() {
        let store = TokenStore::new(
            vec![
                Arc::new(VaultTier::default()),
                Arc::new(HostSecretDaemonTier::default()),
                Arc::new(EnvTier),
            ],
            Arc::new(AeadCipher::new([9u8; 32])),
        );
        let server = ServerName::new("alpha");
        let user = UserId::new();
        store
            .store(&server, &user, sample(), StorageTier::Vault)
            .await
            .unwrap();
        let got = store.get(&server, &user).await.unwrap();
        assert_eq!(got.access_token, "access-material");
    }

    #[tokio::test]
    async fn higher_priority_tier_wins_on_write_then_read() {
        let store = TokenStore::new_unencrypted();
        let server = ServerName::new("alpha");
        let user = UserId::new();

        // Write directly lands in HostSecretDaemon (lower priority).
        store
            .store(&server, &user, sample(), StorageTier::HostSecretDaemon)
            .await
            .unwrap();
        // A later write at Vault (higher priority) should be observed first.
        let mut newer = sample();
        newer.access_token = "newer-access".into();
        store
            .store(&server, &user, newer, StorageTier::Vault)
            .await
            .unwrap();

        let got = store.get(&server, &user).await.unwrap();
        assert_eq!(got.access_token, "newer-access");
    }

    #[tokio::test]
    async fn delete_is_best_effort_across_tiers() {
        let store = TokenStore::new_unencrypted();
        let server = ServerName::new("alpha");
        let user = UserId::new();
        store
            .store(&server, &user, sample(), StorageTier::Vault)
            .await
            .unwrap();
        assert!(store.delete(&server, &user).await.unwrap());
        assert!(matches!(
            store.get(&server, &user).await,
            Err(TokenStoreError::NotFound)
        ));
        // Second delete finds nothing left.
        assert!(!store.delete(&server, &user).await.unwrap());
    }

    #[tokio::test]
    async fn list_unions_across_tiers_with_priority_collision_resolution() {
        let store = TokenStore::new_unencrypted();
        let user = UserId::new();
        store
            .store(
                &ServerName::new("alpha"),
                &user,
                sample(),
                StorageTier::Vault,
            )
            .await
            .unwrap();
        store
            .store(
                &ServerName::new("beta"),
                &user,
                sample(),
                StorageTier::HostSecretDaemon,
            )
            .await
            .unwrap();
        let listed = store.list(&user).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = TokenStore::new_unencrypted();
        let err = store
            .get(&ServerName::new("nope"), &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenStoreError::NotFound));
    }
}
