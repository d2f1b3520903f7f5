//! Pluggable at-rest encryption.
//!
//! Production uses AEAD keyed by a rotating root key; tests inject
//! [`NoopCipher`].

use crate::error::{TokenStoreError, TokenStoreResult};
use ring::aead::{self, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::RwLock;
use zeroize::Zeroizing;

/// A capability for authenticated encryption/decryption of opaque blobs,
/// kept narrow so callers depend on a trait rather than one hard-wired
/// cipher implementation.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> TokenStoreResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> TokenStoreResult<Vec<u8>>;
}

/// No-op cipher for tests: "encrypts" by passing bytes through unchanged.
#[derive(Debug, Default)]
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plaintext: &[u8]) -> TokenStoreResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> TokenStoreResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

struct CounterNonce(u64);

impl NonceSequence for CounterNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        let mut bytes = [0u8; aead::NONCE_LEN];
        bytes[4..].copy_from_slice(&self.0.to_be_bytes());
        self.0 = self.0.wrapping_add(1);
        Nonce::try_assume_unique_for_key(&bytes)
    }
}

/// One generation of root key material. Old generations are retained long
/// enough to decrypt data sealed under them, so keys rotate without
/// requiring re-enrollment.
struct KeyGeneration {
    id: u32,
    key_bytes: Zeroizing<[u8; 32]>,
}

/// AEAD (AES-256-GCM) cipher keyed by a rotating root key bound to process
/// identity. The wire format is `[generation: u32 LE][nonce: 12][ciphertext+tag]`.
pub struct AeadCipher {
    rng: SystemRandom,
    generations: RwLock<Vec<KeyGeneration>>,
}

impl AeadCipher {
    /// Derives the initial key generation from `root_key_material` (e.g. a
    /// KMS-unwrapped key or a key derived from host identity upstream).
    pub fn new(root_key_material: [u8; 32]) -> Self {
        Self {
            rng: SystemRandom::new(),
            generations: RwLock::new(vec![KeyGeneration {
                id: 0,
                key_bytes: Zeroizing::new(root_key_material),
            }]),
        }
    }

    /// Rotates in a new key generation; previous generations remain available
    /// for decryption.
    pub fn rotate(&self, new_root_key_material: [u8; 32]) {
        let mut generations = self.generations.write().unwrap();
        let next_id = generations.last().map(|g| g.id + 1).unwrap_or(0);
        generations.push(KeyGeneration {
            id: next_id,
            key_bytes: Zeroizing::new(new_root_key_material),
        });
    }

    fn current_generation_key(&self) -> (u32, [u8; 32]) {
        let generations = self.generations.read().unwrap();
        let gen = generations.last().expect("at least one key generation");
        (gen.id, *gen.key_bytes)
    }

    fn key_for_generation(&self, id: u32) -> Option<[u8; 32]> {
        self.generations
            .read()
            .unwrap()
            .iter()
            .find(|g| g.id == id)
            .map(|g| *g.key_bytes)
    }
}

impl Cipher for AeadCipher {
    fn encrypt(&self, plaintext: &[u8]) -> TokenStoreResult<Vec<u8>> {
        let (generation, key_bytes) = self.current_generation_key();
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
            .map_err(|_| TokenStoreError::Crypto("invalid key length".into()))?;

        let mut nonce_bytes = [0u8; aead::NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| TokenStoreError::Crypto("rng failure".into()))?;
        let mut sealing = SealingKey::new(unbound, CounterNonce(u64::from_be_bytes(
            nonce_bytes[4..].try_into().unwrap(),
        )));

        let mut in_out = plaintext.to_vec();
        sealing
            .seal_in_place_append_tag(aead::Aad::empty(), &mut in_out)
            .map_err(|_| TokenStoreError::Crypto("seal failure".into()))?;

        let mut out = Vec::with_capacity(4 + aead::NONCE_LEN + in_out.len());
        out.extend_from_slice(&generation.to_le_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> TokenStoreResult<Vec<u8>> {
        if ciphertext.len() < 4 + aead::NONCE_LEN {
            return Err(TokenStoreError::Crypto("ciphertext too short".into()));
        }
        let generation = u32::from_le_bytes(ciphertext[0..4].try_into().unwrap());
        let nonce_bytes: [u8; aead::NONCE_LEN] =
            ciphertext[4..4 + aead::NONCE_LEN].try_into().unwrap();
        let body = &ciphertext[4 + aead::NONCE_LEN..];

        let key_bytes = self
            .key_for_generation(generation)
            .ok_or_else(|| TokenStoreError::Crypto("unknown key generation".into()))?;
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
            .map_err(|_| TokenStoreError::Crypto("invalid key length".into()))?;
        let mut opening = OpeningKey::new(
            unbound,
            CounterNonce(u64::from_be_bytes(nonce_bytes[4..].try_into().unwrap())),
        );

        let mut in_out = body.to_vec();
        let plaintext = opening
            .open_in_place(aead::Aad::empty(), &mut in_out)
            .map_err(|_| TokenStoreError::Crypto("open failure (tampered or wrong key)".into()))?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_round_trips() {
        let cipher = AeadCipher::new([7u8; 32]);
        let pt = b"access-token-material";
        let ct = cipher.encrypt(pt).unwrap();
        assert_ne!(ct, pt);
        let back = cipher.decrypt(&ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn aead_survives_rotation_for_old_ciphertext() {
        let cipher = AeadCipher::new([1u8; 32]);
        let pt = b"token-before-rotation";
        let ct = cipher.encrypt(pt).unwrap();
        cipher.rotate([2u8; 32]);
        // Old ciphertext still decrypts under the retained key generation.
        assert_eq!(cipher.decrypt(&ct).unwrap(), pt);
        // New encryptions use the new generation.
        let ct2 = cipher.encrypt(pt).unwrap();
        assert_eq!(cipher.decrypt(&ct2).unwrap(), pt);
    }

    #[test]
    fn noop_cipher_passes_through() {
        let cipher = NoopCipher;
        let pt = b"plain";
        assert_eq!(cipher.encrypt(pt).unwrap(), pt);
    }
}
