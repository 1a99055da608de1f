//! Authenticated encryption for bucket slots and metadata entries.
//!
//! Every rewrite draws a fresh nonce per slot from the OS RNG, so two
//! encryptions of the same plaintext in the same bucket are distinct with
//! overwhelming probability.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::OramError;
use crate::model::BucketId;

const NONCE_LEN: usize = 12;

/// Per-storage-shard symmetric key. One instance is created per shard at
/// process start and held for the process lifetime.
#[derive(Clone)]
pub struct ShardKey {
    cipher: Aes256Gcm,
}

impl ShardKey {
    /// Derives a shard key from raw key material (32 bytes).
    pub fn from_bytes(raw: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(raw);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Generates a fresh random key, for tests and single-process demos.
    pub fn generate() -> Self {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::from_bytes(&raw)
    }

    /// Encrypts `plaintext`, prepending a freshly drawn 96-bit nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("AES-256-GCM encryption cannot fail for a valid key/nonce pair");

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.append(&mut ciphertext);
        out
    }

    /// Decrypts a nonce-prefixed ciphertext produced by `encrypt`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, OramError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(OramError::AuthError);
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, body)
            .map_err(|_| OramError::AuthError)
    }
}

/// Reserved leading byte marking a decrypted plaintext as a synthetic dummy,
/// so a dummy can be recognised after decryption without extra bookkeeping.
const DUMMY_TAG: u8 = 0xD0;

/// Produces a canonical dummy payload for `(bucket_id, slot_index)`, tagged
/// with a random suffix so no two dummies are bit-identical.
pub fn synthesize_dummy(bucket_id: BucketId, slot_index: u32) -> Vec<u8> {
    let mut tag = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut tag);
    let mut out = Vec::with_capacity(1 + 32 + tag.len());
    out.push(DUMMY_TAG);
    out.extend_from_slice(format!("dummy:{}:{}:", bucket_id, slot_index).as_bytes());
    out.extend_from_slice(hex::encode(tag).as_bytes());
    out
}

/// Returns true if a decrypted plaintext is a synthetic dummy payload.
pub fn is_dummy(plaintext: &[u8]) -> bool {
    plaintext.first() == Some(&DUMMY_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = ShardKey::generate();
        let pt = b"hello oram".to_vec();
        let ct = key.encrypt(&pt);
        assert_eq!(key.decrypt(&ct).unwrap(), pt);
    }

    #[test]
    fn two_encryptions_differ() {
        let key = ShardKey::generate();
        let pt = b"same plaintext".to_vec();
        let a = key.encrypt(&pt);
        let b = key.encrypt(&pt);
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = ShardKey::generate();
        let mut ct = key.encrypt(b"block value");
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(matches!(key.decrypt(&ct), Err(OramError::AuthError)));
    }

    #[test]
    fn dummy_payloads_are_tagged_and_unique() {
        let a = synthesize_dummy(7, 2);
        let b = synthesize_dummy(7, 2);
        assert!(is_dummy(&a));
        assert!(is_dummy(&b));
        assert_ne!(a, b);
    }
}
