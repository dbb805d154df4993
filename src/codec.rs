/// Payload encryption for the wire envelope.
///
/// The engine treats the cipher as an opaque collaborator: a JSON value in,
/// a ciphertext string out, both asynchronous and fallible. The default
/// implementation derives a key from the configured shared secret via
/// HKDF-SHA256 and seals with XChaCha20-Poly1305.
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use serde_json::Value;
use sha2::Sha256;

use crate::error::PeerLinkError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"peerlink-envelope-xchacha20poly1305-v1";

/// 24-byte nonce (XChaCha20 extended nonce, safe to generate randomly).
const NONCE_LEN: usize = 24;

/// Symmetric payload cipher, keyed by the shared secret both sides of a
/// channel configure.
#[async_trait]
pub trait Cipher: Send + Sync {
    async fn encrypt(&self, value: &Value) -> Result<String, PeerLinkError>;
    async fn decrypt(&self, ciphertext: &str) -> Result<Value, PeerLinkError>;
}

/// Default cipher. String form is `base64(nonce || ciphertext)`.
pub struct SharedKeyCipher {
    key: [u8; 32],
}

impl SharedKeyCipher {
    /// Build a cipher from the shared secret string.
    pub fn new(secret: &str) -> Self {
        Self {
            key: derive_key(secret.as_bytes()),
        }
    }
}

/// Derive a 32-byte encryption key from the shared secret using HKDF-SHA256.
fn derive_key(secret: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

#[async_trait]
impl Cipher for SharedKeyCipher {
    async fn encrypt(&self, value: &Value) -> Result<String, PeerLinkError> {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

        let plaintext =
            serde_json::to_vec(value).map_err(|e| PeerLinkError::Serialization(e.to_string()))?;

        let cipher = XChaCha20Poly1305::new(&self.key.into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| PeerLinkError::Crypto(format!("encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<Value, PeerLinkError> {
        let combined = BASE64
            .decode(ciphertext)
            .map_err(|e| PeerLinkError::Crypto(format!("invalid ciphertext encoding: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(PeerLinkError::Crypto("ciphertext too short".into()));
        }

        let (nonce_bytes, body) = combined.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let nonce = XNonce::from(nonce);

        let cipher = XChaCha20Poly1305::new(&self.key.into());
        let plaintext = cipher
            .decrypt(&nonce, body)
            .map_err(|_| PeerLinkError::Crypto("decryption failed: authentication error".into()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| PeerLinkError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn encrypt_decrypt_roundtrip() {
        let cipher = SharedKeyCipher::new("test-secret");
        let value = json!({"kind": "greeting", "count": 42, "nested": [1, 2, 3]});

        let sealed = cipher.encrypt(&value).await.unwrap();
        let opened = cipher.decrypt(&sealed).await.unwrap();

        assert_eq!(opened, value);
    }

    #[tokio::test]
    async fn null_payload_roundtrip() {
        let cipher = SharedKeyCipher::new("test-secret");
        let sealed = cipher.encrypt(&Value::Null).await.unwrap();
        assert_eq!(cipher.decrypt(&sealed).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn wrong_key_fails() {
        let alice = SharedKeyCipher::new("alice-secret");
        let mallory = SharedKeyCipher::new("mallory-secret");

        let sealed = alice.encrypt(&json!("secret")).await.unwrap();
        assert!(mallory.decrypt(&sealed).await.is_err());
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails() {
        let cipher = SharedKeyCipher::new("test-secret");
        let sealed = cipher.encrypt(&json!("secret")).await.unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);

        assert!(cipher.decrypt(&tampered).await.is_err());
    }

    #[tokio::test]
    async fn truncated_input_fails() {
        let cipher = SharedKeyCipher::new("test-secret");
        assert!(cipher.decrypt("AAAA").await.is_err());
        assert!(cipher.decrypt("not base64 at all!!!").await.is_err());
    }

    #[tokio::test]
    async fn different_encryptions_differ() {
        let cipher = SharedKeyCipher::new("test-secret");
        let s1 = cipher.encrypt(&json!("same message")).await.unwrap();
        let s2 = cipher.encrypt(&json!("same message")).await.unwrap();
        // Fresh random nonce each time
        assert_ne!(s1, s2);
    }

    #[test]
    fn key_derivation_deterministic() {
        assert_eq!(derive_key(b"secret"), derive_key(b"secret"));
        assert_ne!(derive_key(b"secret"), derive_key(b"other"));
    }

    proptest! {
        #[test]
        fn arbitrary_payload_roundtrips(text in ".*", count in any::<i64>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let cipher = SharedKeyCipher::new("prop-secret");
                let value = json!({"text": text, "count": count});
                let sealed = cipher.encrypt(&value).await.unwrap();
                let opened = cipher.decrypt(&sealed).await.unwrap();
                assert_eq!(opened, value);
            });
        }
    }
}
