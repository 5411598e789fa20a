//! Secret Vault: symmetric AES-256-GCM over a process-wide key.
//!
//! Credential blobs are persisted as opaque envelopes
//! `enc:v1:<base64(nonce || ciphertext)>`. If the key is absent at startup,
//! vault construction fails and all secret writes fail closed with it.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CoreError;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Process-wide symmetric cipher for credential blobs
#[derive(Clone)]
pub struct SecretVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}

impl SecretVault {
    /// Build the vault from a base64-encoded 256-bit key
    /// (the `SECRETS_ENC_KEY` environment variable).
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CoreError> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|_| CoreError::Validation("SECRETS_ENC_KEY is not valid base64".to_string()))?;
        if key.len() != KEY_LEN {
            return Err(CoreError::Validation(format!(
                "SECRETS_ENC_KEY must decode to {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CoreError::Internal("failed to initialize cipher".to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt any serializable struct into an opaque envelope.
    /// A fresh random nonce is drawn per call, so output is never
    /// deterministic.
    pub fn encrypt_value<T: Serialize>(&self, value: &T) -> Result<String, CoreError> {
        let plaintext = serde_json::to_vec(value)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| CoreError::Internal("encryption failure".to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENVELOPE_PREFIX, BASE64.encode(envelope)))
    }

    /// Decrypt an envelope produced by [`encrypt_value`].
    ///
    /// [`encrypt_value`]: SecretVault::encrypt_value
    pub fn decrypt_value<T: DeserializeOwned>(&self, envelope: &str) -> Result<T, CoreError> {
        let encoded = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| CoreError::Validation("not an encrypted envelope".to_string()))?;

        let raw = BASE64
            .decode(encoded)
            .map_err(|_| CoreError::Validation("envelope is not valid base64".to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CoreError::Validation("envelope too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CoreError::Validation("decryption failed".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CoreError::Internal(format!("decrypted payload does not decode: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn test_vault() -> SecretVault {
        // 32 zero bytes, base64
        SecretVault::from_base64_key(&BASE64.encode([0u8; 32])).unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Creds {
        api_key: String,
        env: String,
    }

    #[test]
    fn test_round_trip() {
        let vault = test_vault();
        let creds = Creds {
            api_key: "sk_test_abc".to_string(),
            env: "sandbox".to_string(),
        };

        let envelope = vault.encrypt_value(&creds).unwrap();
        assert!(envelope.starts_with("enc:v1:"));

        let decrypted: Creds = vault.decrypt_value(&envelope).unwrap();
        assert_eq!(decrypted, creds);
    }

    #[test]
    fn test_nondeterministic_envelopes() {
        let vault = test_vault();
        let a = vault.encrypt_value(&"secret").unwrap();
        let b = vault.encrypt_value(&"secret").unwrap();
        // Fresh nonce per call
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_bad_key() {
        assert!(SecretVault::from_base64_key("not-base64!!!").is_err());
        assert!(SecretVault::from_base64_key(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn test_rejects_tampered_envelope() {
        let vault = test_vault();
        let envelope = vault.encrypt_value(&"secret").unwrap();

        // Flip a character inside the ciphertext portion
        let mut tampered: Vec<char> = envelope.chars().collect();
        let last = tampered.len() - 2;
        tampered[last] = if tampered[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();

        let result: Result<String, _> = vault.decrypt_value(&tampered);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_plaintext() {
        let vault = test_vault();
        let result: Result<String, _> = vault.decrypt_value("{\"api_key\":\"plain\"}");
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
