//! Encryption of token material at rest
//!
//! Auth-info rows store OAuth tokens encrypted and base64-encoded. The
//! [`SecretsService`] trait is the encryption seam; [`AesGcmSecrets`] is the
//! default AES-256-GCM implementation.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;

use crate::error::{AuthnError, Result};

pub trait SecretsService: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<String>;
}

/// AES-256-GCM with a random 12-byte nonce prepended to the ciphertext.
pub struct AesGcmSecrets {
    encryption_key: Vec<u8>,
}

impl AesGcmSecrets {
    pub fn new(encryption_key: impl Into<Vec<u8>>) -> Self {
        Self {
            encryption_key: encryption_key.into(),
        }
    }
}

impl std::fmt::Debug for AesGcmSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmSecrets")
            .field("encryption_key", &"***")
            .finish()
    }
}

impl SecretsService for AesGcmSecrets {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        if self.encryption_key.len() != 32 {
            return Err(AuthnError::internal("Invalid encryption key length"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| AuthnError::internal(format!("Cipher init failed: {}", e)))?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthnError::internal(format!("Encryption failed: {}", e)))?;

        let mut result = nonce_bytes.to_vec();
        result.extend(ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<String> {
        if ciphertext.len() < 12 {
            return Err(AuthnError::internal("Invalid ciphertext length"));
        }
        if self.encryption_key.len() != 32 {
            return Err(AuthnError::internal("Invalid encryption key length"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| AuthnError::internal(format!("Cipher init failed: {}", e)))?;

        let nonce = Nonce::from_slice(&ciphertext[..12]);
        let encrypted = &ciphertext[12..];

        let plaintext = cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| AuthnError::internal(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| AuthnError::internal(format!("Invalid UTF-8: {}", e)))
    }
}

/// Encrypts a token field and renders it base64 for storage.
pub fn encrypt_and_encode(secrets: &dyn SecretsService, plaintext: &str) -> Result<String> {
    let encrypted = secrets.encrypt(plaintext)?;
    Ok(general_purpose::STANDARD.encode(encrypted))
}

/// Reverses [`encrypt_and_encode`].
pub fn decode_and_decrypt(secrets: &dyn SecretsService, stored: &str) -> Result<String> {
    let encrypted = general_purpose::STANDARD
        .decode(stored)
        .map_err(|e| AuthnError::internal(format!("Invalid base64: {}", e)))?;
    secrets.decrypt(&encrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secrets() -> AesGcmSecrets {
        AesGcmSecrets::new(*b"an example very very secret key.")
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let secrets = test_secrets();
        let encrypted = secrets.encrypt("ya29.a0AfH6SMC").unwrap();
        assert_ne!(encrypted, b"ya29.a0AfH6SMC");
        assert_eq!(secrets.decrypt(&encrypted).unwrap(), "ya29.a0AfH6SMC");
    }

    #[test]
    fn test_stored_field_round_trip() {
        let secrets = test_secrets();
        let stored = encrypt_and_encode(&secrets, "refresh-token-value").unwrap();
        // Storable: base64, no raw bytes.
        assert!(stored.is_ascii());
        assert_eq!(
            decode_and_decrypt(&secrets, &stored).unwrap(),
            "refresh-token-value"
        );
    }

    #[test]
    fn test_decrypt_rejects_wrong_key() {
        let encrypted = test_secrets().encrypt("secret").unwrap();
        let other = AesGcmSecrets::new(*b"another 32 byte long secret key!");
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_decrypt_rejects_truncated_input() {
        let secrets = test_secrets();
        assert!(secrets.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let secrets = AesGcmSecrets::new(b"short".to_vec());
        assert!(secrets.encrypt("x").is_err());
    }
}
