use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ProxyError;

const NONCE_LEN: usize = 12;

/// Opaque symmetric cipher for credentials at rest.
///
/// Access and refresh tokens (and provider API keys) are stored encrypted;
/// plaintext only exists in process memory, produced by `decrypt`.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> String;
    fn decrypt(&self, ciphertext: &str) -> Result<String, ProxyError>;
}

/// AES-256-GCM with the key derived from the configured master key.
///
/// Wire format: base64(nonce || ciphertext), fresh random nonce per call.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn from_master_key(master_key: &str) -> Self {
        let digest = Sha256::digest(master_key.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest).expect("SHA-256 digest is a valid AES key");
        Self { cipher }
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption is infallible for in-memory buffers");

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        B64.encode(out)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, ProxyError> {
        let raw = B64
            .decode(ciphertext)
            .map_err(|e| ProxyError::Internal(format!("ciphertext is not valid base64: {e}")))?;

        if raw.len() <= NONCE_LEN {
            return Err(ProxyError::Internal(
                "ciphertext shorter than nonce".to_string(),
            ));
        }

        let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, body)
            .map_err(|_| ProxyError::Internal("credential decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| ProxyError::Internal(format!("decrypted credential is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cipher = AesGcmCipher::from_master_key("test-master-key");
        let ct = cipher.encrypt("ya29.secret-token");
        assert_ne!(ct, "ya29.secret-token");
        assert_eq!(cipher.decrypt(&ct).unwrap(), "ya29.secret-token");
    }

    #[test]
    fn nonce_makes_ciphertexts_unique() {
        let cipher = AesGcmCipher::from_master_key("k");
        assert_ne!(cipher.encrypt("same"), cipher.encrypt("same"));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let ct = AesGcmCipher::from_master_key("key-a").encrypt("secret");
        let err = AesGcmCipher::from_master_key("key-b").decrypt(&ct);
        assert!(err.is_err());
    }

    #[test]
    fn garbage_input_is_rejected() {
        let cipher = AesGcmCipher::from_master_key("k");
        assert!(cipher.decrypt("not-base64!!!").is_err());
        assert!(cipher.decrypt("YWJj").is_err());
    }
}
