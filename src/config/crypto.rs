//! At-rest encryption for sensitive configuration values.
//!
//! AES-256-GCM with a key stretched by PBKDF2-HMAC-SHA256 from
//! machine-bound material and a random salt stored next to the ciphertext.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{self, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigResult};

pub const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const BLOB_VERSION: u32 = 1;
const PBKDF2_ITERATIONS: NonZeroU32 = NonZeroU32::MIN.saturating_add(99_999);
const KEY_LABEL: &[u8] = b"coding-agent-config-v1";

/// Serialized form of encrypted secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub version: u32,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

pub struct SecretCipher {
    key: LessSafeKey,
    salt: [u8; SALT_LEN],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

fn decrypt_failed(message: impl Into<String>) -> ConfigError {
    ConfigError::DecryptFailed {
        message: message.into(),
    }
}

fn encrypt_failed(message: impl Into<String>) -> ConfigError {
    ConfigError::EncryptFailed {
        message: message.into(),
    }
}

/// Key material tied to the current user on this machine.
fn machine_secret() -> Vec<u8> {
    let mut material = Vec::new();
    #[cfg(unix)]
    {
        material.extend_from_slice(&rustix::process::getuid().as_raw().to_le_bytes());
    }
    if let Some(home) = crate::security::path::home_dir() {
        material.extend_from_slice(home.to_string_lossy().as_bytes());
    }
    material.extend_from_slice(KEY_LABEL);
    material
}

impl SecretCipher {
    /// Cipher with a fresh random salt.
    pub fn generate() -> ConfigResult<Self> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| encrypt_failed("system random source unavailable"))?;
        Self::with_passphrase(salt, &machine_secret())
    }

    /// Cipher able to open `blob` on this machine.
    pub fn for_blob(blob: &EncryptedBlob) -> ConfigResult<Self> {
        Self::with_passphrase(decode_salt(blob)?, &machine_secret())
    }

    pub fn with_passphrase(salt: [u8; SALT_LEN], passphrase: &[u8]) -> ConfigResult<Self> {
        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            &salt,
            passphrase,
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
            .map_err(|_| decrypt_failed("invalid key length"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            salt,
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> ConfigResult<EncryptedBlob> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| encrypt_failed("failed to generate nonce"))?;

        let mut ciphertext = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| encrypt_failed("sealing failed"))?;

        Ok(EncryptedBlob {
            version: BLOB_VERSION,
            salt: STANDARD.encode(self.salt),
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(&ciphertext),
        })
    }

    pub fn open(&self, blob: &EncryptedBlob) -> ConfigResult<Vec<u8>> {
        if blob.version != BLOB_VERSION {
            return Err(decrypt_failed(format!(
                "unsupported format version {}",
                blob.version
            )));
        }
        let nonce_bytes: [u8; NONCE_LEN] = STANDARD
            .decode(&blob.nonce)
            .map_err(|e| decrypt_failed(format!("invalid nonce encoding: {}", e)))?
            .try_into()
            .map_err(|_| decrypt_failed("invalid nonce length"))?;
        let mut ciphertext = STANDARD
            .decode(&blob.ciphertext)
            .map_err(|e| decrypt_failed(format!("invalid ciphertext encoding: {}", e)))?;

        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| decrypt_failed("authentication failed; wrong machine or corrupted data"))?;
        Ok(plaintext.to_vec())
    }
}

fn decode_salt(blob: &EncryptedBlob) -> ConfigResult<[u8; SALT_LEN]> {
    STANDARD
        .decode(&blob.salt)
        .map_err(|e| decrypt_failed(format!("invalid salt encoding: {}", e)))?
        .try_into()
        .map_err(|_| decrypt_failed("invalid salt length"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let cipher = SecretCipher::with_passphrase([7; SALT_LEN], b"pass").unwrap();
        let blob = cipher.seal(b"{\"apiKey\":\"sk-123\"}").unwrap();

        assert!(!blob.ciphertext.contains("sk-123"));
        assert_eq!(decode_salt(&blob).unwrap(), [7; SALT_LEN]);
        assert_eq!(cipher.open(&blob).unwrap(), b"{\"apiKey\":\"sk-123\"}");
    }

    #[test]
    fn test_wrong_key_or_tamper_fails() {
        let cipher = SecretCipher::with_passphrase([1; SALT_LEN], b"pass").unwrap();
        let blob = cipher.seal(b"secret").unwrap();

        let other = SecretCipher::with_passphrase([1; SALT_LEN], b"other").unwrap();
        assert!(matches!(
            other.open(&blob),
            Err(ConfigError::DecryptFailed { .. })
        ));

        let mut tampered = blob.clone();
        tampered.version = 9;
        assert!(cipher.open(&tampered).is_err());
    }

    #[test]
    fn test_machine_cipher_round_trip() {
        let cipher = SecretCipher::generate().unwrap();
        let blob = cipher.seal(b"token").unwrap();
        let reopened = SecretCipher::for_blob(&blob).unwrap();
        assert_eq!(reopened.open(&blob).unwrap(), b"token");
    }
}
