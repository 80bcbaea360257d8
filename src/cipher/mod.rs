//! Credential Cipher
//!
//! Password-based authenticated encryption of arbitrary JSON values.
//! This is the only component allowed to see vault plaintext; everything
//! stored outside the process is an [`EncryptedBlob`] rendered as a string.
//!
//! - PBKDF2-HMAC-SHA512 key derivation, fresh 16-byte salt per call
//! - AES-256-GCM with a fresh 16-byte IV per call
//! - every decode or authentication failure surfaces as `DecryptionFailed`

#![allow(deprecated)] // GenericArray::from_slice deprecated in generic-array 1.x

use std::sync::Arc;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::Engine;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::{CustodyError, CustodyResult};

/// AES-256-GCM parameterised with a 128-bit nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Key derivation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherConfig {
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Serialized cipher output. Carries no metadata about what it protects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedBlob {
    /// Ciphertext with the GCM tag appended, base64
    pub cipher: String,
    /// 16-byte IV, hex
    pub iv: String,
    /// 16-byte PBKDF2 salt, hex
    pub salt: String,
}

/// Fallback source of the unlocking password when a call does not pass one.
pub trait PasswordProvider: Send + Sync {
    fn password(&self) -> Option<String>;
}

/// Stateless apart from the optional password provider; safe to share
/// between concurrent tasks.
#[derive(Clone, Default)]
pub struct CredentialCipher {
    config: CipherConfig,
    password_provider: Option<Arc<dyn PasswordProvider>>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("config", &self.config)
            .field("password_provider", &self.password_provider.is_some())
            .finish()
    }
}

impl CredentialCipher {
    pub fn new(config: CipherConfig) -> Self {
        Self {
            config,
            password_provider: None,
        }
    }

    pub fn with_password_provider(mut self, provider: Arc<dyn PasswordProvider>) -> Self {
        self.password_provider = Some(provider);
        self
    }

    pub fn set_password_provider(&mut self, provider: Arc<dyn PasswordProvider>) {
        self.password_provider = Some(provider);
    }

    pub fn config(&self) -> &CipherConfig {
        &self.config
    }

    /// Explicit password, else the provider, else `PasswordRequired`
    fn resolve_password(&self, password: Option<&str>) -> CustodyResult<Zeroizing<String>> {
        if let Some(p) = password {
            return Ok(Zeroizing::new(p.to_string()));
        }
        self.password_provider
            .as_ref()
            .and_then(|provider| provider.password())
            .map(Zeroizing::new)
            .ok_or_else(CustodyError::password_required)
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha512>(
            password.as_bytes(),
            salt,
            self.config.iterations,
            &mut key[..],
        );
        key
    }

    /// Encrypt a JSON-serializable value, returning the blob as a JSON string
    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        value: &T,
        password: Option<&str>,
    ) -> CustodyResult<String> {
        let password = self.resolve_password(password)?;
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(&password, &salt);
        let cipher = Aes256Gcm16::new_from_slice(&key[..])
            .map_err(|e| CustodyError::crypto_error(format!("Failed to create cipher: {}", e)))?;

        let ciphertext = cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_slice())
            .map_err(|e| CustodyError::crypto_error(format!("Encryption failed: {}", e)))?;

        let blob = EncryptedBlob {
            cipher: base64::engine::general_purpose::STANDARD.encode(ciphertext),
            iv: hex::encode(iv),
            salt: hex::encode(salt),
        };
        Ok(serde_json::to_string(&blob)?)
    }

    /// Decrypt a blob string produced by [`encrypt`](Self::encrypt).
    ///
    /// Only `PasswordRequired` and `DecryptionFailed` can come out of here.
    pub fn decrypt<T: DeserializeOwned>(&self, blob: &str, password: Option<&str>) -> CustodyResult<T> {
        let password = self.resolve_password(password)?;
        let plaintext = self.open(blob, &password).ok_or_else(CustodyError::decryption_failed)?;
        serde_json::from_slice(&plaintext).map_err(|_| CustodyError::decryption_failed())
    }

    fn open(&self, blob: &str, password: &str) -> Option<Zeroizing<Vec<u8>>> {
        let blob: EncryptedBlob = serde_json::from_str(blob).ok()?;
        let salt = hex::decode(&blob.salt).ok()?;
        let iv = hex::decode(&blob.iv).ok()?;
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(&blob.cipher)
            .ok()?;

        if salt.len() != SALT_LEN || iv.len() != IV_LEN {
            return None;
        }

        let key = self.derive_key(password, &salt);
        let cipher = Aes256Gcm16::new_from_slice(&key[..]).ok()?;
        cipher
            .decrypt(Nonce::<U16>::from_slice(&iv), ciphertext.as_slice())
            .ok()
            .map(Zeroizing::new)
    }
}
