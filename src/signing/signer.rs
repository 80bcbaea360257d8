//! Signer handles
//!
//! A resolved signer is either a decrypted local key or a channel to a
//! hardware secure element. Chain providers match on [`Signer`] and never
//! see vault data.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::bip32::DerivationPath;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{CustodyError, CustodyResult};
use crate::types::NetworkType;
use crate::utils::crypto::{self, RawSignature};

/// What a secure element is asked to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPayload {
    /// Transaction signing digest plus the unsigned encoding the device can display
    Transaction {
        network_type: NetworkType,
        chain_id: u64,
        digest: [u8; 32],
        unsigned: Vec<u8>,
    },
    /// Prefixed personal message
    Message {
        network_type: NetworkType,
        message: Vec<u8>,
        digest: [u8; 32],
    },
    /// EIP-712 typed data
    TypedData {
        domain_separator: [u8; 32],
        struct_hash: [u8; 32],
        digest: [u8; 32],
    },
}

impl SigningPayload {
    pub fn digest(&self) -> &[u8; 32] {
        match self {
            SigningPayload::Transaction { digest, .. }
            | SigningPayload::Message { digest, .. }
            | SigningPayload::TypedData { digest, .. } => digest,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SigningPayload::Transaction { .. } => "transaction",
            SigningPayload::Message { .. } => "message",
            SigningPayload::TypedData { .. } => "typed_data",
        }
    }
}

/// Device channel to a hardware secure element.
///
/// `sign` may block for as long as the user takes to confirm on the device.
/// Implementations must stop waiting once `cancel` fires.
#[async_trait]
pub trait SecureElement: Send + Sync {
    /// Identifier matching `Vault::device`
    fn device_id(&self) -> &str;

    async fn sign(
        &self,
        path: &DerivationPath,
        payload: &SigningPayload,
        cancel: CancellationToken,
    ) -> CustodyResult<RawSignature>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerKind {
    Software,
    Hardware,
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerKind::Software => write!(f, "software"),
            SignerKind::Hardware => write!(f, "hardware"),
        }
    }
}

/// Decrypted private key bound to one address
pub struct SoftwareSigner {
    key: SecretBox<[u8; 32]>,
    address_hex: String,
}

impl SoftwareSigner {
    pub fn new(key: [u8; 32], address_hex: impl Into<String>) -> Self {
        Self {
            key: SecretBox::new(Box::new(key)),
            address_hex: address_hex.into(),
        }
    }

    pub fn private_key(&self) -> &[u8; 32] {
        self.key.expose_secret()
    }
}

impl fmt::Debug for SoftwareSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSigner")
            .field("address", &self.address_hex)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Secure element plus the derivation path of the signing key
pub struct HardwareSigner {
    device: Arc<dyn SecureElement>,
    path: DerivationPath,
    address_hex: String,
}

impl HardwareSigner {
    pub fn new(device: Arc<dyn SecureElement>, path: DerivationPath, address_hex: impl Into<String>) -> Self {
        Self {
            device,
            path,
            address_hex: address_hex.into(),
        }
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn device_id(&self) -> &str {
        self.device.device_id()
    }

    /// Forward `payload` to the device, giving up as soon as `cancel` fires.
    /// The device receives a child token so its own wait is torn down too.
    pub async fn sign(&self, payload: &SigningPayload, cancel: &CancellationToken) -> CustodyResult<RawSignature> {
        if cancel.is_cancelled() {
            return Err(CustodyError::cancelled("Hardware signing cancelled before start"));
        }

        crate::log_info!(
            "signer",
            "Waiting for device confirmation",
            device = self.device_id(),
            payload = payload.kind()
        );

        let device_token = cancel.child_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                device_token.cancel();
                crate::log_warn!("signer", "Hardware signing cancelled", device = self.device_id());
                Err(CustodyError::cancelled("Hardware signing cancelled"))
            }
            result = self.device.sign(&self.path, payload, device_token.clone()) => result,
        }
    }
}

impl fmt::Debug for HardwareSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareSigner")
            .field("device", &self.device.device_id())
            .field("path", &self.path.to_string())
            .field("address", &self.address_hex)
            .finish()
    }
}

/// Uniform signer handle produced by the signing service
#[derive(Debug)]
pub enum Signer {
    Software(SoftwareSigner),
    Hardware(HardwareSigner),
}

impl Signer {
    pub fn kind(&self) -> SignerKind {
        match self {
            Signer::Software(_) => SignerKind::Software,
            Signer::Hardware(_) => SignerKind::Hardware,
        }
    }

    /// Lowercase `0x` hex of the address this signer controls
    pub fn address_hex(&self) -> &str {
        match self {
            Signer::Software(s) => &s.address_hex,
            Signer::Hardware(h) => &h.address_hex,
        }
    }

    pub fn private_key(&self) -> Option<&[u8; 32]> {
        match self {
            Signer::Software(s) => Some(s.private_key()),
            Signer::Hardware(_) => None,
        }
    }

    /// Produce a recoverable signature over the payload digest
    pub async fn sign_payload(
        &self,
        payload: &SigningPayload,
        cancel: &CancellationToken,
    ) -> CustodyResult<RawSignature> {
        match self {
            Signer::Software(s) => crypto::sign_digest(payload.digest(), s.private_key()),
            Signer::Hardware(h) => h.sign(payload, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    const KEY: [u8; 32] = [7u8; 32];

    /// Device that signs with a fixed key after a delay, honouring cancellation
    struct SlowDevice {
        delay: Duration,
    }

    #[async_trait]
    impl SecureElement for SlowDevice {
        fn device_id(&self) -> &str {
            "slow-device"
        }

        async fn sign(
            &self,
            _path: &DerivationPath,
            payload: &SigningPayload,
            cancel: CancellationToken,
        ) -> CustodyResult<RawSignature> {
            tokio::select! {
                _ = cancel.cancelled() => Err(CustodyError::cancelled("device wait aborted")),
                _ = tokio::time::sleep(self.delay) => crypto::sign_digest(payload.digest(), &KEY),
            }
        }
    }

    fn payload() -> SigningPayload {
        SigningPayload::Message {
            network_type: NetworkType::Ethereum,
            message: b"hi".to_vec(),
            digest: crypto::keccak256(b"hi"),
        }
    }

    fn hardware(delay: Duration) -> Signer {
        Signer::Hardware(HardwareSigner::new(
            Arc::new(SlowDevice { delay }),
            DerivationPath::from_str("m/44'/60'/0'/0/0").unwrap(),
            "0xabc",
        ))
    }

    #[tokio::test]
    async fn test_software_signer_signs() {
        let signer = Signer::Software(SoftwareSigner::new(KEY, "0xabc"));
        assert_eq!(signer.kind(), SignerKind::Software);
        assert!(signer.private_key().is_some());

        let sig = signer.sign_payload(&payload(), &CancellationToken::new()).await.unwrap();
        let recovered = crypto::recover_account_bytes(payload().digest(), &sig).unwrap();
        assert_eq!(recovered, crypto::secret_to_account_bytes(&KEY).unwrap());
    }

    #[tokio::test]
    async fn test_software_debug_hides_key() {
        let signer = SoftwareSigner::new(KEY, "0xabc");
        let debug = format!("{:?}", signer);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("7, 7"));
    }

    #[tokio::test]
    async fn test_hardware_signer_completes() {
        let signer = hardware(Duration::from_millis(5));
        assert!(signer.private_key().is_none());
        let sig = signer.sign_payload(&payload(), &CancellationToken::new()).await;
        assert!(sig.is_ok());
    }

    #[tokio::test]
    async fn test_hardware_signer_cancellation() {
        let signer = hardware(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = signer.sign_payload(&payload(), &cancel).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn test_hardware_signer_already_cancelled() {
        let signer = hardware(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(signer.sign_payload(&payload(), &cancel).await.is_err());
    }
}
