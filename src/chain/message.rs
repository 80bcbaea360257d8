//! Personal message signing
//!
//! Both families hash `prefix + len(message) + message` with keccak256:
//! - Ethereum (EIP-191): `"\x19Ethereum Signed Message:\n"`, v in {27, 28}
//! - Conflux: `"\x19Conflux Signed Message:\n"`, v in {0, 1}

use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, CustodyResult};
use crate::types::NetworkType;
use crate::utils::crypto::{self, RawSignature};

const ETH_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";
const CFX_MESSAGE_PREFIX: &str = "\x19Conflux Signed Message:\n";

/// Signature returned to callers and external applications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignature {
    /// 65 bytes `r || s || v`, `0x` hex
    pub signature: String,
    pub r: String,
    pub s: String,
    pub v: u8,
}

impl MessageSignature {
    pub fn from_raw(raw: &RawSignature, v_offset: u8) -> Self {
        Self {
            signature: format!("0x{}", hex::encode(raw.to_bytes(v_offset))),
            r: format!("0x{}", hex::encode(raw.r)),
            s: format!("0x{}", hex::encode(raw.s)),
            v: raw.recovery_id + v_offset,
        }
    }
}

/// Offset added to the recovery id for message signatures
pub fn v_offset(network_type: NetworkType) -> u8 {
    match network_type {
        NetworkType::Ethereum => 27,
        NetworkType::Conflux => 0,
    }
}

/// Digest a personal message the way the family's wallets do
pub fn hash_message(network_type: NetworkType, message: &[u8]) -> [u8; 32] {
    let prefix = match network_type {
        NetworkType::Ethereum => ETH_MESSAGE_PREFIX,
        NetworkType::Conflux => CFX_MESSAGE_PREFIX,
    };
    let header = format!("{}{}", prefix, message.len());
    let mut data = Vec::with_capacity(header.len() + message.len());
    data.extend_from_slice(header.as_bytes());
    data.extend_from_slice(message);
    crypto::keccak256(&data)
}

/// Messages arrive either as `0x` hex or as plain UTF-8 text
pub fn message_bytes(message: &str) -> Vec<u8> {
    if let Some(stripped) = message.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(stripped) {
            return bytes;
        }
    }
    message.as_bytes().to_vec()
}

/// Recover the signer's 20 account bytes
pub fn recover_signer(network_type: NetworkType, message: &[u8], signature: &str) -> CustodyResult<[u8; 20]> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| CustodyError::invalid_input(format!("Invalid signature hex: {}", e)))?;
    let raw = RawSignature::from_bytes(&bytes)?;
    crypto::recover_account_bytes(&hash_message(network_type, message), &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x11; 32];

    #[test]
    fn test_eip191_hash() {
        // keccak256("\x19Ethereum Signed Message:\n5hello")
        let hash = hash_message(NetworkType::Ethereum, b"hello");
        assert_eq!(
            hex::encode(hash),
            "50b2c43fd39106bafbba0da34fc430e1f91e3c96ea2acee2bc34119f92b37750"
        );
    }

    #[test]
    fn test_prefixes_differ() {
        assert_ne!(
            hash_message(NetworkType::Ethereum, b"hello"),
            hash_message(NetworkType::Conflux, b"hello")
        );
    }

    #[test]
    fn test_sign_and_recover_both_families() {
        for network in NetworkType::ALL {
            let digest = hash_message(network, b"login nonce 42");
            let raw = crypto::sign_digest(&digest, &KEY).unwrap();
            let sig = MessageSignature::from_raw(&raw, v_offset(network));

            if network == NetworkType::Ethereum {
                assert!(sig.v == 27 || sig.v == 28);
            } else {
                assert!(sig.v <= 1);
            }

            let recovered = recover_signer(network, b"login nonce 42", &sig.signature).unwrap();
            assert_eq!(recovered, crypto::secret_to_account_bytes(&KEY).unwrap());
        }
    }

    #[test]
    fn test_message_bytes() {
        assert_eq!(message_bytes("0x68656c6c6f"), b"hello".to_vec());
        assert_eq!(message_bytes("hello"), b"hello".to_vec());
        // not valid hex, taken literally
        assert_eq!(message_bytes("0xnothex"), b"0xnothex".to_vec());
    }
}
