//! Crypto Utilities
//!
//! secp256k1 and keccak helpers shared by both chain families.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use tiny_keccak::{Hasher, Keccak};

use crate::error::{CustodyError, CustodyResult};

/// Keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Convert raw address bytes to an EIP-55 checksummed address
pub fn to_checksum_address(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());

    let mut result = String::from("0x");
    for (i, ch) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };

        if ch.is_ascii_digit() || nibble < 8 {
            result.push(ch);
        } else {
            result.push(ch.to_ascii_uppercase());
        }
    }

    result
}

/// Parse a `0x`-prefixed 20-byte hex address (case is not checked)
pub fn parse_hex_address(address: &str) -> CustodyResult<[u8; 20]> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| CustodyError::invalid_address(format!("Missing 0x prefix: {}", address)))?;
    if stripped.len() != 40 {
        return Err(CustodyError::invalid_address(format!(
            "Expected 40 hex chars, got {}",
            stripped.len()
        )));
    }
    let bytes = hex::decode(stripped)
        .map_err(|e| CustodyError::invalid_address(format!("Invalid hex address: {}", e)))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Keccak of the uncompressed public key, last 20 bytes.
///
/// Accepts 33-byte compressed or 65-byte uncompressed keys.
pub fn public_key_to_account_bytes(public_key: &[u8]) -> CustodyResult<[u8; 20]> {
    let key = PublicKey::from_slice(public_key)
        .map_err(|e| CustodyError::invalid_input(format!("Invalid public key: {}", e)))?;
    Ok(account_bytes_of(&key))
}

fn account_bytes_of(key: &PublicKey) -> [u8; 20] {
    let uncompressed = key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// Account bytes controlled by a private key
pub fn secret_to_account_bytes(private_key: &[u8; 32]) -> CustodyResult<[u8; 20]> {
    let secp = Secp256k1::signing_only();
    let secret = SecretKey::from_slice(private_key)?;
    let public = PublicKey::from_secret_key(&secp, &secret);
    Ok(account_bytes_of(&public))
}

/// Compressed public key of a private key
pub fn secret_to_public_key(private_key: &[u8; 32]) -> CustodyResult<[u8; 33]> {
    let secp = Secp256k1::signing_only();
    let secret = SecretKey::from_slice(private_key)?;
    Ok(PublicKey::from_secret_key(&secp, &secret).serialize())
}

/// A recoverable ECDSA signature split into its components.
/// `recovery_id` is the raw 0/1 value; chains add their own offset to form `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl RawSignature {
    /// 65 bytes r || s || (recovery_id + v_offset)
    pub fn to_bytes(&self, v_offset: u8) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id + v_offset;
        out
    }

    /// Parse 65 bytes; v may be 0/1 or 27/28
    pub fn from_bytes(bytes: &[u8]) -> CustodyResult<Self> {
        if bytes.len() != 65 {
            return Err(CustodyError::invalid_input(format!(
                "Expected 65-byte signature, got {}",
                bytes.len()
            )));
        }
        let v = bytes[64];
        let recovery_id = if v >= 27 { v - 27 } else { v };
        if recovery_id > 3 {
            return Err(CustodyError::invalid_input(format!("Invalid recovery id: {}", v)));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }
}

/// Sign a 32-byte digest with a recoverable signature
pub fn sign_digest(digest: &[u8; 32], private_key: &[u8; 32]) -> CustodyResult<RawSignature> {
    let secp = Secp256k1::signing_only();
    let secret = SecretKey::from_slice(private_key)?;
    let message = Message::from_digest(*digest);

    let (recovery_id, bytes) = secp
        .sign_ecdsa_recoverable(&message, &secret)
        .serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(RawSignature {
        r,
        s,
        recovery_id: recovery_id.to_i32() as u8,
    })
}

/// Recover the account bytes that produced `signature` over `digest`
pub fn recover_account_bytes(digest: &[u8; 32], signature: &RawSignature) -> CustodyResult<[u8; 20]> {
    let secp = Secp256k1::verification_only();
    let rec_id = RecoveryId::from_i32(signature.recovery_id as i32)?;

    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r);
    compact[32..].copy_from_slice(&signature.s);

    let recoverable = RecoverableSignature::from_compact(&compact, rec_id)?;
    let public = secp.recover_ecdsa(&Message::from_digest(*digest), &recoverable)?;
    Ok(account_bytes_of(&public))
}

#[cfg(test)]
mod tests {
    use super::*;

    // web3.js documentation key
    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn key() -> [u8; 32] {
        let mut k = [0u8; 32];
        k.copy_from_slice(&hex::decode(KEY).unwrap());
        k
    }

    #[test]
    fn test_checksum_address() {
        let bytes = hex::decode("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(to_checksum_address(&bytes), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_secret_to_account() {
        let account = secret_to_account_bytes(&key()).unwrap();
        assert_eq!(to_checksum_address(&account), "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23");
    }

    #[test]
    fn test_compressed_and_uncompressed_agree() {
        let compressed = secret_to_public_key(&key()).unwrap();
        let from_compressed = public_key_to_account_bytes(&compressed).unwrap();

        let uncompressed = PublicKey::from_slice(&compressed).unwrap().serialize_uncompressed();
        let from_uncompressed = public_key_to_account_bytes(&uncompressed).unwrap();

        assert_eq!(from_compressed, from_uncompressed);
    }

    #[test]
    fn test_sign_and_recover() {
        let digest = keccak256(b"custody");
        let sig = sign_digest(&digest, &key()).unwrap();
        let recovered = recover_account_bytes(&digest, &sig).unwrap();
        assert_eq!(recovered, secret_to_account_bytes(&key()).unwrap());

        let bytes = sig.to_bytes(27);
        assert!(bytes[64] == 27 || bytes[64] == 28);
        assert_eq!(RawSignature::from_bytes(&bytes).unwrap(), sig);
    }

    #[test]
    fn test_parse_hex_address() {
        assert!(parse_hex_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
        assert!(parse_hex_address("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
        assert!(parse_hex_address("0x1234").is_err());
        assert!(parse_hex_address("0xzzzzb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
    }
}
