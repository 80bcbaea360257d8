//! Vault Keyring
//!
//! Opens vault data with the credential cipher and hands back the private
//! key for one address. HD vaults hold a BIP-39 mnemonic, private-key
//! vaults a hex key. The derived key must control the requested address.
//!
//! SECURITY: decrypted mnemonics, seeds and keys live in `Zeroizing` buffers
//! and are wiped when dropped.

use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::Network;
use zeroize::Zeroizing;

use crate::chain::account_bytes_for_private_key;
use crate::cipher::CredentialCipher;
use crate::error::{CustodyError, CustodyResult, ErrorCode};
use crate::types::{Account, Address, NetworkType, Vault, VaultSource, VaultType};

/// BIP-44 path `m/44'/<coin>'/0'/0/<index>` for a network family
pub fn derivation_path(network_type: NetworkType, index: u32) -> CustodyResult<DerivationPath> {
    Ok(DerivationPath::from_str(&format!(
        "m/44'/{}'/0'/0/{}",
        network_type.coin_type(),
        index
    ))?)
}

/// Derive the private key at `path` from a mnemonic phrase
pub fn derive_private_key(phrase: &str, path: &DerivationPath) -> CustodyResult<Zeroizing<[u8; 32]>> {
    let mnemonic = Mnemonic::parse_normalized(phrase)?;
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));

    let secp = Secp256k1::new();
    let master = Xpriv::new_master(Network::Bitcoin, seed.as_ref())?;
    let child = master.derive_priv(&secp, path)?;
    Ok(Zeroizing::new(child.private_key.secret_bytes()))
}

fn parse_private_key(hex_key: &str) -> CustodyResult<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(
        hex::decode(hex_key.trim().trim_start_matches("0x"))
            .map_err(|_| CustodyError::crypto_error("Vault private key is not hex"))?,
    );
    if bytes.len() != 32 {
        return Err(CustodyError::crypto_error("Vault private key must be 32 bytes"));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Decrypts vault data into signing keys
#[derive(Debug, Clone, Default)]
pub struct VaultKeyring {
    cipher: CredentialCipher,
}

impl VaultKeyring {
    pub fn new(cipher: CredentialCipher) -> Self {
        Self { cipher }
    }

    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    /// Seal a mnemonic into a new HD vault
    pub fn create_hd_vault(
        &self,
        id: impl Into<String>,
        phrase: &str,
        source: VaultSource,
        password: Option<&str>,
    ) -> CustodyResult<Vault> {
        let mnemonic = Mnemonic::parse_normalized(phrase)?;
        let normalized = Zeroizing::new(mnemonic.to_string());
        Ok(Vault {
            id: id.into(),
            vault_type: VaultType::Hd,
            data: Some(self.cipher.encrypt(normalized.as_str(), password)?),
            source,
            device: None,
        })
    }

    /// Seal a single hex private key into an imported vault
    pub fn create_private_key_vault(
        &self,
        id: impl Into<String>,
        hex_key: &str,
        password: Option<&str>,
    ) -> CustodyResult<Vault> {
        let key = parse_private_key(hex_key)?;
        let normalized = Zeroizing::new(hex::encode(AsRef::<[u8]>::as_ref(&*key)));
        Ok(Vault {
            id: id.into(),
            vault_type: VaultType::PrivateKey,
            data: Some(self.cipher.encrypt(normalized.as_str(), password)?),
            source: VaultSource::Import,
            device: None,
        })
    }

    /// Private key for `address`, checked to control it
    pub fn private_key_for(
        &self,
        vault: &Vault,
        account: &Account,
        address: &Address,
        password: Option<&str>,
    ) -> CustodyResult<Zeroizing<[u8; 32]>> {
        let data = vault
            .data
            .as_deref()
            .ok_or_else(|| CustodyError::vault_not_found(format!("Vault {} holds no secret", vault.id)))?;
        let secret: Zeroizing<String> = Zeroizing::new(self.cipher.decrypt(data, password)?);

        let key = match vault.vault_type {
            VaultType::Hd => {
                let path = derivation_path(address.network_type, account.index)?;
                derive_private_key(&secret, &path)?
            }
            VaultType::PrivateKey => parse_private_key(&secret)?,
            other => {
                return Err(CustodyError::new(
                    ErrorCode::UnsupportedVaultType,
                    format!("{} vault holds no private key", other),
                )
                .with_data(serde_json::json!({ "vaultType": other })))
            }
        };

        let controlled = account_bytes_for_private_key(address.network_type, &key)?;
        if format!("0x{}", hex::encode(controlled)) != address.hex.to_lowercase() {
            return Err(CustodyError::ownership_mismatch(format!(
                "Vault {} does not control address {}",
                vault.id, address.id
            )));
        }
        Ok(key)
    }
}
