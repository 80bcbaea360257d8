//! Signing Service
//!
//! Every `get_signer` call is a fresh run of:
//!
//! 1. locate the account and the address
//! 2. verify the address belongs to the account
//! 3. check the vault type (watch vaults stop here, before any prompt)
//! 4. authorize: password prompt for secret-holding vaults
//! 5. resolve a software signer from the decrypted key, or a hardware
//!    signer when a secure element is attached
//!
//! Nothing is cached between calls.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use super::signer::{HardwareSigner, SecureElement, Signer, SoftwareSigner};
use super::store::WalletStore;
use super::vault::{derivation_path, VaultKeyring};
use crate::error::{CustodyError, CustodyResult, ErrorCode};
use crate::types::{Account, Address, Vault, VaultType};
use crate::{log_info, log_warn};

/// Why the user is asked to unlock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizeReason {
    SignTransaction,
    SignMessage,
    SignTypedData,
}

impl fmt::Display for AuthorizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorizeReason::SignTransaction => write!(f, "sign transaction"),
            AuthorizeReason::SignMessage => write!(f, "sign message"),
            AuthorizeReason::SignTypedData => write!(f, "sign typed data"),
        }
    }
}

/// Obtains the unlocking password, possibly after an interactive prompt.
///
/// A declined prompt is `UserRejected`; a prompt abandoned through `cancel`
/// is `Cancelled`.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, reason: AuthorizeReason, cancel: &CancellationToken) -> CustodyResult<String>;
}

/// Authorizer that answers every prompt with one password
pub struct StaticAuthorizer {
    password: Zeroizing<String>,
}

impl StaticAuthorizer {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, _reason: AuthorizeReason, _cancel: &CancellationToken) -> CustodyResult<String> {
        Ok(self.password.to_string())
    }
}

pub struct SigningService {
    store: Arc<dyn WalletStore>,
    authorizer: Arc<dyn Authorizer>,
    keyring: VaultKeyring,
    secure_element: Option<Arc<dyn SecureElement>>,
}

impl SigningService {
    pub fn new(store: Arc<dyn WalletStore>, authorizer: Arc<dyn Authorizer>, keyring: VaultKeyring) -> Self {
        Self {
            store,
            authorizer,
            keyring,
            secure_element: None,
        }
    }

    /// Attach a device channel; hardware vaults resolve to hardware signers from then on
    pub fn with_secure_element(mut self, device: Arc<dyn SecureElement>) -> Self {
        self.secure_element = Some(device);
        self
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    /// Account and address, with the address checked to belong to the account
    pub async fn locate(&self, account_id: &str, address_id: &str) -> CustodyResult<(Account, Address)> {
        let account = self
            .store
            .account(account_id)
            .await?
            .ok_or_else(|| CustodyError::account_not_found(account_id))?;
        let address = self
            .store
            .address(address_id)
            .await?
            .ok_or_else(|| CustodyError::address_not_found(address_id))?;

        if !address.belongs_to(&account) {
            log_warn!(
                "signing",
                "Address does not belong to account",
                account_id = account_id,
                address_id = address_id
            );
            return Err(CustodyError::ownership_mismatch(format!(
                "Address {} does not belong to account {}",
                address_id, account_id
            )));
        }
        Ok((account, address))
    }

    pub async fn get_signer(
        &self,
        account_id: &str,
        address_id: &str,
        reason: AuthorizeReason,
        cancel: &CancellationToken,
    ) -> CustodyResult<Signer> {
        let (account, address) = self.locate(account_id, address_id).await?;
        let vault = self
            .store
            .vault_for_account(&account)
            .await?
            .ok_or_else(|| CustodyError::vault_not_found(format!("No vault for account {}", account_id)))?;

        let signer = match vault.vault_type {
            VaultType::Hd | VaultType::PrivateKey => {
                let password = Zeroizing::new(self.authorize(reason, cancel).await?);
                let key = self
                    .keyring
                    .private_key_for(&vault, &account, &address, Some(password.as_str()))?;
                Signer::Software(SoftwareSigner::new(*key, address.hex.to_lowercase()))
            }
            VaultType::Hardware => self.hardware_signer(&vault, &account, &address)?,
            VaultType::Public => {
                return Err(CustodyError::new(
                    ErrorCode::UnsupportedVaultType,
                    format!("Vault {} is watch-only and cannot sign", vault.id),
                )
                .with_data(serde_json::json!({ "vaultType": vault.vault_type })))
            }
        };

        log_info!(
            "signing",
            "Resolved signer",
            kind = signer.kind(),
            reason = reason,
            address = address.value
        );
        Ok(signer)
    }

    async fn authorize(&self, reason: AuthorizeReason, cancel: &CancellationToken) -> CustodyResult<String> {
        if cancel.is_cancelled() {
            return Err(CustodyError::cancelled("Authorization cancelled"));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CustodyError::cancelled("Authorization cancelled")),
            result = self.authorizer.authorize(reason, cancel) => result,
        }
    }

    fn hardware_signer(&self, vault: &Vault, account: &Account, address: &Address) -> CustodyResult<Signer> {
        let device = self
            .secure_element
            .as_ref()
            .ok_or_else(CustodyError::hardware_signing_unimplemented)?;

        if let Some(expected) = &vault.device {
            if expected != device.device_id() {
                return Err(CustodyError::signing_failed(format!(
                    "Vault {} is bound to another device",
                    vault.id
                ))
                .with_details(format!("expected={} attached={}", expected, device.device_id())));
            }
        }

        Ok(Signer::Hardware(HardwareSigner::new(
            device.clone(),
            derivation_path(address.network_type, account.index)?,
            address.hex.to_lowercase(),
        )))
    }
}
