//! Transaction Pipeline
//!
//! build → estimate → apply fees → sign → broadcast for one stored address,
//! with the address lock held for the whole run so the nonce fetched at
//! build time is not raced by another flow for the same address.

use std::sync::Arc;

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::chain::{
    ChainProvider, ChainRegistry, FeeEstimate, MessageSignature, SignOptions, TransactionParams,
};
use crate::error::{CustodyError, CustodyResult};
use crate::signing::{AddressLocks, AuthorizeReason, SigningService};
use crate::types::{Address, ChainRef, NetworkType};
use crate::log_info;

/// Which stored address sends, on which network, and what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub account_id: String,
    pub address_id: String,
    pub network_type: NetworkType,
    pub chain_id: u64,
    pub params: TransactionParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    /// Hash reported by the node
    pub hash: String,
    /// `0x` hex of the signed bytes
    pub raw: String,
    pub nonce: U256,
    pub fee: FeeEstimate,
}

pub struct TransactionPipeline {
    registry: Arc<ChainRegistry>,
    signing: Arc<SigningService>,
    locks: Arc<AddressLocks>,
}

impl TransactionPipeline {
    pub fn new(registry: Arc<ChainRegistry>, signing: Arc<SigningService>) -> Self {
        Self {
            registry,
            signing,
            locks: Arc::new(AddressLocks::new()),
        }
    }

    /// Share locks with other pipelines over the same wallet
    pub fn with_locks(mut self, locks: Arc<AddressLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<AddressLocks> {
        &self.locks
    }

    fn provider(&self, chain: ChainRef) -> CustodyResult<Arc<dyn ChainProvider>> {
        self.registry
            .get(chain.chain_id, Some(chain.network_type))
            .ok_or_else(|| CustodyError::provider_not_found(format!("No provider for {}", chain)))
    }

    /// The address must live on `chain` and, when the caller names a sender, be that sender
    fn check_address(
        provider: &dyn ChainProvider,
        address: &Address,
        chain: ChainRef,
        from: Option<&str>,
    ) -> CustodyResult<()> {
        if address.chain_ref() != chain {
            return Err(CustodyError::invalid_input(format!(
                "Address {} is on {}, not {}",
                address.id,
                address.chain_ref(),
                chain
            )));
        }
        if let Some(from) = from.filter(|f| !f.is_empty()) {
            if !provider.address_to_hex(from)?.eq_ignore_ascii_case(&address.hex) {
                return Err(CustodyError::ownership_mismatch(format!(
                    "Sender {} is not address {}",
                    from, address.id
                )));
            }
        }
        Ok(())
    }

    pub async fn send(&self, request: SendRequest, cancel: &CancellationToken) -> CustodyResult<SendOutcome> {
        let chain = ChainRef::new(request.network_type, request.chain_id);
        let provider = self.provider(chain)?;
        let (_, address) = self.signing.locate(&request.account_id, &request.address_id).await?;
        Self::check_address(provider.as_ref(), &address, chain, Some(&request.params.from))?;

        let _guard = self.locks.lock(chain, &address.hex).await;

        let signer = self
            .signing
            .get_signer(
                &request.account_id,
                &request.address_id,
                AuthorizeReason::SignTransaction,
                cancel,
            )
            .await?;

        let mut params = request.params;
        if params.from.is_empty() {
            params.from = address.value.clone();
        }

        let unsigned = provider.build_transaction(params).await?;
        let fee = provider.estimate_fee(&unsigned).await?;
        let unsigned = unsigned.with_fees(&fee);

        let signed = provider
            .sign_transaction(&unsigned, &signer, &SignOptions::with_cancel(cancel.clone()))
            .await?;
        let hash = provider.broadcast_transaction(&signed).await?;

        log_info!(
            "pipeline",
            "Transaction broadcast",
            chain = chain,
            from = address.value,
            tx_hash = hash
        );
        Ok(SendOutcome {
            hash,
            raw: signed.raw_hex(),
            nonce: unsigned.nonce(),
            fee,
        })
    }

    pub async fn sign_message(
        &self,
        account_id: &str,
        address_id: &str,
        message: &[u8],
        cancel: &CancellationToken,
    ) -> CustodyResult<MessageSignature> {
        let (_, address) = self.signing.locate(account_id, address_id).await?;
        let provider = self.provider(address.chain_ref())?;
        let signer = self
            .signing
            .get_signer(account_id, address_id, AuthorizeReason::SignMessage, cancel)
            .await?;
        provider
            .sign_message(message, &signer, &SignOptions::with_cancel(cancel.clone()))
            .await
    }

    pub async fn sign_typed_data(
        &self,
        account_id: &str,
        address_id: &str,
        typed_data: &Value,
        cancel: &CancellationToken,
    ) -> CustodyResult<MessageSignature> {
        let (_, address) = self.signing.locate(account_id, address_id).await?;
        let provider = self.provider(address.chain_ref())?;
        let signer = self
            .signing
            .get_signer(account_id, address_id, AuthorizeReason::SignTypedData, cancel)
            .await?;
        provider
            .sign_typed_data(typed_data, &signer, &SignOptions::with_cancel(cancel.clone()))
            .await
    }
}
