//! Chain abstraction
//!
//! One [`ChainProvider`] implementation per chain family, all speaking the
//! same contract:
//!
//! - address derivation and validation (pure)
//! - transaction build (fetches nonce / epoch height), fee estimation,
//!   signing through a resolved [`Signer`](crate::signing::Signer), broadcast
//! - balance, call, nonce, message signing and verification
//!
//! All quantities are `U256` until the presentation boundary.

pub mod conflux;
pub mod ethereum;
pub mod message;
pub mod registry;
pub mod rpc;

use async_trait::async_trait;
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{CustodyError, CustodyResult};
use crate::signing::Signer;
use crate::types::NetworkType;
use crate::utils::{self, crypto, hex_bytes, opt_quantity, opt_u64, quantity};

pub use conflux::{ConfluxPayload, ConfluxProvider};
pub use ethereum::{EthereumPayload, EthereumProvider, EvmTxType};
pub use message::MessageSignature;
pub use registry::ChainRegistry;
pub use rpc::{HttpTransport, MockTransport, RpcTransport};

/// Gas limit used for plain transfers until the node estimates one
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;
/// Gas limit placeholder when calldata is present
pub const CONTRACT_GAS_LIMIT: u64 = 100_000;

/// `transfer(address,uint256)`
pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Caller-supplied transaction request. Unset fields are filled at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, with = "quantity")]
    pub value: U256,
    /// `0x` hex calldata
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, with = "opt_u64")]
    pub nonce: Option<u64>,
    #[serde(default, alias = "gas", with = "opt_quantity")]
    pub gas_limit: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub gas_price: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub max_priority_fee_per_gas: Option<U256>,
    /// EVM envelope type: 0 legacy, 2 EIP-1559
    #[serde(default)]
    pub tx_type: Option<u8>,
    #[serde(default, with = "opt_u64")]
    pub epoch_height: Option<u64>,
    #[serde(default, with = "opt_quantity")]
    pub storage_limit: Option<U256>,
    /// Fungible-token contract; when set `value` is the token amount
    #[serde(default)]
    pub token: Option<String>,
}

/// Chain-specific unsigned transaction. Updates produce a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "networkType", content = "payload", rename_all = "snake_case")]
pub enum UnsignedTransaction {
    Ethereum(EthereumPayload),
    Conflux(ConfluxPayload),
}

impl UnsignedTransaction {
    pub fn network_type(&self) -> NetworkType {
        match self {
            UnsignedTransaction::Ethereum(_) => NetworkType::Ethereum,
            UnsignedTransaction::Conflux(_) => NetworkType::Conflux,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            UnsignedTransaction::Ethereum(p) => p.chain_id,
            UnsignedTransaction::Conflux(p) => p.chain_id,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            UnsignedTransaction::Ethereum(p) => &p.from,
            UnsignedTransaction::Conflux(p) => &p.from,
        }
    }

    pub fn nonce(&self) -> U256 {
        match self {
            UnsignedTransaction::Ethereum(p) => p.nonce,
            UnsignedTransaction::Conflux(p) => p.nonce,
        }
    }

    /// Copy with the estimate's fee fields applied
    pub fn with_fees(&self, fee: &FeeEstimate) -> Self {
        match self {
            UnsignedTransaction::Ethereum(p) => UnsignedTransaction::Ethereum(p.with_fees(fee)),
            UnsignedTransaction::Conflux(p) => UnsignedTransaction::Conflux(p.with_fees(fee)),
        }
    }

    /// Copy with a refreshed nonce
    pub fn with_nonce(&self, nonce: U256) -> Self {
        match self {
            UnsignedTransaction::Ethereum(p) => {
                UnsignedTransaction::Ethereum(EthereumPayload { nonce, ..p.clone() })
            }
            UnsignedTransaction::Conflux(p) => {
                UnsignedTransaction::Conflux(ConfluxPayload { nonce, ..p.clone() })
            }
        }
    }
}

/// Fee estimate. Fields that do not apply to a family are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    #[serde(with = "quantity")]
    pub gas_limit: U256,
    #[serde(default, with = "opt_quantity")]
    pub gas_price: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub max_priority_fee_per_gas: Option<U256>,
    /// Epoch-height family only: storage collateral in bytes
    #[serde(default, with = "opt_quantity")]
    pub storage_collateralized: Option<U256>,
    /// Upper bound of the total cost in the smallest native unit
    #[serde(with = "quantity")]
    pub total: U256,
}

/// Raw signed bytes plus the locally computed hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub network_type: NetworkType,
    pub chain_id: u64,
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
    pub hash: String,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        utils::encode_hex_data(&self.raw)
    }
}

/// Options for signing calls
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Fired to abandon a pending hardware confirmation
    pub cancel: CancellationToken,
}

impl SignOptions {
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// Options for address derivation
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressOptions {
    /// Overrides the provider's own chain id (selects the CIP-37 prefix)
    pub chain_id: Option<u64>,
    /// Emit the verbose `CFX:TYPE.USER:` form
    pub verbose: bool,
}

/// Result of `derive_address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    pub network_type: NetworkType,
    pub chain_id: u64,
    /// Display form
    pub value: String,
    /// Lowercase `0x` hex of the 20 account bytes
    pub hex: String,
}

/// Read-only contract call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, with = "opt_quantity")]
    pub value: Option<U256>,
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn network_type(&self) -> NetworkType;

    fn chain_id(&self) -> u64;

    /// Human readable network name
    fn name(&self) -> &str;

    /// Pure, deterministic, no I/O
    fn derive_address(&self, public_key: &[u8], options: &AddressOptions) -> CustodyResult<DerivedAddress>;

    /// Format and checksum validation only
    fn validate_address(&self, address: &str) -> bool;

    /// Canonical lowercase `0x` hex for any accepted address form
    fn address_to_hex(&self, address: &str) -> CustodyResult<String>;

    async fn build_transaction(&self, params: TransactionParams) -> CustodyResult<UnsignedTransaction>;

    /// Does not touch `tx`; apply the result with [`UnsignedTransaction::with_fees`]
    async fn estimate_fee(&self, tx: &UnsignedTransaction) -> CustodyResult<FeeEstimate>;

    async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<SignedTransaction>;

    /// Returns the hash reported by the node
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> CustodyResult<String>;

    async fn get_balance(&self, address: &str) -> CustodyResult<U256>;

    async fn call(&self, request: &CallRequest) -> CustodyResult<Vec<u8>>;

    async fn get_nonce(&self, address: &str) -> CustodyResult<u64>;

    async fn sign_message(
        &self,
        message: &[u8],
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<MessageSignature>;

    /// Pure recovery-and-compare
    fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> CustodyResult<bool>;

    async fn sign_typed_data(
        &self,
        _typed_data: &serde_json::Value,
        _signer: &Signer,
        _options: &SignOptions,
    ) -> CustodyResult<MessageSignature> {
        Err(CustodyError::unsupported_method("signTypedData"))
    }
}

/// 20 account bytes a public key controls on `network_type`.
/// Conflux user addresses carry the `0x1` type nibble.
pub fn account_bytes_for_public_key(network_type: NetworkType, public_key: &[u8]) -> CustodyResult<[u8; 20]> {
    let bytes = crypto::public_key_to_account_bytes(public_key)?;
    Ok(tag_account_bytes(network_type, bytes))
}

pub fn account_bytes_for_private_key(network_type: NetworkType, private_key: &[u8; 32]) -> CustodyResult<[u8; 20]> {
    let bytes = crypto::secret_to_account_bytes(private_key)?;
    Ok(tag_account_bytes(network_type, bytes))
}

pub(crate) fn tag_account_bytes(network_type: NetworkType, mut bytes: [u8; 20]) -> [u8; 20] {
    if network_type == NetworkType::Conflux {
        bytes[0] = (bytes[0] & 0x0f) | 0x10;
    }
    bytes
}

/// `transfer(recipient, amount)` calldata
pub fn encode_token_transfer(recipient: &[u8; 20], amount: U256) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&ERC20_TRANSFER_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient);
    let mut word = [0u8; 32];
    amount.to_big_endian(&mut word);
    data.extend_from_slice(&word);
    data
}

/// Resolved `(to, value, data)` after the token special case
pub(crate) struct Destination {
    pub to: Option<String>,
    pub value: U256,
    pub data: Vec<u8>,
}

/// Fungible-token transfers send to the contract with zero native value.
/// `to_bytes` converts an address string in the family's format to 20 bytes.
pub(crate) fn resolve_destination(
    params: &TransactionParams,
    to_bytes: impl Fn(&str) -> CustodyResult<[u8; 20]>,
) -> CustodyResult<Destination> {
    match &params.token {
        Some(contract) => {
            let recipient = params
                .to
                .as_deref()
                .ok_or_else(|| CustodyError::invalid_transaction("Token transfer without recipient"))?;
            let recipient = to_bytes(recipient)?;
            Ok(Destination {
                to: Some(contract.clone()),
                value: U256::zero(),
                data: encode_token_transfer(&recipient, params.value),
            })
        }
        None => Ok(Destination {
            to: params.to.clone(),
            value: params.value,
            data: utils::decode_hex_data(params.data.as_deref().unwrap_or(""))?,
        }),
    }
}

/// `gas_limit × price + extra`; oversized caller or node quantities are an error, never a wrap
pub(crate) fn fee_total(gas_limit: U256, price: U256, extra: U256) -> CustodyResult<U256> {
    gas_limit
        .checked_mul(price)
        .and_then(|fee| fee.checked_add(extra))
        .ok_or_else(|| CustodyError::invalid_transaction("Fee overflows U256"))
}

/// Placeholder gas limit until estimation
pub(crate) fn placeholder_gas_limit(data: &[u8]) -> U256 {
    if data.is_empty() {
        U256::from(TRANSFER_GAS_LIMIT)
    } else {
        U256::from(CONTRACT_GAS_LIMIT)
    }
}
