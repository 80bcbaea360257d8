//! EVM-style chains
//!
//! Legacy (EIP-155) and EIP-1559 transactions, EIP-191 personal messages
//! and EIP-712 typed data. Software signing goes through `ethers-signers`;
//! hardware signing ships the sighash to the secure element.

use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::transaction::eip712::{Eip712, TypedData};
use ethers_core::types::{Address as EvmAddress, Eip1559TransactionRequest, Signature, TransactionRequest, U256};
use ethers_signers::{LocalWallet, Signer as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::message::{self, MessageSignature};
use super::rpc::RpcTransport;
use super::{
    account_bytes_for_public_key, fee_total, placeholder_gas_limit, resolve_destination, AddressOptions, CallRequest,
    ChainProvider, DerivedAddress, FeeEstimate, SignOptions, SignedTransaction, TransactionParams,
    UnsignedTransaction,
};
use crate::error::{CustodyError, CustodyResult};
use crate::fees::{self, FeeHistory, FeeSuggestions, FeeTierConfig};
use crate::signing::{Signer, SigningPayload};
use crate::types::NetworkType;
use crate::utils::crypto::{keccak256, to_checksum_address};
use crate::utils::{self, get_json_quantity, hex_bytes, opt_quantity, parse_hex_address, quantity};
use crate::{log_debug, log_info, log_warn};

/// Blocks sampled by `suggest_fees`
pub const FEE_HISTORY_BLOCKS: u64 = 5;
/// Reward percentiles for the low / medium / high tiers
pub const FEE_HISTORY_PERCENTILES: [f64; 3] = [10.0, 50.0, 90.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvmTxType {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumPayload {
    pub chain_id: u64,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(with = "quantity")]
    pub value: U256,
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "quantity")]
    pub nonce: U256,
    #[serde(with = "quantity")]
    pub gas_limit: U256,
    pub tx_type: EvmTxType,
    #[serde(default, with = "opt_quantity")]
    pub gas_price: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, with = "opt_quantity")]
    pub max_priority_fee_per_gas: Option<U256>,
}

impl EthereumPayload {
    pub fn with_fees(&self, fee: &FeeEstimate) -> Self {
        let mut next = Self {
            gas_limit: fee.gas_limit,
            ..self.clone()
        };
        match self.tx_type {
            EvmTxType::Legacy => {
                next.gas_price = fee.gas_price.or(self.gas_price);
            }
            EvmTxType::Eip1559 => {
                next.max_fee_per_gas = fee.max_fee_per_gas.or(self.max_fee_per_gas);
                next.max_priority_fee_per_gas = fee.max_priority_fee_per_gas.or(self.max_priority_fee_per_gas);
            }
        }
        next
    }

    /// The ethers request for this payload. Fee fields must be set.
    pub fn to_typed(&self) -> CustodyResult<TypedTransaction> {
        let from = EvmAddress::from(parse_hex_address(&self.from)?);
        let to = self
            .to
            .as_deref()
            .map(parse_hex_address)
            .transpose()?
            .map(EvmAddress::from);
        let missing = || CustodyError::invalid_transaction("Fee fields not set; estimate fees first");

        let typed: TypedTransaction = match self.tx_type {
            EvmTxType::Legacy => {
                let mut req = TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .gas(self.gas_limit)
                    .gas_price(self.gas_price.ok_or_else(missing)?)
                    .nonce(self.nonce)
                    .chain_id(self.chain_id)
                    .data(self.data.clone());
                if let Some(to) = to {
                    req = req.to(to);
                }
                req.into()
            }
            EvmTxType::Eip1559 => {
                let mut req = Eip1559TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .gas(self.gas_limit)
                    .max_fee_per_gas(self.max_fee_per_gas.ok_or_else(missing)?)
                    .max_priority_fee_per_gas(self.max_priority_fee_per_gas.ok_or_else(missing)?)
                    .nonce(self.nonce)
                    .chain_id(self.chain_id)
                    .data(self.data.clone());
                if let Some(to) = to {
                    req = req.to(to);
                }
                req.into()
            }
        };
        Ok(typed)
    }
}

/// EIP-155 `v` without the recovery id: `35 + 2 * chain_id`. Errors for chain
/// ids whose `v` (recovery id included) does not fit a u64.
pub fn eip155_v_base(chain_id: u64) -> CustodyResult<u64> {
    chain_id
        .checked_mul(2)
        .and_then(|v| v.checked_add(36))
        .map(|v| v - 1)
        .ok_or_else(|| CustodyError::invalid_transaction(format!("Chain id {} too large for EIP-155", chain_id)))
}

pub struct EthereumProvider {
    chain_id: u64,
    name: String,
    transport: Arc<dyn RpcTransport>,
}

impl EthereumProvider {
    pub fn new(chain_id: u64, name: impl Into<String>, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            transport,
        }
    }

    fn expect_payload<'a>(&self, tx: &'a UnsignedTransaction) -> CustodyResult<&'a EthereumPayload> {
        match tx {
            UnsignedTransaction::Ethereum(p) => Ok(p),
            other => Err(CustodyError::invalid_transaction(format!(
                "{} transaction passed to ethereum provider",
                other.network_type()
            ))),
        }
    }

    async fn quantity(&self, method: &str, params: Value) -> CustodyResult<U256> {
        let result = self.transport.request(method, params).await?;
        utils::value_to_quantity(&result)
    }

    pub async fn get_code(&self, address: &str) -> CustodyResult<Vec<u8>> {
        let result = self.transport.request("eth_getCode", json!([address, "latest"])).await?;
        utils::decode_hex_data(result.as_str().unwrap_or("0x"))
    }

    pub async fn is_contract(&self, address: &str) -> CustodyResult<bool> {
        Ok(!self.get_code(address).await?.is_empty())
    }

    /// Base fee of the latest block; `None` on pre-London chains
    pub async fn latest_base_fee(&self) -> CustodyResult<Option<U256>> {
        let block = self
            .transport
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        get_json_quantity(&block, "baseFeePerGas")
    }

    /// Tiered EIP-1559 fee suggestions from recent block rewards
    pub async fn suggest_fees(&self, tiers: &FeeTierConfig) -> CustodyResult<FeeSuggestions> {
        let result = self
            .transport
            .request(
                "eth_feeHistory",
                json!([utils::u64_to_quantity(FEE_HISTORY_BLOCKS), "latest", FEE_HISTORY_PERCENTILES]),
            )
            .await?;
        let history = FeeHistory::from_rpc(&result)?;
        fees::suggest_fees(&history, tiers)
    }

    fn call_object(payload: &EthereumPayload) -> Value {
        let mut obj = json!({
            "from": payload.from,
            "value": utils::to_quantity(payload.value),
            "data": utils::encode_hex_data(&payload.data),
        });
        if let Some(to) = &payload.to {
            obj["to"] = json!(to);
        }
        obj
    }

    fn require_valid(&self, address: &str) -> CustodyResult<()> {
        if self.validate_address(address) {
            Ok(())
        } else {
            Err(CustodyError::invalid_address(format!("Not an EVM address: {}", address)))
        }
    }

    async fn sign_hardware(
        &self,
        typed: &TypedTransaction,
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<Signature> {
        let payload = SigningPayload::Transaction {
            network_type: NetworkType::Ethereum,
            chain_id: self.chain_id,
            digest: typed.sighash().0,
            unsigned: typed.rlp().to_vec(),
        };
        let v_base = eip155_v_base(self.chain_id)?;
        let raw = signer.sign_payload(&payload, &options.cancel).await?;
        Ok(Signature {
            r: U256::from_big_endian(&raw.r),
            s: U256::from_big_endian(&raw.s),
            v: v_base + raw.recovery_id as u64,
        })
    }

    fn parse_typed_data(typed_data: &Value) -> CustodyResult<TypedData> {
        let parsed = match typed_data {
            // eth_signTypedData_v4 sends the document as a JSON string
            Value::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| CustodyError::invalid_input(format!("Invalid typed data: {}", e)))
    }
}

#[async_trait]
impl ChainProvider for EthereumProvider {
    fn network_type(&self) -> NetworkType {
        NetworkType::Ethereum
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn derive_address(&self, public_key: &[u8], options: &AddressOptions) -> CustodyResult<DerivedAddress> {
        let bytes = account_bytes_for_public_key(NetworkType::Ethereum, public_key)?;
        Ok(DerivedAddress {
            network_type: NetworkType::Ethereum,
            chain_id: options.chain_id.unwrap_or(self.chain_id),
            value: to_checksum_address(&bytes),
            hex: format!("0x{}", hex::encode(bytes)),
        })
    }

    /// All-lowercase and all-uppercase are accepted; mixed case must be a valid EIP-55 checksum
    fn validate_address(&self, address: &str) -> bool {
        let Ok(bytes) = parse_hex_address(address) else {
            return false;
        };
        let body = &address[2..];
        let is_lower = !body.chars().any(|c| c.is_ascii_uppercase());
        let is_upper = !body.chars().any(|c| c.is_ascii_lowercase());
        is_lower || is_upper || to_checksum_address(&bytes)[2..] == *body
    }

    fn address_to_hex(&self, address: &str) -> CustodyResult<String> {
        Ok(format!("0x{}", hex::encode(parse_hex_address(address)?)))
    }

    async fn build_transaction(&self, params: TransactionParams) -> CustodyResult<UnsignedTransaction> {
        self.require_valid(&params.from)?;
        if let Some(to) = &params.to {
            self.require_valid(to)?;
        }
        if let Some(token) = &params.token {
            self.require_valid(token)?;
        }

        let dest = resolve_destination(&params, parse_hex_address)?;
        let nonce = match params.nonce {
            Some(n) => U256::from(n),
            None => U256::from(self.get_nonce(&params.from).await?),
        };

        let tx_type = if params.gas_price.is_some() || params.tx_type == Some(0) {
            EvmTxType::Legacy
        } else {
            EvmTxType::Eip1559
        };

        let payload = EthereumPayload {
            chain_id: self.chain_id,
            from: params.from,
            to: dest.to,
            value: dest.value,
            gas_limit: params.gas_limit.unwrap_or_else(|| placeholder_gas_limit(&dest.data)),
            data: dest.data,
            nonce,
            tx_type,
            gas_price: params.gas_price,
            max_fee_per_gas: params.max_fee_per_gas,
            max_priority_fee_per_gas: params.max_priority_fee_per_gas,
        };

        log_debug!("ethereum", "Built transaction", from = payload.from, nonce = payload.nonce);
        Ok(UnsignedTransaction::Ethereum(payload))
    }

    async fn estimate_fee(&self, tx: &UnsignedTransaction) -> CustodyResult<FeeEstimate> {
        let payload = self.expect_payload(tx)?;
        let gas_limit = self
            .quantity("eth_estimateGas", json!([Self::call_object(payload)]))
            .await?;

        match payload.tx_type {
            EvmTxType::Legacy => {
                let gas_price = match payload.gas_price {
                    Some(p) => p,
                    None => self.quantity("eth_gasPrice", json!([])).await?,
                };
                Ok(FeeEstimate {
                    gas_limit,
                    gas_price: Some(gas_price),
                    total: fee_total(gas_limit, gas_price, U256::zero())?,
                    ..Default::default()
                })
            }
            EvmTxType::Eip1559 => {
                let priority = match payload.max_priority_fee_per_gas {
                    Some(p) => p,
                    None => self.quantity("eth_maxPriorityFeePerGas", json!([])).await?,
                };
                let max_fee = match payload.max_fee_per_gas {
                    Some(m) => m,
                    None => {
                        let base_fee = self.latest_base_fee().await?.ok_or_else(|| {
                            CustodyError::invalid_transaction("Chain does not report a base fee; use a legacy transaction")
                        })?;
                        base_fee
                            .checked_mul(U256::from(2))
                            .and_then(|fee| fee.checked_add(priority))
                            .ok_or_else(|| CustodyError::invalid_transaction("Fee overflows U256"))?
                    }
                };
                Ok(FeeEstimate {
                    gas_limit,
                    max_fee_per_gas: Some(max_fee),
                    max_priority_fee_per_gas: Some(priority),
                    total: fee_total(gas_limit, max_fee, U256::zero())?,
                    ..Default::default()
                })
            }
        }
    }

    async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<SignedTransaction> {
        let payload = self.expect_payload(tx)?;
        if !self.address_to_hex(&payload.from)?.eq_ignore_ascii_case(signer.address_hex()) {
            return Err(CustodyError::ownership_mismatch(
                "Signer does not control the transaction sender",
            ));
        }

        eip155_v_base(payload.chain_id)?;
        let typed = payload.to_typed()?;
        let signature = match signer {
            Signer::Software(software) => {
                let wallet = LocalWallet::from_bytes(software.private_key())
                    .map_err(|e| CustodyError::signing_failed(format!("Invalid signing key: {}", e)))?
                    .with_chain_id(payload.chain_id);
                wallet
                    .sign_transaction_sync(&typed)
                    .map_err(|e| CustodyError::signing_failed(e.to_string()))?
            }
            Signer::Hardware(_) => self.sign_hardware(&typed, signer, options).await?,
        };

        let raw = typed.rlp_signed(&signature).to_vec();
        let hash = format!("0x{}", hex::encode(keccak256(&raw)));

        log_info!("ethereum", "Signed transaction", signer = signer.kind(), tx_hash = hash);
        Ok(SignedTransaction {
            network_type: NetworkType::Ethereum,
            chain_id: payload.chain_id,
            raw,
            hash,
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> CustodyResult<String> {
        let result = self
            .transport
            .request("eth_sendRawTransaction", json!([signed.raw_hex()]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| CustodyError::parse_error("eth_sendRawTransaction returned no hash"))?
            .to_string();

        if !hash.eq_ignore_ascii_case(&signed.hash) {
            log_warn!("ethereum", "Node hash differs from local hash", tx_hash = hash, local_hash = signed.hash);
        }
        Ok(hash)
    }

    async fn get_balance(&self, address: &str) -> CustodyResult<U256> {
        self.quantity("eth_getBalance", json!([address, "latest"])).await
    }

    async fn call(&self, request: &CallRequest) -> CustodyResult<Vec<u8>> {
        let mut obj = json!({ "to": request.to });
        if let Some(from) = &request.from {
            obj["from"] = json!(from);
        }
        if let Some(data) = &request.data {
            obj["data"] = json!(data);
        }
        if let Some(value) = request.value {
            obj["value"] = json!(utils::to_quantity(value));
        }
        let result = self.transport.request("eth_call", json!([obj, "latest"])).await?;
        utils::decode_hex_data(result.as_str().unwrap_or("0x"))
    }

    async fn get_nonce(&self, address: &str) -> CustodyResult<u64> {
        let result = self
            .transport
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        utils::value_to_u64(&result)
    }

    async fn sign_message(
        &self,
        message: &[u8],
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<MessageSignature> {
        let payload = SigningPayload::Message {
            network_type: NetworkType::Ethereum,
            message: message.to_vec(),
            digest: message::hash_message(NetworkType::Ethereum, message),
        };
        let raw = signer.sign_payload(&payload, &options.cancel).await?;
        Ok(MessageSignature::from_raw(&raw, message::v_offset(NetworkType::Ethereum)))
    }

    fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> CustodyResult<bool> {
        let recovered = message::recover_signer(NetworkType::Ethereum, message, signature)?;
        Ok(recovered == parse_hex_address(address)?)
    }

    async fn sign_typed_data(
        &self,
        typed_data: &Value,
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<MessageSignature> {
        let typed = Self::parse_typed_data(typed_data)?;
        let eip712 = |e: ethers_core::types::transaction::eip712::Eip712Error| {
            CustodyError::invalid_input(format!("Typed data encoding failed: {}", e))
        };

        let payload = SigningPayload::TypedData {
            domain_separator: typed.domain_separator().map_err(eip712)?,
            struct_hash: typed.struct_hash().map_err(eip712)?,
            digest: typed.encode_eip712().map_err(eip712)?,
        };
        let raw = signer.sign_payload(&payload, &options.cancel).await?;
        Ok(MessageSignature::from_raw(&raw, 27))
    }
}

/// EIP-712 digest of a typed-data document
pub fn typed_data_digest(typed_data: &Value) -> CustodyResult<[u8; 32]> {
    EthereumProvider::parse_typed_data(typed_data)?
        .encode_eip712()
        .map_err(|e| CustodyError::invalid_input(format!("Typed data encoding failed: {}", e)))
}
