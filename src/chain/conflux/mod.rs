//! Conflux core space (epoch-height family)

pub mod address;
pub mod transaction;

use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use address::{AddressError, AddressType, ConfluxAddress};
pub use transaction::ConfluxPayload;

use super::message::{self, MessageSignature};
use super::rpc::RpcTransport;
use super::{
    account_bytes_for_public_key, fee_total, placeholder_gas_limit, resolve_destination, AddressOptions, CallRequest,
    ChainProvider, DerivedAddress, FeeEstimate, SignOptions, SignedTransaction, TransactionParams,
    UnsignedTransaction,
};
use crate::error::{CustodyError, CustodyResult};
use crate::signing::{Signer, SigningPayload};
use crate::types::NetworkType;
use crate::utils::crypto::keccak256;
use crate::utils::{self, get_json_quantity};
use crate::{log_debug, log_info, log_warn};

/// Epoch tag used for state reads
const LATEST_STATE: &str = "latest_state";

/// Subset of `cfx_getStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluxStatus {
    pub chain_id: u64,
    pub network_id: u64,
    pub epoch_number: u64,
}

pub struct ConfluxProvider {
    chain_id: u64,
    name: String,
    transport: Arc<dyn RpcTransport>,
}

impl ConfluxProvider {
    pub fn new(chain_id: u64, name: impl Into<String>, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            transport,
        }
    }

    fn expect_payload<'a>(&self, tx: &'a UnsignedTransaction) -> CustodyResult<&'a ConfluxPayload> {
        match tx {
            UnsignedTransaction::Conflux(p) => Ok(p),
            other => Err(CustodyError::invalid_transaction(format!(
                "{} transaction passed to conflux provider",
                other.network_type()
            ))),
        }
    }

    /// Chain id and current epoch
    pub async fn get_status(&self) -> CustodyResult<ConfluxStatus> {
        let status = self.transport.request("cfx_getStatus", json!([])).await?;
        let field = |name: &str| -> CustodyResult<u64> {
            match status.get(name) {
                None | Some(Value::Null) => Err(CustodyError::parse_error(format!("cfx_getStatus missing {}", name))),
                Some(value) => utils::value_to_u64(value),
            }
        };
        Ok(ConfluxStatus {
            chain_id: field("chainId")?,
            network_id: field("networkId")?,
            epoch_number: field("epochNumber")?,
        })
    }

    pub async fn get_epoch_number(&self) -> CustodyResult<u64> {
        let result = self.transport.request("cfx_epochNumber", json!([LATEST_STATE])).await?;
        utils::value_to_u64(&result)
    }

    async fn gas_price(&self) -> CustodyResult<U256> {
        let result = self.transport.request("cfx_gasPrice", json!([])).await?;
        utils::value_to_quantity(&result)
    }

    fn call_object(&self, payload: &ConfluxPayload) -> Value {
        let mut obj = json!({
            "from": payload.from,
            "value": utils::to_quantity(payload.value),
            "data": utils::encode_hex_data(&payload.data),
            "nonce": utils::to_quantity(payload.nonce),
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
            Err(CustodyError::invalid_address(format!(
                "Not a {} address: {}",
                address::network_prefix(self.chain_id),
                address
            )))
        }
    }
}

#[async_trait]
impl ChainProvider for ConfluxProvider {
    fn network_type(&self) -> NetworkType {
        NetworkType::Conflux
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn derive_address(&self, public_key: &[u8], options: &AddressOptions) -> CustodyResult<DerivedAddress> {
        let bytes = account_bytes_for_public_key(NetworkType::Conflux, public_key)?;
        let chain_id = options.chain_id.unwrap_or(self.chain_id);
        let value = address::encode(&bytes, chain_id, options.verbose);
        Ok(DerivedAddress {
            network_type: NetworkType::Conflux,
            chain_id,
            value,
            hex: format!("0x{}", hex::encode(bytes)),
        })
    }

    /// Checksum, prefix and network id must all match this provider
    fn validate_address(&self, address: &str) -> bool {
        address::decode(address)
            .map(|a| a.network_id == self.chain_id)
            .unwrap_or(false)
    }

    fn address_to_hex(&self, address: &str) -> CustodyResult<String> {
        Ok(format!("0x{}", hex::encode(transaction::account_bytes(address)?)))
    }

    async fn build_transaction(&self, params: TransactionParams) -> CustodyResult<UnsignedTransaction> {
        self.require_valid(&params.from)?;
        if let Some(to) = &params.to {
            self.require_valid(to)?;
        }
        if let Some(token) = &params.token {
            self.require_valid(token)?;
        }

        let dest = resolve_destination(&params, transaction::account_bytes)?;

        let nonce = match params.nonce {
            Some(n) => U256::from(n),
            None => U256::from(self.get_nonce(&params.from).await?),
        };
        let epoch_height = match params.epoch_height {
            Some(e) => e,
            None => self.get_epoch_number().await?,
        };

        let payload = ConfluxPayload {
            chain_id: self.chain_id,
            from: params.from,
            to: dest.to,
            value: dest.value,
            gas_limit: params.gas_limit.unwrap_or_else(|| placeholder_gas_limit(&dest.data)),
            data: dest.data,
            nonce,
            gas_price: params.gas_price,
            storage_limit: params.storage_limit.unwrap_or_default(),
            epoch_height,
        };

        log_debug!(
            "conflux",
            "Built transaction",
            from = payload.from,
            nonce = payload.nonce,
            epoch = payload.epoch_height
        );
        Ok(UnsignedTransaction::Conflux(payload))
    }

    async fn estimate_fee(&self, tx: &UnsignedTransaction) -> CustodyResult<FeeEstimate> {
        let payload = self.expect_payload(tx)?;

        let estimate = self
            .transport
            .request(
                "cfx_estimateGasAndCollateral",
                json!([self.call_object(payload), LATEST_STATE]),
            )
            .await?;

        let gas_limit = get_json_quantity(&estimate, "gasLimit")?
            .or(get_json_quantity(&estimate, "gasUsed")?)
            .ok_or_else(|| CustodyError::parse_error("cfx_estimateGasAndCollateral returned no gas"))?;
        let storage = get_json_quantity(&estimate, "storageCollateralized")?.unwrap_or_default();

        let gas_price = match payload.gas_price {
            Some(price) => price,
            None => self.gas_price().await?,
        };

        Ok(FeeEstimate {
            gas_limit,
            gas_price: Some(gas_price),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            storage_collateralized: Some(storage),
            total: fee_total(gas_limit, gas_price, transaction::storage_cost(storage)?)?,
        })
    }

    async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<SignedTransaction> {
        let payload = self.expect_payload(tx)?;

        let from_hex = self.address_to_hex(&payload.from)?;
        if !from_hex.eq_ignore_ascii_case(signer.address_hex()) {
            return Err(CustodyError::ownership_mismatch(
                "Signer does not control the transaction sender",
            ));
        }

        let signing_payload = SigningPayload::Transaction {
            network_type: NetworkType::Conflux,
            chain_id: payload.chain_id,
            digest: payload.signing_digest()?,
            unsigned: payload.unsigned_rlp()?,
        };
        let signature = signer.sign_payload(&signing_payload, &options.cancel).await?;

        let raw = payload.encode_signed(&signature)?;
        let hash = format!("0x{}", hex::encode(keccak256(&raw)));

        log_info!("conflux", "Signed transaction", signer = signer.kind(), tx_hash = hash);
        Ok(SignedTransaction {
            network_type: NetworkType::Conflux,
            chain_id: payload.chain_id,
            raw,
            hash,
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> CustodyResult<String> {
        let result = self
            .transport
            .request("cfx_sendRawTransaction", json!([signed.raw_hex()]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| CustodyError::parse_error("cfx_sendRawTransaction returned no hash"))?
            .to_string();

        if !hash.eq_ignore_ascii_case(&signed.hash) {
            log_warn!("conflux", "Node hash differs from local hash", tx_hash = hash, local_hash = signed.hash);
        }
        Ok(hash)
    }

    async fn get_balance(&self, address: &str) -> CustodyResult<U256> {
        let result = self
            .transport
            .request("cfx_getBalance", json!([address, LATEST_STATE]))
            .await?;
        utils::value_to_quantity(&result)
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
        let result = self.transport.request("cfx_call", json!([obj, LATEST_STATE])).await?;
        utils::decode_hex_data(result.as_str().unwrap_or("0x"))
    }

    async fn get_nonce(&self, address: &str) -> CustodyResult<u64> {
        let result = self.transport.request("cfx_getNextNonce", json!([address])).await?;
        utils::value_to_u64(&result)
    }

    async fn sign_message(
        &self,
        message: &[u8],
        signer: &Signer,
        options: &SignOptions,
    ) -> CustodyResult<MessageSignature> {
        let payload = SigningPayload::Message {
            network_type: NetworkType::Conflux,
            message: message.to_vec(),
            digest: message::hash_message(NetworkType::Conflux, message),
        };
        let raw = signer.sign_payload(&payload, &options.cancel).await?;
        Ok(MessageSignature::from_raw(&raw, message::v_offset(NetworkType::Conflux)))
    }

    fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> CustodyResult<bool> {
        let recovered = message::recover_signer(NetworkType::Conflux, message, signature)?;
        let recovered = super::tag_account_bytes(NetworkType::Conflux, recovered);
        Ok(recovered == transaction::account_bytes(address)?)
    }
}

#[cfg(test)]
mod tests;
