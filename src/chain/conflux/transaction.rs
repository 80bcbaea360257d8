//! Epoch-height transaction payload and its RLP encoding
//!
//! unsigned: `[nonce, gasPrice, gas, to, value, storageLimit, epochHeight, chainId, data]`
//! signed:   `[[unsigned fields], v, r, s]` with v in {0, 1}

use ethers_core::types::{H160, U256};
use ethers_core::utils::rlp::RlpStream;
use serde::{Deserialize, Serialize};

use super::address;
use crate::chain::{fee_total, FeeEstimate};
use crate::error::{CustodyError, CustodyResult};
use crate::utils::crypto::{keccak256, RawSignature};
use crate::utils::{hex_bytes, opt_quantity, parse_hex_address, quantity};

/// Drip charged per byte of storage collateral (1 CFX / 1024)
pub const DRIP_PER_STORAGE_BYTE: u64 = 976_562_500_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluxPayload {
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
    /// Unset until supplied by the caller or filled by fee estimation
    #[serde(default, with = "opt_quantity")]
    pub gas_price: Option<U256>,
    #[serde(with = "quantity")]
    pub storage_limit: U256,
    pub epoch_height: u64,
}

impl ConfluxPayload {
    pub fn with_fees(&self, fee: &FeeEstimate) -> Self {
        Self {
            gas_limit: fee.gas_limit,
            gas_price: fee.gas_price.or(self.gas_price),
            storage_limit: fee.storage_collateralized.unwrap_or(self.storage_limit),
            ..self.clone()
        }
    }

    fn append_fields(&self, stream: &mut RlpStream) -> CustodyResult<()> {
        let gas_price = self
            .gas_price
            .ok_or_else(|| CustodyError::invalid_transaction("Gas price not set; estimate fees first"))?;
        stream.append(&self.nonce);
        stream.append(&gas_price);
        stream.append(&self.gas_limit);
        match &self.to {
            Some(to) => {
                stream.append(&H160::from(account_bytes(to)?));
            }
            None => {
                stream.append_empty_data();
            }
        }
        stream.append(&self.value);
        stream.append(&self.storage_limit);
        stream.append(&self.epoch_height);
        stream.append(&self.chain_id);
        stream.append(&self.data);
        Ok(())
    }

    pub fn unsigned_rlp(&self) -> CustodyResult<Vec<u8>> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream)?;
        Ok(stream.out().to_vec())
    }

    pub fn signing_digest(&self) -> CustodyResult<[u8; 32]> {
        Ok(keccak256(&self.unsigned_rlp()?))
    }

    pub fn encode_signed(&self, signature: &RawSignature) -> CustodyResult<Vec<u8>> {
        if signature.recovery_id > 1 {
            return Err(CustodyError::signing_failed(format!(
                "Unexpected recovery id {}",
                signature.recovery_id
            )));
        }
        let unsigned = self.unsigned_rlp()?;

        let mut stream = RlpStream::new_list(4);
        stream.append_raw(&unsigned, 1);
        stream.append(&(signature.recovery_id as u64));
        stream.append(&U256::from_big_endian(&signature.r));
        stream.append(&U256::from_big_endian(&signature.s));
        Ok(stream.out().to_vec())
    }

    /// gas × price plus storage collateral
    pub fn max_cost(&self) -> CustodyResult<U256> {
        fee_total(self.gas_limit, self.gas_price.unwrap_or_default(), storage_cost(self.storage_limit)?)
    }
}

/// Collateral in drip for `storage_bytes` of storage
pub fn storage_cost(storage_bytes: U256) -> CustodyResult<U256> {
    storage_bytes
        .checked_mul(U256::from(DRIP_PER_STORAGE_BYTE))
        .ok_or_else(|| CustodyError::invalid_transaction("Storage collateral overflows U256"))
}

/// Base32 or `0x` hex to account bytes
pub fn account_bytes(address: &str) -> CustodyResult<[u8; 20]> {
    if address.starts_with("0x") || address.starts_with("0X") {
        parse_hex_address(address)
    } else {
        Ok(address::decode(address)?.bytes)
    }
}
