//! JSON-RPC Value Helpers
//!
//! Node responses carry quantities as `0x`-prefixed hex strings and
//! nullable fields. Everything monetary stays a `U256` until it reaches
//! the presentation layer.

use ethers_core::types::U256;

use crate::error::{CustodyError, CustodyResult};

/// Parse a hex (`0x..`) or decimal quantity string
pub fn parse_quantity(s: &str) -> CustodyResult<U256> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        if hex.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_str_radix(hex, 16)
            .map_err(|e| CustodyError::parse_error(format!("Invalid hex quantity '{}': {:?}", s, e)))
    } else {
        U256::from_dec_str(trimmed)
            .map_err(|e| CustodyError::parse_error(format!("Invalid quantity '{}': {:?}", s, e)))
    }
}

/// Parse a quantity that must fit in u64 (nonces, epoch numbers, block numbers)
pub fn parse_quantity_u64(s: &str) -> CustodyResult<u64> {
    let value = parse_quantity(s)?;
    if value > U256::from(u64::MAX) {
        return Err(CustodyError::parse_error(format!("Quantity out of range: {}", s)));
    }
    Ok(value.as_u64())
}

/// Minimal `0x` hex encoding of a quantity (`0x0` for zero)
pub fn to_quantity(value: U256) -> String {
    format!("{:#x}", value)
}

pub fn u64_to_quantity(value: u64) -> String {
    format!("{:#x}", value)
}

/// Read a quantity out of a JSON value (hex string, decimal string or number)
pub fn value_to_quantity(value: &serde_json::Value) -> CustodyResult<U256> {
    match value {
        serde_json::Value::String(s) => parse_quantity(s),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| CustodyError::parse_error(format!("Invalid numeric quantity: {}", n))),
        other => Err(CustodyError::parse_error(format!("Expected quantity, got {}", other))),
    }
}

/// Quantity that must fit in u64
pub fn value_to_u64(value: &serde_json::Value) -> CustodyResult<u64> {
    let q = value_to_quantity(value)?;
    if q > U256::from(u64::MAX) {
        return Err(CustodyError::parse_error(format!("Quantity out of range: {}", value)));
    }
    Ok(q.as_u64())
}

/// Extract a quantity field from a JSON object; `None` when absent or null
pub fn get_json_quantity(value: &serde_json::Value, field: &str) -> CustodyResult<Option<U256>> {
    match value.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => value_to_quantity(v).map(Some),
    }
}

/// Decode `0x` hex call data; empty string and bare `0x` are empty data
pub fn decode_hex_data(data: &str) -> CustodyResult<Vec<u8>> {
    let stripped = data.trim().trim_start_matches("0x").trim_start_matches("0X");
    if stripped.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(stripped)
        .map_err(|e| CustodyError::invalid_input(format!("Invalid hex data: {}", e)))
}

pub fn encode_hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Serde adapter for `U256` fields written as hex quantity strings
pub mod quantity {
    use ethers_core::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_quantity(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        super::value_to_quantity(&value).map_err(|e| serde::de::Error::custom(e.message))
    }
}

/// Serde adapter for byte fields written as `0x` hex
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_hex_data(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex_data(&s).map_err(|e| serde::de::Error::custom(e.message))
    }
}

/// Serde adapter for `Option<U256>` hex quantity fields
pub mod opt_quantity {
    use ethers_core::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&super::to_quantity(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => super::value_to_quantity(&v)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(e.message)),
        }
    }
}

/// Serde adapter for `Option<u64>` fields that arrive as numbers or hex strings
pub mod opt_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_u64(*v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => super::value_to_u64(&v)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(e.message)),
        }
    }
}
