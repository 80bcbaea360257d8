//! Shared types for the custody core
//!
//! The wallet data model (accounts, addresses, vaults) and the chain
//! identifiers that cross module boundaries are defined here for
//! consistent serialization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CustodyError, CustodyResult};

// =============================================================================
// Chain Types
// =============================================================================

/// Chain family. Every family has exactly one provider implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// EVM-style account chains
    Ethereum,
    /// Epoch-height chains (Conflux core space)
    Conflux,
}

impl NetworkType {
    pub const ALL: [NetworkType; 2] = [NetworkType::Ethereum, NetworkType::Conflux];

    /// CAIP-2 namespace
    pub fn namespace(&self) -> &'static str {
        match self {
            NetworkType::Ethereum => "eip155",
            NetworkType::Conflux => "cfx",
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "eip155" => Some(NetworkType::Ethereum),
            "cfx" => Some(NetworkType::Conflux),
            _ => None,
        }
    }

    /// SLIP-44 coin type used for HD derivation
    pub fn coin_type(&self) -> u32 {
        match self {
            NetworkType::Ethereum => 60,
            NetworkType::Conflux => 503,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            NetworkType::Ethereum => "ETH",
            NetworkType::Conflux => "CFX",
        }
    }

    pub fn decimals(&self) -> u8 {
        18
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Ethereum => write!(f, "ethereum"),
            NetworkType::Conflux => write!(f, "conflux"),
        }
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" | "eth" | "evm" | "eip155" => Ok(NetworkType::Ethereum),
            "conflux" | "cfx" => Ok(NetworkType::Conflux),
            _ => Err(format!("Unknown network type: {}", s)),
        }
    }
}

/// A CAIP-2 chain reference such as `eip155:1` or `cfx:1029`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainRef {
    pub network_type: NetworkType,
    pub chain_id: u64,
}

impl ChainRef {
    pub fn new(network_type: NetworkType, chain_id: u64) -> Self {
        Self { network_type, chain_id }
    }

    pub fn parse(s: &str) -> CustodyResult<Self> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| CustodyError::invalid_input(format!("Invalid chain reference: {}", s)))?;
        let network_type = NetworkType::from_namespace(namespace)
            .ok_or_else(|| CustodyError::invalid_input(format!("Unknown namespace: {}", namespace)))?;
        let chain_id = reference
            .parse::<u64>()
            .map_err(|_| CustodyError::invalid_input(format!("Invalid chain id: {}", reference)))?;
        Ok(Self { network_type, chain_id })
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network_type.namespace(), self.chain_id)
    }
}

impl Serialize for ChainRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainRef::parse(&s).map_err(|e| serde::de::Error::custom(e.message))
    }
}

// =============================================================================
// Wallet Data Model
// =============================================================================

/// A group of accounts backed by one vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountGroup {
    pub id: String,
    pub nickname: String,
    pub vault_id: String,
}

/// Logical identity inside an account group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub group_id: String,
    pub nickname: String,
    /// Ordinal within the group; also the HD derivation index
    pub index: u32,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub selected: bool,
}

impl Account {
    /// Soft removal: the record stays, it is only hidden and deselected.
    pub fn hide(&mut self) {
        self.hidden = true;
        self.selected = false;
    }
}

/// Mark one account as selected and clear the flag on every other account
/// of the same group.
pub fn select_account(accounts: &mut [Account], account_id: &str) -> CustodyResult<()> {
    let group_id = accounts
        .iter()
        .find(|a| a.id == account_id)
        .map(|a| a.group_id.clone())
        .ok_or_else(|| CustodyError::account_not_found(account_id))?;

    for account in accounts.iter_mut().filter(|a| a.group_id == group_id) {
        account.selected = account.id == account_id;
    }
    Ok(())
}

/// Chain-specific public identifier bound to one account and one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub account_id: String,
    pub network_type: NetworkType,
    pub chain_id: u64,
    /// Display form: EIP-55 checksum or CIP-37 base32
    pub value: String,
    /// Canonical lowercase 0x-prefixed 20-byte hex
    pub hex: String,
}

impl Address {
    pub fn chain_ref(&self) -> ChainRef {
        ChainRef::new(self.network_type, self.chain_id)
    }

    pub fn belongs_to(&self, account: &Account) -> bool {
        self.account_id == account.id
    }
}

/// Credential container kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultType {
    /// Hierarchical-deterministic: encrypted BIP-39 mnemonic
    Hd,
    /// Single encrypted private key
    PrivateKey,
    /// Watch-only public address, no secret material
    Public,
    /// Hardware secure element, no secret material
    Hardware,
}

impl VaultType {
    pub fn holds_secret(&self) -> bool {
        matches!(self, VaultType::Hd | VaultType::PrivateKey)
    }
}

impl fmt::Display for VaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VaultType::Hd => "hd",
            VaultType::PrivateKey => "private_key",
            VaultType::Public => "public",
            VaultType::Hardware => "hardware",
        };
        write!(f, "{}", s)
    }
}

/// Where the vault's material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultSource {
    Create,
    Import,
}

/// Credential container for an account group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: String,
    #[serde(rename = "type")]
    pub vault_type: VaultType,
    /// Credential Cipher output; absent for watch and hardware vaults
    pub data: Option<String>,
    pub source: VaultSource,
    /// Device identifier for hardware vaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

// =============================================================================
// External Applications
// =============================================================================

/// Metadata a third-party application presents about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(alias = "url")]
    pub origin: String,
    #[serde(default)]
    pub icons: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AppMetadata {
    pub fn icon(&self) -> Option<&str> {
        self.icons.first().map(|s| s.as_str())
    }
}
