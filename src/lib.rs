//! Custody Core Library
//!
//! Signing and transaction core for a self-custodial wallet serving
//! Ethereum-style and Conflux (epoch-height) chains.
//!
//! # Architecture
//!
//! This crate provides:
//! - **cipher**: password-based credential encryption (PBKDF2 + AES-GCM)
//! - **chain**: one provider per chain family plus the chain registry
//! - **signing**: signer resolution behind an authorization prompt
//! - **tx**: the build, estimate, sign and broadcast pipeline
//! - **fees**: EIP-1559 fee tier suggestions
//! - **bridge**: external application requests (pairing sessions)
//! - **config**: networks, cipher and fee settings
//!
//! # Security
//!
//! Decrypted mnemonics and private keys live in `Zeroizing` buffers and are
//! wiped on drop. Log fields are redacted by key name.
//!
//! # Example
//!
//! ```rust,ignore
//! use custody_core::{ChainRegistry, CoreConfig};
//!
//! let config = CoreConfig::load("custody.json")?;
//! let registry = ChainRegistry::from_config(&config)?;
//! let provider = registry.get(1, None).expect("mainnet configured");
//! ```

pub mod bridge;
pub mod chain;
pub mod cipher;
pub mod config;
pub mod error;
pub mod fees;
pub mod signing;
pub mod tx;
pub mod types;
pub mod utils;

pub use error::{CustodyError, CustodyResult, ErrorCode};
pub use types::*;

pub use bridge::{ExternalRequestBridge, ExternalRequestEvent, ProviderRpcError, SessionTransport};
pub use chain::{ChainProvider, ChainRegistry, TransactionParams, UnsignedTransaction};
pub use cipher::{CipherConfig, CredentialCipher};
pub use config::CoreConfig;
pub use fees::{suggest_fees, FeeSuggestions};
pub use signing::{Signer, SigningService, VaultKeyring};
pub use tx::TransactionPipeline;
