//! Unified error types for the custody core
//!
//! All errors flow through this module so that every failure carries a
//! stable machine-readable code, both for in-process callers (which branch
//! on [`ErrorCode`]) and for external applications (which receive the
//! numeric provider code from [`CustodyError::provider_code`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC / EIP-1193 numeric codes surfaced to external applications.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
}

/// Main error type for all custody operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    /// Structured payload for diagnostics (vault type, RPC error data, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CustodyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            data: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    // Convenience constructors

    pub fn account_not_found(id: &str) -> Self {
        Self::new(ErrorCode::AccountNotFound, format!("Account {} not found", id))
    }

    pub fn address_not_found(id: &str) -> Self {
        Self::new(ErrorCode::AddressNotFound, format!("Address {} not found", id))
    }

    pub fn vault_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::VaultNotFound, msg)
    }

    pub fn provider_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderNotFound, msg)
    }

    pub fn ownership_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::OwnershipMismatch, msg)
    }

    pub fn password_required() -> Self {
        Self::new(ErrorCode::PasswordRequired, "No password supplied and no password provider registered")
    }

    pub fn decryption_failed() -> Self {
        Self::new(ErrorCode::DecryptionFailed, "Decryption failed - incorrect password or corrupted data")
    }

    pub fn hardware_signing_unimplemented() -> Self {
        Self::new(
            ErrorCode::HardwareSigningUnimplemented,
            "Signing with a hardware secure element is not available",
        )
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(ErrorCode::UnsupportedMethod, format!("Unsupported method: {}", method))
    }

    pub fn user_rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UserRejected, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, msg)
    }

    pub fn chain_disconnected(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChainDisconnected, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Disconnected, msg)
    }

    pub fn rpc(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            code: ErrorCode::Rpc { code },
            message: message.into(),
            details: None,
            data,
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAddress, msg)
    }

    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTransaction, msg)
    }

    pub fn signing_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SigningFailed, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, msg)
    }

    pub fn network_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, msg)
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, msg)
    }

    pub fn crypto_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::CryptoError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// Numeric code for errors that cross the boundary to an external application.
    pub fn provider_code(&self) -> i64 {
        match self.code {
            ErrorCode::Rpc { code } => code,
            ErrorCode::UserRejected | ErrorCode::Cancelled => codes::USER_REJECTED,
            ErrorCode::Unauthorized
            | ErrorCode::OwnershipMismatch
            | ErrorCode::PasswordRequired
            | ErrorCode::DecryptionFailed => codes::UNAUTHORIZED,
            ErrorCode::UnsupportedMethod
            | ErrorCode::UnsupportedVaultType
            | ErrorCode::HardwareSigningUnimplemented => codes::METHOD_NOT_FOUND,
            ErrorCode::Disconnected => codes::DISCONNECTED,
            ErrorCode::ChainDisconnected | ErrorCode::ProviderNotFound => codes::CHAIN_DISCONNECTED,
            ErrorCode::InvalidInput
            | ErrorCode::InvalidAddress
            | ErrorCode::InvalidTransaction
            | ErrorCode::AccountNotFound
            | ErrorCode::AddressNotFound
            | ErrorCode::VaultNotFound => codes::INVALID_PARAMS,
            ErrorCode::ParseError => codes::PARSE_ERROR,
            ErrorCode::SigningFailed
            | ErrorCode::NetworkError
            | ErrorCode::CryptoError
            | ErrorCode::Internal => codes::INTERNAL_ERROR,
        }
    }

    /// Whether retrying (after re-prompting or re-querying) can succeed.
    ///
    /// Structurally wrong input (ownership mismatch, unsupported vault,
    /// undecryptable data) never is.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::PasswordRequired
                | ErrorCode::UserRejected
                | ErrorCode::Cancelled
                | ErrorCode::NetworkError
                | ErrorCode::ChainDisconnected
                | ErrorCode::Disconnected
                | ErrorCode::Rpc { .. }
        )
    }
}

impl fmt::Display for CustodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for CustodyError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Lookup errors
    AccountNotFound,
    AddressNotFound,
    VaultNotFound,
    ProviderNotFound,

    // Signer resolution
    OwnershipMismatch,
    UnsupportedVaultType,
    HardwareSigningUnimplemented,
    SigningFailed,
    Cancelled,

    // Credential errors
    PasswordRequired,
    DecryptionFailed,
    CryptoError,

    // External request errors
    UnsupportedMethod,
    UserRejected,
    Unauthorized,
    ChainDisconnected,
    Disconnected,

    // Network errors
    Rpc { code: i64 },
    NetworkError,

    // Input errors
    InvalidInput,
    InvalidAddress,
    InvalidTransaction,
    ParseError,

    // Internal
    Internal,
}

/// Result type alias for custody operations
pub type CustodyResult<T> = Result<T, CustodyError>;

// Conversions from common error types

impl From<serde_json::Error> for CustodyError {
    fn from(e: serde_json::Error) -> Self {
        CustodyError::new(ErrorCode::ParseError, e.to_string())
    }
}

impl From<hex::FromHexError> for CustodyError {
    fn from(e: hex::FromHexError) -> Self {
        CustodyError::new(ErrorCode::InvalidInput, format!("Invalid hex: {}", e))
    }
}

impl From<std::io::Error> for CustodyError {
    fn from(e: std::io::Error) -> Self {
        CustodyError::new(ErrorCode::Internal, e.to_string())
    }
}

impl From<reqwest::Error> for CustodyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CustodyError::new(ErrorCode::NetworkError, "Request timed out")
        } else if e.is_connect() {
            CustodyError::new(ErrorCode::NetworkError, "Connection failed")
        } else {
            CustodyError::new(ErrorCode::NetworkError, e.to_string())
        }
    }
}

impl From<bitcoin::bip32::Error> for CustodyError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        CustodyError::new(ErrorCode::CryptoError, format!("BIP32 error: {}", e))
    }
}

impl From<secp256k1::Error> for CustodyError {
    fn from(e: secp256k1::Error) -> Self {
        CustodyError::new(ErrorCode::CryptoError, format!("Secp256k1 error: {}", e))
    }
}

impl From<bip39::Error> for CustodyError {
    fn from(e: bip39::Error) -> Self {
        CustodyError::new(ErrorCode::CryptoError, format!("BIP39 error: {}", e))
    }
}
