//! Bridge types: provider errors, one-shot responders and the normalized
//! event shape handed to the presentation layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::namespaces::ApprovedNamespaces;
use crate::chain::TransactionParams;
use crate::error::{codes, CustodyError};
use crate::types::{AppMetadata, ChainRef};

/// Error returned to an external application. `code` is always one of
/// the EIP-1193 / JSON-RPC codes in [`crate::error::codes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request")
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(codes::UNAUTHORIZED, message)
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Unsupported method: {}", method))
    }

    pub fn unsupported_chain(chain: &str) -> Self {
        Self::new(codes::CHAIN_DISCONNECTED, format!("Unsupported chain: {}", chain))
    }

    pub fn disconnected() -> Self {
        Self::new(codes::DISCONNECTED, "Session disconnected")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }
}

impl From<CustodyError> for ProviderRpcError {
    fn from(e: CustodyError) -> Self {
        Self {
            code: e.provider_code(),
            message: e.message,
            data: e.data,
        }
    }
}

pub type Resolution<T> = Result<T, ProviderRpcError>;

/// One-shot answer to an external request.
///
/// `approve` and `reject` take `self`, so an event resolves at most once.
/// A responder dropped without an answer resolves as user-rejected (4001).
pub struct Responder<T> {
    tx: Option<oneshot::Sender<Resolution<T>>>,
}

impl<T> Responder<T> {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Resolution<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn approve(mut self, value: T) {
        self.send(Ok(value));
    }

    pub fn reject(mut self, error: ProviderRpcError) {
        self.send(Err(error));
    }

    /// The request was torn down and nobody is waiting for an answer
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn send(&mut self, resolution: Resolution<T>) {
        if let Some(tx) = self.tx.take() {
            if tx.send(resolution).is_err() {
                crate::log_warn!("bridge", "Ignoring resolution for a closed request");
            }
        }
    }
}

impl<T> Drop for Responder<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(ProviderRpcError::user_rejected()));
        }
    }
}

impl<T> fmt::Debug for Responder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Who is asking, on which chain, with which method
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub topic: String,
    pub request_id: u64,
    pub metadata: AppMetadata,
    pub chain: ChainRef,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalContext {
    pub proposal_id: u64,
    pub metadata: AppMetadata,
    /// Chains the session would cover if approved
    pub chains: Vec<ChainRef>,
}

/// User's answer to a session proposal: CAIP-10 accounts to expose
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionApproval {
    pub accounts: Vec<String>,
}

/// Normalized inbound request. Every variant except `SessionDelete`
/// carries a responder that must be resolved (or dropped) exactly once.
#[derive(Debug)]
pub enum ExternalRequestEvent {
    SessionProposal {
        context: ProposalContext,
        namespaces: ApprovedNamespaces,
        responder: Responder<SessionApproval>,
    },
    SignMessage {
        context: RequestContext,
        address: String,
        message: Vec<u8>,
        /// Signature hex
        responder: Responder<String>,
    },
    SignTypedData {
        context: RequestContext,
        address: String,
        typed_data: Value,
        responder: Responder<String>,
    },
    SendTransaction {
        context: RequestContext,
        params: TransactionParams,
        /// Transaction hash
        responder: Responder<String>,
    },
    SessionDelete {
        topic: String,
        metadata: AppMetadata,
    },
}

impl ExternalRequestEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ExternalRequestEvent::SessionProposal { .. } => "sessionProposal",
            ExternalRequestEvent::SignMessage { .. } => "signMessage",
            ExternalRequestEvent::SignTypedData { .. } => "signTypedData",
            ExternalRequestEvent::SendTransaction { .. } => "sendTransaction",
            ExternalRequestEvent::SessionDelete { .. } => "sessionDelete",
        }
    }

    pub fn metadata(&self) -> &AppMetadata {
        match self {
            ExternalRequestEvent::SessionProposal { context, .. } => &context.metadata,
            ExternalRequestEvent::SignMessage { context, .. }
            | ExternalRequestEvent::SignTypedData { context, .. }
            | ExternalRequestEvent::SendTransaction { context, .. } => &context.metadata,
            ExternalRequestEvent::SessionDelete { metadata, .. } => metadata,
        }
    }

    pub fn chains(&self) -> Vec<ChainRef> {
        match self {
            ExternalRequestEvent::SessionProposal { context, .. } => context.chains.clone(),
            ExternalRequestEvent::SignMessage { context, .. }
            | ExternalRequestEvent::SignTypedData { context, .. }
            | ExternalRequestEvent::SendTransaction { context, .. } => vec![context.chain],
            ExternalRequestEvent::SessionDelete { .. } => Vec::new(),
        }
    }
}

/// Inbound message from the pairing/session transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    SessionProposal {
        id: u64,
        proposer: AppMetadata,
        required: super::namespaces::ProposalNamespaces,
        optional: super::namespaces::ProposalNamespaces,
    },
    SessionRequest {
        topic: String,
        id: u64,
        /// CAIP-2, e.g. `eip155:1`
        chain_id: String,
        method: String,
        params: Value,
    },
    SessionDelete {
        topic: String,
    },
}

/// Methods the bridge knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    PersonalSign,
    SignTypedData,
    SendTransaction,
}

impl RequestMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "personal_sign" => Some(RequestMethod::PersonalSign),
            "eth_signTypedData" | "eth_signTypedData_v4" => Some(RequestMethod::SignTypedData),
            "eth_sendTransaction" | "cfx_sendTransaction" => Some(RequestMethod::SendTransaction),
            _ => None,
        }
    }
}

/// Active session as seen by the wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: String,
    pub metadata: AppMetadata,
    pub namespaces: ApprovedNamespaces,
}

impl Session {
    pub fn allows_chain(&self, chain: &ChainRef) -> bool {
        self.namespaces
            .get(chain.network_type.namespace())
            .map_or(false, |ns| ns.chains.contains(chain))
    }

    pub fn allows_method(&self, chain: &ChainRef, method: &str) -> bool {
        self.namespaces
            .get(chain.network_type.namespace())
            .map_or(false, |ns| ns.methods.iter().any(|m| m == method))
    }

    /// `address` is one of the CAIP-10 accounts approved on `chain`
    pub fn has_account(&self, chain: &ChainRef, address: &str) -> bool {
        let prefix = format!("{}:", chain);
        self.namespaces
            .get(chain.network_type.namespace())
            .map_or(false, |ns| {
                ns.accounts.iter().any(|account| {
                    account
                        .strip_prefix(&prefix)
                        .map_or(false, |a| a.eq_ignore_ascii_case(address))
                })
            })
    }
}
