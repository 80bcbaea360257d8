//! External Request Bridge
//!
//! Adapts a pairing/session transport (URI pairing, topic sessions) to the
//! wallet. Inbound proposals and requests are normalized into
//! [`ExternalRequestEvent`]s with one-shot responders; the answer flows back
//! to the transport exactly once.
//!
//! Request checks run in a fixed order: unknown topic (4900), unknown method
//! (-32601), chain outside the session (4901), method or account not granted
//! (4100), malformed params (-32602).

pub mod namespaces;
pub mod types;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

use crate::chain::TransactionParams;
use crate::error::{CustodyError, CustodyResult};
use crate::types::{AppMetadata, ChainRef};
use crate::utils;
use crate::{log_debug, log_info, log_warn};

pub use namespaces::{
    intersect, with_accounts, ApprovedNamespace, ApprovedNamespaces, NamespaceRequest, ProposalNamespaces,
    SupportedNamespaces,
};
pub use types::{
    ExternalRequestEvent, ProposalContext, ProviderRpcError, RequestContext, RequestMethod, Resolution, Responder,
    Session, SessionApproval, TransportEvent,
};

const EVENT_BUFFER: usize = 32;

/// Pairing/session layer the bridge sits on
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn pair(&self, uri: &str) -> CustodyResult<()>;

    /// Returns the new session topic
    async fn approve_session(&self, proposal_id: u64, namespaces: &ApprovedNamespaces) -> CustodyResult<String>;

    async fn reject_session(&self, proposal_id: u64, error: &ProviderRpcError) -> CustodyResult<()>;

    async fn respond(&self, topic: &str, request_id: u64, result: Result<Value, ProviderRpcError>) -> CustodyResult<()>;

    async fn disconnect(&self, topic: &str, error: &ProviderRpcError) -> CustodyResult<()>;
}

#[derive(Default)]
struct BridgeState {
    sessions: HashMap<String, Session>,
    /// topic -> request id -> waiter task
    pending: HashMap<String, HashMap<u64, Option<AbortHandle>>>,
}

struct Inner {
    transport: Arc<dyn SessionTransport>,
    supported: SupportedNamespaces,
    events: mpsc::Sender<ExternalRequestEvent>,
    loading: watch::Sender<bool>,
    state: Mutex<BridgeState>,
}

/// Routes transport traffic to the wallet and answers back.
///
/// Cheap to clone; all clones share the same sessions.
#[derive(Clone)]
pub struct ExternalRequestBridge {
    inner: Arc<Inner>,
}

/// A validated request waiting for the user
enum Routed {
    SignMessage { address: String, message: Vec<u8> },
    SignTypedData { address: String, typed_data: Value },
    SendTransaction { params: TransactionParams },
}

impl ExternalRequestBridge {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        supported: SupportedNamespaces,
    ) -> (Self, mpsc::Receiver<ExternalRequestEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let (loading, _) = watch::channel(false);
        let bridge = Self {
            inner: Arc::new(Inner {
                transport,
                supported,
                events,
                loading,
                state: Mutex::new(BridgeState::default()),
            }),
        };
        (bridge, receiver)
    }

    /// `true` while a pairing is in flight
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    pub fn supported(&self) -> &SupportedNamespaces {
        &self.inner.supported
    }

    /// Active sessions ordered by topic
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.state().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.topic.cmp(&b.topic));
        sessions
    }

    pub async fn pair(&self, uri: &str) -> CustodyResult<()> {
        if !uri.starts_with("wc:") {
            return Err(CustodyError::invalid_input("Invalid pairing URI"));
        }
        self.inner.loading.send_replace(true);
        let result = self.inner.transport.pair(uri).await;
        self.inner.loading.send_replace(false);
        if let Err(ref e) = result {
            log_warn!("bridge", "Pairing failed", error = e);
        }
        result
    }

    pub async fn handle(&self, event: TransportEvent) -> CustodyResult<()> {
        match event {
            TransportEvent::SessionProposal {
                id,
                proposer,
                required,
                optional,
            } => self.on_proposal(id, proposer, &required, &optional).await,
            TransportEvent::SessionRequest {
                topic,
                id,
                chain_id,
                method,
                params,
            } => self.on_request(topic, id, &chain_id, method, params).await,
            TransportEvent::SessionDelete { topic } => {
                self.teardown(&topic, false).await;
                Ok(())
            }
        }
    }

    /// Local disconnect: outstanding requests get 4900, then the transport
    /// is told to close the session.
    pub async fn disconnect(&self, topic: &str) -> CustodyResult<()> {
        if !self.state().sessions.contains_key(topic) {
            return Err(CustodyError::disconnected(format!("Unknown session {}", topic)));
        }
        self.teardown(topic, true).await;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn emit(&self, event: ExternalRequestEvent) {
        let kind = event.kind();
        // A failed send drops the event, and with it the responder (4001)
        if self.inner.events.send(event).await.is_err() {
            log_warn!("bridge", "No listener for external requests", kind = kind);
        }
    }

    async fn on_proposal(
        &self,
        id: u64,
        proposer: AppMetadata,
        required: &ProposalNamespaces,
        optional: &ProposalNamespaces,
    ) -> CustodyResult<()> {
        self.inner.loading.send_replace(false);

        let approved = match intersect(required, optional, &self.inner.supported) {
            Ok(approved) => approved,
            Err(err) => {
                log_info!("bridge", "Rejecting proposal", proposal = id, code = err.code);
                return self.inner.transport.reject_session(id, &err).await;
            }
        };

        let context = ProposalContext {
            proposal_id: id,
            metadata: proposer,
            chains: approved.values().flat_map(|ns| ns.chains.iter().copied()).collect(),
        };
        let (responder, rx) = Responder::channel();

        let bridge = self.clone();
        let metadata = context.metadata.clone();
        let offered = approved.clone();
        tokio::spawn(async move {
            bridge.settle_proposal(id, metadata, offered, rx).await;
        });

        self.emit(ExternalRequestEvent::SessionProposal {
            context,
            namespaces: approved,
            responder,
        })
        .await;
        Ok(())
    }

    async fn settle_proposal(
        &self,
        id: u64,
        metadata: AppMetadata,
        offered: ApprovedNamespaces,
        rx: oneshot::Receiver<Resolution<SessionApproval>>,
    ) {
        let resolution = rx.await.unwrap_or_else(|_| Err(ProviderRpcError::user_rejected()));
        match resolution {
            Ok(approval) => {
                let namespaces = with_accounts(&offered, &approval.accounts);
                match self.inner.transport.approve_session(id, &namespaces).await {
                    Ok(topic) => {
                        log_info!("bridge", "Session approved", topic = topic, app = metadata.name);
                        self.state().sessions.insert(
                            topic.clone(),
                            Session {
                                topic,
                                metadata,
                                namespaces,
                            },
                        );
                    }
                    Err(e) => log_warn!("bridge", "Session approval failed", proposal = id, error = e),
                }
            }
            Err(err) => {
                if let Err(e) = self.inner.transport.reject_session(id, &err).await {
                    log_warn!("bridge", "Session rejection failed", proposal = id, error = e);
                }
            }
        }
    }

    async fn on_request(
        &self,
        topic: String,
        id: u64,
        chain_id: &str,
        method: String,
        params: Value,
    ) -> CustodyResult<()> {
        let routed = {
            let mut state = self.state();
            match route(&state, &topic, chain_id, &method, &params) {
                Ok((session, chain, routed)) => {
                    state.pending.entry(topic.clone()).or_default().insert(id, None);
                    Ok((session.metadata, chain, routed))
                }
                Err(err) => Err(err),
            }
        };

        let (metadata, chain, routed) = match routed {
            Ok(r) => r,
            Err(err) => {
                log_debug!("bridge", "Rejecting request", topic = topic, method = method, code = err.code);
                return self.inner.transport.respond(&topic, id, Err(err)).await;
            }
        };

        let context = RequestContext {
            topic: topic.clone(),
            request_id: id,
            metadata,
            chain,
            method,
        };
        let (responder, rx) = Responder::channel();

        let bridge = self.clone();
        let waiter_topic = topic.clone();
        let handle = tokio::spawn(async move {
            bridge.settle_request(waiter_topic, id, rx).await;
        });
        if let Some(slot) = self.state().pending.get_mut(&topic).and_then(|p| p.get_mut(&id)) {
            *slot = Some(handle.abort_handle());
        }

        let event = match routed {
            Routed::SignMessage { address, message } => ExternalRequestEvent::SignMessage {
                context,
                address,
                message,
                responder,
            },
            Routed::SignTypedData { address, typed_data } => ExternalRequestEvent::SignTypedData {
                context,
                address,
                typed_data,
                responder,
            },
            Routed::SendTransaction { params } => ExternalRequestEvent::SendTransaction {
                context,
                params,
                responder,
            },
        };
        self.emit(event).await;
        Ok(())
    }

    async fn settle_request(&self, topic: String, id: u64, rx: oneshot::Receiver<Resolution<String>>) {
        let resolution = rx.await.unwrap_or_else(|_| Err(ProviderRpcError::user_rejected()));

        // Whoever removes the entry owns the answer
        let claimed = {
            let mut state = self.state();
            let claimed = state
                .pending
                .get_mut(&topic)
                .map_or(false, |p| p.remove(&id).is_some());
            if state.pending.get(&topic).map_or(false, |p| p.is_empty()) {
                state.pending.remove(&topic);
            }
            claimed
        };
        if !claimed {
            log_warn!("bridge", "Resolution after session teardown", topic = topic, request = id);
            return;
        }

        let result = resolution.map(Value::String);
        if let Err(e) = self.inner.transport.respond(&topic, id, result).await {
            log_warn!("bridge", "Failed to deliver response", topic = topic, request = id, error = e);
        }
    }

    async fn teardown(&self, topic: &str, local: bool) {
        let (session, pending) = {
            let mut state = self.state();
            let pending = state.pending.remove(topic).unwrap_or_default();
            (state.sessions.remove(topic), pending)
        };

        let mut ids: Vec<u64> = pending.keys().copied().collect();
        ids.sort_unstable();
        for (_, handle) in pending {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        for id in ids {
            if let Err(e) = self
                .inner
                .transport
                .respond(topic, id, Err(ProviderRpcError::disconnected()))
                .await
            {
                log_warn!("bridge", "Failed to close request", topic = topic, request = id, error = e);
            }
        }

        let Some(session) = session else {
            log_debug!("bridge", "Delete for unknown session", topic = topic);
            return;
        };

        if local {
            if let Err(e) = self
                .inner
                .transport
                .disconnect(topic, &ProviderRpcError::disconnected())
                .await
            {
                log_warn!("bridge", "Transport disconnect failed", topic = topic, error = e);
            }
        }

        log_info!("bridge", "Session closed", topic = topic, app = session.metadata.name);
        self.emit(ExternalRequestEvent::SessionDelete {
            topic: session.topic,
            metadata: session.metadata,
        })
        .await;
    }
}

fn route(
    state: &BridgeState,
    topic: &str,
    chain_id: &str,
    method: &str,
    params: &Value,
) -> Result<(Session, ChainRef, Routed), ProviderRpcError> {
    let session = state
        .sessions
        .get(topic)
        .ok_or_else(ProviderRpcError::disconnected)?;
    let kind = RequestMethod::parse(method).ok_or_else(|| ProviderRpcError::unsupported_method(method))?;
    let chain = ChainRef::parse(chain_id)
        .ok()
        .filter(|c| session.allows_chain(c))
        .ok_or_else(|| ProviderRpcError::unsupported_chain(chain_id))?;
    if !session.allows_method(&chain, method) {
        return Err(ProviderRpcError::unauthorized(format!("Method {} not granted", method)));
    }

    let routed = match kind {
        RequestMethod::PersonalSign => {
            let message = string_param(params, 0)?;
            let address = string_param(params, 1)?;
            Routed::SignMessage {
                address,
                message: message_bytes(&message),
            }
        }
        RequestMethod::SignTypedData => {
            let address = string_param(params, 0)?;
            let typed_data = match param(params, 1)? {
                Value::String(s) => serde_json::from_str(s)
                    .map_err(|e| ProviderRpcError::invalid_params(format!("Invalid typed data: {}", e)))?,
                v @ Value::Object(_) => v.clone(),
                _ => return Err(ProviderRpcError::invalid_params("Typed data must be an object")),
            };
            Routed::SignTypedData { address, typed_data }
        }
        RequestMethod::SendTransaction => {
            let params: TransactionParams = serde_json::from_value(param(params, 0)?.clone())
                .map_err(|e| ProviderRpcError::invalid_params(format!("Invalid transaction: {}", e)))?;
            if params.from.is_empty() {
                return Err(ProviderRpcError::invalid_params("Transaction is missing `from`"));
            }
            Routed::SendTransaction { params }
        }
    };

    let address = match &routed {
        Routed::SignMessage { address, .. } | Routed::SignTypedData { address, .. } => address.as_str(),
        Routed::SendTransaction { params } => params.from.as_str(),
    };
    if !session.has_account(&chain, address) {
        return Err(ProviderRpcError::unauthorized(format!(
            "Account {} not granted on {}",
            address, chain
        )));
    }

    Ok((session.clone(), chain, routed))
}

fn param(params: &Value, index: usize) -> Result<&Value, ProviderRpcError> {
    params
        .as_array()
        .and_then(|a| a.get(index))
        .ok_or_else(|| ProviderRpcError::invalid_params(format!("Missing parameter {}", index)))
}

fn string_param(params: &Value, index: usize) -> Result<String, ProviderRpcError> {
    param(params, index)?
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ProviderRpcError::invalid_params(format!("Parameter {} must be a string", index)))
}

/// `0x` hex is decoded; anything else is taken as UTF-8 text
fn message_bytes(message: &str) -> Vec<u8> {
    if message.starts_with("0x") {
        if let Ok(bytes) = utils::decode_hex_data(message) {
            return bytes;
        }
    }
    message.as_bytes().to_vec()
}
