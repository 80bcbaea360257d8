//! Bridge module tests

use super::*;
use crate::error::codes;
use crate::types::NetworkType;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const TOPIC: &str = "topic-1";
const ACCOUNT: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Pair { uri: String, loading: bool },
    Approve { proposal: u64, namespaces: ApprovedNamespaces },
    Reject { proposal: u64, code: i64 },
    Respond { topic: String, id: u64, result: Result<Value, i64> },
    Disconnect { topic: String, code: i64 },
}

struct RecordingTransport {
    calls: UnboundedSender<Call>,
    loading: Mutex<Option<watch::Receiver<bool>>>,
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn pair(&self, uri: &str) -> CustodyResult<()> {
        let loading = self
            .loading
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |rx| *rx.borrow());
        let _ = self.calls.send(Call::Pair {
            uri: uri.to_string(),
            loading,
        });
        Ok(())
    }

    async fn approve_session(&self, proposal_id: u64, namespaces: &ApprovedNamespaces) -> CustodyResult<String> {
        let _ = self.calls.send(Call::Approve {
            proposal: proposal_id,
            namespaces: namespaces.clone(),
        });
        Ok(TOPIC.to_string())
    }

    async fn reject_session(&self, proposal_id: u64, error: &ProviderRpcError) -> CustodyResult<()> {
        let _ = self.calls.send(Call::Reject {
            proposal: proposal_id,
            code: error.code,
        });
        Ok(())
    }

    async fn respond(&self, topic: &str, request_id: u64, result: Result<Value, ProviderRpcError>) -> CustodyResult<()> {
        let _ = self.calls.send(Call::Respond {
            topic: topic.to_string(),
            id: request_id,
            result: result.map_err(|e| e.code),
        });
        Ok(())
    }

    async fn disconnect(&self, topic: &str, error: &ProviderRpcError) -> CustodyResult<()> {
        let _ = self.calls.send(Call::Disconnect {
            topic: topic.to_string(),
            code: error.code,
        });
        Ok(())
    }
}

struct Harness {
    bridge: ExternalRequestBridge,
    events: mpsc::Receiver<ExternalRequestEvent>,
    calls: UnboundedReceiver<Call>,
}

impl Harness {
    fn new() -> Self {
        let (tx, calls) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport {
            calls: tx,
            loading: Mutex::new(None),
        });
        let supported = SupportedNamespaces::new()
            .with_chain(ChainRef::new(NetworkType::Ethereum, 1))
            .with_chain(ChainRef::new(NetworkType::Conflux, 1029));
        let (bridge, events) = ExternalRequestBridge::new(transport.clone(), supported);
        *transport.loading.lock().unwrap() = Some(bridge.loading());
        Self { bridge, events, calls }
    }

    /// Harness with an approved `eip155:1` session granting `methods`
    async fn connected(methods: &[&str]) -> Self {
        let mut h = Self::new();
        h.bridge
            .handle(proposal(7, &["eip155:1"], methods))
            .await
            .unwrap();
        match h.next_event().await {
            ExternalRequestEvent::SessionProposal { responder, .. } => responder.approve(SessionApproval {
                accounts: vec![format!("eip155:1:{}", ACCOUNT)],
            }),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(h.next_call().await, Call::Approve { proposal: 7, .. }));
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.bridge.sessions().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session not stored");
        h
    }

    async fn next_event(&mut self) -> ExternalRequestEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn next_call(&mut self) -> Call {
        tokio::time::timeout(Duration::from_secs(2), self.calls.recv())
            .await
            .expect("timed out waiting for transport call")
            .expect("call channel closed")
    }

    async fn request(&self, id: u64, chain: &str, method: &str, params: Value) {
        self.bridge
            .handle(TransportEvent::SessionRequest {
                topic: TOPIC.to_string(),
                id,
                chain_id: chain.to_string(),
                method: method.to_string(),
                params,
            })
            .await
            .unwrap();
    }
}

fn proposal(id: u64, chains: &[&str], methods: &[&str]) -> TransportEvent {
    TransportEvent::SessionProposal {
        id,
        proposer: AppMetadata {
            name: "Swap App".to_string(),
            origin: "https://swap.example".to_string(),
            icons: vec!["https://swap.example/icon.png".to_string()],
            description: None,
        },
        required: ProposalNamespaces::from([(
            "eip155".to_string(),
            NamespaceRequest {
                chains: chains.iter().map(|s| s.to_string()).collect(),
                methods: methods.iter().map(|s| s.to_string()).collect(),
                events: vec!["chainChanged".to_string()],
            },
        )]),
        optional: ProposalNamespaces::new(),
    }
}

fn error_response(id: u64, code: i64) -> Call {
    Call::Respond {
        topic: TOPIC.to_string(),
        id,
        result: Err(code),
    }
}

#[tokio::test]
async fn test_proposal_approval_creates_session() {
    let h = Harness::connected(&["personal_sign"]).await;

    let sessions = h.bridge.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].topic, TOPIC);
    assert_eq!(sessions[0].metadata.name, "Swap App");
    assert_eq!(
        sessions[0].namespaces["eip155"].accounts,
        vec![format!("eip155:1:{}", ACCOUNT)]
    );
}

#[tokio::test]
async fn test_proposal_event_carries_metadata_and_chains() {
    let mut h = Harness::new();
    h.bridge
        .handle(proposal(1, &["eip155:1"], &["personal_sign"]))
        .await
        .unwrap();

    let event = h.next_event().await;
    assert_eq!(event.kind(), "sessionProposal");
    assert_eq!(event.metadata().origin, "https://swap.example");
    assert_eq!(event.metadata().icon(), Some("https://swap.example/icon.png"));
    assert_eq!(event.chains(), vec![ChainRef::new(NetworkType::Ethereum, 1)]);
}

#[tokio::test]
async fn test_unsupported_required_chain_rejected_without_event() {
    let mut h = Harness::new();
    h.bridge
        .handle(proposal(3, &["eip155:56"], &["personal_sign"]))
        .await
        .unwrap();

    assert_eq!(
        h.next_call().await,
        Call::Reject {
            proposal: 3,
            code: codes::CHAIN_DISCONNECTED
        }
    );
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_user_rejects_proposal() {
    let mut h = Harness::new();
    h.bridge
        .handle(proposal(4, &["eip155:1"], &["personal_sign"]))
        .await
        .unwrap();

    match h.next_event().await {
        ExternalRequestEvent::SessionProposal { responder, .. } => {
            responder.reject(ProviderRpcError::user_rejected())
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        h.next_call().await,
        Call::Reject {
            proposal: 4,
            code: codes::USER_REJECTED
        }
    );
    assert!(h.bridge.sessions().is_empty());
}

#[tokio::test]
async fn test_personal_sign_round_trip() {
    let mut h = Harness::connected(&["personal_sign"]).await;
    h.request(11, "eip155:1", "personal_sign", json!(["0x68656c6c6f", ACCOUNT]))
        .await;

    match h.next_event().await {
        ExternalRequestEvent::SignMessage {
            context,
            address,
            message,
            responder,
        } => {
            assert_eq!(context.topic, TOPIC);
            assert_eq!(context.request_id, 11);
            assert_eq!(context.chain, ChainRef::new(NetworkType::Ethereum, 1));
            assert_eq!(address, ACCOUNT);
            assert_eq!(message, b"hello");
            responder.approve("0xsig".to_string());
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(
        h.next_call().await,
        Call::Respond {
            topic: TOPIC.to_string(),
            id: 11,
            result: Ok(json!("0xsig")),
        }
    );
}

#[test]
fn test_plain_text_message_is_utf8() {
    assert_eq!(message_bytes("hello"), b"hello");
    assert_eq!(message_bytes("0xzz"), b"0xzz");
    assert_eq!(message_bytes("0x6869"), b"hi");
}

#[tokio::test]
async fn test_typed_data_string_is_parsed() {
    let mut h = Harness::connected(&["eth_signTypedData_v4"]).await;
    let typed = json!({ "primaryType": "Mail", "types": {}, "domain": {}, "message": {} });
    h.request(
        12,
        "eip155:1",
        "eth_signTypedData_v4",
        json!([ACCOUNT.to_lowercase(), typed.to_string()]),
    )
    .await;

    match h.next_event().await {
        ExternalRequestEvent::SignTypedData { typed_data, .. } => {
            assert_eq!(typed_data["primaryType"], "Mail");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_send_transaction_accepts_dapp_shape() {
    let mut h = Harness::connected(&["eth_sendTransaction"]).await;
    h.request(
        13,
        "eip155:1",
        "eth_sendTransaction",
        json!([{ "from": ACCOUNT, "to": ACCOUNT, "value": "0x1", "gas": "0x5208" }]),
    )
    .await;

    match h.next_event().await {
        ExternalRequestEvent::SendTransaction { params, responder, .. } => {
            assert_eq!(params.gas_limit, Some(21_000u64.into()));
            responder.approve("0xhash".to_string());
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(h.next_call().await, Call::Respond { id: 13, result: Ok(_), .. }));
}

#[tokio::test]
async fn test_request_rejections_follow_check_order() {
    let mut h = Harness::connected(&["personal_sign"]).await;

    // unknown topic
    h.bridge
        .handle(TransportEvent::SessionRequest {
            topic: "nope".to_string(),
            id: 1,
            chain_id: "eip155:1".to_string(),
            method: "personal_sign".to_string(),
            params: json!(["0x00", ACCOUNT]),
        })
        .await
        .unwrap();
    assert!(matches!(
        h.next_call().await,
        Call::Respond { id: 1, result: Err(codes::DISCONNECTED), .. }
    ));

    h.request(2, "eip155:1", "eth_sign", json!([])).await;
    assert_eq!(h.next_call().await, error_response(2, codes::METHOD_NOT_FOUND));

    h.request(3, "eip155:5", "personal_sign", json!(["0x00", ACCOUNT])).await;
    assert_eq!(h.next_call().await, error_response(3, codes::CHAIN_DISCONNECTED));

    h.request(4, "eip155:1", "eth_sendTransaction", json!([{ "from": ACCOUNT }])).await;
    assert_eq!(h.next_call().await, error_response(4, codes::UNAUTHORIZED));

    h.request(5, "eip155:1", "personal_sign", json!([42])).await;
    assert_eq!(h.next_call().await, error_response(5, codes::INVALID_PARAMS));

    h.request(
        6,
        "eip155:1",
        "personal_sign",
        json!(["0x00", "0x0000000000000000000000000000000000000001"]),
    )
    .await;
    assert_eq!(h.next_call().await, error_response(6, codes::UNAUTHORIZED));

    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_dropped_responder_rejects_as_user() {
    let mut h = Harness::connected(&["personal_sign"]).await;
    h.request(20, "eip155:1", "personal_sign", json!(["0x00", ACCOUNT])).await;

    let event = h.next_event().await;
    drop(event);

    assert_eq!(h.next_call().await, error_response(20, codes::USER_REJECTED));
}

#[tokio::test]
async fn test_no_listener_rejects_request() {
    let mut h = Harness::connected(&["personal_sign"]).await;
    h.events.close();
    h.request(21, "eip155:1", "personal_sign", json!(["0x00", ACCOUNT])).await;

    assert_eq!(h.next_call().await, error_response(21, codes::USER_REJECTED));
}

#[tokio::test]
async fn test_remote_delete_closes_pending_requests_first() {
    let mut h = Harness::connected(&["personal_sign"]).await;
    h.request(30, "eip155:1", "personal_sign", json!(["0x00", ACCOUNT])).await;
    h.request(31, "eip155:1", "personal_sign", json!(["0x01", ACCOUNT])).await;
    let first = h.next_event().await;
    let second = h.next_event().await;

    h.bridge
        .handle(TransportEvent::SessionDelete {
            topic: TOPIC.to_string(),
        })
        .await
        .unwrap();

    assert_eq!(h.next_call().await, error_response(30, codes::DISCONNECTED));
    assert_eq!(h.next_call().await, error_response(31, codes::DISCONNECTED));
    match h.next_event().await {
        ExternalRequestEvent::SessionDelete { topic, metadata } => {
            assert_eq!(topic, TOPIC);
            assert_eq!(metadata.name, "Swap App");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.bridge.sessions().is_empty());

    // late answers never reach the transport
    if let ExternalRequestEvent::SignMessage { responder, .. } = first {
        responder.approve("0xlate".to_string());
    }
    drop(second);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.calls.try_recv().is_err());
}

#[tokio::test]
async fn test_local_disconnect() {
    let mut h = Harness::connected(&["personal_sign"]).await;
    h.request(40, "eip155:1", "personal_sign", json!(["0x00", ACCOUNT])).await;
    let _pending = h.next_event().await;

    h.bridge.disconnect(TOPIC).await.unwrap();

    assert_eq!(h.next_call().await, error_response(40, codes::DISCONNECTED));
    assert_eq!(
        h.next_call().await,
        Call::Disconnect {
            topic: TOPIC.to_string(),
            code: codes::DISCONNECTED
        }
    );
    assert_eq!(h.next_event().await.kind(), "sessionDelete");

    let err = h.bridge.disconnect(TOPIC).await.unwrap_err();
    assert_eq!(err.provider_code(), codes::DISCONNECTED);
}

#[tokio::test]
async fn test_pairing_toggles_loading() {
    let mut h = Harness::new();
    let loading = h.bridge.loading();
    assert!(!*loading.borrow());

    h.bridge.pair("wc:abc@2?relay-protocol=irn&symKey=00").await.unwrap();
    assert_eq!(
        h.next_call().await,
        Call::Pair {
            uri: "wc:abc@2?relay-protocol=irn&symKey=00".to_string(),
            loading: true
        }
    );
    assert!(!*loading.borrow());

    assert!(h.bridge.pair("https://not-a-pairing").await.is_err());
    assert!(h.calls.try_recv().is_err());
}

#[test]
fn test_provider_error_from_custody_error() {
    let err: ProviderRpcError = CustodyError::ownership_mismatch("not yours").into();
    assert_eq!(err.code, codes::UNAUTHORIZED);

    let rpc: ProviderRpcError = CustodyError::rpc(-32000, "nonce too low", Some(json!("0x1"))).into();
    assert_eq!(rpc.code, -32000);
    assert_eq!(rpc.data, Some(json!("0x1")));
    assert_eq!(rpc.to_string(), "nonce too low (-32000)");
}
