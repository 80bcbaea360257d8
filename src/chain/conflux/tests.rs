use super::*;
use crate::chain::rpc::MockTransport;
use crate::chain::account_bytes_for_private_key;
use crate::error::ErrorCode;
use crate::signing::SoftwareSigner;
use crate::utils::crypto::secret_to_public_key;

// web3.js documentation key; its Ethereum address is 0x2c7536E3605D9C16a7a3D7b1898e529396a65c23
const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const FROM: &str = "cfxtest:aashmr1dpbs32fzhytn5dcpsmmk3rkw6epkpzpt3v4";
const TO: &str = "cfxtest:aajg4wt2mbmbb44sp6szd783ry0jtad5bemzfdf83g";

fn key() -> [u8; 32] {
    let mut k = [0u8; 32];
    k.copy_from_slice(&hex::decode(KEY).unwrap());
    k
}

fn provider(mock: &Arc<MockTransport>) -> ConfluxProvider {
    ConfluxProvider::new(1, "Conflux Testnet", mock.clone())
}

fn signer() -> Signer {
    let bytes = account_bytes_for_private_key(NetworkType::Conflux, &key()).unwrap();
    Signer::Software(SoftwareSigner::new(key(), format!("0x{}", hex::encode(bytes))))
}

fn transfer() -> TransactionParams {
    TransactionParams {
        from: FROM.into(),
        to: Some(TO.into()),
        value: U256::exp10(18),
        ..Default::default()
    }
}

#[test]
fn test_derive_address() {
    let mock = Arc::new(MockTransport::new());
    let public_key = secret_to_public_key(&key()).unwrap();

    let derived = provider(&mock).derive_address(&public_key, &AddressOptions::default()).unwrap();
    assert_eq!(derived.value, FROM);
    assert_eq!(derived.hex, "0x1c7536e3605d9c16a7a3d7b1898e529396a65c23");

    let mainnet = provider(&mock)
        .derive_address(&public_key, &AddressOptions { chain_id: Some(1029), verbose: false })
        .unwrap();
    assert_eq!(mainnet.value, "cfx:aashmr1dpbs32fzhytn5dcpsmmk3rkw6epdhg6kxzu");
}

#[test]
fn test_validate_address_checks_network() {
    let mock = Arc::new(MockTransport::new());
    let p = provider(&mock);
    assert!(p.validate_address(FROM));
    assert!(!p.validate_address("cfx:aashmr1dpbs32fzhytn5dcpsmmk3rkw6epdhg6kxzu"));
    assert!(!p.validate_address("0x1c7536e3605d9c16a7a3d7b1898e529396a65c23"));
    assert!(!p.validate_address("cfxtest:aashmr1dpbs32fzhytn5dcpsmmk3rkw6epkpzpt3v5"));
}

#[tokio::test]
async fn test_build_fetches_nonce_and_epoch() {
    let mock = Arc::new(MockTransport::new());
    mock.respond("cfx_getNextNonce", json!("0x5"))
        .respond("cfx_epochNumber", json!("0xf4240"));

    let tx = provider(&mock).build_transaction(transfer()).await.unwrap();
    let UnsignedTransaction::Conflux(payload) = &tx else {
        panic!("expected conflux payload");
    };

    assert_eq!(payload.nonce, U256::from(5));
    assert_eq!(payload.epoch_height, 1_000_000);
    assert_eq!(payload.gas_limit, U256::from(21_000));
    assert_eq!(payload.storage_limit, U256::zero());
    assert!(payload.gas_price.is_none());
    assert_eq!(mock.calls_to("cfx_getNextNonce"), vec![json!([FROM])]);
}

#[tokio::test]
async fn test_build_respects_supplied_fields() {
    let mock = Arc::new(MockTransport::new());
    let params = TransactionParams {
        nonce: Some(9),
        epoch_height: Some(77),
        ..transfer()
    };

    let tx = provider(&mock).build_transaction(params).await.unwrap();
    assert_eq!(tx.nonce(), U256::from(9));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_build_token_transfer() {
    let mock = Arc::new(MockTransport::new());
    let token = "cfxtest:acc7uawf5ubtnmezvhu9dhc6sghea0403ywjz6wtpg";
    let params = TransactionParams {
        token: Some(token.into()),
        nonce: Some(0),
        epoch_height: Some(1),
        ..transfer()
    };

    let tx = provider(&mock).build_transaction(params).await.unwrap();
    let UnsignedTransaction::Conflux(payload) = tx else {
        panic!("expected conflux payload");
    };
    assert_eq!(payload.to.as_deref(), Some(token));
    assert!(payload.value.is_zero());
    assert_eq!(&payload.data[..4], &crate::chain::ERC20_TRANSFER_SELECTOR);
    assert_eq!(payload.gas_limit, U256::from(crate::chain::CONTRACT_GAS_LIMIT));
}

#[tokio::test]
async fn test_build_rejects_foreign_address() {
    let mock = Arc::new(MockTransport::new());
    let params = TransactionParams {
        to: Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into()),
        ..transfer()
    };
    let err = provider(&mock).build_transaction(params).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidAddress);
}

#[tokio::test]
async fn test_estimate_fee_with_collateral() {
    let mock = Arc::new(MockTransport::new());
    mock.respond(
        "cfx_estimateGasAndCollateral",
        json!({ "gasLimit": "0x5208", "gasUsed": "0x5208", "storageCollateralized": "0x40" }),
    )
    .respond("cfx_gasPrice", json!("0x3b9aca00"));

    let p = provider(&mock);
    let tx = p
        .build_transaction(TransactionParams { nonce: Some(0), epoch_height: Some(1), ..transfer() })
        .await
        .unwrap();
    let before = tx.clone();
    let fee = p.estimate_fee(&tx).await.unwrap();

    assert_eq!(tx, before);
    assert_eq!(fee.gas_limit, U256::from(21_000));
    assert_eq!(fee.gas_price, Some(U256::from(1_000_000_000u64)));
    assert_eq!(fee.storage_collateralized, Some(U256::from(64)));
    let expected = U256::from(21_000u64) * U256::from(1_000_000_000u64)
        + U256::from(64) * U256::from(transaction::DRIP_PER_STORAGE_BYTE);
    assert_eq!(fee.total, expected);
}

#[tokio::test]
async fn test_sign_and_broadcast() {
    let mock = Arc::new(MockTransport::new());
    let p = provider(&mock);
    let params = TransactionParams {
        nonce: Some(5),
        epoch_height: Some(100),
        gas_price: Some(U256::from(1)),
        ..transfer()
    };
    let tx = p.build_transaction(params).await.unwrap();
    let signed = p.sign_transaction(&tx, &signer(), &SignOptions::default()).await.unwrap();

    assert_eq!(signed.network_type, NetworkType::Conflux);
    assert_eq!(signed.hash, format!("0x{}", hex::encode(keccak256(&signed.raw))));

    mock.respond("cfx_sendRawTransaction", json!(signed.hash.clone()));
    let hash = p.broadcast_transaction(&signed).await.unwrap();
    assert_eq!(hash, signed.hash);
    assert_eq!(mock.calls_to("cfx_sendRawTransaction"), vec![json!([signed.raw_hex()])]);
}

#[tokio::test]
async fn test_broadcast_returns_node_hash() {
    let mock = Arc::new(MockTransport::new());
    let p = provider(&mock);
    let signed = SignedTransaction {
        network_type: NetworkType::Conflux,
        chain_id: 1,
        raw: vec![0xc0],
        hash: "0xaaaa".into(),
    };
    mock.respond("cfx_sendRawTransaction", json!("0xbbbb"));
    assert_eq!(p.broadcast_transaction(&signed).await.unwrap(), "0xbbbb");
}

#[tokio::test]
async fn test_sign_rejects_foreign_signer() {
    let mock = Arc::new(MockTransport::new());
    let p = provider(&mock);
    let tx = p
        .build_transaction(TransactionParams {
            nonce: Some(0),
            epoch_height: Some(1),
            gas_price: Some(U256::one()),
            ..transfer()
        })
        .await
        .unwrap();

    let other = Signer::Software(SoftwareSigner::new([0x33; 32], "0x1000000000000000000000000000000000000000"));
    let err = p.sign_transaction(&tx, &other, &SignOptions::default()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OwnershipMismatch);
}

#[tokio::test]
async fn test_sign_and_verify_message() {
    let mock = Arc::new(MockTransport::new());
    let p = provider(&mock);

    let sig = p.sign_message(b"hello conflux", &signer(), &SignOptions::default()).await.unwrap();
    assert!(sig.v <= 1);
    assert!(p.verify_message(b"hello conflux", &sig.signature, FROM).unwrap());
    assert!(!p.verify_message(b"hello conflux", &sig.signature, TO).unwrap());
    assert!(!p.verify_message(b"tampered", &sig.signature, FROM).unwrap());
}

#[tokio::test]
async fn test_typed_data_unsupported() {
    let mock = Arc::new(MockTransport::new());
    let err = provider(&mock)
        .sign_typed_data(&json!({}), &signer(), &SignOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedMethod);
}

#[tokio::test]
async fn test_status_and_balance() {
    let mock = Arc::new(MockTransport::new());
    mock.respond("cfx_getStatus", json!({ "chainId": "0x1", "networkId": "0x1", "epochNumber": "0x10" }))
        .respond("cfx_getBalance", json!("0xde0b6b3a7640000"));

    let p = provider(&mock);
    let status = p.get_status().await.unwrap();
    assert_eq!(status.chain_id, 1);
    assert_eq!(status.epoch_number, 16);
    assert_eq!(p.get_balance(FROM).await.unwrap(), U256::exp10(18));
}

#[tokio::test]
async fn test_status_rejects_out_of_range_quantities() {
    let mock = Arc::new(MockTransport::new());
    mock.respond(
        "cfx_getStatus",
        json!({ "chainId": "0x1", "networkId": "0x1", "epochNumber": "0x10000000000000000" }),
    );

    let err = provider(&mock).get_status().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ParseError);
}

#[tokio::test]
async fn test_estimate_rejects_overflowing_fees() {
    let max = format!("{:#x}", U256::MAX);
    let mock = Arc::new(MockTransport::new());
    let p = provider(&mock);
    let tx = p
        .build_transaction(TransactionParams { nonce: Some(0), epoch_height: Some(1), ..transfer() })
        .await
        .unwrap();

    // node-reported storage collateral
    mock
        .respond(
            "cfx_estimateGasAndCollateral",
            json!({ "gasLimit": "0x5208", "storageCollateralized": max }),
        )
        .respond("cfx_gasPrice", json!("0x1"));
    let err = p.estimate_fee(&tx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransaction);

    // caller-supplied gas price
    let tx = p
        .build_transaction(TransactionParams {
            nonce: Some(0),
            epoch_height: Some(1),
            gas_price: Some(U256::MAX),
            ..transfer()
        })
        .await
        .unwrap();
    mock.respond(
        "cfx_estimateGasAndCollateral",
        json!({ "gasLimit": "0x5208", "storageCollateralized": "0x0" }),
    );
    let err = p.estimate_fee(&tx).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidTransaction);
}
