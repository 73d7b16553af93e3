use a2a_pay::{
    address::{service_address, Address},
    api::{router, AppState, BalanceResponse, ErrorBody, SlotResponse},
    config::LedgerConfig,
    database::LedgerStore,
    error::ProtocolError,
    instruction::{EscrowInstruction, Message, RegistryInstruction, Transaction},
    ledger::{AccountLookup, KeyedAccount, Ledger, Receipt, SystemClock},
    marketplace_ledger,
    registry::discovery_filters,
    Keypair, ProgramIds,
};
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{Request, StatusCode},
    Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_ledger() -> Arc<Ledger> {
    let config = LedgerConfig {
        faucet_limit: Some(1_000_000_000),
        ..LedgerConfig::default()
    };
    Arc::new(marketplace_ledger(config, ProgramIds::default(), Arc::new(SystemClock)))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

fn json<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

fn post_json<T: serde::Serialize>(uri: &str, value: &T) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(value).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn register_tx(ledger: &Ledger, owner: &Keypair, service_type: &str) -> Transaction {
    let registry = ProgramIds::default().registry;
    let (target, _) = service_address(&registry, &owner.identity(), service_type).unwrap();
    let message = Message::new(
        registry,
        target,
        ledger.current_slot(),
        &RegistryInstruction::RegisterService {
            service_type: service_type.to_string(),
            price: 1_000,
            endpoint: "http://agent.local".to_string(),
        },
    )
    .unwrap();
    Transaction::sign(owner, message).unwrap()
}

#[tokio::test]
async fn test_health_and_slot() {
    let app = router(AppState::new(test_ledger(), None));

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = json(&body);
    assert_eq!(health["status"], "healthy");

    let (status, body) = call(&app, get("/slot")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json::<SlotResponse>(&body).slot, 0);
}

#[tokio::test]
async fn test_airdrop_and_balance() {
    let app = router(AppState::new(test_ledger(), None));
    let wallet = Keypair::from_seed([1; 32]).identity();

    let request = serde_json::json!({ "address": wallet, "lamports": 25_000 });
    let (status, body) = call(&app, post_json("/airdrop", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json::<BalanceResponse>(&body).lamports, 25_000);

    let (status, body) = call(&app, get(&format!("/balances/{}", wallet))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json::<BalanceResponse>(&body).lamports, 25_000);

    let request = serde_json::json!({ "address": wallet, "lamports": 2_000_000_000u64 });
    let (status, body) = call(&app, post_json("/airdrop", &request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(matches!(
        json::<ErrorBody>(&body).error,
        Some(ProtocolError::FaucetLimitExceeded { .. })
    ));
}

#[tokio::test]
async fn test_submit_lookup_and_replay() {
    let ledger = test_ledger();
    let app = router(AppState::new(ledger.clone(), None));
    let owner = Keypair::from_seed([2; 32]);
    ledger.fund(&owner.identity(), 1_000_000_000).unwrap();

    let tx = register_tx(&ledger, &owner, "echo");
    let (status, body) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::OK);
    let receipt: Receipt = json(&body);
    assert_eq!(receipt.slot, 1);
    assert_eq!(receipt.address, tx.message.target);

    let (status, body) = call(&app, get(&format!("/accounts/{}", receipt.address))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(matches!(json::<AccountLookup>(&body), AccountLookup::Live(_)));

    let (status, body) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(matches!(
        json::<ErrorBody>(&body).error,
        Some(ProtocolError::DuplicateTransaction { .. })
    ));

    let (status, body) = call(&app, get("/accounts/not-an-address")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json::<ErrorBody>(&body).error.is_none());
}

#[tokio::test]
async fn test_program_accounts_route_applies_filters() {
    let ledger = test_ledger();
    let app = router(AppState::new(ledger.clone(), None));
    let owner = Keypair::from_seed([3; 32]);
    ledger.fund(&owner.identity(), 1_000_000_000).unwrap();
    ledger.submit(&register_tx(&ledger, &owner, "echo")).unwrap();
    ledger.submit(&register_tx(&ledger, &owner, "translate")).unwrap();

    let registry = ProgramIds::default().registry;
    let request = serde_json::json!({ "filters": discovery_filters(Some("echo")) });
    let uri = format!("/programs/{}/accounts", registry);
    let (status, body) = call(&app, post_json(&uri, &request)).await;
    assert_eq!(status, StatusCode::OK);
    let accounts: Vec<KeyedAccount> = json(&body);
    assert_eq!(accounts.len(), 1);
}

#[tokio::test]
async fn test_protocol_errors_map_to_statuses() {
    let ledger = test_ledger();
    let app = router(AppState::new(ledger.clone(), None));
    let client = Keypair::from_seed([4; 32]);
    let provider = Keypair::from_seed([5; 32]);
    ledger.fund(&client.identity(), 10_000).unwrap();

    let escrow = ProgramIds::default().escrow;
    let (target, _) = a2a_pay::address::escrow_address(
        &escrow,
        &client.identity(),
        &provider.identity(),
        "echo",
        1,
    )
    .unwrap();

    // Not enough for amount plus reserve.
    let create = Message::new(
        escrow,
        target,
        ledger.current_slot(),
        &EscrowInstruction::CreateEscrow {
            provider: provider.identity(),
            service_type: "echo".to_string(),
            amount: 500_000,
            nonce: 1,
        },
    )
    .unwrap();
    let tx = Transaction::sign(&client, create).unwrap();
    let (status, _) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    // Nothing there yet.
    let complete = Message::new(
        escrow,
        target,
        ledger.current_slot(),
        &EscrowInstruction::CompleteService {
            client: client.identity(),
            provider: provider.identity(),
            service_type: "echo".to_string(),
            nonce: 1,
        },
    )
    .unwrap();
    let tx = Transaction::sign(&provider, complete).unwrap();
    let (status, body) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(matches!(
        json::<ErrorBody>(&body).error,
        Some(ProtocolError::NotFound { .. })
    ));

    // Forged signer.
    let mut tx = tx;
    tx.signer = Address::new_from_array([7; 32]);
    let (status, _) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_commits_are_persisted() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("node.db").display());
    let store = LedgerStore::new(&url, 1).await.unwrap();

    let ledger = test_ledger();
    let app = router(AppState::new(ledger.clone(), Some(store.clone())));
    let owner = Keypair::from_seed([6; 32]);

    let request = serde_json::json!({ "address": owner.identity(), "lamports": 100_000_000 });
    let (status, _) = call(&app, post_json("/airdrop", &request)).await;
    assert_eq!(status, StatusCode::OK);

    let tx = register_tx(&ledger, &owner, "echo");
    let (status, _) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::OK);

    let saved = store.load_snapshot().await.unwrap().unwrap();
    assert_eq!(saved, ledger.snapshot());

    // A node restarted from the store sees the same state.
    let restarted = test_ledger();
    restarted.restore(saved);
    assert_eq!(restarted.balance(&owner.identity()), ledger.balance(&owner.identity()));
    assert_eq!(restarted.current_slot(), 1);
}

#[tokio::test]
async fn test_store_failure_does_not_fail_committed_transaction() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("node.db").display());
    let store = LedgerStore::new(&url, 1).await.unwrap();

    // Break the schema underneath the node.
    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query("DROP TABLE processed").execute(&pool).await.unwrap();
    pool.close().await;

    let ledger = test_ledger();
    let app = router(AppState::new(ledger.clone(), Some(store)));
    let owner = Keypair::from_seed([8; 32]);
    ledger.fund(&owner.identity(), 1_000_000_000).unwrap();

    let tx = register_tx(&ledger, &owner, "echo");
    let (status, body) = call(&app, post_json("/transactions", &tx)).await;
    assert_eq!(status, StatusCode::OK);
    let receipt: Receipt = json(&body);
    assert_eq!(receipt.slot, 1);
    assert!(matches!(ledger.lookup(&receipt.address), AccountLookup::Live(_)));

    let request = serde_json::json!({ "address": owner.identity(), "lamports": 1_000 });
    let (status, _) = call(&app, post_json("/airdrop", &request)).await;
    assert_eq!(status, StatusCode::OK);
}
