use a2a_pay::{
    api::{router, AppState},
    config::LedgerConfig,
    connection::HttpConnection,
    error::{Absence, ProtocolError, Result},
    ledger::{Ledger, SystemClock},
    marketplace_ledger, EscrowStatus, Keypair, MarketClient, MarketError, ProgramIds,
};
use std::sync::Arc;
use tokio::net::TcpListener;

const START: u64 = 1_000_000_000;
const FEE: u64 = 5_000;

/// Serve a fresh node on an ephemeral port and return its base URL.
async fn spawn_node() -> (Arc<Ledger>, String) {
    let config = LedgerConfig {
        faucet_limit: Some(START),
        ..LedgerConfig::default()
    };
    let ledger = Arc::new(marketplace_ledger(
        config,
        ProgramIds::default(),
        Arc::new(SystemClock),
    ));
    let app = router(AppState::new(ledger.clone(), None));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (ledger, format!("http://{}", addr))
}

async fn remote_participant(url: &str, seed: u8) -> MarketClient<HttpConnection> {
    let client = MarketClient::new(
        HttpConnection::new(url).unwrap(),
        Keypair::from_seed([seed; 32]),
        ProgramIds::default(),
    );
    client.airdrop(START).await.unwrap();
    client
}

fn protocol_error(err: MarketError) -> ProtocolError {
    match err {
        MarketError::Protocol(err) => err,
        other => panic!("expected a protocol error, got {other}"),
    }
}

#[tokio::test]
async fn test_rejections_arrive_typed_over_http() -> Result<()> {
    let (_ledger, url) = spawn_node().await;
    let client = remote_participant(&url, 1).await;
    let provider = remote_participant(&url, 2).await;
    let c = client.identity();
    let p = provider.identity();

    let err = client.get_escrow(&c, &p, "echo", 1).await.unwrap_err();
    assert!(matches!(
        protocol_error(err),
        ProtocolError::NotFound {
            reason: Absence::NeverCreated,
            ..
        }
    ));

    client.create_escrow(&p, "echo", 100_000, 1).await?;

    let err = client.complete_service(&c, &p, "echo", 1).await.unwrap_err();
    assert_eq!(
        protocol_error(err),
        ProtocolError::Unauthorized {
            expected: p,
            actual: c,
        }
    );

    let err = client.release_payment(&c, &p, "echo", 1).await.unwrap_err();
    assert_eq!(
        protocol_error(err),
        ProtocolError::InvalidState {
            expected: EscrowStatus::Delivered,
            actual: EscrowStatus::Created,
        }
    );

    let err = provider
        .register_service("echo", 0, "http://provider")
        .await
        .unwrap_err();
    assert_eq!(protocol_error(err), ProtocolError::InvalidPrice);
    Ok(())
}

#[tokio::test]
async fn test_escrow_round_trip_over_http() -> Result<()> {
    let (ledger, url) = spawn_node().await;
    let client = remote_participant(&url, 3).await;
    let provider = remote_participant(&url, 4).await;
    let c = client.identity();
    let p = provider.identity();

    provider.register_service("echo", 250_000, "http://provider/echo").await?;
    let listed = client.discover_services(Some("echo")).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner, p);

    let receipt = client.create_escrow(&p, "echo", listed[0].price, 9).await?;
    assert_eq!(receipt.account.unwrap().status, EscrowStatus::Created);

    provider.complete_service(&c, &p, "echo", 9).await?;
    assert_eq!(
        client.get_escrow(&c, &p, "echo", 9).await?.status,
        EscrowStatus::Delivered
    );

    let provider_before = provider.balance(&p).await?;
    let receipt = client.release_payment(&c, &p, "echo", 9).await?;
    assert!(receipt.account.is_none());
    assert_eq!(receipt.slot, ledger.current_slot());
    assert_eq!(provider.balance(&p).await?, provider_before + 250_000);

    let err = client.get_escrow(&c, &p, "echo", 9).await.unwrap_err();
    assert!(matches!(
        protocol_error(err),
        ProtocolError::NotFound {
            reason: Absence::Closed,
            ..
        }
    ));
    assert_eq!(client.balance(&c).await?, START - 250_000 - 2 * FEE);
    Ok(())
}
