use a2a_pay::{
    address::Address,
    api::{router, AppState},
    config::AppConfig,
    database::LedgerStore,
    ledger::SystemClock,
    logging::init_tracing,
    marketplace_ledger,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "a2a-node")]
#[command(about = "Ledger node hosting the service registry and escrow programs")]
struct Args {
    #[arg(short, long, default_value = "a2a.toml", env = "A2A_CONFIG")]
    config: String,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Genesis balance as ADDRESS=LAMPORTS, applied only to a fresh ledger.
    #[arg(long = "fund", value_parser = parse_fund)]
    fund: Vec<(Address, u64)>,
}

fn parse_fund(value: &str) -> std::result::Result<(Address, u64), String> {
    let (address, lamports) = value
        .split_once('=')
        .ok_or_else(|| "expected ADDRESS=LAMPORTS".to_string())?;
    let address = address.parse::<Address>().map_err(|e| e.to_string())?;
    let lamports = lamports.parse::<u64>().map_err(|e| e.to_string())?;
    Ok((address, lamports))
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if Path::new(&args.config).exists() {
        AppConfig::load_with_env_overrides(&args.config)?
    } else {
        let mut config = AppConfig::default();
        config.apply_env_overrides()?;
        config
    };
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args).context("failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!("Starting A2A node");

    let programs = config.programs.program_ids()?;
    let ledger = Arc::new(marketplace_ledger(
        config.ledger.clone(),
        programs,
        Arc::new(SystemClock),
    ));

    let store = match config.get_database_url() {
        Some(url) => {
            let store = LedgerStore::new(url, config.database.max_connections.unwrap_or(5))
                .await
                .with_context(|| format!("failed to open ledger database {}", url))?;
            Some(store)
        }
        None => None,
    };

    let restored = match &store {
        Some(store) => match store.load_snapshot().await? {
            Some(state) => {
                ledger.restore(state);
                true
            }
            None => false,
        },
        None => false,
    };

    if !restored {
        for (address, lamports) in &args.fund {
            ledger.fund(address, *lamports)?;
            info!(%address, lamports, "genesis balance");
        }
        if let Some(store) = &store {
            store.save_snapshot(&ledger.snapshot()).await?;
        }
    }

    info!(
        registry = %programs.registry,
        escrow = %programs.escrow,
        slot = ledger.current_slot(),
        persistent = store.is_some(),
        "ledger ready"
    );

    let app = router(AppState::new(ledger, store));

    let address = config.get_server_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("A2A node listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
