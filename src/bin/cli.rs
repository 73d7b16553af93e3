use a2a_pay::{
    address::Identity,
    client::random_nonce,
    config::AppConfig,
    connection::HttpConnection,
    wallet::Keypair,
    MarketClient,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "a2a-pay")]
#[command(about = "Register services and pay for them through escrow")]
struct Cli {
    #[arg(short, long, default_value = "a2a.toml", env = "A2A_CONFIG")]
    config: String,

    /// Node URL, overriding the configuration.
    #[arg(short, long)]
    url: Option<String>,

    /// Keypair file, overriding the configuration.
    #[arg(short, long)]
    keypair: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new keypair file
    Keygen {
        #[arg(long)]
        force: bool,
    },
    /// Publish a service under this identity
    Register {
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        price: u64,
        #[arg(short, long)]
        endpoint: String,
    },
    /// Change the price or endpoint of one of this identity's services
    Update {
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        price: Option<u64>,
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Take one of this identity's services out of discovery
    Deactivate {
        #[arg(short, long)]
        service_type: String,
    },
    /// List active services
    Discover {
        #[arg(short, long)]
        service_type: Option<String>,
    },
    /// Show one service entry
    Service {
        #[arg(short, long)]
        owner: Identity,
        #[arg(short, long)]
        service_type: String,
    },
    /// Open an escrow paying a provider
    Pay {
        #[arg(short, long)]
        provider: Identity,
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        amount: u64,
        /// Random when omitted.
        #[arg(short, long)]
        nonce: Option<u64>,
    },
    /// Mark an escrow delivered (provider)
    Complete {
        #[arg(short, long)]
        client: Identity,
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        nonce: u64,
    },
    /// Pay the provider and close the escrow (client)
    Release {
        #[arg(short, long)]
        provider: Identity,
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        nonce: u64,
    },
    /// Refund an undelivered escrow and close it (client)
    Dispute {
        #[arg(short, long)]
        provider: Identity,
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        nonce: u64,
    },
    /// Show an escrow
    Status {
        #[arg(short, long)]
        client: Identity,
        #[arg(short, long)]
        provider: Identity,
        #[arg(short, long)]
        service_type: String,
        #[arg(short, long)]
        nonce: u64,
    },
    /// Show a balance, this identity's by default
    Balance { address: Option<Identity> },
    /// Request lamports from the node faucet
    Airdrop { lamports: u64 },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn keygen(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }
    let keypair = Keypair::generate();
    keypair.write_to_file(path)?;
    println!("Wrote keypair to {}", path.display());
    println!("Identity: {}", keypair.identity());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if Path::new(&cli.config).exists() {
        AppConfig::load_with_env_overrides(&cli.config)?
    } else {
        let mut config = AppConfig::default();
        config.apply_env_overrides()?;
        config
    };
    if let Some(url) = cli.url {
        config.client.node_url = url;
    }
    if let Some(keypair) = cli.keypair {
        config.client.keypair_path = keypair;
    }

    if let Command::Keygen { force } = cli.command {
        return keygen(&config.client.keypair_path, force);
    }

    let keypair = Keypair::read_from_file(&config.client.keypair_path).with_context(|| {
        format!(
            "failed to read keypair {}, run `a2a-pay keygen` first",
            config.client.keypair_path.display()
        )
    })?;
    let connection = HttpConnection::new(config.client.node_url.clone())?;
    let client = MarketClient::new(connection, keypair, config.programs.program_ids()?);
    let me = client.identity();

    match cli.command {
        Command::Keygen { .. } => {}
        Command::Register {
            service_type,
            price,
            endpoint,
        } => print_json(&client.register_service(&service_type, price, &endpoint).await?)?,
        Command::Update {
            service_type,
            price,
            endpoint,
        } => print_json(
            &client
                .update_service(&me, &service_type, price, endpoint.as_deref())
                .await?,
        )?,
        Command::Deactivate { service_type } => {
            print_json(&client.deactivate_service(&me, &service_type).await?)?
        }
        Command::Discover { service_type } => {
            print_json(&client.discover_services(service_type.as_deref()).await?)?
        }
        Command::Service {
            owner,
            service_type,
        } => print_json(&client.get_service(&owner, &service_type).await?)?,
        Command::Pay {
            provider,
            service_type,
            amount,
            nonce,
        } => {
            let nonce = nonce.unwrap_or_else(random_nonce);
            let receipt = client.create_escrow(&provider, &service_type, amount, nonce).await?;
            println!("Escrow nonce: {}", nonce);
            print_json(&receipt)?
        }
        Command::Complete {
            client: payer,
            service_type,
            nonce,
        } => print_json(&client.complete_service(&payer, &me, &service_type, nonce).await?)?,
        Command::Release {
            provider,
            service_type,
            nonce,
        } => print_json(&client.release_payment(&me, &provider, &service_type, nonce).await?)?,
        Command::Dispute {
            provider,
            service_type,
            nonce,
        } => print_json(&client.dispute(&me, &provider, &service_type, nonce).await?)?,
        Command::Status {
            client: payer,
            provider,
            service_type,
            nonce,
        } => print_json(&client.get_escrow(&payer, &provider, &service_type, nonce).await?)?,
        Command::Balance { address } => {
            let address = address.unwrap_or(me);
            println!("{}: {} lamports", address, client.balance(&address).await?);
        }
        Command::Airdrop { lamports } => {
            let balance = client.airdrop(lamports).await?;
            println!("{}: {} lamports", me, balance);
        }
    }

    Ok(())
}
