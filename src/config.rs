use crate::address::{Address, ProgramIds};
use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub programs: ProgramsConfig,
    pub database: DatabaseConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Economic and replay parameters of the ledger.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub lamports_per_signature: u64,
    pub lamports_per_byte: u64,
    /// How many slots a transaction's `recent_slot` may lag the ledger.
    pub max_transaction_age: u64,
    /// Largest single airdrop; `None` disables the faucet.
    pub faucet_limit: Option<u64>,
}

/// Hex program ids. Unset ids fall back to the well-known defaults.
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct ProgramsConfig {
    pub registry: Option<String>,
    pub escrow: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Persist ledger snapshots; the node runs purely in memory otherwise.
    pub enabled: bool,
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub node_url: String,
    pub keypair_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8899,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lamports_per_signature: 5_000,
            lamports_per_byte: 6_960,
            max_transaction_age: 150,
            faucet_limit: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "sqlite://a2a-ledger.db".to_string(),
            max_connections: Some(5),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:8899".to_string(),
            keypair_path: PathBuf::from("a2a-keypair.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("text".to_string()),
        }
    }
}

impl ProgramsConfig {
    pub fn program_ids(&self) -> Result<ProgramIds> {
        let defaults = ProgramIds::default();
        let parse = |value: &Option<String>, fallback: Address, name: &str| -> Result<Address> {
            match value {
                Some(hex) => hex
                    .parse()
                    .map_err(|e| {
                        MarketError::Config(format!("Invalid {} program id: {}", name, e))
                    }),
                None => Ok(fallback),
            }
        };
        Ok(ProgramIds {
            registry: parse(&self.registry, defaults.registry, "registry")?,
            escrow: parse(&self.escrow, defaults.escrow, "escrow")?,
        })
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| MarketError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| MarketError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Environment overrides on top of whatever was loaded (or defaulted).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("A2A_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("A2A_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| MarketError::Config(format!("Invalid A2A_PORT: {}", e)))?;
        }

        if let Ok(url) = std::env::var("A2A_DATABASE_URL") {
            self.database.url = url;
            self.database.enabled = true;
        }

        if let Ok(limit) = std::env::var("A2A_FAUCET_LIMIT") {
            self.ledger.faucet_limit = Some(
                limit
                    .parse()
                    .map_err(|e| MarketError::Config(format!("Invalid A2A_FAUCET_LIMIT: {}", e)))?,
            );
        }

        if let Ok(node_url) = std::env::var("A2A_NODE_URL") {
            self.client.node_url = node_url;
        }

        if let Ok(keypair) = std::env::var("A2A_KEYPAIR") {
            self.client.keypair_path = PathBuf::from(keypair);
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(MarketError::Config("Server port cannot be 0".to_string()));
        }

        if self.database.enabled && self.database.url.is_empty() {
            return Err(MarketError::Config("Database URL cannot be empty".to_string()));
        }

        if self.ledger.lamports_per_byte == 0 {
            return Err(MarketError::Config("lamports_per_byte must be positive".to_string()));
        }

        if self.ledger.max_transaction_age == 0 {
            return Err(MarketError::Config("max_transaction_age must be positive".to_string()));
        }

        let programs = self.programs.program_ids()?;
        if programs.registry == programs.escrow {
            return Err(MarketError::Config(
                "Registry and escrow programs need distinct ids".to_string(),
            ));
        }

        if self.client.node_url.is_empty() {
            return Err(MarketError::Config("Node URL cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn get_database_url(&self) -> Option<&str> {
        self.database.enabled.then_some(self.database.url.as_str())
    }

    pub fn get_server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| MarketError::Config(format!("Failed to serialize default config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| MarketError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}
