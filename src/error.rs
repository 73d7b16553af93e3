use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{Address, Identity, ProgramId};
use crate::state::EscrowStatus;

pub type Result<T> = std::result::Result<T, MarketError>;

/// Why an address holds no live account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Absence {
    /// Nothing was ever created at the address.
    NeverCreated,
    /// An account existed and was closed by a terminal transition.
    Closed,
}

impl fmt::Display for Absence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Absence::NeverCreated => write!(f, "never created"),
            Absence::Closed => write!(f, "closed"),
        }
    }
}

/// Errors raised while executing a transaction against the ledger.
///
/// These are plain data so they survive the trip through the node's HTTP
/// boundary unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolError {
    #[error("Account already exists at {address}")]
    AddressCollision { address: Address },

    #[error("Account {address} not found ({reason})")]
    NotFound { address: Address, reason: Absence },

    #[error("Unauthorized: expected signer {expected}, got {actual}")]
    Unauthorized { expected: Identity, actual: Identity },

    #[error("Invalid escrow status: expected {expected}, found {actual}")]
    InvalidState {
        expected: EscrowStatus,
        actual: EscrowStatus,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Supplied address {supplied} does not match derived address {expected}")]
    AddressMismatch { expected: Address, supplied: Address },

    #[error("Service type must be {max} bytes or less (got {len})")]
    ServiceTypeTooLong { len: usize, max: usize },

    #[error("Endpoint must be {max} bytes or less (got {len})")]
    EndpointTooLong { len: usize, max: usize },

    #[error("Price must be greater than zero")]
    InvalidPrice,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid transaction signature")]
    InvalidSignature,

    #[error("Transaction {signature} was already processed")]
    DuplicateTransaction { signature: String },

    #[error("Transaction references slot {recent_slot}, current slot is {current_slot}")]
    StaleTransaction { recent_slot: u64, current_slot: u64 },

    #[error("Unknown program {program}")]
    UnknownProgram { program: ProgramId },

    #[error("Invalid instruction: {reason}")]
    InvalidInstruction { reason: String },

    #[error("Account {address} does not hold the expected data")]
    AccountDataMismatch { address: Address },

    #[error("Account {address} needs {len} bytes but only {space} were allocated")]
    AccountDataTooLarge {
        address: Address,
        len: usize,
        space: usize,
    },

    #[error("Account {address} is not owned by the executing program")]
    IllegalOwner { address: Address },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Invalid seeds: {reason}")]
    InvalidSeeds { reason: String },

    #[error("Faucet is disabled")]
    FaucetDisabled,

    #[error("Airdrop of {requested} exceeds the faucet limit of {limit}")]
    FaucetLimitExceeded { requested: u64, limit: u64 },
}

#[derive(Error, Debug)]
pub enum MarketError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl MarketError {
    /// The protocol error carried by this error, if any.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            MarketError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for MarketError {
    fn from(err: hex::FromHexError) -> Self {
        MarketError::Validation(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for MarketError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        MarketError::Wallet(err.to_string())
    }
}

impl From<std::io::Error> for MarketError {
    fn from(err: std::io::Error) -> Self {
        MarketError::Io(err.to_string())
    }
}
