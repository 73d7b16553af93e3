use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::{Address, Identity};
use crate::error::ProtocolError;

pub const MAX_SERVICE_TYPE_LEN: usize = 32;
pub const MAX_ENDPOINT_LEN: usize = 128;
pub const DISCRIMINATOR_LEN: usize = 8;

/// Byte offset of the length-prefixed `service_type` inside encoded
/// `ServiceAccount` data (after the discriminator and the owner).
pub const SERVICE_TYPE_OFFSET: usize = DISCRIMINATOR_LEN + 32;

static SERVICE_DISCRIMINATOR: Lazy<[u8; DISCRIMINATOR_LEN]> =
    Lazy::new(|| discriminator_for("ServiceAccount"));
static ESCROW_DISCRIMINATOR: Lazy<[u8; DISCRIMINATOR_LEN]> =
    Lazy::new(|| discriminator_for("EscrowAccount"));

fn discriminator_for(type_name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("account:{}", type_name).as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// Typed account data stored behind an 8-byte discriminator.
pub trait AccountData: BorshSerialize + BorshDeserialize + Sized {
    fn discriminator() -> [u8; DISCRIMINATOR_LEN];

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut data = Self::discriminator().to_vec();
        self.serialize(&mut data)
            .map_err(|e| ProtocolError::InvalidInstruction {
                reason: format!("failed to encode account: {}", e),
            })?;
        Ok(data)
    }

    /// Decode from account data. Trailing bytes (unused reserved space) are
    /// ignored.
    fn decode(address: &Address, data: &[u8]) -> Result<Self, ProtocolError> {
        let mismatch = || ProtocolError::AccountDataMismatch { address: *address };
        if data.len() < DISCRIMINATOR_LEN || data[..DISCRIMINATOR_LEN] != Self::discriminator() {
            return Err(mismatch());
        }
        let mut body = &data[DISCRIMINATOR_LEN..];
        Self::deserialize(&mut body).map_err(|_| mismatch())
    }
}

/// A directory entry: one priced offering per owner and service type.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct ServiceAccount {
    pub owner: Identity,
    pub service_type: String,
    pub price: u64,
    pub endpoint: String,
    pub is_active: bool,
    pub created_at: i64,
    pub reputation: u64,
}

impl ServiceAccount {
    /// Allocated space. The endpoint is sized at its maximum so updates
    /// never need to grow the account.
    pub fn space(service_type: &str) -> usize {
        DISCRIMINATOR_LEN
            + 32 // owner
            + 4 + service_type.len() // service_type
            + 8 // price
            + 4 + MAX_ENDPOINT_LEN // endpoint
            + 1 // is_active
            + 8 // created_at
            + 8 // reputation
    }
}

impl AccountData for ServiceAccount {
    fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        *SERVICE_DISCRIMINATOR
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Created,
    Delivered,
    Released,
    Disputed,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowStatus::Created => write!(f, "Created"),
            EscrowStatus::Delivered => write!(f, "Delivered"),
            EscrowStatus::Released => write!(f, "Released"),
            EscrowStatus::Disputed => write!(f, "Disputed"),
        }
    }
}

/// Funds in custody for one payment attempt between a client and a provider.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct EscrowAccount {
    pub client: Identity,
    pub provider: Identity,
    pub amount: u64,
    pub status: EscrowStatus,
    pub service_type: String,
    pub nonce: u64,
    pub created_at: i64,
}

impl EscrowAccount {
    pub fn space(service_type: &str) -> usize {
        DISCRIMINATOR_LEN
            + 32 // client
            + 32 // provider
            + 8 // amount
            + 1 // status
            + 4 + service_type.len() // service_type
            + 8 // nonce
            + 8 // created_at
    }
}

impl AccountData for EscrowAccount {
    fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        *ESCROW_DISCRIMINATOR
    }
}
