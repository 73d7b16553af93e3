//! Deterministic addressing.
//!
//! Every account the marketplace programs own lives at an address derived
//! from a role tag and an ordered list of seeds. Anyone who knows the seeds
//! can recompute the address, so no index is needed to find an account, and
//! the programs never trust an address they did not derive themselves.
//!
//! Framing: `domain || program_id || for each part (tag, seeds..):
//! u32_le(len) || bytes || bump`. The length prefix keeps `("a", "bc")` and
//! `("ab", "c")` apart. Derived addresses are forced off the Ed25519 curve by
//! searching the bump downward from 255, so no private key can ever sign for
//! one.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{MarketError, ProtocolError};

/// Maximum number of framed parts (tag, seeds and bump) in one derivation.
pub const MAX_SEEDS: usize = 16;
/// Maximum length in bytes of the tag and of every seed.
pub const MAX_SEED_LEN: usize = 32;

pub const SERVICE_TAG: &[u8] = b"service";
pub const ESCROW_TAG: &[u8] = b"escrow";

const DERIVATION_DOMAIN: &[u8] = b"a2a-pay:derived-address";

pub static REGISTRY_PROGRAM_ID: Lazy<ProgramId> =
    Lazy::new(|| Address::hash_of(b"a2a-pay:program:registry"));
pub static ESCROW_PROGRAM_ID: Lazy<ProgramId> =
    Lazy::new(|| Address::hash_of(b"a2a-pay:program:escrow"));

/// A 32-byte ledger address. Wallet identities are Ed25519 public keys,
/// program accounts are derived addresses.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct Address([u8; 32]);

/// The address of a signing party.
pub type Identity = Address;
/// The address a program is installed under.
pub type ProgramId = Address;

impl Address {
    pub const fn new_from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA-256 of arbitrary bytes, used for fixed program ids.
    pub fn hash_of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Whether the bytes decode to an Ed25519 point, i.e. could be a signer.
    pub fn is_on_curve(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The pair of programs a marketplace deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramIds {
    pub registry: ProgramId,
    pub escrow: ProgramId,
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            registry: *REGISTRY_PROGRAM_ID,
            escrow: *ESCROW_PROGRAM_ID,
        }
    }
}

fn check_seeds(tag: &[u8], seeds: &[&[u8]]) -> Result<(), ProtocolError> {
    // tag + seeds + bump
    let parts = seeds.len() + 2;
    if parts > MAX_SEEDS {
        return Err(ProtocolError::InvalidSeeds {
            reason: format!("{} parts exceed the maximum of {}", parts, MAX_SEEDS),
        });
    }
    for (index, part) in std::iter::once(&tag).chain(seeds.iter()).enumerate() {
        if part.len() > MAX_SEED_LEN {
            return Err(ProtocolError::InvalidSeeds {
                reason: format!(
                    "part {} is {} bytes, maximum is {}",
                    index,
                    part.len(),
                    MAX_SEED_LEN
                ),
            });
        }
    }
    Ok(())
}

fn hash_parts(program_id: &ProgramId, tag: &[u8], seeds: &[&[u8]], bump: u8) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(DERIVATION_DOMAIN);
    hasher.update(program_id.as_bytes());
    for part in std::iter::once(&tag).chain(seeds.iter()) {
        hasher.update((part.len() as u32).to_le_bytes());
        hasher.update(part);
    }
    hasher.update([bump]);
    Address(hasher.finalize().into())
}

/// Recompute the address for a known bump. Fails if the seeds are malformed
/// or the result lands on the curve.
pub fn create_address(
    program_id: &ProgramId,
    tag: &[u8],
    seeds: &[&[u8]],
    bump: u8,
) -> Result<Address, ProtocolError> {
    check_seeds(tag, seeds)?;
    let address = hash_parts(program_id, tag, seeds, bump);
    if address.is_on_curve() {
        return Err(ProtocolError::InvalidSeeds {
            reason: format!("bump {} yields an on-curve address", bump),
        });
    }
    Ok(address)
}

/// Derive the canonical address and its bump (the derivation proof).
pub fn derive(
    program_id: &ProgramId,
    tag: &[u8],
    seeds: &[&[u8]],
) -> Result<(Address, u8), ProtocolError> {
    check_seeds(tag, seeds)?;
    for bump in (0..=u8::MAX).rev() {
        let address = hash_parts(program_id, tag, seeds, bump);
        if !address.is_on_curve() {
            return Ok((address, bump));
        }
    }
    Err(ProtocolError::InvalidSeeds {
        reason: "no off-curve bump found".to_string(),
    })
}

/// `("service", owner, service_type)` under the registry program.
pub fn service_address(
    registry: &ProgramId,
    owner: &Identity,
    service_type: &str,
) -> Result<(Address, u8), ProtocolError> {
    derive(registry, SERVICE_TAG, &[owner.as_ref(), service_type.as_bytes()])
}

/// `("escrow", client, provider, service_type, nonce)` under the escrow program.
/// The nonce is framed as 8 little-endian bytes.
pub fn escrow_address(
    escrow: &ProgramId,
    client: &Identity,
    provider: &Identity,
    service_type: &str,
    nonce: u64,
) -> Result<(Address, u8), ProtocolError> {
    let nonce = nonce.to_le_bytes();
    derive(
        escrow,
        ESCROW_TAG,
        &[
            client.as_ref(),
            provider.as_ref(),
            service_type.as_bytes(),
            &nonce,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> ProgramId {
        Address::hash_of(b"test-program")
    }

    #[test]
    fn derivation_is_deterministic() {
        let first = derive(&program(), b"tag", &[b"alpha", b"beta"]).unwrap();
        let second = derive(&program(), b"tag", &[b"alpha", b"beta"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn length_framing_separates_shifted_seeds() {
        let (a, _) = derive(&program(), b"tag", &[b"a", b"bc"]).unwrap();
        let (b, _) = derive(&program(), b"tag", &[b"ab", b"c"]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tag_and_program_separate_domains() {
        let (service, _) = derive(&program(), SERVICE_TAG, &[b"x"]).unwrap();
        let (escrow, _) = derive(&program(), ESCROW_TAG, &[b"x"]).unwrap();
        let (other, _) = derive(&Address::hash_of(b"other"), SERVICE_TAG, &[b"x"]).unwrap();
        assert_ne!(service, escrow);
        assert_ne!(service, other);
    }

    #[test]
    fn derived_addresses_are_off_curve_and_verifiable() {
        let (address, bump) = derive(&program(), b"tag", &[b"seed"]).unwrap();
        assert!(!address.is_on_curve());
        assert_eq!(
            create_address(&program(), b"tag", &[b"seed"], bump).unwrap(),
            address
        );
    }

    #[test]
    fn signer_keys_are_on_curve() {
        let keypair = crate::wallet::Keypair::from_seed([3; 32]);
        assert!(keypair.identity().is_on_curve());
    }

    #[test]
    fn oversized_seeds_are_rejected() {
        let long = [0u8; MAX_SEED_LEN + 1];
        assert!(matches!(
            derive(&program(), b"tag", &[&long]),
            Err(ProtocolError::InvalidSeeds { .. })
        ));

        let seed: &[u8] = b"s";
        let seeds = vec![seed; MAX_SEEDS - 1];
        assert!(derive(&program(), b"tag", &seeds).is_err());
        assert!(derive(&program(), b"tag", &seeds[..MAX_SEEDS - 2]).is_ok());
    }

    #[test]
    fn escrow_nonce_changes_address() {
        let ids = ProgramIds::default();
        let client = Address::new_from_array([1; 32]);
        let provider = Address::new_from_array([2; 32]);
        let (first, _) = escrow_address(&ids.escrow, &client, &provider, "echo", 1).unwrap();
        let (second, _) = escrow_address(&ids.escrow, &client, &provider, "echo", 2).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn address_parses_its_own_display() {
        let address = Address::hash_of(b"display");
        let parsed: Address = address.to_string().parse().unwrap();
        assert_eq!(parsed, address);
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn address_serializes_as_hex_string() {
        let address = Address::hash_of(b"json");
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), address);
        assert!(serde_json::from_str::<Address>("\"not-hex\"").is_err());

        let bytes = borsh::to_vec(&address).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(Address::try_from_slice(&bytes).unwrap(), address);
    }
}
