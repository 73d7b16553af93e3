use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::address::{Address, Identity, ProgramId};
use crate::error::{MarketError, ProtocolError, Result};
use crate::wallet::{Keypair, Signature};

#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RegistryInstruction {
    RegisterService {
        service_type: String,
        price: u64,
        endpoint: String,
    },
    UpdateService {
        owner: Identity,
        service_type: String,
        price: Option<u64>,
        endpoint: Option<String>,
    },
    DeactivateService {
        owner: Identity,
        service_type: String,
    },
}

/// The client of `CreateEscrow` is the signer; every later instruction names
/// both parties so the address is derived independently of who signs.
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum EscrowInstruction {
    CreateEscrow {
        provider: Identity,
        service_type: String,
        amount: u64,
        nonce: u64,
    },
    CompleteService {
        client: Identity,
        provider: Identity,
        service_type: String,
        nonce: u64,
    },
    ReleasePayment {
        client: Identity,
        provider: Identity,
        service_type: String,
        nonce: u64,
    },
    Dispute {
        client: Identity,
        provider: Identity,
        service_type: String,
        nonce: u64,
    },
}

/// The signed part of a transaction.
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub program: ProgramId,
    /// The account the instruction operates on, as derived by the caller.
    pub target: Address,
    pub recent_slot: u64,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl Message {
    pub fn new<I: BorshSerialize>(
        program: ProgramId,
        target: Address,
        recent_slot: u64,
        instruction: &I,
    ) -> Result<Self> {
        let data = borsh::to_vec(instruction)
            .map_err(|e| MarketError::Serialization(e.to_string()))?;
        Ok(Self {
            program,
            target,
            recent_slot,
            data,
        })
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, ProtocolError> {
        borsh::to_vec(self).map_err(|e| ProtocolError::InvalidInstruction {
            reason: e.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub message: Message,
    pub signer: Identity,
    pub signature: Signature,
}

impl Transaction {
    pub fn sign(keypair: &Keypair, message: Message) -> Result<Self> {
        let signature = keypair.sign(&message.to_bytes()?);
        Ok(Self {
            message,
            signer: keypair.identity(),
            signature,
        })
    }

    pub fn verify(&self) -> std::result::Result<(), ProtocolError> {
        let bytes = self.message.to_bytes()?;
        if self.signature.verify(&self.signer, &bytes) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidSignature)
        }
    }
}

/// Decode instruction data handed to a program.
pub fn decode_instruction<I: BorshDeserialize>(
    data: &[u8],
) -> std::result::Result<I, ProtocolError> {
    I::try_from_slice(data).map_err(|e| ProtocolError::InvalidInstruction {
        reason: e.to_string(),
    })
}
