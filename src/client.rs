//! Typed marketplace client.
//!
//! Builds, signs and submits one transaction per operation and decodes the
//! account state the receipt carries back.

use borsh::BorshSerialize;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{self, Address, Identity, ProgramId, ProgramIds};
use crate::connection::Connection;
use crate::error::Result;
use crate::instruction::{EscrowInstruction, Message, RegistryInstruction, Transaction};
use crate::registry::{active_services, discovery_filters, validate_service_type};
use crate::state::{AccountData, EscrowAccount, ServiceAccount};
use crate::wallet::{Keypair, Signature};

/// Outcome of a committed operation. `account` is `None` when the operation
/// closed the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt<T> {
    pub signature: Signature,
    pub slot: u64,
    pub address: Address,
    pub account: Option<T>,
}

pub struct MarketClient<C> {
    connection: C,
    keypair: Keypair,
    programs: ProgramIds,
}

/// A fresh nonce for a new escrow.
pub fn random_nonce() -> u64 {
    rand::thread_rng().gen()
}

impl<C: Connection> MarketClient<C> {
    pub fn new(connection: C, keypair: Keypair, programs: ProgramIds) -> Self {
        Self {
            connection,
            keypair,
            programs,
        }
    }

    pub fn identity(&self) -> Identity {
        self.keypair.identity()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn programs(&self) -> ProgramIds {
        self.programs
    }

    pub fn service_address(&self, owner: &Identity, service_type: &str) -> Result<Address> {
        validate_service_type(service_type)?;
        Ok(address::service_address(&self.programs.registry, owner, service_type)?.0)
    }

    pub fn escrow_address(
        &self,
        client: &Identity,
        provider: &Identity,
        service_type: &str,
        nonce: u64,
    ) -> Result<Address> {
        validate_service_type(service_type)?;
        Ok(address::escrow_address(&self.programs.escrow, client, provider, service_type, nonce)?.0)
    }

    async fn send<I, T>(
        &self,
        program: ProgramId,
        target: Address,
        instruction: &I,
    ) -> Result<TxReceipt<T>>
    where
        I: BorshSerialize + Sync,
        T: AccountData,
    {
        let recent_slot = self.connection.current_slot().await?;
        let message = Message::new(program, target, recent_slot, instruction)?;
        let tx = Transaction::sign(&self.keypair, message)?;
        let receipt = self.connection.submit(&tx).await?;
        debug!(
            signature = %receipt.signature,
            slot = receipt.slot,
            %target,
            "transaction confirmed"
        );

        let account = match receipt.account {
            Some(record) => Some(T::decode(&receipt.address, &record.data)?),
            None => None,
        };
        Ok(TxReceipt {
            signature: receipt.signature,
            slot: receipt.slot,
            address: receipt.address,
            account,
        })
    }

    pub async fn register_service(
        &self,
        service_type: &str,
        price: u64,
        endpoint: &str,
    ) -> Result<TxReceipt<ServiceAccount>> {
        let target = self.service_address(&self.identity(), service_type)?;
        let instruction = RegistryInstruction::RegisterService {
            service_type: service_type.to_string(),
            price,
            endpoint: endpoint.to_string(),
        };
        self.send(self.programs.registry, target, &instruction).await
    }

    pub async fn update_service(
        &self,
        owner: &Identity,
        service_type: &str,
        price: Option<u64>,
        endpoint: Option<&str>,
    ) -> Result<TxReceipt<ServiceAccount>> {
        let target = self.service_address(owner, service_type)?;
        let instruction = RegistryInstruction::UpdateService {
            owner: *owner,
            service_type: service_type.to_string(),
            price,
            endpoint: endpoint.map(str::to_string),
        };
        self.send(self.programs.registry, target, &instruction).await
    }

    pub async fn deactivate_service(
        &self,
        owner: &Identity,
        service_type: &str,
    ) -> Result<TxReceipt<ServiceAccount>> {
        let target = self.service_address(owner, service_type)?;
        let instruction = RegistryInstruction::DeactivateService {
            owner: *owner,
            service_type: service_type.to_string(),
        };
        self.send(self.programs.registry, target, &instruction).await
    }

    pub async fn get_service(
        &self,
        owner: &Identity,
        service_type: &str,
    ) -> Result<ServiceAccount> {
        let address = self.service_address(owner, service_type)?;
        let record = self.connection.lookup(&address).await?.into_live(&address)?;
        Ok(ServiceAccount::decode(&address, &record.data)?)
    }

    /// Active services, optionally of one exact type, ordered by address.
    pub async fn discover_services(
        &self,
        service_type: Option<&str>,
    ) -> Result<Vec<ServiceAccount>> {
        if let Some(service_type) = service_type {
            validate_service_type(service_type)?;
        }
        let accounts = self
            .connection
            .program_accounts(&self.programs.registry, &discovery_filters(service_type))
            .await?;
        Ok(active_services(accounts, service_type))
    }

    /// Open an escrow paying `provider`, with this client's identity as the
    /// client.
    pub async fn create_escrow(
        &self,
        provider: &Identity,
        service_type: &str,
        amount: u64,
        nonce: u64,
    ) -> Result<TxReceipt<EscrowAccount>> {
        let target = self.escrow_address(&self.identity(), provider, service_type, nonce)?;
        let instruction = EscrowInstruction::CreateEscrow {
            provider: *provider,
            service_type: service_type.to_string(),
            amount,
            nonce,
        };
        self.send(self.programs.escrow, target, &instruction).await
    }

    pub async fn complete_service(
        &self,
        client: &Identity,
        provider: &Identity,
        service_type: &str,
        nonce: u64,
    ) -> Result<TxReceipt<EscrowAccount>> {
        let target = self.escrow_address(client, provider, service_type, nonce)?;
        let instruction = EscrowInstruction::CompleteService {
            client: *client,
            provider: *provider,
            service_type: service_type.to_string(),
            nonce,
        };
        self.send(self.programs.escrow, target, &instruction).await
    }

    pub async fn release_payment(
        &self,
        client: &Identity,
        provider: &Identity,
        service_type: &str,
        nonce: u64,
    ) -> Result<TxReceipt<EscrowAccount>> {
        let target = self.escrow_address(client, provider, service_type, nonce)?;
        let instruction = EscrowInstruction::ReleasePayment {
            client: *client,
            provider: *provider,
            service_type: service_type.to_string(),
            nonce,
        };
        self.send(self.programs.escrow, target, &instruction).await
    }

    pub async fn dispute(
        &self,
        client: &Identity,
        provider: &Identity,
        service_type: &str,
        nonce: u64,
    ) -> Result<TxReceipt<EscrowAccount>> {
        let target = self.escrow_address(client, provider, service_type, nonce)?;
        let instruction = EscrowInstruction::Dispute {
            client: *client,
            provider: *provider,
            service_type: service_type.to_string(),
            nonce,
        };
        self.send(self.programs.escrow, target, &instruction).await
    }

    pub async fn get_escrow(
        &self,
        client: &Identity,
        provider: &Identity,
        service_type: &str,
        nonce: u64,
    ) -> Result<EscrowAccount> {
        let address = self.escrow_address(client, provider, service_type, nonce)?;
        let record = self.connection.lookup(&address).await?.into_live(&address)?;
        Ok(EscrowAccount::decode(&address, &record.data)?)
    }

    pub async fn balance(&self, address: &Address) -> Result<u64> {
        self.connection.balance(address).await
    }

    /// Faucet credit to this client's own wallet.
    pub async fn airdrop(&self, lamports: u64) -> Result<u64> {
        self.connection.airdrop(&self.identity(), lamports).await
    }
}
