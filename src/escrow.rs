//! Escrow custody program.
//!
//! ```text
//! Created ──complete──▶ Delivered ──release──▶ Released (closed)
//!    │
//!    └──dispute──▶ Disputed (closed)
//! ```
//!
//! Funds only leave custody through a transition signed by the counterpart
//! the transition pays.

use tracing::info;

use crate::address::{escrow_address, Address, Identity, ProgramId};
use crate::error::ProtocolError;
use crate::instruction::{decode_instruction, EscrowInstruction};
use crate::ledger::{InvokeContext, Program};
use crate::registry::validate_service_type;
use crate::state::{EscrowAccount, EscrowStatus};

/// Seeds naming one escrow, as carried by every post-creation instruction.
struct EscrowSeeds {
    client: Identity,
    provider: Identity,
    service_type: String,
    nonce: u64,
}

/// Which recorded party may sign a transition.
#[derive(Clone, Copy)]
enum Role {
    Client,
    Provider,
}

pub struct EscrowProgram {
    id: ProgramId,
}

impl EscrowProgram {
    pub fn new(id: ProgramId) -> Self {
        Self { id }
    }

    fn create_escrow(
        &self,
        ctx: &mut InvokeContext<'_>,
        provider: Identity,
        service_type: String,
        amount: u64,
        nonce: u64,
    ) -> Result<(), ProtocolError> {
        validate_service_type(&service_type)?;
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount);
        }

        let client = ctx.signer();
        let (address, _) = escrow_address(&self.id, &client, &provider, &service_type, nonce)?;
        ctx.require_target(&address)?;

        let space = EscrowAccount::space(&service_type);
        let required = amount
            .checked_add(ctx.minimum_balance(space))
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        let available = ctx.balance(&client);
        if available < required {
            return Err(ProtocolError::InsufficientFunds { required, available });
        }

        let escrow = EscrowAccount {
            client,
            provider,
            amount,
            status: EscrowStatus::Created,
            service_type,
            nonce,
            created_at: ctx.unix_timestamp(),
        };
        ctx.create_account(&client, &address, space, &escrow)?;
        ctx.transfer(&client, &address, amount)?;

        info!(%client, %provider, %address, amount, nonce, "escrow created");
        Ok(())
    }

    fn complete_service(
        &self,
        ctx: &mut InvokeContext<'_>,
        seeds: EscrowSeeds,
    ) -> Result<(), ProtocolError> {
        let (address, mut escrow) =
            self.load_for(ctx, &seeds, Role::Provider, EscrowStatus::Created)?;
        escrow.status = EscrowStatus::Delivered;
        ctx.store(&address, &escrow)?;

        info!(%address, provider = %escrow.provider, "service marked delivered");
        Ok(())
    }

    fn release_payment(
        &self,
        ctx: &mut InvokeContext<'_>,
        seeds: EscrowSeeds,
    ) -> Result<(), ProtocolError> {
        let (address, escrow) = self.load_for(ctx, &seeds, Role::Client, EscrowStatus::Delivered)?;
        ctx.transfer(&address, &escrow.provider, escrow.amount)?;
        let reclaimed = ctx.close_account(&address, &escrow.client)?;

        info!(
            %address,
            provider = %escrow.provider,
            amount = escrow.amount,
            reclaimed,
            status = %EscrowStatus::Released,
            "payment released"
        );
        Ok(())
    }

    fn dispute(
        &self,
        ctx: &mut InvokeContext<'_>,
        seeds: EscrowSeeds,
    ) -> Result<(), ProtocolError> {
        let (address, escrow) = self.load_for(ctx, &seeds, Role::Client, EscrowStatus::Created)?;
        ctx.transfer(&address, &escrow.client, escrow.amount)?;
        let reclaimed = ctx.close_account(&address, &escrow.client)?;

        info!(
            %address,
            client = %escrow.client,
            amount = escrow.amount,
            reclaimed,
            status = %EscrowStatus::Disputed,
            "escrow disputed and refunded"
        );
        Ok(())
    }

    /// Recompute the escrow address from its seeds, load it and check the
    /// signer's role before the status.
    fn load_for(
        &self,
        ctx: &InvokeContext<'_>,
        seeds: &EscrowSeeds,
        role: Role,
        expected: EscrowStatus,
    ) -> Result<(Address, EscrowAccount), ProtocolError> {
        validate_service_type(&seeds.service_type)?;
        let (address, _) = escrow_address(
            &self.id,
            &seeds.client,
            &seeds.provider,
            &seeds.service_type,
            seeds.nonce,
        )?;
        ctx.require_target(&address)?;

        let escrow: EscrowAccount = ctx.load(&address)?;
        let authorized = match role {
            Role::Client => escrow.client,
            Role::Provider => escrow.provider,
        };
        if ctx.signer() != authorized {
            return Err(ProtocolError::Unauthorized {
                expected: authorized,
                actual: ctx.signer(),
            });
        }
        if escrow.status != expected {
            return Err(ProtocolError::InvalidState {
                expected,
                actual: escrow.status,
            });
        }
        Ok((address, escrow))
    }
}

impl Program for EscrowProgram {
    fn id(&self) -> ProgramId {
        self.id
    }

    fn name(&self) -> &'static str {
        "escrow"
    }

    fn process(&self, ctx: &mut InvokeContext<'_>, data: &[u8]) -> Result<(), ProtocolError> {
        match decode_instruction::<EscrowInstruction>(data)? {
            EscrowInstruction::CreateEscrow {
                provider,
                service_type,
                amount,
                nonce,
            } => {
                info!("Instruction: CreateEscrow");
                self.create_escrow(ctx, provider, service_type, amount, nonce)
            }
            EscrowInstruction::CompleteService {
                client,
                provider,
                service_type,
                nonce,
            } => {
                info!("Instruction: CompleteService");
                self.complete_service(ctx, EscrowSeeds { client, provider, service_type, nonce })
            }
            EscrowInstruction::ReleasePayment {
                client,
                provider,
                service_type,
                nonce,
            } => {
                info!("Instruction: ReleasePayment");
                self.release_payment(ctx, EscrowSeeds { client, provider, service_type, nonce })
            }
            EscrowInstruction::Dispute {
                client,
                provider,
                service_type,
                nonce,
            } => {
                info!("Instruction: Dispute");
                self.dispute(ctx, EscrowSeeds { client, provider, service_type, nonce })
            }
        }
    }
}
