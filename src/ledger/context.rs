use std::collections::{BTreeMap, BTreeSet};

use crate::address::{Address, Identity, ProgramId};
use crate::error::{Absence, ProtocolError};
use crate::state::AccountData;

use super::reserve::Reserve;
use super::{AccountRecord, LedgerState};

/// Writes staged by one transaction. `None` marks a closed account.
pub(crate) struct StagedChanges {
    pub accounts: BTreeMap<Address, Option<AccountRecord>>,
    pub retired: BTreeSet<Address>,
}

/// The view a program executes against.
///
/// Reads fall through to the committed ledger state; writes land in an
/// overlay that the ledger commits only if the whole instruction (and the
/// fee) succeeds.
pub struct InvokeContext<'a> {
    base: &'a LedgerState,
    overlay: BTreeMap<Address, Option<AccountRecord>>,
    retired: BTreeSet<Address>,
    reserve: Reserve,
    program_id: ProgramId,
    signer: Identity,
    target: Address,
    timestamp: i64,
}

impl<'a> InvokeContext<'a> {
    pub(crate) fn new(
        base: &'a LedgerState,
        reserve: Reserve,
        program_id: ProgramId,
        signer: Identity,
        target: Address,
        timestamp: i64,
    ) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
            retired: BTreeSet::new(),
            reserve,
            program_id,
            signer,
            target,
            timestamp,
        }
    }

    pub fn signer(&self) -> Identity {
        self.signer
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn minimum_balance(&self, space: usize) -> u64 {
        self.reserve.minimum_balance(space)
    }

    fn record(&self, address: &Address) -> Option<&AccountRecord> {
        match self.overlay.get(address) {
            Some(staged) => staged.as_ref(),
            None => self.base.accounts.get(address),
        }
    }

    fn is_retired(&self, address: &Address) -> bool {
        self.retired.contains(address) || self.base.retired.contains(address)
    }

    fn absence(&self, address: &Address) -> Absence {
        if self.is_retired(address) {
            Absence::Closed
        } else {
            Absence::NeverCreated
        }
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.record(address).map_or(0, |record| record.lamports)
    }

    /// Reject the transaction unless it names the address the program derived.
    pub fn require_target(&self, derived: &Address) -> Result<(), ProtocolError> {
        if self.target != *derived {
            return Err(ProtocolError::AddressMismatch {
                expected: *derived,
                supplied: self.target,
            });
        }
        Ok(())
    }

    fn owned_record(&self, address: &Address) -> Result<&AccountRecord, ProtocolError> {
        match self.record(address) {
            Some(record) if record.owner == Some(self.program_id) => Ok(record),
            Some(_) => Err(ProtocolError::IllegalOwner { address: *address }),
            None => Err(ProtocolError::NotFound {
                address: *address,
                reason: self.absence(address),
            }),
        }
    }

    pub fn load<T: AccountData>(&self, address: &Address) -> Result<T, ProtocolError> {
        let record = self.owned_record(address)?;
        T::decode(address, &record.data)
    }

    /// Allocate `space` bytes at `address`, owned by the executing program,
    /// with the reserve paid by `payer`. Occupied and retired addresses are
    /// both collisions.
    pub fn create_account<T: AccountData>(
        &mut self,
        payer: &Identity,
        address: &Address,
        space: usize,
        value: &T,
    ) -> Result<(), ProtocolError> {
        if self.record(address).is_some() || self.is_retired(address) {
            return Err(ProtocolError::AddressCollision { address: *address });
        }
        let data = encode_into(address, value, space)?;
        let lamports = self.reserve.minimum_balance(space);
        self.debit(payer, lamports)?;
        self.overlay.insert(
            *address,
            Some(AccountRecord {
                lamports,
                owner: Some(self.program_id),
                data,
            }),
        );
        Ok(())
    }

    /// Overwrite the data of an existing account in place.
    pub fn store<T: AccountData>(
        &mut self,
        address: &Address,
        value: &T,
    ) -> Result<(), ProtocolError> {
        let mut record = self.owned_record(address)?.clone();
        record.data = encode_into(address, value, record.data.len())?;
        self.overlay.insert(*address, Some(record));
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        lamports: u64,
    ) -> Result<(), ProtocolError> {
        if lamports == 0 {
            return Ok(());
        }
        self.debit(from, lamports)?;
        self.credit(to, lamports)
    }

    /// Close an account owned by the executing program: its whole balance
    /// goes to `recipient` and the address is retired. Returns the amount
    /// disbursed.
    pub fn close_account(
        &mut self,
        address: &Address,
        recipient: &Address,
    ) -> Result<u64, ProtocolError> {
        let lamports = self.owned_record(address)?.lamports;
        self.overlay.insert(*address, None);
        self.retired.insert(*address);
        self.credit(recipient, lamports)?;
        Ok(lamports)
    }

    pub(crate) fn charge_fee(&mut self, fee: u64) -> Result<(), ProtocolError> {
        if fee == 0 {
            return Ok(());
        }
        let signer = self.signer;
        self.debit(&signer, fee)
    }

    fn debit(&mut self, from: &Address, lamports: u64) -> Result<(), ProtocolError> {
        let Some(mut record) = self.record(from).cloned() else {
            return Err(ProtocolError::InsufficientFunds {
                required: lamports,
                available: 0,
            });
        };
        match record.owner {
            None if *from != self.signer => {
                return Err(ProtocolError::Unauthorized {
                    expected: *from,
                    actual: self.signer,
                })
            }
            Some(owner) if owner != self.program_id => {
                return Err(ProtocolError::IllegalOwner { address: *from })
            }
            _ => {}
        }
        record.lamports = record
            .lamports
            .checked_sub(lamports)
            .ok_or(ProtocolError::InsufficientFunds {
                required: lamports,
                available: record.lamports,
            })?;
        self.overlay.insert(*from, Some(record));
        Ok(())
    }

    fn credit(&mut self, to: &Address, lamports: u64) -> Result<(), ProtocolError> {
        let mut record = match self.record(to) {
            Some(record) => record.clone(),
            None if self.is_retired(to) => {
                return Err(ProtocolError::NotFound {
                    address: *to,
                    reason: Absence::Closed,
                })
            }
            None => AccountRecord::default(),
        };
        record.lamports = record
            .lamports
            .checked_add(lamports)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        self.overlay.insert(*to, Some(record));
        Ok(())
    }

    pub(crate) fn into_changes(self) -> StagedChanges {
        StagedChanges {
            accounts: self.overlay,
            retired: self.retired,
        }
    }
}

fn encode_into<T: AccountData>(
    address: &Address,
    value: &T,
    space: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut data = value.encode()?;
    if data.len() > space {
        return Err(ProtocolError::AccountDataTooLarge {
            address: *address,
            len: data.len(),
            space,
        });
    }
    data.resize(space, 0);
    Ok(data)
}
