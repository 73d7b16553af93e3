//! In-memory ledger substrate.
//!
//! Holds every account keyed by address, executes one signed transaction at
//! a time under a single lock, and commits a transaction's staged writes only
//! when the program and the fee both succeed. The marketplace programs see
//! the ledger exclusively through [`InvokeContext`].

mod clock;
mod context;
mod reserve;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::{Address, ProgramId};
use crate::config::LedgerConfig;
use crate::error::{Absence, ProtocolError};
use crate::instruction::Transaction;
use crate::wallet::Signature;

pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::MockClock;
pub use context::InvokeContext;
pub use reserve::{Reserve, ACCOUNT_STORAGE_OVERHEAD};

use context::StagedChanges;

/// Program logic installed on the ledger.
pub trait Program: Send + Sync {
    fn id(&self) -> ProgramId;

    fn name(&self) -> &'static str;

    fn process(&self, ctx: &mut InvokeContext<'_>, data: &[u8]) -> Result<(), ProtocolError>;
}

/// One stored account. Wallets have no owner and no data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub lamports: u64,
    pub owner: Option<ProgramId>,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccountLookup {
    Live(AccountRecord),
    Closed,
    Vacant,
}

impl AccountLookup {
    /// The live record, or `NotFound` explaining why there is none.
    pub fn into_live(self, address: &Address) -> Result<AccountRecord, ProtocolError> {
        match self {
            AccountLookup::Live(record) => Ok(record),
            AccountLookup::Closed => Err(ProtocolError::NotFound {
                address: *address,
                reason: Absence::Closed,
            }),
            AccountLookup::Vacant => Err(ProtocolError::NotFound {
                address: *address,
                reason: Absence::NeverCreated,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountFilter {
    DataSize(usize),
    Memcmp {
        offset: usize,
        #[serde(with = "hex::serde")]
        bytes: Vec<u8>,
    },
}

impl AccountFilter {
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::DataSize(size) => data.len() == *size,
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset.saturating_add(bytes.len()))
                .map_or(false, |window| window == bytes.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedAccount {
    pub address: Address,
    pub account: AccountRecord,
}

/// Result of a committed transaction. `account` is the target's state after
/// the commit, `None` when the transaction closed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub signature: Signature,
    pub slot: u64,
    pub address: Address,
    pub account: Option<AccountRecord>,
}

/// Everything the ledger persists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub slot: u64,
    pub accounts: BTreeMap<Address, AccountRecord>,
    pub retired: BTreeSet<Address>,
    /// Signatures of recent transactions and the slot they committed in.
    pub processed: BTreeMap<Signature, u64>,
}

impl LedgerState {
    fn apply(&mut self, changes: StagedChanges) {
        for (address, record) in changes.accounts {
            match record {
                Some(record) => {
                    self.accounts.insert(address, record);
                }
                None => {
                    self.accounts.remove(&address);
                }
            }
        }
        self.retired.extend(changes.retired);
    }

    fn lookup(&self, address: &Address) -> AccountLookup {
        match self.accounts.get(address) {
            Some(record) => AccountLookup::Live(record.clone()),
            None if self.retired.contains(address) => AccountLookup::Closed,
            None => AccountLookup::Vacant,
        }
    }
}

pub struct Ledger {
    config: LedgerConfig,
    reserve: Reserve,
    clock: Arc<dyn Clock>,
    programs: HashMap<ProgramId, Arc<dyn Program>>,
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new(config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            reserve: Reserve::new(config.lamports_per_byte),
            config,
            clock,
            programs: HashMap::new(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn install(&mut self, program: Arc<dyn Program>) {
        info!(program = program.name(), id = %program.id(), "program installed");
        self.programs.insert(program.id(), program);
    }

    pub fn reserve(&self) -> Reserve {
        self.reserve
    }

    /// Execute a signed transaction atomically.
    pub fn submit(&self, tx: &Transaction) -> Result<Receipt, ProtocolError> {
        match self.execute(tx) {
            Ok(receipt) => {
                debug!(
                    signature = %receipt.signature,
                    slot = receipt.slot,
                    target = %receipt.address,
                    "transaction committed"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    signature = %tx.signature,
                    signer = %tx.signer,
                    error = %err,
                    "transaction rejected"
                );
                Err(err)
            }
        }
    }

    fn execute(&self, tx: &Transaction) -> Result<Receipt, ProtocolError> {
        tx.verify()?;
        let program = self
            .programs
            .get(&tx.message.program)
            .cloned()
            .ok_or(ProtocolError::UnknownProgram {
                program: tx.message.program,
            })?;

        let mut state = self.state.lock();
        let current_slot = state.slot;
        let recent_slot = tx.message.recent_slot;
        if recent_slot > current_slot
            || current_slot - recent_slot > self.config.max_transaction_age
        {
            return Err(ProtocolError::StaleTransaction {
                recent_slot,
                current_slot,
            });
        }
        if state.processed.contains_key(&tx.signature) {
            return Err(ProtocolError::DuplicateTransaction {
                signature: tx.signature.to_string(),
            });
        }

        let changes = {
            let mut ctx = InvokeContext::new(
                &state,
                self.reserve,
                program.id(),
                tx.signer,
                tx.message.target,
                self.clock.unix_timestamp(),
            );
            program.process(&mut ctx, &tx.message.data)?;
            ctx.charge_fee(self.config.lamports_per_signature)?;
            ctx.into_changes()
        };

        state.apply(changes);
        state.slot += 1;
        let slot = state.slot;
        state.processed.insert(tx.signature, slot);
        // Anything older can no longer pass the recent-slot check.
        let horizon = slot.saturating_sub(self.config.max_transaction_age);
        state.processed.retain(|_, committed| *committed >= horizon);

        Ok(Receipt {
            signature: tx.signature,
            slot,
            address: tx.message.target,
            account: state.accounts.get(&tx.message.target).cloned(),
        })
    }

    pub fn lookup(&self, address: &Address) -> AccountLookup {
        self.state.lock().lookup(address)
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.state
            .lock()
            .accounts
            .get(address)
            .map_or(0, |record| record.lamports)
    }

    pub fn current_slot(&self) -> u64 {
        self.state.lock().slot
    }

    /// Accounts owned by `program` matching every filter, ordered by address.
    pub fn program_accounts(
        &self,
        program: &ProgramId,
        filters: &[AccountFilter],
    ) -> Vec<KeyedAccount> {
        let state = self.state.lock();
        state
            .accounts
            .iter()
            .filter(|(_, record)| record.owner.as_ref() == Some(program))
            .filter(|(_, record)| filters.iter().all(|filter| filter.matches(&record.data)))
            .map(|(address, record)| KeyedAccount {
                address: *address,
                account: record.clone(),
            })
            .collect()
    }

    /// Credit a wallet outside of any transaction (genesis balances).
    pub fn fund(&self, address: &Address, lamports: u64) -> Result<u64, ProtocolError> {
        let mut state = self.state.lock();
        if state.retired.contains(address) {
            return Err(ProtocolError::NotFound {
                address: *address,
                reason: Absence::Closed,
            });
        }
        let record = state.accounts.entry(*address).or_default();
        if record.owner.is_some() {
            return Err(ProtocolError::IllegalOwner { address: *address });
        }
        record.lamports = record
            .lamports
            .checked_add(lamports)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        Ok(record.lamports)
    }

    /// Faucet credit, bounded by the configured limit.
    pub fn airdrop(&self, address: &Address, lamports: u64) -> Result<u64, ProtocolError> {
        let limit = self.config.faucet_limit.ok_or(ProtocolError::FaucetDisabled)?;
        if lamports > limit {
            return Err(ProtocolError::FaucetLimitExceeded {
                requested: lamports,
                limit,
            });
        }
        let balance = self.fund(address, lamports)?;
        info!(%address, lamports, balance, "airdrop");
        Ok(balance)
    }

    pub fn snapshot(&self) -> LedgerState {
        self.state.lock().clone()
    }

    pub fn restore(&self, state: LedgerState) {
        info!(slot = state.slot, accounts = state.accounts.len(), "ledger state restored");
        *self.state.lock() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{service_address, ProgramIds};
    use crate::instruction::{Message, RegistryInstruction};
    use crate::wallet::Keypair;

    const FEE: u64 = 5_000;

    fn ledger_with_clock(timestamp: i64) -> Ledger {
        let mut clock = MockClock::new();
        clock.expect_unix_timestamp().return_const(timestamp);
        let config = LedgerConfig {
            lamports_per_signature: FEE,
            lamports_per_byte: 10,
            max_transaction_age: 4,
            faucet_limit: Some(1_000_000),
        };
        crate::marketplace_ledger(config, ProgramIds::default(), Arc::new(clock))
    }

    fn register(
        ledger: &Ledger,
        owner: &Keypair,
        service_type: &str,
        recent_slot: u64,
    ) -> Transaction {
        let programs = ProgramIds::default();
        let (target, _) =
            service_address(&programs.registry, &owner.identity(), service_type).unwrap();
        let message = Message::new(
            programs.registry,
            target,
            recent_slot.min(ledger.current_slot()),
            &RegistryInstruction::RegisterService {
                service_type: service_type.to_string(),
                price: 100,
                endpoint: "http://agent".to_string(),
            },
        )
        .unwrap();
        Transaction::sign(owner, message).unwrap()
    }

    #[test]
    fn committed_transaction_charges_fee_and_stamps_clock() {
        let ledger = ledger_with_clock(1_234);
        let owner = Keypair::from_seed([1; 32]);
        ledger.fund(&owner.identity(), 1_000_000).unwrap();

        let receipt = ledger.submit(&register(&ledger, &owner, "echo", 0)).unwrap();
        assert_eq!(receipt.slot, 1);
        let record = receipt.account.unwrap();
        let reserve = ledger.reserve().minimum_balance(record.data.len());
        assert_eq!(record.lamports, reserve);
        assert_eq!(ledger.balance(&owner.identity()), 1_000_000 - reserve - FEE);

        let service: crate::state::ServiceAccount =
            crate::state::AccountData::decode(&receipt.address, &record.data).unwrap();
        assert_eq!(service.created_at, 1_234);
    }

    #[test]
    fn failed_transaction_changes_nothing() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([1; 32]);
        ledger.fund(&owner.identity(), 1_000_000).unwrap();
        ledger.submit(&register(&ledger, &owner, "echo", 0)).unwrap();
        let before = ledger.snapshot();

        let err = ledger.submit(&register(&ledger, &owner, "echo", 1)).unwrap_err();
        assert!(matches!(err, ProtocolError::AddressCollision { .. }));
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn fee_shortfall_rolls_back_the_instruction() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([2; 32]);
        let reserve = ledger
            .reserve()
            .minimum_balance(crate::state::ServiceAccount::space("echo"));
        ledger.fund(&owner.identity(), reserve).unwrap();

        let tx = register(&ledger, &owner, "echo", 0);
        let err = ledger.submit(&tx).unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientFunds { .. }));
        assert_eq!(ledger.lookup(&tx.message.target), AccountLookup::Vacant);
        assert_eq!(ledger.balance(&owner.identity()), reserve);
    }

    #[test]
    fn replayed_transaction_is_rejected() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([3; 32]);
        ledger.fund(&owner.identity(), 1_000_000).unwrap();

        let tx = register(&ledger, &owner, "echo", 0);
        ledger.submit(&tx).unwrap();
        assert!(matches!(
            ledger.submit(&tx),
            Err(ProtocolError::DuplicateTransaction { .. })
        ));
    }

    #[test]
    fn old_and_future_slots_are_stale() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([4; 32]);
        ledger.fund(&owner.identity(), 10_000_000).unwrap();
        for (i, service_type) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            let tx = register(&ledger, &owner, service_type, i as u64);
            ledger.submit(&tx).unwrap();
        }
        assert_eq!(ledger.current_slot(), 5);

        let programs = ProgramIds::default();
        let (target, _) = service_address(&programs.registry, &owner.identity(), "f").unwrap();
        let instruction = RegistryInstruction::RegisterService {
            service_type: "f".to_string(),
            price: 1,
            endpoint: String::new(),
        };
        for recent_slot in [0, 6] {
            let message =
                Message::new(programs.registry, target, recent_slot, &instruction).unwrap();
            let tx = Transaction::sign(&owner, message).unwrap();
            assert!(matches!(
                ledger.submit(&tx),
                Err(ProtocolError::StaleTransaction { .. })
            ));
        }
    }

    #[test]
    fn forged_signer_is_rejected() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([5; 32]);
        let impostor = Keypair::from_seed([6; 32]);
        let mut tx = register(&ledger, &owner, "echo", 0);
        tx.signer = impostor.identity();
        assert_eq!(ledger.submit(&tx), Err(ProtocolError::InvalidSignature));
    }

    #[test]
    fn unknown_program_is_rejected() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([7; 32]);
        let message =
            Message::new(Address::hash_of(b"nobody"), Address::default(), 0, &0u8).unwrap();
        let tx = Transaction::sign(&owner, message).unwrap();
        assert!(matches!(
            ledger.submit(&tx),
            Err(ProtocolError::UnknownProgram { .. })
        ));
    }

    #[test]
    fn program_accounts_apply_filters() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([8; 32]);
        ledger.fund(&owner.identity(), 10_000_000).unwrap();
        ledger.submit(&register(&ledger, &owner, "echo", 0)).unwrap();
        ledger.submit(&register(&ledger, &owner, "translate", 1)).unwrap();

        let registry = ProgramIds::default().registry;
        assert_eq!(ledger.program_accounts(&registry, &[]).len(), 2);

        let size = crate::state::ServiceAccount::space("echo");
        let by_size = ledger.program_accounts(&registry, &[AccountFilter::DataSize(size)]);
        assert_eq!(by_size.len(), 1);

        let wallets = ledger.program_accounts(&owner.identity(), &[]);
        assert!(wallets.is_empty());
    }

    #[test]
    fn memcmp_out_of_range_does_not_match() {
        let filter = AccountFilter::Memcmp {
            offset: 3,
            bytes: vec![1, 2],
        };
        assert!(filter.matches(&[0, 0, 0, 1, 2]));
        assert!(!filter.matches(&[0, 0, 0, 1]));
        assert!(!filter.matches(&[]));
    }

    #[test]
    fn faucet_respects_configuration() {
        let ledger = ledger_with_clock(0);
        let wallet = Keypair::from_seed([9; 32]).identity();
        assert_eq!(ledger.airdrop(&wallet, 500).unwrap(), 500);
        assert!(matches!(
            ledger.airdrop(&wallet, 2_000_000),
            Err(ProtocolError::FaucetLimitExceeded { .. })
        ));

        let config = LedgerConfig {
            faucet_limit: None,
            ..LedgerConfig::default()
        };
        let closed = Ledger::new(config, Arc::new(SystemClock));
        assert_eq!(closed.airdrop(&wallet, 1), Err(ProtocolError::FaucetDisabled));
    }

    #[test]
    fn snapshot_restores_into_fresh_ledger() {
        let ledger = ledger_with_clock(0);
        let owner = Keypair::from_seed([10; 32]);
        ledger.fund(&owner.identity(), 1_000_000).unwrap();
        ledger.submit(&register(&ledger, &owner, "echo", 0)).unwrap();

        let fresh = ledger_with_clock(0);
        fresh.restore(ledger.snapshot());
        assert_eq!(fresh.snapshot(), ledger.snapshot());
        assert_eq!(fresh.current_slot(), 1);
    }
}
