/// Bytes of bookkeeping charged for every account on top of its data.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Minimum balance an account must hold while it exists. Paid by the creator,
/// returned in full when the account is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserve {
    pub lamports_per_byte: u64,
}

impl Reserve {
    pub fn new(lamports_per_byte: u64) -> Self {
        Self { lamports_per_byte }
    }

    pub fn minimum_balance(&self, space: usize) -> u64 {
        (ACCOUNT_STORAGE_OVERHEAD + space as u64).saturating_mul(self.lamports_per_byte)
    }
}
