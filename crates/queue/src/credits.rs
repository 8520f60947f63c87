//! Credit admission control.

use std::sync::atomic::{AtomicU64, Ordering};

use genq_core::CoreError;

/// External balance that gates job admission.
///
/// `reserve` is called once at enqueue, or again at recovery for jobs
/// still queued. `refund` is called once when a job fails or is cancelled
/// in the process that reserved for it.
pub trait CreditService: Send + Sync {
    /// Take `cost` from the balance or fail with
    /// [`CoreError::InsufficientCredits`] leaving it untouched.
    fn reserve(&self, cost: u64) -> Result<(), CoreError>;

    fn refund(&self, cost: u64);

    fn available(&self) -> u64;
}

/// In-process [`CreditService`] backed by an atomic balance.
#[derive(Debug)]
pub struct CreditLedger {
    balance: AtomicU64,
}

impl CreditLedger {
    pub fn new(balance: u64) -> Self {
        Self {
            balance: AtomicU64::new(balance),
        }
    }

    /// A ledger that never denies admission.
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }
}

impl CreditService for CreditLedger {
    fn reserve(&self, cost: u64) -> Result<(), CoreError> {
        self.balance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(cost))
            .map(|_| ())
            .map_err(|available| CoreError::InsufficientCredits {
                required: cost,
                available,
            })
    }

    fn refund(&self, cost: u64) {
        let _ = self
            .balance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| Some(b.saturating_add(cost)));
    }

    fn available(&self) -> u64 {
        self.balance.load(Ordering::SeqCst)
    }
}
