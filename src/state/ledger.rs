/// Local credit ledger
///
/// Debits are applied optimistically at submission time and remembered per
/// job so a failure refunds exactly what was charged, once. Authoritative
/// balance pushes from the catalog service overwrite the local value.

use std::collections::HashMap;

use tracing::{debug, info};

use super::data::Credits;

/// Account role; unlimited accounts are never charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Standard,
    Unlimited,
}

/// What happened when a job was charged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    Charged(Credits),
    /// No credit was taken, so nothing may be refunded
    Waived,
}

/// Authoritative balance pushed by the persistence service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub balance: Credits,
    pub role: Role,
}

#[derive(Debug, Clone, Default)]
pub struct CreditLedger {
    balance: Credits,
    role: Role,
    /// Outstanding debits keyed by job id
    pending: HashMap<String, Credits>,
}

impl CreditLedger {
    pub fn new(balance: Credits, role: Role) -> Self {
        Self {
            balance,
            role,
            pending: HashMap::new(),
        }
    }

    pub fn balance(&self) -> Credits {
        self.balance
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn can_afford(&self, cost: Credits) -> bool {
        self.role == Role::Unlimited || self.balance >= cost
    }

    pub fn debit(&mut self, job_id: &str, cost: Credits) -> Debit {
        if self.role == Role::Unlimited {
            debug!("Debit waived for job {} (unlimited role)", job_id);
            return Debit::Waived;
        }
        self.balance = self.balance - cost;
        self.pending.insert(job_id.to_string(), cost);
        info!("💳 Debited {} for job {}, balance {}", cost, job_id, self.balance);
        Debit::Charged(cost)
    }

    /// Return the credit charged for `job_id`. Repeated calls are no-ops.
    pub fn refund(&mut self, job_id: &str) -> Option<Credits> {
        let amount = self.pending.remove(job_id)?;
        self.balance = self.balance + amount;
        info!("↩️  Refunded {} for job {}, balance {}", amount, job_id, self.balance);
        Some(amount)
    }

    /// Forget the pending debit of a job that completed
    pub fn settle(&mut self, job_id: &str) {
        self.pending.remove(job_id);
    }

    pub fn has_pending(&self, job_id: &str) -> bool {
        self.pending.contains_key(job_id)
    }

    pub fn apply(&mut self, update: LedgerUpdate) {
        if update.balance != self.balance || update.role != self.role {
            debug!(
                "Authoritative ledger update: {} -> {} ({:?})",
                self.balance, update.balance, update.role
            );
        }
        self.balance = update.balance;
        self.role = update.role;
    }
}
