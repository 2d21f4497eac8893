//! Request State Machines
//!
//! Deposits credit on approval; withdrawals debit on approval. Nothing is
//! reserved at submission time, so every approval re-reads the request and
//! the balance inside its own unit of work.

pub mod deposit;
pub mod withdrawal;

pub use deposit::{DepositApproval, DepositDesk};
pub use withdrawal::{WithdrawalApproval, WithdrawalDesk};

use crate::error::{LedgerError, LedgerResult};
use crate::models::Amount;

fn require_positive(amount: Amount) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: "requests must be for a positive amount".to_string(),
        });
    }
    Ok(())
}

fn require_admin(admin_id: &str) -> LedgerResult<()> {
    if admin_id.trim().is_empty() {
        return Err(LedgerError::InvalidRequest(
            "an admin id is required to process a request".to_string(),
        ));
    }
    Ok(())
}
