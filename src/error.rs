//! Ledger error taxonomy

use crate::models::{format_amount, Amount};

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the ledger, the request state machines, the accrual
/// scheduler and the commission cascade.
#[derive(Debug)]
pub enum LedgerError {
    /// A debit would take the balance below zero. Recoverable: the request
    /// that asked for it is left untouched.
    InsufficientFunds {
        user_id: String,
        available: Amount,
        requested: Amount,
    },
    /// The request or event already reached a terminal state.
    AlreadyProcessed {
        entity: &'static str,
        id: String,
        status: String,
    },
    /// The referral chain revisits a user or a link would close a cycle.
    InvalidReferralChain { user_id: String, reason: String },
    /// The underlying store refused the write. Retry with the same key.
    LedgerWriteFailure(rusqlite::Error),
    NotFound { entity: &'static str, id: String },
    InvalidAmount { amount: Amount, reason: String },
    UnknownPlan { plan_id: String },
    /// An entry with this idempotency key was already posted.
    DuplicatePosting { idempotency_key: String },
    SettingsUnavailable(String),
    /// Malformed input that no retry will fix.
    InvalidRequest(String),
}

impl LedgerError {
    /// Busy/locked store errors clear up on their own; everything else needs
    /// a human or a different input.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::LedgerWriteFailure(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFunds {
                user_id,
                available,
                requested,
            } => write!(
                f,
                "Insufficient funds for {}: available {}, requested {}",
                user_id,
                format_amount(*available),
                format_amount(*requested)
            ),
            Self::AlreadyProcessed { entity, id, status } => {
                write!(f, "{} {} already processed (status {})", entity, id, status)
            }
            Self::InvalidReferralChain { user_id, reason } => {
                write!(f, "Invalid referral chain at {}: {}", user_id, reason)
            }
            Self::LedgerWriteFailure(e) => write!(f, "Ledger write failure: {}", e),
            Self::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            Self::InvalidAmount { amount, reason } => {
                write!(f, "Invalid amount {}: {}", format_amount(*amount), reason)
            }
            Self::UnknownPlan { plan_id } => write!(f, "Unknown investment plan {}", plan_id),
            Self::DuplicatePosting { idempotency_key } => {
                write!(f, "Entry {} already posted", idempotency_key)
            }
            Self::SettingsUnavailable(msg) => write!(f, "Settings unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::LedgerWriteFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::LedgerWriteFailure(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_transient() {
        let busy = LedgerError::LedgerWriteFailure(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_transient());

        let missing = LedgerError::not_found("deposit", "d1");
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_display_formats_amounts() {
        let err = LedgerError::InsufficientFunds {
            user_id: "u1".into(),
            available: 30_000,
            requested: 50_000,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds for u1: available 300.00, requested 500.00"
        );
    }
}
