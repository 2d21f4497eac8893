//! Posting: the only path that moves a balance.

use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{accounts, is_constraint};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    format_amount, Amount, Reference, ReferenceType, Transaction, TransactionStatus,
    TransactionType,
};

pub(crate) const TRANSACTION_COLUMNS: &str = "seq, id, user_id, type, amount, balance_after, \
     status, reference_type, reference_id, idempotency_key, created_at";

pub(crate) fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        seq: row.get(0)?,
        id: row.get(1)?,
        user_id: row.get(2)?,
        kind: row.get(3)?,
        amount: row.get(4)?,
        balance_after: row.get(5)?,
        status: row.get(6)?,
        reference: Reference {
            kind: row.get::<_, ReferenceType>(7)?,
            id: row.get(8)?,
        },
        idempotency_key: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// An entry to append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub user_id: String,
    pub kind: TransactionType,
    /// Signed: credits positive, debits negative.
    pub amount: Amount,
    pub reference: Reference,
    /// Second posting with the same key fails with `DuplicatePosting`.
    pub idempotency_key: Option<String>,
}

impl NewEntry {
    pub fn new(user_id: &str, kind: TransactionType, amount: Amount, reference: Reference) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            amount,
            reference,
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// What to do when a debit exceeds the available balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overdraft {
    /// Check before writing; nothing is touched on refusal.
    Reject,
    /// Attempt the write and let the store's `available_balance >= 0`
    /// constraint refuse it. The caller's unit of work then rolls back as a
    /// whole, including anything it already wrote.
    RollbackUnitOfWork,
}

/// Append `entry` and move the account balance by `entry.amount`.
///
/// Must run inside a unit of work; the caller commits.
pub(crate) fn post(conn: &Connection, entry: &NewEntry, overdraft: Overdraft) -> LedgerResult<Transaction> {
    if entry.amount == 0 {
        return Err(LedgerError::InvalidAmount {
            amount: 0,
            reason: "ledger entries must move money".to_string(),
        });
    }

    if let Some(key) = entry.idempotency_key.as_deref() {
        if by_idempotency_key(conn, key)?.is_some() {
            return Err(LedgerError::DuplicatePosting {
                idempotency_key: key.to_string(),
            });
        }
    }

    if overdraft == Overdraft::Reject && entry.amount < 0 {
        let available = accounts::balance(conn, &entry.user_id)?;
        if available + entry.amount < 0 {
            return Err(LedgerError::InsufficientFunds {
                user_id: entry.user_id.clone(),
                available,
                requested: -entry.amount,
            });
        }
    }

    let (deposited_delta, withdrawn_delta) = match entry.kind {
        TransactionType::Deposit => (entry.amount, 0),
        TransactionType::WithdrawalCompleted => (0, -entry.amount),
        TransactionType::WithdrawalRejectedRefund => (0, -entry.amount),
        _ => (0, 0),
    };

    let now = Utc::now();
    let balance_after: Amount = match conn.query_row(
        "UPDATE accounts SET available_balance = available_balance + ?2, \
         total_deposited = total_deposited + ?3, total_withdrawn = total_withdrawn + ?4, \
         updated_at = ?5 WHERE user_id = ?1 RETURNING available_balance",
        params![&entry.user_id, entry.amount, deposited_delta, withdrawn_delta, now],
        |row| row.get(0),
    ) {
        Ok(balance) => balance,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return Err(LedgerError::not_found("account", &entry.user_id));
        }
        Err(e) if is_constraint(&e, ffi::SQLITE_CONSTRAINT_CHECK) => {
            let available = accounts::balance(conn, &entry.user_id)?;
            return Err(LedgerError::InsufficientFunds {
                user_id: entry.user_id.clone(),
                available,
                requested: -entry.amount,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO transactions (id, user_id, type, amount, balance_after, status, \
         reference_type, reference_id, idempotency_key, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &entry.user_id,
            entry.kind,
            entry.amount,
            balance_after,
            TransactionStatus::Completed,
            entry.reference.kind,
            &entry.reference.id,
            entry.idempotency_key.as_deref(),
            now,
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_constraint(&e, ffi::SQLITE_CONSTRAINT_UNIQUE) => {
            return Err(LedgerError::DuplicatePosting {
                idempotency_key: entry.idempotency_key.clone().unwrap_or_default(),
            });
        }
        Err(e) => return Err(e.into()),
    }
    let seq = conn.last_insert_rowid();

    debug!(
        user_id = %entry.user_id,
        kind = %entry.kind,
        amount = %format_amount(entry.amount),
        balance_after = %format_amount(balance_after),
        "ledger entry posted"
    );

    Ok(Transaction {
        id,
        seq,
        user_id: entry.user_id.clone(),
        kind: entry.kind,
        amount: entry.amount,
        balance_after,
        status: TransactionStatus::Completed,
        reference: entry.reference.clone(),
        idempotency_key: entry.idempotency_key.clone(),
        created_at: now,
    })
}

pub(crate) fn by_idempotency_key(conn: &Connection, key: &str) -> LedgerResult<Option<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE idempotency_key = ?1",
        TRANSACTION_COLUMNS
    );
    Ok(conn.query_row(&sql, [key], row_to_transaction).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LedgerStore;

    fn funded_store(user: &str, amount: Amount) -> LedgerStore {
        let store = LedgerStore::open_memory().unwrap();
        store.open_account(user, None).unwrap();
        store
            .post_transaction(
                NewEntry::new(
                    user,
                    TransactionType::Deposit,
                    amount,
                    Reference::new(ReferenceType::Manual, "seed"),
                ),
                Overdraft::Reject,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_credit_moves_balance_and_totals() {
        let store = funded_store("u1", 100_000);
        let account = store.account("u1").unwrap();
        assert_eq!(account.available_balance, 100_000);
        assert_eq!(account.total_deposited, 100_000);

        let page = store.transaction_history("u1", None, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].balance_after, 100_000);
        assert_eq!(page.entries[0].status, TransactionStatus::Completed);
    }

    #[test]
    fn test_reject_overdraft_leaves_nothing_behind() {
        let store = funded_store("u1", 30_000);
        let err = store
            .post_transaction(
                NewEntry::new(
                    "u1",
                    TransactionType::Game,
                    -50_000,
                    Reference::new(ReferenceType::Game, "round-1"),
                ),
                Overdraft::Reject,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { available: 30_000, requested: 50_000, .. }
        ));
        assert_eq!(store.balance("u1").unwrap(), 30_000);
        assert_eq!(store.transaction_history("u1", None, 10).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_store_constraint_rolls_back_unit_of_work() {
        let store = funded_store("u1", 30_000);

        // A credit followed by an overdrawing debit in one unit: both vanish.
        let result = store.unit_of_work(|tx| {
            post(
                tx,
                &NewEntry::new(
                    "u1",
                    TransactionType::Game,
                    1_000,
                    Reference::new(ReferenceType::Game, "win"),
                ),
                Overdraft::RollbackUnitOfWork,
            )?;
            post(
                tx,
                &NewEntry::new(
                    "u1",
                    TransactionType::Game,
                    -50_000,
                    Reference::new(ReferenceType::Game, "loss"),
                ),
                Overdraft::RollbackUnitOfWork,
            )
        });

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { available: 31_000, .. })
        ));
        assert_eq!(store.balance("u1").unwrap(), 30_000);
        assert_eq!(store.transaction_history("u1", None, 10).unwrap().entries.len(), 1);
        assert!(store.reconcile().unwrap().is_clean());
    }

    #[test]
    fn test_idempotency_key_blocks_second_posting() {
        let store = funded_store("u1", 10_000);
        let entry = NewEntry::new(
            "u1",
            TransactionType::SignupBonus,
            500,
            Reference::new(ReferenceType::Signup, "u1"),
        )
        .with_key("signup-bonus:u1");

        store.post_transaction(entry.clone(), Overdraft::Reject).unwrap();
        let err = store.post_transaction(entry, Overdraft::Reject).unwrap_err();

        assert!(matches!(err, LedgerError::DuplicatePosting { .. }));
        assert_eq!(store.balance("u1").unwrap(), 10_500);
        assert!(store.transaction_by_key("signup-bonus:u1").unwrap().is_some());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let store = funded_store("u1", 10_000);
        let err = store
            .post_transaction(
                NewEntry::new(
                    "u1",
                    TransactionType::Game,
                    0,
                    Reference::new(ReferenceType::Game, "noop"),
                ),
                Overdraft::Reject,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }

    #[test]
    fn test_unknown_account() {
        let store = LedgerStore::open_memory().unwrap();
        let err = store
            .post_transaction(
                NewEntry::new(
                    "ghost",
                    TransactionType::Deposit,
                    100,
                    Reference::new(ReferenceType::Manual, "x"),
                ),
                Overdraft::RollbackUnitOfWork,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }
}
