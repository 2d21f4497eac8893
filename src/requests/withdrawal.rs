//! Withdrawal lifecycle: `pending -> completed | failed`, both terminal.
//!
//! Funds are checked at approval, not at submission. A request that the
//! balance cannot cover stays `pending` until an admin acts on it again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{require_admin, require_positive};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    format_amount, Amount, Reference, ReferenceType, Transaction, TransactionType,
    WithdrawalRequest, WithdrawalStatus,
};
use crate::notify::{notify, Notification, NotificationSink};
use crate::store::{accounts, postings, requests, LedgerStore, NewEntry, Overdraft};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalApproval {
    pub withdrawal: WithdrawalRequest,
    pub transaction: Transaction,
}

#[derive(Clone)]
pub struct WithdrawalDesk {
    store: Arc<LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl WithdrawalDesk {
    pub fn new(store: Arc<LedgerStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { store, notifier }
    }

    /// Record a withdrawal request. The balance is neither checked nor held.
    pub fn submit(&self, user_id: &str, amount: Amount) -> LedgerResult<WithdrawalRequest> {
        require_positive(amount)?;
        let id = Uuid::new_v4().to_string();
        let withdrawal = self.store.unit_of_work(|tx| {
            if !accounts::exists(tx, user_id)? {
                return Err(LedgerError::not_found("account", user_id));
            }
            requests::insert_withdrawal(tx, &id, user_id, amount, Utc::now())
        })?;

        info!(withdrawal_id = %withdrawal.id, user_id = %user_id, amount = %format_amount(amount), "📤 Withdrawal submitted");
        Ok(withdrawal)
    }

    /// Debit the requester and complete the request.
    ///
    /// Fails with `InsufficientFunds` when the balance no longer covers the
    /// amount; the request is left `pending` and nothing is written.
    pub fn approve(&self, withdrawal_id: &str, admin_id: &str) -> LedgerResult<WithdrawalApproval> {
        require_admin(admin_id)?;

        let result = self.store.unit_of_work(|tx| {
            let withdrawal = requests::get_withdrawal(tx, withdrawal_id)?;
            if withdrawal.status != WithdrawalStatus::Pending {
                return Err(already_processed(&withdrawal));
            }

            let entry = NewEntry::new(
                &withdrawal.user_id,
                TransactionType::WithdrawalCompleted,
                -withdrawal.amount,
                Reference::new(ReferenceType::WithdrawalRequest, withdrawal_id),
            )
            .with_key(format!("withdrawal:{}", withdrawal_id));
            // The debit is attempted first; the store's non-negative balance
            // constraint refuses it and the whole unit rolls back.
            let transaction = postings::post(tx, &entry, Overdraft::RollbackUnitOfWork)?;

            let now = Utc::now();
            if !requests::finish_withdrawal(tx, withdrawal_id, WithdrawalStatus::Completed, admin_id, now)? {
                return Err(already_processed(&requests::get_withdrawal(tx, withdrawal_id)?));
            }

            Ok(WithdrawalApproval {
                withdrawal: WithdrawalRequest {
                    status: WithdrawalStatus::Completed,
                    processed_at: Some(now),
                    processed_by: Some(admin_id.to_string()),
                    ..withdrawal
                },
                transaction,
            })
        });

        let approval = match result {
            Ok(approval) => approval,
            Err(e @ LedgerError::InsufficientFunds { .. }) => {
                warn!(withdrawal_id = %withdrawal_id, admin_id = %admin_id, "{}; request left pending", e);
                return Err(e);
            }
            Err(e @ LedgerError::AlreadyProcessed { .. }) => {
                warn!(withdrawal_id = %withdrawal_id, admin_id = %admin_id, "{}", e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let w = &approval.withdrawal;
        info!(
            withdrawal_id = %w.id,
            user_id = %w.user_id,
            amount = %format_amount(w.amount),
            balance = %format_amount(approval.transaction.balance_after),
            admin_id = %admin_id,
            "✅ Withdrawal completed"
        );
        notify(
            self.notifier.as_ref(),
            Notification::personal(
                &w.user_id,
                "Withdrawal completed",
                format!("{} has been paid out", format_amount(w.amount)),
            ),
        );
        Ok(approval)
    }

    /// Refuse the request. Nothing was debited, so nothing is refunded.
    pub fn reject(&self, withdrawal_id: &str, admin_id: &str) -> LedgerResult<WithdrawalRequest> {
        require_admin(admin_id)?;

        let withdrawal = self.store.unit_of_work(|tx| {
            let withdrawal = requests::get_withdrawal(tx, withdrawal_id)?;
            if withdrawal.status != WithdrawalStatus::Pending {
                return Err(already_processed(&withdrawal));
            }
            let now = Utc::now();
            if !requests::finish_withdrawal(tx, withdrawal_id, WithdrawalStatus::Failed, admin_id, now)? {
                return Err(already_processed(&requests::get_withdrawal(tx, withdrawal_id)?));
            }
            Ok(WithdrawalRequest {
                status: WithdrawalStatus::Failed,
                processed_at: Some(now),
                processed_by: Some(admin_id.to_string()),
                ..withdrawal
            })
        })?;

        info!(withdrawal_id = %withdrawal.id, admin_id = %admin_id, "❌ Withdrawal rejected");
        notify(
            self.notifier.as_ref(),
            Notification::personal(
                &withdrawal.user_id,
                "Withdrawal rejected",
                format!("Your withdrawal of {} was rejected", format_amount(withdrawal.amount)),
            ),
        );
        Ok(withdrawal)
    }

    /// Refund a completed withdrawal with an offsetting credit.
    ///
    /// The request keeps its `completed` status; the refund entry points back
    /// at it. A withdrawal can be reversed once.
    pub fn reverse(&self, withdrawal_id: &str, admin_id: &str) -> LedgerResult<Transaction> {
        require_admin(admin_id)?;

        let key = format!("withdrawal-refund:{}", withdrawal_id);
        let result = self.store.unit_of_work(|tx| {
            let withdrawal = requests::get_withdrawal(tx, withdrawal_id)?;
            if withdrawal.status != WithdrawalStatus::Completed {
                return Err(LedgerError::InvalidRequest(format!(
                    "withdrawal {} is {}; only completed withdrawals can be reversed",
                    withdrawal_id, withdrawal.status
                )));
            }
            let entry = NewEntry::new(
                &withdrawal.user_id,
                TransactionType::WithdrawalRejectedRefund,
                withdrawal.amount,
                Reference::new(ReferenceType::WithdrawalRequest, withdrawal_id),
            )
            .with_key(key.as_str());
            postings::post(tx, &entry, Overdraft::Reject)
        });

        let refund = match result {
            Ok(t) => t,
            Err(LedgerError::DuplicatePosting { .. }) => {
                let e = LedgerError::AlreadyProcessed {
                    entity: "withdrawal",
                    id: withdrawal_id.to_string(),
                    status: "reversed".to_string(),
                };
                warn!(withdrawal_id = %withdrawal_id, admin_id = %admin_id, "{}", e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(
            withdrawal_id = %withdrawal_id,
            user_id = %refund.user_id,
            amount = %format_amount(refund.amount),
            admin_id = %admin_id,
            "↩️ Withdrawal reversed"
        );
        notify(
            self.notifier.as_ref(),
            Notification::personal(
                &refund.user_id,
                "Withdrawal refunded",
                format!("{} has been returned to your balance", format_amount(refund.amount)),
            ),
        );
        Ok(refund)
    }
}

fn already_processed(withdrawal: &WithdrawalRequest) -> LedgerError {
    LedgerError::AlreadyProcessed {
        entity: "withdrawal",
        id: withdrawal.id.clone(),
        status: withdrawal.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;

    fn funded(balance: Amount) -> (Arc<LedgerStore>, WithdrawalDesk) {
        let store = Arc::new(LedgerStore::open_memory().unwrap());
        store.open_account("u1", None).unwrap();
        if balance > 0 {
            store
                .post_transaction(
                    NewEntry::new(
                        "u1",
                        TransactionType::Deposit,
                        balance,
                        Reference::new(ReferenceType::Manual, "seed"),
                    ),
                    Overdraft::Reject,
                )
                .unwrap();
        }
        (store.clone(), WithdrawalDesk::new(store, Arc::new(NullNotifier)))
    }

    #[test]
    fn test_submit_does_not_check_balance() {
        let (store, desk) = funded(0);
        let w = desk.submit("u1", 1_000_000).unwrap();
        assert_eq!(w.status, WithdrawalStatus::Pending);
        assert_eq!(store.balance("u1").unwrap(), 0);
    }

    #[test]
    fn test_approve_debits_and_counts_withdrawn() {
        let (store, desk) = funded(100_000);
        let w = desk.submit("u1", 40_000).unwrap();

        let approval = desk.approve(&w.id, "admin").unwrap();
        assert_eq!(approval.transaction.amount, -40_000);
        assert_eq!(approval.transaction.balance_after, 60_000);
        assert_eq!(approval.withdrawal.status, WithdrawalStatus::Completed);

        let account = store.account("u1").unwrap();
        assert_eq!(account.available_balance, 60_000);
        assert_eq!(account.total_withdrawn, 40_000);

        assert!(matches!(
            desk.approve(&w.id, "admin"),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
        assert_eq!(store.balance("u1").unwrap(), 60_000);
    }

    #[test]
    fn test_insufficient_funds_leaves_request_pending() {
        let (store, desk) = funded(30_000);
        let w = desk.submit("u1", 50_000).unwrap();

        let err = desk.approve(&w.id, "admin").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { available: 30_000, requested: 50_000, .. }
        ));
        assert_eq!(store.withdrawal(&w.id).unwrap().status, WithdrawalStatus::Pending);
        assert_eq!(store.balance("u1").unwrap(), 30_000);
        assert_eq!(store.transaction_history("u1", None, 10).unwrap().entries.len(), 1);

        // Once funded, the same request goes through.
        store
            .post_transaction(
                NewEntry::new(
                    "u1",
                    TransactionType::Deposit,
                    20_000,
                    Reference::new(ReferenceType::Manual, "top-up"),
                ),
                Overdraft::Reject,
            )
            .unwrap();
        desk.approve(&w.id, "admin").unwrap();
        assert_eq!(store.balance("u1").unwrap(), 0);
    }

    #[test]
    fn test_rejected_withdrawal_is_terminal() {
        let (store, desk) = funded(100_000);
        let w = desk.submit("u1", 10_000).unwrap();

        let rejected = desk.reject(&w.id, "admin").unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Failed);
        assert_eq!(store.balance("u1").unwrap(), 100_000);

        assert!(matches!(
            desk.approve(&w.id, "admin"),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
        assert!(matches!(desk.reverse(&w.id, "admin"), Err(LedgerError::InvalidRequest(_))));
    }

    #[test]
    fn test_reverse_refunds_once() {
        let (store, desk) = funded(100_000);
        let w = desk.submit("u1", 40_000).unwrap();
        desk.approve(&w.id, "admin").unwrap();

        let refund = desk.reverse(&w.id, "admin").unwrap();
        assert_eq!(refund.kind, TransactionType::WithdrawalRejectedRefund);
        assert_eq!(refund.amount, 40_000);

        let account = store.account("u1").unwrap();
        assert_eq!(account.available_balance, 100_000);
        assert_eq!(account.total_withdrawn, 0);
        assert_eq!(store.withdrawal(&w.id).unwrap().status, WithdrawalStatus::Completed);

        assert!(matches!(
            desk.reverse(&w.id, "admin"),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
        assert_eq!(store.balance("u1").unwrap(), 100_000);
        assert!(store.reconcile().unwrap().is_clean());
    }

    #[test]
    fn test_admin_id_required() {
        let (_store, desk) = funded(100_000);
        let w = desk.submit("u1", 100).unwrap();
        assert!(matches!(desk.approve(&w.id, "  "), Err(LedgerError::InvalidRequest(_))));
    }
}
