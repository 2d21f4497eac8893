//! Deposit lifecycle: `pending -> approved | rejected`, both terminal.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{require_admin, require_positive};
use crate::commission::{CascadeReport, CascadeTrigger, CommissionEngine};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    format_amount, Amount, DepositRequest, DepositStatus, Reference, ReferenceType, Transaction,
    TransactionType,
};
use crate::notify::{notify, Notification, NotificationSink};
use crate::store::{accounts, postings, requests, LedgerStore, NewEntry, Overdraft};

/// Result of approving a deposit. The credit is committed before the cascade
/// runs; whatever the cascade reports, the deposit stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositApproval {
    pub deposit: DepositRequest,
    pub transaction: Transaction,
    pub cascade: CascadeReport,
}

#[derive(Clone)]
pub struct DepositDesk {
    store: Arc<LedgerStore>,
    commissions: CommissionEngine,
    notifier: Arc<dyn NotificationSink>,
}

impl DepositDesk {
    pub fn new(
        store: Arc<LedgerStore>,
        commissions: CommissionEngine,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            commissions,
            notifier,
        }
    }

    /// Record a user's deposit claim. No balance effect.
    pub fn submit(
        &self,
        user_id: &str,
        amount: Amount,
        proof_url: Option<&str>,
    ) -> LedgerResult<DepositRequest> {
        require_positive(amount)?;
        let id = Uuid::new_v4().to_string();
        let deposit = self.store.unit_of_work(|tx| {
            if !accounts::exists(tx, user_id)? {
                return Err(LedgerError::not_found("account", user_id));
            }
            requests::insert_deposit(tx, &id, user_id, amount, proof_url, Utc::now())
        })?;

        info!(deposit_id = %deposit.id, user_id = %user_id, amount = %format_amount(amount), "📥 Deposit submitted");
        Ok(deposit)
    }

    /// Credit the depositor, close the request, then run the commission cascade.
    pub fn approve(&self, deposit_id: &str, admin_id: &str) -> LedgerResult<DepositApproval> {
        require_admin(admin_id)?;

        let result = self.store.unit_of_work(|tx| {
            let deposit = requests::get_deposit(tx, deposit_id)?;
            if deposit.status != DepositStatus::Pending {
                return Err(already_processed(&deposit));
            }

            let entry = NewEntry::new(
                &deposit.user_id,
                TransactionType::Deposit,
                deposit.amount,
                Reference::new(ReferenceType::DepositRequest, deposit_id),
            )
            .with_key(format!("deposit:{}", deposit_id));
            let transaction = postings::post(tx, &entry, Overdraft::Reject)?;

            let now = Utc::now();
            if !requests::finish_deposit(tx, deposit_id, DepositStatus::Approved, admin_id, now)? {
                return Err(already_processed(&requests::get_deposit(tx, deposit_id)?));
            }

            let deposit = DepositRequest {
                status: DepositStatus::Approved,
                processed_at: Some(now),
                processed_by: Some(admin_id.to_string()),
                ..deposit
            };
            Ok((deposit, transaction))
        });

        let (deposit, transaction) = match result {
            Ok(v) => v,
            Err(e @ LedgerError::AlreadyProcessed { .. }) => {
                warn!(deposit_id = %deposit_id, admin_id = %admin_id, "{}", e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(
            deposit_id = %deposit.id,
            user_id = %deposit.user_id,
            amount = %format_amount(deposit.amount),
            balance = %format_amount(transaction.balance_after),
            admin_id = %admin_id,
            "✅ Deposit approved"
        );
        notify(
            self.notifier.as_ref(),
            Notification::personal(
                &deposit.user_id,
                "Deposit approved",
                format!("{} has been credited to your balance", format_amount(deposit.amount)),
            ),
        );

        let cascade = self.commissions.cascade(&CascadeTrigger::deposit(
            &deposit.user_id,
            deposit.amount,
            &deposit.id,
        ));

        Ok(DepositApproval {
            deposit,
            transaction,
            cascade,
        })
    }

    /// Close the request without touching any balance.
    pub fn reject(&self, deposit_id: &str, admin_id: &str) -> LedgerResult<DepositRequest> {
        require_admin(admin_id)?;

        let deposit = self.store.unit_of_work(|tx| {
            let deposit = requests::get_deposit(tx, deposit_id)?;
            if deposit.status != DepositStatus::Pending {
                return Err(already_processed(&deposit));
            }
            let now = Utc::now();
            if !requests::finish_deposit(tx, deposit_id, DepositStatus::Rejected, admin_id, now)? {
                return Err(already_processed(&requests::get_deposit(tx, deposit_id)?));
            }
            Ok(DepositRequest {
                status: DepositStatus::Rejected,
                processed_at: Some(now),
                processed_by: Some(admin_id.to_string()),
                ..deposit
            })
        })?;

        info!(deposit_id = %deposit.id, admin_id = %admin_id, "❌ Deposit rejected");
        notify(
            self.notifier.as_ref(),
            Notification::personal(
                &deposit.user_id,
                "Deposit rejected",
                format!("Your deposit of {} was rejected", format_amount(deposit.amount)),
            ),
        );
        Ok(deposit)
    }

    /// Re-run the cascade for an approved deposit. Only unpaid levels pay.
    pub fn retry_commissions(&self, deposit_id: &str) -> LedgerResult<CascadeReport> {
        let deposit = self.store.deposit(deposit_id)?;
        if deposit.status != DepositStatus::Approved {
            return Err(LedgerError::InvalidRequest(format!(
                "deposit {} is {}, commissions are only paid on approved deposits",
                deposit_id, deposit.status
            )));
        }
        info!(deposit_id = %deposit_id, "🔁 Retrying commission cascade");
        Ok(self.commissions.cascade(&CascadeTrigger::deposit(
            &deposit.user_id,
            deposit.amount,
            &deposit.id,
        )))
    }
}

fn already_processed(deposit: &DepositRequest) -> LedgerError {
    LedgerError::AlreadyProcessed {
        entity: "deposit",
        id: deposit.id.clone(),
        status: deposit.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CascadeTermination;
    use crate::models::Rate;
    use crate::notify::NullNotifier;
    use crate::settings::{ReferralSettings, StaticSettings};

    fn desk(referral: ReferralSettings) -> (Arc<LedgerStore>, DepositDesk) {
        let store = Arc::new(LedgerStore::open_memory().unwrap());
        let notifier: Arc<dyn NotificationSink> = Arc::new(NullNotifier);
        let settings = Arc::new(StaticSettings::new(referral, Vec::new()));
        let engine = CommissionEngine::new(store.clone(), settings, notifier.clone());
        (store.clone(), DepositDesk::new(store, engine, notifier))
    }

    #[test]
    fn test_submit_has_no_balance_effect() {
        let (store, desk) = desk(ReferralSettings::disabled());
        store.open_account("u1", None).unwrap();

        let deposit = desk.submit("u1", 100_000, Some("https://proof/d1")).unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert_eq!(store.balance("u1").unwrap(), 0);
        assert_eq!(store.deposit(&deposit.id).unwrap().proof_url.as_deref(), Some("https://proof/d1"));
    }

    #[test]
    fn test_submit_validation() {
        let (store, desk) = desk(ReferralSettings::disabled());
        store.open_account("u1", None).unwrap();

        assert!(matches!(desk.submit("u1", 0, None), Err(LedgerError::InvalidAmount { .. })));
        assert!(matches!(desk.submit("u1", -5, None), Err(LedgerError::InvalidAmount { .. })));
        assert!(matches!(desk.submit("nobody", 100, None), Err(LedgerError::NotFound { .. })));
    }

    #[test]
    fn test_approve_credits_and_is_terminal() {
        let (store, desk) = desk(ReferralSettings::disabled());
        store.open_account("u1", None).unwrap();
        let deposit = desk.submit("u1", 100_000, None).unwrap();

        let approval = desk.approve(&deposit.id, "admin-1").unwrap();
        assert_eq!(approval.deposit.status, DepositStatus::Approved);
        assert_eq!(approval.deposit.processed_by.as_deref(), Some("admin-1"));
        assert_eq!(approval.transaction.amount, 100_000);
        assert_eq!(approval.cascade.termination, CascadeTermination::ReferralDisabled);

        let account = store.account("u1").unwrap();
        assert_eq!(account.available_balance, 100_000);
        assert_eq!(account.total_deposited, 100_000);

        assert!(matches!(
            desk.approve(&deposit.id, "admin-2"),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
        assert!(matches!(
            desk.reject(&deposit.id, "admin-2"),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
        assert_eq!(store.balance("u1").unwrap(), 100_000);
    }

    #[test]
    fn test_reject_never_credits() {
        let (store, desk) = desk(ReferralSettings::disabled());
        store.open_account("u1", None).unwrap();
        let deposit = desk.submit("u1", 100_000, None).unwrap();

        let rejected = desk.reject(&deposit.id, "admin-1").unwrap();
        assert_eq!(rejected.status, DepositStatus::Rejected);
        assert_eq!(store.balance("u1").unwrap(), 0);
        assert!(matches!(
            desk.approve(&deposit.id, "admin-1"),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
    }

    #[test]
    fn test_unknown_deposit() {
        let (_store, desk) = desk(ReferralSettings::disabled());
        assert!(matches!(
            desk.approve("missing", "admin"),
            Err(LedgerError::NotFound { entity: "deposit", .. })
        ));
    }

    #[test]
    fn test_retry_commissions_fills_missing_levels() {
        let mut referral = ReferralSettings::disabled();
        let (store, desk) = desk(referral.clone());
        store.open_account("A", None).unwrap();
        store.open_account("U", Some("A")).unwrap();
        let deposit = desk.submit("U", 100_000, None).unwrap();

        // Approved while the program was off: nothing paid.
        desk.approve(&deposit.id, "admin").unwrap();
        assert_eq!(store.balance("A").unwrap(), 0);

        referral.enabled = true;
        referral.max_levels = 1;
        referral.level_rates.insert(1, Rate::from_percent(5.0));
        let settings = Arc::new(StaticSettings::new(referral, Vec::new()));
        let notifier: Arc<dyn NotificationSink> = Arc::new(NullNotifier);
        let desk = DepositDesk::new(
            store.clone(),
            CommissionEngine::new(store.clone(), settings, notifier.clone()),
            notifier,
        );

        let report = desk.retry_commissions(&deposit.id).unwrap();
        assert_eq!(report.paid.len(), 1);
        assert_eq!(store.balance("A").unwrap(), 5_000);

        let again = desk.retry_commissions(&deposit.id).unwrap();
        assert!(again.paid.is_empty());
        assert_eq!(store.balance("A").unwrap(), 5_000);
    }

    #[test]
    fn test_retry_commissions_requires_approval() {
        let (store, desk) = desk(ReferralSettings::disabled());
        store.open_account("u1", None).unwrap();
        let deposit = desk.submit("u1", 100, None).unwrap();
        assert!(matches!(
            desk.retry_commissions(&deposit.id),
            Err(LedgerError::InvalidRequest(_))
        ));
    }
}
