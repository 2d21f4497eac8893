//! Wallet Engine
//!
//! One handle over the ledger store and every service built on it. This is
//! the surface the admin back office, user-facing flows and `ledgerd` call.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;

use crate::commission::{CascadeReport, CommissionEngine};
use crate::config::{EngineConfig, DEFAULT_HISTORY_PAGE_SIZE};
use crate::error::LedgerResult;
use crate::investment::{AccrualReport, AccrualScheduler, InvestmentBook};
use crate::models::{
    Account, Amount, DepositRequest, InvestmentPosition, Transaction, WithdrawalRequest,
};
use crate::notify::NotificationSink;
use crate::onboarding::{Onboarding, Registration};
use crate::requests::{DepositApproval, DepositDesk, WithdrawalApproval, WithdrawalDesk};
use crate::settings::SettingsProvider;
use crate::store::{HistoryCursor, HistoryIter, HistoryPage, LedgerStore, ReconciliationReport};

#[derive(Clone)]
pub struct WalletEngine {
    store: Arc<LedgerStore>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
    onboarding: Onboarding,
    deposits: DepositDesk,
    withdrawals: WithdrawalDesk,
    investments: InvestmentBook,
    accrual: AccrualScheduler,
    commissions: CommissionEngine,
    history_page_size: usize,
}

impl WalletEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let commissions = CommissionEngine::new(store.clone(), settings.clone(), notifier.clone());
        Self {
            onboarding: Onboarding::new(store.clone(), settings.clone(), notifier.clone()),
            deposits: DepositDesk::new(store.clone(), commissions.clone(), notifier.clone()),
            withdrawals: WithdrawalDesk::new(store.clone(), notifier.clone()),
            investments: InvestmentBook::new(store.clone(), settings.clone(), notifier.clone()),
            accrual: AccrualScheduler::new(store.clone(), notifier.clone()),
            commissions,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            store,
            settings,
            notifier,
        }
    }

    /// Open the store and settings named by `config`.
    pub fn from_config(config: &EngineConfig, notifier: Arc<dyn NotificationSink>) -> Result<Self> {
        let store = Arc::new(
            LedgerStore::open(&config.db_path, &config.store_options())
                .context("Failed to open ledger store")?,
        );
        let settings: Arc<dyn SettingsProvider> = Arc::new(config.load_settings()?);
        Ok(Self::new(store, settings, notifier)
            .with_commission_write_attempts(config.commission_write_attempts)
            .with_history_page_size(config.history_page_size))
    }

    pub fn with_commission_write_attempts(mut self, attempts: u32) -> Self {
        self.commissions = self.commissions.with_write_attempts(attempts);
        self.deposits = DepositDesk::new(
            self.store.clone(),
            self.commissions.clone(),
            self.notifier.clone(),
        );
        self
    }

    pub fn with_history_page_size(mut self, page_size: usize) -> Self {
        self.history_page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<dyn SettingsProvider> {
        &self.settings
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    pub fn register_user(&self, user_id: &str, referred_by: Option<&str>) -> LedgerResult<Registration> {
        self.onboarding.register_user(user_id, referred_by)
    }

    pub fn link_referrer(&self, user_id: &str, referrer_id: &str) -> LedgerResult<Account> {
        self.onboarding.link_referrer(user_id, referrer_id)
    }

    pub fn get_account(&self, user_id: &str) -> LedgerResult<Account> {
        self.store.account(user_id)
    }

    pub fn get_balance(&self, user_id: &str) -> LedgerResult<Amount> {
        self.store.balance(user_id)
    }

    // -------------------------------------------------------------------------
    // Deposits
    // -------------------------------------------------------------------------

    pub fn submit_deposit(
        &self,
        user_id: &str,
        amount: Amount,
        proof_url: Option<&str>,
    ) -> LedgerResult<DepositRequest> {
        self.deposits.submit(user_id, amount, proof_url)
    }

    pub fn approve_deposit(&self, deposit_id: &str, admin_id: &str) -> LedgerResult<DepositApproval> {
        self.deposits.approve(deposit_id, admin_id)
    }

    pub fn reject_deposit(&self, deposit_id: &str, admin_id: &str) -> LedgerResult<DepositRequest> {
        self.deposits.reject(deposit_id, admin_id)
    }

    pub fn retry_commissions(&self, deposit_id: &str) -> LedgerResult<CascadeReport> {
        self.deposits.retry_commissions(deposit_id)
    }

    // -------------------------------------------------------------------------
    // Withdrawals
    // -------------------------------------------------------------------------

    pub fn submit_withdrawal(&self, user_id: &str, amount: Amount) -> LedgerResult<WithdrawalRequest> {
        self.withdrawals.submit(user_id, amount)
    }

    pub fn approve_withdrawal(
        &self,
        withdrawal_id: &str,
        admin_id: &str,
    ) -> LedgerResult<WithdrawalApproval> {
        self.withdrawals.approve(withdrawal_id, admin_id)
    }

    pub fn reject_withdrawal(&self, withdrawal_id: &str, admin_id: &str) -> LedgerResult<WithdrawalRequest> {
        self.withdrawals.reject(withdrawal_id, admin_id)
    }

    pub fn reverse_withdrawal(&self, withdrawal_id: &str, admin_id: &str) -> LedgerResult<Transaction> {
        self.withdrawals.reverse(withdrawal_id, admin_id)
    }

    // -------------------------------------------------------------------------
    // Investments
    // -------------------------------------------------------------------------

    pub fn open_investment(
        &self,
        user_id: &str,
        plan_id: &str,
        principal: Amount,
        start_date: NaiveDate,
    ) -> LedgerResult<InvestmentPosition> {
        self.investments
            .open_investment(user_id, plan_id, principal, start_date)
    }

    pub fn run_daily_accrual(&self, as_of: NaiveDate) -> LedgerResult<AccrualReport> {
        self.accrual.run_daily_accrual(as_of)
    }

    pub fn run_accrual_range(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<Vec<AccrualReport>> {
        self.accrual.run_accrual_range(from, to)
    }

    // -------------------------------------------------------------------------
    // History and reconciliation
    // -------------------------------------------------------------------------

    /// One page of history, newest first. `limit` defaults to the configured
    /// page size.
    pub fn get_transaction_history(
        &self,
        user_id: &str,
        cursor: Option<HistoryCursor>,
        limit: Option<usize>,
    ) -> LedgerResult<HistoryPage> {
        self.store
            .transaction_history(user_id, cursor, limit.unwrap_or(self.history_page_size))
    }

    pub fn history_iter(&self, user_id: &str) -> HistoryIter<'_> {
        self.store.history_iter(user_id, self.history_page_size)
    }

    pub fn reconcile(&self) -> LedgerResult<ReconciliationReport> {
        self.store.reconcile()
    }
}
