//! Ledger Store
//!
//! Durable record of accounts and immutable ledger entries, backed by SQLite.
//!
//! Every balance change goes through `postings::post`, which appends a
//! `transactions` row and moves `accounts.available_balance` in the same
//! statement batch. Callers group postings and request/position updates into
//! a unit of work (`BEGIN IMMEDIATE`), so concurrent operators serialize on
//! the store's write lock rather than on anything in-process.

pub mod accounts;
pub mod commissions;
pub mod history;
pub mod positions;
pub mod postings;
pub mod reconcile;
pub mod requests;
pub mod schema;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Account, Amount, CommissionRecord, DepositRequest, DepositStatus, InvestmentPosition,
    Transaction, TriggerType, WithdrawalRequest, WithdrawalStatus,
};

pub use history::{HistoryCursor, HistoryIter, HistoryPage};
pub use postings::{NewEntry, Overdraft};
pub use reconcile::{BalanceMismatch, ReconciliationReport};
pub use schema::SCHEMA_SQL;

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a unit of work waits for another writer before failing busy.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    /// Open or create the ledger database at `db_path`.
    pub fn open(db_path: &str, options: &StoreOptions) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open ledger database at {}", db_path))?;
        conn.busy_timeout(options.busy_timeout)?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize ledger schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let accounts: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .unwrap_or(0);
        info!(path = %db_path, accounts, "📒 Ledger store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` returns `Ok`; any error (including a `?` inside `f`)
    /// drops the transaction, which rolls everything back.
    pub(crate) fn unit_of_work<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> LedgerResult<T>) -> LedgerResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Create an account with a zero balance.
    pub fn open_account(&self, user_id: &str, referred_by: Option<&str>) -> LedgerResult<Account> {
        self.unit_of_work(|tx| accounts::insert(tx, user_id, referred_by))
    }

    pub fn account(&self, user_id: &str) -> LedgerResult<Account> {
        self.read(|conn| accounts::get(conn, user_id))
    }

    pub fn balance(&self, user_id: &str) -> LedgerResult<Amount> {
        self.read(|conn| accounts::balance(conn, user_id))
    }

    pub fn referrer_of(&self, user_id: &str) -> LedgerResult<Option<String>> {
        self.read(|conn| accounts::referrer_of(conn, user_id))
    }

    /// Mirror a referral edge from the identity provider as-is.
    ///
    /// Only self-links are refused here; longer cycles are the cascade's
    /// problem. Use `Onboarding::link_referrer` for validated links.
    pub fn set_referrer(&self, user_id: &str, referrer: Option<&str>) -> LedgerResult<()> {
        self.unit_of_work(|tx| accounts::set_referrer(tx, user_id, referrer))
    }

    // -------------------------------------------------------------------------
    // Postings
    // -------------------------------------------------------------------------

    /// Append one entry and move the balance, as its own unit of work.
    pub fn post_transaction(&self, entry: NewEntry, overdraft: Overdraft) -> LedgerResult<Transaction> {
        self.unit_of_work(|tx| postings::post(tx, &entry, overdraft))
    }

    pub fn transaction_by_key(&self, idempotency_key: &str) -> LedgerResult<Option<Transaction>> {
        self.read(|conn| postings::by_idempotency_key(conn, idempotency_key))
    }

    // -------------------------------------------------------------------------
    // Requests, positions, commissions
    // -------------------------------------------------------------------------

    pub fn deposit(&self, id: &str) -> LedgerResult<DepositRequest> {
        self.read(|conn| requests::get_deposit(conn, id))
    }

    pub fn deposits_with_status(&self, status: DepositStatus) -> LedgerResult<Vec<DepositRequest>> {
        self.read(|conn| requests::deposits_with_status(conn, status))
    }

    pub fn withdrawal(&self, id: &str) -> LedgerResult<WithdrawalRequest> {
        self.read(|conn| requests::get_withdrawal(conn, id))
    }

    pub fn withdrawals_with_status(
        &self,
        status: WithdrawalStatus,
    ) -> LedgerResult<Vec<WithdrawalRequest>> {
        self.read(|conn| requests::withdrawals_with_status(conn, status))
    }

    pub fn position(&self, id: &str) -> LedgerResult<InvestmentPosition> {
        self.read(|conn| positions::get(conn, id))
    }

    pub fn positions_for_user(&self, user_id: &str) -> LedgerResult<Vec<InvestmentPosition>> {
        self.read(|conn| positions::for_user(conn, user_id))
    }

    pub fn active_positions(&self) -> LedgerResult<Vec<InvestmentPosition>> {
        self.read(positions::active)
    }

    pub fn commissions_for_trigger(
        &self,
        trigger_type: TriggerType,
        trigger_ref: &str,
    ) -> LedgerResult<Vec<CommissionRecord>> {
        self.read(|conn| commissions::for_trigger(conn, trigger_type, trigger_ref))
    }

    pub fn commissions_earned_by(&self, referrer_user_id: &str) -> LedgerResult<Vec<CommissionRecord>> {
        self.read(|conn| commissions::earned_by(conn, referrer_user_id))
    }

    // -------------------------------------------------------------------------
    // History and reconciliation
    // -------------------------------------------------------------------------

    /// One page of a user's entries, newest first.
    pub fn transaction_history(
        &self,
        user_id: &str,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> LedgerResult<HistoryPage> {
        self.read(|conn| history::page(conn, user_id, cursor, limit))
    }

    /// Every entry for `user_id`, newest first, fetched `page_size` at a time.
    pub fn history_iter(&self, user_id: &str, page_size: usize) -> HistoryIter<'_> {
        HistoryIter::new(self, user_id, page_size)
    }

    /// Compare every balance with the sum of its completed entries.
    pub fn reconcile(&self) -> LedgerResult<ReconciliationReport> {
        self.read(reconcile::run)
    }
}

/// Map a rusqlite "no rows" into `NotFound` for the given entity.
pub(crate) fn found<T>(
    result: rusqlite::Result<T>,
    entity: &'static str,
    id: &str,
) -> LedgerResult<T> {
    match result {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(LedgerError::not_found(entity, id)),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn is_constraint(e: &rusqlite::Error, extended_code: std::os::raw::c_int) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.extended_code == extended_code)
}
