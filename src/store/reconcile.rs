//! Reconciliation: every balance must equal the sum of its completed entries.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::LedgerResult;
use crate::models::{format_amount, Amount, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub user_id: String,
    pub available_balance: Amount,
    pub ledger_sum: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub accounts_checked: u64,
    pub entries_checked: u64,
    pub total_balance: Amount,
    pub mismatches: Vec<BalanceMismatch>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub(crate) fn run(conn: &Connection) -> LedgerResult<ReconciliationReport> {
    let mut stmt = conn.prepare_cached(
        "SELECT a.user_id, a.available_balance, \
                COALESCE(SUM(CASE WHEN t.status = ?1 THEN t.amount ELSE 0 END), 0), \
                COUNT(t.seq) \
         FROM accounts a LEFT JOIN transactions t ON t.user_id = a.user_id \
         GROUP BY a.user_id ORDER BY a.user_id",
    )?;
    let rows = stmt.query_map([TransactionStatus::Completed], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Amount>(1)?,
            row.get::<_, Amount>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut report = ReconciliationReport::default();
    for row in rows {
        let (user_id, available_balance, ledger_sum, entries) = row?;
        report.accounts_checked += 1;
        report.entries_checked += entries as u64;
        report.total_balance += available_balance;
        if available_balance != ledger_sum {
            error!(
                user_id = %user_id,
                balance = %format_amount(available_balance),
                ledger_sum = %format_amount(ledger_sum),
                "🚨 Balance does not match ledger"
            );
            report.mismatches.push(BalanceMismatch {
                user_id,
                available_balance,
                ledger_sum,
            });
        }
    }

    info!(
        accounts = report.accounts_checked,
        entries = report.entries_checked,
        mismatches = report.mismatches.len(),
        "Reconciliation finished"
    );
    Ok(report)
}
