//! Deposit and withdrawal request rows.
//!
//! Status changes are compare-and-swap updates guarded on `status = 'pending'`;
//! a `false` return means another operator got there first.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::found;
use crate::error::LedgerResult;
use crate::models::{Amount, DepositRequest, DepositStatus, WithdrawalRequest, WithdrawalStatus};

const DEPOSIT_COLUMNS: &str =
    "id, user_id, amount, proof_url, status, submitted_at, processed_at, processed_by";

const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, amount, status, submitted_at, processed_at, processed_by";

fn row_to_deposit(row: &rusqlite::Row<'_>) -> rusqlite::Result<DepositRequest> {
    Ok(DepositRequest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        proof_url: row.get(3)?,
        status: row.get(4)?,
        submitted_at: row.get(5)?,
        processed_at: row.get(6)?,
        processed_by: row.get(7)?,
    })
}

fn row_to_withdrawal(row: &rusqlite::Row<'_>) -> rusqlite::Result<WithdrawalRequest> {
    Ok(WithdrawalRequest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        status: row.get(3)?,
        submitted_at: row.get(4)?,
        processed_at: row.get(5)?,
        processed_by: row.get(6)?,
    })
}

// =============================================================================
// DEPOSITS
// =============================================================================

pub(crate) fn insert_deposit(
    conn: &Connection,
    id: &str,
    user_id: &str,
    amount: Amount,
    proof_url: Option<&str>,
    submitted_at: DateTime<Utc>,
) -> LedgerResult<DepositRequest> {
    conn.execute(
        "INSERT INTO deposit_requests (id, user_id, amount, proof_url, status, submitted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, user_id, amount, proof_url, DepositStatus::Pending, submitted_at],
    )?;
    Ok(DepositRequest {
        id: id.to_string(),
        user_id: user_id.to_string(),
        amount,
        proof_url: proof_url.map(str::to_string),
        status: DepositStatus::Pending,
        submitted_at,
        processed_at: None,
        processed_by: None,
    })
}

pub(crate) fn get_deposit(conn: &Connection, id: &str) -> LedgerResult<DepositRequest> {
    let sql = format!("SELECT {} FROM deposit_requests WHERE id = ?1", DEPOSIT_COLUMNS);
    found(conn.query_row(&sql, [id], row_to_deposit), "deposit", id)
}

/// Move a pending deposit to `to`. Returns `false` if it was no longer pending.
pub(crate) fn finish_deposit(
    conn: &Connection,
    id: &str,
    to: DepositStatus,
    processed_by: &str,
    processed_at: DateTime<Utc>,
) -> LedgerResult<bool> {
    let changed = conn.execute(
        "UPDATE deposit_requests SET status = ?2, processed_at = ?3, processed_by = ?4 \
         WHERE id = ?1 AND status = ?5",
        params![id, to, processed_at, processed_by, DepositStatus::Pending],
    )?;
    Ok(changed == 1)
}

pub(crate) fn deposits_with_status(
    conn: &Connection,
    status: DepositStatus,
) -> LedgerResult<Vec<DepositRequest>> {
    let sql = format!(
        "SELECT {} FROM deposit_requests WHERE status = ?1 ORDER BY submitted_at ASC, id ASC",
        DEPOSIT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([status], row_to_deposit)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// =============================================================================
// WITHDRAWALS
// =============================================================================

pub(crate) fn insert_withdrawal(
    conn: &Connection,
    id: &str,
    user_id: &str,
    amount: Amount,
    submitted_at: DateTime<Utc>,
) -> LedgerResult<WithdrawalRequest> {
    conn.execute(
        "INSERT INTO withdrawal_requests (id, user_id, amount, status, submitted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, user_id, amount, WithdrawalStatus::Pending, submitted_at],
    )?;
    Ok(WithdrawalRequest {
        id: id.to_string(),
        user_id: user_id.to_string(),
        amount,
        status: WithdrawalStatus::Pending,
        submitted_at,
        processed_at: None,
        processed_by: None,
    })
}

pub(crate) fn get_withdrawal(conn: &Connection, id: &str) -> LedgerResult<WithdrawalRequest> {
    let sql = format!(
        "SELECT {} FROM withdrawal_requests WHERE id = ?1",
        WITHDRAWAL_COLUMNS
    );
    found(conn.query_row(&sql, [id], row_to_withdrawal), "withdrawal", id)
}

/// Move a pending withdrawal to `to`. Returns `false` if it was no longer pending.
pub(crate) fn finish_withdrawal(
    conn: &Connection,
    id: &str,
    to: WithdrawalStatus,
    processed_by: &str,
    processed_at: DateTime<Utc>,
) -> LedgerResult<bool> {
    let changed = conn.execute(
        "UPDATE withdrawal_requests SET status = ?2, processed_at = ?3, processed_by = ?4 \
         WHERE id = ?1 AND status = ?5",
        params![id, to, processed_at, processed_by, WithdrawalStatus::Pending],
    )?;
    Ok(changed == 1)
}

pub(crate) fn withdrawals_with_status(
    conn: &Connection,
    status: WithdrawalStatus,
) -> LedgerResult<Vec<WithdrawalRequest>> {
    let sql = format!(
        "SELECT {} FROM withdrawal_requests WHERE status = ?1 ORDER BY submitted_at ASC, id ASC",
        WITHDRAWAL_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([status], row_to_withdrawal)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
