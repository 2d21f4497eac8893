use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::found;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Account, Amount};

const ACCOUNT_COLUMNS: &str = "user_id, referred_by_user_id, available_balance, total_deposited, \
     total_withdrawn, created_at, updated_at";

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        user_id: row.get(0)?,
        referred_by_user_id: row.get(1)?,
        available_balance: row.get(2)?,
        total_deposited: row.get(3)?,
        total_withdrawn: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn insert(
    conn: &Connection,
    user_id: &str,
    referred_by: Option<&str>,
) -> LedgerResult<Account> {
    if user_id.is_empty() {
        return Err(LedgerError::InvalidRequest("empty user id".to_string()));
    }
    // Ids are stored exactly as given, so "bob " and "bob" would be two users.
    if user_id.trim() != user_id {
        return Err(LedgerError::InvalidRequest(format!(
            "user id {:?} has leading or trailing whitespace",
            user_id
        )));
    }
    if referred_by == Some(user_id) {
        return Err(LedgerError::InvalidReferralChain {
            user_id: user_id.to_string(),
            reason: "a user cannot refer themselves".to_string(),
        });
    }
    if exists(conn, user_id)? {
        return Err(LedgerError::AlreadyProcessed {
            entity: "account",
            id: user_id.to_string(),
            status: "open".to_string(),
        });
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO accounts (user_id, referred_by_user_id, available_balance, total_deposited, \
         total_withdrawn, created_at, updated_at) VALUES (?1, ?2, 0, 0, 0, ?3, ?3)",
        params![user_id, referred_by, now],
    )?;

    Ok(Account {
        user_id: user_id.to_string(),
        referred_by_user_id: referred_by.map(str::to_string),
        available_balance: 0,
        total_deposited: 0,
        total_withdrawn: 0,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn exists(conn: &Connection, user_id: &str) -> LedgerResult<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

pub(crate) fn get(conn: &Connection, user_id: &str) -> LedgerResult<Account> {
    let sql = format!("SELECT {} FROM accounts WHERE user_id = ?1", ACCOUNT_COLUMNS);
    found(
        conn.query_row(&sql, [user_id], row_to_account),
        "account",
        user_id,
    )
}

pub(crate) fn balance(conn: &Connection, user_id: &str) -> LedgerResult<Amount> {
    found(
        conn.query_row(
            "SELECT available_balance FROM accounts WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        ),
        "account",
        user_id,
    )
}

pub(crate) fn referrer_of(conn: &Connection, user_id: &str) -> LedgerResult<Option<String>> {
    found(
        conn.query_row(
            "SELECT referred_by_user_id FROM accounts WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        ),
        "account",
        user_id,
    )
}

pub(crate) fn set_referrer(
    conn: &Connection,
    user_id: &str,
    referrer: Option<&str>,
) -> LedgerResult<()> {
    if referrer == Some(user_id) {
        return Err(LedgerError::InvalidReferralChain {
            user_id: user_id.to_string(),
            reason: "a user cannot refer themselves".to_string(),
        });
    }
    let changed = conn.execute(
        "UPDATE accounts SET referred_by_user_id = ?2, updated_at = ?3 WHERE user_id = ?1",
        params![user_id, referrer, Utc::now()],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("account", user_id));
    }
    Ok(())
}
