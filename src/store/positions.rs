use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::found;
use crate::error::LedgerResult;
use crate::models::{Amount, InvestmentPosition, PositionStatus, Rate};

const POSITION_COLUMNS: &str = "id, user_id, plan_id, principal, daily_rate_micros, duration_days, \
     principal_policy, status, start_date, end_date, last_accrual_date, total_profit_earned";

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<InvestmentPosition> {
    Ok(InvestmentPosition {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_id: row.get(2)?,
        principal: row.get(3)?,
        daily_rate: Rate::from_micros(row.get(4)?),
        duration_days: row.get(5)?,
        principal_policy: row.get(6)?,
        status: row.get(7)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
        last_accrual_date: row.get(10)?,
        total_profit_earned: row.get(11)?,
    })
}

pub(crate) fn insert(conn: &Connection, position: &InvestmentPosition) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO investment_positions (id, user_id, plan_id, principal, daily_rate_micros, \
         duration_days, principal_policy, status, start_date, end_date, last_accrual_date, \
         total_profit_earned) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &position.id,
            &position.user_id,
            &position.plan_id,
            position.principal,
            position.daily_rate.micros(),
            position.duration_days,
            position.principal_policy,
            position.status,
            position.start_date,
            position.end_date,
            position.last_accrual_date,
            position.total_profit_earned,
        ],
    )?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, id: &str) -> LedgerResult<InvestmentPosition> {
    let sql = format!(
        "SELECT {} FROM investment_positions WHERE id = ?1",
        POSITION_COLUMNS
    );
    found(conn.query_row(&sql, [id], row_to_position), "investment position", id)
}

pub(crate) fn for_user(conn: &Connection, user_id: &str) -> LedgerResult<Vec<InvestmentPosition>> {
    let sql = format!(
        "SELECT {} FROM investment_positions WHERE user_id = ?1 ORDER BY start_date ASC, id ASC",
        POSITION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([user_id], row_to_position)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn active(conn: &Connection) -> LedgerResult<Vec<InvestmentPosition>> {
    let sql = format!(
        "SELECT {} FROM investment_positions WHERE status = ?1 ORDER BY id ASC",
        POSITION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([PositionStatus::Active], row_to_position)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record one day's profit: advance `last_accrual_date` to `date`, add
/// `profit`, and complete the position when `complete` is set.
///
/// Compare-and-swap on the previous accrual date. Returns `false` when the
/// position is no longer active or has already accrued `date` or later.
pub(crate) fn record_accrual(
    conn: &Connection,
    id: &str,
    date: NaiveDate,
    profit: Amount,
    complete: bool,
) -> LedgerResult<bool> {
    let next_status = if complete {
        PositionStatus::Completed
    } else {
        PositionStatus::Active
    };
    let changed = conn.execute(
        "UPDATE investment_positions \
         SET last_accrual_date = ?2, total_profit_earned = total_profit_earned + ?3, status = ?4 \
         WHERE id = ?1 AND status = ?5 \
           AND (last_accrual_date IS NULL OR last_accrual_date < ?2)",
        params![id, date, profit, next_status, PositionStatus::Active],
    )?;
    Ok(changed == 1)
}
