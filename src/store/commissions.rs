use rusqlite::{params, Connection, OptionalExtension};

use crate::error::LedgerResult;
use crate::models::{CommissionRecord, Rate, TriggerType};

const COMMISSION_COLUMNS: &str = "id, referrer_user_id, referred_user_id, level, trigger_type, \
     trigger_ref, trigger_amount, commission_rate_micros, commission_amount, status, \
     transaction_id, created_at";

fn row_to_commission(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommissionRecord> {
    Ok(CommissionRecord {
        id: row.get(0)?,
        referrer_user_id: row.get(1)?,
        referred_user_id: row.get(2)?,
        level: row.get(3)?,
        trigger_type: row.get(4)?,
        trigger_ref: row.get(5)?,
        trigger_amount: row.get(6)?,
        commission_rate: Rate::from_micros(row.get(7)?),
        commission_amount: row.get(8)?,
        status: row.get(9)?,
        transaction_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub(crate) fn insert(conn: &Connection, record: &CommissionRecord) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO commission_records (id, referrer_user_id, referred_user_id, level, \
         trigger_type, trigger_ref, trigger_amount, commission_rate_micros, commission_amount, \
         status, transaction_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &record.id,
            &record.referrer_user_id,
            &record.referred_user_id,
            record.level,
            record.trigger_type,
            &record.trigger_ref,
            record.trigger_amount,
            record.commission_rate.micros(),
            record.commission_amount,
            record.status,
            &record.transaction_id,
            record.created_at,
        ],
    )?;
    Ok(())
}

/// The record for one (referrer, event, level), if it was already paid.
pub(crate) fn find(
    conn: &Connection,
    referrer_user_id: &str,
    referred_user_id: &str,
    trigger_type: TriggerType,
    trigger_ref: &str,
    level: u32,
) -> LedgerResult<Option<CommissionRecord>> {
    let sql = format!(
        "SELECT {} FROM commission_records WHERE referrer_user_id = ?1 AND referred_user_id = ?2 \
         AND trigger_type = ?3 AND trigger_ref = ?4 AND level = ?5",
        COMMISSION_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![referrer_user_id, referred_user_id, trigger_type, trigger_ref, level],
            row_to_commission,
        )
        .optional()?)
}

/// Every payout for one triggering event, by level.
pub(crate) fn for_trigger(
    conn: &Connection,
    trigger_type: TriggerType,
    trigger_ref: &str,
) -> LedgerResult<Vec<CommissionRecord>> {
    let sql = format!(
        "SELECT {} FROM commission_records WHERE trigger_type = ?1 AND trigger_ref = ?2 \
         ORDER BY level ASC",
        COMMISSION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![trigger_type, trigger_ref], row_to_commission)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn earned_by(conn: &Connection, referrer_user_id: &str) -> LedgerResult<Vec<CommissionRecord>> {
    let sql = format!(
        "SELECT {} FROM commission_records WHERE referrer_user_id = ?1 \
         ORDER BY created_at ASC, level ASC",
        COMMISSION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([referrer_user_id], row_to_commission)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
