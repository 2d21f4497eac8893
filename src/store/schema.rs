//! Ledger schema

/// Pragmas plus every table and index. Idempotent; applied on each open.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS accounts (
    user_id TEXT PRIMARY KEY,
    referred_by_user_id TEXT,
    available_balance INTEGER NOT NULL DEFAULT 0 CHECK (available_balance >= 0),
    total_deposited INTEGER NOT NULL DEFAULT 0,
    total_withdrawn INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_accounts_referrer
    ON accounts(referred_by_user_id);

-- Append-only. seq gives a total posting order for history and cursors.
CREATE TABLE IF NOT EXISTS transactions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL REFERENCES accounts(user_id),
    type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    status TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    idempotency_key TEXT UNIQUE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_user_seq
    ON transactions(user_id, seq DESC);

CREATE INDEX IF NOT EXISTS idx_transactions_reference
    ON transactions(reference_type, reference_id);

CREATE TABLE IF NOT EXISTS deposit_requests (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES accounts(user_id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    proof_url TEXT,
    status TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    processed_at TEXT,
    processed_by TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_deposit_requests_status
    ON deposit_requests(status, submitted_at);

CREATE TABLE IF NOT EXISTS withdrawal_requests (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES accounts(user_id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    status TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    processed_at TEXT,
    processed_by TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_withdrawal_requests_status
    ON withdrawal_requests(status, submitted_at);

CREATE TABLE IF NOT EXISTS investment_positions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES accounts(user_id),
    plan_id TEXT NOT NULL,
    principal INTEGER NOT NULL CHECK (principal > 0),
    daily_rate_micros INTEGER NOT NULL,
    duration_days INTEGER NOT NULL,
    principal_policy TEXT NOT NULL,
    status TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    last_accrual_date TEXT,
    total_profit_earned INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_investment_positions_active
    ON investment_positions(status, end_date);

CREATE TABLE IF NOT EXISTS commission_records (
    id TEXT PRIMARY KEY,
    referrer_user_id TEXT NOT NULL REFERENCES accounts(user_id),
    referred_user_id TEXT NOT NULL,
    level INTEGER NOT NULL CHECK (level >= 1),
    trigger_type TEXT NOT NULL,
    trigger_ref TEXT NOT NULL,
    trigger_amount INTEGER NOT NULL,
    commission_rate_micros INTEGER NOT NULL,
    commission_amount INTEGER NOT NULL,
    status TEXT NOT NULL,
    transaction_id TEXT NOT NULL REFERENCES transactions(id),
    created_at TEXT NOT NULL
) WITHOUT ROWID;

-- One payout per (referrer, triggering event, level).
CREATE UNIQUE INDEX IF NOT EXISTS idx_commission_records_event
    ON commission_records(referrer_user_id, referred_user_id, trigger_type, trigger_ref, level);
"#;
