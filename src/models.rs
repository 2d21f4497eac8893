//! Ledger domain types
//!
//! Money is fixed-point everywhere: `Amount` counts minor units (cents) and
//! `Rate` is a fraction in millionths. Floating point only appears at the
//! settings-file edge, where percentages are converted once.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

// =============================================================================
// FIXED-POINT AMOUNT
// =============================================================================

/// Currency amount in minor units. 1.00 == 100.
pub type Amount = i64;

/// Minor units per whole currency unit.
pub const AMOUNT_SCALE: i64 = 100;

/// Parse a decimal string ("1000", "12.5", "-3.07") into an `Amount`.
///
/// At most two fractional digits are accepted; anything finer would silently
/// lose money, so it is rejected instead.
pub fn parse_amount(input: &str) -> LedgerResult<Amount> {
    let s = input.trim();
    let invalid = |reason: &str| LedgerError::InvalidAmount {
        amount: 0,
        reason: format!("{:?}: {}", input, reason),
    };

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("empty amount"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if frac.len() > 2 {
        return Err(invalid("more than two decimal places"));
    }

    let whole_units: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("out of range"))?
    };
    let frac_units: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| invalid("bad fraction"))? * 10,
        _ => frac.parse().map_err(|_| invalid("bad fraction"))?,
    };

    let units = whole_units
        .checked_mul(AMOUNT_SCALE)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(|| invalid("out of range"))?;

    Ok(if negative { -units } else { units })
}

/// Render an `Amount` as a plain decimal string with two places.
pub fn format_amount(amount: Amount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let scale = AMOUNT_SCALE as u64;
    format!("{}{}.{:02}", sign, abs / scale, abs % scale)
}

// =============================================================================
// RATE
// =============================================================================

/// Millionths per whole (1.0 == 1_000_000).
pub const RATE_SCALE: i64 = 1_000_000;

/// A non-negative fraction with six decimal places of precision.
///
/// Used for per-level commission percentages and daily investment rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rate {
    micros: i64,
}

impl Rate {
    pub const ZERO: Rate = Rate { micros: 0 };

    pub fn from_micros(micros: i64) -> Self {
        Self {
            micros: micros.max(0),
        }
    }

    /// `Rate::from_percent(5.0)` is 5%.
    pub fn from_percent(percent: f64) -> Self {
        Self::from_fraction(percent / 100.0)
    }

    /// `Rate::from_fraction(0.01)` is 1%.
    pub fn from_fraction(fraction: f64) -> Self {
        if !fraction.is_finite() || fraction <= 0.0 {
            return Self::ZERO;
        }
        Self::from_micros((fraction * RATE_SCALE as f64).round() as i64)
    }

    pub fn micros(&self) -> i64 {
        self.micros
    }

    pub fn is_zero(&self) -> bool {
        self.micros == 0
    }

    pub fn as_percent(&self) -> f64 {
        self.micros as f64 * 100.0 / RATE_SCALE as f64
    }

    /// `round(amount * rate)`, half away from zero. Saturates at the
    /// `Amount` bounds instead of wrapping.
    pub fn apply(&self, amount: Amount) -> Amount {
        let product = amount as i128 * self.micros as i128;
        let half = (RATE_SCALE / 2) as i128;
        let rounded = if product >= 0 {
            (product + half) / RATE_SCALE as i128
        } else {
            (product - half) / RATE_SCALE as i128
        };
        Amount::try_from(rounded).unwrap_or(if rounded < 0 { Amount::MIN } else { Amount::MAX })
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}%", self.as_percent())
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Generates `as_str`/`parse` plus SQLite conversions for a text-backed enum.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let s = value.as_str()?;
                $name::parse(s).ok_or_else(|| {
                    rusqlite::types::FromSqlError::Other(
                        format!("unknown {} {:?}", stringify!($name), s).into(),
                    )
                })
            }
        }
    };
}

/// Why a ledger entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    WithdrawalCompleted,
    WithdrawalRejectedRefund,
    InvestmentDebit,
    InvestmentReturn,
    DailyProfit,
    ReferralCommission,
    SignupBonus,
    Game,
}

text_enum!(TransactionType {
    Deposit => "deposit",
    WithdrawalCompleted => "withdrawal_completed",
    WithdrawalRejectedRefund => "withdrawal_rejected_refund",
    InvestmentDebit => "investment_debit",
    InvestmentReturn => "investment_return",
    DailyProfit => "daily_profit",
    ReferralCommission => "referral_commission",
    SignupBonus => "signup_bonus",
    Game => "game",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(TransactionStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

/// What kind of record a ledger entry points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    DepositRequest,
    WithdrawalRequest,
    InvestmentPosition,
    CommissionRecord,
    Signup,
    Game,
    Manual,
}

text_enum!(ReferenceType {
    DepositRequest => "deposit_request",
    WithdrawalRequest => "withdrawal_request",
    InvestmentPosition => "investment_position",
    CommissionRecord => "commission_record",
    Signup => "signup",
    Game => "game",
    Manual => "manual",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(DepositStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(WithdrawalStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Completed,
}

text_enum!(PositionStatus {
    Active => "active",
    Completed => "completed",
});

/// What happens to the principal when a position matures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalPolicy {
    /// Credit the principal back as an `investment_return` entry.
    Return,
    /// The principal stays with the plan; only profit is ever paid.
    Retain,
}

text_enum!(PrincipalPolicy {
    Return => "return",
    Retain => "retain",
});

/// Event kinds that can start a commission cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Deposit,
}

text_enum!(TriggerType {
    Deposit => "deposit",
});

// =============================================================================
// RECORDS
// =============================================================================

/// Back-pointer from a ledger entry to the record that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceType,
    pub id: String,
}

impl Reference {
    pub fn new(kind: ReferenceType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// One account per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub referred_by_user_id: Option<String>,
    pub available_balance: Amount,
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Store-wide posting order; history is sorted on this.
    pub seq: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub status: TransactionStatus,
    pub reference: Reference,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: String,
    pub user_id: String,
    pub amount: Amount,
    pub proof_url: Option<String>,
    pub status: DepositStatus,
    pub submitted_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: String,
    pub user_id: String,
    pub amount: Amount,
    pub status: WithdrawalStatus,
    pub submitted_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPosition {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub principal: Amount,
    pub daily_rate: Rate,
    pub duration_days: u32,
    pub principal_policy: PrincipalPolicy,
    pub status: PositionStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub last_accrual_date: Option<NaiveDate>,
    pub total_profit_earned: Amount,
}

impl InvestmentPosition {
    /// Profit credited for one accrual day.
    pub fn daily_profit(&self) -> Amount {
        self.daily_rate.apply(self.principal)
    }

    /// True when `date` falls inside the accrual window `(start_date, end_date]`.
    pub fn accrues_on(&self, date: NaiveDate) -> bool {
        date > self.start_date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: String,
    pub referrer_user_id: String,
    pub referred_user_id: String,
    pub level: u32,
    pub trigger_type: TriggerType,
    /// Id of the triggering event (the deposit request id).
    pub trigger_ref: String,
    pub trigger_amount: Amount,
    pub commission_rate: Rate,
    pub commission_amount: Amount,
    pub status: TransactionStatus,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
}
