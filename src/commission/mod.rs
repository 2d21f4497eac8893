//! Commission Cascade Engine
//!
//! On a qualifying trigger (a deposit approval) the engine walks the referral
//! chain upward from the triggering user and pays one `referral_commission`
//! per level, at the rate configured for that level.
//!
//! - Settings are read once, when the cascade starts.
//! - Every level is its own unit of work. A failed level never undoes the
//!   levels already paid, and is retried with the same idempotency key.
//! - Each (referrer, event, level) pays at most once, no matter how often
//!   the cascade is re-run.
//! - A revisited user ends the cascade with `CycleDetected`.

pub mod chain;


use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    format_amount, Amount, CommissionRecord, Rate, Reference, ReferenceType, TransactionStatus,
    TransactionType, TriggerType,
};
use crate::notify::{notify, Notification, NotificationSink};
use crate::settings::SettingsProvider;
use crate::store::{commissions, postings, LedgerStore, NewEntry, Overdraft};

pub use chain::ReferralWalk;

/// Default number of tries per level before a failure is reported.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// The event a cascade pays out on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeTrigger {
    pub user_id: String,
    pub amount: Amount,
    pub trigger_type: TriggerType,
    /// Id of the triggering event; part of every level's idempotency key.
    pub trigger_ref: String,
}

impl CascadeTrigger {
    pub fn deposit(user_id: &str, amount: Amount, deposit_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            amount,
            trigger_type: TriggerType::Deposit,
            trigger_ref: deposit_id.to_string(),
        }
    }

    /// Idempotency key of the ledger entry paying `referrer` at `level`.
    pub fn idempotency_key(&self, referrer_user_id: &str, level: u32) -> String {
        format!(
            "commission:{}:{}:{}:{}",
            self.trigger_type, self.trigger_ref, referrer_user_id, level
        )
    }
}

/// Why a cascade stopped walking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CascadeTermination {
    /// The top of the chain was reached.
    ChainExhausted,
    /// `max_levels` levels were walked.
    MaxLevelReached { max_levels: u32 },
    /// No rate is configured for this level.
    LevelNotConfigured { level: u32 },
    ReferralDisabled,
    /// `user_id` appeared twice in the chain.
    CycleDetected { user_id: String, level: u32 },
    /// The chain points at a user that has no account.
    MissingAncestor { user_id: String, level: u32 },
    /// Reading the next referral edge failed.
    LookupFailed { level: u32, error: String },
    SettingsUnavailable { error: String },
}

impl CascadeTermination {
    /// The ledger error this termination represents, if it is one.
    pub fn as_error(&self) -> Option<LedgerError> {
        match self {
            CascadeTermination::CycleDetected { user_id, level } => {
                Some(LedgerError::InvalidReferralChain {
                    user_id: user_id.clone(),
                    reason: format!("user revisited at level {}", level),
                })
            }
            CascadeTermination::MissingAncestor { user_id, .. } => {
                Some(LedgerError::InvalidReferralChain {
                    user_id: user_id.clone(),
                    reason: "referrer has no account".to_string(),
                })
            }
            CascadeTermination::SettingsUnavailable { error } => {
                Some(LedgerError::SettingsUnavailable(error.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A record already exists for this (referrer, event, level).
    AlreadyPaid,
    /// The rate is zero or the commission rounds to zero.
    ZeroCommission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSkip {
    pub level: u32,
    pub referrer_user_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFailure {
    pub level: u32,
    pub referrer_user_id: String,
    pub attempts: u32,
    pub error: String,
}

/// Outcome of one cascade. Never an error: the triggering event stands
/// whatever happens here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub trigger: CascadeTrigger,
    pub paid: Vec<CommissionRecord>,
    pub skipped: Vec<LevelSkip>,
    pub failures: Vec<LevelFailure>,
    pub termination: CascadeTermination,
}

impl CascadeReport {
    fn new(trigger: &CascadeTrigger) -> Self {
        Self {
            trigger: trigger.clone(),
            paid: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            termination: CascadeTermination::ChainExhausted,
        }
    }

    pub fn total_paid(&self) -> Amount {
        self.paid.iter().map(|r| r.commission_amount).sum()
    }

    /// True when no level failed. Levels skipped as already paid count as done.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum LevelOutcome {
    Paid(CommissionRecord),
    AlreadyPaid,
}

#[derive(Clone)]
pub struct CommissionEngine {
    store: Arc<LedgerStore>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
    write_attempts: u32,
}

impl CommissionEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            settings,
            notifier,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
        }
    }

    /// Tries per level (at least one).
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    /// Walk the referral chain above `trigger.user_id` and pay each level.
    pub fn cascade(&self, trigger: &CascadeTrigger) -> CascadeReport {
        let mut report = CascadeReport::new(trigger);

        let settings = match self.settings.referral_settings() {
            Ok(s) => s,
            Err(e) => {
                error!(trigger_ref = %trigger.trigger_ref, error = %e, "Referral settings unavailable, cascade skipped");
                report.termination = CascadeTermination::SettingsUnavailable {
                    error: e.to_string(),
                };
                return report;
            }
        };
        if !settings.enabled {
            debug!(trigger_ref = %trigger.trigger_ref, "Referral program disabled");
            report.termination = CascadeTermination::ReferralDisabled;
            return report;
        }

        let mut walk = ReferralWalk::new(&trigger.user_id);
        let mut current = trigger.user_id.clone();
        let mut level: u32 = 1;

        report.termination = loop {
            if level > settings.max_levels {
                break CascadeTermination::MaxLevelReached {
                    max_levels: settings.max_levels,
                };
            }

            let referrer = match self.store.referrer_of(&current) {
                Ok(Some(referrer)) => referrer,
                Ok(None) => break CascadeTermination::ChainExhausted,
                Err(LedgerError::NotFound { .. }) => {
                    error!(user_id = %current, level, "Referral chain points at a missing account");
                    break CascadeTermination::MissingAncestor {
                        user_id: current,
                        level,
                    };
                }
                Err(e) => {
                    error!(user_id = %current, level, error = %e, "Referral lookup failed");
                    break CascadeTermination::LookupFailed {
                        level,
                        error: e.to_string(),
                    };
                }
            };

            if !walk.step(&referrer) {
                let err = LedgerError::InvalidReferralChain {
                    user_id: referrer.clone(),
                    reason: format!("cycle through {}", walk.path().join(" -> ")),
                };
                error!(trigger_ref = %trigger.trigger_ref, level, "🚨 {}", err);
                break CascadeTermination::CycleDetected {
                    user_id: referrer,
                    level,
                };
            }

            let Some(rate) = settings.level_rate(level) else {
                break CascadeTermination::LevelNotConfigured { level };
            };

            let commission = rate.apply(trigger.amount);
            if rate.is_zero() || commission <= 0 {
                debug!(level, referrer = %referrer, "Commission rounds to zero, skipping level");
                report.skipped.push(LevelSkip {
                    level,
                    referrer_user_id: referrer.clone(),
                    reason: SkipReason::ZeroCommission,
                });
            } else {
                match self.pay_level_with_retry(trigger, &referrer, level, rate, commission) {
                    Ok(LevelOutcome::Paid(record)) => {
                        notify(
                            self.notifier.as_ref(),
                            Notification::personal(
                                &record.referrer_user_id,
                                "Referral commission",
                                format!(
                                    "You earned {} (level {})",
                                    format_amount(record.commission_amount),
                                    level
                                ),
                            ),
                        );
                        report.paid.push(record);
                    }
                    Ok(LevelOutcome::AlreadyPaid) => {
                        debug!(level, referrer = %referrer, "Level already paid");
                        report.skipped.push(LevelSkip {
                            level,
                            referrer_user_id: referrer.clone(),
                            reason: SkipReason::AlreadyPaid,
                        });
                    }
                    Err((LedgerError::NotFound { .. }, _)) => {
                        error!(user_id = %referrer, level, "Referral chain points at a missing account");
                        break CascadeTermination::MissingAncestor {
                            user_id: referrer,
                            level,
                        };
                    }
                    Err((e, attempts)) => {
                        error!(level, referrer = %referrer, attempts, error = %e, "Commission payout failed");
                        report.failures.push(LevelFailure {
                            level,
                            referrer_user_id: referrer.clone(),
                            attempts,
                            error: e.to_string(),
                        });
                    }
                }
            }

            current = referrer;
            level += 1;
        };

        info!(
            trigger_ref = %trigger.trigger_ref,
            paid = report.paid.len(),
            total = %format_amount(report.total_paid()),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            termination = ?report.termination,
            "💸 Commission cascade finished"
        );
        report
    }

    fn pay_level_with_retry(
        &self,
        trigger: &CascadeTrigger,
        referrer: &str,
        level: u32,
        rate: Rate,
        commission: Amount,
    ) -> Result<LevelOutcome, (LedgerError, u32)> {
        let mut attempt = 1;
        loop {
            match self.pay_level(trigger, referrer, level, rate, commission) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.write_attempts => {
                    warn!(level, referrer = %referrer, attempt, error = %e, "Commission write busy, retrying");
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    /// One level, one unit of work: the credit and its record commit together.
    fn pay_level(
        &self,
        trigger: &CascadeTrigger,
        referrer: &str,
        level: u32,
        rate: Rate,
        commission: Amount,
    ) -> LedgerResult<LevelOutcome> {
        self.store.unit_of_work(|tx| {
            let existing = commissions::find(
                tx,
                referrer,
                &trigger.user_id,
                trigger.trigger_type,
                &trigger.trigger_ref,
                level,
            )?;
            if existing.is_some() {
                return Ok(LevelOutcome::AlreadyPaid);
            }

            let record_id = Uuid::new_v4().to_string();
            let entry = NewEntry::new(
                referrer,
                TransactionType::ReferralCommission,
                commission,
                Reference::new(ReferenceType::CommissionRecord, record_id.as_str()),
            )
            .with_key(trigger.idempotency_key(referrer, level));

            let transaction = match postings::post(tx, &entry, Overdraft::Reject) {
                Ok(t) => t,
                Err(LedgerError::DuplicatePosting { .. }) => return Ok(LevelOutcome::AlreadyPaid),
                Err(e) => return Err(e),
            };

            let record = CommissionRecord {
                id: record_id,
                referrer_user_id: referrer.to_string(),
                referred_user_id: trigger.user_id.clone(),
                level,
                trigger_type: trigger.trigger_type,
                trigger_ref: trigger.trigger_ref.clone(),
                trigger_amount: trigger.amount,
                commission_rate: rate,
                commission_amount: commission,
                status: TransactionStatus::Completed,
                transaction_id: transaction.id,
                created_at: Utc::now(),
            };
            commissions::insert(tx, &record)?;

            debug!(level, referrer = %referrer, amount = %format_amount(commission), "Commission level paid");
            Ok(LevelOutcome::Paid(record))
        })
    }
}
