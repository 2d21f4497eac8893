//! Investment Accrual Scheduler
//!
//! Posts one `daily_profit` entry per active position per calendar day.
//! A position accrues on the days `start_date < d <= end_date`; the day
//! `end_date` completes it and settles the principal per the plan's policy.
//!
//! A run for `as_of` accrues every day the position is owed up to
//! `min(as_of, end_date)`, oldest first, so a scheduler that was down for a
//! while catches up on its next run. Each day is its own unit of work: the
//! position update is a compare-and-swap on `last_accrual_date`, and the
//! profit entry carries the key `accrual:<position>:<date>`, so re-running a
//! date is a no-op.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    format_amount, Amount, InvestmentPosition, PrincipalPolicy, Reference, ReferenceType,
    TransactionType,
};
use crate::notify::{notify, Notification, NotificationSink};
use crate::store::{positions, postings, LedgerStore, NewEntry, Overdraft};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccruedPosition {
    pub position_id: String,
    pub user_id: String,
    /// Days credited by this run, oldest first. More than one when catching up.
    pub dates: Vec<NaiveDate>,
    /// Profit credited by this run, summed over `dates`.
    pub profit: Amount,
    /// This run reached the position's end date.
    pub completed: bool,
    /// Principal credited back on completion, if the plan returns it.
    pub principal_returned: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualFailure {
    pub position_id: String,
    /// The day that could not be written. Earlier days of the same run stay.
    pub date: NaiveDate,
    pub error: String,
}

/// What one run did with every active position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualReport {
    pub as_of: NaiveDate,
    pub accrued: Vec<AccruedPosition>,
    /// Position ids with nothing owed up to `as_of`.
    pub already_accrued: Vec<String>,
    /// Position ids for which `as_of` is on or before `start_date`.
    pub not_started: Vec<String>,
    pub failures: Vec<AccrualFailure>,
}

impl AccrualReport {
    fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            accrued: Vec::new(),
            already_accrued: Vec::new(),
            not_started: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn total_profit(&self) -> Amount {
        self.accrued.iter().map(|a| a.profit).sum()
    }
}

/// Days `position` is still owed as of `as_of`, oldest first.
fn owed_dates(position: &InvestmentPosition, as_of: NaiveDate) -> Vec<NaiveDate> {
    let last = position.last_accrual_date.unwrap_or(position.start_date);
    let Some(first) = last.checked_add_days(Days::new(1)) else {
        return Vec::new();
    };
    let until = as_of.min(position.end_date);
    first.iter_days().take_while(|d| *d <= until).collect()
}

#[derive(Clone)]
pub struct AccrualScheduler {
    store: Arc<LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl AccrualScheduler {
    pub fn new(store: Arc<LedgerStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { store, notifier }
    }

    /// Accrue every active position up to `as_of`.
    ///
    /// Only listing the positions can fail the run; per-position failures
    /// are collected in the report.
    pub fn run_daily_accrual(&self, as_of: NaiveDate) -> LedgerResult<AccrualReport> {
        let active = self.store.active_positions()?;
        let mut report = AccrualReport::new(as_of);

        for position in &active {
            if as_of <= position.start_date {
                report.not_started.push(position.id.clone());
                continue;
            }
            let owed = owed_dates(position, as_of);
            if owed.len() > 1 {
                warn!(
                    position_id = %position.id,
                    from = %owed[0],
                    to = %owed[owed.len() - 1],
                    days = owed.len(),
                    "⚠️ Catching up missed accrual days"
                );
            }

            let (accrued, failure) = self.accrue_position(position, &owed);
            match accrued {
                Some(accrued) => {
                    self.notify_accrual(&accrued);
                    report.accrued.push(accrued);
                }
                None if failure.is_none() => report.already_accrued.push(position.id.clone()),
                None => {}
            }
            if let Some((date, e)) = failure {
                error!(position_id = %position.id, date = %date, error = %e, "Accrual failed");
                report.failures.push(AccrualFailure {
                    position_id: position.id.clone(),
                    date,
                    error: e.to_string(),
                });
            }
        }

        info!(
            as_of = %as_of,
            active = active.len(),
            accrued = report.accrued.len(),
            profit = %format_amount(report.total_profit()),
            already = report.already_accrued.len(),
            failed = report.failures.len(),
            "⏱️ Daily accrual finished"
        );
        Ok(report)
    }

    /// Run each date in `from..=to`, oldest first.
    pub fn run_accrual_range(&self, from: NaiveDate, to: NaiveDate) -> LedgerResult<Vec<AccrualReport>> {
        if from > to {
            return Err(LedgerError::InvalidRequest(format!(
                "accrual range {} .. {} is empty",
                from, to
            )));
        }
        from.iter_days()
            .take_while(|d| *d <= to)
            .map(|d| self.run_daily_accrual(d))
            .collect()
    }

    /// Accrue `dates` in order, stopping at the first failed day.
    fn accrue_position(
        &self,
        position: &InvestmentPosition,
        dates: &[NaiveDate],
    ) -> (Option<AccruedPosition>, Option<(NaiveDate, LedgerError)>) {
        let mut accrued = AccruedPosition {
            position_id: position.id.clone(),
            user_id: position.user_id.clone(),
            dates: Vec::new(),
            profit: 0,
            completed: false,
            principal_returned: None,
        };

        for &date in dates {
            match self.accrue_day(position, date) {
                Ok(Some(day)) => {
                    accrued.dates.push(date);
                    accrued.profit += day.profit;
                    accrued.completed |= day.completed;
                    if day.principal_returned.is_some() {
                        accrued.principal_returned = day.principal_returned;
                    }
                }
                // Another scheduler got here first.
                Ok(None) => {}
                Err(e) => {
                    let accrued = (!accrued.dates.is_empty()).then_some(accrued);
                    return (accrued, Some((date, e)));
                }
            }
        }

        ((!accrued.dates.is_empty()).then_some(accrued), None)
    }

    /// One day of one position as a unit of work. `None` if the day was
    /// already taken.
    fn accrue_day(&self, position: &InvestmentPosition, date: NaiveDate) -> LedgerResult<Option<AccruedDay>> {
        let profit = position.daily_profit();
        let completes = date == position.end_date;

        self.store.unit_of_work(|tx| {
            if !positions::record_accrual(tx, &position.id, date, profit, completes)? {
                return Ok(None);
            }

            if profit > 0 {
                let entry = NewEntry::new(
                    &position.user_id,
                    TransactionType::DailyProfit,
                    profit,
                    Reference::new(ReferenceType::InvestmentPosition, position.id.as_str()),
                )
                .with_key(format!("accrual:{}:{}", position.id, date));
                postings::post(tx, &entry, Overdraft::Reject)?;
            }

            let mut principal_returned = None;
            if completes && position.principal_policy == PrincipalPolicy::Return {
                let entry = NewEntry::new(
                    &position.user_id,
                    TransactionType::InvestmentReturn,
                    position.principal,
                    Reference::new(ReferenceType::InvestmentPosition, position.id.as_str()),
                )
                .with_key(format!("investment-return:{}", position.id));
                postings::post(tx, &entry, Overdraft::Reject)?;
                principal_returned = Some(position.principal);
            }

            debug!(position_id = %position.id, date = %date, profit = %format_amount(profit), completes, "position accrued");
            Ok(Some(AccruedDay {
                profit,
                completed: completes,
                principal_returned,
            }))
        })
    }

    fn notify_accrual(&self, accrued: &AccruedPosition) {
        if accrued.profit > 0 {
            let message = match accrued.dates.as_slice() {
                [day] => format!("{} earned on {}", format_amount(accrued.profit), day),
                days => format!(
                    "{} earned over {} days",
                    format_amount(accrued.profit),
                    days.len()
                ),
            };
            notify(
                self.notifier.as_ref(),
                Notification::personal(&accrued.user_id, "Daily profit", message),
            );
        }
        if accrued.completed {
            let message = match accrued.principal_returned {
                Some(principal) => format!(
                    "Your investment has matured; {} principal returned",
                    format_amount(principal)
                ),
                None => "Your investment has matured".to_string(),
            };
            notify(
                self.notifier.as_ref(),
                Notification::personal(&accrued.user_id, "Investment completed", message),
            );
        }
    }
}

struct AccruedDay {
    profit: Amount,
    completed: bool,
    principal_returned: Option<Amount>,
}
