use chrono::{Days, NaiveDate};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    format_amount, Amount, InvestmentPosition, PositionStatus, Reference, ReferenceType,
    TransactionType,
};
use crate::notify::{notify, Notification, NotificationSink};
use crate::settings::SettingsProvider;
use crate::store::{positions, postings, LedgerStore, NewEntry, Overdraft};

/// Opens positions against the plans the settings provider knows about.
#[derive(Clone)]
pub struct InvestmentBook {
    store: Arc<LedgerStore>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
}

impl InvestmentBook {
    pub fn new(
        store: Arc<LedgerStore>,
        settings: Arc<dyn SettingsProvider>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            settings,
            notifier,
        }
    }

    /// Debit `principal` and open a position on `plan_id` starting `start_date`.
    ///
    /// The plan's rate, duration and principal policy are copied onto the
    /// position; later plan edits do not affect it.
    pub fn open_investment(
        &self,
        user_id: &str,
        plan_id: &str,
        principal: Amount,
        start_date: NaiveDate,
    ) -> LedgerResult<InvestmentPosition> {
        if principal <= 0 {
            return Err(LedgerError::InvalidAmount {
                amount: principal,
                reason: "principal must be positive".to_string(),
            });
        }

        let plan = self
            .settings
            .investment_plan(plan_id)?
            .ok_or_else(|| LedgerError::UnknownPlan {
                plan_id: plan_id.to_string(),
            })?;

        if let Some(min) = plan.min_principal {
            if principal < min {
                return Err(LedgerError::InvalidAmount {
                    amount: principal,
                    reason: format!("plan {} requires at least {}", plan_id, format_amount(min)),
                });
            }
        }
        if let Some(max) = plan.max_principal {
            if principal > max {
                return Err(LedgerError::InvalidAmount {
                    amount: principal,
                    reason: format!("plan {} allows at most {}", plan_id, format_amount(max)),
                });
            }
        }

        let end_date = start_date
            .checked_add_days(Days::new(plan.duration_days as u64))
            .ok_or_else(|| {
                LedgerError::InvalidRequest(format!("plan {} ends out of calendar range", plan_id))
            })?;

        let position = InvestmentPosition {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            plan_id: plan.plan_id.clone(),
            principal,
            daily_rate: plan.daily_rate,
            duration_days: plan.duration_days,
            principal_policy: plan.principal_policy,
            status: PositionStatus::Active,
            start_date,
            end_date,
            last_accrual_date: None,
            total_profit_earned: 0,
        };

        let debit = self.store.unit_of_work(|tx| {
            let entry = NewEntry::new(
                user_id,
                TransactionType::InvestmentDebit,
                -principal,
                Reference::new(ReferenceType::InvestmentPosition, position.id.as_str()),
            );
            let debit = postings::post(tx, &entry, Overdraft::Reject)?;
            positions::insert(tx, &position)?;
            Ok(debit)
        })?;

        info!(
            position_id = %position.id,
            user_id = %user_id,
            plan_id = %plan_id,
            principal = %format_amount(principal),
            daily_rate = %position.daily_rate,
            end_date = %position.end_date,
            balance = %format_amount(debit.balance_after),
            "📈 Investment opened"
        );
        notify(
            self.notifier.as_ref(),
            Notification::personal(
                user_id,
                "Investment started",
                format!(
                    "{} invested in {} until {}",
                    format_amount(principal),
                    plan_id,
                    position.end_date
                ),
            ),
        );
        Ok(position)
    }
}
