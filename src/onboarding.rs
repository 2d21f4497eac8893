//! Account onboarding: opening accounts, the signup bonus and referral links.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::commission::chain;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{format_amount, Account, Reference, ReferenceType, Transaction, TransactionType};
use crate::notify::{notify, Notification, NotificationSink};
use crate::settings::SettingsProvider;
use crate::store::{accounts, postings, LedgerStore, NewEntry, Overdraft};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub account: Account,
    pub signup_bonus: Option<Transaction>,
}

#[derive(Clone)]
pub struct Onboarding {
    store: Arc<LedgerStore>,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
}

impl Onboarding {
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

    /// Open an account, optionally under an existing referrer, and credit the
    /// signup bonus when the program has it switched on.
    pub fn register_user(&self, user_id: &str, referred_by: Option<&str>) -> LedgerResult<Registration> {
        let referral = self.settings.referral_settings()?;
        let bonus = (referral.signup_bonus_enabled && referral.signup_bonus > 0)
            .then_some(referral.signup_bonus);

        let registration = self.store.unit_of_work(|tx| {
            if let Some(referrer) = referred_by {
                if referrer != user_id && !accounts::exists(tx, referrer)? {
                    return Err(LedgerError::not_found("referrer", referrer));
                }
            }
            let account = accounts::insert(tx, user_id, referred_by)?;

            let signup_bonus = match bonus {
                Some(amount) => {
                    let entry = NewEntry::new(
                        &account.user_id,
                        TransactionType::SignupBonus,
                        amount,
                        Reference::new(ReferenceType::Signup, account.user_id.as_str()),
                    )
                    .with_key(format!("signup-bonus:{}", account.user_id));
                    Some(postings::post(tx, &entry, Overdraft::Reject)?)
                }
                None => None,
            };

            let account = accounts::get(tx, &account.user_id)?;
            Ok(Registration {
                account,
                signup_bonus,
            })
        })?;

        info!(
            user_id = %registration.account.user_id,
            referred_by = ?referred_by,
            bonus = ?bonus.map(format_amount),
            "👤 Account registered"
        );
        if let Some(bonus) = &registration.signup_bonus {
            notify(
                self.notifier.as_ref(),
                Notification::personal(
                    &bonus.user_id,
                    "Welcome bonus",
                    format!("{} signup bonus credited", format_amount(bonus.amount)),
                ),
            );
        }
        Ok(registration)
    }

    /// Attach `referrer_id` as the referrer of `user_id`.
    ///
    /// Only an account without a referrer can be linked, and never under one
    /// of its own downline.
    pub fn link_referrer(&self, user_id: &str, referrer_id: &str) -> LedgerResult<Account> {
        let result = self.store.unit_of_work(|tx| {
            let account = accounts::get(tx, user_id)?;
            if let Some(existing) = &account.referred_by_user_id {
                return Err(LedgerError::AlreadyProcessed {
                    entity: "referral link",
                    id: user_id.to_string(),
                    status: format!("referred by {}", existing),
                });
            }
            if !accounts::exists(tx, referrer_id)? {
                return Err(LedgerError::not_found("referrer", referrer_id));
            }
            chain::check_link(tx, user_id, referrer_id)?;
            accounts::set_referrer(tx, user_id, Some(referrer_id))?;
            accounts::get(tx, user_id)
        });

        match result {
            Ok(account) => {
                info!(user_id = %user_id, referrer = %referrer_id, "🔗 Referrer linked");
                Ok(account)
            }
            Err(e @ LedgerError::InvalidReferralChain { .. }) => {
                warn!(user_id = %user_id, referrer = %referrer_id, "{}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
