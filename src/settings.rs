//! Settings Provider
//!
//! Read-only configuration consumed by the commission cascade, onboarding and
//! the investment book. The engine only ever sees the `SettingsProvider`
//! trait; `StaticSettings` is the in-process implementation, loadable from a
//! TOML file.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::error::LedgerResult;
use crate::models::{parse_amount, Amount, PrincipalPolicy, Rate};

/// Referral program configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralSettings {
    pub enabled: bool,
    pub max_levels: u32,
    /// Commission rate by 1-based level.
    pub level_rates: BTreeMap<u32, Rate>,
    pub signup_bonus: Amount,
    pub signup_bonus_enabled: bool,
}

impl ReferralSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_levels: 0,
            level_rates: BTreeMap::new(),
            signup_bonus: 0,
            signup_bonus_enabled: false,
        }
    }

    /// `None` means the level is not configured, which ends a cascade.
    pub fn level_rate(&self, level: u32) -> Option<Rate> {
        self.level_rates.get(&level).copied()
    }
}

impl Default for ReferralSettings {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Terms of an investment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPlan {
    pub plan_id: String,
    pub daily_rate: Rate,
    pub duration_days: u32,
    pub principal_policy: PrincipalPolicy,
    pub min_principal: Option<Amount>,
    pub max_principal: Option<Amount>,
}

/// Source of referral and plan settings.
pub trait SettingsProvider: Send + Sync {
    fn referral_settings(&self) -> LedgerResult<ReferralSettings>;
    fn investment_plan(&self, plan_id: &str) -> LedgerResult<Option<InvestmentPlan>>;
}

/// In-memory settings, swappable at runtime by an operator.
#[derive(Debug, Default)]
pub struct StaticSettings {
    referral: RwLock<ReferralSettings>,
    plans: RwLock<HashMap<String, InvestmentPlan>>,
}

impl StaticSettings {
    pub fn new(referral: ReferralSettings, plans: Vec<InvestmentPlan>) -> Self {
        Self {
            referral: RwLock::new(referral),
            plans: RwLock::new(
                plans
                    .into_iter()
                    .map(|p| (p.plan_id.clone(), p))
                    .collect(),
            ),
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        info!(path = %path.display(), "⚙️ Settings loaded");
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: SettingsFile = toml::from_str(raw)?;
        file.into_settings()
    }

    pub fn set_referral(&self, referral: ReferralSettings) {
        *self.referral.write() = referral;
    }

    pub fn upsert_plan(&self, plan: InvestmentPlan) {
        self.plans.write().insert(plan.plan_id.clone(), plan);
    }
}

impl SettingsProvider for StaticSettings {
    fn referral_settings(&self) -> LedgerResult<ReferralSettings> {
        Ok(self.referral.read().clone())
    }

    fn investment_plan(&self, plan_id: &str) -> LedgerResult<Option<InvestmentPlan>> {
        Ok(self.plans.read().get(plan_id).cloned())
    }
}

// =============================================================================
// TOML FILE FORMAT
// =============================================================================

#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    referral: Option<ReferralSection>,
    #[serde(default)]
    plans: HashMap<String, PlanSection>,
}

#[derive(Debug, Deserialize)]
struct ReferralSection {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    max_levels: u32,
    /// Level number (as a string key) to percentage, e.g. `"1" = 5.0`.
    #[serde(default)]
    level_percentages: BTreeMap<String, f64>,
    #[serde(default)]
    signup_bonus: Option<String>,
    #[serde(default)]
    signup_bonus_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct PlanSection {
    daily_rate_percent: f64,
    duration_days: u32,
    #[serde(default = "default_principal_policy")]
    principal_policy: String,
    #[serde(default)]
    min_principal: Option<String>,
    #[serde(default)]
    max_principal: Option<String>,
}

fn default_principal_policy() -> String {
    "return".to_string()
}

impl SettingsFile {
    fn into_settings(self) -> Result<StaticSettings> {
        let referral = match self.referral {
            Some(section) => {
                let mut level_rates = BTreeMap::new();
                for (level, percent) in section.level_percentages {
                    let level: u32 = level
                        .trim()
                        .parse()
                        .with_context(|| format!("bad referral level {:?}", level))?;
                    anyhow::ensure!(level >= 1, "referral levels start at 1");
                    anyhow::ensure!(
                        (0.0..=100.0).contains(&percent),
                        "referral level {}: percentage must be within 0..=100",
                        level
                    );
                    level_rates.insert(level, Rate::from_percent(percent));
                }
                let signup_bonus = match section.signup_bonus.as_deref() {
                    Some(s) => parse_amount(s)?,
                    None => 0,
                };
                ReferralSettings {
                    enabled: section.enabled,
                    max_levels: section.max_levels,
                    level_rates,
                    signup_bonus,
                    signup_bonus_enabled: section.signup_bonus_enabled,
                }
            }
            None => ReferralSettings::disabled(),
        };

        let mut plans = Vec::with_capacity(self.plans.len());
        for (plan_id, section) in self.plans {
            let principal_policy = PrincipalPolicy::parse(&section.principal_policy)
                .with_context(|| {
                    format!(
                        "plan {}: principal_policy must be \"return\" or \"retain\"",
                        plan_id
                    )
                })?;
            anyhow::ensure!(
                section.duration_days > 0,
                "plan {}: duration_days must be positive",
                plan_id
            );
            plans.push(InvestmentPlan {
                daily_rate: Rate::from_percent(section.daily_rate_percent),
                duration_days: section.duration_days,
                principal_policy,
                min_principal: section.min_principal.as_deref().map(parse_amount).transpose()?,
                max_principal: section.max_principal.as_deref().map(parse_amount).transpose()?,
                plan_id,
            });
        }

        Ok(StaticSettings::new(referral, plans))
    }
}
