//! Environment-driven configuration for the engine and `ledgerd`.

use anyhow::{Context, Result};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::{env, time::Duration};

use crate::commission::DEFAULT_WRITE_ATTEMPTS;
use crate::settings::StaticSettings;
use crate::store::history::MAX_PAGE_SIZE;
use crate::store::StoreOptions;

pub const DEFAULT_DB_PATH: &str = "wallet_ledger.db";
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 50;
pub const DEFAULT_ACCRUAL_POLL_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub db_path: String,
    /// TOML referral/plan settings. Without one the referral program is off
    /// and no plans exist.
    pub settings_path: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub commission_write_attempts: u32,
    pub history_page_size: usize,
    pub accrual_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            settings_path: None,
            busy_timeout: Duration::from_millis(5_000),
            commission_write_attempts: DEFAULT_WRITE_ATTEMPTS,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            accrual_poll: Duration::from_secs(DEFAULT_ACCRUAL_POLL_SECS),
        }
    }
}

impl EngineConfig {
    /// Read the process environment. Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let db_path = get("LEDGER_DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.db_path);
        let settings_path = get("LEDGER_SETTINGS_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let busy_timeout = get("LEDGER_BUSY_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);
        let commission_write_attempts = get("LEDGER_COMMISSION_WRITE_ATTEMPTS")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.commission_write_attempts)
            .max(1);
        let history_page_size = get("LEDGER_HISTORY_PAGE_SIZE")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.history_page_size)
            .clamp(1, MAX_PAGE_SIZE);
        let accrual_poll = get("ACCRUAL_POLL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.accrual_poll);

        Self {
            db_path,
            settings_path,
            busy_timeout,
            commission_write_attempts,
            history_page_size,
            accrual_poll,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: self.busy_timeout,
        }
    }

    /// Settings from `settings_path`, or everything switched off.
    pub fn load_settings(&self) -> Result<StaticSettings> {
        match &self.settings_path {
            Some(path) => StaticSettings::from_toml_file(path)
                .with_context(|| format!("LEDGER_SETTINGS_PATH={}", path.display())),
            None => Ok(StaticSettings::default()),
        }
    }
}

/// Load `.env` from the working directory (and its parents), then from the
/// crate root.
pub fn load_env() {
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]), EngineConfig::default());
    }

    #[test]
    fn test_overrides_and_clamps() {
        let cfg = config(&[
            ("LEDGER_DB_PATH", "/var/lib/ledger/main.db"),
            ("LEDGER_SETTINGS_PATH", "ledger.toml"),
            ("LEDGER_BUSY_TIMEOUT_MS", "250"),
            ("LEDGER_COMMISSION_WRITE_ATTEMPTS", "0"),
            ("LEDGER_HISTORY_PAGE_SIZE", "100000"),
            ("ACCRUAL_POLL_SECS", "60"),
        ]);
        assert_eq!(cfg.db_path, "/var/lib/ledger/main.db");
        assert_eq!(cfg.settings_path, Some(PathBuf::from("ledger.toml")));
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert_eq!(cfg.commission_write_attempts, 1);
        assert_eq!(cfg.history_page_size, MAX_PAGE_SIZE);
        assert_eq!(cfg.accrual_poll, Duration::from_secs(60));
    }

    #[test]
    fn test_garbage_falls_back() {
        let cfg = config(&[
            ("LEDGER_BUSY_TIMEOUT_MS", "soon"),
            ("LEDGER_HISTORY_PAGE_SIZE", "-3"),
            ("ACCRUAL_POLL_SECS", "0"),
        ]);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5_000));
        assert_eq!(cfg.history_page_size, DEFAULT_HISTORY_PAGE_SIZE);
        assert_eq!(cfg.accrual_poll, Duration::from_secs(DEFAULT_ACCRUAL_POLL_SECS));
    }

    #[test]
    fn test_no_settings_file_means_program_off() {
        let settings = EngineConfig::default().load_settings().unwrap();
        use crate::settings::SettingsProvider;
        assert!(!settings.referral_settings().unwrap().enabled);
    }
}
