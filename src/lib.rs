//! Wallet Ledger Library
//!
//! Financial core of the wallet: the append-only ledger, deposit and
//! withdrawal state machines, investment accrual and the multi-level
//! referral commission cascade. `ledgerd` and the integration tests use
//! everything through `WalletEngine`.

pub mod commission;
pub mod config;
pub mod engine;
pub mod error;
pub mod investment;
pub mod models;
pub mod notify;
pub mod onboarding;
pub mod requests;
pub mod settings;
pub mod store;

pub use commission::{
    CascadeReport, CascadeTermination, CascadeTrigger, CommissionEngine, LevelFailure, LevelSkip,
    SkipReason,
};
pub use config::EngineConfig;
pub use engine::WalletEngine;
pub use error::{LedgerError, LedgerResult};
pub use investment::{AccrualReport, AccrualScheduler, InvestmentBook};
pub use notify::{Notification, NotificationSink, NullNotifier, TracingNotifier};
pub use onboarding::{Onboarding, Registration};
pub use requests::{DepositApproval, DepositDesk, WithdrawalApproval, WithdrawalDesk};
pub use settings::{InvestmentPlan, ReferralSettings, SettingsProvider, StaticSettings};
pub use store::{
    HistoryCursor, HistoryPage, LedgerStore, NewEntry, Overdraft, ReconciliationReport,
    StoreOptions,
};
