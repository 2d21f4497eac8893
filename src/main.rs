//! ledgerd - wallet ledger operator tool
//!
//! Every subcommand runs one engine operation against the ledger database and
//! prints the outcome as JSON. `scheduler` keeps running and accrues
//! investments once per poll interval.
//!
//! Usage:
//!   ledgerd register alice --referred-by bob
//!   ledgerd submit-deposit alice 1000 --proof-url https://...
//!   ledgerd approve-deposit <DEPOSIT_ID> --admin ops-1
//!   ledgerd accrue --date 2026-06-02
//!   ledgerd history alice --limit 20

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_ledger::config::{load_env, EngineConfig};
use wallet_ledger::models::parse_amount;
use wallet_ledger::{HistoryCursor, TracingNotifier, WalletEngine};

/// Wallet ledger operator tool
#[derive(Parser, Debug)]
#[command(name = "ledgerd")]
#[command(about = "Operate the wallet ledger: requests, investments, accrual and reconciliation")]
struct Cli {
    /// Path to the SQLite ledger database
    #[arg(long, env = "LEDGER_DB_PATH")]
    db_path: Option<String>,

    /// TOML file with referral and investment plan settings
    #[arg(long, env = "LEDGER_SETTINGS_PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open an account (credits the signup bonus when enabled)
    Register {
        user_id: String,
        #[arg(long)]
        referred_by: Option<String>,
    },

    /// Attach a referrer to an account that has none
    LinkReferrer { user_id: String, referrer_id: String },

    /// Record a deposit request (no balance effect)
    SubmitDeposit {
        user_id: String,
        /// Decimal amount, e.g. 1000 or 12.50
        amount: String,
        #[arg(long)]
        proof_url: Option<String>,
    },

    /// Credit a pending deposit and pay referral commissions
    ApproveDeposit {
        deposit_id: String,
        #[arg(long)]
        admin: String,
    },

    RejectDeposit {
        deposit_id: String,
        #[arg(long)]
        admin: String,
    },

    /// Pay any commission levels missing for an approved deposit
    RetryCommissions { deposit_id: String },

    /// Record a withdrawal request (balance is checked at approval)
    SubmitWithdrawal { user_id: String, amount: String },

    ApproveWithdrawal {
        withdrawal_id: String,
        #[arg(long)]
        admin: String,
    },

    RejectWithdrawal {
        withdrawal_id: String,
        #[arg(long)]
        admin: String,
    },

    /// Refund a completed withdrawal
    ReverseWithdrawal {
        withdrawal_id: String,
        #[arg(long)]
        admin: String,
    },

    /// Open an investment position
    Invest {
        user_id: String,
        plan_id: String,
        principal: String,
        /// Start date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        start: Option<NaiveDate>,
    },

    /// Run the daily accrual for one date
    Accrue {
        /// Accrual date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Backfill accruals for every date in a range, oldest first
    AccrueRange {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },

    /// Accrue once per poll interval until stopped
    Scheduler {
        /// Seconds between runs (overrides ACCRUAL_POLL_SECS)
        #[arg(long)]
        poll_secs: Option<u64>,
    },

    Balance { user_id: String },

    /// Transaction history, newest first
    History {
        user_id: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Resume below this ledger sequence (from a previous `next_cursor`)
        #[arg(long)]
        before: Option<i64>,
    },

    /// Check every balance against its ledger entries
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(settings) = cli.settings {
        config.settings_path = Some(settings);
    }

    let engine = WalletEngine::from_config(&config, Arc::new(TracingNotifier))?;

    match cli.command {
        Commands::Register {
            user_id,
            referred_by,
        } => print_json(&engine.register_user(&user_id, referred_by.as_deref())?),
        Commands::LinkReferrer {
            user_id,
            referrer_id,
        } => print_json(&engine.link_referrer(&user_id, &referrer_id)?),
        Commands::SubmitDeposit {
            user_id,
            amount,
            proof_url,
        } => print_json(&engine.submit_deposit(
            &user_id,
            parse_amount(&amount)?,
            proof_url.as_deref(),
        )?),
        Commands::ApproveDeposit { deposit_id, admin } => {
            let approval = engine.approve_deposit(&deposit_id, &admin)?;
            if !approval.cascade.is_complete() {
                warn!(
                    deposit_id = %deposit_id,
                    failures = approval.cascade.failures.len(),
                    "Some commission levels failed; run retry-commissions"
                );
            }
            print_json(&approval)
        }
        Commands::RejectDeposit { deposit_id, admin } => {
            print_json(&engine.reject_deposit(&deposit_id, &admin)?)
        }
        Commands::RetryCommissions { deposit_id } => {
            print_json(&engine.retry_commissions(&deposit_id)?)
        }
        Commands::SubmitWithdrawal { user_id, amount } => {
            print_json(&engine.submit_withdrawal(&user_id, parse_amount(&amount)?)?)
        }
        Commands::ApproveWithdrawal {
            withdrawal_id,
            admin,
        } => print_json(&engine.approve_withdrawal(&withdrawal_id, &admin)?),
        Commands::RejectWithdrawal {
            withdrawal_id,
            admin,
        } => print_json(&engine.reject_withdrawal(&withdrawal_id, &admin)?),
        Commands::ReverseWithdrawal {
            withdrawal_id,
            admin,
        } => print_json(&engine.reverse_withdrawal(&withdrawal_id, &admin)?),
        Commands::Invest {
            user_id,
            plan_id,
            principal,
            start,
        } => print_json(&engine.open_investment(
            &user_id,
            &plan_id,
            parse_amount(&principal)?,
            start.unwrap_or_else(today),
        )?),
        Commands::Accrue { date } => {
            print_json(&engine.run_daily_accrual(date.unwrap_or_else(today))?)
        }
        Commands::AccrueRange { from, to } => print_json(&engine.run_accrual_range(from, to)?),
        Commands::Scheduler { poll_secs } => {
            let poll = poll_secs
                .filter(|&s| s > 0)
                .map(std::time::Duration::from_secs)
                .unwrap_or(config.accrual_poll);
            run_scheduler(engine, poll).await
        }
        Commands::Balance { user_id } => print_json(&engine.get_account(&user_id)?),
        Commands::History {
            user_id,
            limit,
            before,
        } => print_json(&engine.get_transaction_history(
            &user_id,
            before.map(|before_seq| HistoryCursor { before_seq }),
            limit,
        )?),
        Commands::Reconcile => {
            let report = engine.reconcile()?;
            print_json(&report)?;
            if !report.is_clean() {
                anyhow::bail!("{} account(s) out of balance", report.mismatches.len());
            }
            Ok(())
        }
    }
}

/// Daily accrual loop. Each run is blocking store work, so it goes to the
/// blocking pool; a failed run is logged and the next tick tries again.
async fn run_scheduler(engine: WalletEngine, poll: std::time::Duration) -> Result<()> {
    info!(poll_secs = poll.as_secs(), "🗓️ Accrual scheduler started");
    let mut ticker = interval(poll);
    loop {
        ticker.tick().await;
        let as_of = today();
        let worker = engine.clone();

        match tokio::task::spawn_blocking(move || worker.run_daily_accrual(as_of)).await {
            Ok(Ok(report)) => {
                if !report.failures.is_empty() {
                    warn!(as_of = %as_of, failed = report.failures.len(), "Accrual run had failures");
                }
            }
            Ok(Err(e)) => error!(as_of = %as_of, error = %e, "Accrual run failed"),
            Err(e) => error!(as_of = %as_of, error = %e, "Accrual task panicked"),
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wallet_ledger=info,ledgerd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
