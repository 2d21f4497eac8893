//! End-to-end ledger properties and scenarios, through the public engine API.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

use wallet_ledger::models::{
    parse_amount, PositionStatus, PrincipalPolicy, Rate, TransactionType, TriggerType,
    WithdrawalStatus,
};
use wallet_ledger::{
    CascadeTermination, InvestmentPlan, LedgerError, LedgerStore, NullNotifier, ReferralSettings,
    StaticSettings, WalletEngine,
};

fn amount(s: &str) -> i64 {
    parse_amount(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn referral(max_levels: u32, percentages: &[(u32, f64)]) -> ReferralSettings {
    ReferralSettings {
        enabled: true,
        max_levels,
        level_rates: percentages
            .iter()
            .map(|&(level, pct)| (level, Rate::from_percent(pct)))
            .collect::<BTreeMap<_, _>>(),
        signup_bonus: 0,
        signup_bonus_enabled: false,
    }
}

fn plan(id: &str, daily_fraction: f64, days: u32, policy: PrincipalPolicy) -> InvestmentPlan {
    InvestmentPlan {
        plan_id: id.to_string(),
        daily_rate: Rate::from_fraction(daily_fraction),
        duration_days: days,
        principal_policy: policy,
        min_principal: None,
        max_principal: None,
    }
}

fn engine(referral: ReferralSettings, plans: Vec<InvestmentPlan>) -> WalletEngine {
    let store = Arc::new(LedgerStore::open_memory().unwrap());
    WalletEngine::new(
        store,
        Arc::new(StaticSettings::new(referral, plans)),
        Arc::new(NullNotifier),
    )
}

/// Submit and approve a deposit in one go.
fn fund(engine: &WalletEngine, user: &str, value: &str) {
    let deposit = engine.submit_deposit(user, amount(value), None).unwrap();
    engine.approve_deposit(&deposit.id, "admin").unwrap();
}

fn assert_reconciled(engine: &WalletEngine) {
    let report = engine.reconcile().unwrap();
    assert!(report.is_clean(), "ledger out of balance: {:?}", report.mismatches);
}

#[test]
fn deposit_cascade_scenario() {
    let engine = engine(referral(5, &[(1, 5.0), (2, 2.0)]), Vec::new());
    engine.register_user("B", None).unwrap();
    engine.register_user("A", Some("B")).unwrap();
    engine.register_user("U", Some("A")).unwrap();

    let deposit = engine.submit_deposit("U", amount("1000"), None).unwrap();
    let approval = engine.approve_deposit(&deposit.id, "admin").unwrap();

    assert_eq!(approval.transaction.kind, TransactionType::Deposit);
    assert_eq!(approval.transaction.amount, amount("1000"));
    assert_eq!(engine.get_balance("U").unwrap(), amount("1000"));
    assert_eq!(engine.get_balance("A").unwrap(), amount("50"));
    assert_eq!(engine.get_balance("B").unwrap(), amount("20"));

    let a_entries = engine.get_transaction_history("A", None, None).unwrap().entries;
    assert_eq!(a_entries.len(), 1);
    assert_eq!(a_entries[0].kind, TransactionType::ReferralCommission);
    assert_eq!(a_entries[0].amount, amount("50"));

    let records = engine
        .store()
        .commissions_for_trigger(TriggerType::Deposit, &deposit.id)
        .unwrap();
    let summary: Vec<_> = records
        .iter()
        .map(|r| (r.referrer_user_id.as_str(), r.referred_user_id.as_str(), r.level, r.commission_amount))
        .collect();
    assert_eq!(
        summary,
        vec![("A", "U", 1, amount("50")), ("B", "U", 2, amount("20"))]
    );
    assert_eq!(approval.cascade.termination, CascadeTermination::ChainExhausted);
    assert_reconciled(&engine);
}

#[test]
fn cascade_on_depth_50_chain_pays_five_levels() {
    let engine = engine(
        referral(5, &[(1, 5.0), (2, 4.0), (3, 3.0), (4, 2.0), (5, 1.0)]),
        Vec::new(),
    );
    engine.register_user("u0", None).unwrap();
    for i in 1..=50 {
        let referrer = format!("u{}", i - 1);
        engine
            .register_user(&format!("u{}", i), Some(referrer.as_str()))
            .unwrap();
    }

    let deposit = engine.submit_deposit("u50", amount("1000"), None).unwrap();
    let approval = engine.approve_deposit(&deposit.id, "admin").unwrap();

    assert_eq!(approval.cascade.paid.len(), 5);
    for (i, record) in approval.cascade.paid.iter().enumerate() {
        let level = i as u32 + 1;
        assert_eq!(record.level, level);
        assert_eq!(record.referrer_user_id, format!("u{}", 50 - level));
    }
    assert_eq!(
        approval
            .cascade
            .paid
            .iter()
            .map(|r| r.commission_amount)
            .collect::<Vec<_>>(),
        vec![amount("50"), amount("40"), amount("30"), amount("20"), amount("10")]
    );
    assert_eq!(
        approval.cascade.termination,
        CascadeTermination::MaxLevelReached { max_levels: 5 }
    );

    let commission_entries: usize = (0..50)
        .map(|i| {
            engine
                .history_iter(&format!("u{}", i))
                .map(|t| t.unwrap())
                .filter(|t| t.kind == TransactionType::ReferralCommission)
                .count()
        })
        .sum();
    assert_eq!(commission_entries, 5);
    assert_reconciled(&engine);
}

#[test]
fn insufficient_balance_guard() {
    let engine = engine(ReferralSettings::disabled(), Vec::new());
    engine.register_user("u", None).unwrap();
    fund(&engine, "u", "300");

    let w = engine.submit_withdrawal("u", amount("500")).unwrap();
    let err = engine.approve_withdrawal(&w.id, "admin").unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(
        engine.store().withdrawal(&w.id).unwrap().status,
        WithdrawalStatus::Pending
    );
    assert_eq!(engine.get_balance("u").unwrap(), amount("300"));
    assert_reconciled(&engine);
}

#[test]
fn three_day_investment_scenario() {
    let engine = engine(
        ReferralSettings::disabled(),
        vec![plan("three-day", 0.01, 3, PrincipalPolicy::Retain)],
    );
    engine.register_user("u", None).unwrap();
    fund(&engine, "u", "10000");

    let start = date(2026, 7, 1);
    let position = engine
        .open_investment("u", "three-day", amount("10000"), start)
        .unwrap();

    for day in 2..=4 {
        let report = engine.run_daily_accrual(date(2026, 7, day)).unwrap();
        assert_eq!(report.accrued.len(), 1);
        assert_eq!(report.accrued[0].profit, amount("100"));
    }

    let position = engine.store().position(&position.id).unwrap();
    assert_eq!(position.status, PositionStatus::Completed);
    assert_eq!(position.total_profit_earned, amount("300"));
    assert_eq!(position.last_accrual_date, Some(date(2026, 7, 4)));

    let profits: Vec<_> = engine
        .history_iter("u")
        .map(|t| t.unwrap())
        .filter(|t| t.kind == TransactionType::DailyProfit)
        .collect();
    assert_eq!(profits.len(), 3);
    assert!(profits.iter().all(|t| t.amount == amount("100")));
    let mut keys: Vec<_> = profits
        .iter()
        .map(|t| t.idempotency_key.clone().unwrap())
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);

    // Completed positions never accrue again.
    let after = engine.run_daily_accrual(date(2026, 7, 5)).unwrap();
    assert!(after.accrued.is_empty());
    assert_eq!(engine.get_balance("u").unwrap(), amount("300"));
    assert_reconciled(&engine);
}

#[test]
fn skipped_scheduler_day_is_caught_up() {
    let engine = engine(
        ReferralSettings::disabled(),
        vec![plan("three-day", 0.01, 3, PrincipalPolicy::Retain)],
    );
    engine.register_user("u", None).unwrap();
    fund(&engine, "u", "10000");
    let position = engine
        .open_investment("u", "three-day", amount("10000"), date(2026, 7, 1))
        .unwrap();

    // Scheduler runs on the first accrual day, misses the second, runs on the third.
    let first = engine.run_daily_accrual(date(2026, 7, 2)).unwrap();
    assert_eq!(first.accrued[0].profit, amount("100"));
    let last = engine.run_daily_accrual(date(2026, 7, 4)).unwrap();
    assert_eq!(last.accrued.len(), 1);
    assert_eq!(last.accrued[0].dates, vec![date(2026, 7, 3), date(2026, 7, 4)]);
    assert_eq!(last.accrued[0].profit, amount("200"));
    assert!(last.accrued[0].completed);

    let position = engine.store().position(&position.id).unwrap();
    assert_eq!(position.status, PositionStatus::Completed);
    assert_eq!(position.total_profit_earned, amount("300"));
    assert_eq!(engine.get_balance("u").unwrap(), amount("300"));
    assert_reconciled(&engine);
}

#[test]
fn accrual_is_idempotent_per_date() {
    let engine = engine(
        ReferralSettings::disabled(),
        vec![plan("weekly", 0.01, 7, PrincipalPolicy::Return)],
    );
    engine.register_user("u", None).unwrap();
    fund(&engine, "u", "10000");
    engine
        .open_investment("u", "weekly", amount("10000"), date(2026, 8, 1))
        .unwrap();

    let first = engine.run_daily_accrual(date(2026, 8, 2)).unwrap();
    let second = engine.run_daily_accrual(date(2026, 8, 2)).unwrap();
    let range = engine
        .run_accrual_range(date(2026, 8, 1), date(2026, 8, 2))
        .unwrap();

    assert_eq!(first.accrued.len(), 1);
    assert!(second.accrued.is_empty());
    assert!(range.iter().all(|r| r.accrued.is_empty()));
    assert_eq!(engine.get_balance("u").unwrap(), amount("100"));
    assert_reconciled(&engine);
}

#[test]
fn reconciliation_holds_across_every_flow() {
    let mut settings = referral(3, &[(1, 5.0), (2, 2.0), (3, 1.0)]);
    settings.signup_bonus = amount("5");
    settings.signup_bonus_enabled = true;
    let engine = engine(settings, vec![plan("p", 0.02, 2, PrincipalPolicy::Return)]);

    engine.register_user("root", None).unwrap();
    engine.register_user("mid", Some("root")).unwrap();
    engine.register_user("leaf", Some("mid")).unwrap();

    fund(&engine, "leaf", "2000");
    fund(&engine, "mid", "500.50");

    let rejected = engine.submit_deposit("leaf", amount("999"), None).unwrap();
    engine.reject_deposit(&rejected.id, "admin").unwrap();

    engine
        .open_investment("leaf", "p", amount("1000"), date(2026, 9, 1))
        .unwrap();
    engine
        .run_accrual_range(date(2026, 9, 1), date(2026, 9, 5))
        .unwrap();

    let w1 = engine.submit_withdrawal("leaf", amount("700")).unwrap();
    engine.approve_withdrawal(&w1.id, "admin").unwrap();
    engine.reverse_withdrawal(&w1.id, "admin").unwrap();
    let w2 = engine.submit_withdrawal("mid", amount("100")).unwrap();
    engine.reject_withdrawal(&w2.id, "admin").unwrap();
    let w3 = engine.submit_withdrawal("root", amount("1000000")).unwrap();
    assert!(engine.approve_withdrawal(&w3.id, "admin").is_err());

    assert_reconciled(&engine);

    // leaf: 5 bonus + 2000 - 1000 invested + 2 * 20 profit + 1000 principal
    assert_eq!(engine.get_balance("leaf").unwrap(), amount("2045"));
    let leaf = engine.get_account("leaf").unwrap();
    assert_eq!(leaf.total_deposited, amount("2000"));
    assert_eq!(leaf.total_withdrawn, 0);
}

#[test]
fn history_is_reverse_chronological_and_restartable() {
    let engine = engine(ReferralSettings::disabled(), Vec::new());
    engine.register_user("u", None).unwrap();
    for i in 1..=5 {
        fund(&engine, "u", &i.to_string());
    }

    let first = engine.get_transaction_history("u", None, Some(2)).unwrap();
    let cursor = first.next_cursor.unwrap();
    let rest = engine
        .get_transaction_history("u", Some(cursor), Some(10))
        .unwrap();

    let amounts: Vec<_> = first
        .entries
        .iter()
        .chain(rest.entries.iter())
        .map(|t| t.amount)
        .collect();
    assert_eq!(
        amounts,
        vec![amount("5"), amount("4"), amount("3"), amount("2"), amount("1")]
    );
    assert!(rest.next_cursor.is_none());

    let balances: Vec<_> = engine
        .history_iter("u")
        .map(|t| t.unwrap().balance_after)
        .collect();
    assert_eq!(
        balances,
        vec![amount("15"), amount("10"), amount("6"), amount("3"), amount("1")]
    );
}
