//! Charge-engine scenarios: partial affordability, idempotency, FIFO
//! grant consumption, and the signup-bonus cap.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use canvass_billing::{
    BalanceService, ChargeService, ConsumptionService, FixedPricing, SignupService,
};
use canvass_core::{Config, CreditSource, Error, EvaluationId, UserId};
use canvass_store::{Database, users};
use chrono::{Duration, Utc};

struct Fixture {
    db: Arc<Database>,
    balance: BalanceService,
    charge: ChargeService,
}

impl Fixture {
    fn new(unit_price: f64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("canvass.db"), 4).unwrap());
        std::mem::forget(dir);

        let balance = BalanceService::new(Arc::clone(&db));
        let charge = ChargeService::new(Arc::clone(&db), Arc::new(FixedPricing::new(unit_price)));
        Self { db, balance, charge }
    }

    fn user(&self, n: u32) -> UserId {
        let id = UserId::new(format!("00000000-0000-4000-8000-{n:012}"));
        let conn = self.db.conn();
        users::insert_user(&conn, &id, &format!("user{n}@example.com"), "hash", None).unwrap();
        id
    }

    async fn top_up(&self, user: &UserId, amount: f64) {
        self.balance
            .credit(user, amount, CreditSource::Payment, None, "top up", None, None)
            .await
            .unwrap();
    }
}

fn evals(ids: &[i64]) -> Vec<EvaluationId> {
    ids.iter().copied().map(EvaluationId).collect()
}

#[tokio::test]
async fn partial_charge_then_idempotent_rerun() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    fx.top_up(&user, 0.025).await;

    let ids = evals(&[1, 2, 3, 4]);
    let result = fx.charge.charge(&user, &ids).await.unwrap();

    assert_eq!(result.charged, evals(&[1, 2]));
    assert_eq!(result.skipped, evals(&[3, 4]));
    assert!((result.total_charged - 0.02).abs() < 1e-9);
    assert!((result.remaining_balance - 0.005).abs() < 1e-9);

    // Identical rerun: everything already consumed or unaffordable.
    let rerun = fx.charge.charge(&user, &ids).await.unwrap();
    assert!(rerun.charged.is_empty());
    assert_eq!(rerun.skipped, ids);
    assert_eq!(rerun.total_charged, 0.0);
    assert!((rerun.remaining_balance - 0.005).abs() < 1e-9);
}

#[tokio::test]
async fn charge_debits_equal_unit_price_times_charged() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    fx.top_up(&user, 1.0).await;

    let before = fx.balance.balance(&user).await.unwrap().available;
    let result = fx.charge.charge(&user, &evals(&[10, 11, 12])).await.unwrap();
    let after = fx.balance.balance(&user).await.unwrap().available;

    #[allow(clippy::cast_precision_loss)]
    let expected = 0.01 * result.charged.len() as f64;
    assert!((result.total_charged - expected).abs() < 1e-9);
    assert!((before - after - result.total_charged).abs() < 1e-9);
    assert!((after - result.remaining_balance).abs() < 1e-9);
}

#[tokio::test]
async fn empty_and_all_consumed_charges_are_free() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    fx.top_up(&user, 0.1).await;

    let empty = fx.charge.charge(&user, &[]).await.unwrap();
    assert!(empty.charged.is_empty() && empty.skipped.is_empty());
    assert_eq!(empty.total_charged, 0.0);

    fx.charge.charge(&user, &evals(&[5])).await.unwrap();
    let again = fx.charge.charge(&user, &evals(&[5])).await.unwrap();
    assert!(again.charged.is_empty());
    assert_eq!(again.skipped, evals(&[5]));
    assert_eq!(again.total_charged, 0.0);
}

#[tokio::test]
async fn zero_price_charges_everything_for_nothing() {
    let fx = Fixture::new(0.0);
    let user = fx.user(1);

    let result = fx.charge.charge(&user, &evals(&[1, 2, 3])).await.unwrap();
    assert_eq!(result.charged, evals(&[1, 2, 3]));
    assert_eq!(result.total_charged, 0.0);
}

#[tokio::test]
async fn debit_consumes_grants_fifo_by_expiry() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    let now = Utc::now();

    // Never-expiring grant created first, expiring grant second: the
    // expiring one must still drain first.
    fx.balance
        .credit(&user, 1.0, CreditSource::Payment, None, "payment", None, None)
        .await
        .unwrap();
    fx.balance
        .credit(
            &user,
            0.5,
            CreditSource::PromoCode,
            Some(now + Duration::days(2)),
            "promo",
            None,
            None,
        )
        .await
        .unwrap();

    fx.balance.debit(&user, 0.6, "spend", None, None).await.unwrap();

    let conn = fx.db.conn();
    let grants = users::active_grants(&conn, &user, now).unwrap();
    drop(conn);

    // Expiring grant fully drained (gone from active), 0.1 taken from the
    // never-expiring one.
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].source, CreditSource::Payment);
    assert!((grants[0].remaining_amount - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn raw_debit_below_balance_fails() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    fx.top_up(&user, 0.05).await;

    let err = fx.balance.debit(&user, 0.06, "too much", None, None).await;
    assert!(matches!(
        err,
        Err(Error::InsufficientBalance { required, available })
            if (required - 0.06).abs() < 1e-9 && (available - 0.05).abs() < 1e-9
    ));

    // Failed debit must not touch the balance or the audit log.
    let info = fx.balance.balance(&user).await.unwrap();
    assert!((info.available - 0.05).abs() < 1e-9);
    let (txs, total) = fx.balance.transactions(&user, 10, 0).await.unwrap();
    assert_eq!(total, 1); // just the top-up credit
    assert_eq!(txs[0].tx_type, canvass_core::TransactionType::Credit);
}

#[tokio::test]
async fn expired_grants_do_not_count() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);

    fx.balance
        .credit(
            &user,
            5.0,
            CreditSource::Payment,
            Some(Utc::now() - Duration::hours(1)),
            "expired",
            None,
            None,
        )
        .await
        .unwrap();

    let info = fx.balance.balance(&user).await.unwrap();
    assert_eq!(info.available, 0.0);

    let result = fx.charge.charge(&user, &evals(&[1])).await.unwrap();
    assert!(result.charged.is_empty());
    assert_eq!(result.skipped, evals(&[1]));
}

#[tokio::test]
async fn preview_matches_subsequent_charge() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    fx.top_up(&user, 0.025).await;
    fx.charge.charge(&user, &evals(&[9])).await.unwrap();

    let ids = evals(&[9, 20, 21, 22]);
    let preview = fx.charge.preview(&user, &ids).await.unwrap();
    assert_eq!(preview.fresh_count, 3);
    assert_eq!(preview.already_consumed_count, 1);
    assert!((preview.estimated_cost - 0.03).abs() < 1e-9);
    assert_eq!(preview.affordable_count, 1);
    assert!(preview.needs_top_up);

    let actual = fx.charge.charge(&user, &ids).await.unwrap();
    assert!(actual.total_charged <= preview.estimated_cost + 1e-9);
    assert_eq!(actual.charged.len(), preview.affordable_count);
}

#[tokio::test]
async fn direct_consumption_surfaces_duplicate() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    let consumption = ConsumptionService::new(Arc::clone(&fx.db));

    consumption.record(&user, EvaluationId(3), 0.01).await.unwrap();
    let dup = consumption.record(&user, EvaluationId(3), 0.01).await;
    assert!(matches!(dup, Err(Error::DuplicateConsumption { .. })));

    assert!(consumption.is_consumed(&user, EvaluationId(3)).await.unwrap());
    assert!(!consumption.is_consumed(&user, EvaluationId(4)).await.unwrap());
}

#[tokio::test]
async fn signup_bonus_respects_global_cap() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(dir.path().join("canvass.db"), 4).unwrap());
    std::mem::forget(dir);

    let mut config = Config::default();
    config.billing.max_signup_bonuses = 2;
    config.billing.signup_bonus_amount = 0.5;
    let signup = SignupService::new(Arc::clone(&db), &config);
    let balance = BalanceService::new(Arc::clone(&db));

    let mut ids = Vec::new();
    for n in 1..=3 {
        let id = UserId::new(format!("00000000-0000-4000-8000-{n:012}"));
        let conn = db.conn();
        users::insert_user(&conn, &id, &format!("u{n}@example.com"), "hash", None).unwrap();
        drop(conn);
        ids.push(id);
    }

    assert!(signup.verify_user(&ids[0]).await.unwrap().is_some());
    assert!(signup.verify_user(&ids[1]).await.unwrap().is_some());
    // Cap reached: third user verifies but gets nothing.
    assert!(signup.verify_user(&ids[2]).await.unwrap().is_none());

    let conn = db.conn();
    let third = users::get_user(&conn, &ids[2]).unwrap().unwrap();
    drop(conn);
    assert!(third.email_verified);
    assert!(third.is_active);

    let info = balance.balance(&ids[2]).await.unwrap();
    assert_eq!(info.available, 0.0);
    let funded = balance.balance(&ids[0]).await.unwrap();
    assert!((funded.available - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn balance_reports_expiring_soon_slice() {
    let fx = Fixture::new(0.01);
    let user = fx.user(1);
    let now = Utc::now();

    fx.top_up(&user, 1.0).await;
    fx.balance
        .credit(
            &user,
            0.3,
            CreditSource::Referral,
            Some(now + Duration::days(3)),
            "referral",
            None,
            None,
        )
        .await
        .unwrap();

    let info = fx.balance.balance(&user).await.unwrap();
    assert!((info.available - 1.3).abs() < 1e-9);
    assert!((info.expiring_soon - 0.3).abs() < 1e-9);
    assert!(info.expiring_at.is_some());
}
