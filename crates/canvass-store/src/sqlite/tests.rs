#![allow(clippy::unwrap_used)]

use canvass_core::{BatchStatus, CreditSource, PromptId, TransactionType, UserId};
use chrono::{Duration, Utc};

use super::{Database, evals, prompts, reports, users};

fn database() -> Database {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canvass.db");
    let db = Database::open(path, 8).unwrap();
    std::mem::forget(dir);
    db
}

fn user(n: u32) -> UserId {
    UserId::new(format!("00000000-0000-4000-8000-{n:012}"))
}

fn embedding(seed: f32) -> Vec<f32> {
    let mut v = vec![seed; 8];
    v[0] = 1.0;
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

#[test]
fn sqlite_vec_extension_loaded() {
    let db = database();
    let conn = db.conn();
    let version: String = conn
        .query_row("SELECT vec_version()", [], |row| row.get(0))
        .unwrap();
    assert!(version.starts_with('v'), "unexpected vec_version: {version}");
    drop(conn);
    assert!(db.vector_search_enabled());
}

#[test]
fn prompt_insert_and_nearest() {
    let db = database();
    let conn = db.conn();

    let a = prompts::insert(&db, &conn, "how to brew coffee", &embedding(0.1), None, None).unwrap();
    let _b = prompts::insert(&db, &conn, "best hiking boots", &embedding(0.9), None, None).unwrap();

    let (hit, similarity) = prompts::nearest(&db, &conn, &embedding(0.1)).unwrap().unwrap();
    assert_eq!(hit, a);
    assert!(similarity > 0.999, "self-similarity was {similarity}");

    let loaded = prompts::get(&conn, a).unwrap().unwrap();
    assert_eq!(loaded.text, "how to brew coffee");
}

#[test]
fn exact_text_fallback() {
    let db = database();
    let conn = db.conn();

    let id = prompts::insert(&db, &conn, "compare X and Y", &embedding(0.5), None, None).unwrap();
    assert_eq!(prompts::find_by_text(&conn, "compare X and Y").unwrap(), Some(id));
    assert_eq!(prompts::find_by_text(&conn, "no such prompt").unwrap(), None);
}

#[test]
fn partial_unique_index_blocks_second_active_entry() {
    let db = database();
    let conn = db.conn();

    let requester = user(1);
    evals::insert_entry(&conn, PromptId(42), &requester, "batch-1").unwrap();

    let second = evals::insert_entry(&conn, PromptId(42), &requester, "batch-2");
    assert!(second.is_err(), "partial unique index must reject a second active entry");

    // A terminal row frees the slot.
    let entry = evals::next_pending(&conn).unwrap().unwrap();
    evals::mark_failed(&conn, entry.id, "gave up").unwrap();
    evals::insert_entry(&conn, PromptId(42), &requester, "batch-3").unwrap();
}

#[test]
fn terminal_queue_transitions_are_idempotent() {
    let db = database();
    let conn = db.conn();

    let entry = evals::insert_entry(&conn, PromptId(7), &user(1), "b").unwrap();
    evals::mark_failed(&conn, entry.id, "first reason").unwrap();
    // Re-applying a terminal transition is a no-op.
    evals::mark_failed(&conn, entry.id, "second reason").unwrap();

    let row = evals::entry(&conn, entry.id).unwrap().unwrap();
    assert_eq!(row.failure_reason.as_deref(), Some("first reason"));
}

#[test]
fn stale_claims_reset_to_pending() {
    let db = database();
    let conn = db.conn();

    let entry = evals::insert_entry(&conn, PromptId(7), &user(1), "b").unwrap();
    let eval_id = evals::insert_evaluation(&conn, PromptId(7), canvass_core::PlanId(1), Utc::now())
        .unwrap();
    evals::claim_entry(&conn, entry.id, eval_id, Utc::now() - Duration::hours(3)).unwrap();

    let reset = evals::reset_stale_claims(&conn, Utc::now() - Duration::hours(2)).unwrap();
    assert_eq!(reset, 1);

    let row = evals::entry(&conn, entry.id).unwrap().unwrap();
    assert_eq!(row.status, canvass_core::QueueStatus::Pending);
    assert!(row.claimed_at.is_none());
}

#[test]
fn consumed_unique_violation_maps_to_duplicate() {
    let db = database();
    let conn = db.conn();

    let u = user(1);
    evals::insert_consumed(&conn, &u, canvass_core::EvaluationId(5), 0.01).unwrap();
    let second = evals::insert_consumed(&conn, &u, canvass_core::EvaluationId(5), 0.01);
    assert!(matches!(
        second,
        Err(canvass_core::Error::DuplicateConsumption { .. })
    ));

    // Same evaluation, different user is fine.
    evals::insert_consumed(&conn, &user(2), canvass_core::EvaluationId(5), 0.01).unwrap();
}

#[test]
fn grants_debit_order_is_fifo_by_expiry() {
    let db = database();
    let conn = db.conn();
    let u = user(1);
    let now = Utc::now();

    let never = users::insert_grant(&conn, &u, CreditSource::Payment, 1.0, None).unwrap();
    let soon =
        users::insert_grant(&conn, &u, CreditSource::SignupBonus, 0.5, Some(now + Duration::days(1)))
            .unwrap();
    let later =
        users::insert_grant(&conn, &u, CreditSource::PromoCode, 0.2, Some(now + Duration::days(30)))
            .unwrap();
    let _expired =
        users::insert_grant(&conn, &u, CreditSource::Referral, 9.0, Some(now - Duration::days(1)))
            .unwrap();

    let grants = users::active_grants(&conn, &u, now).unwrap();
    let order: Vec<_> = grants.iter().map(|g| g.id).collect();
    assert_eq!(order, vec![soon, later, never]);

    let available = users::available_balance(&conn, &u, now).unwrap();
    assert!((available - 1.7).abs() < 1e-9);
}

#[test]
fn transactions_page_newest_first() {
    let db = database();
    let conn = db.conn();
    let u = user(1);

    for i in 0..3 {
        users::insert_transaction(
            &conn,
            &u,
            TransactionType::Credit,
            1.0,
            f64::from(i + 1),
            "top up",
            None,
            None,
        )
        .unwrap();
    }

    let (page, total) = users::transactions(&conn, &u, 2, 0).unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert!(page[0].balance_after >= page[1].balance_after);
}

#[test]
fn assistant_plan_resolution_is_case_insensitive() {
    let db = database();
    let conn = db.conn();

    let assistant = evals::ensure_assistant(&conn, "ChatGPT").unwrap();
    let plan = evals::ensure_plan(&conn, assistant, "PLUS").unwrap();

    assert_eq!(evals::resolve_plan(&conn, "chatgpt", "plus").unwrap(), Some(plan));
    assert_eq!(evals::resolve_plan(&conn, "CHATGPT", "Plus").unwrap(), Some(plan));
    assert_eq!(evals::resolve_plan(&conn, "chatgpt", "pro").unwrap(), None);

    // ensure_* is idempotent.
    assert_eq!(evals::ensure_assistant(&conn, "ChatGPT").unwrap(), assistant);
    assert_eq!(evals::ensure_plan(&conn, assistant, "PLUS").unwrap(), plan);
}

#[test]
fn report_cascade_and_latest() {
    let db = database();
    let conn = db.conn();
    let u = user(1);
    let group = canvass_core::GroupId(1);

    let counts = reports::ReportCounts {
        total_prompts: 2,
        prompts_with_data: 1,
        prompts_awaiting: 1,
        total_evaluations_loaded: 1,
        total_cost: 0.01,
    };
    let first = reports::insert_report(&conn, group, &u, None, &counts, None, &[]).unwrap();
    reports::insert_item(
        &conn,
        first,
        PromptId(1),
        Some(canvass_core::EvaluationId(10)),
        canvass_core::ReportItemStatus::Included,
        true,
        Some(0.01),
    )
    .unwrap();
    reports::insert_item(
        &conn,
        first,
        PromptId(2),
        None,
        canvass_core::ReportItemStatus::Awaiting,
        false,
        None,
    )
    .unwrap();

    let second = reports::insert_report(&conn, group, &u, Some("latest"), &counts, None, &[]).unwrap();

    let latest = reports::latest_report(&conn, group, &u).unwrap().unwrap();
    assert_eq!(latest.id, second);

    let items = reports::report_items(&conn, first).unwrap();
    assert_eq!(items.len(), 2);

    // Deleting the report cascades to its items.
    conn.execute("DELETE FROM group_reports WHERE id = ?", rusqlite::params![first])
        .unwrap();
    assert!(reports::report_items(&conn, first).unwrap().is_empty());
}

#[test]
fn scrape_batch_round_trip() {
    let db = database();
    let conn = db.conn();
    let u = user(1);

    evals::insert_batch(&conn, "batch-xyz", &u, &[PromptId(1), PromptId(2)]).unwrap();

    let batch = evals::batch(&conn, "batch-xyz").unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert_eq!(batch.prompt_ids, vec![PromptId(1), PromptId(2)]);

    let pending = evals::pending_batch_prompt_ids(&conn, &[PromptId(2), PromptId(3)]).unwrap();
    assert!(pending.contains(&PromptId(2)));
    assert!(!pending.contains(&PromptId(3)));

    assert!(evals::complete_batch(&conn, "batch-xyz", BatchStatus::Partial).unwrap());
    let done = evals::batch(&conn, "batch-xyz").unwrap().unwrap();
    assert_eq!(done.status, BatchStatus::Partial);
    assert!(done.completed_at.is_some());
}
