//! End-to-end queue and evaluation lifecycle scenarios.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use canvass_core::{
    Answer, Citation, Config, Error, EvaluationStatus, PromptId, QueueStatus, UserId,
};
use canvass_queue::{EvaluationService, ReleaseOutcome, WaitEstimator};
use canvass_store::{Database, prompts};
use chrono::Utc;

struct Fixture {
    db: Arc<Database>,
    service: EvaluationService,
    user: UserId,
}

impl Fixture {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("canvass.db"), 4).unwrap());
        std::mem::forget(dir);

        let service = EvaluationService::new(Arc::clone(&db), &Config::default());
        Self {
            db,
            service,
            user: UserId::new("00000000-0000-4000-8000-000000000001"),
        }
    }

    fn seed_prompt(&self, text: &str) -> PromptId {
        let conn = self.db.conn();
        prompts::insert(&self.db, &conn, text, &[0.5, 0.5, 0.5, 0.5], None, None).unwrap()
    }

    fn backdate_claim(&self, prompt_id: PromptId, hours: i64) {
        let conn = self.db.conn();
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).timestamp_millis();
        conn.execute(
            "UPDATE execution_queue SET claimed_at = ? WHERE prompt_id = ?",
            rusqlite::params![cutoff, prompt_id.0],
        )
        .unwrap();
    }
}

#[tokio::test]
async fn single_poll_claims_then_submit_completes() {
    let fx = Fixture::new();
    let prompt = fx.seed_prompt("What is the best CRM?");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[prompt], &fx.user, None)
        .await
        .unwrap();

    // Worker A claims the only entry.
    let work = fx.service.poll(plan).await.unwrap().unwrap();
    assert_eq!(work.prompt.id, prompt);
    assert_eq!(work.queue_entry.status, QueueStatus::InProgress);
    assert_eq!(work.evaluation.status, EvaluationStatus::InProgress);

    // Worker B finds the queue empty.
    assert!(fx.service.poll(plan).await.unwrap().is_none());

    // Worker A submits.
    let answer = Answer::new("x", vec![], Utc::now());
    let submitted = fx
        .service
        .submit_answer(work.evaluation.id, answer)
        .await
        .unwrap();
    assert_eq!(submitted.status, EvaluationStatus::Completed);
    assert!(submitted.completed_at.is_some());

    let entry = fx
        .service
        .queue()
        .entry_by_evaluation(work.evaluation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Completed);
}

#[tokio::test]
async fn double_submit_is_a_conflict() {
    let fx = Fixture::new();
    let prompt = fx.seed_prompt("double submit");
    let plan = fx.service.ensure_plan("ChatGPT", "FREE").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[prompt], &fx.user, None)
        .await
        .unwrap();
    let work = fx.service.poll(plan).await.unwrap().unwrap();

    let answer = Answer::new("first", vec![Citation::new("https://a.example")], Utc::now());
    fx.service
        .submit_answer(work.evaluation.id, answer.clone())
        .await
        .unwrap();

    let second = fx.service.submit_answer(work.evaluation.id, answer).await;
    assert!(matches!(second, Err(Error::AlreadyCompleted(_))));
}

#[tokio::test]
async fn submit_to_unknown_evaluation_is_not_found() {
    let fx = Fixture::new();
    let missing = fx
        .service
        .submit_answer(canvass_core::EvaluationId(9999), Answer::default())
        .await;
    assert!(matches!(missing, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn contended_polls_return_distinct_prompts() {
    let fx = Fixture::new();
    let p1 = fx.seed_prompt("first prompt");
    let p2 = fx.seed_prompt("second prompt");
    let plan = fx.service.ensure_plan("Claude", "PRO").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[p1, p2], &fx.user, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(fx.service.poll(plan), fx.service.poll(plan));
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    assert_ne!(a.queue_entry.id, b.queue_entry.id);
    assert_ne!(a.prompt.id, b.prompt.id);
    assert_ne!(a.evaluation.id, b.evaluation.id);

    // The third concurrent poll sees an empty queue.
    assert!(fx.service.poll(plan).await.unwrap().is_none());
}

#[tokio::test]
async fn stale_claim_is_reaped_and_reassigned() {
    let fx = Fixture::new();
    let prompt = fx.seed_prompt("orphaned work");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[prompt], &fx.user, None)
        .await
        .unwrap();

    let first = fx.service.poll(plan).await.unwrap().unwrap();
    // Simulate a worker death: the claim ages past the 2 h timeout.
    fx.backdate_claim(prompt, 3);

    let second = fx.service.poll(plan).await.unwrap().unwrap();
    assert_eq!(second.prompt.id, prompt);
    assert_ne!(second.evaluation.id, first.evaluation.id);
}

#[tokio::test]
async fn enqueue_skips_active_prompts() {
    let fx = Fixture::new();
    let prompt = fx.seed_prompt("only once");

    let first = fx
        .service
        .queue()
        .enqueue(&[prompt], &fx.user, None)
        .await
        .unwrap();
    assert_eq!(first.queued.len(), 1);
    assert_eq!(first.skipped, 0);

    // Second request, and a duplicate inside one request, are both skips.
    let second = fx
        .service
        .queue()
        .enqueue(&[prompt, prompt], &fx.user, None)
        .await
        .unwrap();
    assert!(second.queued.is_empty());
    assert_eq!(second.skipped, 2);
    assert_eq!(second.total_pending, 1);
}

#[tokio::test]
async fn cancel_only_touches_own_pending_entries() {
    let fx = Fixture::new();
    let mine = fx.seed_prompt("mine");
    let claimed = fx.seed_prompt("claimed");
    let theirs = fx.seed_prompt("theirs");
    let other_user = UserId::new("00000000-0000-4000-8000-000000000002");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[mine, claimed], &fx.user, None)
        .await
        .unwrap();
    fx.service
        .queue()
        .enqueue(&[theirs], &other_user, None)
        .await
        .unwrap();

    // "claimed" moves to in_progress and becomes uncancellable.
    let work = fx.service.poll(plan).await.unwrap().unwrap();
    assert_eq!(work.prompt.id, mine); // FIFO: first enqueued claimed first

    let cancelled = fx
        .service
        .queue()
        .cancel_pending(&[mine, claimed, theirs], &fx.user)
        .await
        .unwrap();
    assert_eq!(cancelled, 1, "only the user's own pending entry is cancelled");
}

#[tokio::test]
async fn release_failed_keeps_row_release_plain_deletes() {
    let fx = Fixture::new();
    let p1 = fx.seed_prompt("fail me");
    let p2 = fx.seed_prompt("delete me");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[p1, p2], &fx.user, None)
        .await
        .unwrap();

    let first = fx.service.poll(plan).await.unwrap().unwrap();
    let outcome = fx
        .service
        .release(first.evaluation.id, true, Some("model refused"))
        .await
        .unwrap();
    assert_eq!(outcome, ReleaseOutcome::MarkedFailed);

    let conn = fx.db.conn();
    let failed = canvass_store::evals::evaluation(&conn, first.evaluation.id)
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, EvaluationStatus::Failed);
    assert_eq!(failed.answer.unwrap().error.as_deref(), Some("model refused"));
    drop(conn);

    let second = fx.service.poll(plan).await.unwrap().unwrap();
    let outcome = fx.service.release(second.evaluation.id, false, None).await.unwrap();
    assert_eq!(outcome, ReleaseOutcome::Deleted);

    let conn = fx.db.conn();
    assert!(
        canvass_store::evals::evaluation(&conn, second.evaluation.id)
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn release_of_completed_evaluation_is_rejected() {
    let fx = Fixture::new();
    let prompt = fx.seed_prompt("done already");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();

    fx.service
        .queue()
        .enqueue(&[prompt], &fx.user, None)
        .await
        .unwrap();
    let work = fx.service.poll(plan).await.unwrap().unwrap();
    fx.service
        .submit_answer(work.evaluation.id, Answer::new("done", vec![], Utc::now()))
        .await
        .unwrap();

    let rejected = fx.service.release(work.evaluation.id, true, None).await;
    assert!(matches!(rejected, Err(Error::ReleaseCompleted(_))));
}

#[tokio::test]
async fn unknown_plan_is_a_validation_error() {
    let fx = Fixture::new();
    let err = fx.service.poll_by_names("ChatGPT", "ULTRA").await;
    assert!(matches!(err, Err(Error::UnknownPlan { .. })));
}

#[tokio::test]
async fn latest_results_returns_newest_completed_per_prompt() {
    let fx = Fixture::new();
    let prompt = fx.seed_prompt("evolving answer");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();

    for response in ["old", "new"] {
        fx.service
            .queue()
            .enqueue(&[prompt], &fx.user, None)
            .await
            .unwrap();
        let work = fx.service.poll(plan).await.unwrap().unwrap();
        fx.service
            .submit_answer(work.evaluation.id, Answer::new(response, vec![], Utc::now()))
            .await
            .unwrap();
    }

    let results = fx.service.latest_results(plan, &[prompt]).await.unwrap();
    assert_eq!(results.len(), 1);
    let (returned, evaluation) = &results[0];
    assert_eq!(returned.id, prompt);
    assert_eq!(evaluation.as_ref().unwrap().answer.as_ref().unwrap().response, "new");
}

#[tokio::test]
async fn status_reports_user_view() {
    let fx = Fixture::new();
    let p1 = fx.seed_prompt("waiting");
    let p2 = fx.seed_prompt("working");
    let plan = fx.service.ensure_plan("ChatGPT", "PLUS").await.unwrap();
    let estimator = WaitEstimator::new(&Config::default());

    fx.service
        .queue()
        .enqueue(&[p2, p1], &fx.user, None)
        .await
        .unwrap();
    let work = fx.service.poll(plan).await.unwrap().unwrap();
    assert_eq!(work.prompt.id, p2);
    fx.service
        .submit_answer(work.evaluation.id, Answer::new("ok", vec![], Utc::now()))
        .await
        .unwrap();

    let status = fx.service.queue().status(&fx.user, &estimator).await.unwrap();
    assert_eq!(status.pending.len(), 1);
    assert_eq!(status.pending[0].prompt_id, p1);
    assert!(status.in_progress.is_empty());
    assert_eq!(status.recently_completed.len(), 1);
    assert_eq!(status.global_queue_size, 1);
    assert_eq!(status.estimated_wait, "~1 minute");
}
