//! Webhook correlation scenarios.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;

use canvass_core::{BatchStatus, Config, Error, PromptId, UserId};
use canvass_scraper::{BatchRegistry, ScrapeService, WebhookItem};
use canvass_store::{Database, evals};

struct Fixture {
    db: Arc<Database>,
    service: ScrapeService,
    user: UserId,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("canvass.db"), 4).unwrap());
        std::mem::forget(dir);

        let config = Config::default();
        let registry = Arc::new(BatchRegistry::new(config.scraper.batch_ttl_hours));
        // No API token configured: triggers no-op, webhook intake still works
        // against manually registered batches.
        let service = ScrapeService::new(Arc::clone(&db), registry, None, &config);
        Self {
            db,
            service,
            user: UserId::new("00000000-0000-4000-8000-000000000001"),
        }
    }

    fn register(&self, batch_id: &str, entries: &[(i64, &str)]) {
        let map: HashMap<PromptId, String> = entries
            .iter()
            .map(|&(id, text)| (PromptId(id), text.to_owned()))
            .collect();
        self.service.registry().register(batch_id, map.clone(), &self.user);
        let conn = self.db.conn();
        let ids: Vec<PromptId> = map.keys().copied().collect();
        evals::insert_batch(&conn, batch_id, &self.user, &ids).unwrap();
    }
}

fn item(prompt: &str, answer: &str, citations: &[(&str, bool)]) -> WebhookItem {
    let citations: Vec<serde_json::Value> = citations
        .iter()
        .map(|&(url, cited)| serde_json::json!({"url": url, "cited": cited}))
        .collect();
    serde_json::from_value(serde_json::json!({
        "input": {"prompt": prompt},
        "answer_text": answer,
        "citations": citations,
        "model": "m",
        "timestamp": "2024-01-01T00:00:00Z",
    }))
    .unwrap()
}

#[tokio::test]
async fn webhook_matches_prompts_and_filters_citations() {
    let fx = Fixture::new();
    fx.register("batch-1", &[(101, "How to X?"), (102, "Compare Y")]);

    let outcome = fx
        .service
        .process_webhook(
            "batch-1",
            vec![item(
                "How to X?",
                "A",
                &[("https://a.com", true), ("https://b.com", false)],
            )],
        )
        .await
        .unwrap();

    // 102 never came back, but one unmatched prompt does not mean a failed
    // item; the batch simply completes with what arrived.
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.status, BatchStatus::Completed);

    let batch = fx.service.registry().get("batch-1").unwrap();
    assert_eq!(batch.results.len(), 1);
    let result = &batch.results[0];
    assert_eq!(result.prompt_id, PromptId(101));
    assert_eq!(result.answer_text, "A");
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].url, "https://a.com");

    // Durable twin follows.
    let conn = fx.db.conn();
    let row = evals::batch(&conn, "batch-1").unwrap().unwrap();
    assert_eq!(row.status, BatchStatus::Completed);
}

#[tokio::test]
async fn unmatched_items_are_errors_but_do_not_fail_the_batch() {
    let fx = Fixture::new();
    fx.register("batch-2", &[(201, "Known prompt")]);

    let outcome = fx
        .service
        .process_webhook(
            "batch-2",
            vec![
                item("Known prompt", "yes", &[]),
                item("Prompt from some other batch", "stray", &[]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.status, BatchStatus::Partial);

    let batch = fx.service.registry().get("batch-2").unwrap();
    assert_eq!(batch.errors.len(), 1);
    assert!(batch.errors[0].contains("no matching prompt"));
}

#[tokio::test]
async fn webhook_for_unknown_batch_is_not_found() {
    let fx = Fixture::new();
    let err = fx
        .service
        .process_webhook("never-registered", vec![item("q", "a", &[])])
        .await;
    assert!(matches!(err, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn trigger_without_client_is_a_quiet_no_op() {
    let fx = Fixture::new();
    let prompts: HashMap<PromptId, String> = [(PromptId(1), "q".to_owned())].into();

    fx.service
        .trigger_batch("batch-3", &prompts, &fx.user)
        .await
        .unwrap();

    // Nothing registered: the client was disabled.
    assert!(fx.service.registry().get("batch-3").is_none());
}

#[tokio::test]
async fn pending_prompt_ids_come_from_durable_rows() {
    let fx = Fixture::new();
    fx.register("batch-4", &[(301, "busy prompt")]);

    let pending = fx
        .service
        .pending_prompt_ids(&[PromptId(301), PromptId(999)])
        .await
        .unwrap();
    assert!(pending.contains(&PromptId(301)));
    assert!(!pending.contains(&PromptId(999)));

    // Terminal batches stop suppressing.
    fx.service
        .process_webhook("batch-4", vec![item("busy prompt", "done", &[])])
        .await
        .unwrap();
    let pending = fx.service.pending_prompt_ids(&[PromptId(301)]).await.unwrap();
    assert!(pending.is_empty());
}
