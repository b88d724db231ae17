//! Prompt ingest: dedup by embedding similarity, single-flight scheduling,
//! group binding.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use canvass_core::fakes::FakeEmbedder;
use canvass_core::{Config, Error, GroupId, UserId};
use canvass_ingest::PromptIngest;
use canvass_queue::QueueService;
use canvass_store::{Database, prompts};

struct Fixture {
    db: Arc<Database>,
    ingest: PromptIngest,
    embedder: Arc<FakeEmbedder>,
    user: UserId,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("canvass.db"), 16).unwrap());
        std::mem::forget(dir);

        let embedder = Arc::new(FakeEmbedder::new(16));
        let ingest = PromptIngest::new(
            Arc::clone(&db),
            Arc::clone(&embedder) as Arc<dyn canvass_core::EmbeddingProvider>,
            &Config::default(),
        );
        Self {
            db,
            ingest,
            embedder,
            user: UserId::new("00000000-0000-4000-8000-000000000001"),
        }
    }
}

fn texts(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|t| (*t).to_owned()).collect()
}

#[tokio::test]
async fn new_texts_create_prompts_and_queue_entries() {
    let fx = Fixture::new();
    let queue = QueueService::new(Arc::clone(&fx.db), &Config::default());

    let result = fx
        .ingest
        .add_prompts(&texts(&["how to brew coffee", "best crm for startups"]), None, None, &fx.user)
        .await
        .unwrap();

    assert_eq!(result.created, 2);
    assert_eq!(result.reused, 0);
    assert_eq!(result.queued, 2);
    assert!(!result.request_id.is_empty());
    assert_eq!(fx.embedder.call_count(), 2);
    assert_eq!(queue.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn identical_text_reuses_prompt_and_skips_requeue() {
    let fx = Fixture::new();
    let queue = QueueService::new(Arc::clone(&fx.db), &Config::default());

    let first = fx
        .ingest
        .add_prompts(&texts(&["how to brew coffee"]), None, None, &fx.user)
        .await
        .unwrap();
    let second = fx
        .ingest
        .add_prompts(&texts(&["how to brew coffee"]), None, None, &fx.user)
        .await
        .unwrap();

    assert_eq!(second.created, 0);
    assert_eq!(second.reused, 1);
    assert_eq!(second.prompts[0].prompt_id, first.prompts[0].prompt_id);
    assert!(second.prompts[0].similarity.unwrap() > 0.995);

    // Still only one pending entry for that prompt.
    assert_eq!(second.queued, 0);
    assert_eq!(queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn distinct_texts_do_not_collide() {
    let fx = Fixture::new();

    let result = fx
        .ingest
        .add_prompts(
            &texts(&["how to brew coffee", "kubernetes ingress debugging"]),
            None,
            None,
            &fx.user,
        )
        .await
        .unwrap();

    assert_eq!(result.created, 2);
    assert_ne!(result.prompts[0].prompt_id, result.prompts[1].prompt_id);
}

#[tokio::test]
async fn binds_prompts_to_owned_group() {
    let fx = Fixture::new();

    let conn = fx.db.conn();
    let group = prompts::insert_group(&conn, &fx.user, "my group", None, None, &[]).unwrap();
    drop(conn);

    let result = fx
        .ingest
        .add_prompts(&texts(&["grouped prompt"]), Some(7), Some(group), &fx.user)
        .await
        .unwrap();

    let conn = fx.db.conn();
    let bound = prompts::group_prompt_ids(&conn, group).unwrap();
    assert_eq!(bound, vec![result.prompts[0].prompt_id]);

    let prompt = prompts::get(&conn, result.prompts[0].prompt_id).unwrap().unwrap();
    assert_eq!(prompt.topic_id, Some(7));
    assert_eq!(prompt.user_id.as_ref(), Some(&fx.user));
}

#[tokio::test]
async fn foreign_group_is_rejected() {
    let fx = Fixture::new();
    let err = fx
        .ingest
        .add_prompts(&texts(&["text"]), None, Some(GroupId(999)), &fx.user)
        .await;
    assert!(matches!(err, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_embedding() {
    let fx = Fixture::new();
    let many: Vec<String> = (0..101).map(|i| format!("prompt {i}")).collect();

    let err = fx.ingest.add_prompts(&many, None, None, &fx.user).await;
    assert!(matches!(err, Err(Error::BatchTooLarge { got: 101, max: 100 })));
    assert_eq!(fx.embedder.call_count(), 0);
}
