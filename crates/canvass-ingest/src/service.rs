//! Batch prompt ingest: embed incoming texts, reuse near-duplicates, and
//! schedule every resulting prompt exactly once.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use canvass_core::{
    Config, EmbeddingProvider, Error, GroupId, PromptId, Result, UserId,
};
use canvass_store::{Database, evals, prompts};

/// One ingested text: the prompt it landed on and whether that prompt
/// already existed.
#[derive(Debug, Clone)]
pub struct IngestedPrompt {
    pub prompt_id: PromptId,
    pub text: String,
    pub reused: bool,
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub request_id: String,
    pub created: usize,
    pub reused: usize,
    pub queued: usize,
    pub prompts: Vec<IngestedPrompt>,
}

pub struct PromptIngest {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    duplicate_threshold: f32,
    max_prompts: usize,
}

impl std::fmt::Debug for PromptIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptIngest")
            .field("duplicate_threshold", &self.duplicate_threshold)
            .field("max_prompts", &self.max_prompts)
            .finish_non_exhaustive()
    }
}

impl PromptIngest {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn EmbeddingProvider>, config: &Config) -> Self {
        Self {
            db,
            embedder,
            duplicate_threshold: config.ingest.duplicate_threshold,
            max_prompts: config.ingest.max_prompts,
        }
    }

    /// Ingest a batch of prompt texts.
    ///
    /// Each text is embedded and compared against the nearest stored prompt;
    /// at or above the duplicate threshold the existing prompt is reused,
    /// otherwise a new one is inserted. Every resulting prompt gets exactly
    /// one pending queue entry (prompts already queued are left alone), and
    /// is optionally bound into a group owned by the caller.
    #[instrument(skip(self, texts), fields(count = texts.len(), user = %user_id))]
    pub async fn add_prompts(
        &self,
        texts: &[String],
        topic_id: Option<i64>,
        group_id: Option<GroupId>,
        user_id: &UserId,
    ) -> Result<IngestResult> {
        if texts.len() > self.max_prompts {
            return Err(Error::BatchTooLarge {
                got: texts.len(),
                max: self.max_prompts,
            });
        }

        // Embed outside the database lock; the provider call can block.
        let embeddings = self
            .embedder
            .embed_batch(texts)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let request_id = Uuid::new_v4().to_string();

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        if let Some(group_id) = group_id
            && prompts::get_group_for_user(&tx, group_id, user_id)?.is_none()
        {
            return Err(Error::not_found("prompt group", group_id));
        }

        let mut out = Vec::with_capacity(texts.len());
        let mut created = 0;
        let mut reused = 0;
        let mut queued = 0;

        for (text, embedding) in texts.iter().zip(&embeddings) {
            let (prompt_id, was_reused, similarity) =
                self.resolve_prompt(&tx, text, embedding, topic_id, user_id)?;
            if was_reused {
                reused += 1;
            } else {
                created += 1;
            }

            // Check-then-insert; the partial unique index backstops races.
            let active = evals::active_prompt_ids(&tx, &[prompt_id])?;
            if !active.contains(&prompt_id) {
                evals::insert_entry(&tx, prompt_id, user_id, &request_id)?;
                queued += 1;
            }

            if let Some(group_id) = group_id {
                prompts::bind_prompt(&tx, group_id, prompt_id)?;
            }

            out.push(IngestedPrompt {
                prompt_id,
                text: text.clone(),
                reused: was_reused,
                similarity,
            });
        }

        tx.commit()?;
        drop(conn);

        info!(request = %request_id, created, reused, queued, "ingested prompt batch");
        Ok(IngestResult {
            request_id,
            created,
            reused,
            queued,
            prompts: out,
        })
    }

    /// Reuse the nearest stored prompt when it is close enough; insert a new
    /// one otherwise. Falls back to exact-text matching when the vector
    /// index is unavailable.
    fn resolve_prompt(
        &self,
        conn: &rusqlite::Connection,
        text: &str,
        embedding: &[f32],
        topic_id: Option<i64>,
        user_id: &UserId,
    ) -> Result<(PromptId, bool, Option<f32>)> {
        if self.db.vector_search_enabled() {
            if let Some((existing, similarity)) = prompts::nearest(&self.db, conn, embedding)?
                && similarity >= self.duplicate_threshold
            {
                debug!(prompt = %existing, similarity, "reusing near-duplicate prompt");
                return Ok((existing, true, Some(similarity)));
            }
        } else if let Some(existing) = prompts::find_by_text(conn, text)? {
            warn!(prompt = %existing, "vector search disabled; matched prompt by exact text");
            return Ok((existing, true, None));
        }

        let id = prompts::insert(&self.db, conn, text, embedding, topic_id, Some(user_id))?;
        Ok((id, false, None))
    }
}
