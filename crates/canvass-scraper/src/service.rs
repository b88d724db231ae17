//! Orchestration of the batch correlator: trigger outbound batches and
//! match webhook results back to their prompts.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use canvass_core::{BatchStatus, Config, Error, PromptId, Result, UserId};
use canvass_store::{Database, evals};

use crate::client::ScraperClient;
use crate::registry::BatchRegistry;
use crate::types::{
    ParsedCitation, ParsedResult, PromptInput, TriggerRequest, WebhookItem, WebhookOutcome,
};

pub struct ScrapeService {
    db: Arc<Database>,
    registry: Arc<BatchRegistry>,
    client: Option<ScraperClient>,
    webhook_base_url: String,
    webhook_secret: String,
    default_country: String,
}

impl std::fmt::Debug for ScrapeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeService")
            .field("has_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl ScrapeService {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<BatchRegistry>,
        client: Option<ScraperClient>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            registry,
            client,
            webhook_base_url: config.scraper.webhook_base_url.clone(),
            webhook_secret: config.scraper.webhook_secret.clone(),
            default_country: config.scraper.default_country.clone(),
        }
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// Register a batch (memory + durable row) and fire the provider
    /// trigger. An upstream failure marks the batch failed in both places
    /// and propagates; there is no inline retry.
    #[instrument(skip(self, prompts), fields(batch = %batch_id, prompts = prompts.len(), user = %user_id))]
    pub async fn trigger_batch(
        &self,
        batch_id: &str,
        prompts: &HashMap<PromptId, String>,
        user_id: &UserId,
    ) -> Result<()> {
        let Some(client) = &self.client else {
            debug!("scraper client not configured, skipping trigger");
            return Ok(());
        };
        if prompts.is_empty() {
            debug!("no prompts to trigger");
            return Ok(());
        }

        self.registry.register(batch_id, prompts.clone(), user_id);
        {
            let conn = self.db.conn();
            let prompt_ids: Vec<PromptId> = prompts.keys().copied().collect();
            evals::insert_batch(&conn, batch_id, user_id, &prompt_ids)?;
        }

        let inputs: Vec<PromptInput> = prompts
            .values()
            .map(|text| PromptInput::chat(text.clone(), self.default_country.clone()))
            .collect();
        let request = TriggerRequest {
            batch_id: batch_id.to_owned(),
            inputs,
            webhook_url: format!("{}/webhook/{batch_id}", self.webhook_base_url),
            webhook_auth_header: format!("Basic {}", self.webhook_secret),
        };

        if let Err(error) = client.trigger(&request).await {
            warn!(batch = %batch_id, error = %error, "scraper trigger failed");
            self.registry.complete(batch_id, BatchStatus::Failed);
            let conn = self.db.conn();
            evals::complete_batch(&conn, batch_id, BatchStatus::Failed)?;
            return Err(error);
        }

        Ok(())
    }

    /// Process a webhook delivery for a batch.
    ///
    /// Each item is matched to its prompt by text within the batch; items
    /// with no match are recorded as errors without failing the batch.
    /// Citations the model did not actually cite are dropped. The batch
    /// finishes `completed` when every item matched, `partial` otherwise.
    #[instrument(skip(self, items), fields(batch = %batch_id, items = items.len()))]
    pub async fn process_webhook(
        &self,
        batch_id: &str,
        items: Vec<WebhookItem>,
    ) -> Result<WebhookOutcome> {
        if self.registry.get(batch_id).is_none() {
            warn!(batch = %batch_id, "webhook for unknown or expired batch");
            return Err(Error::not_found("scrape batch", batch_id));
        }

        let mut processed = 0;
        let mut failed = 0;

        for item in items {
            let Some(prompt_id) = self.registry.prompt_id_by_text(batch_id, &item.input.prompt)
            else {
                let preview: String = item.input.prompt.chars().take(50).collect();
                warn!(batch = %batch_id, prompt = %preview, "no matching prompt in batch");
                self.registry
                    .add_error(batch_id, format!("no matching prompt for: {preview}"));
                failed += 1;
                continue;
            };

            let citations: Vec<ParsedCitation> = item
                .citations
                .into_iter()
                .filter(|citation| citation.cited)
                .map(|citation| ParsedCitation {
                    url: citation.url,
                    title: citation.title,
                    description: citation.description,
                    domain: citation.domain,
                })
                .collect();

            self.registry.add_result(
                batch_id,
                ParsedResult {
                    prompt_id,
                    prompt_text: item.input.prompt,
                    answer_text: item.answer_text,
                    citations,
                    model: item.model,
                    timestamp: item.timestamp,
                },
            );
            processed += 1;
            debug!(batch = %batch_id, prompt = %prompt_id, "stored scraper result");
        }

        let status = if failed == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Partial
        };
        self.registry.complete(batch_id, status);
        let conn = self.db.conn();
        evals::complete_batch(&conn, batch_id, status)?;
        drop(conn);

        Ok(WebhookOutcome {
            batch_id: batch_id.to_owned(),
            processed,
            failed,
            status,
        })
    }

    /// Prompts already covered by a pending batch, to avoid duplicate
    /// outbound requests.
    pub async fn pending_prompt_ids(
        &self,
        prompt_ids: &[PromptId],
    ) -> Result<std::collections::HashSet<PromptId>> {
        let conn = self.db.conn();
        evals::pending_batch_prompt_ids(&conn, prompt_ids)
    }
}
