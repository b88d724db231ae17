//! In-memory batch registry.
//!
//! The registry is the only in-process shared mutable state in the system
//! besides the database handle: a single mutex guards the batch map, and
//! entries past their TTL are reaped on every mutating call. The persistent
//! `scrape_batches` rows are the durable twin; this map exists for O(1)
//! reverse `prompt text → prompt id` dispatch while a batch is in flight.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use canvass_core::{BatchStatus, PromptId, UserId};

use crate::types::{BatchInfo, ParsedResult};

#[derive(Debug)]
pub struct BatchRegistry {
    batches: Mutex<HashMap<String, BatchInfo>>,
    ttl: Duration,
}

impl BatchRegistry {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    fn reap_expired(batches: &mut HashMap<String, BatchInfo>, ttl: Duration) {
        let now = Utc::now();
        batches.retain(|batch_id, info| {
            let keep = now - info.created_at <= ttl;
            if !keep {
                debug!(batch = %batch_id, "removing expired batch");
            }
            keep
        });
    }

    pub fn register(
        &self,
        batch_id: &str,
        prompt_id_to_text: HashMap<PromptId, String>,
        user_id: &UserId,
    ) {
        let mut batches = self.batches.lock().expect("batch registry mutex poisoned");
        Self::reap_expired(&mut batches, self.ttl);

        let text_to_prompt_id = prompt_id_to_text
            .iter()
            .map(|(id, text)| (text.clone(), *id))
            .collect();

        info!(batch = %batch_id, prompts = prompt_id_to_text.len(), "registered batch");
        batches.insert(
            batch_id.to_owned(),
            BatchInfo {
                batch_id: batch_id.to_owned(),
                user_id: user_id.clone(),
                prompt_id_to_text,
                text_to_prompt_id,
                created_at: Utc::now(),
                status: BatchStatus::Pending,
                results: Vec::new(),
                errors: Vec::new(),
            },
        );
    }

    /// Copy out a batch. None for unknown or expired ids.
    pub fn get(&self, batch_id: &str) -> Option<BatchInfo> {
        let mut batches = self.batches.lock().expect("batch registry mutex poisoned");
        Self::reap_expired(&mut batches, self.ttl);
        batches.get(batch_id).cloned()
    }

    /// Reverse lookup within one batch.
    pub fn prompt_id_by_text(&self, batch_id: &str, prompt_text: &str) -> Option<PromptId> {
        let batches = self.batches.lock().expect("batch registry mutex poisoned");
        batches
            .get(batch_id)?
            .text_to_prompt_id
            .get(prompt_text)
            .copied()
    }

    pub fn add_result(&self, batch_id: &str, result: ParsedResult) {
        let mut batches = self.batches.lock().expect("batch registry mutex poisoned");
        if let Some(batch) = batches.get_mut(batch_id) {
            batch.results.push(result);
        }
    }

    pub fn add_error(&self, batch_id: &str, error: impl Into<String>) {
        let mut batches = self.batches.lock().expect("batch registry mutex poisoned");
        if let Some(batch) = batches.get_mut(batch_id) {
            batch.errors.push(error.into());
        }
    }

    pub fn complete(&self, batch_id: &str, status: BatchStatus) {
        let mut batches = self.batches.lock().expect("batch registry mutex poisoned");
        if let Some(batch) = batches.get_mut(batch_id) {
            batch.status = status;
            info!(batch = %batch_id, status = status.as_str(), "batch completed");
        }
    }

    pub fn all(&self) -> Vec<BatchInfo> {
        let mut batches = self.batches.lock().expect("batch registry mutex poisoned");
        Self::reap_expired(&mut batches, self.ttl);
        batches.values().cloned().collect()
    }
}
