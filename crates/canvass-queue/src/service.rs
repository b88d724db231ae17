//! The execution queue: single source of truth for what must be evaluated
//! next. Enforces global single-flight per prompt, FIFO fairness, and
//! recovery of orphaned claims.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use canvass_core::{
    Config, Error, EvaluationId, PlanId, Prompt, PromptId, QueueEntry, QueueEntryId, Result,
    UserId,
};
use canvass_store::{Database, evals, prompts};

use crate::wait::WaitEstimator;

/// Outcome of an enqueue call. Prompts already queued are skipped, which is
/// not an error; `total_pending` is the queue depth observed at commit.
#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub batch_id: String,
    pub queued: Vec<QueueEntry>,
    pub skipped: usize,
    pub total_pending: i64,
}

/// A user's view of the queue: their own items with wait estimates, their
/// recent completions, and the global depth.
#[derive(Debug, Clone)]
pub struct QueueStatusReport {
    pub pending: Vec<QueueEntry>,
    pub in_progress: Vec<QueueEntry>,
    pub recently_completed: Vec<QueueEntry>,
    pub global_queue_size: i64,
    pub estimated_wait: String,
    pub in_progress_estimate: String,
}

#[derive(Debug, Clone)]
pub struct QueueService {
    db: Arc<Database>,
    claim_timeout: Duration,
}

impl QueueService {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        Self {
            db,
            claim_timeout: Duration::hours(config.queue.evaluation_timeout_hours),
        }
    }

    /// Add prompts to the queue with status pending. A prompt that already
    /// has a non-terminal entry is skipped; skipping is not an error.
    #[instrument(skip(self, prompt_ids), fields(count = prompt_ids.len(), user = %user_id))]
    pub async fn enqueue(
        &self,
        prompt_ids: &[PromptId],
        user_id: &UserId,
        batch_id: Option<String>,
    ) -> Result<EnqueueResult> {
        let batch_id = batch_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let mut active = evals::active_prompt_ids(&tx, prompt_ids)?;
        let mut queued = Vec::new();
        let mut skipped = 0;

        for &prompt_id in prompt_ids {
            if active.contains(&prompt_id) {
                skipped += 1;
                continue;
            }
            let entry = evals::insert_entry(&tx, prompt_id, user_id, &batch_id)?;
            active.insert(prompt_id);
            queued.push(entry);
        }

        let total_pending = evals::pending_count(&tx)?;
        tx.commit()?;
        drop(conn);

        info!(
            queued = queued.len(),
            skipped, total_pending, "enqueued prompts"
        );

        Ok(EnqueueResult {
            batch_id,
            queued,
            skipped,
            total_pending,
        })
    }

    /// Cancel the user's pending entries for the given prompts. In-progress
    /// entries are left alone. Returns how many were cancelled.
    #[instrument(skip(self, prompt_ids), fields(count = prompt_ids.len(), user = %user_id))]
    pub async fn cancel_pending(&self, prompt_ids: &[PromptId], user_id: &UserId) -> Result<usize> {
        let conn = self.db.conn();
        let cancelled = evals::cancel_pending(&conn, prompt_ids, user_id)?;
        drop(conn);

        debug!(cancelled, "cancelled pending queue entries");
        Ok(cancelled)
    }

    /// Atomically claim the next pending entry (FIFO by request time) and
    /// open an evaluation for it.
    ///
    /// The whole sequence — stale-claim reaping, claim, prompt load,
    /// evaluation insert — commits as one transaction under the connection
    /// lock, so concurrent pollers always receive distinct entries.
    #[instrument(skip(self))]
    pub async fn poll_next(&self, plan_id: PlanId) -> Result<Option<(QueueEntry, Prompt)>> {
        let now = Utc::now();

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let reaped = evals::reset_stale_claims(&tx, now - self.claim_timeout)?;
        if reaped > 0 {
            info!(reaped, "reset stale in-progress claims to pending");
        }

        let Some(entry) = evals::next_pending(&tx)? else {
            tx.commit()?;
            return Ok(None);
        };

        let Some(prompt) = prompts::get(&tx, entry.prompt_id)? else {
            // The prompt vanished from the prompt store; poison the entry so
            // it never blocks the queue again.
            evals::mark_failed(&tx, entry.id, "prompt missing from prompt store")?;
            tx.commit()?;
            return Ok(None);
        };

        let evaluation_id = evals::insert_evaluation(&tx, entry.prompt_id, plan_id, now)?;
        evals::claim_entry(&tx, entry.id, evaluation_id, now)?;
        let claimed = evals::entry(&tx, entry.id)?
            .ok_or_else(|| Error::not_found("queue entry", entry.id))?;
        tx.commit()?;
        drop(conn);

        debug!(
            entry = %claimed.id,
            prompt = %claimed.prompt_id,
            evaluation = %evaluation_id,
            "claimed queue entry"
        );
        Ok(Some((claimed, prompt)))
    }

    /// Terminal completed transition; idempotent on already-terminal rows.
    pub async fn mark_completed(
        &self,
        entry_id: QueueEntryId,
        evaluation_id: EvaluationId,
    ) -> Result<()> {
        let conn = self.db.conn();
        evals::mark_completed(&conn, entry_id, evaluation_id)?;
        Ok(())
    }

    /// Terminal failed transition; idempotent on already-terminal rows.
    pub async fn mark_failed(&self, entry_id: QueueEntryId, reason: &str) -> Result<()> {
        let conn = self.db.conn();
        evals::mark_failed(&conn, entry_id, reason)?;
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let conn = self.db.conn();
        evals::pending_count(&conn)
    }

    pub async fn is_prompt_queued(&self, prompt_id: PromptId) -> Result<bool> {
        let conn = self.db.conn();
        let active = evals::active_prompt_ids(&conn, &[prompt_id])?;
        Ok(active.contains(&prompt_id))
    }

    /// The user's pending and in-progress entries, FIFO.
    pub async fn user_items(&self, user_id: &UserId) -> Result<Vec<QueueEntry>> {
        let conn = self.db.conn();
        evals::user_items(&conn, user_id)
    }

    pub async fn entry_by_evaluation(
        &self,
        evaluation_id: EvaluationId,
    ) -> Result<Option<QueueEntry>> {
        let conn = self.db.conn();
        evals::entry_by_evaluation(&conn, evaluation_id)
    }

    /// Queue status for one user: own items split by state, completions from
    /// the last 24 hours, global depth and wait estimates.
    #[instrument(skip(self, estimator), fields(user = %user_id))]
    pub async fn status(
        &self,
        user_id: &UserId,
        estimator: &WaitEstimator,
    ) -> Result<QueueStatusReport> {
        let conn = self.db.conn();

        let items = evals::user_items(&conn, user_id)?;
        let global_queue_size = evals::pending_count(&conn)?;
        let recently_completed =
            evals::recently_completed(&conn, user_id, Utc::now() - Duration::hours(24), 50)?;
        drop(conn);

        let (pending, in_progress): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|entry| entry.status == canvass_core::QueueStatus::Pending);

        Ok(QueueStatusReport {
            pending,
            in_progress,
            recently_completed,
            global_queue_size,
            estimated_wait: estimator.pending_estimate(global_queue_size),
            in_progress_estimate: estimator.in_progress_estimate().to_owned(),
        })
    }
}
