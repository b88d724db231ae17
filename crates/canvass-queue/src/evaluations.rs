//! Evaluation lifecycle on top of the queue: plan resolution, the worker
//! poll facade, answer submission, and release of abandoned claims.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use canvass_core::{
    Answer, Config, Error, Evaluation, EvaluationId, EvaluationStatus, PlanId, Prompt, PromptId,
    QueueEntry, Result, UserId,
};
use canvass_store::{Database, evals, prompts};

use crate::service::QueueService;

/// What a worker receives from a successful poll.
#[derive(Debug, Clone)]
pub struct ClaimedWork {
    pub queue_entry: QueueEntry,
    pub evaluation: Evaluation,
    pub prompt: Prompt,
}

/// How a release was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    MarkedFailed,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct EvaluationService {
    db: Arc<Database>,
    queue: QueueService,
}

impl EvaluationService {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        let queue = QueueService::new(Arc::clone(&db), config);
        Self { db, queue }
    }

    pub fn queue(&self) -> &QueueService {
        &self.queue
    }

    /// Case-insensitive lookup of an assistant/plan pair. Unknown pairs are
    /// a validation error (422 at the boundary).
    pub async fn resolve_plan(&self, assistant: &str, plan: &str) -> Result<PlanId> {
        let conn = self.db.conn();
        evals::resolve_plan(&conn, assistant, plan)?.ok_or_else(|| Error::UnknownPlan {
            assistant: assistant.to_owned(),
            plan: plan.to_owned(),
        })
    }

    /// Claim the next prompt for the given plan, or None when the queue is
    /// empty. At-least-once delivery: a claim that never submits is reaped
    /// after the timeout and handed to another worker.
    #[instrument(skip(self))]
    pub async fn poll(&self, plan_id: PlanId) -> Result<Option<ClaimedWork>> {
        let Some((queue_entry, prompt)) = self.queue.poll_next(plan_id).await? else {
            return Ok(None);
        };

        let evaluation_id = queue_entry
            .evaluation_id
            .ok_or_else(|| Error::not_found("evaluation for queue entry", queue_entry.id))?;

        let conn = self.db.conn();
        let evaluation = evals::evaluation(&conn, evaluation_id)?
            .ok_or_else(|| Error::not_found("evaluation", evaluation_id))?;
        drop(conn);

        Ok(Some(ClaimedWork {
            queue_entry,
            evaluation,
            prompt,
        }))
    }

    /// Store a worker's answer and complete the evaluation, synchronising
    /// the owning queue entry. A second submit for the same evaluation is a
    /// conflict.
    #[instrument(skip(self, answer))]
    pub async fn submit_answer(
        &self,
        evaluation_id: EvaluationId,
        answer: Answer,
    ) -> Result<Evaluation> {
        let now = Utc::now();

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let evaluation = evals::evaluation(&tx, evaluation_id)?
            .ok_or_else(|| Error::not_found("evaluation", evaluation_id))?;
        if evaluation.status == EvaluationStatus::Completed {
            return Err(Error::AlreadyCompleted(evaluation_id));
        }

        evals::complete_evaluation(&tx, evaluation_id, &answer, now)?;
        if let Some(entry) = evals::entry_by_evaluation(&tx, evaluation_id)? {
            evals::mark_completed(&tx, entry.id, evaluation_id)?;
        }

        let updated = evals::evaluation(&tx, evaluation_id)?
            .ok_or_else(|| Error::not_found("evaluation", evaluation_id))?;
        tx.commit()?;
        drop(conn);

        info!(evaluation = %evaluation_id, "answer submitted");
        Ok(updated)
    }

    /// Abandon a claim. `mark_as_failed` keeps the row with the reason in
    /// `answer.error`; otherwise the evaluation is deleted so the prompt can
    /// be re-queued. Completed evaluations cannot be released.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        evaluation_id: EvaluationId,
        mark_as_failed: bool,
        reason: Option<&str>,
    ) -> Result<ReleaseOutcome> {
        let now = Utc::now();

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let evaluation = evals::evaluation(&tx, evaluation_id)?
            .ok_or_else(|| Error::not_found("evaluation", evaluation_id))?;
        if evaluation.status == EvaluationStatus::Completed {
            return Err(Error::ReleaseCompleted(evaluation_id));
        }

        let entry = evals::entry_by_evaluation(&tx, evaluation_id)?;

        let outcome = if mark_as_failed {
            let answer = reason.map(Answer::failure);
            evals::fail_evaluation(&tx, evaluation_id, answer.as_ref(), now)?;
            if let Some(entry) = &entry {
                evals::mark_failed(&tx, entry.id, reason.unwrap_or("released by worker"))?;
            }
            ReleaseOutcome::MarkedFailed
        } else {
            evals::delete_evaluation(&tx, evaluation_id)?;
            if let Some(entry) = &entry {
                evals::mark_failed(&tx, entry.id, reason.unwrap_or("evaluation deleted"))?;
            }
            ReleaseOutcome::Deleted
        };

        tx.commit()?;
        drop(conn);

        debug!(evaluation = %evaluation_id, ?outcome, "released evaluation");
        Ok(outcome)
    }

    /// Latest completed evaluation per prompt for one plan, in input order.
    /// Prompts missing from the prompt store are skipped.
    pub async fn latest_results(
        &self,
        plan_id: PlanId,
        prompt_ids: &[PromptId],
    ) -> Result<Vec<(Prompt, Option<Evaluation>)>> {
        if prompt_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.conn();
        let known = prompts::get_many(&conn, prompt_ids)?;
        let mut latest = evals::latest_completed(&conn, plan_id, prompt_ids)?;
        drop(conn);

        Ok(prompt_ids
            .iter()
            .filter_map(|id| known.get(id).cloned())
            .map(|prompt| {
                let evaluation = latest.remove(&prompt.id);
                (prompt, evaluation)
            })
            .collect())
    }

    /// Convenience for worker auth flows: resolve names then poll.
    pub async fn poll_by_names(&self, assistant: &str, plan: &str) -> Result<Option<ClaimedWork>> {
        let plan_id = self.resolve_plan(assistant, plan).await?;
        self.poll(plan_id).await
    }

    /// Seed or look up an assistant plan, for ingest and tests.
    pub async fn ensure_plan(&self, assistant: &str, plan: &str) -> Result<PlanId> {
        let conn = self.db.conn();
        let assistant_id = evals::ensure_assistant(&conn, assistant)?;
        evals::ensure_plan(&conn, assistant_id, plan)
    }

    /// Enqueue on behalf of a user; thin passthrough kept so callers hold a
    /// single service handle.
    pub async fn request_fresh(
        &self,
        prompt_ids: &[PromptId],
        user_id: &UserId,
    ) -> Result<crate::service::EnqueueResult> {
        self.queue.enqueue(prompt_ids, user_id, None).await
    }
}
