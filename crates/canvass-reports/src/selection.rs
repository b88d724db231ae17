//! Selection analysis: which evaluation may represent each prompt in the
//! next report.
//!
//! An evaluation is offered when it is strictly newer than the one the last
//! report used for that prompt, or when it *is* that one (re-selecting the
//! same answer is free). With no previous report every completed evaluation
//! is on the table.

use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

use canvass_core::{EvaluationId, GroupId, GroupReport, PromptId, Result, UserId};
use canvass_store::{Database, evals, prompts, reports};

use crate::types::{EvaluationOption, PromptSelectionInfo, SelectionPricing};

/// Picks the default evaluation for a prompt out of its available options.
pub trait SelectionStrategy: Send + Sync + std::fmt::Debug {
    fn select_default(
        &self,
        options: &[EvaluationOption],
        was_awaiting: bool,
    ) -> Option<EvaluationId>;
}

/// Default strategy: the most recently completed option wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostRecent;

impl SelectionStrategy for MostRecent {
    fn select_default(
        &self,
        options: &[EvaluationOption],
        _was_awaiting: bool,
    ) -> Option<EvaluationId> {
        options
            .iter()
            .max_by_key(|option| (option.completed_at, option.evaluation_id))
            .map(|option| option.evaluation_id)
    }
}

pub struct SelectionAnalyzer {
    db: Arc<Database>,
    unit_price: f64,
    strategy: Arc<dyn SelectionStrategy>,
}

impl std::fmt::Debug for SelectionAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionAnalyzer")
            .field("unit_price", &self.unit_price)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl SelectionAnalyzer {
    pub fn new(db: Arc<Database>, unit_price: f64, strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self {
            db,
            unit_price,
            strategy,
        }
    }

    pub fn most_recent(db: Arc<Database>, unit_price: f64) -> Self {
        Self::new(db, unit_price, Arc::new(MostRecent))
    }

    /// Analyze every prompt in the group against the last report.
    #[instrument(skip(self, last_report), fields(group = %group_id, user = %user_id))]
    pub async fn analyze(
        &self,
        group_id: GroupId,
        user_id: &UserId,
        last_report: Option<&GroupReport>,
    ) -> Result<Vec<PromptSelectionInfo>> {
        let conn = self.db.conn();
        self.analyze_in(&conn, group_id, user_id, last_report)
    }

    /// Same as [`analyze`](Self::analyze) but inside the caller's
    /// transaction, so report generation sees a consistent snapshot.
    pub fn analyze_in(
        &self,
        conn: &Connection,
        group_id: GroupId,
        user_id: &UserId,
        last_report: Option<&GroupReport>,
    ) -> Result<Vec<PromptSelectionInfo>> {
        let prompt_ids = prompts::group_prompt_ids(conn, group_id)?;
        if prompt_ids.is_empty() {
            return Ok(Vec::new());
        }
        let prompt_texts = prompts::get_many(conn, &prompt_ids)?;

        // The last report's evaluation (and its completion time) per prompt
        // is the freshness cutoff.
        let mut last_report_evals = HashMap::new();
        if let Some(report) = last_report {
            for (prompt_id, evaluation_id, completed_at) in
                reports::report_evaluation_info(conn, report.id)?
            {
                last_report_evals.insert(prompt_id, (evaluation_id, completed_at));
            }
        }
        let last_report_eval_ids: HashSet<EvaluationId> = last_report_evals
            .values()
            .filter_map(|(id, _)| *id)
            .collect();

        // All completed evaluations, newest first; filter to fresher-than-
        // cutoff or in-last-report per prompt.
        let mut options_by_prompt: HashMap<PromptId, Vec<EvaluationOption>> = HashMap::new();
        let mut offered_ids = Vec::new();
        for row in evals::completed_with_assistants(conn, &prompt_ids)? {
            let cutoff = last_report_evals
                .get(&row.prompt_id)
                .and_then(|(_, at)| *at);
            let is_fresher = cutoff.is_none_or(|cutoff| row.completed_at > cutoff);
            let was_in_last_report = last_report_eval_ids.contains(&row.id);
            if !is_fresher && !was_in_last_report {
                continue;
            }

            offered_ids.push(row.id);
            options_by_prompt
                .entry(row.prompt_id)
                .or_default()
                .push(EvaluationOption {
                    evaluation_id: row.id,
                    assistant_plan_id: row.assistant_plan_id,
                    assistant_name: row.assistant_name,
                    plan_name: row.plan_name,
                    completed_at: row.completed_at,
                    is_fresh: false, // filled below once consumption is known
                    unit_price: 0.0,
                });
        }

        let consumed = evals::consumed_ids(conn, user_id, &offered_ids)?;
        let in_progress = evals::prompts_in_progress(conn, &prompt_ids)?;

        let mut out = Vec::with_capacity(prompt_ids.len());
        for prompt_id in prompt_ids {
            let mut options = options_by_prompt.remove(&prompt_id).unwrap_or_default();
            for option in &mut options {
                option.is_fresh = !consumed.contains(&option.evaluation_id);
                option.unit_price = if option.is_fresh { self.unit_price } else { 0.0 };
            }

            let last_eval = last_report_evals.get(&prompt_id);
            let was_awaiting =
                last_report.is_some() && last_eval.is_none_or(|(id, _)| id.is_none());
            let default_selection = self.strategy.select_default(&options, was_awaiting);

            out.push(PromptSelectionInfo {
                prompt_id,
                prompt_text: prompt_texts
                    .get(&prompt_id)
                    .map(|p| p.text.clone())
                    .unwrap_or_default(),
                available_options: options,
                default_selection,
                was_awaiting_in_last_report: was_awaiting,
                last_report_evaluation_id: last_eval.and_then(|(id, _)| *id),
                last_report_evaluation_at: last_eval.and_then(|(_, at)| *at),
                has_in_progress_evaluation: in_progress.contains(&prompt_id),
            });
        }

        Ok(out)
    }

    /// Price a set of selected evaluations: fresh × unit price, consumed
    /// selections cost nothing.
    pub async fn price_selections(
        &self,
        user_id: &UserId,
        evaluation_ids: &[EvaluationId],
    ) -> Result<SelectionPricing> {
        let conn = self.db.conn();
        let consumed = evals::consumed_ids(&conn, user_id, evaluation_ids)?;
        drop(conn);

        let already_consumed_count = evaluation_ids
            .iter()
            .filter(|id| consumed.contains(id))
            .count();
        let fresh_count = evaluation_ids.len() - already_consumed_count;

        #[allow(clippy::cast_precision_loss)]
        Ok(SelectionPricing {
            total_cost: self.unit_price * fresh_count as f64,
            fresh_count,
            already_consumed_count,
        })
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }
}
