//! Per-prompt freshness and the group comparison contract.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use canvass_core::{Config, Error, GroupId, GroupReport, PromptGroup, Result, UserId};
use canvass_store::{Database, evals, prompts, reports};

use crate::selection::SelectionAnalyzer;
use crate::types::{BrandChanges, GroupComparison, PromptFreshnessInfo};

const NO_NEW_DATA: &str = "no_new_data";

/// Compares each prompt's latest answer with the one its last report used.
#[derive(Debug, Clone)]
pub struct FreshnessAnalyzer {
    db: Arc<Database>,
    in_progress_estimate: String,
    next_refresh_estimate: String,
}

impl FreshnessAnalyzer {
    pub fn new(
        db: Arc<Database>,
        in_progress_estimate: impl Into<String>,
        next_refresh_estimate: impl Into<String>,
    ) -> Self {
        Self {
            db,
            in_progress_estimate: in_progress_estimate.into(),
            next_refresh_estimate: next_refresh_estimate.into(),
        }
    }

    pub fn from_config(db: Arc<Database>, config: &Config) -> Self {
        Self::new(db, config.queue.in_progress_wait.clone(), "on next refresh")
    }

    /// Freshness rows for every prompt in the group.
    #[instrument(skip(self, last_report), fields(group = %group_id))]
    pub async fn analyze(
        &self,
        group_id: GroupId,
        last_report: Option<&GroupReport>,
    ) -> Result<Vec<PromptFreshnessInfo>> {
        let conn = self.db.conn();

        let prompt_ids = prompts::group_prompt_ids(&conn, group_id)?;
        if prompt_ids.is_empty() {
            return Ok(Vec::new());
        }
        let prompt_texts = prompts::get_many(&conn, &prompt_ids)?;

        // Newest completed evaluation per prompt (rows arrive newest-first).
        let mut latest = HashMap::new();
        for row in evals::completed_with_assistants(&conn, &prompt_ids)? {
            latest.entry(row.prompt_id).or_insert(row.completed_at);
        }

        let mut previous = HashMap::new();
        if let Some(report) = last_report {
            for (prompt_id, _, completed_at) in reports::report_evaluation_info(&conn, report.id)? {
                previous.insert(prompt_id, completed_at);
            }
        }

        let in_progress = evals::prompts_in_progress(&conn, &prompt_ids)?;
        drop(conn);

        Ok(prompt_ids
            .into_iter()
            .map(|prompt_id| {
                let latest_at = latest.get(&prompt_id).copied();
                let previous_at = previous.get(&prompt_id).copied().flatten();
                let has_fresher_answer = match (latest_at, previous_at) {
                    (Some(latest), Some(previous)) => latest > previous,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                let has_in_progress = in_progress.contains(&prompt_id);

                PromptFreshnessInfo {
                    prompt_id,
                    prompt_text: prompt_texts
                        .get(&prompt_id)
                        .map(|p| p.text.clone())
                        .unwrap_or_default(),
                    has_fresher_answer,
                    latest_answer_at: latest_at,
                    previous_answer_at: previous_at,
                    next_refresh_estimate: if has_in_progress {
                        self.in_progress_estimate.clone()
                    } else {
                        self.next_refresh_estimate.clone()
                    },
                    has_in_progress_evaluation: has_in_progress,
                }
            })
            .collect())
    }
}

/// The `/compare` service: selection analysis, brand diff, and the
/// can-generate gate.
pub struct ComparisonService {
    db: Arc<Database>,
    analyzer: SelectionAnalyzer,
}

impl std::fmt::Debug for ComparisonService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonService").finish_non_exhaustive()
    }
}

impl ComparisonService {
    pub fn new(db: Arc<Database>, analyzer: SelectionAnalyzer) -> Self {
        Self { db, analyzer }
    }

    /// Compare the group's current state with its latest report. Generation
    /// is allowed only when at least one default selection is fresh; brand
    /// or competitor edits alone never unlock it.
    #[instrument(skip(self), fields(group = %group_id, user = %user_id))]
    pub async fn compare(&self, group_id: GroupId, user_id: &UserId) -> Result<GroupComparison> {
        let conn = self.db.conn();
        let group = prompts::get_group_for_user(&conn, group_id, user_id)?
            .ok_or_else(|| Error::not_found("prompt group", group_id))?;
        let last_report = reports::latest_report(&conn, group_id, user_id)?;
        drop(conn);

        let prompt_selections = self
            .analyzer
            .analyze(group_id, user_id, last_report.as_ref())
            .await?;

        let default_fresh_count = prompt_selections
            .iter()
            .filter(|info| {
                info.default_selection.is_some_and(|selected| {
                    info.available_options
                        .iter()
                        .any(|option| option.evaluation_id == selected && option.is_fresh)
                })
            })
            .count();

        let can_generate = default_fresh_count > 0;

        Ok(GroupComparison {
            group_id,
            last_report_at: last_report.as_ref().map(|r| r.created_at),
            prompt_selections,
            brand_changes: brand_changes(&group, last_report.as_ref()),
            default_fresh_count,
            can_generate,
            generation_disabled_reason: if can_generate {
                None
            } else {
                Some(NO_NEW_DATA.to_owned())
            },
        })
    }
}

fn brand_changes(group: &PromptGroup, last_report: Option<&GroupReport>) -> BrandChanges {
    let previous_brand = last_report.and_then(|r| r.brand_snapshot.clone());
    let previous_competitors = last_report
        .map(|r| r.competitors_snapshot.clone())
        .unwrap_or_default();

    BrandChanges {
        brand_changed: last_report.is_some() && group.brand != previous_brand,
        competitors_changed: last_report.is_some() && group.competitors != previous_competitors,
        current_brand: group.brand.clone(),
        previous_brand,
        current_competitors: group.competitors.clone(),
        previous_competitors,
    }
}
