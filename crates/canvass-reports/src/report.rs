//! Report generation: snapshot the selected evaluation for every prompt in
//! a group, charging for the fresh ones.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

use canvass_billing::ChargeService;
use canvass_core::{
    Error, EvaluationId, GroupId, GroupReport, GroupReportItem, PromptGroup, ReportId,
    ReportItemStatus, Result, UserId,
};
use canvass_store::{Database, evals, prompts, reports};
use canvass_store::reports::ReportCounts;

use crate::selection::SelectionAnalyzer;
use crate::types::{GeneratedReport, PromptSelection, ReportPreview};
use crate::validator::validate_selections;

pub struct ReportService {
    db: Arc<Database>,
    charge: Arc<ChargeService>,
    analyzer: SelectionAnalyzer,
}

impl std::fmt::Debug for ReportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportService").finish_non_exhaustive()
    }
}

impl ReportService {
    pub fn new(db: Arc<Database>, charge: Arc<ChargeService>, analyzer: SelectionAnalyzer) -> Self {
        Self {
            db,
            charge,
            analyzer,
        }
    }

    /// Generate a report snapshot.
    ///
    /// Selections are validated against the current analysis; unspecified
    /// prompts take their default (or stay awaiting) per the flag. Fresh
    /// selected evaluations are charged — possibly partially, if the balance
    /// runs short — and the report, its items, and the charge commit as one
    /// transaction: the report either exists with its items or not at all.
    #[instrument(skip(self, selections), fields(group = %group_id, user = %user_id))]
    pub async fn generate(
        &self,
        group_id: GroupId,
        user_id: &UserId,
        title: Option<&str>,
        selections: &[PromptSelection],
        use_defaults_for_unspecified: bool,
    ) -> Result<GeneratedReport> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let group = prompts::get_group_for_user(&tx, group_id, user_id)?
            .ok_or_else(|| Error::not_found("prompt group", group_id))?;
        let prompt_ids = prompts::group_prompt_ids(&tx, group_id)?;

        if prompt_ids.is_empty() {
            let report_id = insert_report_row(
                &tx,
                &group,
                user_id,
                title,
                &ReportCounts {
                    total_prompts: 0,
                    prompts_with_data: 0,
                    prompts_awaiting: 0,
                    total_evaluations_loaded: 0,
                    total_cost: 0.0,
                },
            )?;
            let report = loaded(&tx, report_id)?;
            tx.commit()?;
            return Ok(GeneratedReport {
                report,
                items: Vec::new(),
                charge: None,
            });
        }

        let last_report = reports::latest_report(&tx, group_id, user_id)?;
        let analysis = self
            .analyzer
            .analyze_in(&tx, group_id, user_id, last_report.as_ref())?;
        let normalized = validate_selections(selections, &analysis, use_defaults_for_unspecified)?;

        let selected_ids: Vec<EvaluationId> = normalized
            .iter()
            .filter_map(|selection| selection.evaluation_id)
            .collect();
        let consumed = evals::consumed_ids(&tx, user_id, &selected_ids)?;
        let fresh_ids: Vec<EvaluationId> = selected_ids
            .iter()
            .filter(|id| !consumed.contains(id))
            .copied()
            .collect();

        let charge = if fresh_ids.is_empty() {
            None
        } else {
            Some(self.charge.charge_in(&tx, user_id, &fresh_ids)?)
        };
        let charged: HashSet<EvaluationId> = charge
            .as_ref()
            .map(|c| c.charged.iter().copied().collect())
            .unwrap_or_default();
        let total_cost = charge.as_ref().map_or(0.0, |c| c.total_charged);

        let with_data = i64::try_from(
            normalized
                .iter()
                .filter(|selection| selection.evaluation_id.is_some())
                .count(),
        )
        .unwrap_or(i64::MAX);
        let total = i64::try_from(normalized.len()).unwrap_or(i64::MAX);

        let report_id = insert_report_row(
            &tx,
            &group,
            user_id,
            title,
            &ReportCounts {
                total_prompts: total,
                prompts_with_data: with_data,
                prompts_awaiting: total - with_data,
                total_evaluations_loaded: with_data,
                total_cost,
            },
        )?;

        // Even split of the charge over the fresh items; exact while pricing
        // is uniform.
        #[allow(clippy::cast_precision_loss)]
        let per_item = if charged.is_empty() {
            0.0
        } else {
            total_cost / charged.len() as f64
        };

        for selection in &normalized {
            match selection.evaluation_id {
                None => reports::insert_item(
                    &tx,
                    report_id,
                    selection.prompt_id,
                    None,
                    ReportItemStatus::Awaiting,
                    false,
                    None,
                )?,
                Some(evaluation_id) => {
                    let is_fresh = charged.contains(&evaluation_id);
                    reports::insert_item(
                        &tx,
                        report_id,
                        selection.prompt_id,
                        Some(evaluation_id),
                        ReportItemStatus::Included,
                        is_fresh,
                        is_fresh.then_some(per_item),
                    )?;
                }
            }
        }

        let report = loaded(&tx, report_id)?;
        let items = reports::report_items(&tx, report_id)?;
        tx.commit()?;
        drop(conn);

        info!(
            report = %report.id,
            prompts = report.total_prompts,
            cost = report.total_cost,
            "generated group report"
        );

        Ok(GeneratedReport {
            report,
            items,
            charge,
        })
    }

    /// What generating with default selections would cost right now.
    #[instrument(skip(self), fields(group = %group_id, user = %user_id))]
    pub async fn preview(&self, group_id: GroupId, user_id: &UserId) -> Result<ReportPreview> {
        let conn = self.db.conn();
        prompts::get_group_for_user(&conn, group_id, user_id)?
            .ok_or_else(|| Error::not_found("prompt group", group_id))?;

        let prompt_ids = prompts::group_prompt_ids(&conn, group_id)?;
        let with_data = evals::prompts_with_completed(&conn, &prompt_ids)?;
        let evaluation_ids = evals::completed_ids(&conn, &prompt_ids)?;
        drop(conn);

        let charge_preview = self.charge.preview(user_id, &evaluation_ids).await?;

        Ok(ReportPreview {
            group_id,
            total_prompts: prompt_ids.len(),
            prompts_with_data: with_data.len(),
            prompts_awaiting: prompt_ids.len() - with_data.len(),
            fresh_evaluations: charge_preview.fresh_count,
            already_consumed: charge_preview.already_consumed_count,
            estimated_cost: charge_preview.estimated_cost,
            user_balance: charge_preview.user_balance,
            affordable_count: charge_preview.affordable_count,
            needs_top_up: charge_preview.needs_top_up,
        })
    }

    pub async fn get_report(
        &self,
        report_id: ReportId,
        user_id: &UserId,
    ) -> Result<(GroupReport, Vec<GroupReportItem>)> {
        let conn = self.db.conn();
        let report = reports::report_for_user(&conn, report_id, user_id)?
            .ok_or_else(|| Error::not_found("report", report_id))?;
        let items = reports::report_items(&conn, report_id)?;
        Ok((report, items))
    }

    pub async fn list_reports(
        &self,
        group_id: GroupId,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<GroupReport>, i64)> {
        let conn = self.db.conn();
        reports::list_reports(&conn, group_id, user_id, limit, offset)
    }

    pub async fn latest_report(
        &self,
        group_id: GroupId,
        user_id: &UserId,
    ) -> Result<Option<GroupReport>> {
        let conn = self.db.conn();
        reports::latest_report(&conn, group_id, user_id)
    }
}

fn insert_report_row(
    conn: &rusqlite::Connection,
    group: &PromptGroup,
    user_id: &UserId,
    title: Option<&str>,
    counts: &ReportCounts,
) -> Result<ReportId> {
    reports::insert_report(
        conn,
        group.id,
        user_id,
        title,
        counts,
        group.brand.as_ref(),
        &group.competitors,
    )
}

fn loaded(conn: &rusqlite::Connection, id: ReportId) -> Result<GroupReport> {
    reports::report(conn, id)?.ok_or_else(|| Error::not_found("report", id))
}
