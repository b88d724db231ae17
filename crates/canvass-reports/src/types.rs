//! Result types of selection analysis, freshness comparison, and report
//! generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canvass_billing::ChargeResult;
use canvass_core::{EvaluationId, GroupId, GroupReport, GroupReportItem, PlanId, PromptId};

/// One selectable evaluation for a prompt: who answered, when, and what
/// selecting it would cost (zero once consumed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOption {
    pub evaluation_id: EvaluationId,
    pub assistant_plan_id: PlanId,
    pub assistant_name: String,
    pub plan_name: String,
    pub completed_at: DateTime<Utc>,
    pub is_fresh: bool,
    pub unit_price: f64,
}

/// Per-prompt selection analysis: which evaluations the user may pick for
/// the next report, and what the last report used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSelectionInfo {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    /// Evaluations strictly newer than the last report's choice, plus that
    /// choice itself (re-selecting it is free). All completed evaluations
    /// when no report exists yet.
    pub available_options: Vec<EvaluationOption>,
    pub default_selection: Option<EvaluationId>,
    pub was_awaiting_in_last_report: bool,
    pub last_report_evaluation_id: Option<EvaluationId>,
    pub last_report_evaluation_at: Option<DateTime<Utc>>,
    pub has_in_progress_evaluation: bool,
}

/// A user's choice for one prompt. `None` means leave the prompt awaiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSelection {
    pub prompt_id: PromptId,
    pub evaluation_id: Option<EvaluationId>,
}

/// Price of a set of selected evaluations: fresh ones cost the unit price,
/// consumed ones are free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionPricing {
    pub total_cost: f64,
    pub fresh_count: usize,
    pub already_consumed_count: usize,
}

/// Per-prompt freshness relative to the last report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptFreshnessInfo {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    pub has_fresher_answer: bool,
    pub latest_answer_at: Option<DateTime<Utc>>,
    pub previous_answer_at: Option<DateTime<Utc>>,
    pub next_refresh_estimate: String,
    pub has_in_progress_evaluation: bool,
}

/// Diff of tracked brand metadata between the live group and the snapshot
/// taken when the last report was generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandChanges {
    pub brand_changed: bool,
    pub competitors_changed: bool,
    pub current_brand: Option<serde_json::Value>,
    pub previous_brand: Option<serde_json::Value>,
    pub current_competitors: Vec<serde_json::Value>,
    pub previous_competitors: Vec<serde_json::Value>,
}

/// The `/compare` payload: what changed since the last report and whether a
/// new one is worth generating. Brand changes alone do not gate generation —
/// report statistics are recalculable on the fly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupComparison {
    pub group_id: GroupId,
    pub last_report_at: Option<DateTime<Utc>>,
    pub prompt_selections: Vec<PromptSelectionInfo>,
    pub brand_changes: BrandChanges,
    pub default_fresh_count: usize,
    pub can_generate: bool,
    pub generation_disabled_reason: Option<String>,
}

/// What generating a report would cost, before committing to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPreview {
    pub group_id: GroupId,
    pub total_prompts: usize,
    pub prompts_with_data: usize,
    pub prompts_awaiting: usize,
    pub fresh_evaluations: usize,
    pub already_consumed: usize,
    pub estimated_cost: f64,
    pub user_balance: f64,
    pub affordable_count: usize,
    pub needs_top_up: bool,
}

/// A freshly generated report with its items and the charge that paid for
/// it (absent when nothing fresh was selected).
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub report: GroupReport,
    pub items: Vec<GroupReportItem>,
    pub charge: Option<ChargeResult>,
}
