//! Core domain types for Canvass.
//!
//! These are the first-class types shared across the service crates. The
//! store crate maps them to and from rows; everything above it works in
//! these terms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{
    AssistantId, EvaluationId, GrantId, GroupId, PlanId, PromptId, QueueEntryId, ReportId,
    TransactionId, UserId,
};

/// Width of prompt embeddings; cosine distance is the only metric in use.
pub const EMBEDDING_DIMENSIONS: usize = 384;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Queue entry lifecycle. `pending → in_progress → {completed | failed}`,
/// `pending → cancelled`, and `in_progress → pending` via the stale reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal rows never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation lifecycle. `in_progress → {completed | failed}`; an
/// in-progress evaluation may also be deleted on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    InProgress,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a credit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    SignupBonus,
    Payment,
    PromoCode,
    Referral,
    AdminGrant,
}

impl CreditSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignupBonus => "signup_bonus",
            Self::Payment => "payment",
            Self::PromoCode => "promo_code",
            Self::Referral => "referral",
            Self::AdminGrant => "admin_grant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "signup_bonus" => Some(Self::SignupBonus),
            "payment" => Some(Self::Payment),
            "promo_code" => Some(Self::PromoCode),
            "referral" => Some(Self::Referral),
            "admin_grant" => Some(Self::AdminGrant),
            _ => None,
        }
    }
}

/// Direction of a balance transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// Status of one row in a report snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportItemStatus {
    Included,
    Awaiting,
    Skipped,
}

impl ReportItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Included => "included",
            Self::Awaiting => "awaiting",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "included" => Some(Self::Included),
            "awaiting" => Some(Self::Awaiting),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Terminal disposition of an outbound scrape batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Completed,
    Partial,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Prompts and groups
// ---------------------------------------------------------------------------

/// A stored prompt. The 384-dim embedding lives in its own table and is only
/// materialised where nearest-neighbour search needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub text: String,
    pub topic_id: Option<i64>,
    pub user_id: Option<UserId>,
}

/// A user-owned set of prompts plus tracked brand/competitor metadata.
/// `(user_id, title)` is unique; the topic is immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGroup {
    pub id: GroupId,
    pub user_id: UserId,
    pub title: String,
    pub topic_id: Option<i64>,
    pub brand: Option<serde_json::Value>,
    pub competitors: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Queue and evaluations
// ---------------------------------------------------------------------------

/// One scheduling intent: a prompt, a requester, and (once claimed) the
/// evaluation that answers it. At most one non-terminal entry exists per
/// prompt at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub prompt_id: PromptId,
    pub requested_by: UserId,
    pub request_batch_id: String,
    pub requested_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub evaluation_id: Option<EvaluationId>,
    pub failure_reason: Option<String>,
}

/// A cited source attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Citation {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            domain: None,
            text: None,
        }
    }
}

/// The answer payload of an evaluation. A failed evaluation stores only the
/// `error` field; a completed one stores response, citations and timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub response: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Answer {
    pub fn new(response: impl Into<String>, citations: Vec<Citation>, at: DateTime<Utc>) -> Self {
        Self {
            response: response.into(),
            citations,
            timestamp: Some(at),
            error: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// One attempt by one assistant plan to answer one prompt. Retries produce
/// multiple rows per `(prompt, plan)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub prompt_id: PromptId,
    pub assistant_plan_id: PlanId,
    pub status: EvaluationStatus,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub answer: Option<Answer>,
}

/// An AI assistant known to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: AssistantId,
    pub name: String,
}

/// A plan of an assistant; `(assistant_id, name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantPlan {
    pub id: PlanId,
    pub assistant_id: AssistantId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Users and balance
// ---------------------------------------------------------------------------

/// A platform user. Authentication lives outside the core; verification is
/// tracked here because the signup bonus hangs off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub email_verified: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A unit of balance with optional expiry. Drained grants stay for audit;
/// `0 <= remaining_amount <= original_amount` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditGrant {
    pub id: GrantId,
    pub user_id: UserId,
    pub source: CreditSource,
    pub original_amount: f64,
    pub remaining_amount: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit-log entry carrying the post-transaction balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub amount: f64,
    pub balance_after: f64,
    pub reason: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user's spendable balance plus the slice of it expiring within a week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub user_id: UserId,
    pub available: f64,
    pub expiring_soon: f64,
    pub expiring_at: Option<DateTime<Utc>>,
}

/// The idempotency record of the charge engine: unique per
/// `(user, evaluation)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumedEvaluation {
    pub id: i64,
    pub user_id: UserId,
    pub evaluation_id: EvaluationId,
    pub amount_charged: f64,
    pub consumed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A snapshot of which evaluation represents each prompt in a group at a
/// point in time, plus the cost paid to assemble it. Brand and competitor
/// metadata are copied in so later comparisons can diff against them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    pub id: ReportId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub total_prompts: i64,
    pub prompts_with_data: i64,
    pub prompts_awaiting: i64,
    pub total_evaluations_loaded: i64,
    pub total_cost: f64,
    pub brand_snapshot: Option<serde_json::Value>,
    pub competitors_snapshot: Vec<serde_json::Value>,
}

/// One row of a report: either an included evaluation or an awaiting marker.
/// `amount_charged` is set only on fresh (paid-for) items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReportItem {
    pub id: i64,
    pub report_id: ReportId,
    pub prompt_id: PromptId,
    pub evaluation_id: Option<EvaluationId>,
    pub status: ReportItemStatus,
    pub is_fresh: bool,
    pub amount_charged: Option<f64>,
}

// ---------------------------------------------------------------------------
// Scrape batches
// ---------------------------------------------------------------------------

/// Persistent record of an outbound scraper batch, keyed by the opaque
/// batch id the provider echoes back on its webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeBatch {
    pub batch_id: String,
    pub user_id: UserId,
    pub prompt_ids: Vec<PromptId>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
