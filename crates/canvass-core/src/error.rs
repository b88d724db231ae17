use thiserror::Error;

use crate::ids::{EvaluationId, UserId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ── Addressing ───────────────────────────────────────────────────────────
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    // ── Lifecycle conflicts ──────────────────────────────────────────────────
    #[error("evaluation {0} already completed")]
    AlreadyCompleted(EvaluationId),

    #[error("cannot release completed evaluation {0}")]
    ReleaseCompleted(EvaluationId),

    // ── Validation ───────────────────────────────────────────────────────────
    #[error("unknown assistant plan: {assistant}/{plan}")]
    UnknownPlan { assistant: String, plan: String },

    #[error("invalid selection: {}", .0.join("; "))]
    InvalidSelection(Vec<String>),

    #[error("batch size {got} exceeds maximum {max}")]
    BatchTooLarge { got: usize, max: usize },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),

    // ── Billing ──────────────────────────────────────────────────────────────
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("evaluation {evaluation_id} already consumed by user {user_id}")]
    DuplicateConsumption {
        user_id: UserId,
        evaluation_id: EvaluationId,
    },

    // ── External scraper ─────────────────────────────────────────────────────
    #[error("scraper authentication failed")]
    UpstreamAuth,

    #[error("scraper rate limit exceeded")]
    RateLimited,

    #[error("scraper request timed out")]
    GatewayTimeout,

    #[error("scraper unreachable: {0}")]
    Unreachable(String),

    #[error("scraper rejected request ({status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    // ── Infrastructure ───────────────────────────────────────────────────────
    #[error("embedding service failure: {0}")]
    Embedding(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for errors a caller addressed at a missing entity (404-shaped).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for terminal-transition and duplicate-consumption conflicts
    /// (409-shaped).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCompleted(_) | Self::ReleaseCompleted(_) | Self::DuplicateConsumption { .. }
        )
    }
}
