pub mod evaluations;
pub mod service;
pub mod wait;

pub use evaluations::{ClaimedWork, EvaluationService, ReleaseOutcome};
pub use service::{EnqueueResult, QueueService, QueueStatusReport};
pub use wait::WaitEstimator;
