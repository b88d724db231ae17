pub mod sqlite;

pub use sqlite::{Database, evals, prompts, reports, users};
pub use sqlite::evals::CompletedEvaluation;
