pub mod service;

pub use service::{IngestResult, IngestedPrompt, PromptIngest};
