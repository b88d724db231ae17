//! Wire and domain types of the external batch correlator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use canvass_core::{BatchStatus, PromptId, UserId};

/// One prompt in an outbound trigger request, in the provider's input shape.
#[derive(Debug, Clone, Serialize)]
pub struct PromptInput {
    pub url: String,
    pub prompt: String,
    pub country: String,
    pub web_search: bool,
    pub require_sources: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_prompt: Option<String>,
}

impl PromptInput {
    /// Standard input targeting the assistant's web UI.
    pub fn chat(prompt: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            url: "https://chatgpt.com/".to_owned(),
            prompt: prompt.into(),
            country: country.into(),
            web_search: true,
            require_sources: true,
            additional_prompt: None,
        }
    }
}

/// A fully assembled trigger request: inputs plus where (and how) the
/// provider should deliver the webhook.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub batch_id: String,
    pub inputs: Vec<PromptInput>,
    pub webhook_url: String,
    pub webhook_auth_header: String,
}

/// One item of the provider's webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookItem {
    pub input: WebhookInput,
    #[serde(default)]
    pub answer_text: String,
    #[serde(default)]
    pub citations: Vec<WebhookCitation>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInput {
    pub prompt: String,
}

/// Citation as the provider reports it. Only entries the model actually
/// cited (`cited = true`) survive parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCitation {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub cited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCitation {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub domain: Option<String>,
}

/// A webhook item correlated back to the prompt that requested it.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedResult {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    pub answer_text: String,
    pub citations: Vec<ParsedCitation>,
    pub model: Option<String>,
    pub timestamp: Option<String>,
}

/// Summary returned to the webhook caller.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub batch_id: String,
    pub processed: usize,
    pub failed: usize,
    pub status: BatchStatus,
}

/// In-memory record of one registered batch: the forward map the trigger
/// was built from, the reverse map webhook dispatch uses, and accumulated
/// results.
#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub batch_id: String,
    pub user_id: UserId,
    pub prompt_id_to_text: HashMap<PromptId, String>,
    pub text_to_prompt_id: HashMap<String, PromptId>,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub results: Vec<ParsedResult>,
    pub errors: Vec<String>,
}
