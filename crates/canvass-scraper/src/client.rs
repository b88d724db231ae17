//! HTTP client for the scraper provider's trigger API.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument};

use canvass_core::{Error, Result, config::ScraperConfig};

use crate::types::{PromptInput, TriggerRequest};

/// Output fields requested from the provider; `input` must be present so
/// webhook items can be correlated back by prompt text.
const OUTPUT_FIELDS: &str = "prompt,answer_text,links_attached,citations,shopping,\
     search_sources,web_search_query,input,timestamp,model,recommendations";

#[derive(Debug, Clone)]
pub struct ScraperClient {
    http: reqwest::Client,
    api_token: String,
    dataset_id: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct TriggerPayload<'a> {
    input: &'a [PromptInput],
}

impl ScraperClient {
    /// Build a client from configuration. None when no API token is set —
    /// triggering is then a no-op upstream.
    pub fn from_config(config: &ScraperConfig) -> Option<Self> {
        if config.api_token.is_empty() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            api_token: config.api_token.clone(),
            dataset_id: config.dataset_id.clone(),
            base_url: config.base_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Fire a batch trigger (fire-and-forget: results come back on the
    /// webhook). Upstream failures map to the error taxonomy; callers mark
    /// the batch failed and do not retry inline.
    #[instrument(skip(self, request), fields(batch = %request.batch_id, inputs = request.inputs.len()))]
    pub async fn trigger(&self, request: &TriggerRequest) -> Result<()> {
        let response = self
            .http
            .post(&self.base_url)
            .query(&[
                ("dataset_id", self.dataset_id.as_str()),
                ("custom_output_fields", OUTPUT_FIELDS),
                ("endpoint", request.webhook_url.as_str()),
                ("auth_header", request.webhook_auth_header.as_str()),
                ("notify", "false"),
                ("format", "json"),
                ("uncompressed_webhook", "false"),
                ("force_deliver", "false"),
                ("include_errors", "true"),
            ])
            .bearer_auth(&self.api_token)
            .json(&TriggerPayload {
                input: &request.inputs,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &body));
        }

        info!(batch = %request.batch_id, "scraper batch triggered");
        Ok(())
    }
}

fn map_transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::GatewayTimeout
    } else {
        Error::Unreachable(error.to_string())
    }
}

fn map_status_error(status: u16, body: &str) -> Error {
    match status {
        401 => Error::UpstreamAuth,
        429 => Error::RateLimited,
        _ => Error::UpstreamRejected {
            status,
            message: body.chars().take(500).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn client_is_disabled_without_token() {
        let config = ScraperConfig::default();
        assert!(ScraperClient::from_config(&config).is_none());

        let enabled = ScraperConfig {
            api_token: "token".to_owned(),
            dataset_id: "ds_1".to_owned(),
            ..ScraperConfig::default()
        };
        assert!(ScraperClient::from_config(&enabled).is_some());
    }

    #[test]
    fn status_errors_map_to_taxonomy() {
        assert!(matches!(map_status_error(401, ""), Error::UpstreamAuth));
        assert!(matches!(map_status_error(429, ""), Error::RateLimited));
        assert!(matches!(
            map_status_error(500, "boom"),
            Error::UpstreamRejected { status: 500, .. }
        ));
    }

    #[test]
    fn payload_serializes_to_provider_shape() {
        let inputs = vec![PromptInput::chat("How to X?", "US")];
        let payload = serde_json::to_value(TriggerPayload { input: &inputs }).unwrap();

        assert_eq!(payload["input"][0]["url"], "https://chatgpt.com/");
        assert_eq!(payload["input"][0]["prompt"], "How to X?");
        assert_eq!(payload["input"][0]["country"], "US");
        assert_eq!(payload["input"][0]["web_search"], true);
        assert!(payload["input"][0].get("additional_prompt").is_none());
    }
}
