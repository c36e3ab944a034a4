// OpenAI moderation endpoint adapter.
//
// The hosted moderation API returns, per input, a boolean per category plus
// a probability per category. We send one text per call and hand both back
// as raw signals; category names stay in OpenAI's vocabulary here
// ("self-harm/intent", "harassment/threatening", ...).
//
// API docs: https://platform.openai.com/docs/api-reference/moderations

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::traits::{Classifier, RawProviderResult, RawSignal};
use crate::error::ProviderError;
use crate::output::truncate_chars;
use crate::taxonomy::ProviderId;

/// Hosted moderation API classifier.
pub struct OpenAiModerator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiModerator {
    /// Create a classifier for the moderation endpoint under `base_url`.
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("sieve/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: format!("{}/v1/moderations", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Classifier for OpenAiModerator {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn classify(&self, text: &str) -> Result<RawProviderResult, ProviderError> {
        let request = ModerationsRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("moderation response was not JSON: {e}"))
        })?;

        let result = parse_response(body)?;

        debug!(
            signals = result.signals.len(),
            text_preview = %truncate_chars(text, 50),
            "OpenAI moderated text"
        );

        Ok(result)
    }
}

/// Turn a moderation response body into raw signals.
///
/// Every `category_scores` entry becomes a probability. A category that only
/// appears in `categories` (no score) becomes a yes/no flag.
pub fn parse_response(body: Value) -> Result<RawProviderResult, ProviderError> {
    let parsed: ModerationsResponse = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::MalformedResponse(format!("unexpected moderation shape: {e}")))?;

    let first = parsed
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("moderation response had no results".into()))?;

    let mut signals: Vec<RawSignal> = first
        .category_scores
        .iter()
        .map(|(label, &score)| RawSignal::probability(label.as_str(), score))
        .collect();

    for (label, &flagged) in &first.categories {
        if !first.category_scores.contains_key(label) {
            signals.push(RawSignal::flag(label.as_str(), flagged));
        }
    }

    Ok(RawProviderResult {
        signals,
        payload: body,
    })
}

// --- Moderation API request/response types ---

#[derive(Serialize)]
struct ModerationsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct ModerationsResponse {
    #[serde(default)]
    results: Vec<ModerationsResult>,
}

#[derive(Deserialize)]
struct ModerationsResult {
    #[serde(default)]
    categories: BTreeMap<String, bool>,
    #[serde(default)]
    category_scores: BTreeMap<String, f64>,
}
