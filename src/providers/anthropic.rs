// Prompt-based classifier using the Anthropic messages API.
//
// A general-purpose model has no moderation endpoint, so we ask it for a
// verdict in a fixed JSON shape and pull that JSON back out of the reply.
// Models sometimes wrap the object in prose or code fences; we take the
// outermost {...} span of the first text block.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{Classifier, RawProviderResult, RawSignal};
use crate::error::ProviderError;
use crate::output::truncate_chars;
use crate::taxonomy::ProviderId;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;

const SYSTEM_PROMPT: &str = "You are a content moderation system. You analyze text objectively \
and report whether it contains harmful material. You answer with JSON only.";

/// Prompt-driven classifier backed by a Claude model.
pub struct AnthropicClassifier {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl AnthropicClassifier {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("sieve/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Classifier for AnthropicClassifier {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn classify(&self, text: &str) -> Result<RawProviderResult, ProviderError> {
        let prompt = build_prompt(text);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            ProviderError::MalformedResponse(format!("messages response was not JSON: {e}"))
        })?;

        let result = parse_message(body)?;

        debug!(
            signals = result.signals.len(),
            text_preview = %truncate_chars(text, 50),
            "Anthropic classified text"
        );

        Ok(result)
    }
}

/// Build the classification prompt for a piece of content.
pub fn build_prompt(text: &str) -> String {
    format!(
        r#"Content to moderate:

```
{text}
```

Assess whether the content above contains problematic material in each of these categories:
- hate: hateful speech targeting protected groups
- harassment: harassment, insults or bullying
- self_harm: promotion or encouragement of self-harm
- sexual: sexual content
- violence: violent content or threats
- profanity: profane or vulgar language

Respond only with JSON in exactly this format:
{{
    "flagged": true/false,
    "categories": {{
        "hate": true/false,
        "harassment": true/false,
        "self_harm": true/false,
        "sexual": true/false,
        "violence": true/false,
        "profanity": true/false
    }},
    "category_scores": {{
        "hate": 0.0-1.0,
        "harassment": 0.0-1.0,
        "self_harm": 0.0-1.0,
        "sexual": 0.0-1.0,
        "violence": 0.0-1.0,
        "profanity": 0.0-1.0
    }},
    "explanation": "short explanation"
}}"#
    )
}

/// Turn a messages API response body into raw signals.
pub fn parse_message(body: Value) -> Result<RawProviderResult, ProviderError> {
    let parsed: MessagesResponse = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::MalformedResponse(format!("unexpected messages shape: {e}")))?;

    let reply = parsed
        .content
        .iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text.as_deref())
        .ok_or_else(|| ProviderError::MalformedResponse("reply had no text block".into()))?;

    let verdict = parse_verdict(reply)?;

    let mut signals: Vec<RawSignal> = verdict
        .category_scores
        .iter()
        .map(|(label, &score)| RawSignal::probability(label.as_str(), score))
        .collect();
    for (label, &flagged) in &verdict.categories {
        if !verdict.category_scores.contains_key(label) {
            signals.push(RawSignal::flag(label.as_str(), flagged));
        }
    }

    Ok(RawProviderResult {
        signals,
        payload: json!({
            "message": body,
            "verdict": {
                "flagged": verdict.flagged,
                "categories": verdict.categories,
                "category_scores": verdict.category_scores,
                "explanation": verdict.explanation,
            },
        }),
    })
}

/// Extract and parse the JSON verdict embedded in the model's reply.
pub fn parse_verdict(reply: &str) -> Result<Verdict, ProviderError> {
    let span = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(ProviderError::MalformedResponse(format!(
                "no JSON object in reply: {}",
                truncate_chars(reply, 80)
            )))
        }
    };

    serde_json::from_str(span)
        .map_err(|e| ProviderError::MalformedResponse(format!("verdict JSON did not parse: {e}")))
}

/// The verdict object the prompt asks for.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub flagged: Option<bool>,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub explanation: Option<String>,
}

// --- Messages API request/response types ---

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}
