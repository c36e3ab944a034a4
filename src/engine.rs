// Moderation engine: pick providers for a request, call them, merge verdicts.
//
// Flow for one request:
// 1. Reject anything that isn't text, and resolve the mode to a provider set
//    (configuration errors surface here, before any call is made)
// 2. Call every selected provider concurrently, each under its own pacing,
//    timeout and retry policy; one provider failing never cancels the others
// 3. Normalize each successful response into the canonical taxonomy
// 4. Merge: flagged is OR, each category score is the max across providers
//
// If every selected provider failed, the request fails. An outage must never
// look like clean content.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ConfigError, ModerationError, ProviderError};
use crate::normalize::{normalize, CanonicalResult};
use crate::providers::anthropic::AnthropicClassifier;
use crate::providers::detoxify::DetoxifyClassifier;
use crate::providers::openai::OpenAiModerator;
use crate::providers::rate_limiter::RateLimiter;
use crate::providers::traits::{Classifier, RawProviderResult};
use crate::retry::{with_retry, RetryPolicy};
use crate::taxonomy::{Category, CategoryScores, ContentType, ModerationMode, ProviderId};

/// A request to moderate one piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationRequest {
    pub content: String,
    pub content_type: ContentType,
    pub mode: ModerationMode,
    /// Attach each provider's native response to the result
    pub include_raw_response: bool,
}

impl ModerationRequest {
    /// A text request in combined mode.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Text,
            mode: ModerationMode::Combined,
            include_raw_response: false,
        }
    }

    pub fn with_mode(mut self, mode: ModerationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_raw_response(mut self, include: bool) -> Self {
        self.include_raw_response = include;
        self
    }
}

/// The final verdict for one request. Owns copies of everything it reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationResult {
    pub moderation_id: Uuid,
    pub flagged: bool,
    pub category_scores: CategoryScores,
    /// Categories some contributing provider scored above its threshold
    pub flagged_categories: BTreeSet<Category>,
    pub mode_used: ModerationMode,
    pub content_type: ContentType,
    pub contributing_providers: BTreeSet<ProviderId>,
    pub failed_providers: BTreeSet<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_responses: Option<BTreeMap<ProviderId, Value>>,
    pub moderated_at: DateTime<Utc>,
}

impl ModerationResult {
    /// True when some selected provider failed but the verdict still stands.
    pub fn is_partial(&self) -> bool {
        !self.failed_providers.is_empty()
    }
}

/// Merged verdict across providers, before request bookkeeping is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub flagged: bool,
    pub category_scores: CategoryScores,
    pub flagged_categories: BTreeSet<Category>,
}

/// Merge canonical results: flagged is OR, each category takes the max.
///
/// Max rather than an average: one confident detector shouldn't be diluted
/// by the others' silence. Failed results are ignored.
pub fn combine<'a, I>(results: I) -> Aggregate
where
    I: IntoIterator<Item = &'a CanonicalResult>,
{
    let mut aggregate = Aggregate {
        flagged: false,
        category_scores: CategoryScores::default(),
        flagged_categories: BTreeSet::new(),
    };

    for result in results.into_iter().filter(|r| r.is_success()) {
        aggregate.flagged |= result.flagged;
        aggregate.category_scores.merge_max(&result.category_scores);
        aggregate
            .flagged_categories
            .extend(result.flagged_categories.iter().copied());
    }

    aggregate
}

/// A constructed adapter plus the threshold its scores are judged against
/// and the pacing its calls wait on.
struct ProviderSlot {
    classifier: Arc<dyn Classifier>,
    threshold: f64,
    pacing: Option<RateLimiter>,
}

/// Combines provider verdicts into one. Immutable once built; share it by
/// reference (or Arc) across as many concurrent requests as needed.
pub struct ModerationEngine {
    providers: BTreeMap<ProviderId, ProviderSlot>,
    unavailable: BTreeMap<ProviderId, ConfigError>,
    combined: Vec<ProviderId>,
    provider_timeout: Duration,
    retry: RetryPolicy,
    concurrency: usize,
}

impl ModerationEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Construct every provider the configuration allows.
    ///
    /// Providers without credentials (or model files) are recorded as
    /// unavailable rather than failing the whole engine, so combined mode
    /// still works with whatever is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder()
            .provider_timeout(config.provider_timeout)
            .retry_policy(RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            })
            .concurrency(config.concurrency);

        if let Some(list) = &config.combined_providers {
            builder = builder.combined_providers(list.clone());
        }

        for provider in ProviderId::ALL {
            if let Err(reason) = config.require_provider(provider) {
                builder = builder.unavailable(reason);
                continue;
            }

            let threshold = config.threshold(provider);
            let classifier: Arc<dyn Classifier> = match provider {
                ProviderId::OpenAi => {
                    let cfg = &config.openai;
                    builder = builder
                        .rate_limit(provider, cfg.requests_per_second.and_then(RateLimiter::per_second));
                    Arc::new(OpenAiModerator::new(
                        cfg.api_key.as_deref().unwrap_or_default(),
                        &cfg.base_url,
                        &cfg.model,
                    )?)
                }
                ProviderId::Anthropic => {
                    let cfg = &config.anthropic;
                    builder = builder
                        .rate_limit(provider, cfg.requests_per_second.and_then(RateLimiter::per_second));
                    Arc::new(AnthropicClassifier::new(
                        cfg.api_key.as_deref().unwrap_or_default(),
                        &cfg.base_url,
                        &cfg.model,
                    )?)
                }
                // The model files exist (checked above); the session itself is
                // built on the first call that needs it.
                ProviderId::Detoxify => {
                    Arc::new(DetoxifyClassifier::new(config.detoxify.model_dir.clone()))
                }
            };

            builder = builder.classifier(classifier, threshold);
        }

        let engine = builder.build();
        info!(
            configured = ?engine.configured_providers(),
            combined = ?engine.combined,
            "Moderation engine ready"
        );
        Ok(engine)
    }

    /// Providers with a registered adapter.
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    /// Why a provider can't be used, if it can't.
    pub fn unavailable_reason(&self, provider: ProviderId) -> Option<&ConfigError> {
        self.unavailable.get(&provider)
    }

    /// Providers a combined-mode request will call.
    pub fn combined_providers(&self) -> &[ProviderId] {
        &self.combined
    }

    /// Maximum batch items in flight at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Moderate a single request.
    pub async fn moderate(
        &self,
        request: &ModerationRequest,
    ) -> std::result::Result<ModerationResult, ModerationError> {
        if request.content_type != ContentType::Text {
            return Err(ConfigError::UnsupportedContentType(request.content_type).into());
        }

        let selected = self.resolve(request.mode)?;

        let outcomes = join_all(selected.iter().map(|&provider| async move {
            (provider, self.invoke(provider, &request.content).await)
        }))
        .await;

        // One canonical entry per selected provider; a failure is carried as
        // an entry with its error set and zeroed scores.
        let canonical: Vec<CanonicalResult> = outcomes
            .into_iter()
            .map(|(provider, outcome)| match outcome {
                Ok(raw) => {
                    let threshold = self.providers[&provider].threshold;
                    let result = normalize(provider, &raw, threshold);
                    debug!(
                        %provider,
                        flagged = result.flagged,
                        top = ?result.category_scores.highest(),
                        "Provider verdict"
                    );
                    result
                }
                Err(err) => {
                    warn!(%provider, error = %err, "Provider failed, continuing without it");
                    CanonicalResult::failed(provider, err)
                }
            })
            .collect();

        if !canonical.iter().any(|r| r.is_success()) {
            let failures = canonical
                .into_iter()
                .filter_map(|r| r.error.map(|err| (r.source_provider, err)))
                .collect();
            return Err(ModerationError::AllProvidersUnavailable { failures });
        }

        let aggregate = combine(&canonical);

        let raw_responses = request.include_raw_response.then(|| {
            canonical
                .iter()
                .filter(|r| r.is_success())
                .filter_map(|r| r.raw_payload.clone().map(|p| (r.source_provider, p)))
                .collect()
        });

        let result = ModerationResult {
            moderation_id: Uuid::new_v4(),
            flagged: aggregate.flagged,
            category_scores: aggregate.category_scores,
            flagged_categories: aggregate.flagged_categories,
            mode_used: request.mode,
            content_type: request.content_type,
            contributing_providers: canonical
                .iter()
                .filter(|r| r.is_success())
                .map(|r| r.source_provider)
                .collect(),
            failed_providers: canonical
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| r.source_provider)
                .collect(),
            raw_responses,
            moderated_at: Utc::now(),
        };

        info!(
            id = %result.moderation_id,
            mode = %result.mode_used,
            flagged = result.flagged,
            contributing = result.contributing_providers.len(),
            failed = result.failed_providers.len(),
            "Moderated content"
        );

        Ok(result)
    }

    /// Map a mode onto the providers to call. Fails before any network
    /// activity if the mode can't be served.
    fn resolve(&self, mode: ModerationMode) -> std::result::Result<Vec<ProviderId>, ConfigError> {
        match mode {
            ModerationMode::Single(provider) if self.providers.contains_key(&provider) => {
                Ok(vec![provider])
            }
            ModerationMode::Single(provider) => Err(self
                .unavailable
                .get(&provider)
                .cloned()
                .unwrap_or_else(|| ConfigError::ProviderUnavailable {
                    provider,
                    reason: "not configured".to_string(),
                })),
            ModerationMode::Combined if self.combined.is_empty() => {
                Err(ConfigError::NoProvidersConfigured)
            }
            ModerationMode::Combined => Ok(self.combined.clone()),
        }
    }

    /// One provider call with timeout per attempt and retries on transient
    /// failures. A timeout is reported like any other provider error.
    ///
    /// Pacing happens before the timeout starts: time spent queued behind
    /// other requests to the same provider is not charged to the attempt.
    async fn invoke(
        &self,
        provider: ProviderId,
        text: &str,
    ) -> std::result::Result<RawProviderResult, ProviderError> {
        let slot = &self.providers[&provider];
        let timeout = self.provider_timeout;

        with_retry(&self.retry, provider, || async {
            if let Some(pacing) = &slot.pacing {
                pacing.acquire().await;
            }
            match tokio::time::timeout(timeout, slot.classifier.classify(text)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            }
        })
        .await
    }
}

/// Assembles a `ModerationEngine`. `from_config` is the usual entry point;
/// the builder exists so tests and embedders can supply their own adapters.
pub struct EngineBuilder {
    providers: BTreeMap<ProviderId, ProviderSlot>,
    unavailable: BTreeMap<ProviderId, ConfigError>,
    pacing: BTreeMap<ProviderId, RateLimiter>,
    combined: Option<Vec<ProviderId>>,
    provider_timeout: Duration,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        let defaults = Config::default();
        Self {
            providers: BTreeMap::new(),
            unavailable: BTreeMap::new(),
            pacing: BTreeMap::new(),
            combined: None,
            provider_timeout: defaults.provider_timeout,
            retry: RetryPolicy {
                max_retries: defaults.max_retries,
                ..RetryPolicy::default()
            },
            concurrency: defaults.concurrency,
        }
    }
}

impl EngineBuilder {
    /// Register an adapter under the provider it reports. A second adapter
    /// for the same provider replaces the first.
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>, threshold: f64) -> Self {
        let provider = classifier.provider();
        self.unavailable.remove(&provider);
        self.providers.insert(
            provider,
            ProviderSlot {
                classifier,
                threshold,
                pacing: None,
            },
        );
        self
    }

    /// Pace calls to `provider`. Each attempt waits for its slot before its
    /// timeout starts. `None` removes any pacing.
    pub fn rate_limit(mut self, provider: ProviderId, limiter: Option<RateLimiter>) -> Self {
        match limiter {
            Some(limiter) => {
                self.pacing.insert(provider, limiter);
            }
            None => {
                self.pacing.remove(&provider);
            }
        }
        self
    }

    /// Record why a provider can't be constructed; single-mode requests for
    /// it fail with this error.
    pub fn unavailable(mut self, reason: ConfigError) -> Self {
        let provider = match &reason {
            ConfigError::MissingCredential { provider, .. }
            | ConfigError::ProviderUnavailable { provider, .. } => *provider,
            _ => return self,
        };
        if !self.providers.contains_key(&provider) {
            self.unavailable.insert(provider, reason);
        }
        self
    }

    /// Restrict combined mode to these providers (default: all configured).
    pub fn combined_providers(mut self, providers: Vec<ProviderId>) -> Self {
        self.combined = Some(providers);
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn build(mut self) -> ModerationEngine {
        for (provider, slot) in self.providers.iter_mut() {
            slot.pacing = self.pacing.remove(provider);
        }

        let combined = match self.combined {
            Some(requested) => {
                let mut seen = BTreeSet::new();
                requested
                    .into_iter()
                    .filter(|p| seen.insert(*p))
                    .filter(|p| {
                        let configured = self.providers.contains_key(p);
                        if !configured {
                            warn!(provider = %p, "Combined provider is not configured, skipping");
                        }
                        configured
                    })
                    .collect()
            }
            None => self.providers.keys().copied().collect(),
        };

        ModerationEngine {
            providers: self.providers,
            unavailable: self.unavailable,
            combined,
            provider_timeout: self.provider_timeout,
            retry: self.retry,
            concurrency: self.concurrency,
        }
    }
}
