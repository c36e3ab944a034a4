// Error taxonomy for the moderation engine.
//
// Provider errors are contained by the engine as long as another provider
// answered. Configuration errors fail fast before any provider is called.
// Total outage surfaces as AllProvidersUnavailable, never as a clean verdict.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::taxonomy::{ContentType, ProviderId};

/// Coarse kind of a provider failure, for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    AuthenticationFailure,
    NetworkFailure,
    Timeout,
    MalformedResponse,
    RateLimited,
    InferenceFailure,
}

/// Failure of a single classification call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Local model failed to tokenize or run
    #[error("inference failed: {0}")]
    InferenceFailure(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::AuthenticationFailure(_) => ProviderErrorKind::AuthenticationFailure,
            ProviderError::NetworkFailure(_) => ProviderErrorKind::NetworkFailure,
            ProviderError::Timeout(_) => ProviderErrorKind::Timeout,
            ProviderError::MalformedResponse(_) => ProviderErrorKind::MalformedResponse,
            ProviderError::RateLimited(_) => ProviderErrorKind::RateLimited,
            ProviderError::InferenceFailure(_) => ProviderErrorKind::InferenceFailure,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::NetworkFailure(_)
        )
    }

    /// Classify a transport-level reqwest error.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::NetworkFailure(err.to_string())
        }
    }

    /// Classify a non-success HTTP status.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", body.trim());
        match status.as_u16() {
            401 | 403 => ProviderError::AuthenticationFailure(detail),
            429 => ProviderError::RateLimited(detail),
            _ => ProviderError::NetworkFailure(detail),
        }
    }
}

/// Misconfiguration detected before any provider is invoked. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{variable} not set; the {provider} provider cannot be used")]
    MissingCredential {
        provider: ProviderId,
        variable: &'static str,
    },
    #[error("the {provider} provider is unavailable: {reason}")]
    ProviderUnavailable { provider: ProviderId, reason: String },
    #[error("content type '{0}' is not supported; only text can be moderated")]
    UnsupportedContentType(ContentType),
    #[error("unknown moderation mode '{0}' (expected openai, anthropic, detoxify or combined)")]
    UnknownMode(String),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("no moderation providers are configured")]
    NoProvidersConfigured,
}

/// Failure of a whole moderation request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("all providers unavailable: {}", describe_failures(.failures))]
    AllProvidersUnavailable {
        failures: BTreeMap<ProviderId, ProviderError>,
    },
}

impl ModerationError {
    /// Providers that were invoked and failed. Empty for configuration errors.
    pub fn failed_providers(&self) -> BTreeSet<ProviderId> {
        match self {
            ModerationError::AllProvidersUnavailable { failures } => {
                failures.keys().copied().collect()
            }
            ModerationError::Configuration(_) => BTreeSet::new(),
        }
    }
}

fn describe_failures(failures: &BTreeMap<ProviderId, ProviderError>) -> String {
    failures
        .iter()
        .map(|(provider, err)| format!("{provider}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A batch position whose moderation failed. The rest of the batch is
/// unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("item {index}: {error}")]
pub struct ItemFailure {
    pub index: usize,
    pub error: ModerationError,
}
