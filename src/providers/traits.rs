// Classifier trait: the one capability every provider adapter offers.
//
// Adapters return the provider's native labels untouched. Mapping into the
// canonical taxonomy happens afterwards in `normalize`, so an adapter only
// has to know its own wire format.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::taxonomy::ProviderId;

/// A single native score as the provider reported it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawScore {
    /// Continuous probability, expected in [0, 1]
    Probability(f64),
    /// Discrete yes/no signal
    Flag(bool),
}

/// One labelled signal from a provider, e.g. `("hate/threatening", 0.02)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    pub label: String,
    pub score: RawScore,
}

impl RawSignal {
    pub fn probability(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            score: RawScore::Probability(value),
        }
    }

    pub fn flag(label: impl Into<String>, value: bool) -> Self {
        Self {
            label: label.into(),
            score: RawScore::Flag(value),
        }
    }
}

/// What one classification call produced, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProviderResult {
    pub signals: Vec<RawSignal>,
    /// The provider's native response, kept for callers that ask for it.
    pub payload: Value,
}

/// Trait for classifying a piece of text. Implementations issue exactly one
/// outbound call (or one local inference) per invocation and never retry;
/// retries and timeouts belong to the engine.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Which provider this adapter speaks for.
    fn provider(&self) -> ProviderId;

    /// Classify a single text.
    async fn classify(&self, text: &str) -> Result<RawProviderResult, ProviderError>;
}
