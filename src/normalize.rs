// Normalization: translate raw provider signals into canonical results.
//
// Each provider has an explicit label table. A label either maps to one
// canonical category, is a known label we deliberately don't carry (e.g.
// Detoxify's catch-all "toxicity"), or is unknown. The last two are dropped;
// unknown labels also log a warning, since they usually mean the provider
// changed its vocabulary. Nothing is ever guessed into a category.
//
// Normalization is pure: same provider + raw result + threshold always gives
// the same canonical result.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::providers::traits::{RawProviderResult, RawScore};
use crate::taxonomy::{Category, CategoryScores, ProviderId};

/// How a native label translates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMapping {
    /// Maps into this canonical category
    Category(Category),
    /// Known label with no canonical counterpart; dropped quietly
    Unmapped,
}

use Category::*;
use LabelMapping::{Category as To, Unmapped};

/// OpenAI moderation categories. Sub-labels fold into their parent.
const OPENAI_LABELS: &[(&str, LabelMapping)] = &[
    ("hate", To(Hate)),
    ("hate/threatening", To(Hate)),
    ("harassment", To(Harassment)),
    ("harassment/threatening", To(Harassment)),
    ("self-harm", To(SelfHarm)),
    ("self-harm/intent", To(SelfHarm)),
    ("self-harm/instructions", To(SelfHarm)),
    ("sexual", To(Sexual)),
    ("sexual/minors", To(Sexual)),
    ("violence", To(Violence)),
    ("violence/graphic", To(Violence)),
    ("illicit", Unmapped),
    ("illicit/violent", Unmapped),
];

/// Labels the classification prompt asks the model to use.
const ANTHROPIC_LABELS: &[(&str, LabelMapping)] = &[
    ("hate", To(Hate)),
    ("harassment", To(Harassment)),
    ("self_harm", To(SelfHarm)),
    ("self-harm", To(SelfHarm)),
    ("sexual", To(Sexual)),
    ("violence", To(Violence)),
    ("violent", To(Violence)),
    ("profanity", To(Profanity)),
    ("profane", To(Profanity)),
];

/// unbiased-toxic-roberta outputs.
const DETOXIFY_LABELS: &[(&str, LabelMapping)] = &[
    ("identity_attack", To(Hate)),
    ("insult", To(Harassment)),
    ("obscene", To(Profanity)),
    ("threat", To(Violence)),
    ("sexual_explicit", To(Sexual)),
    ("toxicity", Unmapped),
    ("severe_toxicity", Unmapped),
];

/// The label table for a provider.
pub fn label_table(provider: ProviderId) -> &'static [(&'static str, LabelMapping)] {
    match provider {
        ProviderId::OpenAi => OPENAI_LABELS,
        ProviderId::Anthropic => ANTHROPIC_LABELS,
        ProviderId::Detoxify => DETOXIFY_LABELS,
    }
}

/// Look up a native label (case-insensitive). None means the label is not
/// in the provider's table at all.
pub fn map_label(provider: ProviderId, label: &str) -> Option<LabelMapping> {
    let label = label.trim();
    label_table(provider)
        .iter()
        .find(|(native, _)| native.eq_ignore_ascii_case(label))
        .map(|(_, mapping)| *mapping)
}

/// Convert a raw score into [0, 1]. Non-finite probabilities are rejected.
pub fn score_value(score: RawScore) -> Option<f64> {
    match score {
        RawScore::Probability(p) if p.is_finite() => Some(p.clamp(0.0, 1.0)),
        RawScore::Probability(_) => None,
        RawScore::Flag(true) => Some(1.0),
        RawScore::Flag(false) => Some(0.0),
    }
}

/// One provider's verdict in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResult {
    pub source_provider: ProviderId,
    /// True iff some category scored strictly above the provider's threshold
    pub flagged: bool,
    pub category_scores: CategoryScores,
    pub flagged_categories: BTreeSet<Category>,
    /// Set when this provider's call failed; scores are then all zero
    pub error: Option<ProviderError>,
    pub raw_payload: Option<Value>,
}

impl CanonicalResult {
    /// Placeholder for a provider whose call failed.
    pub fn failed(provider: ProviderId, error: ProviderError) -> Self {
        Self {
            source_provider: provider,
            flagged: false,
            category_scores: CategoryScores::default(),
            flagged_categories: BTreeSet::new(),
            error: Some(error),
            raw_payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Map a provider's raw result into the canonical taxonomy.
///
/// Several native labels landing in one category combine by max, so
/// "harassment" 0.2 and "harassment/threatening" 0.6 give Harassment 0.6.
pub fn normalize(provider: ProviderId, raw: &RawProviderResult, threshold: f64) -> CanonicalResult {
    let mut scores = CategoryScores::default();

    for signal in &raw.signals {
        let category = match map_label(provider, &signal.label) {
            Some(LabelMapping::Category(category)) => category,
            Some(LabelMapping::Unmapped) => {
                debug!(%provider, label = %signal.label, "Dropping label with no canonical category");
                continue;
            }
            None => {
                warn!(%provider, label = %signal.label, "Dropping unrecognized provider label");
                continue;
            }
        };

        match score_value(signal.score) {
            Some(value) => scores.raise(category, value),
            None => {
                warn!(%provider, label = %signal.label, "Dropping non-finite score");
            }
        }
    }

    let flagged_categories: BTreeSet<Category> = scores
        .iter()
        .filter(|(_, score)| *score > threshold)
        .map(|(category, _)| category)
        .collect();

    CanonicalResult {
        source_provider: provider,
        flagged: !flagged_categories.is_empty(),
        category_scores: scores,
        flagged_categories,
        error: None,
        raw_payload: Some(raw.payload.clone()),
    }
}
