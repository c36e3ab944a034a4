// Canonical taxonomy: the vocabulary every provider verdict is mapped into.
//
// Providers disagree on label names and score semantics. Everything that
// leaves an adapter is translated into these types first, so the combination
// logic never has to know which backend said what.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Canonical moderation category. Closed set: provider labels that don't
/// map into one of these are dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Hate,
    Harassment,
    SelfHarm,
    Sexual,
    Violence,
    Profanity,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Hate,
        Category::Harassment,
        Category::SelfHarm,
        Category::Sexual,
        Category::Violence,
        Category::Profanity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hate => "hate",
            Category::Harassment => "harassment",
            Category::SelfHarm => "self_harm",
            Category::Sexual => "sexual",
            Category::Violence => "violence",
            Category::Profanity => "profanity",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a classification source. The adapter set is closed: adding
/// a provider means adding a variant here and a label table in `normalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Hosted moderation endpoint (OpenAI `/v1/moderations`)
    #[serde(rename = "openai")]
    OpenAi,
    /// General-purpose LLM prompted to return a JSON verdict (Anthropic)
    Anthropic,
    /// Local unbiased-toxic-roberta ONNX model (Detoxify labels)
    Detoxify,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Detoxify];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Detoxify => "detoxify",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            "detoxify" => Ok(ProviderId::Detoxify),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Which provider set a request should be moderated with. Serializes as
/// its string name ("openai", "combined", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ModerationMode {
    /// Exactly one provider
    Single(ProviderId),
    /// Every configured provider, verdicts merged
    Combined,
}

impl fmt::Display for ModerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModerationMode::Single(provider) => write!(f, "{provider}"),
            ModerationMode::Combined => f.write_str("combined"),
        }
    }
}

impl FromStr for ModerationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "combined" {
            return Ok(ModerationMode::Combined);
        }
        normalized
            .parse::<ProviderId>()
            .map(ModerationMode::Single)
            .map_err(|_| ConfigError::UnknownMode(s.to_string()))
    }
}

impl From<ModerationMode> for String {
    fn from(mode: ModerationMode) -> Self {
        mode.to_string()
    }
}

impl TryFrom<String> for ModerationMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind of content submitted. Only text is moderated; the other variants
/// exist so callers can express them and get a clear refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::Video => "video",
        };
        f.write_str(s)
    }
}

/// Per-category scores in [0, 1]. Always holds every category; a category
/// a provider said nothing about scores 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores(BTreeMap<Category, f64>);

impl Default for CategoryScores {
    fn default() -> Self {
        Self(Category::ALL.iter().map(|&c| (c, 0.0)).collect())
    }
}

impl CategoryScores {
    pub fn get(&self, category: Category) -> f64 {
        self.0.get(&category).copied().unwrap_or(0.0)
    }

    /// Raise the score for `category` to `score` if it is higher. Scores are
    /// clamped into [0, 1].
    pub fn raise(&mut self, category: Category, score: f64) {
        let score = score.clamp(0.0, 1.0);
        let entry = self.0.entry(category).or_insert(0.0);
        if score > *entry {
            *entry = score;
        }
    }

    /// Per-category max with another score set.
    pub fn merge_max(&mut self, other: &CategoryScores) {
        for (category, score) in other.iter() {
            self.raise(category, score);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        self.0.iter().map(|(&c, &s)| (c, s))
    }

    /// The highest-scoring category, if any category scored above zero.
    pub fn highest(&self) -> Option<(Category, f64)> {
        self.iter()
            .filter(|(_, s)| *s > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
