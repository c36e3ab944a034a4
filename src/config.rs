use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::ConfigError;
use crate::providers::download;
use crate::taxonomy::ProviderId;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "omni-moderation-latest";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";

/// Score above which a provider's category counts as flagged.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Settings for a provider reached over HTTP with an API key.
#[derive(Debug, Clone, PartialEq)]
pub struct HostedProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub threshold: f64,
    /// Optional request pacing; None means unthrottled
    pub requests_per_second: Option<f64>,
}

/// Settings for the local ONNX toxicity model.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalModelConfig {
    /// Directory containing the ONNX model files
    pub model_dir: PathBuf,
    pub threshold: f64,
}

/// Central configuration, read once from the environment and then passed
/// by reference into engine construction. Nothing else reads env vars.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub openai: HostedProviderConfig,
    pub anthropic: HostedProviderConfig,
    pub detoxify: LocalModelConfig,
    /// Providers used in combined mode (None = every configured provider)
    pub combined_providers: Option<Vec<ProviderId>>,
    /// Deadline for each individual provider call
    pub provider_timeout: Duration,
    /// Retries for rate-limited or network-failed calls
    pub max_retries: u32,
    /// Maximum batch items in flight at once
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai: HostedProviderConfig {
                api_key: None,
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
                model: DEFAULT_OPENAI_MODEL.to_string(),
                threshold: DEFAULT_THRESHOLD,
                requests_per_second: None,
            },
            anthropic: HostedProviderConfig {
                api_key: None,
                base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
                model: DEFAULT_ANTHROPIC_MODEL.to_string(),
                threshold: DEFAULT_THRESHOLD,
                requests_per_second: None,
            },
            detoxify: LocalModelConfig {
                model_dir: download::default_model_dir(),
                threshold: DEFAULT_THRESHOLD,
            },
            combined_providers: None,
            provider_timeout: Duration::from_secs(30),
            max_retries: 2,
            concurrency: 8,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unset keys fall
    /// back to defaults; set-but-malformed keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let openai = HostedProviderConfig {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai.base_url),
            model: get("OPENAI_MODERATION_MODEL").unwrap_or(defaults.openai.model),
            threshold: parse_threshold(&get, "SIEVE_OPENAI_THRESHOLD")?,
            requests_per_second: parse_opt(&get, "SIEVE_OPENAI_RPS")?,
        };

        let anthropic = HostedProviderConfig {
            api_key: get("ANTHROPIC_API_KEY"),
            base_url: get("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic.base_url),
            model: get("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic.model),
            threshold: parse_threshold(&get, "SIEVE_ANTHROPIC_THRESHOLD")?,
            requests_per_second: parse_opt(&get, "SIEVE_ANTHROPIC_RPS")?,
        };

        let detoxify = LocalModelConfig {
            model_dir: get("SIEVE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.detoxify.model_dir),
            threshold: parse_threshold(&get, "SIEVE_DETOXIFY_THRESHOLD")?,
        };

        let combined_providers = match get("SIEVE_COMBINED_PROVIDERS") {
            Some(list) => Some(
                list.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(ProviderId::from_str)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context("Invalid SIEVE_COMBINED_PROVIDERS")?,
            ),
            None => None,
        };

        let provider_timeout = parse_opt::<u64>(&get, "SIEVE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.provider_timeout);
        let max_retries = parse_opt(&get, "SIEVE_MAX_RETRIES")?.unwrap_or(defaults.max_retries);
        let concurrency = parse_opt::<usize>(&get, "SIEVE_CONCURRENCY")?
            .unwrap_or(defaults.concurrency)
            .max(1);

        Ok(Self {
            openai,
            anthropic,
            detoxify,
            combined_providers,
            provider_timeout,
            max_retries,
            concurrency,
        })
    }

    /// Flag threshold configured for a provider.
    pub fn threshold(&self, provider: ProviderId) -> f64 {
        match provider {
            ProviderId::OpenAi => self.openai.threshold,
            ProviderId::Anthropic => self.anthropic.threshold,
            ProviderId::Detoxify => self.detoxify.threshold,
        }
    }

    /// Check that a provider has what it needs to be constructed.
    /// Hosted providers need an API key; the local model needs its files.
    pub fn require_provider(&self, provider: ProviderId) -> std::result::Result<(), ConfigError> {
        match provider {
            ProviderId::OpenAi if self.openai.api_key.is_none() => {
                Err(ConfigError::MissingCredential {
                    provider,
                    variable: "OPENAI_API_KEY",
                })
            }
            ProviderId::Anthropic if self.anthropic.api_key.is_none() => {
                Err(ConfigError::MissingCredential {
                    provider,
                    variable: "ANTHROPIC_API_KEY",
                })
            }
            ProviderId::Detoxify if !download::model_files_present(&self.detoxify.model_dir) => {
                Err(ConfigError::ProviderUnavailable {
                    provider,
                    reason: format!(
                        "model files not found in {} (run `sieve download-model`)",
                        self.detoxify.model_dir.display()
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {key}={raw:?}: {e}")),
        None => Ok(None),
    }
}

fn parse_threshold(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<f64> {
    let threshold = parse_opt::<f64>(get, key)?.unwrap_or(DEFAULT_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        anyhow::bail!("Invalid {key}={threshold}: thresholds must be within [0, 1]");
    }
    Ok(threshold)
}
