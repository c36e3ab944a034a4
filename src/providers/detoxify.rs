// Local toxicity classifier using Detoxify's unbiased-toxic-roberta model.
//
// Runs entirely on the local CPU: no API key, no rate limits, no network.
// The model emits 7 logits; a sigmoid turns each into an independent 0-1
// probability. Labels are reported in Detoxify's own vocabulary and mapped
// to the canonical taxonomy later.
//
// Model: protectai/unbiased-toxic-roberta-onnx (quantized, ~126MB)
//
// The session is built on the first classify call, not at construction, so
// an engine that never routes a request here never pays for the load.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use serde_json::{Map, Value};
use tokenizers::{Tokenizer, TruncationParams};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::download::{MODEL_FILE, TOKENIZER_FILE};
use super::traits::{Classifier, RawProviderResult, RawSignal};
use crate::error::ProviderError;
use crate::output::truncate_chars;
use crate::taxonomy::ProviderId;

/// Labels output by unbiased-toxic-roberta, in the order the model returns them.
pub const LABEL_ORDER: [&str; 7] = [
    "toxicity",
    "severe_toxicity",
    "obscene",
    "identity_attack",
    "insult",
    "threat",
    "sexual_explicit",
];

/// RoBERTa's positional limit.
const MAX_SEQUENCE_LEN: usize = 512;

/// A loaded session and its tokenizer.
#[derive(Clone)]
struct LoadedModel {
    // ort::Session::run takes &mut self. The mutex is the single acquisition
    // point for inference, so concurrent batch items queue here instead of
    // sharing session state. Arc because spawn_blocking needs 'static.
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

/// Local ONNX-based toxicity classifier.
pub struct DetoxifyClassifier {
    model_dir: PathBuf,
    model: OnceCell<LoadedModel>,
}

impl DetoxifyClassifier {
    /// A classifier that loads its model from `model_dir` on first use.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            model: OnceCell::new(),
        }
    }

    /// Load the ONNX model and tokenizer from the given directory now.
    ///
    /// Expects `model_quantized.onnx` and `tokenizer.json` to exist in `model_dir`.
    /// Call `download::download_model()` first if they don't.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model = load_model(model_dir)?;
        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            model: OnceCell::new_with(Some(model)),
        })
    }

    /// Whether the session has been built yet.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// The loaded model, building it on the first call. Concurrent first
    /// callers wait on one load; a failed load is retried by the next call.
    async fn model(&self) -> Result<&LoadedModel, ProviderError> {
        self.model
            .get_or_try_init(|| async {
                let dir = self.model_dir.clone();
                let model = tokio::task::spawn_blocking(move || load_model(&dir))
                    .await
                    .map_err(|e| ProviderError::InferenceFailure(format!("model load task panicked: {e}")))?
                    .map_err(|e| ProviderError::InferenceFailure(format!("{e:#}")))?;
                info!(model_dir = %self.model_dir.display(), "Loaded local toxicity model");
                Ok::<_, ProviderError>(model)
            })
            .await
    }
}

/// Build the session and tokenizer from `model_dir`.
fn load_model(model_dir: &Path) -> Result<LoadedModel> {
    let model_path = model_dir.join(MODEL_FILE);
    let tokenizer_path = model_dir.join(TOKENIZER_FILE);

    if !model_path.exists() {
        anyhow::bail!(
            "Model file not found: {}\nRun `sieve download-model` to download it.",
            model_path.display()
        );
    }
    if !tokenizer_path.exists() {
        anyhow::bail!(
            "Tokenizer file not found: {}\nRun `sieve download-model` to download it.",
            tokenizer_path.display()
        );
    }

    let session = Session::builder()
        .context("Failed to create ONNX session builder")?
        .commit_from_file(&model_path)
        .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))?;

    let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQUENCE_LEN,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Failed to configure tokenizer truncation: {}", e))?;

    debug!("Loaded ONNX toxicity model from {}", model_dir.display());

    Ok(LoadedModel {
        session: Arc::new(Mutex::new(session)),
        tokenizer: Arc::new(tokenizer),
    })
}

#[async_trait]
impl Classifier for DetoxifyClassifier {
    fn provider(&self) -> ProviderId {
        ProviderId::Detoxify
    }

    /// Tokenize, run one forward pass, and apply sigmoid to the logits.
    ///
    /// The CPU-bound work is offloaded to spawn_blocking so it doesn't stall
    /// the async runtime while other providers are in flight.
    async fn classify(&self, text: &str) -> Result<RawProviderResult, ProviderError> {
        let LoadedModel { session, tokenizer } = self.model().await?.clone();
        let owned = text.to_string();

        let logits = tokio::task::spawn_blocking(move || run_inference(&session, &tokenizer, &owned))
            .await
            .map_err(|e| ProviderError::InferenceFailure(format!("inference task panicked: {e}")))??;

        let result = logits_to_result(&logits)?;

        debug!(
            toxicity = ?result.payload.get("toxicity"),
            text_preview = %truncate_chars(text, 50),
            "Detoxify scored text"
        );

        Ok(result)
    }
}

/// Single-text forward pass. Returns the raw logits row.
fn run_inference(
    session: &Mutex<Session>,
    tokenizer: &Tokenizer,
    text: &str,
) -> Result<Vec<f32>, ProviderError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| ProviderError::InferenceFailure(format!("tokenization failed: {e}")))?;

    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();
    let shape = [1_i64, input_ids.len() as i64];

    let input_ids_tensor = Tensor::from_array((shape, input_ids))
        .map_err(|e| ProviderError::InferenceFailure(format!("input_ids tensor: {e}")))?;
    let attention_mask_tensor = Tensor::from_array((shape, attention_mask))
        .map_err(|e| ProviderError::InferenceFailure(format!("attention_mask tensor: {e}")))?;

    let mut session = session
        .lock()
        .map_err(|e| ProviderError::InferenceFailure(format!("session lock poisoned: {e}")))?;

    let outputs = session
        .run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor
        })
        .map_err(|e| ProviderError::InferenceFailure(format!("ONNX inference failed: {e}")))?;

    // Output shape: [1, 7] of pre-sigmoid logits
    let (_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ProviderError::InferenceFailure(format!("output tensor: {e}")))?;

    Ok(data.to_vec())
}

/// Sigmoid activation: maps any real number to (0, 1).
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map one row of model logits to labelled probabilities.
pub fn logits_to_result(logits: &[f32]) -> Result<RawProviderResult, ProviderError> {
    if logits.len() != LABEL_ORDER.len() {
        return Err(ProviderError::MalformedResponse(format!(
            "model produced {} outputs, expected {}",
            logits.len(),
            LABEL_ORDER.len()
        )));
    }

    let mut payload = Map::new();
    let mut signals = Vec::with_capacity(LABEL_ORDER.len());
    for (label, &logit) in LABEL_ORDER.iter().zip(logits) {
        let probability = sigmoid(logit as f64);
        payload.insert(label.to_string(), Value::from(probability));
        signals.push(RawSignal::probability(*label, probability));
    }

    Ok(RawProviderResult {
        signals,
        payload: Value::Object(payload),
    })
}
