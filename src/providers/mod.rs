// Provider adapters: one per classification source, behind a shared trait.
//
// The engine only ever sees `dyn Classifier`. OpenAiModerator calls the
// hosted moderation endpoint, AnthropicClassifier prompts a general-purpose
// model for a JSON verdict, and DetoxifyClassifier runs a local ONNX model.

pub mod anthropic;
pub mod detoxify;
pub mod download;
pub mod openai;
pub mod rate_limiter;
pub mod traits;

pub use traits::{Classifier, RawProviderResult, RawScore, RawSignal};
