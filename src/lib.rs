// Sieve: multi-provider content moderation
//
// This is the library root. Each module corresponds to a stage of the
// moderation flow: providers produce raw verdicts, normalize maps them into
// the shared taxonomy, engine combines them, batch runs many in order.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod output;
pub mod providers;
pub mod retry;
pub mod taxonomy;

pub use engine::{ModerationEngine, ModerationRequest, ModerationResult};
pub use error::{ConfigError, ItemFailure, ModerationError, ProviderError};
pub use taxonomy::{Category, CategoryScores, ContentType, ModerationMode, ProviderId};
