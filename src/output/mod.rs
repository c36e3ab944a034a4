// Output formatting: terminal display and JSON.

pub mod terminal;

use anyhow::Result;
use serde_json::{json, Value};

use crate::batch::ItemResult;
use crate::engine::ModerationResult;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Unlike byte slicing (`&text[..120]`), this respects UTF-8 character boundaries
/// and will never panic on multi-byte characters like emoji or accented letters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// One verdict as pretty JSON.
pub fn result_json(result: &ModerationResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// One batch line as a JSON object: the verdict, or `{index, error, failed_providers}`.
pub fn item_json(index: usize, item: &ItemResult) -> Result<Value> {
    Ok(match item {
        Ok(result) => json!({ "index": index, "result": serde_json::to_value(result)? }),
        Err(failure) => json!({
            "index": failure.index,
            "error": failure.error.to_string(),
            "failed_providers": failure.error.failed_providers(),
        }),
    })
}
