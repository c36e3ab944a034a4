// Batch coordinator: moderate an ordered list of texts.
//
// Items run concurrently up to the engine's fan-out limit, so a batch never
// opens more simultaneous provider calls than that. Output position i always
// holds the verdict for input position i; a failed item is recorded in
// place and the rest of the batch carries on.

use futures::stream::{self, Stream, StreamExt};

use crate::engine::{ModerationEngine, ModerationRequest, ModerationResult};
use crate::error::ItemFailure;
use crate::taxonomy::ModerationMode;

pub type ItemResult = Result<ModerationResult, ItemFailure>;

/// Stream item verdicts in input order as they become available.
///
/// `buffered` (not `buffer_unordered`) keeps the order: a slow item holds
/// back later ones but never swaps places with them.
pub fn moderate_stream<'a>(
    engine: &'a ModerationEngine,
    requests: Vec<ModerationRequest>,
    concurrency: usize,
) -> impl Stream<Item = ItemResult> + 'a {
    stream::iter(requests.into_iter().enumerate().map(move |(index, request)| async move {
        engine
            .moderate(&request)
            .await
            .map_err(|error| ItemFailure { index, error })
    }))
    .buffered(concurrency.max(1))
}

/// Moderate every text with the same mode. The output has the same length
/// and order as the input.
pub async fn moderate_batch<I, S>(
    engine: &ModerationEngine,
    contents: I,
    mode: ModerationMode,
) -> Vec<ItemResult>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let requests: Vec<ModerationRequest> = contents
        .into_iter()
        .map(|content| ModerationRequest::text(content).with_mode(mode))
        .collect();

    moderate_stream(engine, requests, engine.concurrency())
        .collect()
        .await
}

/// Tally of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub flagged: usize,
    pub clean: usize,
    pub failed: usize,
    /// Succeeded with at least one provider missing
    pub partial: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ItemResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result {
                Ok(verdict) => {
                    if verdict.flagged {
                        summary.flagged += 1;
                    } else {
                        summary.clean += 1;
                    }
                    if verdict.is_partial() {
                        summary.partial += 1;
                    }
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}
