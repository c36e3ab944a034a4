// Scripted classifiers for driving the engine without a network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sieve::providers::{Classifier, RawProviderResult, RawSignal};
use sieve::{ProviderError, ProviderId};

type Respond = dyn Fn(&str, usize) -> Result<RawProviderResult, ProviderError> + Send + Sync;
type Delay = dyn Fn(&str) -> Duration + Send + Sync;

/// A classifier whose answers come from a closure. Counts calls and tracks
/// how many were in flight at once.
pub struct StubClassifier {
    provider: ProviderId,
    respond: Box<Respond>,
    delay: Box<Delay>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubClassifier {
    pub fn new<F>(provider: ProviderId, respond: F) -> Self
    where
        F: Fn(&str, usize) -> Result<RawProviderResult, ProviderError> + Send + Sync + 'static,
    {
        Self {
            provider,
            respond: Box::new(respond),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always answers with these probabilities.
    pub fn scores(provider: ProviderId, scores: &[(&str, f64)]) -> Self {
        let scores: Vec<(String, f64)> = scores.iter().map(|(l, s)| (l.to_string(), *s)).collect();
        Self::new(provider, move |_, _| Ok(raw(&scores)))
    }

    /// Always fails with this error.
    pub fn failing(provider: ProviderId, error: ProviderError) -> Self {
        Self::new(provider, move |_, _| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Box::new(move |_| delay);
        self
    }

    pub fn with_delay_fn<F>(mut self, delay: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.delay = Box::new(delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn classify(&self, text: &str) -> Result<RawProviderResult, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = (self.delay)(text);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(text, call)
    }
}

/// Raw result carrying one probability signal per pair.
pub fn raw(scores: &[(String, f64)]) -> RawProviderResult {
    RawProviderResult {
        signals: scores
            .iter()
            .map(|(label, score)| RawSignal::probability(label.as_str(), *score))
            .collect(),
        payload: json!({ "scores": scores }),
    }
}

pub fn as_classifier(stub: &Arc<StubClassifier>) -> Arc<dyn Classifier> {
    stub.clone()
}
