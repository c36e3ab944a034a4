// Engine tests: mode resolution, combination, and failure containment.
//
// Every provider here is a scripted StubClassifier, so these run without
// network access or model files.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::{as_classifier, StubClassifier};
use sieve::config::Config;
use sieve::normalize::normalize;
use sieve::retry::RetryPolicy;
use sieve::{
    Category, ConfigError, ContentType, ModerationEngine, ModerationError, ModerationMode,
    ModerationRequest, ProviderError, ProviderId,
};

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

// ============================================================
// Combination
// ============================================================

#[tokio::test]
async fn combined_mode_flags_when_any_provider_flags() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.9)]).shared();
    let detoxify = StubClassifier::scores(ProviderId::Detoxify, &[("insult", 0.1)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&detoxify), 0.5)
        .build();

    let result = engine
        .moderate(&ModerationRequest::text("you people are the worst"))
        .await
        .unwrap();

    assert!(result.flagged, "one flagging provider is enough");
    assert_eq!(result.mode_used, ModerationMode::Combined);
    assert_eq!(
        result.contributing_providers,
        BTreeSet::from([ProviderId::OpenAi, ProviderId::Detoxify])
    );
    assert!(result.failed_providers.is_empty());
    assert_eq!(result.category_scores.get(Category::Hate), 0.9);
    assert_eq!(result.category_scores.get(Category::Harassment), 0.1);
    assert_eq!(result.flagged_categories, BTreeSet::from([Category::Hate]));
}

#[tokio::test]
async fn combined_mode_is_clean_when_no_provider_flags() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.1)]).shared();
    let anthropic = StubClassifier::scores(ProviderId::Anthropic, &[("profanity", 0.2)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&anthropic), 0.5)
        .build();

    let result = engine
        .moderate(&ModerationRequest::text("have a nice day"))
        .await
        .unwrap();

    assert!(!result.flagged);
    assert!(result.flagged_categories.is_empty());
    assert_eq!(result.category_scores.get(Category::Profanity), 0.2);
}

#[tokio::test]
async fn combining_identical_providers_matches_a_single_provider() {
    let scores = [("hate", 0.7), ("violence", 0.2), ("sexual", 0.05)];
    let openai = StubClassifier::scores(ProviderId::OpenAi, &scores).shared();
    let anthropic = StubClassifier::scores(ProviderId::Anthropic, &scores).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&anthropic), 0.5)
        .build();

    let combined = engine
        .moderate(&ModerationRequest::text("text"))
        .await
        .unwrap();
    let single = engine
        .moderate(&ModerationRequest::text("text").with_mode(ModerationMode::Single(ProviderId::OpenAi)))
        .await
        .unwrap();

    assert_eq!(combined.category_scores, single.category_scores);
    assert_eq!(combined.flagged, single.flagged);
    assert_eq!(combined.flagged_categories, single.flagged_categories);
}

#[tokio::test]
async fn combine_takes_the_max_per_category() {
    let openai =
        StubClassifier::scores(ProviderId::OpenAi, &[("harassment", 0.3), ("violence", 0.6)]).shared();
    let detoxify =
        StubClassifier::scores(ProviderId::Detoxify, &[("insult", 0.8), ("threat", 0.1)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.9)
        .classifier(as_classifier(&detoxify), 0.9)
        .build();

    let result = engine.moderate(&ModerationRequest::text("x")).await.unwrap();

    assert_eq!(result.category_scores.get(Category::Harassment), 0.8);
    assert_eq!(result.category_scores.get(Category::Violence), 0.6);
    assert!(!result.flagged, "max scores stay below both thresholds");
}

#[tokio::test]
async fn thresholds_apply_per_provider() {
    // Same score, different thresholds: only the stricter provider flags
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.6)]).shared();
    let anthropic = StubClassifier::scores(ProviderId::Anthropic, &[("hate", 0.6)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.8)
        .classifier(as_classifier(&anthropic), 0.5)
        .build();

    let lenient = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::OpenAi)))
        .await
        .unwrap();
    assert!(!lenient.flagged);

    let combined = engine.moderate(&ModerationRequest::text("x")).await.unwrap();
    assert!(combined.flagged);
}

#[tokio::test]
async fn unmapped_labels_do_not_reach_the_verdict() {
    let openai = StubClassifier::scores(
        ProviderId::OpenAi,
        &[("spam/crypto", 0.99), ("illicit", 0.95), ("sexual", 0.3)],
    )
    .shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .build();

    let result = engine.moderate(&ModerationRequest::text("x")).await.unwrap();

    assert!(!result.flagged);
    let nonzero: Vec<_> = result
        .category_scores
        .iter()
        .filter(|(_, s)| *s > 0.0)
        .collect();
    assert_eq!(nonzero, vec![(Category::Sexual, 0.3)]);
}

#[test]
fn combine_ignores_failed_results() {
    let raw = common::raw(&[("hate".to_string(), 0.9)]);
    let ok = normalize(ProviderId::OpenAi, &raw, 0.5);
    let failed = sieve::normalize::CanonicalResult::failed(
        ProviderId::Anthropic,
        ProviderError::Timeout("slow".into()),
    );

    let aggregate = sieve::engine::combine([&ok, &failed]);
    assert!(aggregate.flagged);
    assert_eq!(aggregate.category_scores, ok.category_scores);

    let nothing = sieve::engine::combine([&failed]);
    assert!(!nothing.flagged);
    assert!(nothing.flagged_categories.is_empty());
}

// ============================================================
// Mode resolution
// ============================================================

#[tokio::test]
async fn single_mode_calls_exactly_one_provider() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.2)]).shared();
    let detoxify = StubClassifier::scores(ProviderId::Detoxify, &[("insult", 0.9)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&detoxify), 0.5)
        .build();

    let result = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::OpenAi)))
        .await
        .unwrap();

    assert_eq!(result.contributing_providers, BTreeSet::from([ProviderId::OpenAi]));
    assert!(!result.flagged);
    assert_eq!(openai.calls(), 1);
    assert_eq!(detoxify.calls(), 0);
}

#[tokio::test]
async fn combined_set_can_be_restricted() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.9)]).shared();
    let detoxify = StubClassifier::scores(ProviderId::Detoxify, &[("insult", 0.1)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&detoxify), 0.5)
        .combined_providers(vec![ProviderId::Detoxify, ProviderId::Anthropic])
        .build();

    assert_eq!(engine.combined_providers(), &[ProviderId::Detoxify]);

    let result = engine.moderate(&ModerationRequest::text("x")).await.unwrap();
    assert!(!result.flagged);
    assert_eq!(openai.calls(), 0);
    assert_eq!(detoxify.calls(), 1);
}

// ============================================================
// Configuration errors fail before any provider is called
// ============================================================

#[tokio::test]
async fn missing_credential_fails_before_any_call() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.2)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .unavailable(ConfigError::MissingCredential {
            provider: ProviderId::Anthropic,
            variable: "ANTHROPIC_API_KEY",
        })
        .build();

    let err = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::Anthropic)))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ModerationError::Configuration(ConfigError::MissingCredential {
            provider: ProviderId::Anthropic,
            variable: "ANTHROPIC_API_KEY",
        })
    );
    assert!(err.failed_providers().is_empty());
    assert_eq!(openai.calls(), 0);
}

#[tokio::test]
async fn unknown_single_provider_is_unavailable() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[]).shared();
    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .build();

    let err = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::Detoxify)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModerationError::Configuration(ConfigError::ProviderUnavailable {
            provider: ProviderId::Detoxify,
            ..
        })
    ));
    assert_eq!(openai.calls(), 0);
}

#[tokio::test]
async fn non_text_content_is_rejected() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.2)]).shared();
    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .build();

    for content_type in [ContentType::Image, ContentType::Audio, ContentType::Video] {
        let err = engine
            .moderate(&ModerationRequest::text("x").with_content_type(content_type))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ModerationError::Configuration(ConfigError::UnsupportedContentType(content_type))
        );
    }
    assert_eq!(openai.calls(), 0);
}

#[tokio::test]
async fn combined_mode_without_providers_is_a_configuration_error() {
    let engine = ModerationEngine::builder().build();

    let err = engine
        .moderate(&ModerationRequest::text("x"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ModerationError::Configuration(ConfigError::NoProvidersConfigured)
    );
}

#[tokio::test]
async fn engine_from_empty_config_records_why_providers_are_missing() {
    let config = Config::from_lookup(|key: &str| match key {
        "SIEVE_MODEL_DIR" => Some("/nonexistent/sieve-test-models".to_string()),
        _ => None,
    })
    .unwrap();

    let engine = ModerationEngine::from_config(&config).unwrap();
    assert!(engine.configured_providers().is_empty());
    assert!(matches!(
        engine.unavailable_reason(ProviderId::OpenAi),
        Some(ConfigError::MissingCredential { variable: "OPENAI_API_KEY", .. })
    ));
    assert!(matches!(
        engine.unavailable_reason(ProviderId::Detoxify),
        Some(ConfigError::ProviderUnavailable { .. })
    ));

    let err = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::OpenAi)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModerationError::Configuration(ConfigError::MissingCredential { .. })
    ));
}

#[test]
fn engine_from_config_builds_hosted_providers_with_keys() {
    let config = Config::from_lookup(|key: &str| match key {
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "ANTHROPIC_API_KEY" => Some("sk-ant-test".to_string()),
        "SIEVE_MODEL_DIR" => Some("/nonexistent/sieve-test-models".to_string()),
        "SIEVE_COMBINED_PROVIDERS" => Some("anthropic".to_string()),
        _ => None,
    })
    .unwrap();

    let engine = ModerationEngine::from_config(&config).unwrap();
    assert_eq!(
        engine.configured_providers(),
        vec![ProviderId::OpenAi, ProviderId::Anthropic]
    );
    assert_eq!(engine.combined_providers(), &[ProviderId::Anthropic]);
}

#[tokio::test]
async fn local_model_is_not_loaded_until_it_is_called() {
    // Files that exist but aren't a model: building the engine must not
    // touch them, only a request routed to the local model does.
    let dir = std::env::temp_dir().join(format!("sieve-lazy-model-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("model_quantized.onnx"), b"not a model").unwrap();
    std::fs::write(dir.join("tokenizer.json"), b"{}").unwrap();

    let model_dir = dir.to_string_lossy().to_string();
    let config = Config::from_lookup(move |key: &str| match key {
        "SIEVE_MODEL_DIR" => Some(model_dir.clone()),
        _ => None,
    })
    .unwrap();

    let engine = ModerationEngine::from_config(&config).unwrap();
    assert_eq!(engine.configured_providers(), vec![ProviderId::Detoxify]);
    assert!(engine.unavailable_reason(ProviderId::Detoxify).is_none());

    let err = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::Detoxify)))
        .await
        .unwrap_err();
    match err {
        ModerationError::AllProvidersUnavailable { failures } => {
            assert!(matches!(
                failures[&ProviderId::Detoxify],
                ProviderError::InferenceFailure(_)
            ));
        }
        other => panic!("expected AllProvidersUnavailable, got {other:?}"),
    }

    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================
// Provider failures
// ============================================================

#[tokio::test]
async fn total_outage_is_never_a_clean_verdict() {
    let openai = StubClassifier::failing(
        ProviderId::OpenAi,
        ProviderError::AuthenticationFailure("HTTP 401".into()),
    )
    .shared();
    let anthropic = StubClassifier::failing(
        ProviderId::Anthropic,
        ProviderError::MalformedResponse("no JSON".into()),
    )
    .shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&anthropic), 0.5)
        .retry_policy(RetryPolicy::none())
        .build();

    let err = engine
        .moderate(&ModerationRequest::text("x"))
        .await
        .unwrap_err();

    assert_eq!(
        err.failed_providers(),
        BTreeSet::from([ProviderId::OpenAi, ProviderId::Anthropic])
    );
    match err {
        ModerationError::AllProvidersUnavailable { failures } => {
            assert!(matches!(
                failures[&ProviderId::OpenAi],
                ProviderError::AuthenticationFailure(_)
            ));
            assert!(matches!(
                failures[&ProviderId::Anthropic],
                ProviderError::MalformedResponse(_)
            ));
        }
        other => panic!("expected AllProvidersUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn partial_failure_is_annotated() {
    let openai = StubClassifier::failing(
        ProviderId::OpenAi,
        ProviderError::AuthenticationFailure("HTTP 401".into()),
    )
    .shared();
    let detoxify = StubClassifier::scores(ProviderId::Detoxify, &[("obscene", 0.7)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&detoxify), 0.5)
        .build();

    let result = engine.moderate(&ModerationRequest::text("x")).await.unwrap();

    assert!(result.is_partial());
    assert!(result.flagged);
    assert_eq!(result.contributing_providers, BTreeSet::from([ProviderId::Detoxify]));
    assert_eq!(result.failed_providers, BTreeSet::from([ProviderId::OpenAi]));
    assert_eq!(result.flagged_categories, BTreeSet::from([Category::Profanity]));
}

#[tokio::test]
async fn failed_provider_contributes_nothing_to_the_verdict() {
    let openai = StubClassifier::failing(
        ProviderId::OpenAi,
        ProviderError::MalformedResponse("no JSON".into()),
    )
    .shared();
    let anthropic = StubClassifier::scores(ProviderId::Anthropic, &[("hate", 0.2)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&anthropic), 0.5)
        .build();

    let result = engine
        .moderate(&ModerationRequest::text("x").with_raw_response(true))
        .await
        .unwrap();

    assert!(!result.flagged);
    assert_eq!(result.category_scores.get(Category::Hate), 0.2);
    assert_eq!(result.contributing_providers, BTreeSet::from([ProviderId::Anthropic]));
    assert_eq!(result.failed_providers, BTreeSet::from([ProviderId::OpenAi]));

    let raw = result.raw_responses.as_ref().unwrap();
    assert_eq!(raw.keys().copied().collect::<Vec<_>>(), vec![ProviderId::Anthropic]);
}

#[tokio::test]
async fn slow_provider_times_out_without_cancelling_siblings() {
    let slow = StubClassifier::scores(ProviderId::Anthropic, &[("hate", 0.99)])
        .with_delay(Duration::from_millis(500))
        .shared();
    let fast = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.1)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&slow), 0.5)
        .classifier(as_classifier(&fast), 0.5)
        .provider_timeout(Duration::from_millis(30))
        .retry_policy(RetryPolicy::none())
        .build();

    let result = engine.moderate(&ModerationRequest::text("x")).await.unwrap();

    assert!(!result.flagged, "the slow provider's verdict never arrived");
    assert_eq!(result.contributing_providers, BTreeSet::from([ProviderId::OpenAi]));
    assert_eq!(result.failed_providers, BTreeSet::from([ProviderId::Anthropic]));
}

#[tokio::test]
async fn timeout_is_reported_as_a_provider_error() {
    let slow = StubClassifier::scores(ProviderId::Detoxify, &[])
        .with_delay(Duration::from_millis(500))
        .shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&slow), 0.5)
        .provider_timeout(Duration::from_millis(20))
        .build();

    let err = engine
        .moderate(&ModerationRequest::text("x"))
        .await
        .unwrap_err();

    match err {
        ModerationError::AllProvidersUnavailable { failures } => {
            assert!(matches!(failures[&ProviderId::Detoxify], ProviderError::Timeout(_)));
        }
        other => panic!("expected AllProvidersUnavailable, got {other:?}"),
    }
    // Timeouts are not retried
    assert_eq!(slow.calls(), 1);
}

#[tokio::test]
async fn rate_limited_calls_are_retried() {
    let openai = StubClassifier::new(ProviderId::OpenAi, |_, call| {
        if call == 0 {
            Err(ProviderError::RateLimited("HTTP 429".into()))
        } else {
            Ok(common::raw(&[("violence".to_string(), 0.8)]))
        }
    })
    .shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .retry_policy(fast_retries(2))
        .build();

    let result = engine.moderate(&ModerationRequest::text("x")).await.unwrap();
    assert!(result.flagged);
    assert!(!result.is_partial());
    assert_eq!(openai.calls(), 2);
}

#[tokio::test]
async fn authentication_failures_are_not_retried() {
    let openai = StubClassifier::failing(
        ProviderId::OpenAi,
        ProviderError::AuthenticationFailure("HTTP 401".into()),
    )
    .shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .retry_policy(fast_retries(3))
        .build();

    assert!(engine.moderate(&ModerationRequest::text("x")).await.is_err());
    assert_eq!(openai.calls(), 1);
}

// ============================================================
// Raw responses
// ============================================================

#[tokio::test]
async fn raw_responses_only_when_requested() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("hate", 0.9)]).shared();
    let detoxify = StubClassifier::scores(ProviderId::Detoxify, &[("insult", 0.4)]).shared();

    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .classifier(as_classifier(&detoxify), 0.5)
        .build();

    let without = engine.moderate(&ModerationRequest::text("x")).await.unwrap();
    assert!(without.raw_responses.is_none());

    let with = engine
        .moderate(&ModerationRequest::text("x").with_raw_response(true))
        .await
        .unwrap();
    let raw = with.raw_responses.as_ref().unwrap();
    assert_eq!(raw.len(), 2);
    assert!(raw[&ProviderId::OpenAi]["scores"].is_array());

    // Asking for raw payloads never changes the verdict
    assert_eq!(with.flagged, without.flagged);
    assert_eq!(with.category_scores, without.category_scores);
    assert_eq!(with.flagged_categories, without.flagged_categories);
}

#[tokio::test]
async fn results_serialize_for_callers() {
    let openai = StubClassifier::scores(ProviderId::OpenAi, &[("self-harm", 0.7)]).shared();
    let engine = ModerationEngine::builder()
        .classifier(as_classifier(&openai), 0.5)
        .build();

    let result = engine
        .moderate(&ModerationRequest::text("x").with_mode(ModerationMode::Single(ProviderId::OpenAi)))
        .await
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["flagged"], true);
    assert_eq!(json["mode_used"], "openai");
    assert_eq!(json["content_type"], "text");
    assert_eq!(json["category_scores"]["self_harm"], 0.7);
    assert_eq!(json["flagged_categories"][0], "self_harm");
    assert_eq!(json["contributing_providers"][0], "openai");
    assert!(json.get("raw_responses").is_none());
    assert!(json["moderation_id"].is_string());
}
