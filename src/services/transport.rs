//! Resilient Provider Transport (Component C, §4.3).
//!
//! Classifies raw provider errors into the fixed taxonomy (§4.3, §7), wraps
//! a provider's streaming call with jittered-backoff retry for the
//! retryable categories, and gates every attempt through the per-provider
//! `CircuitBreakerRegistry`.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use regex::Regex;
use thiserror::Error;

use crate::domain::error::{CircuitOpenError, ProviderError, ProviderErrorCategory};
use crate::domain::models::RetryConfig;
use crate::domain::ports::{LlmProvider, StreamEvent};

use super::circuit_breaker::CircuitBreakerRegistry;

/// The raw, unclassified failure a provider implementation hands back.
/// Transport-agnostic by design (§1: "any particular transport wire format
/// for LLM providers" is a non-goal) — just an optional HTTP-ish status and
/// a message to pattern-match.
#[derive(Debug, Clone)]
pub struct RawProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl RawProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Parse a `"retry after: N"`-shaped phrase (case-insensitive) and return
/// the hint in milliseconds (§4.3: "expose N*1000 ms as a suggested hint").
fn parse_retry_after_ms(message: &str) -> Option<u64> {
    let re = Regex::new(r"(?i)retry[- ]after:?\s*(\d+)").expect("static regex is valid");
    re.captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

/// Classify a raw transport failure into exactly one canonical category
/// (§4.3). Rules are applied in the table order; first match wins.
pub fn classify(raw: &RawProviderError) -> ProviderError {
    let msg = raw.message.as_str();
    let status = raw.status;

    let category = if matches!(status, Some(401) | Some(403)) || contains_any(msg, &["unauthorized", "invalid api key", "authentication"]) {
        ProviderErrorCategory::Auth
    } else if status == Some(400) && contains_any(msg, &["context", "token"]) {
        ProviderErrorCategory::ContextLength
    } else if status == Some(400) && contains_any(msg, &["content", "filter", "safety"]) {
        ProviderErrorCategory::ContentFilter
    } else if status == Some(400) {
        ProviderErrorCategory::InvalidRequest
    } else if status == Some(429) || contains_any(msg, &["rate limit", "too many requests"]) {
        ProviderErrorCategory::RateLimit
    } else if status == Some(529) || contains_any(msg, &["overloaded", "capacity"]) {
        ProviderErrorCategory::Overloaded
    } else if matches!(status, Some(500) | Some(502) | Some(503)) || status.is_some_and(|s| s >= 500) || contains_any(msg, &["server error", "internal error"]) {
        ProviderErrorCategory::ServerError
    } else if contains_any(msg, &["econnreset", "econnrefused", "socket hang up", "fetch failed"]) {
        ProviderErrorCategory::Network
    } else if contains_any(msg, &["timeout", "etimedout", "timed out"]) {
        ProviderErrorCategory::Timeout
    } else {
        ProviderErrorCategory::Unknown
    };

    let mut err = ProviderError::new(category, raw.message.clone());
    if category == ProviderErrorCategory::RateLimit {
        if let Some(ms) = parse_retry_after_ms(msg) {
            err = err.with_retry_after(ms);
        }
    }
    err
}

/// Jittered exponential backoff, capped, honoring a provider-supplied
/// retry-after hint if larger than the computed delay (§4.3).
pub fn backoff_delay_ms(attempt: u32, config: &RetryConfig, retry_after_hint_ms: Option<u64>) -> u64 {
    let exp = config.base_ms.saturating_mul(1u64 << attempt.min(20));
    let jitter = rand::thread_rng().gen_range(0..config.jitter_ms.max(1));
    let computed = (exp + jitter).min(config.cap_ms);
    match retry_after_hint_ms {
        Some(hint) => computed.max(hint),
        None => computed,
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// `resilientStream` (§4.3, §6.2): the public entry point. Checks the
/// circuit, attempts the call with retry, and on success/failure records
/// the outcome back onto the breaker. The returned stream is a finite,
/// non-restartable lazy sequence (§9): once any event has been yielded,
/// retry is no longer eligible for that attempt (§4.3 "partial output
/// commits the attempt") — including when the *first* event off a freshly
/// established stream is itself an error: we peek at it before committing
/// to the attempt, so a retryable failure that arrives before any event
/// was ever yielded still gets a fresh attempt.
pub async fn resilient_stream(
    breaker: Arc<CircuitBreakerRegistry>,
    provider: Arc<dyn LlmProvider>,
    context: serde_json::Value,
    options: serde_json::Value,
    retry_config: RetryConfig,
) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, TransportError> {
    let provider_id = provider.id().to_string();
    breaker.allow_request(&provider_id, chrono::Utc::now())?;

    let mut attempt: u32 = 0;
    loop {
        match provider.create_stream(context.clone(), options.clone()).await {
            Ok(mut inner) => match inner.next().await {
                None => {
                    breaker.record_success(&provider_id);
                    return Ok(Box::pin(stream::empty()));
                }
                Some(Ok(first)) => {
                    let state = RetryState {
                        provider_id: provider_id.clone(),
                        breaker: breaker.clone(),
                        ended: false,
                    };
                    let rest = stream::unfold((inner, state), |(mut inner, mut state)| async move {
                        match inner.next().await {
                            Some(Ok(event)) => Some((Ok(event), (inner, state))),
                            Some(Err(err)) => {
                                state.breaker.record_failure(&state.provider_id, chrono::Utc::now());
                                Some((Err(err), (inner, state)))
                            }
                            None => {
                                if !state.ended {
                                    state.breaker.record_success(&state.provider_id);
                                    state.ended = true;
                                }
                                None
                            }
                        }
                    });
                    return Ok(Box::pin(stream::once(async move { Ok(first) }).chain(rest)));
                }
                Some(Err(err)) => {
                    // No event has been yielded to the caller yet, so a
                    // retryable error here is still eligible for retry.
                    if !err.is_retryable() || attempt + 1 >= retry_config.max_attempts {
                        breaker.record_failure(&provider_id, chrono::Utc::now());
                        return Err(TransportError::Provider(err));
                    }
                    breaker.record_failure(&provider_id, chrono::Utc::now());
                    let delay = backoff_delay_ms(attempt, &retry_config, err.retry_after_ms);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            },
            Err(err) => {
                if !err.is_retryable() || attempt + 1 >= retry_config.max_attempts {
                    breaker.record_failure(&provider_id, chrono::Utc::now());
                    return Err(TransportError::Provider(err));
                }
                let delay = backoff_delay_ms(attempt, &retry_config, err.retry_after_ms);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}

struct RetryState {
    provider_id: String,
    breaker: Arc<CircuitBreakerRegistry>,
    ended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CircuitBreakerConfig;
    use crate::domain::ports::LlmProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn raw(status: Option<u16>, msg: &str) -> RawProviderError {
        RawProviderError::new(status, msg)
    }

    struct FlakyThenOkProvider {
        fail_first_n_calls: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyThenOkProvider {
        fn id(&self) -> &str {
            "flaky"
        }

        fn models(&self) -> &[String] {
            &[]
        }

        async fn create_stream(
            &self,
            _context: serde_json::Value,
            _options: serde_json::Value,
        ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n_calls {
                // Stream establishes fine, but its very first event errors
                // before anything has been yielded to the caller.
                Ok(Box::pin(stream::iter(vec![Err(ProviderError::new(
                    ProviderErrorCategory::ServerError,
                    "upstream 503",
                ))])))
            } else {
                Ok(Box::pin(stream::iter(vec![Ok(StreamEvent::Done)])))
            }
        }
    }

    #[tokio::test]
    async fn retries_when_first_stream_event_errors_before_any_yield() {
        let breaker = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 10,
            cooldown_ms: 1000,
            success_threshold: 1,
        }));
        let provider = Arc::new(FlakyThenOkProvider { fail_first_n_calls: 2, calls: AtomicU32::new(0) });
        let retry_config = RetryConfig { max_attempts: 5, base_ms: 1, cap_ms: 10, jitter_ms: 1 };

        let mut stream = resilient_stream(
            breaker,
            provider.clone(),
            serde_json::json!({}),
            serde_json::json!({}),
            retry_config,
        )
        .await
        .expect("should retry past the flaky first-event errors and eventually succeed");

        let first = stream.next().await.expect("stream should yield one event");
        assert!(matches!(first, Ok(StreamEvent::Done)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_once_an_event_has_been_yielded() {
        let breaker = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 10,
            cooldown_ms: 1000,
            success_threshold: 1,
        }));
        struct CommitsThenFailsProvider;
        #[async_trait]
        impl LlmProvider for CommitsThenFailsProvider {
            fn id(&self) -> &str {
                "commits"
            }
            fn models(&self) -> &[String] {
                &[]
            }
            async fn create_stream(
                &self,
                _context: serde_json::Value,
                _options: serde_json::Value,
            ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError> {
                Ok(Box::pin(stream::iter(vec![
                    Ok(StreamEvent::Delta(serde_json::json!({"text": "partial"}))),
                    Err(ProviderError::new(ProviderErrorCategory::ServerError, "dropped mid-stream")),
                ])))
            }
        }
        let retry_config = RetryConfig { max_attempts: 5, base_ms: 1, cap_ms: 10, jitter_ms: 1 };
        let mut stream =
            resilient_stream(breaker, Arc::new(CommitsThenFailsProvider), serde_json::json!({}), serde_json::json!({}), retry_config)
                .await
                .expect("first event establishes the stream");

        let first = stream.next().await.expect("should yield the delta");
        assert!(matches!(first, Ok(StreamEvent::Delta(_))));
        let second = stream.next().await.expect("should yield the mid-stream error, not retry");
        assert!(second.is_err());
    }

    #[test]
    fn classifies_auth_by_status() {
        let e = classify(&raw(Some(401), "denied"));
        assert_eq!(e.category, ProviderErrorCategory::Auth);
        assert!(!e.is_retryable());
    }

    #[test]
    fn classifies_auth_by_message_phrase() {
        let e = classify(&raw(None, "Invalid API Key supplied"));
        assert_eq!(e.category, ProviderErrorCategory::Auth);
    }

    #[test]
    fn classifies_context_length_over_invalid_request() {
        let e = classify(&raw(Some(400), "maximum context length exceeded, reduce tokens"));
        assert_eq!(e.category, ProviderErrorCategory::ContextLength);
    }

    #[test]
    fn classifies_content_filter() {
        let e = classify(&raw(Some(400), "blocked by content safety filter"));
        assert_eq!(e.category, ProviderErrorCategory::ContentFilter);
    }

    #[test]
    fn classifies_plain_400_as_invalid_request() {
        let e = classify(&raw(Some(400), "missing required field"));
        assert_eq!(e.category, ProviderErrorCategory::InvalidRequest);
        assert!(!e.is_retryable());
    }

    #[test]
    fn classifies_rate_limit_and_parses_retry_after_hint() {
        let e = classify(&raw(Some(429), "rate limit exceeded, retry after: 5"));
        assert_eq!(e.category, ProviderErrorCategory::RateLimit);
        assert!(e.is_retryable());
        assert_eq!(e.retry_after_ms, Some(5000));
    }

    #[test]
    fn classifies_overloaded() {
        let e = classify(&raw(Some(529), "server overloaded"));
        assert_eq!(e.category, ProviderErrorCategory::Overloaded);
        assert!(e.is_retryable());
    }

    #[test]
    fn classifies_server_error_by_5xx_range() {
        let e = classify(&raw(Some(503), "service unavailable"));
        assert_eq!(e.category, ProviderErrorCategory::ServerError);
        assert!(e.is_retryable());
    }

    #[test]
    fn classifies_network_errors() {
        let e = classify(&raw(None, "fetch failed: ECONNRESET"));
        assert_eq!(e.category, ProviderErrorCategory::Network);
        assert!(e.is_retryable());
    }

    #[test]
    fn classifies_timeout() {
        let e = classify(&raw(None, "request timed out after 30s"));
        assert_eq!(e.category, ProviderErrorCategory::Timeout);
        assert!(e.is_retryable());
    }

    #[test]
    fn unmatched_error_is_unknown_and_not_retryable() {
        let e = classify(&raw(None, "something weird happened"));
        assert_eq!(e.category, ProviderErrorCategory::Unknown);
        assert!(!e.is_retryable());
    }

    #[test]
    fn classification_order_prefers_auth_over_generic_400() {
        // 401 should never fall through to invalid_request.
        let e = classify(&raw(Some(401), "bad request"));
        assert_eq!(e.category, ProviderErrorCategory::Auth);
    }

    #[test]
    fn backoff_respects_cap() {
        let config = RetryConfig { max_attempts: 5, base_ms: 500, cap_ms: 2000, jitter_ms: 250 };
        for attempt in 0..10 {
            let delay = backoff_delay_ms(attempt, &config, None);
            assert!(delay <= 2000, "attempt {attempt} delay {delay} exceeded cap");
        }
    }

    #[test]
    fn backoff_honors_retry_after_hint_when_larger() {
        let config = RetryConfig { max_attempts: 5, base_ms: 500, cap_ms: 30_000, jitter_ms: 250 };
        let delay = backoff_delay_ms(0, &config, Some(20_000));
        assert!(delay >= 20_000);
    }

    #[test]
    fn seed_scenario_s4_style_backoff_monotonic_growth_p7() {
        let config = RetryConfig { max_attempts: 5, base_ms: 1000, cap_ms: 30_000, jitter_ms: 1 };
        // P7: attempt r waits >= min(1000*2^(r-1), 30000) before re-enqueue.
        let d0 = backoff_delay_ms(0, &config, None);
        let d1 = backoff_delay_ms(1, &config, None);
        assert!(d0 >= 1000);
        assert!(d1 >= 2000);
    }
}
