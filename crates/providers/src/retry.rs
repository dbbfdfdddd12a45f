//! Retry and error classification for generation calls.
//!
//! Every model call made by the research loop and the structured generators
//! goes through [`with_error_handling`]. Provider failures are classified,
//! in priority order:
//!
//! 1. rate limit: retried after the provider's retry-after, or
//!    `rate_limit_base · 2^n` capped at `rate_limit_max`
//! 2. content filter: terminal immediately
//! 3. model unavailable: terminal immediately
//! 4. transient (empty output, network, timeouts, malformed output, 5xx):
//!    retried after `transient_base · 2^n + jitter`, capped at `transient_max`
//! 5. anything else, or retries exhausted: the fallback runs once if given
//!
//! At most `max_retries + 1` attempts are made.

use futures::future::BoxFuture;
use quarry_core::error::{GenerationError, ProviderError};
use quarry_core::event::{DomainEvent, EventBus};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A fallback operation, run at most once after the primary gives up.
pub struct Fallback<'a, T> {
    model: String,
    call: BoxFuture<'a, Result<T, ProviderError>>,
}

impl<'a, T> Fallback<'a, T> {
    /// `model` names the fallback model in errors and logs.
    pub fn new(model: impl Into<String>, call: BoxFuture<'a, Result<T, ProviderError>>) -> Self {
        Self {
            model: model.into(),
            call,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// How a provider failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimit { retry_after: Option<Duration> },
    ContentFilter,
    ModelUnavailable,
    Transient,
    Other,
}

impl ErrorClass {
    fn label(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::ContentFilter => "content_filter",
            Self::ModelUnavailable => "model_unavailable",
            Self::Transient => "transient",
            Self::Other => "other",
        }
    }
}

/// Classify a provider failure.
///
/// Typed variants decide directly. Only `ApiError` bodies, where the
/// provider gave us nothing structured, are inspected by text.
pub fn classify(err: &ProviderError) -> ErrorClass {
    match err {
        ProviderError::RateLimited { retry_after } => ErrorClass::RateLimit {
            retry_after: *retry_after,
        },
        ProviderError::ContentFiltered(_) => ErrorClass::ContentFilter,
        ProviderError::ModelNotFound(_) => ErrorClass::ModelUnavailable,
        ProviderError::EmptyResponse
        | ProviderError::MalformedOutput(_)
        | ProviderError::Timeout(_)
        | ProviderError::Network(_) => ErrorClass::Transient,
        ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => ErrorClass::Other,
        ProviderError::ApiError { status_code, message } => classify_api_error(*status_code, message),
    }
}

fn classify_api_error(status: u16, message: &str) -> ErrorClass {
    match status {
        429 => return ErrorClass::RateLimit { retry_after: None },
        404 => return ErrorClass::ModelUnavailable,
        500 | 502 | 503 | 504 => return ErrorClass::Transient,
        _ => {}
    }

    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["rate limit", "rate_limit", "too many requests", "quota"]) {
        ErrorClass::RateLimit { retry_after: None }
    } else if has(&["content filter", "content_filter", "content policy", "safety"]) {
        ErrorClass::ContentFilter
    } else if has(&["model not found", "model_not_found", "does not exist", "unknown model", "model unavailable"]) {
        ErrorClass::ModelUnavailable
    } else if has(&["timed out", "timeout", "connection reset", "econnreset", "overloaded"]) {
        ErrorClass::Transient
    } else {
        ErrorClass::Other
    }
}

/// Convert a provider failure into the generation error taxonomy.
pub fn to_generation_error(err: ProviderError, model: &str) -> GenerationError {
    match classify(&err) {
        ErrorClass::RateLimit { retry_after } => GenerationError::RateLimit {
            message: err.to_string(),
            retry_after,
        },
        ErrorClass::ContentFilter => GenerationError::ContentFilter {
            message: err.to_string(),
        },
        ErrorClass::ModelUnavailable => GenerationError::ModelUnavailable {
            model: model.to_string(),
            message: err.to_string(),
        },
        ErrorClass::Transient | ErrorClass::Other => GenerationError::Unknown {
            message: err.to_string(),
            cause: Some(err),
        },
    }
}

/// Backoff policy for generation calls.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub rate_limit_base: Duration,
    pub rate_limit_max: Duration,
    pub transient_base: Duration,
    pub transient_max: Duration,
    pub jitter: Duration,
    events: Option<Arc<EventBus>>,
}

impl RetryPolicy {
    pub fn from_config(config: &quarry_config::RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            rate_limit_base: Duration::from_millis(config.rate_limit_base_ms),
            rate_limit_max: Duration::from_millis(config.rate_limit_max_ms),
            transient_base: Duration::from_millis(config.transient_base_ms),
            transient_max: Duration::from_millis(config.transient_max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            events: None,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Publish `GenerationRetried` events on this bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Delay before retry `attempt` (0-based) after a rate limit without
    /// a retry-after hint.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        exponential(self.rate_limit_base, attempt).min(self.rate_limit_max)
    }

    /// Delay before retry `attempt` (0-based) after a transient failure.
    pub fn transient_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        exponential(self.transient_base, attempt)
            .saturating_add(jitter)
            .min(self.transient_max)
    }

    /// The delay before retrying, or `None` when this failure is not retried.
    fn delay_for(&self, class: ErrorClass, attempt: u32) -> Option<Duration> {
        match class {
            ErrorClass::RateLimit { retry_after } => {
                Some(retry_after.unwrap_or_else(|| self.rate_limit_delay(attempt)))
            }
            ErrorClass::Transient => Some(self.transient_delay(attempt)),
            ErrorClass::ContentFilter | ErrorClass::ModelUnavailable | ErrorClass::Other => None,
        }
    }

    /// Run `operation` under this policy with no fallback.
    pub async fn run<T, F, Fut>(&self, model: &str, operation: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        with_error_handling(self, model, operation, None).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&quarry_config::RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("rate_limit_base", &self.rate_limit_base)
            .field("rate_limit_max", &self.rate_limit_max)
            .field("transient_base", &self.transient_base)
            .field("transient_max", &self.transient_max)
            .field("jitter", &self.jitter)
            .finish()
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}

/// Run one generation operation with classification, backoff and an
/// optional fallback.
///
/// `model` names the model being called, for `ModelUnavailable` errors and
/// logs. Content filter and model-unavailable failures end the call at
/// once without trying the fallback.
pub async fn with_error_handling<T, F, Fut>(
    policy: &RetryPolicy,
    model: &str,
    mut operation: F,
    fallback: Option<Fallback<'_, T>>,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    let last_error = loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let class = classify(&err);
        match class {
            ErrorClass::ContentFilter | ErrorClass::ModelUnavailable => {
                warn!(model, attempt, kind = class.label(), error = %err, "Generation failed, not retrying");
                return Err(to_generation_error(err, model));
            }
            _ => {}
        }

        if attempt >= policy.max_retries {
            break err;
        }

        let Some(delay) = policy.delay_for(class, attempt) else {
            break err;
        };

        warn!(
            model,
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            kind = class.label(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Generation failed, retrying after delay"
        );
        if let Some(bus) = &policy.events {
            bus.publish(DomainEvent::GenerationRetried {
                attempt: attempt + 1,
                error_kind: class.label().to_string(),
                delay_ms: delay.as_millis() as u64,
                timestamp: chrono::Utc::now(),
            });
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    };

    let primary = to_generation_error(last_error, model);

    match fallback {
        Some(fallback) => {
            let Fallback { model: fallback_model, call } = fallback;
            debug!(model, fallback_model = %fallback_model, kind = primary.kind(), "Primary generation gave up, running fallback");
            call.await.map_err(|fallback_err| GenerationError::FallbackFailed {
                primary: Box::new(primary),
                fallback: Box::new(to_generation_error(fallback_err, &fallback_model)),
            })
        }
        None => Err(primary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default().with_max_retries(max_retries)
    }

    #[test]
    fn classify_typed_variants() {
        assert_eq!(
            classify(&ProviderError::RateLimited { retry_after: Some(Duration::from_secs(3)) }),
            ErrorClass::RateLimit { retry_after: Some(Duration::from_secs(3)) }
        );
        assert_eq!(classify(&ProviderError::ContentFiltered("x".into())), ErrorClass::ContentFilter);
        assert_eq!(classify(&ProviderError::ModelNotFound("m".into())), ErrorClass::ModelUnavailable);
        assert_eq!(classify(&ProviderError::EmptyResponse), ErrorClass::Transient);
        assert_eq!(classify(&ProviderError::Network("reset".into())), ErrorClass::Transient);
        assert_eq!(classify(&ProviderError::AuthenticationFailed("no".into())), ErrorClass::Other);
    }

    #[test]
    fn classify_unstructured_api_errors() {
        let api = |status, msg: &str| ProviderError::ApiError { status_code: status, message: msg.into() };
        assert!(matches!(classify(&api(400, "You exceeded your current quota")), ErrorClass::RateLimit { .. }));
        assert_eq!(classify(&api(400, "Blocked by safety system")), ErrorClass::ContentFilter);
        assert_eq!(classify(&api(400, "The model `gpt-9` does not exist")), ErrorClass::ModelUnavailable);
        assert_eq!(classify(&api(503, "Service Unavailable")), ErrorClass::Transient);
        assert_eq!(classify(&api(400, "invalid 'messages' field")), ErrorClass::Other);
    }

    #[test]
    fn rate_limit_delays_double_and_cap() {
        let p = RetryPolicy::default();
        let delays: Vec<u64> = (0..7).map(|n| p.rate_limit_delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![10_000, 20_000, 40_000, 80_000, 120_000, 120_000, 120_000]);
    }

    #[test]
    fn transient_delay_bounds() {
        let p = RetryPolicy::default();
        for attempt in 0..6 {
            let d = p.transient_delay(attempt).as_millis() as u64;
            let base = (2_000u64 << attempt).min(15_000);
            assert!(d >= base.min(15_000) && d <= (base + 1_000).min(15_000), "attempt {attempt}: {d}");
        }
    }

    #[test]
    fn exponential_saturates() {
        assert_eq!(exponential(Duration::from_secs(10), 64), Duration::MAX);
    }

    #[test]
    fn huge_transient_base_saturates_instead_of_overflowing() {
        let mut p = RetryPolicy::default();
        p.transient_base = Duration::MAX;
        p.transient_max = Duration::MAX;
        p.jitter = Duration::from_secs(1);
        assert_eq!(p.transient_delay(3), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_stop_after_k_plus_one_attempts() {
        for k in [0u32, 1, 3] {
            let calls = AtomicU32::new(0);
            let result: Result<(), _> = policy(k)
                .run("m", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ProviderError::EmptyResponse) }
                })
                .await;
            assert!(matches!(result, Err(GenerationError::Unknown { .. })));
            assert_eq!(calls.load(Ordering::SeqCst), k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = policy(4)
            .run("m", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::Timeout("slow".into()))
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_follow_doubling_sequence() {
        let stamps = Mutex::new(Vec::new());
        let start = Instant::now();
        let result: Result<(), _> = policy(4)
            .run("m", || {
                stamps.lock().unwrap().push(start.elapsed());
                async { Err(ProviderError::RateLimited { retry_after: None }) }
            })
            .await;

        assert!(matches!(result, Err(GenerationError::RateLimit { .. })));
        let stamps = stamps.lock().unwrap();
        let gaps: Vec<u64> = stamps.windows(2).map(|w| (w[1] - w[0]).as_millis() as u64).collect();
        assert_eq!(gaps, vec![10_000, 20_000, 40_000, 80_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_honours_retry_after() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = policy(4)
            .run("m", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::RateLimited { retry_after: Some(Duration::from_secs(3)) })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(start.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn content_filter_fails_fast_without_fallback() {
        let calls = AtomicU32::new(0);
        let fallback_ran = AtomicU32::new(0);
        let fallback: Fallback<'_, ()> = Fallback::new(
            "backup",
            Box::pin(async {
                fallback_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let result = with_error_handling(
            &policy(4),
            "m",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::ContentFiltered("blocked".into())) }
            },
            Some(fallback),
        )
        .await;
        assert!(matches!(result, Err(GenerationError::ContentFilter { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn model_unavailable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(4)
            .run("gpt-9", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::ModelNotFound("gpt-9".into())) }
            })
            .await;
        match result {
            Err(GenerationError::ModelUnavailable { model, .. }) => assert_eq!(model, "gpt-9"),
            other => panic!("expected ModelUnavailable, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_runs_after_exhaustion() {
        let fallback: Fallback<'_, &str> = Fallback::new("backup", Box::pin(async { Ok("from fallback") }));
        let result = with_error_handling(
            &policy(1),
            "m",
            || async { Err(ProviderError::Network("reset".into())) },
            Some(fallback),
        )
        .await;
        assert_eq!(result.unwrap(), "from fallback");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_goes_straight_to_fallback() {
        let calls = AtomicU32::new(0);
        let fallback: Fallback<'_, ()> = Fallback::new(
            "backup",
            Box::pin(async { Err(ProviderError::AuthenticationFailed("also bad".into())) }),
        );
        let result = with_error_handling(
            &policy(4),
            "m",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::AuthenticationFailed("bad key".into())) }
            },
            Some(fallback),
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(GenerationError::FallbackFailed { primary, fallback }) => {
                assert!(primary.to_string().contains("bad key"));
                assert!(fallback.to_string().contains("also bad"));
            }
            other => panic!("expected FallbackFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_failure_names_the_fallback_model() {
        let fallback: Fallback<'_, ()> = Fallback::new(
            "backup-model",
            Box::pin(async { Err(ProviderError::ModelNotFound("backup-model".into())) }),
        );
        assert_eq!(fallback.model(), "backup-model");
        let result = with_error_handling(
            &policy(0),
            "primary-model",
            || async { Err(ProviderError::AuthenticationFailed("bad key".into())) },
            Some(fallback),
        )
        .await;
        match result {
            Err(GenerationError::FallbackFailed { fallback, .. }) => match *fallback {
                GenerationError::ModelUnavailable { model, .. } => assert_eq!(model, "backup-model"),
                other => panic!("expected ModelUnavailable, got {other:?}"),
            },
            other => panic!("expected FallbackFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_publish_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let calls = AtomicU32::new(0);
        let result = policy(2)
            .with_events(bus.clone())
            .run("m", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 { Err(ProviderError::EmptyResponse) } else { Ok(()) }
                }
            })
            .await;
        assert!(result.is_ok());
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::GenerationRetried { attempt, error_kind, .. } => {
                assert_eq!(*attempt, 1);
                assert_eq!(error_kind, "transient");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
