use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use envoy_core::completion::CompletionService;
use envoy_core::errors::CompletionError;

/// Configuration for the ReliableCompletion timeout, retry and circuit breaker behavior.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(200),
            max_retries: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a CompletionService with a per-attempt timeout, retries and a circuit breaker.
///
/// - Each attempt is bounded by `timeout`; a timeout ends the call and is never retried
/// - Retryable errors back off exponentially with jitter, honoring `retry_after` hints
/// - Circuit breaker: N consecutive failures → open → cooldown → half-open → success → closed
pub struct ReliableCompletion<C: CompletionService> {
    inner: C,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<C: CompletionService> ReliableCompletion<C> {
    pub fn new(inner: C, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: C) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn check_circuit(&self) -> Result<(), CompletionError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(CompletionError::ProviderOverloaded)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if matches!(*state, CircuitState::Closed | CircuitState::HalfOpen) {
                warn!(
                    failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "circuit breaker opened"
                );
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Exponential backoff with jitter, unless the server suggested a delay.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range;
        let final_ms = (capped + jitter).max(100.0);

        Duration::from_millis(final_ms as u64)
    }

    async fn attempt(&self, system_prompt: &str, user_text: &str) -> Result<String, CompletionError> {
        match tokio::time::timeout(
            self.config.timeout,
            self.inner.complete(system_prompt, user_text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.config.timeout)),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Non-cryptographic xorshift64 for jitter.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<C: CompletionService> CompletionService for ReliableCompletion<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<String, CompletionError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            match self.attempt(system_prompt, user_text).await {
                Ok(text) => {
                    self.record_success();
                    return Ok(text);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.config.max_retries {
                        warn!(error_kind = e.error_kind(), error = %e, "completion failed");
                        self.record_failure();
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying completion after error"
                    );

                    tokio::time::sleep(delay).await;
                    self.check_circuit()?;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCompletion, MockResponse};

    fn server_error() -> MockResponse {
        MockResponse::Error(CompletionError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    fn fast_config() -> ReliableConfig {
        ReliableConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let reliable = ReliableCompletion::with_defaults(MockCompletion::with_texts(["hello"]));
        assert_eq!(reliable.complete("s", "u").await.unwrap(), "hello");
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn retries_on_retryable_error() {
        let mock = MockCompletion::new(vec![
            server_error(),
            MockResponse::Error(CompletionError::NetworkError("reset".into())),
            MockResponse::text("recovered"),
        ]);
        let reliable = ReliableCompletion::new(mock, fast_config());

        assert_eq!(reliable.complete("s", "u").await.unwrap(), "recovered");
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = MockCompletion::new(vec![
            MockResponse::Error(CompletionError::AuthenticationFailed("bad key".into())),
            MockResponse::text("should not reach"),
        ]);
        let reliable = ReliableCompletion::new(mock, fast_config());

        let err = reliable.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, CompletionError::AuthenticationFailed(_)));
        assert_eq!(reliable.inner().remaining(), 1);
    }

    #[tokio::test]
    async fn max_retries_exhausted() {
        let mock = MockCompletion::new(vec![server_error(), server_error(), server_error(), server_error()]);
        let reliable = ReliableCompletion::new(mock, fast_config());

        assert!(reliable.complete("s", "u").await.is_err());
        assert_eq!(reliable.total_retries(), 3);
        assert_eq!(reliable.inner().remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_not_retried() {
        let mock = MockCompletion::new(vec![
            MockResponse::delayed(Duration::from_secs(10), MockResponse::text("too late")),
            MockResponse::text("never asked"),
        ]);
        let reliable = ReliableCompletion::new(
            mock,
            ReliableConfig {
                timeout: Duration::from_secs(2),
                ..fast_config()
            },
        );

        let err = reliable.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, CompletionError::Timeout(d) if d == Duration::from_secs(2)));
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(reliable.inner().remaining(), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_threshold() {
        let mock = MockCompletion::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockResponse::text("unreachable"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            ..fast_config()
        };
        let reliable = ReliableCompletion::new(mock, config);

        for _ in 0..3 {
            let _ = reliable.complete("s", "u").await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = reliable.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, CompletionError::ProviderOverloaded));
        assert_eq!(reliable.inner().remaining(), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_recovers_after_cooldown() {
        let mock = MockCompletion::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockResponse::text("recovered"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(50),
            ..fast_config()
        };
        let reliable = ReliableCompletion::new(mock, config);

        for _ in 0..3 {
            let _ = reliable.complete("s", "u").await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(reliable.complete("s", "u").await.unwrap(), "recovered");
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn retry_delay_respects_suggested() {
        let reliable = ReliableCompletion::with_defaults(MockCompletion::default());
        let delay = reliable.retry_delay(0, Some(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn retry_delay_exponential_and_capped() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableCompletion::new(MockCompletion::default(), config);

        assert_eq!(reliable.retry_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.retry_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.retry_delay(5, None).as_millis(), 300);
    }

    #[test]
    fn delegates_identity() {
        let reliable = ReliableCompletion::with_defaults(MockCompletion::default());
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
    }
}
