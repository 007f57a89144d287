//! Circuit breaker and the guarded LLM port.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls are rejected until the reset timeout elapses.
//! - **Half-open**: one probe call is allowed; success closes the circuit,
//!   failure re-opens it.
//!
//! [`GuardedLlm`] wraps any `LlmPort` in a breaker: while the circuit is
//! open the port reports unavailable, which makes every enhancer call fall
//! through to its heuristic without even attempting the network.

use async_trait::async_trait;
use cartpilot_core::error::LlmError;
use cartpilot_core::port::{ChatMessage, Completion, CompletionOptions, LlmPort};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Breaker configuration.
#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Rejecting calls.
    Open,
    /// Allowing a probe call.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A consecutive-failure circuit breaker.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    /// Build a breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            })),
        }
    }

    /// Current state, advancing open → half-open when the timeout expired.
    pub async fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().await;
        if inner.state == BreakerState::Open {
            let expired = inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
            if expired {
                tracing::info!("LLM circuit breaker open -> half-open");
                inner.state = BreakerState::HalfOpen;
            }
        }
        inner.state
    }

    /// Whether a call may proceed right now.
    pub async fn allows_calls(&self) -> bool {
        self.state().await != BreakerState::Open
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != BreakerState::Closed {
            tracing::info!("LLM circuit breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold
        {
            if inner.state != BreakerState::Open {
                tracing::warn!(
                    failures = inner.consecutive_failures,
                    "LLM circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// An `LlmPort` wrapper that trips to unavailable under repeated failure.
pub struct GuardedLlm {
    inner: Arc<dyn LlmPort>,
    breaker: CircuitBreaker,
}

impl GuardedLlm {
    /// Wrap a port with the default breaker (3 failures, 30 s reset).
    #[must_use]
    pub fn new(inner: Arc<dyn LlmPort>) -> Self {
        Self::with_config(inner, CircuitBreakerConfig::default())
    }

    /// Wrap a port with a specific breaker configuration.
    #[must_use]
    pub fn with_config(inner: Arc<dyn LlmPort>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
        }
    }

    /// The breaker, for observability.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl LlmPort for GuardedLlm {
    async fn is_available(&self) -> bool {
        self.breaker.allows_calls().await && self.inner.is_available().await
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        if !self.breaker.allows_calls().await {
            return Err(LlmError::NetworkError("circuit breaker open".to_string()));
        }
        match self.inner.complete(messages, opts).await {
            Ok(completion) => {
                self.breaker.record_success().await;
                Ok(completion)
            },
            Err(error) => {
                self.breaker.record_failure().await;
                Err(error)
            },
        }
    }

    async fn set_api_key(&self, key: String) {
        self.inner.set_api_key(key).await;
        // A fresh key deserves a fresh circuit.
        self.breaker.record_success().await;
    }

    async fn clear_api_key(&self) {
        self.inner.clear_api_key().await;
    }

    async fn last_error(&self) -> Option<LlmError> {
        self.inner.last_error().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_testing::ScriptedLlm;

    fn failing_llm() -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm::failing_with(LlmError::ServerError {
            status: 503,
        }))
    }

    #[tokio::test]
    async fn three_failures_open_the_circuit() {
        let guarded = GuardedLlm::new(failing_llm());
        let opts = CompletionOptions::default();
        for _ in 0..3 {
            let _ = guarded.complete(&[ChatMessage::user("x")], &opts).await;
        }
        assert_eq!(guarded.breaker().state().await, BreakerState::Open);
        assert!(!guarded.is_available().await);

        // Rejected without touching the inner port.
        let result = guarded.complete(&[ChatMessage::user("x")], &opts).await;
        assert!(matches!(result, Err(LlmError::NetworkError(_))));
    }

    #[tokio::test]
    async fn open_circuit_half_opens_after_reset_and_closes_on_success() {
        let llm = Arc::new(ScriptedLlm::with_responses(vec!["ok"]));
        let guarded = GuardedLlm::with_config(
            Arc::clone(&llm) as Arc<dyn LlmPort>,
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_millis(30),
            },
        );
        let opts = CompletionOptions::default();

        // Open it with a scripted failure.
        llm.clear_api_key().await;
        let _ = guarded.complete(&[ChatMessage::user("x")], &opts).await;
        assert_eq!(guarded.breaker().state().await, BreakerState::Open);

        llm.set_api_key("k".to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(guarded.breaker().state().await, BreakerState::HalfOpen);

        let result = guarded.complete(&[ChatMessage::user("x")], &opts).await;
        assert!(result.is_ok());
        assert_eq!(guarded.breaker().state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let guarded = GuardedLlm::with_config(
            failing_llm(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_millis(20),
            },
        );
        let opts = CompletionOptions::default();
        let _ = guarded.complete(&[ChatMessage::user("x")], &opts).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(guarded.breaker().state().await, BreakerState::HalfOpen);
        let _ = guarded.complete(&[ChatMessage::user("x")], &opts).await;
        assert_eq!(guarded.breaker().state().await, BreakerState::Open);
    }
}
