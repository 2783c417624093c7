use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Guards one external provider of the tier-3 pool.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitState>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    failure_count: Arc<AtomicU32>,
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        let name = name.into();
        debug!(
            "Creating circuit breaker '{}' with threshold {} and timeout {:?}",
            name, failure_threshold, recovery_timeout
        );

        Self {
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            failure_count: Arc::new(AtomicU32::new(0)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may go through right now. An open breaker whose recovery
    /// timeout has elapsed moves to half-open and admits a trial request.
    pub fn allow_request(&self) -> bool {
        let current = *self.state.read();
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() < self.recovery_timeout {
                    return false;
                }
                let mut state = self.state.write();
                if matches!(*state, CircuitState::Open { .. }) {
                    *state = CircuitState::HalfOpen;
                    info!("Circuit breaker '{}' transitioning to half-open", self.name);
                }
                true
            }
        }
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.allow_request() {
            return Err(Error::CircuitBreakerOpen(self.name.clone()));
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            *state = CircuitState::Closed;
            info!("Circuit breaker '{}' recovered, closed", self.name);
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write();
        let reopen = matches!(*state, CircuitState::HalfOpen);
        if reopen || failures >= self.failure_threshold {
            if !matches!(*state, CircuitState::Open { .. }) {
                warn!(
                    "Circuit breaker '{}' opened after {} consecutive failures",
                    self.name, failures
                );
            }
            *state = CircuitState::Open {
                opened_at: Instant::now(),
            };
        }
    }

    pub fn get_state(&self) -> CircuitState {
        *self.state.read()
    }

    pub fn get_failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.read(), CircuitState::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.read(), CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("openrouter", 3, Duration::from_secs(30));

        for i in 0..3 {
            let result = cb
                .call(|| async { Err::<(), _>(Error::model_provider("502")) })
                .await;
            assert!(result.is_err());
            assert_eq!(cb.is_open(), i == 2);
        }

        let rejected = cb.call(|| async { Ok::<_, Error>(()) }).await;
        assert!(matches!(rejected, Err(Error::CircuitBreakerOpen(name)) if name == "openrouter"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_recovers() {
        let cb = CircuitBreaker::new("groq", 1, Duration::from_secs(10));
        cb.record_failure();
        assert!(!cb.allow_request());

        advance(Duration::from_secs(11)).await;
        assert!(cb.allow_request());
        assert_eq!(cb.get_state(), CircuitState::HalfOpen);

        cb.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert!(cb.is_closed());
        assert_eq!(cb.get_failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("together", 5, Duration::from_secs(10));
        for _ in 0..5 {
            cb.record_failure();
        }
        advance(Duration::from_secs(10)).await;
        assert!(cb.allow_request());

        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.allow_request());
    }
}
