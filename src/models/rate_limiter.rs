use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::registry::{ModelRegistry, RateLimit};

pub const USAGE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub enable_rate_limiting: bool,
    pub max_attempts: u32,
    pub backoff_base_delay_ms: u64,
    pub backoff_max_delay_ms: u64,
    pub backoff_multiplier: u64,
    pub jitter: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            max_attempts: 3,
            backoff_base_delay_ms: 500,
            backoff_max_delay_ms: 60_000,
            backoff_multiplier: 2,
            jitter: false,
        }
    }
}

impl RateLimiterConfig {
    /// Backoff steps between attempts of the single-model path. Yields
    /// `max_attempts - 1` delays, each capped at `backoff_max_delay_ms`.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let steps = self.max_attempts.saturating_sub(1) as usize;
        let base = ExponentialBackoff::from_millis(self.backoff_multiplier.max(1))
            .factor(self.backoff_base_delay_ms / self.backoff_multiplier.max(1))
            .max_delay(Duration::from_millis(self.backoff_max_delay_ms))
            .take(steps);

        if self.jitter {
            base.map(jitter).collect()
        } else {
            base.collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub wait_time: Option<Duration>,
    pub reason: Option<String>,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            wait_time: None,
            reason: None,
        }
    }

    fn deny(wait_time: Duration, reason: String) -> Self {
        Self {
            allowed: false,
            wait_time: Some(wait_time),
            reason: Some(reason),
        }
    }
}

/// Sliding 60-second log of admitted requests for one model.
#[derive(Debug)]
pub struct UsageWindow {
    model_id: String,
    limit: RateLimit,
    events: VecDeque<(Instant, u64)>,
    token_count: u64,
}

impl UsageWindow {
    pub fn new(model_id: String, limit: RateLimit) -> Self {
        Self {
            model_id,
            limit,
            events: VecDeque::new(),
            token_count: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, tokens)) = self.events.front() {
            if now >= at + USAGE_WINDOW {
                self.events.pop_front();
                self.token_count -= tokens;
            } else {
                break;
            }
        }
    }

    pub fn request_count(&self) -> u32 {
        self.events.len() as u32
    }

    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    /// When the oldest admitted request leaves the window.
    pub fn window_reset_time(&self) -> Option<Instant> {
        self.events.front().map(|(at, _)| *at + USAGE_WINDOW)
    }

    pub fn check(&mut self, now: Instant, tokens: u64) -> RateLimitDecision {
        self.prune(now);

        if self.request_count() >= self.limit.rpm {
            let wait = self
                .window_reset_time()
                .map(|reset| reset.saturating_duration_since(now))
                .unwrap_or(USAGE_WINDOW);
            return RateLimitDecision::deny(
                wait,
                format!(
                    "{} reached {} requests per minute",
                    self.model_id, self.limit.rpm
                ),
            );
        }

        // A single request larger than the whole budget is counted as the full budget.
        let needed = tokens.min(self.limit.tpm as u64);
        if self.token_count + needed > self.limit.tpm as u64 {
            let excess = self.token_count + needed - self.limit.tpm as u64;
            let mut freed = 0;
            let mut wait = USAGE_WINDOW;
            for (at, event_tokens) in &self.events {
                freed += event_tokens;
                if freed >= excess {
                    wait = (*at + USAGE_WINDOW).saturating_duration_since(now);
                    break;
                }
            }
            return RateLimitDecision::deny(
                wait,
                format!(
                    "{} would exceed {} tokens per minute ({} in window)",
                    self.model_id, self.limit.tpm, self.token_count
                ),
            );
        }

        RateLimitDecision::allow()
    }

    pub fn record(&mut self, now: Instant, tokens: u64) {
        let tokens = tokens.min(self.limit.tpm as u64);
        self.events.push_back((now, tokens));
        self.token_count += tokens;
    }

    /// Replace the estimate recorded for the newest matching request with the
    /// token count the provider actually reported.
    pub fn reconcile(&mut self, estimated: u64, actual: u64) {
        let estimated = estimated.min(self.limit.tpm as u64);
        let actual = actual.min(self.limit.tpm as u64);
        if let Some(event) = self.events.iter_mut().rev().find(|(_, t)| *t == estimated) {
            self.token_count = self.token_count - event.1 + actual;
            event.1 = actual;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStatus {
    pub model_id: String,
    pub request_count: u32,
    pub token_count: u64,
    pub rpm: u32,
    pub tpm: u32,
    pub window_resets_in: Option<Duration>,
}

/// Per-model usage windows owned by the router.
pub struct UsageLedger {
    registry: Arc<ModelRegistry>,
    windows: Mutex<HashMap<String, UsageWindow>>,
    config: RateLimiterConfig,
}

impl UsageLedger {
    pub fn new(registry: Arc<ModelRegistry>, config: RateLimiterConfig) -> Self {
        Self {
            registry,
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn with_window<T>(&self, model_id: &str, f: impl FnOnce(&mut UsageWindow) -> T) -> Result<T> {
        let descriptor = self.registry.require(model_id)?;
        let mut windows = self.windows.lock();
        let window = windows
            .entry(model_id.to_string())
            .or_insert_with(|| UsageWindow::new(model_id.to_string(), descriptor.rate_limit));
        Ok(f(window))
    }

    /// Inspect the window without consuming capacity.
    pub fn can_make_request(&self, model_id: &str) -> Result<RateLimitDecision> {
        self.can_make_request_with_tokens(model_id, 0)
    }

    pub fn can_make_request_with_tokens(&self, model_id: &str, tokens: u32) -> Result<RateLimitDecision> {
        if !self.config.enable_rate_limiting {
            self.registry.require(model_id)?;
            return Ok(RateLimitDecision::allow());
        }
        let now = Instant::now();
        self.with_window(model_id, |window| window.check(now, tokens as u64))
    }

    /// Check and, if allowed, record the request in one step.
    pub fn try_acquire(&self, model_id: &str, estimated_tokens: u32) -> Result<RateLimitDecision> {
        if !self.config.enable_rate_limiting {
            self.registry.require(model_id)?;
            return Ok(RateLimitDecision::allow());
        }

        let now = Instant::now();
        let decision = self.with_window(model_id, |window| {
            let decision = window.check(now, estimated_tokens as u64);
            if decision.allowed {
                window.record(now, estimated_tokens as u64);
            }
            decision
        })?;

        if decision.allowed {
            debug!("Admitted request for {} ({} estimated tokens)", model_id, estimated_tokens);
        } else {
            warn!(
                "Rate limit hit for {}: {} (wait {:?})",
                model_id,
                decision.reason.as_deref().unwrap_or("throttled"),
                decision.wait_time
            );
        }
        Ok(decision)
    }

    pub fn record_actual_tokens(&self, model_id: &str, estimated: u32, actual: u32) {
        if !self.config.enable_rate_limiting || estimated == actual {
            return;
        }
        let mut windows = self.windows.lock();
        if let Some(window) = windows.get_mut(model_id) {
            window.reconcile(estimated as u64, actual as u64);
        }
    }

    pub fn get_status(&self, model_id: &str) -> Result<UsageStatus> {
        let now = Instant::now();
        self.with_window(model_id, |window| {
            window.prune(now);
            UsageStatus {
                model_id: model_id.to_string(),
                request_count: window.request_count(),
                token_count: window.token_count(),
                rpm: window.limit.rpm,
                tpm: window.limit.tpm,
                window_resets_in: window
                    .window_reset_time()
                    .map(|reset| reset.saturating_duration_since(now)),
            }
        })
    }

    pub fn get_all_status(&self) -> Vec<UsageStatus> {
        let ids: Vec<String> = self.windows.lock().keys().cloned().collect();
        let mut statuses: Vec<UsageStatus> = ids
            .iter()
            .filter_map(|id| self.get_status(id).ok())
            .collect();
        statuses.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::time::advance;

    fn ledger() -> UsageLedger {
        UsageLedger::new(Arc::new(ModelRegistry::builtin()), RateLimiterConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_limit_returns_positive_wait() {
        let ledger = ledger();
        // gemini-2.5-flash-lite allows 15 requests per minute
        for _ in 0..15 {
            assert!(ledger.try_acquire("gemini-2.5-flash-lite", 10).unwrap().allowed);
            advance(Duration::from_millis(100)).await;
        }

        let decision = ledger.can_make_request("gemini-2.5-flash-lite").unwrap();
        assert!(!decision.allowed);
        let wait = decision.wait_time.unwrap();
        assert!(wait > Duration::ZERO);
        assert_eq!(wait, Duration::from_millis(60_000 - 1_500));
        assert!(decision.reason.unwrap().contains("15 requests per minute"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let ledger = ledger();
        for _ in 0..5 {
            assert!(ledger.try_acquire("gemini-2.5-pro", 10).unwrap().allowed);
        }
        assert!(!ledger.try_acquire("gemini-2.5-pro", 10).unwrap().allowed);

        advance(USAGE_WINDOW).await;
        assert!(ledger.try_acquire("gemini-2.5-pro", 10).unwrap().allowed);
        assert_eq!(ledger.get_status("gemini-2.5-pro").unwrap().request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_minute_never_exceeds_rpm() {
        let ledger = ledger();
        let mut admitted = Vec::new();
        for step in 0..240u64 {
            if ledger.try_acquire("gemini-2.5-flash", 1).unwrap().allowed {
                admitted.push(step * 500);
            }
            advance(Duration::from_millis(500)).await;
        }
        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..].iter().filter(|t| **t < start + 60_000).count();
            assert!(in_window <= 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_budget_wait() {
        let mut overrides = std::collections::BTreeMap::new();
        overrides.insert("gemini-2.0-flash".to_string(), RateLimit { rpm: 100, tpm: 1_000 });
        let registry = ModelRegistry::builtin().with_rate_limit_overrides(&overrides).unwrap();
        let ledger = UsageLedger::new(Arc::new(registry), RateLimiterConfig::default());

        assert!(ledger.try_acquire("gemini-2.0-flash", 600).unwrap().allowed);
        advance(Duration::from_secs(10)).await;
        assert!(ledger.try_acquire("gemini-2.0-flash", 300).unwrap().allowed);

        let denied = ledger.try_acquire("gemini-2.0-flash", 300).unwrap();
        assert!(!denied.allowed);
        // the first 600-token request must expire first
        assert_eq!(denied.wait_time, Some(Duration::from_secs(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_actual_tokens() {
        let ledger = ledger();
        ledger.try_acquire("gemini-2.0-flash", 1_000).unwrap();
        ledger.record_actual_tokens("gemini-2.0-flash", 1_000, 250);
        assert_eq!(ledger.get_status("gemini-2.0-flash").unwrap().token_count, 250);
    }

    #[test]
    fn test_unknown_model_rejected() {
        let ledger = ledger();
        assert!(matches!(ledger.can_make_request("nope"), Err(Error::UnknownModel(_))));
    }

    #[test]
    fn test_disabled_limiter_always_allows() {
        let config = RateLimiterConfig {
            enable_rate_limiting: false,
            ..RateLimiterConfig::default()
        };
        let ledger = UsageLedger::new(Arc::new(ModelRegistry::builtin()), config);
        for _ in 0..100 {
            assert!(ledger.try_acquire("gemini-1.5-pro", 10).unwrap().allowed);
        }
    }

    #[test]
    fn test_backoff_schedule_bounded() {
        let config = RateLimiterConfig {
            max_attempts: 4,
            backoff_base_delay_ms: 1_000,
            backoff_max_delay_ms: 3_000,
            backoff_multiplier: 2,
            ..RateLimiterConfig::default()
        };
        let schedule = config.backoff_schedule();
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
                Duration::from_millis(3_000),
            ]
        );
    }
}
