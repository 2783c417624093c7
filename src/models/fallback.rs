use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::models::load_balancer::ExternalLoadBalancer;
use crate::models::provider::{GenerationConfig, ModelProvider, ProviderResponse, TaskRequest};
use crate::models::rate_limiter::{RateLimiterConfig, UsageLedger};
use crate::models::registry::ModelRegistry;
use crate::models::selector::{get_model_fallback_chain, FallbackChain, Tier};
use crate::storage::{record_quietly, AuditRecord, AuditSink, TracingAuditSink};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub request_timeout_ms: u64,
    pub enable_external_tier: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            enable_external_tier: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Succeeded,
    Throttled { wait_time: Duration },
    Failed { error: String },
    /// Nothing was called: every external breaker was open.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackAttempt {
    pub model: String,
    pub tier: Tier,
    pub attempt_number: usize,
    pub outcome: AttemptOutcome,
    pub response_time_ms: Option<u64>,
}

impl FallbackAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

/// Walks tier-1 and tier-2 models, then hands off to the external pool.
pub struct FallbackRouter {
    registry: Arc<ModelRegistry>,
    ledger: UsageLedger,
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    external: Option<Arc<ExternalLoadBalancer>>,
    audit: Arc<dyn AuditSink>,
    config: FallbackConfig,
}

impl FallbackRouter {
    pub fn new(registry: Arc<ModelRegistry>, rate_limits: RateLimiterConfig, config: FallbackConfig) -> Self {
        Self {
            ledger: UsageLedger::new(registry.clone(), rate_limits),
            registry,
            providers: HashMap::new(),
            external: None,
            audit: Arc::new(TracingAuditSink),
            config,
        }
    }

    /// Register the adapter that serves every model whose descriptor names `provider`.
    pub fn add_provider(&mut self, provider: Arc<dyn ModelProvider>) {
        let name = provider.get_provider_name().to_string();
        debug!("Adding provider to router: {}", name);
        self.providers.insert(name, provider);
    }

    pub fn set_external_balancer(&mut self, balancer: Arc<ExternalLoadBalancer>) {
        self.external = Some(balancer);
    }

    pub fn set_audit_sink(&mut self, audit: Arc<dyn AuditSink>) {
        self.audit = audit;
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn fallback_chain(&self, task: &TaskRequest) -> FallbackChain {
        get_model_fallback_chain(task)
    }

    fn provider_for(&self, model_id: &str) -> Result<&Arc<dyn ModelProvider>> {
        let descriptor = self.registry.require(model_id)?;
        self.providers.get(&descriptor.provider).ok_or_else(|| {
            Error::model_provider(format!(
                "No provider registered for {} (needed by {})",
                descriptor.provider, model_id
            ))
        })
    }

    async fn call_model(
        &self,
        provider: &Arc<dyn ModelProvider>,
        model_id: &str,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse> {
        let pinned = config.for_model(model_id);
        let budget = Duration::from_millis(self.config.request_timeout_ms);

        let response = match timeout(budget, provider.execute_request(task, prompt, &pinned)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::model_provider(format!(
                    "{} timed out after {}ms",
                    model_id, self.config.request_timeout_ms
                )))
            }
        };

        if !response.success {
            return Err(Error::model_provider(
                response
                    .error
                    .unwrap_or_else(|| format!("{} returned an unsuccessful response", model_id)),
            ));
        }

        self.ledger
            .record_actual_tokens(model_id, task.token_estimate(), response.metadata.tokens_used);
        Ok(response)
    }

    /// Try every tier-1 candidate, then every tier-2 candidate, then the external
    /// pool. Throttled candidates are skipped without waiting.
    pub async fn execute_with_fallback(
        &self,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<(ProviderResponse, Vec<FallbackAttempt>)> {
        let chain = self.fallback_chain(task);
        info!(
            "Dispatching {:?}/{:?} task across {} candidates",
            task.task_type,
            task.complexity,
            chain.len()
        );

        let started = Instant::now();
        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        let mut last_error: Option<Error> = None;

        for tier in [Tier::Primary, Tier::Secondary] {
            for model_id in chain.tier(tier) {
                let provider = match self.provider_for(model_id) {
                    Ok(provider) => provider,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("{} candidate {} unavailable: {}", tier, model_id, e);
                        attempts.push(FallbackAttempt {
                            model: model_id.clone(),
                            tier,
                            attempt_number: attempts.len() + 1,
                            outcome: AttemptOutcome::Failed { error: e.to_string() },
                            response_time_ms: None,
                        });
                        last_error = Some(e);
                        continue;
                    }
                };

                let decision = self.ledger.try_acquire(model_id, task.token_estimate())?;
                if !decision.allowed {
                    let wait_time = decision.wait_time.unwrap_or_default();
                    debug!("Skipping throttled {} candidate {}", tier, model_id);
                    attempts.push(FallbackAttempt {
                        model: model_id.clone(),
                        tier,
                        attempt_number: attempts.len() + 1,
                        outcome: AttemptOutcome::Throttled { wait_time },
                        response_time_ms: None,
                    });
                    last_error = Some(Error::rate_limited(model_id.clone(), wait_time));
                    continue;
                }

                let attempt_start = Instant::now();
                match self.call_model(provider, model_id, task, prompt, config).await {
                    Ok(response) => {
                        let elapsed = attempt_start.elapsed().as_millis() as u64;
                        attempts.push(FallbackAttempt {
                            model: model_id.clone(),
                            tier,
                            attempt_number: attempts.len() + 1,
                            outcome: AttemptOutcome::Succeeded,
                            response_time_ms: Some(elapsed),
                        });
                        info!("Request served by {} ({}) in {}ms", model_id, tier, elapsed);
                        self.audit_outcome(task, Some(&response), tier, &attempts, started, None)
                            .await;
                        return Ok((response, attempts));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("{} candidate {} failed: {}", tier, model_id, e);
                        attempts.push(FallbackAttempt {
                            model: model_id.clone(),
                            tier,
                            attempt_number: attempts.len() + 1,
                            outcome: AttemptOutcome::Failed { error: e.to_string() },
                            response_time_ms: Some(attempt_start.elapsed().as_millis() as u64),
                        });
                        last_error = Some(e);
                    }
                }
            }
            warn!("{} exhausted for {:?} task", tier, task.task_type);
        }

        if let Some(external) = self.external.as_ref().filter(|_| self.config.enable_external_tier) {
            let attempt_start = Instant::now();
            let result = external.execute_request(task, prompt, config).await;
            let elapsed = attempt_start.elapsed().as_millis() as u64;
            match result {
                Ok(response) => {
                    attempts.push(FallbackAttempt {
                        model: response.model.clone(),
                        tier: Tier::External,
                        attempt_number: attempts.len() + 1,
                        outcome: AttemptOutcome::Succeeded,
                        response_time_ms: Some(elapsed),
                    });
                    self.audit_outcome(task, Some(&response), Tier::External, &attempts, started, None)
                        .await;
                    return Ok((response, attempts));
                }
                Err(Error::CircuitBreakerOpen(reason)) => {
                    warn!("External tier skipped: {} open", reason);
                    attempts.push(FallbackAttempt {
                        model: "external".to_string(),
                        tier: Tier::External,
                        attempt_number: attempts.len() + 1,
                        outcome: AttemptOutcome::Unavailable { reason },
                        response_time_ms: None,
                    });
                }
                Err(e) => {
                    attempts.push(FallbackAttempt {
                        model: "external".to_string(),
                        tier: Tier::External,
                        attempt_number: attempts.len() + 1,
                        outcome: AttemptOutcome::Failed { error: e.to_string() },
                        response_time_ms: Some(elapsed),
                    });
                    last_error = Some(e);
                }
            }
        }

        error!(
            "All fallback tiers failed for {:?} task after {} attempts",
            task.task_type,
            attempts.len()
        );
        let last_error = last_error.map(|e| e.to_string()).unwrap_or_else(|| "no candidates".to_string());
        self.audit_outcome(task, None, Tier::External, &attempts, started, Some(&last_error))
            .await;

        // an external tier that never ran does not hide a fully throttled chain
        let all_throttled = attempts
            .iter()
            .any(|a| matches!(a.outcome, AttemptOutcome::Throttled { .. }))
            && attempts.iter().all(|a| {
                matches!(
                    a.outcome,
                    AttemptOutcome::Throttled { .. } | AttemptOutcome::Unavailable { .. }
                )
            });
        if all_throttled {
            let shortest = attempts
                .iter()
                .filter_map(|a| match a.outcome {
                    AttemptOutcome::Throttled { wait_time } => Some((a.model.clone(), wait_time)),
                    _ => None,
                })
                .min_by_key(|(_, wait)| *wait);
            if let Some((model, wait_time)) = shortest {
                return Err(Error::rate_limited(model, wait_time));
            }
        }

        Err(Error::FallbackExhausted {
            attempts: attempts.len(),
            last_error,
        })
    }

    /// Single-model path: waits out throttling up to `max_attempts` times.
    /// Provider failures come back as an unsuccessful response rather than an error.
    pub async fn make_intelligent_request(
        &self,
        model_id: &str,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse> {
        let provider = match self.provider_for(model_id) {
            Ok(provider) => provider,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Single-model request to {} failed: {}", model_id, e);
                return Ok(ProviderResponse::failure(model_id, e.to_string()));
            }
        };

        let policy = self.ledger.config();
        let max_attempts = policy.max_attempts.max(1);
        let mut backoff = policy.backoff_schedule().into_iter();
        let max_delay = Duration::from_millis(policy.backoff_max_delay_ms);

        let mut attempt = 1;
        loop {
            let decision = self.ledger.try_acquire(model_id, task.token_estimate())?;
            if decision.allowed {
                let started = Instant::now();
                let result = self.call_model(provider, model_id, task, prompt, config).await;
                let (response, error) = match result {
                    Ok(response) => (response, None),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Single-model request to {} failed: {}", model_id, e);
                        (ProviderResponse::failure(model_id, e.to_string()), Some(e.to_string()))
                    }
                };
                let attempts = vec![FallbackAttempt {
                    model: model_id.to_string(),
                    tier: Tier::Primary,
                    attempt_number: attempt as usize,
                    outcome: match &error {
                        None => AttemptOutcome::Succeeded,
                        Some(e) => AttemptOutcome::Failed { error: e.clone() },
                    },
                    response_time_ms: Some(started.elapsed().as_millis() as u64),
                }];
                self.audit_outcome(task, Some(&response), Tier::Primary, &attempts, started, error.as_deref())
                    .await;
                return Ok(response);
            }

            let wait_time = decision.wait_time.unwrap_or_default();
            if attempt >= max_attempts {
                warn!(
                    "Giving up on {} after {} throttled attempts",
                    model_id, attempt
                );
                return Err(Error::rate_limited(model_id, wait_time));
            }

            let step = backoff.next().unwrap_or(max_delay);
            let delay = wait_time.max(step).min(max_delay);
            info!(
                "{} throttled (attempt {}/{}), waiting {:?}",
                model_id, attempt, max_attempts, delay
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn audit_outcome(
        &self,
        task: &TaskRequest,
        response: Option<&ProviderResponse>,
        tier: Tier,
        attempts: &[FallbackAttempt],
        started: Instant,
        error: Option<&str>,
    ) {
        let mut record = AuditRecord::new("ai_request", response.map(|r| r.success).unwrap_or(false));
        record.task_type = Some(format!("{:?}", task.task_type));
        record.model = response.map(|r| r.model.clone());
        record.tier = Some(tier.to_string());
        record.tokens_used = response.map(|r| r.metadata.tokens_used).unwrap_or(0);
        record.processing_time_ms = started.elapsed().as_millis() as u64;
        record.attempts = attempts.len() as u32;
        record.error = error.map(str::to_string);
        record_quietly(self.audit.as_ref(), &record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::load_balancer::LoadBalancerConfig;
    use crate::models::provider::{Complexity, Priority, ResponseMetadata, TaskType};
    use crate::models::registry::{RateLimit, GEMINI_PROVIDER};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};

    /// Records every model it is asked for; fails for models in `failing`.
    struct ScriptedProvider {
        name: &'static str,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name,
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn execute_request(
            &self,
            _task: &TaskRequest,
            prompt: &str,
            config: &GenerationConfig,
        ) -> Result<ProviderResponse> {
            let model = config.model.clone().unwrap_or_else(|| self.name.to_string());
            self.calls.lock().push(model.clone());
            if self.failing.contains(&model) || self.failing.contains("*") {
                return Err(Error::model_provider(format!("{} is down", model)));
            }
            Ok(ProviderResponse::success(
                model,
                format!("echo: {}", prompt),
                ResponseMetadata {
                    tokens_used: 42,
                    processing_time_ms: 5,
                },
            ))
        }

        fn get_provider_name(&self) -> &str {
            self.name
        }
    }

    fn router(provider: Arc<ScriptedProvider>) -> FallbackRouter {
        let mut router = FallbackRouter::new(
            Arc::new(ModelRegistry::builtin()),
            RateLimiterConfig::default(),
            FallbackConfig::default(),
        );
        router.add_provider(provider);
        router
    }

    fn simple_task() -> TaskRequest {
        TaskRequest::new(TaskType::Text, Complexity::Simple, Priority::Medium)
    }

    #[tokio::test]
    async fn test_first_candidate_succeeds() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &[]);
        let router = router(provider.clone());

        let (response, attempts) = router
            .execute_with_fallback(&simple_task(), "count hens", &GenerationConfig::default())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.model, "gemini-2.5-flash-lite");
        assert_eq!(attempts.len(), 1);
        assert_eq!(provider.calls(), vec!["gemini-2.5-flash-lite"]);
    }

    #[tokio::test]
    async fn test_tier_order_is_exhaustive() {
        let provider = ScriptedProvider::new(
            GEMINI_PROVIDER,
            &[
                "gemini-2.5-flash-lite",
                "gemini-2.0-flash-lite",
                "gemini-2.0-flash",
                "gemini-1.5-flash",
            ],
        );
        let router = router(provider.clone());

        let (response, attempts) = router
            .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(response.model, "gemini-1.5-pro");
        assert_eq!(
            provider.calls(),
            vec![
                "gemini-2.5-flash-lite",
                "gemini-2.0-flash-lite",
                "gemini-2.0-flash",
                "gemini-1.5-flash",
                "gemini-1.5-pro",
            ]
        );
        let tiers: Vec<Tier> = attempts.iter().map(|a| a.tier).collect();
        assert!(tiers.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_external_tier_after_both_tiers() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &["*"]);
        let external = ScriptedProvider::new("openrouter", &[]);
        let mut router = router(provider.clone());
        let mut balancer = ExternalLoadBalancer::new(LoadBalancerConfig::default());
        balancer.add_provider(external.clone());
        router.set_external_balancer(Arc::new(balancer));

        let (_, attempts) = router
            .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(provider.calls().len(), 5);
        assert_eq!(external.calls().len(), 1);
        assert_eq!(attempts.last().unwrap().tier, Tier::External);
        assert!(attempts.last().unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_error() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &["*"]);
        let external = ScriptedProvider::new("openrouter", &["*"]);
        let mut router = router(provider);
        let mut balancer = ExternalLoadBalancer::new(LoadBalancerConfig::default());
        balancer.add_provider(external);
        router.set_external_balancer(Arc::new(balancer));

        let err = router
            .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FallbackExhausted { attempts: 6, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixteenth_simple_request_moves_on() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &[]);
        let router = router(provider.clone());

        for i in 0..16 {
            let (response, attempts) = router
                .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
                .await
                .unwrap();
            if i < 15 {
                assert_eq!(response.model, "gemini-2.5-flash-lite");
            } else {
                assert_eq!(response.model, "gemini-2.0-flash-lite");
                assert!(matches!(attempts[0].outcome, AttemptOutcome::Throttled { .. }));
            }
            tokio::time::advance(Duration::from_millis(600)).await;
        }
        assert_eq!(provider.calls().len(), 16);
    }

    #[tokio::test]
    async fn test_missing_provider_is_recovered_by_external() {
        let external = ScriptedProvider::new("openrouter", &[]);
        let mut router = FallbackRouter::new(
            Arc::new(ModelRegistry::builtin()),
            RateLimiterConfig::default(),
            FallbackConfig::default(),
        );
        let mut balancer = ExternalLoadBalancer::new(LoadBalancerConfig::default());
        balancer.add_provider(external.clone());
        router.set_external_balancer(Arc::new(balancer));

        let (response, attempts) = router
            .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(response.model, "openrouter");
        assert_eq!(attempts.len(), 6);

        // unreachable candidates do not spend rate-limit budget
        for model in router.fallback_chain(&simple_task()).tier1 {
            assert_eq!(router.ledger().get_status(&model).unwrap().request_count, 0);
        }
    }

    #[tokio::test]
    async fn test_intelligent_request_without_provider_keeps_budget() {
        let router = FallbackRouter::new(
            Arc::new(ModelRegistry::builtin()),
            RateLimiterConfig::default(),
            FallbackConfig::default(),
        );

        let response = router
            .make_intelligent_request("gemini-2.0-flash", &simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(
            router.ledger().get_status("gemini-2.0-flash").unwrap().request_count,
            0
        );
    }

    #[tokio::test]
    async fn test_throttled_chain_with_open_external_breaker_is_rate_limited() {
        let chain = get_model_fallback_chain(&simple_task());
        let overrides: BTreeMap<String, RateLimit> = chain
            .tier1
            .iter()
            .chain(chain.tier2.iter())
            .map(|id| (id.clone(), RateLimit { rpm: 1, tpm: 1_000_000 }))
            .collect();
        let registry = ModelRegistry::builtin().with_rate_limit_overrides(&overrides).unwrap();

        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &["*"]);
        let external = ScriptedProvider::new("openrouter", &["*"]);
        let mut router = FallbackRouter::new(
            Arc::new(registry),
            RateLimiterConfig::default(),
            FallbackConfig::default(),
        );
        router.add_provider(provider.clone());
        let mut balancer = ExternalLoadBalancer::new(LoadBalancerConfig {
            failure_threshold: 1,
            ..LoadBalancerConfig::default()
        });
        balancer.add_provider(external.clone());
        router.set_external_balancer(Arc::new(balancer));

        // spends every model's single slot and trips the external breaker
        let first = router
            .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(first, Error::FallbackExhausted { attempts: 6, .. }));

        let second = router
            .execute_with_fallback(&simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap_err();
        match second {
            Error::RateLimited { wait_time, .. } => assert!(wait_time > Duration::ZERO),
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert_eq!(provider.calls().len(), 5);
        assert_eq!(external.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intelligent_request_waits_then_succeeds() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &[]);
        let router = router(provider.clone());
        let task = TaskRequest::new(TaskType::Analysis, Complexity::Complex, Priority::High);

        for _ in 0..5 {
            router
                .make_intelligent_request("gemini-2.5-pro", &task, "p", &GenerationConfig::default())
                .await
                .unwrap();
        }

        let before = Instant::now();
        let response = router
            .make_intelligent_request("gemini-2.5-pro", &task, "p", &GenerationConfig::default())
            .await
            .unwrap();
        assert!(response.success);
        assert!(before.elapsed() >= Duration::from_secs(60));
        assert_eq!(provider.calls().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intelligent_request_is_bounded() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &[]);
        let mut router = FallbackRouter::new(
            Arc::new(ModelRegistry::builtin()),
            RateLimiterConfig {
                max_attempts: 2,
                backoff_max_delay_ms: 1_000,
                ..RateLimiterConfig::default()
            },
            FallbackConfig::default(),
        );
        router.add_provider(provider.clone());
        let task = TaskRequest::new(TaskType::Analysis, Complexity::Complex, Priority::High);

        // burn the 2-rpm budget of gemini-1.5-pro
        for _ in 0..2 {
            router
                .make_intelligent_request("gemini-1.5-pro", &task, "p", &GenerationConfig::default())
                .await
                .unwrap();
        }

        let before = Instant::now();
        let err = router
            .make_intelligent_request("gemini-1.5-pro", &task, "p", &GenerationConfig::default())
            .await
            .unwrap_err();
        match err {
            Error::RateLimited { model, wait_time } => {
                assert_eq!(model, "gemini-1.5-pro");
                assert!(wait_time > Duration::ZERO);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
        // one capped wait between the two attempts
        assert_eq!(before.elapsed(), Duration::from_millis(1_000));
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_intelligent_request_provider_failure_is_structured() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &["gemini-2.0-flash"]);
        let router = router(provider);

        let response = router
            .make_intelligent_request(
                "gemini-2.0-flash",
                &simple_task(),
                "p",
                &GenerationConfig::default(),
            )
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("is down"));
    }

    #[tokio::test]
    async fn test_unknown_model_fails_fast() {
        let provider = ScriptedProvider::new(GEMINI_PROVIDER, &[]);
        let router = router(provider.clone());
        let err = router
            .make_intelligent_request("gpt-4", &simple_task(), "p", &GenerationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
        assert!(provider.calls().is_empty());
    }
}
