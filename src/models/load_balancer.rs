use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::circuit_breaker::CircuitBreaker;
use crate::models::provider::{GenerationConfig, ModelProvider, ProviderResponse, TaskRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    /// Budget for a single provider attempt; expiry counts as a breaker failure.
    pub request_timeout_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 60,
            request_timeout_ms: 30_000,
        }
    }
}

struct ExternalProvider {
    provider: Arc<dyn ModelProvider>,
    breaker: CircuitBreaker,
}

/// Tier-3 pool of external providers. Calls rotate their starting provider and
/// then walk the pool sequentially, skipping providers whose breaker is open.
pub struct ExternalLoadBalancer {
    providers: Vec<ExternalProvider>,
    next: AtomicUsize,
    config: LoadBalancerConfig,
}

impl ExternalLoadBalancer {
    pub fn new(config: LoadBalancerConfig) -> Self {
        Self {
            providers: Vec::new(),
            next: AtomicUsize::new(0),
            config,
        }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn ModelProvider>) {
        let name = provider.get_provider_name().to_string();
        info!("Adding external provider to tier-3 pool: {}", name);
        let breaker = CircuitBreaker::new(
            name,
            self.config.failure_threshold,
            Duration::from_secs(self.config.recovery_timeout_secs),
        );
        self.providers.push(ExternalProvider { provider, breaker });
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.provider.get_provider_name().to_string())
            .collect()
    }

    pub async fn execute_request(
        &self,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse> {
        if self.providers.is_empty() {
            return Err(Error::model_provider("No external providers configured"));
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.providers.len();
        let budget = Duration::from_millis(self.config.request_timeout_ms);
        let mut last_error = None;
        let mut skipped = 0;

        for offset in 0..self.providers.len() {
            let external = &self.providers[(start + offset) % self.providers.len()];
            let name = external.provider.get_provider_name();

            let outcome = external
                .breaker
                .call(|| async move {
                    let response = match timeout(budget, external.provider.execute_request(task, prompt, config)).await {
                        Ok(result) => result?,
                        Err(_) => {
                            return Err(Error::model_provider(format!(
                                "{} timed out after {}ms",
                                name, self.config.request_timeout_ms
                            )))
                        }
                    };
                    if response.success {
                        Ok(response)
                    } else {
                        let message = response.error.unwrap_or_else(|| "unsuccessful response".to_string());
                        Err(Error::model_provider(format!("{}: {}", name, message)))
                    }
                })
                .await;

            match outcome {
                Ok(response) => {
                    info!("External provider {} answered tier-3 request", name);
                    return Ok(response);
                }
                Err(Error::CircuitBreakerOpen(_)) => {
                    debug!("Skipping external provider {}: circuit open", name);
                    skipped += 1;
                }
                Err(e) => {
                    warn!("External provider {} failed: {}", name, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            // every breaker was open, nothing was attempted
            None if skipped == self.providers.len() => Err(Error::CircuitBreakerOpen(format!(
                "all {} external providers",
                self.providers.len()
            ))),
            last_error => Err(Error::model_provider(format!(
                "All {} external providers failed: {}",
                self.providers.len(),
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ))),
        }
    }
}
