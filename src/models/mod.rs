pub mod circuit_breaker;
pub mod fallback;
pub mod gemini;
pub mod load_balancer;
pub mod provider;
pub mod rate_limiter;
pub mod registry;
pub mod selector;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use fallback::{AttemptOutcome, FallbackAttempt, FallbackConfig, FallbackRouter};
pub use gemini::GeminiProvider;
pub use load_balancer::{ExternalLoadBalancer, LoadBalancerConfig};
pub use provider::{
    Complexity, GenerationConfig, ModelProvider, Priority, ProviderResponse, ResponseMetadata,
    SafetyThreshold, TaskRequest, TaskType,
};
pub use rate_limiter::{RateLimitDecision, RateLimiterConfig, UsageLedger, UsageStatus};
pub use registry::{CostTier, ModelDescriptor, ModelFeature, ModelRegistry, RateLimit};
pub use selector::{get_model_fallback_chain, select_optimal_model, FallbackChain, Tier};
