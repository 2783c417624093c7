use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::config::AppConfig;
use crate::batch::{BatchHandler, RequestBatcher, SubmitOptions};
use crate::cache::IntelligentCache;
use crate::client::{CachedClient, OperationClient, RequestContext};
use crate::error::Result;
use crate::models::{
    ExternalLoadBalancer, FallbackAttempt, FallbackRouter, GenerationConfig, ModelProvider, ModelRegistry,
    ProviderResponse, TaskRequest,
};
use crate::storage::{AuditSink, Database, SqliteAuditSink, TracingAuditSink};

/// Provider adapters handed to the service at startup.
#[derive(Default, Clone)]
pub struct ProviderSet {
    /// Adapters serving registry models, keyed by their provider name.
    pub primary: Vec<Arc<dyn ModelProvider>>,
    /// Tier-3 pool tried after both model tiers are exhausted.
    pub external: Vec<Arc<dyn ModelProvider>>,
}

/// Everything the rest of the application talks to: the model router, and the
/// cache-then-batch pipeline in front of the business backend.
pub struct DispatchService {
    config: AppConfig,
    router: Arc<FallbackRouter>,
    cache: Arc<IntelligentCache>,
    batcher: Arc<RequestBatcher>,
    client: CachedClient<Arc<RequestBatcher>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchService {
    pub async fn new(config: AppConfig, backend: Arc<dyn OperationClient>, providers: ProviderSet) -> Result<Self> {
        info!("Initializing dispatch service");
        config.validate()?;

        let registry = Arc::new(ModelRegistry::builtin().with_rate_limit_overrides(&config.router.rate_limits)?);
        let mut router = FallbackRouter::new(
            registry,
            config.rate_limiting.clone(),
            config.router.fallback.clone(),
        );
        for provider in providers.primary {
            router.add_provider(provider);
        }

        if !providers.external.is_empty() {
            let mut balancer = ExternalLoadBalancer::new(config.router.load_balancer.clone());
            for provider in providers.external {
                balancer.add_provider(provider);
            }
            router.set_external_balancer(Arc::new(balancer));
        }

        router.set_audit_sink(Self::open_audit_sink(&config).await?);

        let cache = Arc::new(IntelligentCache::new(config.cache.clone()));
        let cleanup = cache.spawn_cleanup();
        let batcher = RequestBatcher::new(config.batching.clone(), backend);
        let client = CachedClient::new(batcher.clone(), cache.clone(), config.cache_policy.clone());

        Ok(Self {
            config,
            router: Arc::new(router),
            cache,
            batcher,
            client,
            cleanup: Mutex::new(Some(cleanup)),
        })
    }

    async fn open_audit_sink(config: &AppConfig) -> Result<Arc<dyn AuditSink>> {
        match (&config.audit.database, config.audit.enabled) {
            (Some(path), true) => {
                let database = Database::open(path).await?;
                Ok(Arc::new(SqliteAuditSink::new(database.get_pool())))
            }
            _ => {
                debug!("Audit rows go to the log only");
                Ok(Arc::new(TracingAuditSink))
            }
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<FallbackRouter> {
        &self.router
    }

    pub fn cache(&self) -> &Arc<IntelligentCache> {
        &self.cache
    }

    pub fn batcher(&self) -> &Arc<RequestBatcher> {
        &self.batcher
    }

    pub fn register_batch_handler(&self, operation: &str, handler: Arc<dyn BatchHandler>) {
        self.batcher.register_handler(operation, handler);
    }

    pub async fn execute_with_fallback(
        &self,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<(ProviderResponse, Vec<FallbackAttempt>)> {
        self.router.execute_with_fallback(task, prompt, config).await
    }

    /// Domain operation through the cache, then the batcher.
    pub async fn submit_request(&self, operation: &str, payload: Value, options: SubmitOptions) -> Result<Value> {
        self.client.execute(operation, payload, &options.context()).await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down dispatch service");
        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup.abort();
        }
        self.batcher.flush_all().await;
    }
}

#[async_trait::async_trait]
impl OperationClient for DispatchService {
    async fn execute(&self, operation: &str, payload: Value, ctx: &RequestContext) -> Result<Value> {
        self.client.execute(operation, payload, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Complexity, Priority, ResponseMetadata, TaskType};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct StockBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OperationClient for StockBackend {
        async fn execute(&self, operation: &str, payload: Value, _ctx: &RequestContext) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "operation": operation, "payload": payload }))
        }
    }

    struct NamedProvider {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl ModelProvider for NamedProvider {
        async fn execute_request(
            &self,
            _task: &TaskRequest,
            _prompt: &str,
            config: &GenerationConfig,
        ) -> Result<ProviderResponse> {
            if self.fail {
                return Err(Error::model_provider("503 from upstream"));
            }
            Ok(ProviderResponse::success(
                config.model.clone().unwrap_or_else(|| self.name.to_string()),
                "ok",
                ResponseMetadata {
                    tokens_used: 10,
                    processing_time_ms: 1,
                },
            ))
        }

        fn get_provider_name(&self) -> &str {
            self.name
        }
    }

    async fn service(providers: ProviderSet) -> (DispatchService, Arc<StockBackend>) {
        let backend = Arc::new(StockBackend::default());
        let service = DispatchService::new(AppConfig::default(), backend.clone(), providers)
            .await
            .unwrap();
        (service, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_are_cached_and_writes_invalidate() {
        let (service, backend) = service(ProviderSet::default()).await;
        let options = SubmitOptions::new("manager", Some("north".to_string()));

        let first = service
            .submit_request("forecast_stock", json!({"days": 7}), options.clone())
            .await
            .unwrap();
        let start = Instant::now();
        let second = service
            .submit_request("forecast_stock", json!({"days": 7}), options.clone())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        service
            .submit_request("apply_to_stock", json!({"delta": 12}), options.clone())
            .await
            .unwrap();
        assert!(service.cache().is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_fallback_reaches_external_pool() {
        let providers = ProviderSet {
            primary: vec![Arc::new(NamedProvider { name: "gemini", fail: true })],
            external: vec![Arc::new(NamedProvider { name: "backup-vendor", fail: false })],
        };
        let (service, _) = service(providers).await;
        let task = TaskRequest::new(TaskType::Text, Complexity::Medium, Priority::Medium);

        let (response, attempts) = service
            .execute_with_fallback(&task, "summarise today's egg count", &GenerationConfig::default())
            .await
            .unwrap();

        assert_eq!(response.model, "backup-vendor");
        assert!(attempts.last().unwrap().succeeded());
        assert!(attempts.len() > 1);
    }

    #[tokio::test]
    async fn test_sqlite_audit_sink_used_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.audit.database = Some(dir.path().join("audit.db"));

        let providers = ProviderSet {
            primary: vec![Arc::new(NamedProvider { name: "gemini", fail: false })],
            external: Vec::new(),
        };
        let service = DispatchService::new(config, Arc::new(StockBackend::default()), providers)
            .await
            .unwrap();
        let task = TaskRequest::new(TaskType::Analysis, Complexity::Simple, Priority::Low);
        service
            .execute_with_fallback(&task, "count feed bags", &GenerationConfig::default())
            .await
            .unwrap();

        let db = Database::open(&dir.path().join("audit.db")).await.unwrap();
        assert_eq!(SqliteAuditSink::new(db.get_pool()).count().await.unwrap(), 1);
        service.shutdown().await;
    }
}
