use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::cache::IntelligentCache;
use crate::error::Result;
use crate::models::Priority;

/// Caller identity and scheduling hints carried with every domain operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub role: String,
    pub branch_id: Option<String>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl RequestContext {
    pub fn new(role: impl Into<String>, branch_id: Option<String>) -> Self {
        Self {
            role: role.into(),
            branch_id,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Business operations (note parsing, stock apply, forecasts, search). The
/// dispatch layer only moves payloads through this seam.
#[async_trait]
pub trait OperationClient: Send + Sync {
    async fn execute(&self, operation: &str, payload: Value, ctx: &RequestContext) -> Result<Value>;
}

#[async_trait]
impl<T: OperationClient + ?Sized> OperationClient for Arc<T> {
    async fn execute(&self, operation: &str, payload: Value, ctx: &RequestContext) -> Result<Value> {
        (**self).execute(operation, payload, ctx).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub cacheable: BTreeSet<String>,
    /// Mutating operation -> substrings of cache keys it makes stale.
    pub invalidates: BTreeMap<String, Vec<String>>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        let cacheable = [
            "get_stock",
            "forecast_stock",
            "parse_notes",
            "search_inventory",
            "get_branches",
            "generate_embedding",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut invalidates = BTreeMap::new();
        invalidates.insert(
            "apply_to_stock".to_string(),
            vec!["get_stock".to_string(), "forecast_stock".to_string()],
        );
        invalidates.insert(
            "update_branch".to_string(),
            vec!["get_branches".to_string()],
        );

        Self {
            cacheable,
            invalidates,
        }
    }
}

/// Read-through cache in front of another client.
pub struct CachedClient<C> {
    inner: C,
    cache: Arc<IntelligentCache>,
    policy: CachePolicy,
}

impl<C: OperationClient> CachedClient<C> {
    pub fn new(inner: C, cache: Arc<IntelligentCache>, policy: CachePolicy) -> Self {
        Self {
            inner,
            cache,
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<IntelligentCache> {
        &self.cache
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    // branch-scoped reads must not leak across branches
    fn cache_params(payload: &Value, ctx: &RequestContext) -> Value {
        json!({ "branch_id": ctx.branch_id, "payload": payload })
    }
}

#[async_trait]
impl<C: OperationClient> OperationClient for CachedClient<C> {
    async fn execute(&self, operation: &str, payload: Value, ctx: &RequestContext) -> Result<Value> {
        if self.policy.cacheable.contains(operation) {
            let params = Self::cache_params(&payload, ctx);
            if let Some(hit) = self.cache.get(operation, &params) {
                debug!("Cache hit for {}", operation);
                return Ok(hit);
            }

            let result = self.inner.execute(operation, payload, ctx).await?;
            self.cache.set(operation, &params, result.clone(), None);
            return Ok(result);
        }

        let result = self.inner.execute(operation, payload, ctx).await?;

        if let Some(patterns) = self.policy.invalidates.get(operation) {
            let removed: usize = patterns.iter().map(|p| self.cache.invalidate(p)).sum();
            debug!("{} invalidated {} cached entries", operation, removed);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OperationClient for CountingClient {
        async fn execute(&self, operation: &str, payload: Value, _ctx: &RequestContext) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if operation == "explode" {
                return Err(Error::dispatch("backend down"));
            }
            Ok(json!({ "operation": operation, "payload": payload, "call": n }))
        }
    }

    fn client() -> CachedClient<Arc<CountingClient>> {
        CachedClient::new(
            Arc::new(CountingClient::default()),
            Arc::new(IntelligentCache::new(CacheConfig::default())),
            CachePolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_cacheable_reads_hit_cache() {
        let client = client();
        let ctx = RequestContext::new("manager", Some("north".into()));

        let first = client.execute("get_stock", json!({"sku": "eggs"}), &ctx).await.unwrap();
        let second = client.execute("get_stock", json!({"sku": "eggs"}), &ctx).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_branches_do_not_share_entries() {
        let client = client();
        let north = RequestContext::new("manager", Some("north".into()));
        let south = RequestContext::new("manager", Some("south".into()));

        client.execute("get_stock", json!({}), &north).await.unwrap();
        client.execute("get_stock", json!({}), &south).await.unwrap();
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_dependent_reads() {
        let client = client();
        let ctx = RequestContext::new("worker", Some("north".into()));

        client.execute("get_stock", json!({}), &ctx).await.unwrap();
        client.execute("forecast_stock", json!({"days": 7}), &ctx).await.unwrap();
        client.execute("parse_notes", json!({"text": "sold 2 trays"}), &ctx).await.unwrap();
        assert_eq!(client.cache().len(), 3);

        client.execute("apply_to_stock", json!({"delta": -2}), &ctx).await.unwrap();
        assert_eq!(client.cache().len(), 1);

        client.execute("get_stock", json!({}), &ctx).await.unwrap();
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let client = CachedClient::new(
            Arc::new(CountingClient::default()),
            Arc::new(IntelligentCache::new(CacheConfig::default())),
            CachePolicy {
                cacheable: ["explode".to_string()].into_iter().collect(),
                invalidates: BTreeMap::new(),
            },
        );
        let ctx = RequestContext::default();

        assert!(client.execute("explode", json!({}), &ctx).await.is_err());
        assert!(client.cache().is_empty());
    }
}
