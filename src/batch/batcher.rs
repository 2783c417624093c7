use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{join_all, try_join_all};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::config::BatchingConfig;
use crate::batch::group::{group_requests, BatchGroup};
use crate::batch::metrics::BatchMetrics;
use crate::batch::request::{BatchRequest, SubmitOptions};
use crate::client::{OperationClient, RequestContext};
use crate::error::{Error, Result};

/// Executes one group's payloads, returning exactly one result per payload in order.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, operation: &str, ctx: &RequestContext, payloads: Vec<Value>) -> Result<Vec<Value>>;
}

/// Default handler: fans the group out over the client concurrently. Any member
/// error fails the whole group.
pub struct ParallelHandler {
    client: Arc<dyn OperationClient>,
}

impl ParallelHandler {
    pub fn new(client: Arc<dyn OperationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchHandler for ParallelHandler {
    async fn handle_batch(&self, operation: &str, ctx: &RequestContext, payloads: Vec<Value>) -> Result<Vec<Value>> {
        try_join_all(
            payloads
                .into_iter()
                .map(|payload| self.client.execute(operation, payload, ctx)),
        )
        .await
    }
}

/// Pending requests for one operation type. `generation` changes whenever the
/// window is drained or re-armed, so a timer only flushes the window it was armed for.
#[derive(Default)]
struct TypeQueue {
    pending: Vec<BatchRequest>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl TypeQueue {
    fn drain(&mut self) -> Vec<BatchRequest> {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        std::mem::take(&mut self.pending)
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Called by an expired timer. A stale timer leaves the current window alone.
    fn expire(&mut self, generation: u64) -> Vec<BatchRequest> {
        if generation != self.generation {
            return Vec::new();
        }
        // this task is the timer; detach rather than abort it
        self.timer.take();
        self.generation += 1;
        std::mem::take(&mut self.pending)
    }
}

pub struct RequestBatcher {
    config: BatchingConfig,
    client: Arc<dyn OperationClient>,
    default_handler: Arc<dyn BatchHandler>,
    handlers: RwLock<HashMap<String, Arc<dyn BatchHandler>>>,
    queues: Mutex<HashMap<String, TypeQueue>>,
    metrics: Mutex<BatchMetrics>,
    this: Weak<RequestBatcher>,
}

impl RequestBatcher {
    pub fn new(config: BatchingConfig, client: Arc<dyn OperationClient>) -> Arc<Self> {
        info!("Creating request batcher for {} operation types", config.types.len());
        Arc::new_cyclic(|this| Self {
            default_handler: Arc::new(ParallelHandler::new(client.clone())),
            config,
            client,
            handlers: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            metrics: Mutex::new(BatchMetrics::default()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    pub fn register_handler(&self, operation: impl Into<String>, handler: Arc<dyn BatchHandler>) {
        let operation = operation.into();
        debug!("Registering batch handler for {}", operation);
        self.handlers.write().insert(operation, handler);
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.metrics.lock().clone()
    }

    pub fn pending_count(&self, operation: &str) -> usize {
        self.queues
            .lock()
            .get(operation)
            .map(|queue| queue.pending.len())
            .unwrap_or(0)
    }

    fn handler_for(&self, operation: &str) -> Arc<dyn BatchHandler> {
        self.handlers
            .read()
            .get(operation)
            .cloned()
            .unwrap_or_else(|| self.default_handler.clone())
    }

    pub async fn submit_request(&self, operation: &str, payload: Value, options: SubmitOptions) -> Result<Value> {
        let type_config = self.config.type_config(operation)?.clone();
        let request_timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());
        self.metrics.lock().total_requests += 1;

        if !type_config.can_batch {
            self.metrics.lock().individual_requests += 1;
            let ctx = options.context();
            return match timeout(request_timeout, self.client.execute(operation, payload, &ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.lock().timeouts += 1;
                    Err(Error::Timeout {
                        request_id: Uuid::new_v4().to_string(),
                        timeout: request_timeout,
                    })
                }
            };
        }

        let (request, receiver) = BatchRequest::new(
            operation,
            payload,
            &options,
            request_timeout,
            type_config.cost_per_operation,
        );
        let request_id = request.id;

        let full_batch = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(operation.to_string()).or_default();
            let was_empty = queue.pending.is_empty();
            queue.pending.push(request);

            if queue.pending.len() >= type_config.max_batch_size {
                Some(queue.drain())
            } else {
                if was_empty {
                    let delay = self.config.flush_delay(&type_config);
                    let generation = queue.next_generation();
                    queue.timer = Some(self.arm_timer(operation.to_string(), delay, generation));
                }
                None
            }
        };

        if let Some(batch) = full_batch {
            debug!("{} queue reached {} requests, flushing", operation, batch.len());
            self.spawn_dispatch(operation.to_string(), batch);
        }

        match timeout(request_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::dispatch(format!(
                "Request {} was dropped before it settled",
                request_id
            ))),
            Err(_) => {
                self.remove_pending(operation, request_id);
                self.metrics.lock().timeouts += 1;
                warn!("Request {} ({}) timed out after {:?}", request_id, operation, request_timeout);
                Err(Error::Timeout {
                    request_id: request_id.to_string(),
                    timeout: request_timeout,
                })
            }
        }
    }

    fn arm_timer(&self, operation: String, delay: Duration, generation: u64) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let Some(batcher) = this.upgrade() else {
                return;
            };
            let batch = {
                let mut queues = batcher.queues.lock();
                match queues.get_mut(&operation) {
                    Some(queue) => queue.expire(generation),
                    None => Vec::new(),
                }
            };
            if !batch.is_empty() {
                debug!("{} window elapsed, flushing {} requests", operation, batch.len());
                batcher.dispatch(&operation, batch).await;
            }
        })
    }

    fn spawn_dispatch(&self, operation: String, batch: Vec<BatchRequest>) {
        match self.this.upgrade() {
            Some(batcher) => {
                tokio::spawn(async move {
                    batcher.dispatch(&operation, batch).await;
                });
            }
            None => {
                for request in batch {
                    request.settle(Err(Error::dispatch("Batcher shut down")));
                }
            }
        }
    }

    fn remove_pending(&self, operation: &str, request_id: Uuid) {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(operation) {
            queue.pending.retain(|request| request.id != request_id);
            if queue.pending.is_empty() {
                queue.drain();
            }
        }
    }

    async fn dispatch(&self, operation: &str, batch: Vec<BatchRequest>) {
        let max_batch_size = |op: &str| {
            self.config
                .types
                .get(op)
                .map(|c| c.max_batch_size)
                .unwrap_or(1)
        };
        let grouping = group_requests(batch, max_batch_size);
        if !grouping.overflow.is_empty() {
            info!("{} requests overflowed their group for {}, running individually", grouping.overflow.len(), operation);
        }

        let groups = grouping.groups.into_iter().map(|group| async move {
            // members were already settled with the failure
            let _ = self.process_batch_group(group).await;
        });
        let singles = grouping.overflow.into_iter().map(|request| self.execute_individual(request));

        futures_util::future::join(join_all(groups), join_all(singles)).await;
    }

    async fn execute_individual(&self, request: BatchRequest) {
        self.metrics.lock().individual_requests += 1;
        let ctx = request.context();
        let result = self
            .client
            .execute(&request.operation, request.payload.clone(), &ctx)
            .await;
        request.settle(result);
    }

    /// Run one group through its handler and settle every member. A handler error,
    /// or a result count that differs from the member count, rejects all members
    /// with the same failure.
    pub async fn process_batch_group(&self, group: BatchGroup) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        let type_config = self.config.type_config(&group.operation)?.clone();
        let handler = self.handler_for(&group.operation);
        let ctx = group.context();
        let size = group.len();
        let payloads: Vec<Value> = group.members.iter().map(|m| m.payload.clone()).collect();

        debug!(
            "Dispatching {} group of {} (role {}, branch {:?})",
            group.operation, size, group.role, group.branch_id
        );
        self.metrics.lock().record_group(size, &type_config, &self.config);

        let outcome = handler.handle_batch(&group.operation, &ctx, payloads).await;
        let cause = match outcome {
            Ok(results) if results.len() == size => {
                for (member, result) in group.members.into_iter().zip(results) {
                    member.settle(Ok(result));
                }
                return Ok(());
            }
            Ok(results) => format!("handler returned {} results for {} requests", results.len(), size),
            Err(e) => e.to_string(),
        };

        warn!("Batch group for {} failed: {}", group.operation, cause);
        self.metrics.lock().group_failures += 1;
        let failure = |cause: String| Error::BatchGroupFailure {
            operation: group.operation.clone(),
            group_size: size,
            cause,
        };
        for member in group.members {
            member.settle(Err(failure(cause.clone())));
        }
        Err(failure(cause))
    }

    /// Flush one operation's queue now and wait for its groups to settle.
    pub async fn flush(&self, operation: &str) {
        let batch = self
            .queues
            .lock()
            .get_mut(operation)
            .map(TypeQueue::drain)
            .unwrap_or_default();
        if !batch.is_empty() {
            self.dispatch(operation, batch).await;
        }
    }

    pub async fn flush_all(&self) {
        let drained: Vec<(String, Vec<BatchRequest>)> = self
            .queues
            .lock()
            .iter_mut()
            .map(|(operation, queue)| (operation.clone(), queue.drain()))
            .filter(|(_, batch)| !batch.is_empty())
            .collect();

        if !drained.is_empty() {
            info!("Flushing {} pending batch queues", drained.len());
        }
        join_all(
            drained
                .into_iter()
                .map(|(operation, batch)| async move { self.dispatch(&operation, batch).await }),
        )
        .await;
    }
}

#[async_trait]
impl OperationClient for RequestBatcher {
    async fn execute(&self, operation: &str, payload: Value, ctx: &RequestContext) -> Result<Value> {
        self.submit_request(operation, payload, SubmitOptions::from(ctx)).await
    }
}
