use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::RequestContext;
use crate::error::Result;
use crate::models::Priority;

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub role: String,
    pub branch_id: Option<String>,
    pub priority: Option<Priority>,
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new(role: impl Into<String>, branch_id: Option<String>) -> Self {
        Self {
            role: role.into(),
            branch_id,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            role: self.role.clone(),
            branch_id: self.branch_id.clone(),
            priority: self.priority.unwrap_or_default(),
            timeout: self.timeout,
        }
    }
}

impl From<&RequestContext> for SubmitOptions {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            role: ctx.role.clone(),
            branch_id: ctx.branch_id.clone(),
            priority: Some(ctx.priority),
            timeout: ctx.timeout,
        }
    }
}

/// A queued operation. Its responder is consumed by `settle`, so a request can
/// only ever be answered once.
#[derive(Debug)]
pub struct BatchRequest {
    pub id: Uuid,
    pub operation: String,
    pub payload: Value,
    pub role: String,
    pub branch_id: Option<String>,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub timeout: Duration,
    pub cost_estimate: Decimal,
    responder: oneshot::Sender<Result<Value>>,
}

impl BatchRequest {
    pub fn new(
        operation: impl Into<String>,
        payload: Value,
        options: &SubmitOptions,
        timeout: Duration,
        cost_estimate: Decimal,
    ) -> (Self, oneshot::Receiver<Result<Value>>) {
        let (responder, receiver) = oneshot::channel();
        let request = Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            payload,
            role: options.role.clone(),
            branch_id: options.branch_id.clone(),
            priority: options.priority.unwrap_or_default(),
            enqueued_at: Instant::now(),
            timeout,
            cost_estimate,
            responder,
        };
        (request, receiver)
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            role: self.role.clone(),
            branch_id: self.branch_id.clone(),
            priority: self.priority,
            timeout: Some(self.timeout),
        }
    }

    /// Returns false when the caller already gave up (timed out or dropped).
    pub fn settle(self, result: Result<Value>) -> bool {
        self.responder.send(result).is_ok()
    }
}
