use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub operation: String,
    pub task_type: Option<String>,
    pub model: Option<String>,
    pub tier: Option<String>,
    pub success: bool,
    pub tokens_used: u32,
    pub processing_time_ms: u64,
    pub attempts: u32,
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(operation: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            operation: operation.into(),
            task_type: None,
            model: None,
            tier: None,
            success,
            tokens_used: 0,
            processing_time_ms: 0,
            attempts: 0,
            error: None,
        }
    }
}

/// Insert-only sink for request/response metadata.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Record through the sink, logging and discarding any failure.
pub async fn record_quietly(sink: &dyn AuditSink, record: &AuditRecord) {
    if let Err(e) = sink.record(record).await {
        warn!("Audit sink rejected record {}: {}", record.id, e);
    }
}

pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        info!(
            target: "coop_dispatch::audit",
            id = %record.id,
            operation = %record.operation,
            model = record.model.as_deref().unwrap_or("-"),
            tier = record.tier.as_deref().unwrap_or("-"),
            success = record.success,
            tokens = record.tokens_used,
            elapsed_ms = record.processing_time_ms,
            attempts = record.attempts,
            "dispatch audit"
        );
        Ok(())
    }
}

pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_audit")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO dispatch_audit
                (id, recorded_at, operation, task_type, model, tier, success,
                 tokens_used, processing_time_ms, attempts, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.recorded_at.to_rfc3339())
        .bind(&record.operation)
        .bind(&record.task_type)
        .bind(&record.model)
        .bind(&record.tier)
        .bind(record.success)
        .bind(record.tokens_used as i64)
        .bind(record.processing_time_ms as i64)
        .bind(record.attempts as i64)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
