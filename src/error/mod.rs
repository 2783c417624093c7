use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Rate limit exceeded for {model}, retry in {}ms", wait_time.as_millis())]
    RateLimited { model: String, wait_time: Duration },

    #[error("Model provider error: {0}")]
    ModelProvider(String),

    #[error("Request {request_id} timed out after {}ms", timeout.as_millis())]
    Timeout { request_id: String, timeout: Duration },

    #[error("Batch group for '{operation}' failed ({group_size} members): {cause}")]
    BatchGroupFailure {
        operation: String,
        group_size: usize,
        cause: String,
    },

    #[error("Unknown operation type: {0}")]
    UnknownOperationType(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("All fallback tiers exhausted after {attempts} attempts: {last_error}")]
    FallbackExhausted { attempts: usize, last_error: String },

    #[error("Circuit breaker '{0}' is open")]
    CircuitBreakerOpen(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

impl Error {
    pub fn platform(msg: impl Into<String>) -> Self {
        Error::Platform(msg.into())
    }

    pub fn model_provider(msg: impl Into<String>) -> Self {
        Error::ModelProvider(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Error::Dispatch(msg.into())
    }

    pub fn rate_limited(model: impl Into<String>, wait_time: Duration) -> Self {
        Error::RateLimited {
            model: model.into(),
            wait_time,
        }
    }

    /// Errors that come from configuration or programming mistakes and must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnknownOperationType(_) | Error::UnknownModel(_) | Error::Validation(_)
        )
    }
}
