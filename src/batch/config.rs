use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchTypeConfig {
    pub max_batch_size: usize,
    pub window_ms: u64,
    pub can_batch: bool,
    pub cost_per_operation: Decimal,
}

impl BatchTypeConfig {
    fn batched(max_batch_size: usize, window_ms: u64, cost_per_operation: Decimal) -> Self {
        Self {
            max_batch_size,
            window_ms,
            can_batch: true,
            cost_per_operation,
        }
    }

    fn immediate(cost_per_operation: Decimal) -> Self {
        Self {
            max_batch_size: 1,
            window_ms: 0,
            can_batch: false,
            cost_per_operation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Upper bound on how long any request sits in a queue before its flush.
    pub max_wait_ms: u64,
    pub default_timeout_ms: u64,
    pub per_request_overhead_ms: u64,
    pub batch_overhead_ms: u64,
    pub types: BTreeMap<String, BatchTypeConfig>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        let mut types = BTreeMap::new();
        types.insert(
            "parse_notes".to_string(),
            BatchTypeConfig::batched(5, 2_000, Decimal::new(10, 4)),
        );
        types.insert(
            "apply_to_stock".to_string(),
            BatchTypeConfig::batched(10, 1_000, Decimal::new(5, 4)),
        );
        types.insert(
            "forecast_stock".to_string(),
            BatchTypeConfig::batched(3, 5_000, Decimal::new(20, 4)),
        );
        types.insert(
            "search_inventory".to_string(),
            BatchTypeConfig::batched(8, 1_500, Decimal::new(2, 4)),
        );
        types.insert(
            "generate_report".to_string(),
            BatchTypeConfig::immediate(Decimal::new(50, 4)),
        );
        types.insert(
            "chat_response".to_string(),
            BatchTypeConfig::immediate(Decimal::new(10, 4)),
        );

        Self {
            max_wait_ms: 5_000,
            default_timeout_ms: 30_000,
            per_request_overhead_ms: 250,
            batch_overhead_ms: 400,
            types,
        }
    }
}

impl BatchingConfig {
    pub fn type_config(&self, operation: &str) -> Result<&BatchTypeConfig> {
        self.types
            .get(operation)
            .ok_or_else(|| Error::UnknownOperationType(operation.to_string()))
    }

    /// Delay before a freshly non-empty queue is flushed.
    pub fn flush_delay(&self, type_config: &BatchTypeConfig) -> Duration {
        Duration::from_millis(type_config.window_ms.min(self.max_wait_ms))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        for (operation, type_config) in &self.types {
            if type_config.max_batch_size == 0 {
                return Err(Error::validation(format!(
                    "Batch type {} must allow at least one request per batch",
                    operation
                )));
            }
            if type_config.cost_per_operation.is_sign_negative() {
                return Err(Error::validation(format!(
                    "Batch type {} has a negative cost per operation",
                    operation
                )));
            }
        }
        if self.default_timeout_ms == 0 {
            return Err(Error::validation("Batch request timeout must be positive"));
        }
        Ok(())
    }
}
