use rust_decimal::Decimal;
use serde::Serialize;

use crate::batch::config::{BatchTypeConfig, BatchingConfig};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchMetrics {
    pub total_requests: u64,
    pub batched_requests: u64,
    pub individual_requests: u64,
    pub groups_dispatched: u64,
    pub timeouts: u64,
    pub group_failures: u64,
    pub estimated_time_saved_ms: u64,
    pub estimated_cost_saved: Decimal,
}

impl BatchMetrics {
    pub fn average_batch_size(&self) -> f64 {
        if self.groups_dispatched == 0 {
            return 0.0;
        }
        self.batched_requests as f64 / self.groups_dispatched as f64
    }

    pub(crate) fn record_group(&mut self, members: usize, type_config: &BatchTypeConfig, config: &BatchingConfig) {
        self.groups_dispatched += 1;
        self.batched_requests += members as u64;
        self.estimated_time_saved_ms += estimated_time_saved(members, config);
        self.estimated_cost_saved += estimated_cost_saved(members, type_config);
    }
}

/// `members * per_request_overhead - batch_overhead`, never negative.
pub fn estimated_time_saved(members: usize, config: &BatchingConfig) -> u64 {
    (members as u64 * config.per_request_overhead_ms).saturating_sub(config.batch_overhead_ms)
}

pub fn estimated_cost_saved(members: usize, type_config: &BatchTypeConfig) -> Decimal {
    let extra = members.saturating_sub(1) as u64;
    type_config.cost_per_operation * Decimal::from(extra)
}
