pub mod key;
pub mod store;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use key::{cache_key, canonical_json};
pub use store::{CacheEntry, CacheStats, IntelligentCache};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size_bytes: usize,
    pub cleanup_interval_secs: u64,
    pub default_ttl_secs: u64,
    pub ttl_by_operation: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl_by_operation = [
            ("get_stock", 300),
            ("forecast_stock", 1800),
            ("parse_notes", 3600),
            ("search_inventory", 600),
            ("get_branches", 3600),
            ("generate_embedding", 86400),
        ]
        .into_iter()
        .map(|(op, secs)| (op.to_string(), secs))
        .collect();

        Self {
            max_size_bytes: 50 * 1024 * 1024,
            cleanup_interval_secs: 60,
            default_ttl_secs: 300,
            ttl_by_operation,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, operation: &str) -> Duration {
        let secs = self
            .ttl_by_operation
            .get(operation)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_table() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_for("forecast_stock"), Duration::from_secs(1800));
        assert_eq!(config.ttl_for("generate_embedding"), Duration::from_secs(86400));
        assert_eq!(config.ttl_for("something_else"), Duration::from_secs(300));
    }
}
