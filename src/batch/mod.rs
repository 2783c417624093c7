pub mod batcher;
pub mod config;
pub mod group;
pub mod metrics;
pub mod request;

pub use batcher::{BatchHandler, ParallelHandler, RequestBatcher};
pub use config::{BatchTypeConfig, BatchingConfig};
pub use group::{group_requests, BatchGroup, Grouping};
pub use metrics::BatchMetrics;
pub use request::{BatchRequest, SubmitOptions};
