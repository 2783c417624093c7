pub mod config;
pub mod state;

pub use config::{AppConfig, AuditConfig, LoggingConfig, RouterConfig};
pub use state::{DispatchService, ProviderSet};
