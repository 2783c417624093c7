use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::batch::BatchingConfig;
use crate::cache::CacheConfig;
use crate::client::CachePolicy;
use crate::error::{Error, Result};
use crate::models::{FallbackConfig, LoadBalancerConfig, RateLimit, RateLimiterConfig};
use crate::platform::AppPaths;

pub const ENV_PREFIX: &str = "COOP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub router: RouterConfig,
    pub rate_limiting: RateLimiterConfig,
    pub batching: BatchingConfig,
    pub cache: CacheConfig,
    pub cache_policy: CachePolicy,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub fallback: FallbackConfig,
    pub load_balancer: LoadBalancerConfig,
    /// Per-model overrides of the built-in rpm/tpm limits.
    pub rate_limits: BTreeMap<String, RateLimit>,
    pub gemini_base_url: Option<String>,
    pub api_key_env: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            rate_limits: BTreeMap::new(),
            gemini_base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// SQLite file for audit rows. Without it, audit records only go to the log.
    pub database: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: true,
        }
    }
}

impl AppConfig {
    pub async fn load(paths: &AppPaths) -> Result<Self> {
        let config_file = paths.config_file();

        if !config_file.exists() {
            info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save(&config_file).await?;
        }

        Self::load_from(&config_file)
    }

    /// Layered load: built-in defaults, then the TOML file (if present), then
    /// `COOP_` environment variables with `__` between nested keys.
    pub fn load_from(config_file: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", config_file);

        let builder = config::Config::builder()
            .add_source(config::File::from(config_file.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub async fn save(&self, config_file: &Path) -> Result<()> {
        info!("Saving configuration to: {:?}", config_file);

        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(config::ConfigError::Message(e.to_string())))?;

        fs::write(config_file, config_content).await?;

        info!("Configuration saved successfully");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.router.fallback.request_timeout_ms == 0 || self.router.load_balancer.request_timeout_ms == 0 {
            return Err(Error::validation("Request timeout must be positive"));
        }

        for (model, limit) in &self.router.rate_limits {
            if limit.rpm == 0 || limit.tpm == 0 {
                return Err(Error::validation(format!(
                    "Rate limit override for {} must allow at least one request and token",
                    model
                )));
            }
        }

        if self.rate_limiting.max_attempts == 0 {
            return Err(Error::validation("Rate limiting needs at least one attempt"));
        }
        if self.rate_limiting.backoff_base_delay_ms > self.rate_limiting.backoff_max_delay_ms {
            return Err(Error::validation("Backoff base delay exceeds the maximum delay"));
        }

        self.batching.validate()?;

        if self.cache.max_size_bytes == 0 {
            return Err(Error::validation("Cache size must be positive"));
        }

        Ok(())
    }
}
