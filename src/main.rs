use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coop_dispatch::app::{AppConfig, DispatchService, LoggingConfig, ProviderSet};
use coop_dispatch::cache::{cache_key, canonical_json};
use coop_dispatch::cli::{Cli, Commands, TaskArgs};
use coop_dispatch::client::{OperationClient, RequestContext};
use coop_dispatch::error::{Error, Result};
use coop_dispatch::models::{
    get_model_fallback_chain, select_optimal_model, GeminiProvider, GenerationConfig, ModelRegistry,
};
use coop_dispatch::platform::AppPaths;

/// The command line has no business backend; domain operations are refused.
struct DetachedBackend;

#[async_trait]
impl OperationClient for DetachedBackend {
    async fn execute(&self, operation: &str, _payload: Value, _ctx: &RequestContext) -> Result<Value> {
        Err(Error::dispatch(format!("No backend attached for {}", operation)))
    }
}

fn init_logging(logging: &LoggingConfig, debug: bool, logs_dir: &Path) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if debug { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("coop_dispatch={}", level)))?;

    let (file_layer, guard) = if logging.log_to_file {
        std::fs::create_dir_all(logs_dir)?;
        let appender = tracing_appender::rolling::daily(logs_dir, "coop-dispatch.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

async fn load_config(cli: &Cli, paths: &AppPaths) -> Result<AppConfig> {
    match &cli.config {
        Some(path) => AppConfig::load_from(Path::new(path)),
        None => AppConfig::load(paths).await,
    }
}

fn cmd_models(config: &AppConfig) -> anyhow::Result<()> {
    let registry = ModelRegistry::builtin().with_rate_limit_overrides(&config.router.rate_limits)?;
    println!("{:<24} {:>6} {:>10}  {:<9} best for", "model", "rpm", "tpm", "tier");
    for model in registry.iter() {
        println!(
            "{:<24} {:>6} {:>10}  {:<9} {}",
            model.id,
            model.rate_limit.rpm,
            model.rate_limit.tpm,
            format!("{:?}", model.cost_tier).to_lowercase(),
            model
                .best_for
                .iter()
                .map(|t| format!("{:?}", t).to_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

fn cmd_chain(task: &TaskArgs) {
    let task = task.to_task();
    let chain = get_model_fallback_chain(&task);
    println!("selected: {}", select_optimal_model(&task));
    println!("tier-1:   {}", chain.tier1.join(" -> "));
    println!("tier-2:   {}", chain.tier2.join(" -> "));
    println!("tier-3:   external providers");
}

async fn cmd_ask(config: AppConfig, prompt: &str, task: &TaskArgs, trace: bool) -> anyhow::Result<()> {
    let api_key = std::env::var(&config.router.api_key_env)
        .with_context(|| format!("{} is not set", config.router.api_key_env))?;
    let gemini = match &config.router.gemini_base_url {
        Some(base_url) => GeminiProvider::with_base_url(api_key, base_url.clone())?,
        None => GeminiProvider::new(api_key)?,
    };

    let providers = ProviderSet {
        primary: vec![Arc::new(gemini)],
        external: Vec::new(),
    };
    let service = DispatchService::new(config, Arc::new(DetachedBackend), providers).await?;

    let task = task.to_task();
    let generation = GenerationConfig::default();
    let outcome = service.execute_with_fallback(&task, prompt, &generation).await;
    service.shutdown().await;

    let (response, attempts) = outcome?;
    if trace {
        for attempt in &attempts {
            eprintln!(
                "#{} {} {} {:?} ({}ms)",
                attempt.attempt_number,
                attempt.tier,
                attempt.model,
                attempt.outcome,
                attempt.response_time_ms.unwrap_or(0)
            );
        }
    }
    println!("{}", response.text);
    info!(
        "Answered by {} using {} tokens",
        response.model, response.metadata.tokens_used
    );
    Ok(())
}

fn cmd_cache_key(operation: &str, params: &str) -> anyhow::Result<()> {
    let params: Value = serde_json::from_str(params).context("params must be valid JSON")?;
    println!("{}", cache_key(operation, &params));
    println!("{}", canonical_json(&params));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = AppPaths::new()?;
    paths.ensure_dirs_exist()?;

    let mut config = load_config(&cli, &paths).await?;
    if config.audit.enabled && config.audit.database.is_none() {
        config.audit.database = Some(paths.audit_db_file());
    }

    let _guard = init_logging(&config.logging, cli.debug, &paths.logs_dir())?;
    info!("Starting coop-dispatch {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Models => cmd_models(&config),
        Commands::Chain { task } => {
            cmd_chain(&task);
            Ok(())
        }
        Commands::Ask { prompt, task, trace } => cmd_ask(config, &prompt, &task, trace).await,
        Commands::Config { path } => {
            if path {
                println!("{}", paths.config_file().display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        Commands::CacheKey { operation, params } => cmd_cache_key(&operation, &params),
    }
}
