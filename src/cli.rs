use clap::{Parser, Subcommand, ValueEnum};

use crate::models::{Complexity, Priority, TaskRequest, TaskType};

#[derive(Parser)]
#[command(name = "coop-dispatch")]
#[command(about = "Model routing, batching and caching for the coop business assistant")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List known models with their rate limits
    Models,

    /// Show the model selection and fallback chain for a task
    Chain {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Send a prompt through the fallback chain
    Ask {
        /// Prompt text
        prompt: String,

        #[command(flatten)]
        task: TaskArgs,

        /// Show every attempt made along the chain
        #[arg(long)]
        trace: bool,
    },

    /// Print the effective configuration
    Config {
        /// Print only the config file location
        #[arg(long)]
        path: bool,
    },

    /// Compute the cache key for an operation and JSON parameters
    CacheKey {
        operation: String,

        /// Parameters as a JSON document
        #[arg(default_value = "{}")]
        params: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct TaskArgs {
    #[arg(short = 't', long, value_enum, default_value_t = TaskKind::Text)]
    pub task_type: TaskKind,

    #[arg(short = 'x', long, value_enum, default_value_t = ComplexityArg::Medium)]
    pub complexity: ComplexityArg,

    #[arg(short, long, value_enum, default_value_t = PriorityArg::Medium)]
    pub priority: PriorityArg,

    /// Request JSON output from the model
    #[arg(long)]
    pub structured: bool,

    /// Token estimate used for rate limiting
    #[arg(long)]
    pub tokens: Option<u32>,
}

impl TaskArgs {
    pub fn to_task(&self) -> TaskRequest {
        let mut task = TaskRequest::new(self.task_type.into(), self.complexity.into(), self.priority.into());
        if self.structured {
            task = task.with_structured_output();
        }
        if let Some(tokens) = self.tokens {
            task = task.with_estimated_tokens(tokens);
        }
        task
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TaskKind {
    Text,
    Analysis,
    Forecast,
    Extraction,
    Embedding,
    Chat,
}

impl From<TaskKind> for TaskType {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Text => TaskType::Text,
            TaskKind::Analysis => TaskType::Analysis,
            TaskKind::Forecast => TaskType::Forecast,
            TaskKind::Extraction => TaskType::Extraction,
            TaskKind::Embedding => TaskType::Embedding,
            TaskKind::Chat => TaskType::Chat,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ComplexityArg {
    Simple,
    Medium,
    Complex,
}

impl From<ComplexityArg> for Complexity {
    fn from(arg: ComplexityArg) -> Self {
        match arg {
            ComplexityArg::Simple => Complexity::Simple,
            ComplexityArg::Medium => Complexity::Medium,
            ComplexityArg::Complex => Complexity::Complex,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PriorityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::High => Priority::High,
            PriorityArg::Critical => Priority::Critical,
        }
    }
}
