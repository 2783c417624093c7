//! Deterministic model selection and fallback chain construction.

use serde::Serialize;

use crate::models::provider::{Complexity, Priority, TaskRequest, TaskType};

pub const EMBEDDING_MODEL: &str = "text-embedding-004";
pub const TOP_TIER_MODEL: &str = "gemini-2.5-pro";
pub const LIGHTWEIGHT_MODEL: &str = "gemini-2.5-flash-lite";

const MAX_PRIMARY_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Primary,
    Secondary,
    External,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Primary => write!(f, "tier-1"),
            Tier::Secondary => write!(f, "tier-2"),
            Tier::External => write!(f, "tier-3"),
        }
    }
}

pub fn select_optimal_model(task: &TaskRequest) -> &'static str {
    if task.task_type == TaskType::Embedding {
        return EMBEDDING_MODEL;
    }
    if task.complexity == Complexity::Complex && task.requires_structured_output {
        return TOP_TIER_MODEL;
    }
    if task.complexity == Complexity::Simple {
        return LIGHTWEIGHT_MODEL;
    }
    match task.priority {
        Priority::Critical | Priority::High => "gemini-2.5-flash",
        Priority::Medium => "gemini-2.0-flash",
        Priority::Low => "gemini-2.0-flash-lite",
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FallbackChain {
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
}

impl FallbackChain {
    pub fn tier(&self, tier: Tier) -> &[String] {
        match tier {
            Tier::Primary => &self.tier1,
            Tier::Secondary => &self.tier2,
            Tier::External => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.tier1.len() + self.tier2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn primary_bucket(task: &TaskRequest) -> &'static [&'static str] {
    if task.task_type == TaskType::Embedding {
        return &[EMBEDDING_MODEL];
    }
    match task.complexity {
        Complexity::Simple => &["gemini-2.5-flash-lite", "gemini-2.0-flash-lite", "gemini-2.0-flash"],
        Complexity::Medium => &["gemini-2.5-flash", "gemini-2.0-flash", "gemini-2.5-flash-lite"],
        Complexity::Complex => &["gemini-2.5-pro", "gemini-2.5-flash"],
    }
}

fn secondary_bucket(task: &TaskRequest) -> &'static [&'static str] {
    if task.task_type == TaskType::Embedding {
        return &["embedding-001"];
    }
    match task.complexity {
        Complexity::Complex => &["gemini-1.5-pro", "gemini-1.5-flash"],
        _ => &["gemini-1.5-flash", "gemini-1.5-pro"],
    }
}

/// Tier-1 starts with the selected model, followed by the complexity bucket.
pub fn get_model_fallback_chain(task: &TaskRequest) -> FallbackChain {
    let selected = select_optimal_model(task);

    let mut tier1: Vec<String> = vec![selected.to_string()];
    for candidate in primary_bucket(task) {
        if tier1.len() >= MAX_PRIMARY_CANDIDATES {
            break;
        }
        if !tier1.iter().any(|m| m == candidate) {
            tier1.push(candidate.to_string());
        }
    }

    let tier2 = secondary_bucket(task)
        .iter()
        .filter(|m| !tier1.iter().any(|t| t == *m))
        .map(|m| m.to_string())
        .collect();

    FallbackChain { tier1, tier2 }
}
