use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::provider::TaskType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub rpm: u32,
    pub tpm: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Economy,
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelFeature {
    TextGeneration,
    StructuredOutput,
    Reasoning,
    LongContext,
    Vision,
    FunctionCalling,
    Embeddings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
    pub max_tokens: u32,
    pub rate_limit: RateLimit,
    pub cost_tier: CostTier,
    pub features: Vec<ModelFeature>,
    pub best_for: Vec<TaskType>,
}

impl ModelDescriptor {
    pub fn supports(&self, feature: ModelFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// Static table of the models the router may dispatch to. Built once at startup.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
}

pub const GEMINI_PROVIDER: &str = "gemini";

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn builtin() -> Self {
        use CostTier::*;
        use ModelFeature::*;

        let model = |id: &str,
                     max_tokens: u32,
                     rpm: u32,
                     tpm: u32,
                     cost_tier: CostTier,
                     features: Vec<ModelFeature>,
                     best_for: Vec<TaskType>| ModelDescriptor {
            id: id.to_string(),
            provider: GEMINI_PROVIDER.to_string(),
            max_tokens,
            rate_limit: RateLimit { rpm, tpm },
            cost_tier,
            features,
            best_for,
        };

        Self::new(vec![
            model(
                "gemini-2.5-pro",
                65_536,
                5,
                250_000,
                Premium,
                vec![TextGeneration, StructuredOutput, Reasoning, LongContext, FunctionCalling],
                vec![TaskType::Analysis, TaskType::Forecast],
            ),
            model(
                "gemini-2.5-flash",
                65_536,
                10,
                250_000,
                Standard,
                vec![TextGeneration, StructuredOutput, Reasoning, FunctionCalling],
                vec![TaskType::Extraction, TaskType::Analysis, TaskType::Chat],
            ),
            model(
                "gemini-2.5-flash-lite",
                65_536,
                15,
                250_000,
                Economy,
                vec![TextGeneration, StructuredOutput],
                vec![TaskType::Text, TaskType::Chat],
            ),
            model(
                "gemini-2.0-flash",
                8_192,
                15,
                1_000_000,
                Standard,
                vec![TextGeneration, StructuredOutput, Vision, FunctionCalling],
                vec![TaskType::Text, TaskType::Extraction],
            ),
            model(
                "gemini-2.0-flash-lite",
                8_192,
                30,
                1_000_000,
                Economy,
                vec![TextGeneration],
                vec![TaskType::Text, TaskType::Chat],
            ),
            model(
                "gemini-1.5-flash",
                8_192,
                15,
                1_000_000,
                Economy,
                vec![TextGeneration, Vision, LongContext],
                vec![TaskType::Text, TaskType::Chat],
            ),
            model(
                "gemini-1.5-pro",
                8_192,
                2,
                32_000,
                Premium,
                vec![TextGeneration, Reasoning, LongContext, Vision],
                vec![TaskType::Analysis, TaskType::Forecast],
            ),
            model(
                "text-embedding-004",
                2_048,
                1_500,
                1_000_000,
                Economy,
                vec![Embeddings],
                vec![TaskType::Embedding],
            ),
            model(
                "embedding-001",
                2_048,
                1_500,
                1_000_000,
                Economy,
                vec![Embeddings],
                vec![TaskType::Embedding],
            ),
        ])
    }

    /// Replace the rate limits of known models. Unknown ids are rejected.
    pub fn with_rate_limit_overrides(mut self, overrides: &BTreeMap<String, RateLimit>) -> Result<Self> {
        for (id, limit) in overrides {
            let descriptor = self
                .models
                .get_mut(id)
                .ok_or_else(|| Error::UnknownModel(id.clone()))?;
            debug!("Overriding rate limit for {}: {:?}", id, limit);
            descriptor.rate_limit = *limit;
        }
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&ModelDescriptor> {
        self.get(id).ok_or_else(|| Error::UnknownModel(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
