use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single AI vendor adapter. Each adapter owns its own HTTP/SDK details.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn execute_request(
        &self,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse>;

    fn get_provider_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Text,
    Analysis,
    Forecast,
    Extraction,
    Embedding,
    Chat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn weight(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub priority: Priority,
    pub estimated_tokens: Option<u32>,
    pub requires_structured_output: bool,
}

impl TaskRequest {
    pub fn new(task_type: TaskType, complexity: Complexity, priority: Priority) -> Self {
        Self {
            task_type,
            complexity,
            priority,
            estimated_tokens: None,
            requires_structured_output: false,
        }
    }

    pub fn with_estimated_tokens(mut self, tokens: u32) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn with_structured_output(mut self) -> Self {
        self.requires_structured_output = true;
        self
    }

    pub fn token_estimate(&self) -> u32 {
        self.estimated_tokens.unwrap_or(DEFAULT_TOKEN_ESTIMATE)
    }
}

pub const DEFAULT_TOKEN_ESTIMATE: u32 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SafetyThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl SafetyThreshold {
    pub fn as_api_str(self) -> &'static str {
        match self {
            SafetyThreshold::BlockNone => "BLOCK_NONE",
            SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub streaming: bool,
    pub safety_threshold: Option<SafetyThreshold>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
            streaming: false,
            safety_threshold: None,
        }
    }
}

impl GenerationConfig {
    /// Copy of this config pinned to a concrete model.
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub tokens_used: u32,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderResponse {
    pub success: bool,
    pub text: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

impl ProviderResponse {
    pub fn success(model: impl Into<String>, text: impl Into<String>, metadata: ResponseMetadata) -> Self {
        Self {
            success: true,
            text: text.into(),
            model: model.into(),
            error: None,
            metadata,
        }
    }

    pub fn failure(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            model: model.into(),
            error: Some(error.into()),
            metadata: ResponseMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_request_builder() {
        let task = TaskRequest::new(TaskType::Analysis, Complexity::Complex, Priority::High)
            .with_estimated_tokens(4000)
            .with_structured_output();

        assert_eq!(task.token_estimate(), 4000);
        assert!(task.requires_structured_output);
    }

    #[test]
    fn test_default_token_estimate() {
        let task = TaskRequest::new(TaskType::Text, Complexity::Simple, Priority::Low);
        assert_eq!(task.token_estimate(), DEFAULT_TOKEN_ESTIMATE);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Medium);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_failure_response_shape() {
        let response = ProviderResponse::failure("gemini-2.0-flash", "503 unavailable");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "503 unavailable");
    }

    #[test]
    fn test_config_for_model_keeps_sampling() {
        let config = GenerationConfig {
            temperature: 0.2,
            ..GenerationConfig::default()
        };
        let pinned = config.for_model("gemini-2.5-pro");
        assert_eq!(pinned.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(pinned.temperature, 0.2);
    }
}
