use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::provider::{
    GenerationConfig, ModelProvider, ProviderResponse, ResponseMetadata, SafetyThreshold, TaskRequest,
};
use crate::models::registry::GEMINI_PROVIDER;
use crate::models::selector::select_optimal_model;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::model_provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn build_request(&self, prompt: &str, config: &GenerationConfig, json_output: bool) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
                response_mime_type: json_output.then(|| "application/json".to_string()),
            },
            safety_settings: config
                .safety_threshold
                .map(safety_settings)
                .unwrap_or_default(),
        }
    }
}

fn safety_settings(threshold: SafetyThreshold) -> Vec<GeminiSafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| GeminiSafetySetting {
            category: category.to_string(),
            threshold: threshold.as_api_str().to_string(),
        })
        .collect()
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn execute_request(
        &self,
        task: &TaskRequest,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse> {
        let start_time = Instant::now();
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| select_optimal_model(task).to_string());
        let body = self.build_request(prompt, config, task.requires_structured_output);

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::model_provider(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Gemini API error for {}: {} - {}", model, status, error_text);
            return Err(Error::model_provider(format!("API error {}: {}", status, error_text)));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| Error::model_provider(format!("Failed to parse response: {}", e)))?;
        debug!("Received successful response from Gemini model {}", model);

        Ok(parsed.into_provider_response(model, start_time.elapsed().as_millis() as u64))
    }

    fn get_provider_name(&self) -> &str {
        GEMINI_PROVIDER
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<GeminiSafetySetting>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiSafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    total_token_count: u32,
}

impl GeminiResponse {
    fn into_provider_response(self, model: String, elapsed_ms: u64) -> ProviderResponse {
        let tokens_used = self.usage_metadata.map(|u| u.total_token_count).unwrap_or(0);
        let candidate = self.candidates.into_iter().next();

        let blocked = candidate
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(|reason| reason == "SAFETY")
            .unwrap_or(false);
        if blocked {
            return ProviderResponse::failure(model, "response blocked by safety filter");
        }

        let text = candidate
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return ProviderResponse::failure(model, "empty response");
        }

        ProviderResponse::success(
            model,
            text,
            ResponseMetadata {
                tokens_used,
                processing_time_ms: elapsed_ms,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::provider::{Complexity, Priority, TaskType};

    #[test]
    fn test_provider_creation() {
        let provider = GeminiProvider::new("test-key".to_string()).unwrap();
        assert_eq!(provider.get_provider_name(), "gemini");
    }

    #[test]
    fn test_request_body_shape() {
        let provider = GeminiProvider::new("test-key".to_string()).unwrap();
        let config = GenerationConfig {
            safety_threshold: Some(SafetyThreshold::BlockOnlyHigh),
            ..GenerationConfig::default()
        };

        let body = serde_json::to_value(provider.build_request("How many eggs today?", &config, true)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "How many eggs today?");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_ONLY_HIGH");
    }

    #[test]
    fn test_plain_request_omits_optional_fields() {
        let provider = GeminiProvider::new("test-key".to_string()).unwrap();
        let body = serde_json::to_value(provider.build_request("hi", &GenerationConfig::default(), false)).unwrap();
        assert!(body.get("safetySettings").is_none());
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "12 "}, {"text": "eggs"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3, "totalTokenCount": 8}
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_provider_response("gemini-2.0-flash".to_string(), 12);

        assert!(response.success);
        assert_eq!(response.text, "12 eggs");
        assert_eq!(response.metadata.tokens_used, 8);
        assert_eq!(response.metadata.processing_time_ms, 12);
    }

    #[test]
    fn test_safety_block_is_failure() {
        let raw = serde_json::json!({"candidates": [{"finishReason": "SAFETY"}]});
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_provider_response("gemini-2.0-flash".to_string(), 1);
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_provider_error() {
        let provider =
            GeminiProvider::with_base_url("k".to_string(), "http://127.0.0.1:9".to_string()).unwrap();
        let task = TaskRequest::new(TaskType::Text, Complexity::Simple, Priority::Low);
        let err = provider
            .execute_request(&task, "hi", &GenerationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelProvider(_)));
    }
}
