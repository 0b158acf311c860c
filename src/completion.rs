//! Completion service client.
//!
//! The [`CompletionClient`] trait takes an assembled [`PromptPayload`] and
//! returns generated text. [`OpenAICompletion`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint; [`DisabledCompletion`]
//! refuses every request.
//!
//! Requests are made once with the configured timeout; failures surface as
//! [`CompletionServiceError`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::error::CompletionServiceError;
use crate::prompt::PromptPayload;

/// Generation parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 500,
        }
    }
}

impl From<&CompletionConfig> for GenerationParams {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &PromptPayload,
        params: GenerationParams,
    ) -> Result<String, CompletionServiceError>;
}

pub struct DisabledCompletion;

#[async_trait]
impl CompletionClient for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _prompt: &PromptPayload,
        _params: GenerationParams,
    ) -> Result<String, CompletionServiceError> {
        Err(CompletionServiceError::Disabled)
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAICompletion {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAICompletion {
    /// # Errors
    ///
    /// Returns an error if the API key variable named by
    /// `completion.api_key_env` is not set.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn request_body(&self, prompt: &PromptPayload, params: GenerationParams) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": prompt.messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &PromptPayload,
        params: GenerationParams,
    ) -> Result<String, CompletionServiceError> {
        tracing::debug!(
            model = %self.model,
            messages = prompt.messages.len(),
            estimated_tokens = prompt.estimated_tokens(),
            "sending completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, params))
            .send()
            .await
            .map_err(|e| CompletionServiceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionServiceError::InvalidResponse(e.to_string()))?;
        parse_completion_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion_response(json: &serde_json::Value) -> Result<String, CompletionServiceError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            CompletionServiceError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}

pub fn create_completion_client(config: &CompletionConfig) -> Result<Arc<dyn CompletionClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
