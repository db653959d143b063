//! Executor backed by a remote chat-completion endpoint.
//!
//! Each task payload is sent as a single user message. There is exactly one
//! attempt per task; a transport or API error becomes that task's failure.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Executor;
use crate::config::LlmSettings;
use crate::error::{ExecutionError, InitError};
use crate::llm::{GenerationRequest, LlmProvider, Message};

/// Runs task prompts through an [`LlmProvider`].
pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl LlmExecutor {
    /// Creates an executor that uses the provider's default model.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: String::new(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Creates an executor from the `llm` section of the run configuration.
    pub fn from_settings(provider: Arc<dyn LlmProvider>, settings: &LlmSettings) -> Self {
        Self {
            provider,
            model: settings.model.clone().unwrap_or_default(),
            system_prompt: settings.system_prompt.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Model that requests will be sent to.
    pub fn effective_model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    fn build_request(&self, payload: &str) -> GenerationRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(payload));

        let mut request = GenerationRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

#[async_trait]
impl Executor for LlmExecutor {
    fn kind(&self) -> &'static str {
        "llm"
    }

    async fn initialize(&self) -> Result<(), InitError> {
        if self.effective_model().trim().is_empty() {
            return Err(InitError::InvalidConfig(
                "no LLM model configured".to_string(),
            ));
        }
        debug!(model = self.effective_model(), "LLM executor ready");
        Ok(())
    }

    async fn execute(&self, payload: &str) -> Result<String, ExecutionError> {
        let response = self.provider.generate(self.build_request(payload)).await?;
        debug!(
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "LLM response received"
        );
        response
            .first_content()
            .filter(|content| !content.trim().is_empty())
            .map(String::from)
            .ok_or(ExecutionError::EmptyResponse)
    }
}
