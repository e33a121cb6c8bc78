//! Text-completion collaborator.
//!
//! Supports:
//! - **Anthropic**: direct API access via rig-core
//! - **OpenAI**: direct API access via rig-core
//!
//! Agents only see the [`CompletionProvider`] trait; [`RigProvider`] bridges
//! rig's `CompletionModel` to it.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Narrow completion interface used by the reasoning stage.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete a prompt into text. An empty completion is an error.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_BACKEND".to_string(),
                message: format!("unknown backend {other:?} (expected \"anthropic\" or \"openai\")"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("failed to create Anthropic client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "using Anthropic");
    Ok(Arc::new(RigProvider::new(model, "anthropic")))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("failed to create OpenAI client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!(model = %config.model, "using OpenAI");
    Ok(Arc::new(RigProvider::new(model, "openai")))
}

/// Bridges a rig `CompletionModel` to [`CompletionProvider`].
pub struct RigProvider<M> {
    model: M,
    provider: &'static str,
}

impl<M> RigProvider<M> {
    pub fn new(model: M, provider: &'static str) -> Self {
        Self { model, provider }
    }
}

#[async_trait]
impl<M: CompletionModel + Sync> CompletionProvider for RigProvider<M> {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = self
            .model
            .completion_request(rig::completion::Message::user(prompt.to_owned()))
            .build();

        let response =
            self.model
                .completion(request)
                .await
                .map_err(|e| LlmError::RequestFailed {
                    provider: self.provider.to_string(),
                    reason: e.to_string(),
                })?;

        let text = response
            .choice
            .into_iter()
            .filter_map(|content| match content {
                rig::completion::AssistantContent::Text(t) => Some(t.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_known_names() {
        assert_eq!("anthropic".parse::<LlmBackend>().unwrap(), LlmBackend::Anthropic);
        assert_eq!("openai".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
        assert!("llama".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn create_provider_constructs_with_any_key() {
        // rig clients accept any string as an API key at construction time;
        // auth fails only on request.
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        assert!(create_provider(&config).is_ok());
    }
}
