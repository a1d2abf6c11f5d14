//! Generative service interface
//!
//! Stages talk to the language model only through [`LLMProvider`]. The
//! production implementation is [`RigAgentAdapter`], which wraps any rig-core
//! agent; tests use scripted providers.

mod rig_adapter;

pub use rig_adapter::RigAgentAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call model settings
///
/// # Example
///
/// ```rust
/// use research_loop::llm::LLMConfig;
///
/// let config = LLMConfig::new("llama3.2")
///     .with_temperature(0.2)
///     .with_max_tokens(8);
///
/// assert_eq!(config.model, "llama3.2");
/// assert_eq!(config.max_tokens, Some(8));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Model identifier
    pub model: String,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f64>,
    /// Maximum tokens to generate in the response
    pub max_tokens: Option<u64>,
}

impl LLMConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u64) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Create from rig-core Usage struct
    pub fn from_rig_usage(usage: &rig::completion::Usage) -> Self {
        Self::new(usage.input_tokens, usage.output_tokens)
    }
}

/// LLM completion response
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// The assistant's response message
    pub message: Message,
    /// Token usage statistics (if available from provider)
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Response text
    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// Provider-agnostic completion interface
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for the conversation
    async fn complete(
        &self,
        messages: &[Message],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, ServiceError>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model used when no config override is given
    fn default_model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn complete(
            &self,
            messages: &[Message],
            _config: Option<&LLMConfig>,
        ) -> Result<LLMResponse, ServiceError> {
            let last = messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(LLMResponse::new(Message::assistant(last)).with_usage(TokenUsage::new(3, 4)))
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }
    }

    #[tokio::test]
    async fn test_provider_as_trait_object() {
        let provider: Box<dyn LLMProvider> = Box::new(EchoProvider);
        let response = provider
            .complete(&[Message::system("rules"), Message::user("hello")], None)
            .await
            .unwrap();

        assert_eq!(response.text(), "hello");
        assert_eq!(response.message.role, Role::Assistant);
        assert_eq!(response.usage.unwrap().total_tokens, 7);
        assert_eq!(provider.name(), "echo");
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("a").role, Role::System);
        assert_eq!(Message::user("b").role, Role::User);
        assert_eq!(Message::assistant("c").content, "c");
    }

    #[test]
    fn test_llm_config_builder() {
        let config = LLMConfig::new("gpt-4.1").with_temperature(0.7);
        assert_eq!(config.temperature, Some(0.7));
        assert_eq!(config.max_tokens, None);
    }
}
