//! Adapter for using Rig Agents as `LLMProvider`
//!
//! System messages are merged into the completion preamble, the last
//! non-system message is sent as the prompt and everything before it becomes
//! chat history.

use async_trait::async_trait;
use std::sync::Arc;

use rig::agent::Agent;
use rig::completion::{Completion, CompletionModel, Message as RigMessage};
use rig::message::AssistantContent;
use rig::OneOrMany;

use super::{LLMConfig, LLMProvider, LLMResponse, Message, Role, TokenUsage};
use crate::error::ServiceError;

/// Wraps a Rig `Agent<M>` to implement `LLMProvider`
pub struct RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    agent: Arc<Agent<M>>,
    provider_name: String,
    model_name: String,
}

impl<M> RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    pub fn new(agent: Agent<M>) -> Self {
        Self::with_names(agent, "rig", "rig-agent")
    }

    /// Create adapter with custom provider/model names for logging.
    pub fn with_names(
        agent: Agent<M>,
        provider_name: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            agent: Arc::new(agent),
            provider_name: provider_name.into(),
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl<M> LLMProvider for RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    async fn complete(
        &self,
        messages: &[Message],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, ServiceError> {
        let conversation = build_rig_conversation(messages);
        let mut builder = self
            .agent
            .completion(conversation.prompt, conversation.history)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("Rig agent error: {}", e)))?;

        if let Some(system_preamble) = conversation.preamble {
            let preamble = match self.agent.preamble.as_deref() {
                Some(agent_preamble) => format!("{}\n\n{}", agent_preamble, system_preamble),
                None => system_preamble,
            };
            builder = builder.preamble(preamble);
        }

        if let Some(cfg) = config {
            if let Some(temperature) = cfg.temperature {
                builder = builder.temperature(temperature);
            }
            if let Some(max_tokens) = cfg.max_tokens {
                builder = builder.max_tokens(max_tokens);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("Rig agent error: {}", e)))?;

        let message = Message::assistant(text_from_rig_choice(&response.choice));
        let usage = TokenUsage::from_rig_usage(&response.usage);

        let mut llm_response = LLMResponse::new(message);
        if usage.total_tokens > 0 {
            llm_response = llm_response.with_usage(usage);
        }

        Ok(llm_response)
    }

    fn name(&self) -> &str {
        &self.provider_name
    }

    fn default_model(&self) -> &str {
        &self.model_name
    }
}

struct RigConversation {
    prompt: RigMessage,
    history: Vec<RigMessage>,
    preamble: Option<String>,
}

fn build_rig_conversation(messages: &[Message]) -> RigConversation {
    let mut system_parts = Vec::new();
    let mut rig_messages = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if !message.content.trim().is_empty() {
                    system_parts.push(message.content.clone());
                }
            }
            Role::User => rig_messages.push(RigMessage::user(message.content.clone())),
            Role::Assistant => rig_messages.push(RigMessage::assistant(message.content.clone())),
        }
    }

    let prompt = rig_messages.pop().unwrap_or_else(|| RigMessage::user(""));

    let preamble = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    RigConversation {
        prompt,
        history: rig_messages,
        preamble,
    }
}

fn text_from_rig_choice(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|item| match item {
            AssistantContent::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

impl<M> std::fmt::Debug for RigAgentAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigAgentAdapter")
            .field("provider_name", &self.provider_name)
            .field("model_name", &self.model_name)
            .finish()
    }
}
