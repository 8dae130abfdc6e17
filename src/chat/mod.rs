//! Conversational layer on top of the detection/segmentation results.
//!
//! The chat capability is an explicit interface with two implementations
//! selected by configuration: a remote vision-language model reached over
//! an OpenAI-compatible API, and a rule-based fallback. The conversational
//! answer is a soft feature: when the remote backend fails, callers fall
//! back to the rule-based summary instead of failing the request.

pub mod fallback;
pub mod remote;

use crate::core::errors::DetSegResult;
use crate::pipeline::result::PipelineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use fallback::RuleBasedChat;
pub use remote::RemoteVlmChat;

/// One turn of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role, `"user"` or `"assistant"`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Configuration selecting and tuning the chat backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of an OpenAI-compatible chat endpoint. When absent, the
    /// rule-based fallback is used.
    pub endpoint: Option<String>,
    /// Model name sent to the remote endpoint.
    pub model: String,
    /// Deadline for a single remote call, in seconds.
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "qwen2-vl".to_string(),
            timeout_secs: 30,
        }
    }
}

/// A backend that refines class lists and phrases answers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Rewrites the proposed class list using the conversation and the
    /// current image (base64 PNG), returning the refined list.
    async fn refine_classes(
        &self,
        history: &[ChatMessage],
        proposed: &[String],
        image_b64: Option<&str>,
    ) -> DetSegResult<Vec<String>>;

    /// Produces a conversational answer describing the pipeline result.
    async fn answer(
        &self,
        history: &[ChatMessage],
        classes: &[String],
        result: &PipelineResult,
    ) -> DetSegResult<String>;

    /// Backend name used in logs.
    fn name(&self) -> &str;
}

/// Selects the chat backend from configuration.
pub fn select_backend(config: &ChatConfig) -> DetSegResult<Arc<dyn ChatBackend>> {
    match &config.endpoint {
        Some(endpoint) => Ok(Arc::new(RemoteVlmChat::new(
            endpoint,
            &config.model,
            config.timeout_secs,
        )?)),
        None => Ok(Arc::new(RuleBasedChat)),
    }
}

/// Returns the most recent user message in the history, if any.
pub(crate) fn last_user_message(history: &[ChatMessage]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|msg| msg.role == "user")
        .map(|msg| msg.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backend_defaults_to_rule_based() {
        let backend = select_backend(&ChatConfig::default()).unwrap();
        assert_eq!(backend.name(), "rule-based");
    }

    #[test]
    fn test_select_backend_remote_when_endpoint_set() {
        let config = ChatConfig {
            endpoint: Some("http://localhost:8081".to_string()),
            ..ChatConfig::default()
        };
        let backend = select_backend(&config).unwrap();
        assert_eq!(backend.name(), "remote-vlm");
    }

    #[test]
    fn test_last_user_message_finds_most_recent() {
        let history = vec![
            ChatMessage {
                role: "user".to_string(),
                content: "first".to_string(),
            },
            ChatMessage {
                role: "assistant".to_string(),
                content: "reply".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: "second".to_string(),
            },
        ];
        assert_eq!(last_user_message(&history), Some("second"));
        assert_eq!(last_user_message(&[]), None);
    }
}
