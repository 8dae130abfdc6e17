//! Remote vision-language chat backend.
//!
//! Talks to an OpenAI-compatible `/v1/chat/completions` endpoint. The
//! image travels as a base64 data URL inside the message content. Every
//! call carries a bounded timeout; exceeding it surfaces as a distinct
//! `Timeout` error so callers can tell a slow backend from a broken one.

use crate::chat::{last_user_message, ChatBackend, ChatMessage};
use crate::core::errors::{DetSegError, DetSegResult};
use crate::pipeline::result::PipelineResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const REFINE_PROMPT: &str = "You are selecting object classes for a zero-shot detector. \
Given the conversation and the proposed classes, return the refined list of class names \
as a single comma-separated line, nothing else.";

const ANSWER_PROMPT: &str = "Summarize the detection and segmentation results below for the \
user in one or two sentences, answering their last question where possible.";

#[derive(serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<RequestMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(serde::Serialize)]
struct RequestMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(serde::Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Chat backend calling a remote OpenAI-compatible VLM service.
pub struct RemoteVlmChat {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
    timeout_ms: u64,
}

impl RemoteVlmChat {
    /// Creates a client for the given endpoint with a bounded per-call
    /// timeout.
    pub fn new(endpoint: &str, model_name: &str, timeout_secs: u64) -> DetSegResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                DetSegError::model_unavailable_with_source("chat", "http client", e)
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_name: model_name.to_string(),
            timeout_ms: timeout_secs * 1000,
        })
    }

    async fn complete(&self, messages: Vec<RequestMessage>, max_tokens: u32) -> DetSegResult<String> {
        let request = ChatRequest {
            model: self.model_name.clone(),
            messages,
            max_tokens,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            return Err(DetSegError::inference(
                "chat",
                format!("chat endpoint returned HTTP {}", response.status()),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.map_request_error(e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                DetSegError::inference(
                    "chat",
                    "chat endpoint returned no choices",
                    std::io::Error::from(std::io::ErrorKind::InvalidData),
                )
            })
    }

    fn map_request_error(&self, error: reqwest::Error) -> DetSegError {
        if error.is_timeout() {
            DetSegError::Timeout {
                operation: "chat completion".to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else if error.is_connect() {
            DetSegError::model_unavailable_with_source(
                "chat",
                format!("cannot reach {}", self.endpoint),
                error,
            )
        } else {
            DetSegError::inference("chat", "chat completion request", error)
        }
    }

    fn user_content(text: String, image_b64: Option<&str>) -> serde_json::Value {
        match image_b64 {
            Some(b64) => serde_json::json!([
                {"type": "text", "text": text},
                {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{b64}")}}
            ]),
            None => serde_json::Value::String(text),
        }
    }

    fn history_messages(history: &[ChatMessage]) -> Vec<RequestMessage> {
        history
            .iter()
            .map(|msg| RequestMessage {
                role: msg.role.clone(),
                content: serde_json::Value::String(msg.content.clone()),
            })
            .collect()
    }
}

#[async_trait]
impl ChatBackend for RemoteVlmChat {
    async fn refine_classes(
        &self,
        history: &[ChatMessage],
        proposed: &[String],
        image_b64: Option<&str>,
    ) -> DetSegResult<Vec<String>> {
        let mut messages = Self::history_messages(history);
        let text = format!("{REFINE_PROMPT}\n\nProposed classes: {}", proposed.join(", "));
        messages.push(RequestMessage {
            role: "user".to_string(),
            content: Self::user_content(text, image_b64),
        });

        let reply = self.complete(messages, 128).await?;
        let refined = parse_class_list(&reply);
        debug!(reply = %reply, refined = ?refined, "chat class refinement");

        if refined.is_empty() {
            Ok(proposed.to_vec())
        } else {
            Ok(refined)
        }
    }

    async fn answer(
        &self,
        history: &[ChatMessage],
        classes: &[String],
        result: &PipelineResult,
    ) -> DetSegResult<String> {
        let mut messages = Self::history_messages(history);
        let last_question = last_user_message(history).unwrap_or("");
        let summary = serde_json::to_string(&result.detections)?;
        let text = format!(
            "{ANSWER_PROMPT}\n\nClasses: {}\nDetections: {summary}\nUser question: {last_question}",
            classes.join(", "),
        );
        messages.push(RequestMessage {
            role: "user".to_string(),
            content: serde_json::Value::String(text),
        });

        self.complete(messages, 300).await
    }

    fn name(&self) -> &str {
        "remote-vlm"
    }
}

/// Parses a model reply into a class list.
///
/// Accepts comma-separated or line-separated names, strips list bullets,
/// and deduplicates while preserving order.
fn parse_class_list(reply: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    reply
        .split(|c| c == ',' || c == '\n')
        .map(|part| {
            part.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let chat = RemoteVlmChat::new("http://localhost:8081/", "qwen2-vl", 30).unwrap();
        assert_eq!(chat.endpoint, "http://localhost:8081");
        assert_eq!(chat.timeout_ms, 30_000);
    }

    #[test]
    fn test_parse_class_list_comma_separated() {
        assert_eq!(
            parse_class_list("car, dog, tree"),
            vec!["car", "dog", "tree"]
        );
    }

    #[test]
    fn test_parse_class_list_bullets_and_duplicates() {
        assert_eq!(
            parse_class_list("- car\n- Dog\n- car\n"),
            vec!["car", "Dog"]
        );
    }

    #[test]
    fn test_parse_class_list_empty_reply() {
        assert!(parse_class_list("  \n ").is_empty());
    }

    #[test]
    fn test_request_serialization_with_image() {
        let content = RemoteVlmChat::user_content("look".to_string(), Some("abc123"));
        assert_eq!(content[0]["type"], "text");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,abc123"
        );
    }

    #[test]
    fn test_response_parsing() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "car, dog" } }]
        });
        let response: ChatResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.choices[0].message.content, "car, dog");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_model_unavailable() {
        let chat = RemoteVlmChat::new("http://127.0.0.1:59999", "test", 2).unwrap();
        let err = chat
            .refine_classes(&[], &["car".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DetSegError::ModelUnavailable { .. } | DetSegError::Timeout { .. }
        ));
    }
}
