//! Rule-based chat fallback.
//!
//! Used when no remote endpoint is configured, and as the degradation path
//! when the remote backend fails: the detection/segmentation result is
//! authoritative, the conversational answer is best-effort.

use crate::chat::{last_user_message, ChatBackend, ChatMessage};
use crate::core::errors::DetSegResult;
use crate::pipeline::result::PipelineResult;
use async_trait::async_trait;

/// Chat backend that answers from templates, without any model call.
pub struct RuleBasedChat;

impl RuleBasedChat {
    /// Builds the "2 car, 1 dog" style summary of a result, in detection
    /// order of first appearance.
    fn summarize(result: &PipelineResult) -> String {
        let mut order: Vec<&str> = Vec::new();
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for det in &result.detections {
            if !counts.contains_key(det.label.as_str()) {
                order.push(det.label.as_str());
            }
            *counts.entry(det.label.as_str()).or_insert(0) += 1;
        }
        order
            .iter()
            .map(|label| format!("{} {}", counts[label], label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl ChatBackend for RuleBasedChat {
    async fn refine_classes(
        &self,
        _history: &[ChatMessage],
        proposed: &[String],
        _image_b64: Option<&str>,
    ) -> DetSegResult<Vec<String>> {
        Ok(proposed.to_vec())
    }

    async fn answer(
        &self,
        history: &[ChatMessage],
        classes: &[String],
        result: &PipelineResult,
    ) -> DetSegResult<String> {
        let found = if result.detections.is_empty() {
            format!(
                "No objects matching [{}] were found in the image.",
                classes.join(", ")
            )
        } else {
            format!(
                "Segmented {} object(s) for classes [{}]: {}.",
                result.detections.len(),
                classes.join(", "),
                Self::summarize(result)
            )
        };

        Ok(match last_user_message(history) {
            Some(question) => format!("{found} Your last message: \"{question}\""),
            None => found,
        })
    }

    fn name(&self) -> &str {
        "rule-based"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::result::{Detection, PipelineInput};
    use crate::processors::BoundingBox;

    fn result_with(labels: &[&str]) -> PipelineResult {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        PipelineResult {
            input: PipelineInput {
                image_path: "img.png".to_string(),
                classes: labels.iter().map(|s| s.to_string()).collect(),
            },
            detections: labels
                .iter()
                .map(|label| Detection::new(*label, 0.9, bbox))
                .collect(),
            boxes_visualization: String::new(),
            segmentations: Vec::new(),
            overlay: None,
        }
    }

    #[tokio::test]
    async fn test_refine_returns_proposed_unchanged() {
        let proposed = vec!["car".to_string(), "dog".to_string()];
        let refined = RuleBasedChat
            .refine_classes(&[], &proposed, None)
            .await
            .unwrap();
        assert_eq!(refined, proposed);
    }

    #[tokio::test]
    async fn test_answer_mentions_counts_and_last_message() {
        let history = vec![ChatMessage {
            role: "user".to_string(),
            content: "what do you see?".to_string(),
        }];
        let classes = vec!["car".to_string(), "dog".to_string()];
        let result = result_with(&["car", "dog", "car"]);

        let answer = RuleBasedChat
            .answer(&history, &classes, &result)
            .await
            .unwrap();
        assert!(answer.contains("3 object(s)"));
        assert!(answer.contains("2 car"));
        assert!(answer.contains("1 dog"));
        assert!(answer.contains("what do you see?"));
    }

    #[tokio::test]
    async fn test_answer_for_empty_result() {
        let answer = RuleBasedChat
            .answer(&[], &["tree".to_string()], &result_with(&[]))
            .await
            .unwrap();
        assert!(answer.contains("No objects"));
        assert!(answer.contains("tree"));
    }
}
