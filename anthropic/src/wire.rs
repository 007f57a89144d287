//! Wire types for the Anthropic Messages API.

use cartpilot_core::port::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};

/// One message on the wire. Plain-string content is sufficient here; the
/// enhancer never sends tool blocks.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: match message.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: message.content.clone(),
        }
    }
}

/// Request body for `POST /v1/messages`.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

/// One content block in a response.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
    /// Anything else (tool use etc.) is ignored by this adapter.
    #[serde(other)]
    Other,
}

/// Token usage block.
#[derive(Clone, Copy, Debug, Deserialize)]
pub(crate) struct WireUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Response body for `POST /v1/messages`.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: WireUsage,
}

impl MessagesResponse {
    /// Concatenate the text blocks.
    pub(crate) fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Provider error envelope.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ProviderError,
}

/// Provider error detail.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ProviderError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn request_skips_empty_optionals() {
        let request = MessagesRequest {
            model: "claude-3-5-haiku-latest".into(),
            max_tokens: 512,
            messages: vec![WireMessage {
                role: "user",
                content: "hello".into(),
            }],
            system: None,
            temperature: None,
            stop_sequences: Vec::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("system"));
        assert!(!json.contains("stop_sequences"));
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn response_text_joins_blocks_and_ignores_tools() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "fir"},
                    {"type": "tool_use", "id": "t", "name": "n", "input": {}},
                    {"type": "text", "text": "st"}
                ],
                "model": "claude-3-5-haiku-latest",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(response.text(), "first");
        assert_eq!(response.usage.output_tokens, 4);
    }
}
