//! Wire types for the OpenAI-compatible chat-completions endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::conversation::{ChatMessage, ToolCall};

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireResponseFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireResponseToolCall {
    pub id: String,
    pub function: WireResponseFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireResponseMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<WireResponseToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChoice {
    pub message: WireResponseMessage,
    pub finish_reason: Option<String>,
}

/// Full response body for a non-streaming completion.
#[derive(Debug, Clone, Deserialize)]
pub struct WireChatResponse {
    pub choices: Vec<WireChoice>,
    pub usage: Option<Usage>,
}

/// Normalized response handed to the agent.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Option<Usage>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Build from the wire response, normalizing tool calls.
    pub fn from_wire(response: WireChatResponse) -> Option<Self> {
        let choice = response.choices.into_iter().next()?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
                thought: None,
            })
            .collect();
        Some(Self {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_default(),
            usage: response.usage,
        })
    }

    /// Wrap this response in a single synthetic delta chunk, the shape the
    /// agent consumes in streaming mode.
    pub fn into_chunk(self) -> StreamChunk {
        StreamChunk {
            content_delta: self.content,
            finish_reason: Some(if self.finish_reason.is_empty() {
                "stop".to_string()
            } else {
                self.finish_reason
            }),
            usage: self.usage,
        }
    }
}

/// One delta chunk of a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content_delta: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Wire shape of one SSE `data:` payload in streaming mode.
#[derive(Debug, Clone, Deserialize)]
pub struct WireStreamChunk {
    #[serde(default)]
    pub choices: Vec<WireStreamChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireStreamChoice {
    pub delta: WireStreamDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireStreamDelta {
    pub content: Option<String>,
}

impl WireStreamChunk {
    pub fn into_chunk(self) -> StreamChunk {
        let (content_delta, finish_reason) = self
            .choices
            .into_iter()
            .next()
            .map(|c| (c.delta.content.unwrap_or_default(), c.finish_reason))
            .unwrap_or_default();
        StreamChunk {
            content_delta,
            finish_reason,
            usage: self.usage,
        }
    }
}
