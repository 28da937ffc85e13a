//! Conversation history exchanged with the LLM.
//!
//! Internally the history is a tagged sum of turn variants; the serialized
//! form is the lowest-common-denominator OpenAI chat message shape. The
//! stronger types make an assistant turn's tool calls and a tool turn's
//! correlation id impossible to drop.

use serde::{Deserialize, Serialize};

/// A tool call in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunction,
}

/// The function half of a wire tool call. Arguments stay a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    pub arguments: String,
}

/// A normalized tool call, as produced by the LLM client or extracted from
/// free-form text by the response parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Unique within the turn.
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object string.
    pub arguments: String,
    /// Optional model reasoning captured alongside the call. Recorded in
    /// telemetry, never sent back to the model.
    pub thought: Option<String>,
}

impl ToolCall {
    /// Convert to the OpenAI wire shape for the assistant message.
    pub fn to_wire(&self) -> WireToolCall {
        WireToolCall {
            id: self.id.clone(),
            call_type: "function".to_string(),
            function: WireFunction {
                name: self.name.clone(),
                arguments: self.arguments.clone(),
            },
        }
    }

    /// Parse the argument string into a JSON map.
    pub fn parse_arguments(&self) -> Result<serde_json::Map<String, serde_json::Value>, String> {
        match serde_json::from_str::<serde_json::Value>(&self.arguments) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("tool arguments are not an object: {other}")),
            Err(e) => Err(format!("Invalid JSON arguments: {e}")),
        }
    }
}

/// Result of a single tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// The content to append to the conversation as the tool turn.
    pub fn conversation_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: &[ToolCall]) -> Self {
        Self::Assistant {
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.iter().map(ToolCall::to_wire).collect())
            },
        }
    }

    pub fn tool(result: &ToolResult) -> Self {
        Self::Tool {
            content: result.conversation_content(),
            tool_call_id: result.tool_call_id.clone(),
        }
    }
}
