//! The Minion agent loop: a turn-limited state machine interleaving LLM
//! calls, tool dispatch, and failure tracking.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::errors::DomainResult;
use crate::domain::models::conversation::{ChatMessage, ToolCall, ToolResult};
use crate::infrastructure::llm::client::LlmClient;
use crate::infrastructure::llm::types::LlmResponse;
use crate::services::response_parser::ResponseParser;
use crate::services::tool_executor::ToolExecutor;

/// Default maximum turns before the agent gives up.
pub const DEFAULT_TURN_LIMIT: u32 = 50;
/// Default consecutive-error threshold.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// Nudge appended when a response carries no tool call.
const CONTINUE_NUDGE: &str = "Please continue with the task. Use tools to make progress, or call \
     task_complete when done. Output your tool call as a JSON object with 'name' and 'arguments' \
     fields.";

/// Chat seam the agent drives; implemented by the LLM client and by test
/// doubles.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> DomainResult<LlmResponse>;
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> DomainResult<LlmResponse> {
        LlmClient::chat(self, messages, tools).await
    }
}

/// Terminal status of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Completed,
    Blocked,
    Error,
    TurnLimit,
}

/// Result of an agent run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub summary: String,
    pub files_changed: Vec<String>,
    pub error: Option<String>,
    pub blocker_type: Option<String>,
    pub question: Option<String>,
    pub turns_used: u32,
}

impl AgentResult {
    fn new(status: AgentStatus, summary: impl Into<String>, turns_used: u32) -> Self {
        Self {
            status,
            summary: summary.into(),
            files_changed: Vec::new(),
            error: None,
            blocker_type: None,
            question: None,
            turns_used,
        }
    }
}

/// Autonomous agent that works one issue to completion.
pub struct MinionAgent {
    llm: Arc<dyn ChatBackend>,
    executor: Arc<ToolExecutor>,
    system_prompt: String,
    tools: Vec<Value>,
    turn_limit: u32,
    error_threshold: u32,
    parser: ResponseParser,
    messages: Vec<ChatMessage>,
    turn_count: u32,
    consecutive_errors: u32,
    completed: bool,
}

impl MinionAgent {
    pub fn new(
        llm: Arc<dyn ChatBackend>,
        executor: Arc<ToolExecutor>,
        system_prompt: impl Into<String>,
        tools: Vec<Value>,
    ) -> Self {
        Self {
            llm,
            executor,
            system_prompt: system_prompt.into(),
            tools,
            turn_limit: DEFAULT_TURN_LIMIT,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            parser: ResponseParser::new(),
            messages: Vec::new(),
            turn_count: 0,
            consecutive_errors: 0,
            completed: false,
        }
    }

    pub fn with_turn_limit(mut self, turn_limit: u32) -> Self {
        self.turn_limit = turn_limit;
        self
    }

    pub fn with_error_threshold(mut self, error_threshold: u32) -> Self {
        self.error_threshold = error_threshold;
        self
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Resume the loop with a synthetic user message, e.g. a human answer
    /// after a question.
    pub fn inject_message(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
        self.completed = false;
    }

    /// Drive the agent loop until a terminal tool fires, the turn limit is
    /// reached, or errors accumulate past the threshold.
    pub async fn run(&mut self) -> AgentResult {
        tracing::info!("Starting agent loop");

        if self.messages.is_empty() {
            self.messages
                .push(ChatMessage::system(self.system_prompt.clone()));
        }

        while !self.completed && self.turn_count < self.turn_limit {
            self.turn_count += 1;
            tracing::info!(turn = self.turn_count, limit = self.turn_limit, "Agent turn");

            let response = match self.llm.chat(&self.messages, Some(&self.tools)).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "LLM call failed");
                    self.consecutive_errors += 1;
                    if self.consecutive_errors >= self.error_threshold {
                        let mut result = AgentResult::new(
                            AgentStatus::Error,
                            format!("Too many consecutive errors: {e}"),
                            self.turn_count,
                        );
                        result.error = Some(e.to_string());
                        return result;
                    }
                    continue;
                }
            };

            if let Some(result) = self.process_response(response).await {
                return result;
            }
        }

        tracing::warn!(limit = self.turn_limit, "Agent hit turn limit");
        AgentResult::new(
            AgentStatus::TurnLimit,
            format!("Reached turn limit of {}", self.turn_limit),
            self.turn_count,
        )
    }

    async fn process_response(&mut self, response: LlmResponse) -> Option<AgentResult> {
        // Native structured tool calls win; otherwise fall back to JSON
        // extraction from the text content.
        let mut tool_calls = response.tool_calls.clone();
        if tool_calls.is_empty() && !response.content.is_empty() {
            tool_calls = self.parser.parse(&response.content);
            if !tool_calls.is_empty() {
                tracing::info!(count = tool_calls.len(), "Extracted tool calls from content");
            }
        }

        let content = if response.content.is_empty() {
            None
        } else {
            Some(response.content.clone())
        };
        self.messages
            .push(ChatMessage::assistant(content, &tool_calls));

        if tool_calls.is_empty() {
            tracing::debug!("No tool calls found, prompting to continue");
            self.messages.push(ChatMessage::user(CONTINUE_NUDGE));
            return None;
        }

        for call in tool_calls {
            let result = self.execute_tool_call(&call).await;

            match result.name.as_str() {
                "task_complete" => return Some(self.handle_task_complete(&call)),
                "task_blocked" => return Some(self.handle_task_blocked(&call)),
                _ => {}
            }

            self.messages.push(ChatMessage::tool(&result));

            if result.success {
                self.consecutive_errors = 0;
            } else {
                self.consecutive_errors += 1;
                if self.consecutive_errors >= self.error_threshold {
                    let mut terminal = AgentResult::new(
                        AgentStatus::Error,
                        "Too many consecutive tool errors",
                        self.turn_count,
                    );
                    terminal.error = result.error;
                    return Some(terminal);
                }
            }
        }

        None
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult {
        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                tracing::error!(tool = call.name, error = %e, "Invalid tool arguments");
                return ToolResult::failure(call.id.clone(), call.name.clone(), e);
            }
        };

        tracing::info!(tool = call.name, "Executing tool");
        let mut result = self.executor.execute(&call.name, &args).await;
        result.tool_call_id = call.id.clone();
        result
    }

    fn parsed_args(call: &ToolCall) -> Map<String, Value> {
        call.parse_arguments().unwrap_or_default()
    }

    fn handle_task_complete(&mut self, call: &ToolCall) -> AgentResult {
        self.completed = true;
        let args = Self::parsed_args(call);

        let summary = args
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("Task completed")
            .to_string();
        let files_changed = args
            .get("files_changed")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!(summary, "Agent completed");
        let mut result = AgentResult::new(AgentStatus::Completed, summary, self.turn_count);
        result.files_changed = files_changed;
        result
    }

    fn handle_task_blocked(&mut self, call: &ToolCall) -> AgentResult {
        self.completed = true;
        let args = Self::parsed_args(call);

        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("Task blocked")
            .to_string();
        let blocker_type = args
            .get("blocker_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let question = args
            .get("question")
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::warn!(reason, "Agent blocked");
        let mut result = AgentResult::new(AgentStatus::Blocked, reason, self.turn_count);
        result.blocker_type = Some(blocker_type);
        result.question = question;
        result
    }
}
