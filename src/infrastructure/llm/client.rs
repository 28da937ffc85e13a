//! OpenAI-compatible chat-completions client.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::conversation::ChatMessage;

use super::pool::LlmPool;
use super::types::{ChatRequest, LlmResponse, StreamChunk, WireChatResponse, WireStreamChunk};

/// Configuration for the LLM client.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/v1".to_string(),
            model: "default".to_string(),
            api_key: "not-needed".to_string(),
            timeout: Duration::from_secs(600),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }
}

/// Chat client over an OpenAI-compatible backend, gated by the process-wide
/// pool when one is supplied.
pub struct LlmClient {
    http: ReqwestClient,
    config: LlmClientConfig,
    pool: Option<Arc<LlmPool>>,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig, pool: Option<Arc<LlmPool>>) -> DomainResult<Self> {
        let http = ReqwestClient::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DomainError::LlmError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, pool })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            tools: tools.map(<[Value]>::to_vec),
            tool_choice: tools.map(|_| "auto".to_string()),
            stream,
        }
    }

    /// Send a chat completion request, forwarding the tool vocabulary.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> DomainResult<LlmResponse> {
        let _slot = match &self.pool {
            Some(pool) => Some(pool.acquire().await?),
            None => None,
        };

        let result = self.send(messages, tools).await;
        if result.is_err() {
            if let Some(pool) = &self.pool {
                pool.record_error();
            }
        }
        result
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> DomainResult<LlmResponse> {
        tracing::debug!(message_count = messages.len(), "Sending chat request");

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages, tools, false))
            .send()
            .await
            .map_err(|e| DomainError::LlmError(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::LlmError(format!(
                "backend returned {status}: {body}"
            )));
        }

        let wire: WireChatResponse = response
            .json()
            .await
            .map_err(|e| DomainError::LlmError(format!("failed to parse response: {e}")))?;

        LlmResponse::from_wire(wire)
            .ok_or_else(|| DomainError::LlmError("response contained no choices".to_string()))
    }

    /// Streaming completion: yields delta chunks as the backend produces
    /// them. The pool slot is held for the life of the stream.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> DomainResult<BoxStream<'static, DomainResult<StreamChunk>>> {
        let slot = match &self.pool {
            Some(pool) => Some(pool.acquire().await?),
            None => None,
        };

        let response = match self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages, None, true))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if let Some(pool) = &self.pool {
                    pool.record_error();
                }
                return Err(DomainError::LlmError(format!("request failed: {e}")));
            }
        };

        let status = response.status();
        if !status.is_success() {
            if let Some(pool) = &self.pool {
                pool.record_error();
            }
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::LlmError(format!(
                "backend returned {status}: {body}"
            )));
        }

        let byte_stream = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            (byte_stream, String::new(), slot),
            |(mut bytes, mut buffer, slot)| async move {
                loop {
                    // Emit the next complete SSE event already in the buffer.
                    if let Some(pos) = buffer.find("\n\n") {
                        let event: String = buffer.drain(..pos + 2).collect();
                        if let Some(data) = parse_sse_data(&event) {
                            if data == "[DONE]" {
                                return None;
                            }
                            match serde_json::from_str::<WireStreamChunk>(&data) {
                                Ok(chunk) => {
                                    return Some((Ok(chunk.into_chunk()), (bytes, buffer, slot)))
                                }
                                Err(e) => {
                                    return Some((
                                        Err(DomainError::LlmError(format!(
                                            "bad stream chunk: {e}"
                                        ))),
                                        (bytes, buffer, slot),
                                    ))
                                }
                            }
                        }
                        continue;
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(DomainError::LlmError(format!("stream error: {e}"))),
                                (bytes, buffer, slot),
                            ))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    /// Single-turn chat without tools.
    pub async fn simple_chat(&self, prompt: &str, system: Option<&str>) -> DomainResult<String> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let response = self.chat(&messages, None).await?;
        Ok(response.content)
    }
}

/// Extract the `data:` payload from one SSE event block.
fn parse_sse_data(event: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
