//! Cloud SDK adapters for Anthropic and Google backends.
//!
//! These share the pool-governed request contract of the local client and
//! additionally report token counts and the provider-resolved model id.

use std::time::Duration;

use reqwest::Client as ReqwestClient;
use serde_json::{json, Value};

use crate::domain::errors::{DomainError, DomainResult};

/// Supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Anthropic,
    Google,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }
}

/// Unified response from any cloud provider.
#[derive(Debug, Clone)]
pub struct CloudResponse {
    pub content: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub model: String,
    pub provider: CloudProvider,
}

/// Resolve a model alias to its full model id.
///
/// Unknown aliases pass through unchanged.
pub fn resolve_model(alias: &str, provider: CloudProvider) -> String {
    let resolved = match provider {
        CloudProvider::Anthropic => match alias {
            "sonnet" => "claude-sonnet-4-20250514",
            "opus" => "claude-opus-4-0520",
            "haiku" => "claude-haiku-4-20250514",
            other => other,
        },
        CloudProvider::Google => match alias {
            "gemini-2.5-pro" => "gemini-2.5-pro",
            "gemini-2.5-flash" => "gemini-2.5-flash",
            other => other,
        },
    };
    resolved.to_string()
}

/// Per-1M-token pricing: (input, output) in USD.
fn pricing(model: &str) -> Option<(f64, f64)> {
    match model {
        "claude-sonnet-4-20250514" => Some((3.0, 15.0)),
        "claude-opus-4-0520" => Some((15.0, 75.0)),
        "claude-haiku-4-20250514" => Some((0.80, 4.0)),
        "gemini-2.5-pro" => Some((1.25, 10.0)),
        "gemini-2.5-flash" => Some((0.15, 0.60)),
        _ => None,
    }
}

/// Estimate the USD cost for a token usage. Unknown models cost 0.0.
pub fn estimate_cost(tokens_input: u64, tokens_output: u64, model: &str) -> f64 {
    let Some((input_per_m, output_per_m)) = pricing(model) else {
        return 0.0;
    };
    tokens_input as f64 * input_per_m / 1_000_000.0
        + tokens_output as f64 * output_per_m / 1_000_000.0
}

fn build_http(timeout: Duration) -> DomainResult<ReqwestClient> {
    ReqwestClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DomainError::LlmError(format!("Failed to build HTTP client: {e}")))
}

/// Call the Anthropic Messages API with a single user prompt.
pub async fn call_anthropic(
    base_url: &str,
    prompt: &str,
    model: &str,
    api_key: &str,
    max_tokens: u32,
    timeout: Duration,
) -> DomainResult<CloudResponse> {
    let resolved = resolve_model(model, CloudProvider::Anthropic);
    let http = build_http(timeout)?;

    let response = http
        .post(format!("{}/v1/messages", base_url.trim_end_matches('/')))
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header("content-type", "application/json")
        .json(&json!({
            "model": resolved,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        }))
        .send()
        .await
        .map_err(|e| DomainError::LlmError(format!("Anthropic request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DomainError::LlmError(format!(
            "Anthropic API returned {status}: {body}"
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| DomainError::LlmError(format!("Anthropic parse failed: {e}")))?;

    let content = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(CloudResponse {
        content,
        tokens_input: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        tokens_output: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        model: resolved,
        provider: CloudProvider::Anthropic,
    })
}

/// Call the Google Generative Language API with a single user prompt.
pub async fn call_google(
    base_url: &str,
    prompt: &str,
    model: &str,
    api_key: &str,
    timeout: Duration,
) -> DomainResult<CloudResponse> {
    let resolved = resolve_model(model, CloudProvider::Google);
    let http = build_http(timeout)?;

    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        resolved
    );
    let response = http
        .post(url)
        .query(&[("key", api_key)])
        .json(&json!({
            "contents": [{"parts": [{"text": prompt}]}],
        }))
        .send()
        .await
        .map_err(|e| DomainError::LlmError(format!("Google request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DomainError::LlmError(format!(
            "Google API returned {status}: {body}"
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| DomainError::LlmError(format!("Google parse failed: {e}")))?;

    let content = body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(CloudResponse {
        content,
        tokens_input: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
        tokens_output: body["usageMetadata"]["candidatesTokenCount"]
            .as_u64()
            .unwrap_or(0),
        model: resolved,
        provider: CloudProvider::Google,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn alias_resolution() {
        assert_eq!(
            resolve_model("sonnet", CloudProvider::Anthropic),
            "claude-sonnet-4-20250514"
        );
        assert_eq!(
            resolve_model("gemini-2.5-flash", CloudProvider::Google),
            "gemini-2.5-flash"
        );
        // Unknown aliases pass through unchanged.
        assert_eq!(
            resolve_model("my-custom-model", CloudProvider::Anthropic),
            "my-custom-model"
        );
    }

    #[test]
    fn cost_estimation() {
        let cost = estimate_cost(1_000_000, 1_000_000, "claude-sonnet-4-20250514");
        assert!((cost - 18.0).abs() < 1e-9);

        assert!((estimate_cost(500, 500, "unknown-model")).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn anthropic_adapter_parses_usage() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "sk-test")
            .with_status(200)
            .with_body(
                json!({
                    "content": [{"type": "text", "text": "response text"}],
                    "usage": {"input_tokens": 12, "output_tokens": 34}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = call_anthropic(
            &server.url(),
            "hello",
            "sonnet",
            "sk-test",
            1024,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(response.content, "response text");
        assert_eq!(response.tokens_input, 12);
        assert_eq!(response.tokens_output, 34);
        assert_eq!(response.model, "claude-sonnet-4-20250514");
        assert_eq!(response.provider, CloudProvider::Anthropic);
    }

    #[tokio::test]
    async fn google_adapter_parses_candidates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1beta/models/gemini-2.5-pro:generateContent")
            .match_query(mockito::Matcher::UrlEncoded(
                "key".into(),
                "g-test".into(),
            ))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{"content": {"parts": [{"text": "answer"}]}}],
                    "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 9}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = call_google(
            &server.url(),
            "question",
            "gemini-2.5-pro",
            "g-test",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(response.content, "answer");
        assert_eq!(response.tokens_input, 7);
        assert_eq!(response.tokens_output, 9);
    }
}
