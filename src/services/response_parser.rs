//! Tool-call extraction from free-form LLM responses.
//!
//! Local models frequently lack native function calling and emit tool calls
//! as JSON inside prose. This parser scans for balanced top-level JSON
//! objects and arrays, repairs the common local-model defects (unescaped
//! newlines inside strings, single-quoted literals), and normalizes
//! whatever survives into [`ToolCall`]s. No I/O and no hidden state.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::domain::models::conversation::ToolCall;

fn special_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|.*?\|>").expect("valid regex"))
}

/// Parses LLM responses to extract tool calls from text content.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract raw tool-call objects from response text.
    ///
    /// Handles single objects, arrays of calls, mixed text and JSON,
    /// single-quoted literals, and unescaped newlines inside strings. A
    /// candidate is kept when it carries a `name` or `command` field.
    pub fn extract_tool_calls(&self, text: &str) -> Vec<Value> {
        let text = special_token_re().replace_all(text, "");
        let text = text.trim();
        let mut results = Vec::new();

        for candidate in find_json_candidates(text) {
            let Some(obj) = parse_candidate(&candidate) else {
                continue;
            };

            match obj {
                Value::Array(items) => {
                    results.extend(items.into_iter().filter(is_tool_call_shape));
                }
                value if is_tool_call_shape(&value) => results.push(value),
                _ => {}
            }
        }

        results
    }

    /// Normalize one extracted object into the standard tool-call form.
    ///
    /// Stringified JSON arguments are recursively parsed; a bare `command`
    /// at the root infers `run_shell_command`.
    pub fn normalize_tool_call(&self, extracted: &Value, index: usize) -> ToolCall {
        let empty = Map::new();
        let obj = extracted.as_object().unwrap_or(&empty);

        let mut args = obj
            .get("arguments")
            .or_else(|| obj.get("parameters"))
            .cloned()
            .unwrap_or_else(|| extracted.clone());

        // Unwrap stringified JSON, possibly nested more than once.
        while let Value::String(s) = &args {
            match serde_json::from_str::<Value>(s) {
                Ok(parsed) if parsed.is_object() || parsed.is_array() => args = parsed,
                _ => {
                    args = json!({ "raw": s });
                    break;
                }
            }
        }

        // A command at the root with unstructured arguments wins.
        if let Value::Object(map) = &args {
            if !map.contains_key("command") && obj.contains_key("command") {
                args = extracted.clone();
            }
        }

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("run_shell_command")
            .to_string();
        let thought = obj
            .get("thought")
            .and_then(Value::as_str)
            .map(str::to_string);

        ToolCall {
            id: format!("extracted_{index}"),
            name,
            arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
            thought,
        }
    }

    /// Normalize a list of extracted objects.
    pub fn normalize_all(&self, extracted: &[Value]) -> Vec<ToolCall> {
        extracted
            .iter()
            .enumerate()
            .map(|(i, v)| self.normalize_tool_call(v, i))
            .collect()
    }

    /// Extract and normalize in one pass.
    pub fn parse(&self, text: &str) -> Vec<ToolCall> {
        let extracted = self.extract_tool_calls(text);
        self.normalize_all(&extracted)
    }

    /// Strip special tokens from response text.
    pub fn clean_response_text(&self, text: &str) -> String {
        special_token_re().replace_all(text, "").trim().to_string()
    }
}

fn is_tool_call_shape(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("name") || o.contains_key("command"))
}

/// Parse one candidate: strict JSON first, then with newline repair, then
/// the permissive literal form. `None` skips the candidate silently.
fn parse_candidate(candidate: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }
    if let Ok(value) = serde_json::from_str(&fix_json_newlines(candidate)) {
        return Some(value);
    }
    serde_json::from_str(&relax_literals(&fix_json_newlines(candidate))).ok()
}

/// Find balanced JSON objects and arrays in text.
///
/// Depth is tracked outside string literals so braces inside strings do not
/// break candidates.
fn find_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' | ']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        candidates.push(text[start..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

/// Escape raw newlines and tabs that appear inside string literals.
///
/// Local models often emit actual newline characters inside JSON string
/// values instead of `\n` escapes.
fn fix_json_newlines(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            result.push(ch);
            escape_next = false;
        } else if ch == '\\' {
            result.push(ch);
            escape_next = true;
        } else if ch == '"' {
            result.push(ch);
            in_string = !in_string;
        } else if ch == '\n' && in_string {
            result.push_str("\\n");
        } else if ch == '\t' && in_string {
            result.push_str("\\t");
        } else {
            result.push(ch);
        }
    }

    result
}

/// Convert Python-style literals to JSON: single-quoted strings and the
/// `True`/`False`/`None` keywords.
fn relax_literals(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_double = false;
    let mut in_single = false;
    let mut escape_next = false;
    let mut word = String::new();

    let flush_word = |word: &mut String, result: &mut String| {
        if !word.is_empty() {
            match word.as_str() {
                "True" => result.push_str("true"),
                "False" => result.push_str("false"),
                "None" => result.push_str("null"),
                other => result.push_str(other),
            }
            word.clear();
        }
    };

    for ch in text.chars() {
        if in_double {
            result.push(ch);
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_double = false;
            }
            continue;
        }

        if in_single {
            if escape_next {
                // A quoted single quote needs no escape inside a
                // double-quoted output string.
                if ch == '\'' {
                    result.push('\'');
                } else {
                    result.push('\\');
                    result.push(ch);
                }
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '\'' {
                result.push('"');
                in_single = false;
            } else if ch == '"' {
                result.push_str("\\\"");
            } else {
                result.push(ch);
            }
            continue;
        }

        if ch.is_ascii_alphabetic() {
            word.push(ch);
            continue;
        }
        flush_word(&mut word, &mut result);

        match ch {
            '"' => {
                in_double = true;
                result.push(ch);
            }
            '\'' => {
                in_single = true;
                result.push('"');
            }
            _ => result.push(ch),
        }
    }
    flush_word(&mut word, &mut result);

    result
}
