//! LLM-based code review for pull requests.

use serde_json::Value;

use crate::domain::models::review::{InlineComment, PrDetails, ReviewDecision, ReviewResult};
use crate::infrastructure::llm::client::LlmClient;
use crate::services::response_parser::ResponseParser;

/// System prompt instructing strict JSON review output.
const CODE_REVIEW_PROMPT: &str = r#"You are an expert code reviewer. Analyze the pull request and provide a thorough review.

Your review should:
1. Check for bugs, logic errors, and edge cases
2. Identify security vulnerabilities
3. Assess code quality and maintainability
4. Verify the changes align with the PR description
5. Suggest improvements where appropriate

Respond with a JSON object in this exact format:
{
  "decision": "APPROVE" | "REQUEST_CHANGES" | "COMMENT",
  "confidence": 0.0-1.0,
  "summary": "Brief summary of review",
  "issues": ["List of issues found"],
  "suggestions": ["List of improvement suggestions"],
  "inline_comments": [
    {"path": "file.py", "line": 10, "body": "Comment text"}
  ]
}

Guidelines for decision:
- APPROVE: Code is ready to merge, any issues are minor
- REQUEST_CHANGES: Code has bugs, security issues, or significant problems
- COMMENT: Code is acceptable but has notable suggestions

Be concise but thorough. Focus on actionable feedback."#;

/// Reviews PR code changes through the LLM.
pub struct LlmReviewer {
    client: LlmClient,
    max_diff_lines: usize,
}

impl LlmReviewer {
    pub fn new(client: LlmClient, max_diff_lines: usize) -> Self {
        Self {
            client,
            max_diff_lines,
        }
    }

    /// Review a pull request. Transport or parse failures degrade to a
    /// COMMENT result with confidence 0.
    pub async fn review_pr(&self, pr_details: &PrDetails) -> ReviewResult {
        tracing::info!(
            repo = pr_details.repo,
            pr = pr_details.number,
            "Starting LLM review"
        );

        let user_prompt = self.build_review_prompt(pr_details);
        match self
            .client
            .simple_chat(&user_prompt, Some(CODE_REVIEW_PROMPT))
            .await
        {
            Ok(content) => parse_review_response(&content),
            Err(e) => {
                tracing::error!(error = %e, "LLM review failed");
                ReviewResult::comment_with_issue(
                    format!("LLM review failed: {e}"),
                    format!("Review error: {e}"),
                )
            }
        }
    }

    fn build_review_prompt(&self, pr_details: &PrDetails) -> String {
        [
            "# Pull Request Review Request".to_string(),
            String::new(),
            pr_details.diff_summary(),
            String::new(),
            "## Code Changes".to_string(),
            pr_details.full_diff(self.max_diff_lines),
        ]
        .join("\n")
    }
}

/// Parse the LLM's free-form response into a [`ReviewResult`].
///
/// The JSON object is located with the same balanced-candidate scanning the
/// agent's response parser uses; unknown decisions map to COMMENT.
pub fn parse_review_response(content: &str) -> ReviewResult {
    let parser = ResponseParser::new();
    let cleaned = parser.clean_response_text(content);

    let candidate = find_review_object(&cleaned);
    let Some(data) = candidate else {
        tracing::warn!("No JSON found in LLM review response");
        return ReviewResult::comment_with_issue(
            "Could not parse LLM response",
            "Failed to parse review response",
        );
    };

    let decision = data
        .get("decision")
        .and_then(Value::as_str)
        .map_or(ReviewDecision::Comment, ReviewDecision::parse_lenient);

    let inline_comments = data
        .get("inline_comments")
        .and_then(Value::as_array)
        .map(|comments| {
            comments
                .iter()
                .filter_map(|c| {
                    let path = c.get("path")?.as_str()?;
                    let body = c.get("body")?.as_str()?;
                    Some(InlineComment {
                        path: path.to_string(),
                        line: c.get("line").and_then(Value::as_u64).unwrap_or(1),
                        body: body.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let string_list = |key: &str| -> Vec<String> {
        data.get(key)
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    ReviewResult {
        decision,
        summary: data
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("Review completed")
            .to_string(),
        confidence: data
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5),
        issues: string_list("issues"),
        suggestions: string_list("suggestions"),
        inline_comments,
        checks_passed: true,
    }
}

/// Find the review object among the JSON candidates in the text: the first
/// object carrying a `decision` field, else the first object.
fn find_review_object(text: &str) -> Option<Value> {
    let mut first_object = None;
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
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=i]) {
                            if value.get("decision").is_some() {
                                return Some(value);
                            }
                            first_object.get_or_insert(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    first_object
}

/// Format the combined review body posted to the host: LLM verdict plus the
/// checks section and auto-merge footer.
pub fn create_review_summary(
    pr_details: &PrDetails,
    llm_result: &ReviewResult,
    checks_summary: Option<&str>,
    min_confidence: f64,
) -> String {
    let mut lines = vec![
        format!("# AI Review: {}#{}", pr_details.repo, pr_details.number),
        String::new(),
        format!("**Title:** {}", pr_details.title),
        format!("**Decision:** {}", llm_result.decision.as_str()),
        format!("**Confidence:** {:.0}%", llm_result.confidence * 100.0),
        String::new(),
        "## Summary".to_string(),
        llm_result.summary.clone(),
    ];

    if !llm_result.issues.is_empty() {
        lines.push(String::new());
        lines.push("## Issues".to_string());
        for issue in &llm_result.issues {
            lines.push(format!("- {issue}"));
        }
    }

    if !llm_result.suggestions.is_empty() {
        lines.push(String::new());
        lines.push("## Suggestions".to_string());
        for suggestion in &llm_result.suggestions {
            lines.push(format!("- {suggestion}"));
        }
    }

    if let Some(checks_summary) = checks_summary {
        lines.push(String::new());
        lines.push(checks_summary.to_string());
    }

    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(format!(
        "*Auto-merge eligible: {}*",
        if llm_result.can_auto_merge(min_confidence) {
            "Yes"
        } else {
            "No"
        }
    ));

    if !llm_result.inline_comments.is_empty() {
        lines.push(String::new());
        lines.push("### Inline Comments".to_string());
        for comment in &llm_result.inline_comments {
            lines.push(String::new());
            lines.push(format!("**{}:{}**", comment.path, comment.line));
            lines.push(comment.body.clone());
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_review() {
        let content = r#"Here is my review:
{
  "decision": "APPROVE",
  "confidence": 0.9,
  "summary": "LGTM",
  "issues": [],
  "suggestions": ["Consider adding a docstring"],
  "inline_comments": [{"path": "src/math.py", "line": 1, "body": "nice"}]
}"#;
        let result = parse_review_response(content);
        assert_eq!(result.decision, ReviewDecision::Approve);
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert_eq!(result.summary, "LGTM");
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.inline_comments.len(), 1);
        assert_eq!(result.inline_comments[0].path, "src/math.py");
    }

    #[test]
    fn unknown_decision_maps_to_comment() {
        let content = r#"{"decision": "LOOKS_FINE", "confidence": 0.7, "summary": "ok"}"#;
        let result = parse_review_response(content);
        assert_eq!(result.decision, ReviewDecision::Comment);
    }

    #[test]
    fn unparseable_response_degrades_to_comment() {
        let result = parse_review_response("I simply cannot decide.");
        assert_eq!(result.decision, ReviewDecision::Comment);
        assert!((result.confidence).abs() < f64::EPSILON);
        assert_eq!(result.issues, vec!["Failed to parse review response"]);
    }

    #[test]
    fn prefers_object_with_decision_field() {
        let content = r#"
{"metadata": "irrelevant"}
{"decision": "REQUEST_CHANGES", "confidence": 0.8, "summary": "bugs", "issues": ["off-by-one"]}
"#;
        let result = parse_review_response(content);
        assert_eq!(result.decision, ReviewDecision::RequestChanges);
        assert_eq!(result.issues, vec!["off-by-one"]);
    }

    #[test]
    fn malformed_inline_comments_are_dropped() {
        let content = r#"{"decision": "COMMENT", "summary": "s",
            "inline_comments": [{"path": "a.py", "body": "ok"}, {"line": 3}, "nonsense"]}"#;
        let result = parse_review_response(content);
        assert_eq!(result.inline_comments.len(), 1);
        assert_eq!(result.inline_comments[0].line, 1);
    }

    #[test]
    fn summary_includes_checks_and_footer() {
        let pr = PrDetails {
            title: "Add multiply".to_string(),
            ..PrDetails::placeholder("org/repo", 100)
        };
        let result = ReviewResult {
            decision: ReviewDecision::Approve,
            summary: "LGTM".to_string(),
            confidence: 0.9,
            issues: vec![],
            suggestions: vec![],
            inline_comments: vec![],
            checks_passed: true,
        };

        let summary = create_review_summary(&pr, &result, Some("## Automated Checks Report"), 0.8);
        assert!(summary.contains("# AI Review: org/repo#100"));
        assert!(summary.contains("**Decision:** APPROVE"));
        assert!(summary.contains("**Confidence:** 90%"));
        assert!(summary.contains("## Automated Checks Report"));
        assert!(summary.contains("*Auto-merge eligible: Yes*"));
    }

    #[test]
    fn footer_reflects_ineligibility() {
        let pr = PrDetails::placeholder("org/repo", 1);
        let result = ReviewResult {
            decision: ReviewDecision::Approve,
            summary: "ok".to_string(),
            confidence: 0.5,
            issues: vec![],
            suggestions: vec![],
            inline_comments: vec![],
            checks_passed: true,
        };
        let summary = create_review_summary(&pr, &result, None, 0.8);
        assert!(summary.contains("*Auto-merge eligible: No*"));
    }

    #[tokio::test]
    async fn reviewer_sends_system_prompt_and_diff() {
        use crate::infrastructure::llm::client::{LlmClient, LlmClientConfig};

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJsonString(
                json!({"messages": [{"role": "system"}, {"role": "user"}]}).to_string(),
            ))
            .with_status(200)
            .with_body(
                json!({
                    "choices": [{
                        "message": {"content": "{\"decision\": \"APPROVE\", \"confidence\": 0.92, \"summary\": \"clean\"}"},
                        "finish_reason": "stop"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = LlmClient::new(
            LlmClientConfig {
                base_url: server.url(),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let reviewer = LlmReviewer::new(client, 500);

        let result = reviewer.review_pr(&PrDetails::placeholder("org/repo", 5)).await;
        assert_eq!(result.decision, ReviewDecision::Approve);
        mock.assert_async().await;
    }
}
