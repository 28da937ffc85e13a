//! Write-scope policy enforced by the Minion tool sandbox.
//!
//! The Overlord hands each Minion a scope via the `MINION_SCOPE` environment
//! variable (a JSON array of glob patterns). An empty or malformed payload
//! degrades to unrestricted.

use glob::Pattern;
use serde::{Deserialize, Serialize};

/// Scope enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// Any path may be written.
    Unrestricted,
    /// Paths matching any glob pattern may be written.
    Directory,
    /// Only paths exactly equal to a listed pattern may be written.
    Explicit,
}

impl ScopeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrestricted => "unrestricted",
            Self::Directory => "directory",
            Self::Explicit => "explicit",
        }
    }
}

/// A Minion's write-path policy. Immutable after spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePolicy {
    pub mode: ScopeMode,
    pub patterns: Vec<String>,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self::unrestricted()
    }
}

impl ScopePolicy {
    /// Create an unrestricted scope.
    pub fn unrestricted() -> Self {
        Self {
            mode: ScopeMode::Unrestricted,
            patterns: Vec::new(),
        }
    }

    /// Create a directory-mode scope from glob patterns.
    pub fn directory(patterns: Vec<String>) -> Self {
        Self {
            mode: ScopeMode::Directory,
            patterns,
        }
    }

    /// Create an explicit-path scope.
    pub fn explicit(patterns: Vec<String>) -> Self {
        Self {
            mode: ScopeMode::Explicit,
            patterns,
        }
    }

    /// Parse a scope from the `MINION_SCOPE` JSON payload.
    ///
    /// Degrades to unrestricted when the payload is empty, is not a JSON
    /// array of strings, or is an empty array.
    pub fn from_json(json_str: &str) -> Self {
        if json_str.trim().is_empty() {
            return Self::unrestricted();
        }
        match serde_json::from_str::<Vec<String>>(json_str) {
            Ok(patterns) if !patterns.is_empty() => Self::directory(patterns),
            Ok(_) => Self::unrestricted(),
            Err(_) => {
                let preview: String = json_str.chars().take(100).collect();
                tracing::warn!(payload = preview, "Invalid MINION_SCOPE JSON, using unrestricted");
                Self::unrestricted()
            }
        }
    }

    /// Serialize the allowed patterns back to the JSON-array form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.patterns).unwrap_or_else(|_| "[]".to_string())
    }

    /// Check whether writing to a workspace-relative path is allowed.
    pub fn is_write_allowed(&self, path: &str) -> bool {
        match self.mode {
            ScopeMode::Unrestricted => true,
            ScopeMode::Explicit => self.patterns.iter().any(|p| p == path),
            ScopeMode::Directory => self
                .patterns
                .iter()
                .any(|p| Pattern::new(p).is_ok_and(|pat| pat.matches(path))),
        }
    }

    /// Build the machine-readable violation message for a denied path.
    ///
    /// Injected into the agent conversation so the LLM can recover or
    /// escalate via `task_blocked`.
    pub fn violation_message(&self, path: &str) -> String {
        let allowed = self.patterns.join(", ");
        format!(
            "Write to '{path}' is outside your assigned scope. \
             Allowed paths: [{allowed}]. \
             If you need to modify this file, use task_blocked to request expanded scope."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_allows_everything() {
        let scope = ScopePolicy::unrestricted();
        assert!(scope.is_write_allowed("README.md"));
        assert!(scope.is_write_allowed("src/deep/nested/file.rs"));
    }

    #[test]
    fn directory_mode_matches_globs() {
        let scope = ScopePolicy::directory(vec!["src/**".to_string()]);
        assert!(scope.is_write_allowed("src/main.rs"));
        assert!(scope.is_write_allowed("src/deep/nested/file.rs"));
        assert!(!scope.is_write_allowed("README.md"));
        assert!(!scope.is_write_allowed("tests/it.rs"));
    }

    #[test]
    fn explicit_mode_requires_exact_match() {
        let scope = ScopePolicy::explicit(vec!["src/main.rs".to_string()]);
        assert!(scope.is_write_allowed("src/main.rs"));
        assert!(!scope.is_write_allowed("src/main.rs.bak"));
        assert!(!scope.is_write_allowed("src/lib.rs"));
    }

    #[test]
    fn from_json_parses_pattern_list() {
        let scope = ScopePolicy::from_json(r#"["src/**", "docs/*.md"]"#);
        assert_eq!(scope.mode, ScopeMode::Directory);
        assert_eq!(scope.patterns.len(), 2);
    }

    #[test]
    fn from_json_degrades_to_unrestricted() {
        assert_eq!(ScopePolicy::from_json(""), ScopePolicy::unrestricted());
        assert_eq!(ScopePolicy::from_json("  "), ScopePolicy::unrestricted());
        assert_eq!(ScopePolicy::from_json("[]"), ScopePolicy::unrestricted());
        assert_eq!(
            ScopePolicy::from_json("not json at all"),
            ScopePolicy::unrestricted()
        );
        assert_eq!(
            ScopePolicy::from_json(r#"{"mode": "directory"}"#),
            ScopePolicy::unrestricted()
        );
    }

    #[test]
    fn json_round_trip() {
        let scope = ScopePolicy::directory(vec!["src/**".to_string(), "Cargo.toml".to_string()]);
        let parsed = ScopePolicy::from_json(&scope.to_json());
        assert_eq!(parsed, scope);

        let unrestricted = ScopePolicy::unrestricted();
        assert_eq!(
            ScopePolicy::from_json(&unrestricted.to_json()),
            unrestricted
        );
    }

    #[test]
    fn violation_message_names_path_and_patterns() {
        let scope = ScopePolicy::directory(vec!["src/**".to_string()]);
        let msg = scope.violation_message("README.md");
        assert!(msg.contains("Write to 'README.md' is outside your assigned scope."));
        assert!(msg.contains("Allowed paths: [src/**]."));
        assert!(msg.contains("task_blocked"));
    }
}
