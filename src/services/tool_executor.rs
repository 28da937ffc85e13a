//! Sandboxed tool execution for the Minion agent.
//!
//! Every path input is resolved against a fixed workspace root and rejected
//! when it escapes; writes additionally consult the scope policy. Failures
//! are regular results, never panics, and are recorded in failure memory
//! under the originating tool name.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use regex::RegexBuilder;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::domain::models::conversation::ToolResult;
use crate::domain::models::scope::ScopePolicy;
use crate::services::failure_memory::FailureMemory;

/// Maximum file size to read (5 MB).
const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
/// Maximum captured command output (100 KB).
const MAX_OUTPUT_SIZE: usize = 100 * 1024;
/// Default command timeout in seconds.
const DEFAULT_COMMAND_TIMEOUT: u64 = 60;
/// Directory listing cap.
const MAX_DIR_ENTRIES: usize = 500;
/// Search result cap.
const MAX_SEARCH_RESULTS: usize = 100;
/// Glob result cap.
const MAX_GLOB_RESULTS: usize = 200;

/// A skill visible to `list_skills`.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
}

/// Pluggable skill source consulted by `list_skills` / `use_skill`.
#[async_trait]
pub trait SkillLoader: Send + Sync {
    async fn list_skills(&self) -> Vec<SkillInfo>;
    async fn get_skill(&self, name: &str) -> Option<String>;
}

/// Executes the Minion tool vocabulary against a workspace root.
pub struct ToolExecutor {
    workspace: PathBuf,
    scope: ScopePolicy,
    skills: Option<Arc<dyn SkillLoader>>,
    failure_memory: Option<Arc<FailureMemory>>,
    session_id: String,
    loaded_skills: Mutex<Vec<String>>,
}

impl ToolExecutor {
    pub fn new(workspace: impl Into<PathBuf>, scope: ScopePolicy) -> Self {
        let workspace: PathBuf = workspace.into();
        let workspace = workspace.canonicalize().unwrap_or(workspace);
        Self {
            workspace,
            scope,
            skills: None,
            failure_memory: None,
            session_id: String::new(),
            loaded_skills: Mutex::new(Vec::new()),
        }
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillLoader>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_failure_memory(
        mut self,
        failure_memory: Arc<FailureMemory>,
        session_id: impl Into<String>,
    ) -> Self {
        self.failure_memory = Some(failure_memory);
        self.session_id = session_id.into();
        self
    }

    /// Skills loaded so far in this session.
    pub fn loaded_skills(&self) -> Vec<String> {
        self.loaded_skills
            .lock()
            .expect("loaded skills lock poisoned")
            .clone()
    }

    /// Execute a tool by name. Unknown names are a failure result.
    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> ToolResult {
        let result = match name {
            "read_file" => self.read_file(args),
            "write_file" => self.write_file(args),
            "edit_file" => self.edit_file(args),
            "list_directory" => self.list_directory(args),
            "search_files" => self.search_files(args),
            "glob_files" => self.glob_files(args),
            // run_shell_command is the name the response parser infers for a
            // bare command object.
            "run_command" | "run_shell_command" => self.run_command(args).await,
            "task_complete" => Self::task_complete(args),
            "task_blocked" => Self::task_blocked(args),
            "list_skills" => self.list_skills().await,
            "use_skill" => self.use_skill(args).await,
            other => ToolResult::failure("", other, format!("Unknown tool: {other}")),
        };

        if !result.success {
            if let (Some(memory), Some(error)) = (&self.failure_memory, &result.error) {
                if let Err(e) = memory
                    .record_failure(&self.session_id, name, error, Some(args))
                    .await
                {
                    tracing::warn!(error = %e, "Failed to record tool failure");
                }
            }
        }

        result
    }

    /// Resolve a workspace-relative path, rejecting escapes.
    fn resolve_path(&self, path: &str) -> Result<PathBuf, String> {
        let joined = self.workspace.join(path);
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(format!("Path escapes workspace: {path}"));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        // Resolve symlinks for paths that exist.
        let resolved = normalized.canonicalize().unwrap_or(normalized);
        if !resolved.starts_with(&self.workspace) {
            return Err(format!("Path escapes workspace: {path}"));
        }
        Ok(resolved)
    }

    fn relative_to_workspace<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.workspace).unwrap_or(path)
    }

    fn read_file(&self, args: &Map<String, Value>) -> ToolResult {
        let path = str_arg(args, "path");
        let resolved = match self.resolve_path(&path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure("", "read_file", e),
        };

        if !resolved.exists() {
            return ToolResult::failure("", "read_file", format!("File not found: {path}"));
        }
        if !resolved.is_file() {
            return ToolResult::failure("", "read_file", format!("Not a file: {path}"));
        }
        let size = resolved.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_SIZE {
            return ToolResult::failure("", "read_file", format!("File too large (>5MB): {path}"));
        }

        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => return ToolResult::failure("", "read_file", e.to_string()),
        };

        let start_line = args.get("start_line").and_then(Value::as_u64);
        let end_line = args.get("end_line").and_then(Value::as_u64);
        let content = if start_line.is_some() || end_line.is_some() {
            let lines: Vec<&str> = content.split_inclusive('\n').collect();
            let start = start_line.unwrap_or(1).saturating_sub(1) as usize;
            let end = end_line
                .map_or(lines.len(), |e| (e as usize).min(lines.len()))
                .max(start);
            if start >= lines.len() {
                String::new()
            } else {
                lines[start..end].concat()
            }
        } else {
            content
        };

        ToolResult::ok("", "read_file", content)
    }

    fn write_file(&self, args: &Map<String, Value>) -> ToolResult {
        let path = str_arg(args, "path");
        let content = str_arg(args, "content");

        if !self.scope.is_write_allowed(&path) {
            return ToolResult::failure("", "write_file", self.scope.violation_message(&path));
        }

        let resolved = match self.resolve_path(&path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure("", "write_file", e),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::failure("", "write_file", e.to_string());
            }
        }

        // Write to a sibling temp file, then rename over the target, so a
        // crash cannot leave a half-written file.
        let tmp = resolved.with_extension("nebulus-tmp");
        if let Err(e) = std::fs::write(&tmp, &content) {
            return ToolResult::failure("", "write_file", e.to_string());
        }
        if let Err(e) = std::fs::rename(&tmp, &resolved) {
            let _ = std::fs::remove_file(&tmp);
            return ToolResult::failure("", "write_file", e.to_string());
        }

        ToolResult::ok(
            "",
            "write_file",
            format!("Wrote {} bytes to {path}", content.len()),
        )
    }

    fn edit_file(&self, args: &Map<String, Value>) -> ToolResult {
        let path = str_arg(args, "path");
        let old_text = str_arg(args, "old_text");
        let new_text = str_arg(args, "new_text");

        if !self.scope.is_write_allowed(&path) {
            return ToolResult::failure("", "edit_file", self.scope.violation_message(&path));
        }

        let resolved = match self.resolve_path(&path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure("", "edit_file", e),
        };
        if !resolved.exists() {
            return ToolResult::failure("", "edit_file", format!("File not found: {path}"));
        }

        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => return ToolResult::failure("", "edit_file", e.to_string()),
        };

        if !content.contains(&old_text) {
            let preview: String = old_text.chars().take(50).collect();
            return ToolResult::failure(
                "",
                "edit_file",
                format!("Text not found in file: {preview}..."),
            );
        }

        let new_content = content.replacen(&old_text, &new_text, 1);
        if let Err(e) = std::fs::write(&resolved, new_content) {
            return ToolResult::failure("", "edit_file", e.to_string());
        }

        ToolResult::ok("", "edit_file", format!("Replaced text in {path}"))
    }

    fn list_directory(&self, args: &Map<String, Value>) -> ToolResult {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let recursive = args
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = match self.resolve_path(&path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure("", "list_directory", e),
        };
        if !resolved.exists() {
            return ToolResult::failure("", "list_directory", format!("Directory not found: {path}"));
        }
        if !resolved.is_dir() {
            return ToolResult::failure("", "list_directory", format!("Not a directory: {path}"));
        }

        let mut entries = Vec::new();
        if recursive {
            collect_entries(&resolved, &resolved, &mut entries);
        } else {
            let mut children: Vec<PathBuf> = match std::fs::read_dir(&resolved) {
                Ok(iter) => iter.flatten().map(|e| e.path()).collect(),
                Err(e) => return ToolResult::failure("", "list_directory", e.to_string()),
            };
            children.sort();
            for child in children {
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if name.starts_with('.') {
                    continue;
                }
                if child.is_dir() {
                    entries.push(format!("{name}/"));
                } else {
                    entries.push(name);
                }
            }
        }

        let mut output: String = entries
            .iter()
            .take(MAX_DIR_ENTRIES)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if entries.len() > MAX_DIR_ENTRIES {
            output.push_str(&format!("\n... and {} more", entries.len() - MAX_DIR_ENTRIES));
        }

        ToolResult::ok("", "list_directory", output)
    }

    fn search_files(&self, args: &Map<String, Value>) -> ToolResult {
        let pattern = str_arg(args, "pattern");
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let file_pattern = args
            .get("file_pattern")
            .and_then(Value::as_str)
            .and_then(|p| Pattern::new(p).ok());

        let regex = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(r) => r,
            Err(e) => {
                return ToolResult::failure("", "search_files", format!("Invalid regex pattern: {e}"))
            }
        };

        let resolved = match self.resolve_path(&path) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure("", "search_files", e),
        };
        if !resolved.exists() {
            return ToolResult::failure("", "search_files", format!("Path not found: {path}"));
        }

        let mut files = Vec::new();
        if resolved.is_file() {
            files.push(resolved.clone());
        } else {
            collect_files(&resolved, &mut files);
        }
        files.sort();

        let mut results = Vec::new();
        'files: for file in files {
            let size = file.metadata().map(|m| m.len()).unwrap_or(0);
            if size > MAX_FILE_SIZE {
                continue;
            }
            if let Some(fp) = &file_pattern {
                let name = file.file_name().map(|n| n.to_string_lossy().to_string());
                if !name.is_some_and(|n| fp.matches(&n)) {
                    continue;
                }
            }
            let rel = self.relative_to_workspace(&file).to_string_lossy().to_string();
            if is_ignored_rel_path(&rel) {
                continue;
            }

            // Binary files fail UTF-8 decoding and are skipped.
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    let trimmed: String = line.trim().chars().take(100).collect();
                    results.push(format!("{rel}:{}: {trimmed}", line_no + 1));
                    if results.len() >= MAX_SEARCH_RESULTS {
                        break 'files;
                    }
                }
            }
        }

        let mut output = results.join("\n");
        if results.len() >= MAX_SEARCH_RESULTS {
            output.push_str("\n... (results truncated)");
        }
        if output.is_empty() {
            output = "No matches found".to_string();
        }

        ToolResult::ok("", "search_files", output)
    }

    fn glob_files(&self, args: &Map<String, Value>) -> ToolResult {
        let pattern = str_arg(args, "pattern");
        let full_pattern = self.workspace.join(&pattern);

        let paths = match glob::glob(&full_pattern.to_string_lossy()) {
            Ok(paths) => paths,
            Err(e) => return ToolResult::failure("", "glob_files", e.to_string()),
        };

        let mut matches: Vec<String> = paths
            .flatten()
            .filter_map(|p| {
                let rel = self.relative_to_workspace(&p).to_string_lossy().to_string();
                if is_ignored_rel_path(&rel) {
                    None
                } else {
                    Some(rel)
                }
            })
            .collect();
        matches.sort();

        let mut output: String = matches
            .iter()
            .take(MAX_GLOB_RESULTS)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if matches.len() > MAX_GLOB_RESULTS {
            output.push_str(&format!("\n... and {} more", matches.len() - MAX_GLOB_RESULTS));
        }
        if output.is_empty() {
            output = "No files found".to_string();
        }

        ToolResult::ok("", "glob_files", output)
    }

    async fn run_command(&self, args: &Map<String, Value>) -> ToolResult {
        let command = str_arg(args, "command");
        if command.is_empty() {
            return ToolResult::failure("", "run_command", "No command specified");
        }
        let timeout = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::failure("", "run_command", e.to_string()),
            Err(_) => {
                return ToolResult::failure(
                    "",
                    "run_command",
                    format!("Command timed out after {timeout}s"),
                )
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push_str("\n[stderr]\n");
            combined.push_str(&stderr);
        }
        if combined.len() > MAX_OUTPUT_SIZE {
            let mut cut = MAX_OUTPUT_SIZE;
            while !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            combined.truncate(cut);
            combined.push_str("\n... (output truncated)");
        }

        if output.status.success() {
            ToolResult::ok("", "run_command", combined)
        } else {
            let code = output.status.code().unwrap_or(-1);
            ToolResult {
                tool_call_id: String::new(),
                name: "run_command".to_string(),
                success: false,
                output: combined,
                error: Some(format!("Exit code: {code}")),
            }
        }
    }

    fn task_complete(args: &Map<String, Value>) -> ToolResult {
        let summary = args
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("Task completed");
        ToolResult::ok("", "task_complete", summary)
    }

    fn task_blocked(args: &Map<String, Value>) -> ToolResult {
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("Task blocked");
        ToolResult::ok("", "task_blocked", reason)
    }

    async fn list_skills(&self) -> ToolResult {
        let Some(skills) = &self.skills else {
            return ToolResult::ok("", "list_skills", "No skills available");
        };
        let available = skills.list_skills().await;
        if available.is_empty() {
            return ToolResult::ok("", "list_skills", "No skills available");
        }

        let mut lines = vec!["Available skills:".to_string()];
        for skill in available {
            lines.push(format!("- {}: {}", skill.name, skill.description));
        }
        ToolResult::ok("", "list_skills", lines.join("\n"))
    }

    async fn use_skill(&self, args: &Map<String, Value>) -> ToolResult {
        let skill_name = str_arg(args, "skill_name");
        let Some(skills) = &self.skills else {
            return ToolResult::failure("", "use_skill", "Skill system not available");
        };

        match skills.get_skill(&skill_name).await {
            Some(instructions) => {
                self.loaded_skills
                    .lock()
                    .expect("loaded skills lock poisoned")
                    .push(skill_name.clone());
                ToolResult::ok(
                    "",
                    "use_skill",
                    format!("Loaded skill '{skill_name}':\n\n{instructions}"),
                )
            }
            None => ToolResult::failure("", "use_skill", format!("Skill not found: {skill_name}")),
        }
    }
}

fn str_arg(args: &Map<String, Value>, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn is_ignored_component(name: &str) -> bool {
    name.starts_with('.') || name == "__pycache__" || name == "node_modules" || name == "target"
}

fn is_ignored_rel_path(rel: &str) -> bool {
    rel.split(['/', '\\']).any(is_ignored_component)
}

/// Recursively collect display entries for `list_directory`, skipping
/// hidden and cache directories.
fn collect_entries(root: &Path, dir: &Path, entries: &mut Vec<String>) {
    let mut children: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(iter) => iter.flatten().map(|e| e.path()).collect(),
        Err(_) => return,
    };
    children.sort();

    for child in children {
        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if is_ignored_component(&name) {
            continue;
        }
        let rel = child.strip_prefix(root).unwrap_or(&child).to_string_lossy().to_string();
        if child.is_dir() {
            entries.push(format!("{rel}/"));
            collect_entries(root, &child, entries);
        } else {
            entries.push(rel);
        }
    }
}

/// Recursively collect files for `search_files`.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(iter) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in iter.flatten() {
        let path = entry.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if is_ignored_component(&name) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, files);
        } else if path.is_file() {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn executor(dir: &TempDir) -> ToolExecutor {
        ToolExecutor::new(dir.path(), ScopePolicy::unrestricted())
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let write = exec
            .execute(
                "write_file",
                &args(json!({"path": "src/lib.rs", "content": "pub fn id() {}\n"})),
            )
            .await;
        assert!(write.success, "{:?}", write.error);

        let read = exec
            .execute("read_file", &args(json!({"path": "src/lib.rs"})))
            .await;
        assert!(read.success);
        assert_eq!(read.output, "pub fn id() {}\n");
    }

    #[tokio::test]
    async fn read_file_line_range_is_one_indexed() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let read = exec
            .execute(
                "read_file",
                &args(json!({"path": "f.txt", "start_line": 2, "end_line": 3})),
            )
            .await;
        assert!(read.success);
        assert_eq!(read.output, "two\nthree\n");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let read = exec
            .execute("read_file", &args(json!({"path": "nope.txt"})))
            .await;
        assert!(!read.success);
        assert_eq!(read.error.as_deref(), Some("File not found: nope.txt"));
    }

    #[tokio::test]
    async fn path_escape_is_rejected_not_fatal() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        for path in ["../outside.txt", "a/../../outside.txt"] {
            let result = exec
                .execute("write_file", &args(json!({"path": path, "content": "x"})))
                .await;
            assert!(!result.success);
            assert!(
                result.error.as_deref().unwrap().contains("escapes workspace"),
                "unexpected error for {path}: {:?}",
                result.error
            );
        }
    }

    #[tokio::test]
    async fn scope_denial_produces_violation_message() {
        let dir = TempDir::new().unwrap();
        let exec = ToolExecutor::new(
            dir.path(),
            ScopePolicy::directory(vec!["src/**".to_string()]),
        );

        let denied = exec
            .execute(
                "write_file",
                &args(json!({"path": "README.md", "content": "x"})),
            )
            .await;
        assert!(!denied.success);
        let msg = denied.error.unwrap();
        assert!(msg.contains("Write to 'README.md' is outside your assigned scope."));
        assert!(msg.contains("Allowed paths: [src/**]."));
        assert!(!dir.path().join("README.md").exists());

        let allowed = exec
            .execute(
                "write_file",
                &args(json!({"path": "src/README.md", "content": "x"})),
            )
            .await;
        assert!(allowed.success);
        assert!(dir.path().join("src/README.md").exists());
    }

    #[tokio::test]
    async fn edit_file_replaces_first_occurrence() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        std::fs::write(dir.path().join("f.txt"), "aaa bbb aaa").unwrap();

        let edit = exec
            .execute(
                "edit_file",
                &args(json!({"path": "f.txt", "old_text": "aaa", "new_text": "ccc"})),
            )
            .await;
        assert!(edit.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "ccc bbb aaa"
        );
    }

    #[tokio::test]
    async fn edit_file_missing_text_fails() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        std::fs::write(dir.path().join("f.txt"), "content").unwrap();

        let edit = exec
            .execute(
                "edit_file",
                &args(json!({"path": "f.txt", "old_text": "absent", "new_text": "x"})),
            )
            .await;
        assert!(!edit.success);
        assert!(edit.error.unwrap().contains("Text not found"));
    }

    #[tokio::test]
    async fn list_directory_skips_hidden_entries() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        std::fs::write(dir.path().join("visible.txt"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let listing = exec
            .execute("list_directory", &args(json!({"path": "."})))
            .await;
        assert!(listing.success);
        assert!(listing.output.contains("visible.txt"));
        assert!(listing.output.contains("sub/"));
        assert!(!listing.output.contains(".hidden"));
    }

    #[tokio::test]
    async fn search_files_caps_and_labels_matches() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();

        let search = exec
            .execute(
                "search_files",
                &args(json!({"pattern": "FN ALPHA", "path": "."})),
            )
            .await;
        assert!(search.success);
        assert!(search.output.contains("a.rs:1:"), "{}", search.output);
    }

    #[tokio::test]
    async fn search_files_rejects_bad_regex() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let search = exec
            .execute("search_files", &args(json!({"pattern": "[unclosed"})))
            .await;
        assert!(!search.success);
        assert!(search.error.unwrap().contains("Invalid regex pattern"));
    }

    #[tokio::test]
    async fn glob_files_returns_relative_paths() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/b.txt"), "").unwrap();

        let result = exec
            .execute("glob_files", &args(json!({"pattern": "src/*.rs"})))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "src/a.rs");
    }

    #[tokio::test]
    async fn run_command_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let ok = exec
            .execute("run_command", &args(json!({"command": "echo hello"})))
            .await;
        assert!(ok.success);
        assert!(ok.output.contains("hello"));

        let fail = exec
            .execute("run_command", &args(json!({"command": "exit 3"})))
            .await;
        assert!(!fail.success);
        assert_eq!(fail.error.as_deref(), Some("Exit code: 3"));
    }

    #[tokio::test]
    async fn run_command_times_out() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let result = exec
            .execute(
                "run_command",
                &args(json!({"command": "sleep 5", "timeout": 1})),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn run_shell_command_aliases_run_command() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let result = exec
            .execute("run_shell_command", &args(json!({"command": "echo aliased"})))
            .await;
        assert!(result.success);
        assert!(result.output.contains("aliased"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_result() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let result = exec.execute("teleport", &Map::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool: teleport"));
    }

    #[tokio::test]
    async fn terminal_tools_echo_their_payload() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let complete = exec
            .execute("task_complete", &args(json!({"summary": "Added multiply"})))
            .await;
        assert!(complete.success);
        assert_eq!(complete.output, "Added multiply");

        let blocked = exec
            .execute(
                "task_blocked",
                &args(json!({"reason": "Spec unclear", "blocker_type": "unclear_requirements"})),
            )
            .await;
        assert!(blocked.success);
        assert_eq!(blocked.output, "Spec unclear");
    }

    struct FixedSkills;

    #[async_trait]
    impl SkillLoader for FixedSkills {
        async fn list_skills(&self) -> Vec<SkillInfo> {
            vec![SkillInfo {
                name: "deploy".to_string(),
                description: "Deployment checklist".to_string(),
            }]
        }

        async fn get_skill(&self, name: &str) -> Option<String> {
            (name == "deploy").then(|| "1. Build\n2. Ship".to_string())
        }
    }

    #[tokio::test]
    async fn skills_list_and_load() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir).with_skills(Arc::new(FixedSkills));

        let listing = exec.execute("list_skills", &Map::new()).await;
        assert!(listing.output.contains("deploy: Deployment checklist"));

        let loaded = exec
            .execute("use_skill", &args(json!({"skill_name": "deploy"})))
            .await;
        assert!(loaded.success);
        assert!(loaded.output.contains("1. Build"));
        assert_eq!(exec.loaded_skills(), vec!["deploy".to_string()]);

        let missing = exec
            .execute("use_skill", &args(json!({"skill_name": "unknown"})))
            .await;
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn file_at_size_limit_reads_one_over_fails() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let at_limit = vec![b'a'; MAX_FILE_SIZE as usize];
        std::fs::write(dir.path().join("limit.bin"), &at_limit).unwrap();
        let read = exec
            .execute("read_file", &args(json!({"path": "limit.bin"})))
            .await;
        assert!(read.success, "file exactly at the limit must read");

        let over = vec![b'a'; MAX_FILE_SIZE as usize + 1];
        std::fs::write(dir.path().join("over.bin"), &over).unwrap();
        let read = exec
            .execute("read_file", &args(json!({"path": "over.bin"})))
            .await;
        assert!(!read.success, "one byte over the limit must fail");
        assert!(read.error.unwrap().contains("File too large"));
    }
}
