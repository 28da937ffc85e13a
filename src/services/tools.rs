//! Tool vocabulary advertised to the Minion's LLM, in the OpenAI function
//! format.

use serde_json::{json, Value};

fn tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Build the full Minion tool vocabulary.
pub fn minion_tools() -> Vec<Value> {
    vec![
        tool(
            "read_file",
            "Read a file from the workspace. Optionally slice by 1-indexed line range.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "start_line": {"type": "integer", "description": "First line to include (1-indexed)"},
                    "end_line": {"type": "integer", "description": "Last line to include (inclusive)"}
                },
                "required": ["path"]
            }),
        ),
        tool(
            "write_file",
            "Write content to a file, creating parent directories as needed. Overwrites existing content.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "content": {"type": "string", "description": "Full file content"}
                },
                "required": ["path", "content"]
            }),
        ),
        tool(
            "edit_file",
            "Replace the first occurrence of old_text with new_text in a file.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "old_text": {"type": "string", "description": "Exact text to replace"},
                    "new_text": {"type": "string", "description": "Replacement text"}
                },
                "required": ["path", "old_text", "new_text"]
            }),
        ),
        tool(
            "list_directory",
            "List directory contents. Hidden entries and build caches are excluded.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative directory path", "default": "."},
                    "recursive": {"type": "boolean", "description": "Recurse into subdirectories", "default": false}
                }
            }),
        ),
        tool(
            "search_files",
            "Search file contents with a case-insensitive regex. Results are capped at 100 matches.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regex pattern"},
                    "path": {"type": "string", "description": "Directory or file to search", "default": "."},
                    "file_pattern": {"type": "string", "description": "Filename glob filter, e.g. *.rs"}
                },
                "required": ["pattern"]
            }),
        ),
        tool(
            "glob_files",
            "Find files matching a glob pattern relative to the workspace root.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Glob pattern, e.g. src/**/*.rs"}
                },
                "required": ["pattern"]
            }),
        ),
        tool(
            "run_command",
            "Run a shell command with the workspace as the working directory.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to run"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds", "default": 60}
                },
                "required": ["command"]
            }),
        ),
        tool(
            "task_complete",
            "Signal that the task is complete. Call this exactly once, when the work is done.",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "What was implemented"},
                    "files_changed": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Paths of files that were changed"
                    }
                },
                "required": ["summary"]
            }),
        ),
        tool(
            "task_blocked",
            "Signal that the task cannot proceed. Optionally ask a clarifying question.",
            json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "Why the task is blocked"},
                    "blocker_type": {
                        "type": "string",
                        "enum": ["missing_info", "too_complex", "unclear_requirements", "external_dependency"],
                        "description": "Category of blocker"
                    },
                    "question": {"type": "string", "description": "Question for a human, if one would unblock the task"}
                },
                "required": ["reason", "blocker_type"]
            }),
        ),
        tool(
            "list_skills",
            "List the skills available to this Minion.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "use_skill",
            "Load a skill's instructions into the conversation.",
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {"type": "string", "description": "Name of the skill to load"}
                },
                "required": ["skill_name"]
            }),
        ),
    ]
}
