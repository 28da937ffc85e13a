//! Deterministic checks run against a PR's working tree.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use crate::domain::models::review::{CheckResult, CheckStatus, ChecksReport};

/// Wall-clock budget for the test run.
const TEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Budget for lint and complexity tools.
const TOOL_TIMEOUT: Duration = Duration::from_secs(60);
/// File-size warning thresholds.
const MAX_FILE_BYTES: u64 = 500 * 1024;
const MAX_LINE_COUNT: usize = 1000;

/// Security anti-patterns scanned in changed source files.
fn security_patterns() -> &'static [(Regex, &'static str)] {
    static TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"eval\s*\(", "Use of eval() is dangerous"),
            (r"exec\s*\(", "Use of exec() is dangerous"),
            (r"subprocess\.call\s*\([^)]*shell\s*=\s*True", "shell=True is risky"),
            (r"os\.system\s*\(", "os.system() is dangerous, use subprocess"),
            (r"pickle\.loads?\s*\(", "pickle can execute arbitrary code"),
            (r"__import__\s*\(", "Dynamic imports can be dangerous"),
            (r#"password\s*=\s*['"][^'"]+['"]"#, "Hardcoded password detected"),
            (r#"api_key\s*=\s*['"][^'"]+['"]"#, "Hardcoded API key detected"),
            (r#"secret\s*=\s*['"][^'"]+['"]"#, "Hardcoded secret detected"),
            (r"BEGIN\s+(RSA|DSA|EC)\s+PRIVATE\s+KEY", "Private key in code"),
        ]
        .into_iter()
        .map(|(pattern, description)| {
            (
                regex::RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("valid security regex"),
                description,
            )
        })
        .collect()
    })
}

enum ToolOutcome {
    Ran {
        exit_code: i32,
        stdout: String,
        #[allow(dead_code)]
        stderr: String,
    },
    Missing,
    TimedOut,
    Failed(String),
}

/// Runs the deterministic checks on a repository working tree.
pub struct CheckRunner {
    repo_path: PathBuf,
}

impl CheckRunner {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    async fn run_tool(&self, program: &str, args: &[&str], timeout: Duration) -> ToolOutcome {
        let child = Command::new(program)
            .args(args)
            .current_dir(&self.repo_path)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => ToolOutcome::Ran {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => ToolOutcome::Missing,
            Ok(Err(e)) => ToolOutcome::Failed(e.to_string()),
            Err(_) => ToolOutcome::TimedOut,
        }
    }

    /// Run all checks in order.
    pub async fn run_all_checks(&self, changed_files: &[String]) -> ChecksReport {
        let python_files: Vec<&str> = changed_files
            .iter()
            .filter(|f| f.ends_with(".py"))
            .map(String::as_str)
            .collect();

        ChecksReport {
            results: vec![
                self.check_tests().await,
                self.check_lint(&python_files).await,
                self.check_security_patterns(&python_files),
                self.check_complexity(&python_files).await,
                self.check_file_sizes(changed_files),
            ],
        }
    }

    /// Run the test suite. Exit code 5 means no tests were collected.
    pub async fn check_tests(&self) -> CheckResult {
        let name = "Tests (pytest)";
        match self
            .run_tool("python3", &["-m", "pytest", "--tb=no", "-q"], TEST_TIMEOUT)
            .await
        {
            ToolOutcome::Ran {
                exit_code: 0,
                stdout,
                ..
            } => {
                let passed = capture_count(&stdout, "passed")
                    .map_or_else(|| "all".to_string(), |n| n.to_string());
                CheckResult::new(name, CheckStatus::Passed, format!("{passed} tests passed"))
            }
            ToolOutcome::Ran { exit_code: 5, .. } => {
                CheckResult::new(name, CheckStatus::Skipped, "No tests found")
            }
            ToolOutcome::Ran { stdout, .. } => {
                let failed = capture_count(&stdout, "failed")
                    .map_or_else(|| "some".to_string(), |n| n.to_string());
                let tail: String = stdout
                    .chars()
                    .rev()
                    .take(500)
                    .collect::<String>()
                    .chars()
                    .rev()
                    .collect();
                CheckResult::new(name, CheckStatus::Failed, format!("{failed} tests failed"))
                    .with_details(tail)
            }
            ToolOutcome::TimedOut => {
                CheckResult::new(name, CheckStatus::Failed, "Tests timed out (>5 minutes)")
            }
            ToolOutcome::Missing => {
                CheckResult::new(name, CheckStatus::Skipped, "pytest not available")
            }
            ToolOutcome::Failed(e) => {
                CheckResult::new(name, CheckStatus::Failed, format!("Error running tests: {e}"))
            }
        }
    }

    /// Lint the changed source files.
    pub async fn check_lint(&self, python_files: &[&str]) -> CheckResult {
        let name = "Linting (ruff)";
        if python_files.is_empty() {
            return CheckResult::new(name, CheckStatus::Skipped, "No Python files changed");
        }

        let mut args = vec!["check", "--output-format=text"];
        args.extend(python_files);

        match self.run_tool("ruff", &args, TOOL_TIMEOUT).await {
            ToolOutcome::Ran { exit_code: 0, .. } => {
                CheckResult::new(name, CheckStatus::Passed, "No linting issues")
            }
            ToolOutcome::Ran { stdout, .. } => {
                let issues: Vec<String> = stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!("{} linting issues", issues.len()),
                )
                .with_file_issues(issues.into_iter().take(10).collect())
            }
            ToolOutcome::Missing => {
                CheckResult::new(name, CheckStatus::Skipped, "ruff not available")
            }
            ToolOutcome::TimedOut => {
                CheckResult::new(name, CheckStatus::Failed, "Lint timed out")
            }
            ToolOutcome::Failed(e) => {
                CheckResult::new(name, CheckStatus::Failed, format!("Error running ruff: {e}"))
            }
        }
    }

    /// Scan changed files for security anti-patterns.
    pub fn check_security_patterns(&self, python_files: &[&str]) -> CheckResult {
        let name = "Security Patterns";
        if python_files.is_empty() {
            return CheckResult::new(name, CheckStatus::Skipped, "No Python files changed");
        }

        let mut issues = Vec::new();
        for filepath in python_files {
            let full_path = self.repo_path.join(filepath);
            let Ok(content) = std::fs::read_to_string(&full_path) else {
                continue;
            };

            for (regex, description) in security_patterns() {
                for m in regex.find_iter(&content) {
                    let line_num = content[..m.start()].matches('\n').count() + 1;
                    issues.push(format!("{filepath}:{line_num}: {description}"));
                }
            }
        }

        if issues.is_empty() {
            CheckResult::new(name, CheckStatus::Passed, "No security issues detected")
        } else {
            CheckResult::new(
                name,
                CheckStatus::Warning,
                format!("{} potential security issues", issues.len()),
            )
            .with_file_issues(issues)
        }
    }

    /// Complexity grading via radon.
    pub async fn check_complexity(&self, python_files: &[&str]) -> CheckResult {
        let name = "Complexity";
        if python_files.is_empty() {
            return CheckResult::new(name, CheckStatus::Skipped, "No Python files changed");
        }

        let mut args = vec!["cc", "-s", "-a"];
        args.extend(python_files);

        match self.run_tool("radon", &args, TOOL_TIMEOUT).await {
            ToolOutcome::Ran {
                exit_code: 0,
                stdout,
                ..
            } => Self::grade_complexity(&stdout),
            ToolOutcome::Ran { .. } => {
                CheckResult::new(name, CheckStatus::Skipped, "Complexity check failed")
            }
            ToolOutcome::Missing => {
                CheckResult::new(name, CheckStatus::Skipped, "radon not available")
            }
            ToolOutcome::TimedOut | ToolOutcome::Failed(_) => {
                CheckResult::new(name, CheckStatus::Skipped, "Could not check complexity")
            }
        }
    }

    fn grade_complexity(stdout: &str) -> CheckResult {
        let name = "Complexity";
        static GRADE_RE: OnceLock<Regex> = OnceLock::new();
        let re = GRADE_RE.get_or_init(|| {
            Regex::new(r"Average complexity:\s*([A-F])\s*\((\d+\.\d+)\)").expect("valid regex")
        });

        if let Some(caps) = re.captures(stdout) {
            let grade = &caps[1];
            let score = &caps[2];
            return match grade {
                "A" | "B" => CheckResult::new(
                    name,
                    CheckStatus::Passed,
                    format!("Average complexity: {grade} ({score})"),
                ),
                "C" => CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!("Moderate complexity: {grade} ({score})"),
                ),
                _ => CheckResult::new(
                    name,
                    CheckStatus::Warning,
                    format!("High complexity: {grade} ({score})"),
                ),
            };
        }

        CheckResult::new(name, CheckStatus::Passed, "Complexity within limits")
    }

    /// Flag oversized files.
    pub fn check_file_sizes(&self, changed_files: &[String]) -> CheckResult {
        let name = "File Sizes";
        let mut issues = Vec::new();

        for filepath in changed_files {
            let full_path = self.repo_path.join(filepath);
            let Ok(metadata) = full_path.metadata() else {
                continue;
            };

            let size = metadata.len();
            if size > MAX_FILE_BYTES {
                issues.push(format!(
                    "{filepath}: {}KB (>{}KB limit)",
                    size / 1024,
                    MAX_FILE_BYTES / 1024
                ));
                continue;
            }

            let is_source = [".py", ".js", ".ts", ".tsx", ".jsx", ".rs"]
                .iter()
                .any(|ext| filepath.ends_with(ext));
            if is_source {
                if let Ok(content) = std::fs::read_to_string(&full_path) {
                    let line_count = content.matches('\n').count();
                    if line_count > MAX_LINE_COUNT {
                        issues.push(format!(
                            "{filepath}: {line_count} lines (>{MAX_LINE_COUNT} limit)"
                        ));
                    }
                }
            }
        }

        if issues.is_empty() {
            CheckResult::new(name, CheckStatus::Passed, "All files within size limits")
        } else {
            CheckResult::new(
                name,
                CheckStatus::Warning,
                format!("{} large files", issues.len()),
            )
            .with_file_issues(issues)
        }
    }
}

fn capture_count(output: &str, keyword: &str) -> Option<u64> {
    let re = Regex::new(&format!(r"(\d+) {keyword}")).ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn capture_count_parses_pytest_summaries() {
        assert_eq!(capture_count("5 passed in 0.1s", "passed"), Some(5));
        assert_eq!(capture_count("2 failed, 3 passed", "failed"), Some(2));
        assert_eq!(capture_count("no tests ran", "passed"), None);
    }

    #[test]
    fn security_scan_flags_patterns_with_line_numbers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("danger.py"),
            "import os\nos.system('rm -rf /')\npassword = \"hunter2\"\n",
        )
        .unwrap();

        let runner = CheckRunner::new(dir.path());
        let result = runner.check_security_patterns(&["danger.py"]);

        assert_eq!(result.status, CheckStatus::Warning);
        assert!(result
            .file_issues
            .iter()
            .any(|i| i.starts_with("danger.py:2:") && i.contains("os.system")));
        assert!(result
            .file_issues
            .iter()
            .any(|i| i.starts_with("danger.py:3:") && i.contains("password")));
    }

    #[test]
    fn security_scan_passes_clean_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clean.py"), "def add(a, b):\n    return a + b\n").unwrap();

        let runner = CheckRunner::new(dir.path());
        let result = runner.check_security_patterns(&["clean.py"]);
        assert_eq!(result.status, CheckStatus::Passed);
    }

    #[test]
    fn security_scan_skips_without_python_files() {
        let runner = CheckRunner::new("/tmp");
        let result = runner.check_security_patterns(&[]);
        assert_eq!(result.status, CheckStatus::Skipped);
    }

    #[test]
    fn file_size_check_flags_long_files() {
        let dir = TempDir::new().unwrap();
        let long_file: String = (0..1500).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("long.py"), long_file).unwrap();
        std::fs::write(dir.path().join("short.py"), "x = 1\n").unwrap();

        let runner = CheckRunner::new(dir.path());
        let result =
            runner.check_file_sizes(&["long.py".to_string(), "short.py".to_string()]);

        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.file_issues.len(), 1);
        assert!(result.file_issues[0].contains("1500 lines"));
    }

    #[test]
    fn grade_mapping() {
        let passed = CheckRunner::grade_complexity("Average complexity: A (2.1)");
        assert_eq!(passed.status, CheckStatus::Passed);

        let moderate = CheckRunner::grade_complexity("Average complexity: C (12.0)");
        assert_eq!(moderate.status, CheckStatus::Warning);
        assert!(moderate.message.contains("Moderate"));

        let high = CheckRunner::grade_complexity("Average complexity: D (22.5)");
        assert_eq!(high.status, CheckStatus::Warning);
        assert!(high.message.contains("High"));

        let unparsed = CheckRunner::grade_complexity("nothing useful");
        assert_eq!(unparsed.status, CheckStatus::Passed);
    }

    #[tokio::test]
    async fn missing_tool_is_skipped() {
        let dir = TempDir::new().unwrap();
        let runner = CheckRunner::new(dir.path());
        // A program name that cannot exist on the PATH.
        let outcome = runner
            .run_tool("definitely-not-a-real-tool-9000", &[], TOOL_TIMEOUT)
            .await;
        assert!(matches!(outcome, ToolOutcome::Missing));
    }

    #[tokio::test]
    async fn run_all_checks_produces_five_results() {
        let dir = TempDir::new().unwrap();
        let runner = CheckRunner::new(dir.path());
        let report = runner.run_all_checks(&[]).await;
        assert_eq!(report.results.len(), 5);
    }
}
