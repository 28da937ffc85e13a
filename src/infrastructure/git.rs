//! Git operations in the Minion workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

/// Timeout applied to every git subprocess.
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a git operation.
#[derive(Debug, Clone)]
pub struct GitResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub return_code: i32,
}

impl GitResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            return_code: -1,
        }
    }
}

/// Handles git operations in the Minion workspace.
pub struct GitOps {
    workspace: PathBuf,
    repo_path: PathBuf,
}

impl GitOps {
    /// `workspace` is the directory clones land in; `repo_name` is
    /// `owner/name`.
    pub fn new(workspace: impl Into<PathBuf>, repo_name: &str) -> Self {
        let workspace = workspace.into();
        let dir_name = repo_name.rsplit('/').next().unwrap_or(repo_name);
        let repo_path = workspace.join(dir_name);
        Self {
            workspace,
            repo_path,
        }
    }

    /// Path of the cloned repository.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> GitResult {
        let work_dir = cwd.unwrap_or(&self.repo_path);
        tracing::debug!(args = ?args, cwd = %work_dir.display(), "Running git");

        let child = Command::new("git")
            .args(args)
            .current_dir(work_dir)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(GIT_TIMEOUT, child).await {
            Ok(Ok(output)) => GitResult {
                success: output.status.success(),
                output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                return_code: output.status.code().unwrap_or(-1),
            },
            Ok(Err(e)) => GitResult::failure(e.to_string()),
            Err(_) => GitResult::failure("Git command timed out"),
        }
    }

    /// Clone the repository. The clone URL embeds the auth token.
    pub async fn clone_repo(&self, clone_url: &str) -> GitResult {
        tracing::info!(dest = %self.repo_path.display(), "Cloning repository");
        let dest = self.repo_path.to_string_lossy().to_string();
        let result = self
            .run_git(
                &["clone", "--depth", "100", clone_url, &dest],
                Some(&self.workspace),
            )
            .await;

        if result.success {
            tracing::info!("Clone complete");
        } else {
            tracing::error!(error = %result.error, "Clone failed");
        }
        result
    }

    /// Create and checkout a new branch.
    pub async fn create_branch(&self, branch_name: &str) -> GitResult {
        tracing::info!(branch = branch_name, "Creating branch");
        self.run_git(&["checkout", "-b", branch_name], None).await
    }

    /// Checkout an existing branch.
    pub async fn checkout(&self, branch_name: &str) -> GitResult {
        self.run_git(&["checkout", branch_name], None).await
    }

    /// Current branch name, or empty string on error.
    pub async fn current_branch(&self) -> String {
        let result = self
            .run_git(&["rev-parse", "--abbrev-ref", "HEAD"], None)
            .await;
        if result.success {
            result.output
        } else {
            String::new()
        }
    }

    /// Stage all changes.
    pub async fn stage_all(&self) -> GitResult {
        self.run_git(&["add", "-A"], None).await
    }

    /// Create a commit.
    pub async fn commit(&self, message: &str, author: Option<&str>) -> GitResult {
        let mut args = vec!["commit", "-m", message];
        if let Some(author) = author {
            args.push("--author");
            args.push(author);
        }
        let preview: String = message.chars().take(50).collect();
        tracing::info!(message = preview, "Committing");
        self.run_git(&args, None).await
    }

    /// Push the branch to the remote with upstream tracking.
    pub async fn push(&self, remote: &str, branch: &str) -> GitResult {
        tracing::info!(remote, branch, "Pushing");
        self.run_git(&["push", "-u", remote, branch], None).await
    }

    /// Fetch from the remote.
    pub async fn fetch(&self, remote: &str) -> GitResult {
        self.run_git(&["fetch", remote], None).await
    }

    /// Rebase the current branch onto another.
    pub async fn rebase(&self, onto: &str) -> GitResult {
        tracing::info!(onto, "Rebasing");
        self.run_git(&["rebase", onto], None).await
    }

    /// Abort an in-progress rebase.
    pub async fn abort_rebase(&self) -> GitResult {
        self.run_git(&["rebase", "--abort"], None).await
    }

    /// Push with automatic fetch-and-rebase retry on non-fast-forward
    /// rejection. A rebase conflict aborts the rebase and surfaces the push
    /// failure. Returns the final result and whether a rebase happened.
    pub async fn push_with_retry(
        &self,
        remote: &str,
        branch: &str,
        base_branch: &str,
        max_retries: u32,
    ) -> (GitResult, bool) {
        let mut rebased = false;
        let mut last = GitResult::failure("push never attempted");

        for attempt in 0..=max_retries {
            last = self.push(remote, branch).await;
            if last.success {
                return (last, rebased);
            }

            let rejected =
                last.error.contains("rejected") || last.error.contains("non-fast-forward");
            if !rejected {
                return (last, rebased);
            }

            tracing::warn!(attempt = attempt + 1, "Push rejected, attempting rebase");
            self.fetch(remote).await;

            let rebase_result = self.rebase(&format!("{remote}/{base_branch}")).await;
            if !rebase_result.success {
                self.abort_rebase().await;
                tracing::error!("Rebase failed, aborting");
                return (last, false);
            }
            rebased = true;
        }

        (last, rebased)
    }

    /// Changed files relative to the previous commit.
    pub async fn changed_files(&self) -> Vec<String> {
        let result = self.run_git(&["diff", "--name-only", "HEAD~1"], None).await;
        if result.success && !result.output.is_empty() {
            result.output.lines().map(str::to_string).collect()
        } else {
            Vec::new()
        }
    }

    /// Configure the git user for commits.
    pub async fn configure_user(&self, name: &str, email: &str) {
        self.run_git(&["config", "user.name", name], None).await;
        self.run_git(&["config", "user.email", email], None).await;
        tracing::debug!(name, email, "Configured git user");
    }
}
