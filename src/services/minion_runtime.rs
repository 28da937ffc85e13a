//! Minion lifecycle orchestration.
//!
//! Loads the environment contract, clones the target repository, drives the
//! agent (with a bounded clarifying-question loop), commits and pushes the
//! work with rebase retry, opens a PR, triggers the automated review, and
//! reports the outcome to the Overlord.
//!
//! Exit codes: 0 success, 1 any terminal error, 130 cooperative shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::scope::ScopePolicy;
use crate::infrastructure::git::GitOps;
use crate::infrastructure::github::{GitHubClient, GitHubIssue};
use crate::infrastructure::llm::client::{LlmClient, LlmClientConfig};
use crate::services::failure_memory::FailureMemory;
use crate::services::llm_review::LlmReviewer;
use crate::services::minion_agent::{AgentStatus, MinionAgent};
use crate::services::reporter::{
    Reporter, DEFAULT_ANSWER_POLL_INTERVAL_SECS, DEFAULT_ANSWER_TIMEOUT_SECS,
};
use crate::services::review_workflow::{ReviewWorkflow, WorkflowResult};
use crate::services::tool_executor::ToolExecutor;
use crate::services::tools::minion_tools;

/// Exit code for a cooperative shutdown on signal.
pub const EXIT_SHUTDOWN: i32 = 130;
/// Maximum clarifying questions per run.
pub const MAX_QUESTIONS: u32 = 3;

/// Configuration loaded from the environment contract with the Overlord.
#[derive(Debug, Clone)]
pub struct MinionConfig {
    pub minion_id: String,
    pub repo: String,
    pub issue_number: u64,
    pub github_token: String,
    pub overlord_callback_url: String,
    pub nebulus_base_url: String,
    pub nebulus_model: String,
    pub nebulus_timeout_secs: u64,
    pub nebulus_streaming: bool,
    pub minion_timeout_secs: u64,
    pub scope: ScopePolicy,
    pub workspace: PathBuf,
    pub revision_feedback: Option<String>,
    pub revision_number: u32,
    pub revision_branch: Option<String>,
}

impl MinionConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).unwrap_or_default();
        let var_or = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        Self {
            minion_id: var_or("MINION_ID", "minion-unknown"),
            repo: var("GITHUB_REPO"),
            issue_number: var("GITHUB_ISSUE").parse().unwrap_or(0),
            github_token: var("GITHUB_TOKEN"),
            overlord_callback_url: var_or(
                "OVERLORD_CALLBACK_URL",
                "http://overlord:8080/minion/report",
            ),
            nebulus_base_url: var_or("NEBULUS_BASE_URL", "http://localhost:5000/v1"),
            nebulus_model: var_or("NEBULUS_MODEL", "default"),
            nebulus_timeout_secs: var_or("NEBULUS_TIMEOUT", "600").parse().unwrap_or(600),
            nebulus_streaming: var("NEBULUS_STREAMING").to_lowercase() == "true",
            minion_timeout_secs: var_or("MINION_TIMEOUT", "1800").parse().unwrap_or(1800),
            scope: ScopePolicy::from_json(&var("MINION_SCOPE")),
            workspace: PathBuf::from(var_or("MINION_WORKSPACE", "/workspace")),
            revision_feedback: std::env::var("MINION_REVISION_FEEDBACK").ok(),
            revision_number: var("MINION_REVISION_NUMBER").parse().unwrap_or(0),
            revision_branch: std::env::var("MINION_BRANCH").ok(),
        }
    }

    /// Validate required fields; returns one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.repo.is_empty() {
            errors.push("GITHUB_REPO is required".to_string());
        }
        if self.issue_number == 0 {
            errors.push("GITHUB_ISSUE is required".to_string());
        }
        if self.github_token.is_empty() {
            errors.push("GITHUB_TOKEN is required".to_string());
        }
        errors
    }

    fn branch_name(&self) -> String {
        self.revision_branch
            .clone()
            .unwrap_or_else(|| format!("minion/issue-{}", self.issue_number))
    }
}

/// Build the agent's system prompt from the issue and run context.
pub fn build_system_prompt(
    config: &MinionConfig,
    issue: &GitHubIssue,
    failure_summary: &str,
) -> String {
    let mut sections = vec![format!(
        "You are an autonomous software engineer working on a GitHub issue.\n\
         Work methodically: read the relevant code before changing it, keep\n\
         changes minimal, and run the tests when they exist.\n\n\
         Repository: {}\n\
         Issue #{}: {}\n\
         Author: {}\n\
         Labels: {}\n\n\
         {}",
        config.repo,
        issue.number,
        issue.title,
        issue.author(),
        issue.label_names().join(", "),
        issue.body.as_deref().unwrap_or("(no description)"),
    )];

    if !config.scope.patterns.is_empty() {
        sections.push(format!(
            "Write scope: you may only modify paths matching [{}]. \
             Use task_blocked if you need to change anything else.",
            config.scope.patterns.join(", ")
        ));
    }

    if let Some(feedback) = &config.revision_feedback {
        sections.push(format!(
            "This is revision attempt {} of previously reviewed work. \
             Address this feedback before anything else:\n{}",
            config.revision_number, feedback
        ));
    }

    if !failure_summary.is_empty() {
        sections.push(failure_summary.to_string());
    }

    sections.push(
        "Use the provided tools to inspect and edit the repository. Call \
         task_complete with a summary when the issue is resolved, or \
         task_blocked if you cannot proceed."
            .to_string(),
    );

    sections.join("\n\n")
}

/// Generate the commit message for the Minion's work.
pub fn commit_message(config: &MinionConfig, issue_title: &str) -> String {
    let mut title: String = issue_title.chars().take(50).collect();
    if issue_title.chars().count() > 50 {
        title.push_str("...");
    }

    format!(
        "feat: {title}\n\nImplements #{}\n\nAutomated implementation by Nebulus Swarm Minion.\n\n\
         Minion-ID: {}\n",
        config.issue_number, config.minion_id
    )
}

/// Generate the PR body.
fn pr_body(config: &MinionConfig, changed_files: &[String]) -> String {
    let changes = if changed_files.is_empty() {
        "(No files changed)".to_string()
    } else {
        let mut lines: Vec<String> = changed_files
            .iter()
            .take(10)
            .map(|f| format!("- `{f}`"))
            .collect();
        if changed_files.len() > 10 {
            lines.push(format!("- ... and {} more files", changed_files.len() - 10));
        }
        lines.join("\n")
    };

    format!(
        "## Summary\n\nAutomated implementation for #{}.\n\n## Changes\n\n{changes}\n\n\
         ---\n\n*This PR was created automatically by Nebulus Swarm Minion `{}`*\n\n\
         Closes #{}\n",
        config.issue_number, config.minion_id, config.issue_number
    )
}

/// Orchestrates the full Minion lifecycle.
pub struct Minion {
    config: MinionConfig,
    github: Arc<GitHubClient>,
    reporter: Reporter,
    failure_memory: Option<Arc<FailureMemory>>,
    shutdown: Arc<AtomicBool>,
}

impl Minion {
    pub fn new(config: MinionConfig, failure_memory: Option<Arc<FailureMemory>>) -> Self {
        let github = Arc::new(GitHubClient::new(config.github_token.clone()));
        let reporter = Reporter::new(
            config.minion_id.clone(),
            config.issue_number,
            config.overlord_callback_url.clone(),
        );
        Self {
            config,
            github,
            reporter,
            failure_memory,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between lifecycle stages; set by the signal handler.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run the full lifecycle under the wall-clock timeout.
    pub async fn run(mut self) -> i32 {
        let timeout = Duration::from_secs(self.config.minion_timeout_secs);
        let outcome = {
            let lifecycle = self.run_lifecycle();
            tokio::pin!(lifecycle);
            tokio::time::timeout(timeout, &mut lifecycle).await
        };

        match outcome {
            Ok(code) => code,
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.config.minion_timeout_secs,
                    "Minion timed out"
                );
                self.reporter
                    .error(
                        "Minion timed out",
                        Some("timeout"),
                        Some(&format!(
                            "Exceeded {}s limit",
                            self.config.minion_timeout_secs
                        )),
                    )
                    .await;
                self.reporter.stop();
                1
            }
        }
    }

    async fn run_lifecycle(&mut self) -> i32 {
        self.reporter.start();

        let code = self.run_stages().await;

        self.reporter.stop();
        code
    }

    async fn run_stages(&mut self) -> i32 {
        // Step 1: fetch issue details.
        self.reporter.progress("Fetching issue details", None).await;
        let issue = match self
            .github
            .get_issue(&self.config.repo, self.config.issue_number)
            .await
        {
            Ok(issue) => issue,
            Err(e) => {
                self.reporter
                    .error("Failed to fetch issue", Some("github_error"), Some(&e.to_string()))
                    .await;
                return 1;
            }
        };
        tracing::info!(issue = issue.number, title = issue.title, "Fetched issue");

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 2: clone the repository.
        self.reporter.progress("Cloning repository", None).await;
        let git = GitOps::new(self.config.workspace.clone(), &self.config.repo);
        let clone_url = self.github.clone_url(&self.config.repo);
        let result = git.clone_repo(&clone_url).await;
        if !result.success {
            self.reporter
                .error("Failed to clone repository", Some("git_error"), Some(&result.error))
                .await;
            return 1;
        }
        git.configure_user(
            &format!("Minion {}", self.config.minion_id),
            "minion@nebulus.local",
        )
        .await;

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 3: create (or resume) the working branch.
        let branch_name = self.config.branch_name();
        self.reporter
            .progress(&format!("Creating branch: {branch_name}"), None)
            .await;
        let result = if self.config.revision_branch.is_some() {
            git.checkout(&branch_name).await
        } else {
            git.create_branch(&branch_name).await
        };
        if !result.success {
            self.reporter
                .error("Failed to create branch", Some("git_error"), Some(&result.error))
                .await;
            return 1;
        }

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 4: drive the agent.
        self.reporter.progress("Working on issue", None).await;
        let work = self.do_work(&issue, git.repo_path().to_path_buf()).await;
        let files_changed = match work {
            Ok(files_changed) => files_changed,
            Err(code) => return code,
        };

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 5: commit.
        self.reporter.progress("Committing changes", None).await;
        git.stage_all().await;
        let result = git.commit(&commit_message(&self.config, &issue.title), None).await;
        if !result.success {
            let error_type = if result.error.to_lowercase().contains("nothing to commit") {
                "no_changes"
            } else {
                "git_error"
            };
            self.reporter
                .error("Failed to commit", Some(error_type), Some(&result.error))
                .await;
            return 1;
        }

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 6: push with rebase retry.
        self.reporter.progress("Pushing branch", None).await;
        let default_branch = self
            .github
            .get_default_branch(&self.config.repo)
            .await
            .unwrap_or_else(|_| "main".to_string());
        let (result, rebased) = git
            .push_with_retry("origin", &branch_name, &default_branch, 2)
            .await;
        if !result.success {
            self.reporter
                .error("Failed to push branch", Some("git_error"), Some(&result.error))
                .await;
            return 1;
        }
        if rebased {
            tracing::info!("Branch was rebased before push");
        }

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 7: create the pull request.
        self.reporter.progress("Creating pull request", None).await;
        let pr_title = format!("[Minion] {}", issue.title);
        let pr = match self
            .github
            .create_pull_request(
                &self.config.repo,
                &pr_title,
                &pr_body(&self.config, &files_changed),
                &branch_name,
                &default_branch,
                false,
            )
            .await
        {
            Ok(pr) => pr,
            Err(e) => {
                self.reporter
                    .error("Failed to create PR", Some("github_error"), Some(&e.to_string()))
                    .await;
                return 1;
            }
        };

        if self.shutdown_requested() {
            return EXIT_SHUTDOWN;
        }

        // Step 8: automated review. Failures never block the PR.
        self.reporter.progress("Running automated review", None).await;
        let review = self.review_pr(pr.number, git.repo_path().to_path_buf()).await;

        let (completion_message, review_summary) = match &review {
            Some(result) if result.error.is_none() => (
                format!(
                    "Created PR #{} | Review: {} ({:.0}% confidence)",
                    pr.number,
                    result.llm_result.decision.as_str(),
                    result.llm_result.confidence * 100.0
                ),
                Some(result.summary()),
            ),
            _ => (format!("Created PR #{}", pr.number), None),
        };

        // Step 9: report completion.
        self.reporter
            .complete(
                &completion_message,
                Some(pr.number),
                Some(&pr.html_url),
                Some(&branch_name),
                review_summary.as_deref(),
            )
            .await;

        tracing::info!(pr_url = pr.html_url, "Minion completed successfully");
        0
    }

    /// Run the agent, pausing for human answers up to the question budget.
    async fn do_work(&mut self, issue: &GitHubIssue, repo_path: PathBuf) -> Result<Vec<String>, i32> {
        self.reporter.update_status("analyzing issue");

        let failure_summary = match &self.failure_memory {
            Some(memory) => memory
                .build_failure_context(None)
                .await
                .map(|ctx| FailureMemory::summary_for_llm(&ctx))
                .unwrap_or_default(),
            None => String::new(),
        };
        let system_prompt = build_system_prompt(&self.config, issue, &failure_summary);

        let llm = LlmClient::new(
            LlmClientConfig {
                base_url: self.config.nebulus_base_url.clone(),
                model: self.config.nebulus_model.clone(),
                timeout: Duration::from_secs(self.config.nebulus_timeout_secs),
                ..Default::default()
            },
            None,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build LLM client");
            1
        })?;

        let mut executor = ToolExecutor::new(repo_path, self.config.scope.clone());
        if let Some(memory) = &self.failure_memory {
            executor =
                executor.with_failure_memory(Arc::clone(memory), self.config.minion_id.clone());
        }

        let mut agent = MinionAgent::new(
            Arc::new(llm),
            Arc::new(executor),
            system_prompt,
            minion_tools(),
        );

        self.reporter.update_status("working");
        let mut questions_asked = 0u32;

        loop {
            let result = agent.run().await;
            tracing::info!(
                status = ?result.status,
                summary = result.summary,
                turns = result.turns_used,
                "Agent finished"
            );

            match result.status {
                AgentStatus::Completed => {
                    self.reporter.update_status("work completed");
                    return Ok(result.files_changed);
                }
                AgentStatus::Blocked if result.question.is_some() => {
                    questions_asked += 1;
                    if questions_asked > MAX_QUESTIONS {
                        tracing::info!(
                            max = MAX_QUESTIONS,
                            "Question budget exhausted, continuing with best judgment"
                        );
                        agent.inject_message(
                            "No more questions available. Use your best judgment to proceed.",
                        );
                        continue;
                    }

                    let question = result.question.unwrap_or_default();
                    let question_id =
                        format!("q-{}-{questions_asked}", self.config.minion_id);
                    self.reporter.update_status("waiting for answer");

                    let sent = self
                        .reporter
                        .question(
                            &question,
                            result.blocker_type.as_deref().unwrap_or("unknown"),
                            &question_id,
                        )
                        .await;
                    if !sent {
                        agent.inject_message(
                            "Could not reach the team for an answer. Use your best judgment to proceed.",
                        );
                        continue;
                    }

                    let answer = self
                        .reporter
                        .poll_answer(
                            &question_id,
                            Duration::from_secs(DEFAULT_ANSWER_TIMEOUT_SECS),
                            Duration::from_secs(DEFAULT_ANSWER_POLL_INTERVAL_SECS),
                        )
                        .await;
                    match answer {
                        Some(answer) => agent.inject_message(format!("Human response: {answer}")),
                        None => agent.inject_message(
                            "No response received within 10 minutes. Use your best judgment to proceed.",
                        ),
                    }
                    self.reporter.update_status("working");
                }
                AgentStatus::Blocked => {
                    self.reporter
                        .error(
                            &result.summary,
                            Some("blocked"),
                            Some(&format!(
                                "Blocker type: {}",
                                result.blocker_type.as_deref().unwrap_or("unknown")
                            )),
                        )
                        .await;
                    return Err(1);
                }
                AgentStatus::TurnLimit => {
                    self.reporter
                        .error(
                            &result.summary,
                            Some("turn_limit"),
                            Some(&format!("Used {} turns", result.turns_used)),
                        )
                        .await;
                    return Err(1);
                }
                AgentStatus::Error => {
                    self.reporter
                        .error(
                            &result.summary,
                            Some("agent_error"),
                            result.error.as_deref(),
                        )
                        .await;
                    return Err(1);
                }
            }
        }
    }

    /// Run the review workflow against the fresh PR. Non-blocking on
    /// failure.
    async fn review_pr(&self, pr_number: u64, repo_path: PathBuf) -> Option<WorkflowResult> {
        let llm = LlmClient::new(
            LlmClientConfig {
                base_url: self.config.nebulus_base_url.clone(),
                model: self.config.nebulus_model.clone(),
                timeout: Duration::from_secs(self.config.nebulus_timeout_secs),
                ..Default::default()
            },
            None,
        )
        .ok()?;

        let workflow = ReviewWorkflow::new(
            Arc::clone(&self.github),
            LlmReviewer::new(llm, 500),
            crate::domain::models::config::ReviewSettings {
                auto_merge_enabled: false,
                ..Default::default()
            },
        );

        let result = workflow
            .review_pr(&self.config.repo, pr_number, true, false, Some(&repo_path))
            .await;
        if let Some(error) = &result.error {
            tracing::warn!(error, "PR review completed with error");
        } else {
            tracing::info!(summary = result.summary(), "PR review complete");
        }
        Some(result)
    }
}

/// Install SIGTERM/SIGINT handlers that set the cooperative shutdown flag.
pub fn install_signal_handlers(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => tracing::warn!("Received SIGTERM, requesting shutdown"),
            _ = sigint.recv() => tracing::warn!("Received SIGINT, requesting shutdown"),
        }
        flag.store(true, Ordering::SeqCst);
    });
}
