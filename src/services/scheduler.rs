//! The Overlord scheduler: the event-driven core.
//!
//! Operator commands, Minion callbacks, and timer ticks are multiplexed
//! into one ordered queue drained by a single consumer. The consumer owns
//! every state transition and every audit write; offloaded work (reviews)
//! posts its results back as events instead of mutating state directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::domain::models::audit::LogEvent;
use crate::domain::models::config::OverlordConfig;
use crate::domain::models::evaluation::{CheckScore, RevisionRequest};
use crate::domain::models::minion::{MinionRecord, MinionStatus};
use crate::infrastructure::containers::{ContainerManager, RevisionContext, SpawnRequest};
use crate::services::audit_trail::AuditTrail;
use crate::services::commands::{help_text, OperatorCommand, StopTarget};
use crate::services::evaluator::{EvaluationTarget, Evaluator};
use crate::services::issue_queue::IssueQueue;
use crate::services::review_workflow::{ReviewWorkflow, WorkflowResult};
use crate::services::state_store::StateStore;

/// Canonical error type for wall-clock and watchdog timeouts.
pub const TIMEOUT_ERROR_TYPE: &str = "timeout";

/// Incoming Minion callback payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportPayload {
    pub minion_id: String,
    pub event: String,
    #[serde(default)]
    pub issue: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: String,
}

/// Events drained by the single-consumer loop.
pub enum OverlordEvent {
    Operator {
        command: OperatorCommand,
        reply: Option<oneshot::Sender<String>>,
    },
    /// A human answer to a pending Minion question.
    Answer {
        minion_id: String,
        question_id: String,
        answer: String,
    },
    MinionReport(ReportPayload),
    SweepTick,
    WatchdogTick,
    /// An offloaded review run finished; results re-enter the queue here.
    ReviewFinished {
        minion_id: Option<String>,
        target: EvaluationTarget,
        result: Box<WorkflowResult>,
    },
}

/// Shared buffer the answer endpoint reads and the scheduler writes.
#[derive(Clone, Default)]
pub struct AnswerBuffer {
    answers: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl AnswerBuffer {
    pub fn put(&self, minion_id: &str, question_id: &str, answer: String) {
        self.answers
            .lock()
            .expect("answer buffer lock poisoned")
            .insert((minion_id.to_string(), question_id.to_string()), answer);
    }

    pub fn get(&self, minion_id: &str, question_id: &str) -> Option<String> {
        self.answers
            .lock()
            .expect("answer buffer lock poisoned")
            .get(&(minion_id.to_string(), question_id.to_string()))
            .cloned()
    }
}

/// The Overlord scheduler state. Owned by the single event consumer.
pub struct Overlord {
    config: OverlordConfig,
    state: Arc<StateStore>,
    audit: Arc<AuditTrail>,
    queue: Arc<IssueQueue>,
    containers: Arc<ContainerManager>,
    review: Option<Arc<ReviewWorkflow>>,
    evaluator: Evaluator,
    answers: AnswerBuffer,
    /// Pending questions keyed by (minion_id, question_id).
    pending_questions: HashMap<(String, String), String>,
    paused: bool,
    event_tx: mpsc::Sender<OverlordEvent>,
}

impl Overlord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OverlordConfig,
        state: Arc<StateStore>,
        audit: Arc<AuditTrail>,
        queue: Arc<IssueQueue>,
        containers: Arc<ContainerManager>,
        review: Option<Arc<ReviewWorkflow>>,
        event_tx: mpsc::Sender<OverlordEvent>,
    ) -> Self {
        let evaluator = Evaluator::new(config.limits.max_revisions);
        Self {
            config,
            state,
            audit,
            queue,
            containers,
            review,
            evaluator,
            answers: AnswerBuffer::default(),
            pending_questions: HashMap::new(),
            paused: false,
            event_tx,
        }
    }

    /// Handle to the answer buffer for the callback server.
    pub fn answer_buffer(&self) -> AnswerBuffer {
        self.answers.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Spawn the sweep and watchdog timers feeding the event queue.
    pub fn spawn_timers(config: &OverlordConfig, event_tx: &mpsc::Sender<OverlordEvent>) {
        let sweep_tx = event_tx.clone();
        let sweep_interval = Duration::from_secs(config.limits.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                if sweep_tx.send(OverlordEvent::SweepTick).await.is_err() {
                    break;
                }
            }
        });

        let watchdog_tx = event_tx.clone();
        let watchdog_interval = Duration::from_secs(config.limits.watchdog_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(watchdog_interval);
            loop {
                interval.tick().await;
                if watchdog_tx.send(OverlordEvent::WatchdogTick).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Drain the event queue. Exactly one consumer runs this loop.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<OverlordEvent>) {
        tracing::info!("Overlord scheduler running");
        while let Some(event) = event_rx.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("Overlord scheduler stopped");
    }

    /// Process one event.
    pub async fn handle_event(&mut self, event: OverlordEvent) {
        match event {
            OverlordEvent::Operator { command, reply } => {
                let response = self.handle_operator(command).await;
                if let Some(reply) = reply {
                    let _ = reply.send(response);
                }
            }
            OverlordEvent::Answer {
                minion_id,
                question_id,
                answer,
            } => self.handle_answer(&minion_id, &question_id, answer).await,
            OverlordEvent::MinionReport(payload) => self.handle_report(payload).await,
            OverlordEvent::SweepTick => self.handle_sweep().await,
            OverlordEvent::WatchdogTick => self.handle_watchdog().await,
            OverlordEvent::ReviewFinished {
                minion_id,
                target,
                result,
            } => self.handle_review_finished(minion_id, target, *result).await,
        }
    }

    fn task_id(repo: &str, issue_number: u64) -> String {
        format!("{repo}#{issue_number}")
    }

    async fn audit_log(&self, event: LogEvent, task_id: &str, data: Value, reasoning: &str) {
        if let Err(e) = self.audit.log(event, task_id, data, reasoning).await {
            tracing::error!(error = %e, "Failed to write audit entry");
        }
    }

    // -- operator commands --------------------------------------------------

    async fn handle_operator(&mut self, command: OperatorCommand) -> String {
        match command {
            OperatorCommand::Status => self.reply_status().await,
            OperatorCommand::Work { repo, issue_number } => {
                let repo = repo.or_else(|| self.config.github.default_repo.clone());
                match repo {
                    Some(repo) => self.dispatch_issue(&repo, issue_number, None).await,
                    None => "No repository given and no default repository configured.".to_string(),
                }
            }
            OperatorCommand::Stop(target) => self.handle_stop(target).await,
            OperatorCommand::Queue => self.reply_queue().await,
            OperatorCommand::Pause => {
                self.paused = true;
                "Dispatching paused.".to_string()
            }
            OperatorCommand::Resume => {
                self.paused = false;
                "Dispatching resumed.".to_string()
            }
            OperatorCommand::History => self.reply_history().await,
            OperatorCommand::Review { repo, pr_number } => {
                let repo = repo.or_else(|| self.config.github.default_repo.clone());
                match repo {
                    Some(repo) => self.start_operator_review(&repo, pr_number),
                    None => "No repository given and no default repository configured.".to_string(),
                }
            }
            OperatorCommand::Help => help_text(),
        }
    }

    async fn reply_status(&self) -> String {
        let active = match self.state.get_active_minions().await {
            Ok(active) => active,
            Err(e) => return format!("Failed to read state: {e}"),
        };

        if active.is_empty() {
            return if self.paused {
                "No active minions. Dispatching is paused.".to_string()
            } else {
                "No active minions.".to_string()
            };
        }

        let now = Utc::now();
        let mut lines = vec![format!(
            "{} active minion(s){}:",
            active.len(),
            if self.paused { " (paused)" } else { "" }
        )];
        for record in active {
            lines.push(format!(
                "  {} - {}#{} [{}] heartbeat {}s ago",
                record.minion_id,
                record.repo,
                record.issue_number,
                record.status.as_str(),
                record.heartbeat_age_secs(now),
            ));
        }
        lines.join("\n")
    }

    async fn reply_queue(&self) -> String {
        if !self.queue.can_perform_sweep().await {
            return "Queue scan skipped: GitHub API budget is too low.".to_string();
        }
        let issues = self.queue.scan_queue().await;
        if issues.is_empty() {
            return "Queue is empty.".to_string();
        }
        let mut lines = vec![format!("{} issue(s) ready:", issues.len())];
        for issue in issues.iter().take(10) {
            lines.push(format!(
                "  {}{}",
                issue,
                if issue.priority > 0 { " [high]" } else { "" }
            ));
        }
        lines.join("\n")
    }

    async fn reply_history(&self) -> String {
        let history = match self.state.work_history(10).await {
            Ok(history) => history,
            Err(e) => return format!("Failed to read history: {e}"),
        };
        if history.is_empty() {
            return "No completed work yet.".to_string();
        }
        let mut lines = vec!["Recent work:".to_string()];
        for record in history {
            let pr = record
                .pr_number
                .map_or_else(String::new, |n| format!(" PR #{n}"));
            lines.push(format!(
                "  {} - {}#{} [{}]{}",
                record.minion_id,
                record.repo,
                record.issue_number,
                record.status.as_str(),
                pr,
            ));
        }
        lines.join("\n")
    }

    async fn handle_stop(&mut self, target: StopTarget) -> String {
        let record = match &target {
            StopTarget::MinionId(minion_id) => self.state.get_minion(minion_id).await,
            StopTarget::IssueNumber(issue_number) => {
                let mut found = Ok(None);
                for repo in self.queue.watched_repos() {
                    found = self.state.get_minion_by_issue(repo, *issue_number).await;
                    if matches!(found, Ok(Some(_))) {
                        break;
                    }
                }
                found
            }
        };

        let record = match record {
            Ok(Some(record)) => record,
            Ok(None) => return "No matching active minion.".to_string(),
            Err(e) => return format!("Failed to read state: {e}"),
        };

        self.containers.kill_minion(&record.minion_id).await;
        if let Err(e) = self
            .state
            .record_completion(
                &record.minion_id,
                MinionStatus::Failed,
                record.pr_number,
                Some("stopped by operator"),
            )
            .await
        {
            return format!("Kill sent but state update failed: {e}");
        }
        self.audit_log(
            LogEvent::TaskAbandoned,
            &Self::task_id(&record.repo, record.issue_number),
            json!({"minion_id": record.minion_id, "reason": "operator stop"}),
            "operator requested stop",
        )
        .await;

        format!("Stopped {}.", record.minion_id)
    }

    fn start_operator_review(&self, repo: &str, pr_number: u64) -> String {
        let Some(review) = self.review.clone() else {
            return "Review pipeline is disabled.".to_string();
        };

        let repo = repo.to_string();
        let repo_for_message = repo.clone();
        let event_tx = self.event_tx.clone();
        let post = self.config.review.post_review;
        let auto_merge = self.config.review.auto_merge_enabled;
        tokio::spawn(async move {
            let result = review.review_pr(&repo, pr_number, post, auto_merge, None).await;
            let target = EvaluationTarget {
                repo: repo.clone(),
                pr_number,
                issue_number: result.pr_details.linked_issue.unwrap_or_default(),
                branch: result.pr_details.head_branch.clone(),
                revision_number: 0,
            };
            let _ = event_tx
                .send(OverlordEvent::ReviewFinished {
                    minion_id: None,
                    target,
                    result: Box::new(result),
                })
                .await;
        });

        format!("Review started for {repo_for_message}#{pr_number}.")
    }

    // -- dispatch -----------------------------------------------------------

    async fn dispatch_issue(
        &mut self,
        repo: &str,
        issue_number: u64,
        revision: Option<RevisionRequest>,
    ) -> String {
        let task_id = Self::task_id(repo, issue_number);

        if self.paused {
            return "Dispatching is paused.".to_string();
        }

        let active_count = match self.state.active_count().await {
            Ok(count) => count,
            Err(e) => return format!("Failed to read state: {e}"),
        };
        if active_count >= self.config.limits.max_concurrent_minions {
            tracing::info!(
                task_id,
                active_count,
                max = self.config.limits.max_concurrent_minions,
                "At capacity, deferring"
            );
            return format!(
                "At capacity ({active_count} active); {task_id} deferred until the next sweep."
            );
        }

        match self.state.get_minion_by_issue(repo, issue_number).await {
            Ok(Some(existing)) => {
                return format!("{task_id} is already being worked by {}.", existing.minion_id)
            }
            Ok(None) => {}
            Err(e) => return format!("Failed to read state: {e}"),
        }

        let revision_number = revision.as_ref().map_or(0, |r| r.revision_number);
        if revision.is_none() {
            self.audit_log(
                LogEvent::TaskReceived,
                &task_id,
                json!({"repo": repo, "issue": issue_number}),
                "issue accepted for dispatch",
            )
            .await;
        }

        let mut request = SpawnRequest::new(repo, issue_number);
        request.revision = revision.as_ref().map(|r| RevisionContext {
            feedback: r.feedback.clone(),
            revision_number: r.revision_number,
            branch: r.branch.clone(),
        });

        let spawned = match self.containers.spawn_minion(request).await {
            Ok(spawned) => spawned,
            Err(e) => {
                self.audit_log(
                    LogEvent::TaskAbandoned,
                    &task_id,
                    json!({"error": e.to_string()}),
                    "container spawn failed",
                )
                .await;
                return format!("Failed to spawn minion for {task_id}: {e}");
            }
        };

        let record = MinionRecord::new(
            spawned.minion_id.clone(),
            spawned.container_id.clone(),
            repo,
            issue_number,
        )
        .with_revision(revision_number);
        if let Err(e) = self.state.add_minion(&record).await {
            return format!("Spawned but failed to record state: {e}");
        }

        if revision.is_none() {
            self.queue.mark_in_progress(repo, issue_number).await;
        }

        self.audit_log(
            LogEvent::TaskDispatched,
            &task_id,
            json!({
                "minion_id": spawned.minion_id,
                "container_id": spawned.container_id,
                "revision_number": revision_number,
            }),
            if revision_number == 0 {
                "capacity available, minion spawned"
            } else {
                "revision attempt spawned with prior feedback"
            },
        )
        .await;

        format!("Spawned {} for {task_id}.", spawned.minion_id)
    }

    // -- minion reports -----------------------------------------------------

    async fn handle_report(&mut self, payload: ReportPayload) {
        let minion_id = payload.minion_id.clone();
        let record = match self.state.get_minion(&minion_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(minion_id, event = payload.event, "Report from unknown minion");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read state");
                return;
            }
        };
        let task_id = Self::task_id(&record.repo, record.issue_number);

        match payload.event.as_str() {
            "heartbeat" | "progress" => {
                let promote = match record.status {
                    MinionStatus::Starting | MinionStatus::Working => Some(MinionStatus::Working),
                    _ => None,
                };
                if let Err(e) = self.state.record_heartbeat(&minion_id, promote).await {
                    tracing::error!(error = %e, "Failed to record heartbeat");
                }
            }
            "question" => {
                let question_id = payload.data["question_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let blocker_type = payload.data["blocker_type"].as_str().unwrap_or("unknown");
                if let Err(e) = self
                    .state
                    .update_status(&minion_id, MinionStatus::AwaitingAnswer)
                    .await
                {
                    tracing::error!(error = %e, "Failed to set awaiting_answer");
                }
                self.pending_questions.insert(
                    (minion_id.clone(), question_id.clone()),
                    payload.message.clone(),
                );
                self.audit_log(
                    LogEvent::WorkerResult,
                    &task_id,
                    json!({
                        "minion_id": minion_id,
                        "event": "question",
                        "question_id": question_id,
                        "blocker_type": blocker_type,
                        "question": payload.message,
                    }),
                    "minion blocked on a human question",
                )
                .await;
                tracing::info!(minion_id, question_id, "Question pending operator answer");
            }
            "complete" => {
                let pr_number = payload.data["pr_number"].as_u64();
                let branch = payload.data["branch"]
                    .as_str()
                    .map_or_else(
                        || format!("minion/issue-{}", record.issue_number),
                        str::to_string,
                    );
                self.audit_log(
                    LogEvent::WorkerResult,
                    &task_id,
                    json!({
                        "minion_id": minion_id,
                        "event": "complete",
                        "pr_number": pr_number,
                        "message": payload.message,
                    }),
                    "minion reported completion",
                )
                .await;

                if let Some(pr_number) = pr_number {
                    if let Err(e) = self.state.set_pr_number(&minion_id, pr_number).await {
                        tracing::error!(error = %e, "Failed to record PR number");
                    }

                    if self.config.review.enabled {
                        if let Some(review) = self.review.clone() {
                            self.start_completion_review(
                                &record, &minion_id, pr_number, branch, review,
                            );
                            return;
                        }
                    }
                    self.finalize_success(&record, &minion_id, Some(pr_number)).await;
                } else {
                    // Completed without a PR; nothing to review.
                    self.finalize_success(&record, &minion_id, None).await;
                }
            }
            "error" => {
                let error_type = payload.data["error_type"].as_str().unwrap_or("unknown");
                let details = payload.data["details"].as_str().unwrap_or(&payload.message);
                self.audit_log(
                    LogEvent::WorkerResult,
                    &task_id,
                    json!({
                        "minion_id": minion_id,
                        "event": "error",
                        "error_type": error_type,
                        "details": details,
                    }),
                    "minion reported a terminal error",
                )
                .await;

                self.containers.kill_minion(&minion_id).await;
                if let Err(e) = self
                    .state
                    .record_completion(&minion_id, MinionStatus::Failed, None, Some(details))
                    .await
                {
                    tracing::error!(error = %e, "Failed to record failure");
                }
                self.queue
                    .mark_failed(&record.repo, record.issue_number, details)
                    .await;
                self.audit_log(
                    LogEvent::TaskAbandoned,
                    &task_id,
                    json!({"minion_id": minion_id, "error_type": error_type}),
                    "terminal minion error",
                )
                .await;
            }
            other => {
                tracing::warn!(minion_id, event = other, "Unknown report event");
            }
        }
    }

    fn start_completion_review(
        &self,
        record: &MinionRecord,
        minion_id: &str,
        pr_number: u64,
        branch: String,
        review: Arc<ReviewWorkflow>,
    ) {
        let target = EvaluationTarget {
            repo: record.repo.clone(),
            pr_number,
            issue_number: record.issue_number,
            branch,
            revision_number: record.revision_number,
        };
        let minion_id = minion_id.to_string();
        let event_tx = self.event_tx.clone();
        let post = self.config.review.post_review;
        let auto_merge = self.config.review.auto_merge_enabled;
        tokio::spawn(async move {
            let result = review
                .review_pr(&target.repo, target.pr_number, post, auto_merge, None)
                .await;
            let _ = event_tx
                .send(OverlordEvent::ReviewFinished {
                    minion_id: Some(minion_id),
                    target,
                    result: Box::new(result),
                })
                .await;
        });
    }

    async fn finalize_success(
        &mut self,
        record: &MinionRecord,
        minion_id: &str,
        pr_number: Option<u64>,
    ) {
        let task_id = Self::task_id(&record.repo, record.issue_number);
        if let Err(e) = self
            .state
            .record_completion(minion_id, MinionStatus::Completed, pr_number, None)
            .await
        {
            tracing::error!(error = %e, "Failed to record completion");
        }
        if let Some(pr_number) = pr_number {
            self.queue
                .mark_in_review(&record.repo, record.issue_number, pr_number)
                .await;
        }
        self.audit_log(
            LogEvent::TaskComplete,
            &task_id,
            json!({"minion_id": minion_id, "pr_number": pr_number}),
            "work recorded complete",
        )
        .await;
    }

    // -- review results -----------------------------------------------------

    async fn handle_review_finished(
        &mut self,
        minion_id: Option<String>,
        target: EvaluationTarget,
        result: WorkflowResult,
    ) {
        let task_id = Self::task_id(&target.repo, target.issue_number);
        let checks = result.checks_report.clone().unwrap_or_default();
        let (evaluation, revision) = self.evaluator.evaluate(&checks, &result.llm_result, &target);
        let overall = evaluation.overall();

        if let Err(e) = self.state.add_evaluation(&evaluation).await {
            tracing::error!(error = %e, "Failed to store evaluation");
        }
        self.audit_log(
            LogEvent::EvaluationComplete,
            &task_id,
            json!({
                "pr_number": target.pr_number,
                "overall": overall.as_str(),
                "test_score": evaluation.test_score.as_str(),
                "lint_score": evaluation.lint_score.as_str(),
                "review_score": evaluation.review_score.as_str(),
                "revision_number": target.revision_number,
            }),
            "evaluation scored from checks and LLM review",
        )
        .await;

        // Close out the minion that produced this PR, when one exists.
        if let Some(minion_id) = &minion_id {
            if let Ok(Some(record)) = self.state.get_minion(minion_id).await {
                self.finalize_success(&record, minion_id, Some(target.pr_number))
                    .await;
            }
        }

        match (overall, revision) {
            (CheckScore::NeedsRevision, Some(revision)) => {
                self.audit_log(
                    LogEvent::RevisionRequested,
                    &task_id,
                    json!({
                        "pr_number": revision.pr_number,
                        "revision_number": revision.revision_number,
                        "feedback": revision.feedback,
                    }),
                    "bounded revision cycle started",
                )
                .await;
                let repo = revision.repo.clone();
                let issue_number = revision.issue_number;
                let reply = self.dispatch_issue(&repo, issue_number, Some(revision)).await;
                tracing::info!(reply, "Revision dispatch");
            }
            (CheckScore::Pass, _) => {}
            (_, None) => {
                // FAIL, or NEEDS_REVISION at the revision bound: leave the PR
                // for human attention.
                self.queue
                    .mark_failed(
                        &target.repo,
                        target.issue_number,
                        &format!(
                            "Evaluation of PR #{} was {} after {} revision(s).",
                            target.pr_number,
                            overall.as_str(),
                            target.revision_number
                        ),
                    )
                    .await;
            }
            (CheckScore::Fail, Some(_)) => unreachable!("revisions are only emitted for needs_revision"),
        }
    }

    // -- answers ------------------------------------------------------------

    async fn handle_answer(&mut self, minion_id: &str, question_id: &str, answer: String) {
        let key = (minion_id.to_string(), question_id.to_string());
        if self.pending_questions.remove(&key).is_none() {
            tracing::warn!(minion_id, question_id, "Answer for unknown question");
        }
        self.answers.put(minion_id, question_id, answer);
        tracing::info!(minion_id, question_id, "Answer buffered for poll");
    }

    // -- timers -------------------------------------------------------------

    async fn handle_watchdog(&mut self) {
        let active = match self.state.get_active_minions().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!(error = %e, "Watchdog failed to read state");
                return;
            }
        };

        let now = Utc::now();
        let timeout = self.config.limits.heartbeat_timeout_secs as i64;
        for record in active {
            if record.heartbeat_age_secs(now) <= timeout {
                continue;
            }

            let task_id = Self::task_id(&record.repo, record.issue_number);
            tracing::warn!(
                minion_id = record.minion_id,
                age = record.heartbeat_age_secs(now),
                "Heartbeat missing, killing minion"
            );

            self.containers.kill_minion(&record.minion_id).await;
            if let Err(e) = self
                .state
                .record_completion(
                    &record.minion_id,
                    MinionStatus::TimedOut,
                    record.pr_number,
                    Some(TIMEOUT_ERROR_TYPE),
                )
                .await
            {
                tracing::error!(error = %e, "Failed to record timeout");
            }
            self.queue
                .mark_failed(
                    &record.repo,
                    record.issue_number,
                    "Minion heartbeat stopped; the container was killed.",
                )
                .await;
            self.audit_log(
                LogEvent::TaskAbandoned,
                &task_id,
                json!({
                    "minion_id": record.minion_id,
                    "error_type": TIMEOUT_ERROR_TYPE,
                }),
                "watchdog killed an unresponsive minion",
            )
            .await;
        }
    }

    async fn handle_sweep(&mut self) {
        if self.paused {
            tracing::debug!("Sweep skipped: paused");
            return;
        }

        let active_count = match self.state.active_count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Sweep failed to read state");
                return;
            }
        };
        let capacity = self
            .config
            .limits
            .max_concurrent_minions
            .saturating_sub(active_count);
        if capacity == 0 {
            tracing::debug!("Sweep skipped: no spare capacity");
            return;
        }

        if !self.queue.can_perform_sweep().await {
            tracing::info!("Sweep skipped: insufficient API budget");
            return;
        }

        let issues = self.queue.scan_queue().await;
        let mut dispatched = 0usize;
        for issue in issues {
            if dispatched >= capacity {
                break;
            }
            if matches!(
                self.state
                    .get_minion_by_issue(&issue.repo, issue.number)
                    .await,
                Ok(Some(_))
            ) {
                continue;
            }

            // Enqueue a synthetic work event; the single consumer will pick
            // it up after this sweep completes.
            let _ = self
                .event_tx
                .send(OverlordEvent::Operator {
                    command: OperatorCommand::Work {
                        repo: Some(issue.repo.clone()),
                        issue_number: issue.number,
                    },
                    reply: None,
                })
                .await;
            dispatched += 1;
        }
        if dispatched > 0 {
            tracing::info!(dispatched, "Sweep enqueued work");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{ContainerConfig, GithubConfig, LlmConfig};
    use crate::infrastructure::database::DatabaseConnection;
    use crate::infrastructure::github::GitHubClient;

    async fn overlord_with(
        server: &mockito::Server,
    ) -> (Overlord, mpsc::Receiver<OverlordEvent>, Arc<StateStore>, Arc<AuditTrail>) {
        let mut config = OverlordConfig::default();
        config.github.watched_repos = vec!["org/repo".to_string()];
        config.github.default_repo = Some("org/repo".to_string());
        config.limits.max_concurrent_minions = 2;
        config.review.enabled = false;
        config.containers.stub_mode = true;

        let state_db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        let state = Arc::new(StateStore::with_pool(state_db.pool().clone()).await.unwrap());
        let audit_db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        let audit = Arc::new(
            AuditTrail::with_pool(audit_db.pool().clone(), None)
                .await
                .unwrap(),
        );

        let github = Arc::new(GitHubClient::with_base_url("t".to_string(), server.url()));
        let queue = Arc::new(IssueQueue::new(
            github,
            GithubConfig {
                watched_repos: vec!["org/repo".to_string()],
                ..Default::default()
            },
        ));
        let containers = Arc::new(ContainerManager::new(
            ContainerConfig {
                stub_mode: true,
                ..Default::default()
            },
            LlmConfig::default(),
            "t".to_string(),
            1800,
        ));

        let (event_tx, event_rx) = mpsc::channel(64);
        let overlord = Overlord::new(
            config,
            Arc::clone(&state),
            Arc::clone(&audit),
            queue,
            containers,
            None,
            event_tx,
        );
        (overlord, event_rx, state, audit)
    }

    async fn mock_label_endpoints(server: &mut mockito::Server) {
        server
            .mock("POST", mockito::Matcher::Regex(r"/repos/.*/labels$".to_string()))
            .with_status(200)
            .with_body("[]")
            .expect_at_least(0)
            .create_async()
            .await;
        server
            .mock(
                "DELETE",
                mockito::Matcher::Regex(r"/repos/.*/labels/.*".to_string()),
            )
            .with_status(200)
            .with_body("[]")
            .expect_at_least(0)
            .create_async()
            .await;
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"/repos/.*/comments$".to_string()),
            )
            .with_status(201)
            .with_body("{}")
            .expect_at_least(0)
            .create_async()
            .await;
    }

    fn report(minion_id: &str, event: &str, data: Value) -> ReportPayload {
        ReportPayload {
            minion_id: minion_id.to_string(),
            event: event.to_string(),
            issue: 42,
            message: String::new(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn work_command_spawns_and_records() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, audit) = overlord_with(&server).await;

        let reply = overlord
            .handle_operator(OperatorCommand::Work {
                repo: Some("org/repo".to_string()),
                issue_number: 42,
            })
            .await;
        assert!(reply.starts_with("Spawned minion-"), "{reply}");

        let active = state.get_active_minions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, MinionStatus::Starting);

        let logs = audit.logs_for_task("org/repo#42").await.unwrap();
        let events: Vec<&str> = logs.iter().map(|l| l.event.as_str()).collect();
        assert_eq!(events, vec!["task_received", "task_dispatched"]);
    }

    #[tokio::test]
    async fn capacity_defers_work() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, _state, _audit) = overlord_with(&server).await;

        for issue in [1u64, 2] {
            let reply = overlord.dispatch_issue("org/repo", issue, None).await;
            assert!(reply.starts_with("Spawned"), "{reply}");
        }
        let reply = overlord.dispatch_issue("org/repo", 3, None).await;
        assert!(reply.contains("deferred"), "{reply}");
    }

    #[tokio::test]
    async fn duplicate_issue_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, _state, _audit) = overlord_with(&server).await;

        overlord.dispatch_issue("org/repo", 42, None).await;
        let reply = overlord.dispatch_issue("org/repo", 42, None).await;
        assert!(reply.contains("already being worked"), "{reply}");
    }

    #[tokio::test]
    async fn heartbeat_promotes_starting_to_working() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, _audit) = overlord_with(&server).await;

        overlord.dispatch_issue("org/repo", 42, None).await;
        let minion_id = state.get_active_minions().await.unwrap()[0].minion_id.clone();

        overlord
            .handle_report(report(&minion_id, "heartbeat", json!({})))
            .await;
        let record = state.get_minion(&minion_id).await.unwrap().unwrap();
        assert_eq!(record.status, MinionStatus::Working);
    }

    #[tokio::test]
    async fn question_sets_awaiting_and_answer_buffers() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, _audit) = overlord_with(&server).await;

        overlord.dispatch_issue("org/repo", 42, None).await;
        let minion_id = state.get_active_minions().await.unwrap()[0].minion_id.clone();

        overlord
            .handle_report(report(
                &minion_id,
                "question",
                json!({"question_id": "q-1", "blocker_type": "missing_info"}),
            ))
            .await;
        let record = state.get_minion(&minion_id).await.unwrap().unwrap();
        assert_eq!(record.status, MinionStatus::AwaitingAnswer);

        overlord
            .handle_answer(&minion_id, "q-1", "use sqlite".to_string())
            .await;
        assert_eq!(
            overlord.answer_buffer().get(&minion_id, "q-1").as_deref(),
            Some("use sqlite")
        );
    }

    #[tokio::test]
    async fn complete_without_review_finalizes() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, audit) = overlord_with(&server).await;

        overlord.dispatch_issue("org/repo", 42, None).await;
        let minion_id = state.get_active_minions().await.unwrap()[0].minion_id.clone();

        overlord
            .handle_report(report(
                &minion_id,
                "complete",
                json!({"pr_number": 100, "branch": "minion/issue-42"}),
            ))
            .await;

        assert!(state.get_minion(&minion_id).await.unwrap().is_none());
        let history = state.work_history(5).await.unwrap();
        assert_eq!(history[0].status, MinionStatus::Completed);
        assert_eq!(history[0].pr_number, Some(100));

        let logs = audit.logs_for_task("org/repo#42").await.unwrap();
        let events: Vec<&str> = logs.iter().map(|l| l.event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                "task_received",
                "task_dispatched",
                "worker_result",
                "task_complete",
            ]
        );
    }

    #[tokio::test]
    async fn error_report_abandons_task() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, audit) = overlord_with(&server).await;

        overlord.dispatch_issue("org/repo", 42, None).await;
        let minion_id = state.get_active_minions().await.unwrap()[0].minion_id.clone();

        overlord
            .handle_report(report(
                &minion_id,
                "error",
                json!({"error_type": "turn_limit", "details": "Reached turn limit of 50"}),
            ))
            .await;

        let history = state.work_history(5).await.unwrap();
        assert_eq!(history[0].status, MinionStatus::Failed);
        assert_eq!(
            history[0].error_message.as_deref(),
            Some("Reached turn limit of 50")
        );

        let logs = audit.logs_for_task("org/repo#42").await.unwrap();
        assert_eq!(logs.last().unwrap().event, LogEvent::TaskAbandoned);
    }

    #[tokio::test]
    async fn watchdog_times_out_stale_minions() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, _audit) = overlord_with(&server).await;
        overlord.config.limits.heartbeat_timeout_secs = 0;

        overlord.dispatch_issue("org/repo", 42, None).await;
        // Let the heartbeat age past the zero-second timeout.
        tokio::time::sleep(Duration::from_millis(1100)).await;

        overlord.handle_watchdog().await;
        let history = state.work_history(5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MinionStatus::TimedOut);
        assert_eq!(history[0].error_message.as_deref(), Some(TIMEOUT_ERROR_TYPE));
    }

    #[tokio::test]
    async fn pause_blocks_dispatch_and_sweep() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, mut rx, _state, _audit) = overlord_with(&server).await;

        overlord.handle_operator(OperatorCommand::Pause).await;
        let reply = overlord.dispatch_issue("org/repo", 42, None).await;
        assert_eq!(reply, "Dispatching is paused.");

        overlord.handle_sweep().await;
        assert!(
            rx.try_recv().is_err(),
            "paused sweep must not enqueue work"
        );

        let reply = overlord.handle_operator(OperatorCommand::Resume).await;
        assert_eq!(reply, "Dispatching resumed.");
        assert!(!overlord.is_paused());
    }

    #[tokio::test]
    async fn sweep_respects_rate_limit_budget() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        server
            .mock("GET", "/rate_limit")
            .with_status(200)
            .with_body(
                json!({"resources": {"core": {"limit": 5000, "remaining": 50, "reset": 0}}})
                    .to_string(),
            )
            .create_async()
            .await;

        let (mut overlord, mut rx, _state, _audit) = overlord_with(&server).await;
        overlord.handle_sweep().await;
        assert!(
            rx.try_recv().is_err(),
            "sweep without budget must enqueue nothing"
        );
    }

    #[tokio::test]
    async fn stop_by_issue_kills_and_records() {
        let mut server = mockito::Server::new_async().await;
        mock_label_endpoints(&mut server).await;
        let (mut overlord, _rx, state, _audit) = overlord_with(&server).await;

        overlord.dispatch_issue("org/repo", 42, None).await;
        let reply = overlord
            .handle_operator(OperatorCommand::Stop(StopTarget::IssueNumber(42)))
            .await;
        assert!(reply.starts_with("Stopped minion-"), "{reply}");

        let history = state.work_history(5).await.unwrap();
        assert_eq!(history[0].status, MinionStatus::Failed);
        assert_eq!(history[0].error_message.as_deref(), Some("stopped by operator"));
    }
}
