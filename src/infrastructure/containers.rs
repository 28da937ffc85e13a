//! Minion container management over the `docker` CLI.
//!
//! A stub mode records every call without invoking a container runtime,
//! for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Command;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::{ContainerConfig, LlmConfig};

/// Timeout for docker CLI invocations.
const DOCKER_TIMEOUT: Duration = Duration::from_secs(60);

/// Revision context injected into a revision attempt's environment.
#[derive(Debug, Clone)]
pub struct RevisionContext {
    pub feedback: String,
    pub revision_number: u32,
    pub branch: String,
}

/// A request to spawn one Minion container.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub repo: String,
    pub issue_number: u64,
    pub minion_id: Option<String>,
    pub scope_json: Option<String>,
    pub revision: Option<RevisionContext>,
}

impl SpawnRequest {
    pub fn new(repo: impl Into<String>, issue_number: u64) -> Self {
        Self {
            repo: repo.into(),
            issue_number,
            minion_id: None,
            scope_json: None,
            revision: None,
        }
    }
}

/// A spawned container handle.
#[derive(Debug, Clone)]
pub struct SpawnedMinion {
    pub minion_id: String,
    pub container_id: String,
}

/// Calls recorded in stub mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCall {
    Spawn { minion_id: String, repo: String, issue_number: u64 },
    Kill { minion_id: String },
    Cleanup,
}

/// Spawns, kills, and lists Minion containers.
pub struct ContainerManager {
    config: ContainerConfig,
    llm: LlmConfig,
    github_token: String,
    minion_timeout_secs: u64,
    stub_calls: Mutex<Vec<StubCall>>,
}

impl ContainerManager {
    pub fn new(
        config: ContainerConfig,
        llm: LlmConfig,
        github_token: String,
        minion_timeout_secs: u64,
    ) -> Self {
        Self {
            config,
            llm,
            github_token,
            minion_timeout_secs,
            stub_calls: Mutex::new(Vec::new()),
        }
    }

    fn container_name(minion_id: &str) -> String {
        format!("nebulus-{minion_id}")
    }

    /// Environment handed to the Minion process: its contract with the
    /// Overlord.
    fn build_env(&self, request: &SpawnRequest, minion_id: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("MINION_ID".to_string(), minion_id.to_string());
        env.insert("GITHUB_REPO".to_string(), request.repo.clone());
        env.insert("GITHUB_ISSUE".to_string(), request.issue_number.to_string());
        env.insert("GITHUB_TOKEN".to_string(), self.github_token.clone());
        env.insert(
            "OVERLORD_CALLBACK_URL".to_string(),
            self.config.callback_url.clone(),
        );
        env.insert("NEBULUS_BASE_URL".to_string(), self.llm.base_url.clone());
        env.insert("NEBULUS_MODEL".to_string(), self.llm.model.clone());
        env.insert(
            "NEBULUS_TIMEOUT".to_string(),
            self.llm.timeout_secs.to_string(),
        );
        env.insert(
            "NEBULUS_STREAMING".to_string(),
            self.llm.streaming.to_string(),
        );
        env.insert(
            "MINION_TIMEOUT".to_string(),
            self.minion_timeout_secs.to_string(),
        );
        env.insert(
            "MINION_SCOPE".to_string(),
            request.scope_json.clone().unwrap_or_default(),
        );
        if let Some(revision) = &request.revision {
            env.insert(
                "MINION_REVISION_FEEDBACK".to_string(),
                revision.feedback.clone(),
            );
            env.insert(
                "MINION_REVISION_NUMBER".to_string(),
                revision.revision_number.to_string(),
            );
            env.insert("MINION_BRANCH".to_string(), revision.branch.clone());
        }
        env
    }

    async fn docker(&self, args: &[String]) -> DomainResult<String> {
        let output = tokio::time::timeout(
            DOCKER_TIMEOUT,
            Command::new("docker").args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| DomainError::ContainerError("docker command timed out".to_string()))?
        .map_err(|e| DomainError::ContainerError(format!("failed to run docker: {e}")))?;

        if !output.status.success() {
            return Err(DomainError::ContainerError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Spawn a Minion container and return the chosen id.
    pub async fn spawn_minion(&self, request: SpawnRequest) -> DomainResult<SpawnedMinion> {
        let minion_id = request
            .minion_id
            .clone()
            .unwrap_or_else(|| format!("minion-{}", &Uuid::new_v4().to_string()[..8]));

        if self.config.stub_mode {
            self.stub_calls
                .lock()
                .expect("stub call lock poisoned")
                .push(StubCall::Spawn {
                    minion_id: minion_id.clone(),
                    repo: request.repo.clone(),
                    issue_number: request.issue_number,
                });
            return Ok(SpawnedMinion {
                container_id: format!("stub-{minion_id}"),
                minion_id,
            });
        }

        let workspace = format!("{}/{minion_id}", self.config.workspace_root);
        std::fs::create_dir_all(&workspace).map_err(|e| {
            DomainError::ContainerError(format!("failed to create workspace {workspace}: {e}"))
        })?;

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            Self::container_name(&minion_id),
            "-v".to_string(),
            format!("{workspace}:/workspace"),
        ];
        for (key, value) in self.build_env(&request, &minion_id) {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.config.image.clone());

        let container_id = self.docker(&args).await?;
        tracing::info!(
            minion_id,
            container_id,
            repo = request.repo,
            issue = request.issue_number,
            "Spawned Minion container"
        );

        Ok(SpawnedMinion {
            minion_id,
            container_id,
        })
    }

    /// Kill and remove a Minion container. Returns false when the container
    /// was already gone.
    pub async fn kill_minion(&self, minion_id: &str) -> bool {
        if self.config.stub_mode {
            self.stub_calls
                .lock()
                .expect("stub call lock poisoned")
                .push(StubCall::Kill {
                    minion_id: minion_id.to_string(),
                });
            return true;
        }

        match self
            .docker(&["rm".to_string(), "-f".to_string(), Self::container_name(minion_id)])
            .await
        {
            Ok(_) => {
                tracing::info!(minion_id, "Killed Minion container");
                true
            }
            Err(e) => {
                tracing::warn!(minion_id, error = %e, "Failed to kill Minion container");
                false
            }
        }
    }

    /// List running Minion container names.
    pub async fn list_minions(&self) -> DomainResult<Vec<String>> {
        if self.config.stub_mode {
            return Ok(Vec::new());
        }
        let output = self
            .docker(&[
                "ps".to_string(),
                "--filter".to_string(),
                "name=nebulus-".to_string(),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ])
            .await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    /// Tail a Minion container's logs.
    pub async fn get_minion_logs(&self, minion_id: &str, tail: usize) -> DomainResult<String> {
        if self.config.stub_mode {
            return Ok(String::new());
        }
        self.docker(&[
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            Self::container_name(minion_id),
        ])
        .await
    }

    /// Remove exited Minion containers. Returns how many were removed.
    pub async fn cleanup_dead_containers(&self) -> DomainResult<usize> {
        if self.config.stub_mode {
            self.stub_calls
                .lock()
                .expect("stub call lock poisoned")
                .push(StubCall::Cleanup);
            return Ok(0);
        }

        let ids = self
            .docker(&[
                "ps".to_string(),
                "-a".to_string(),
                "--filter".to_string(),
                "status=exited".to_string(),
                "--filter".to_string(),
                "name=nebulus-".to_string(),
                "-q".to_string(),
            ])
            .await?;

        let ids: Vec<String> = ids.lines().map(str::to_string).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut args = vec!["rm".to_string()];
        args.extend(ids.iter().cloned());
        self.docker(&args).await?;
        Ok(ids.len())
    }

    /// Calls recorded in stub mode.
    pub fn stub_calls(&self) -> Vec<StubCall> {
        self.stub_calls
            .lock()
            .expect("stub call lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_manager() -> ContainerManager {
        let config = ContainerConfig {
            stub_mode: true,
            ..Default::default()
        };
        ContainerManager::new(config, LlmConfig::default(), "ghp_token".to_string(), 1800)
    }

    #[tokio::test]
    async fn stub_spawn_records_call_and_returns_id() {
        let manager = stub_manager();
        let spawned = manager
            .spawn_minion(SpawnRequest::new("org/repo", 42))
            .await
            .unwrap();

        assert!(spawned.minion_id.starts_with("minion-"));
        assert!(spawned.container_id.starts_with("stub-"));
        assert_eq!(
            manager.stub_calls(),
            vec![StubCall::Spawn {
                minion_id: spawned.minion_id.clone(),
                repo: "org/repo".to_string(),
                issue_number: 42,
            }]
        );
    }

    #[tokio::test]
    async fn stub_spawn_honors_requested_id() {
        let manager = stub_manager();
        let mut request = SpawnRequest::new("org/repo", 7);
        request.minion_id = Some("minion-a".to_string());
        let spawned = manager.spawn_minion(request).await.unwrap();
        assert_eq!(spawned.minion_id, "minion-a");
    }

    #[tokio::test]
    async fn stub_kill_records_call() {
        let manager = stub_manager();
        assert!(manager.kill_minion("minion-a").await);
        assert_eq!(
            manager.stub_calls(),
            vec![StubCall::Kill {
                minion_id: "minion-a".to_string()
            }]
        );
    }

    #[test]
    fn env_contains_minion_contract() {
        let manager = stub_manager();
        let request = SpawnRequest {
            repo: "org/repo".to_string(),
            issue_number: 42,
            minion_id: Some("minion-a".to_string()),
            scope_json: Some(r#"["src/**"]"#.to_string()),
            revision: Some(RevisionContext {
                feedback: "Tests: 3 tests failed".to_string(),
                revision_number: 1,
                branch: "minion/issue-42".to_string(),
            }),
        };
        let env = manager.build_env(&request, "minion-a");

        assert_eq!(env["MINION_ID"], "minion-a");
        assert_eq!(env["GITHUB_REPO"], "org/repo");
        assert_eq!(env["GITHUB_ISSUE"], "42");
        assert_eq!(env["GITHUB_TOKEN"], "ghp_token");
        assert_eq!(env["MINION_TIMEOUT"], "1800");
        assert_eq!(env["MINION_SCOPE"], r#"["src/**"]"#);
        assert_eq!(env["MINION_REVISION_NUMBER"], "1");
        assert!(env.contains_key("NEBULUS_BASE_URL"));
        assert!(env.contains_key("NEBULUS_MODEL"));
        assert!(env.contains_key("OVERLORD_CALLBACK_URL"));
    }
}
