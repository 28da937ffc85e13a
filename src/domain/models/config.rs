//! Overlord configuration tree.
//!
//! Loaded by the figment-based loader in `infrastructure::config` from
//! defaults, `.nebulus/config.yaml`, `.nebulus/local.yaml`, and
//! `OVERLORD_*` environment variables.

use serde::{Deserialize, Serialize};

/// Top-level Overlord configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlordConfig {
    pub github: GithubConfig,
    pub limits: LimitsConfig,
    pub llm: LlmConfig,
    pub review: ReviewSettings,
    pub containers: ContainerConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// GitHub queue settings: token, watched repos, and the label vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub token: String,
    /// Repositories to watch, `owner/name` form.
    pub watched_repos: Vec<String>,
    /// Repo assumed when an operator types a bare `#N`.
    pub default_repo: Option<String>,
    pub work_label: String,
    pub in_progress_label: String,
    pub in_review_label: String,
    pub high_priority_label: String,
    pub needs_attention_label: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            watched_repos: Vec::new(),
            default_repo: None,
            work_label: "nebulus-ready".to_string(),
            in_progress_label: "in-progress".to_string(),
            in_review_label: "in-review".to_string(),
            high_priority_label: "high-priority".to_string(),
            needs_attention_label: "needs-attention".to_string(),
        }
    }
}

/// Concurrency and timing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent_minions: usize,
    /// Wall-clock budget handed to each Minion (MINION_TIMEOUT).
    pub minion_timeout_secs: u64,
    /// Watchdog fires when a heartbeat is older than this.
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    pub max_revisions: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_minions: 3,
            minion_timeout_secs: 1800,
            heartbeat_timeout_secs: 300,
            sweep_interval_secs: 300,
            watchdog_interval_secs: 60,
            max_revisions: 2,
        }
    }
}

/// LLM connection and pool settings shared by the reviewer and the Minions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    pub acquire_timeout_secs: u64,
    pub streaming: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/v1".to_string(),
            model: "default".to_string(),
            api_key: "not-needed".to_string(),
            timeout_secs: 600,
            max_concurrency: 2,
            acquire_timeout_secs: 60,
            streaming: false,
        }
    }
}

/// Review pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Run the automated review when a Minion completes.
    pub enabled: bool,
    pub post_review: bool,
    pub auto_merge_enabled: bool,
    /// merge, squash, or rebase.
    pub merge_method: String,
    pub run_local_checks: bool,
    pub max_diff_lines: usize,
    pub min_confidence_for_approve: f64,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            post_review: true,
            auto_merge_enabled: false,
            merge_method: "squash".to_string(),
            run_local_checks: true,
            max_diff_lines: 500,
            min_confidence_for_approve: 0.8,
        }
    }
}

/// Minion container settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    /// Host directory under which per-Minion workspaces are created.
    pub workspace_root: String,
    /// URL the Minion posts callbacks to, as reachable from inside the
    /// container.
    pub callback_url: String,
    /// Record container operations without invoking a runtime.
    pub stub_mode: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "nebulus-minion:latest".to_string(),
            workspace_root: "/var/lib/nebulus/workspaces".to_string(),
            callback_url: "http://overlord:8080/minion/report".to_string(),
            stub_mode: false,
        }
    }
}

/// On-disk state layout: one directory per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_db_path: String,
    pub audit_db_path: String,
    pub failure_db_path: String,
    pub signing_key_path: String,
    pub signing_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_db_path: ".nebulus/state.db".to_string(),
            audit_db_path: ".nebulus/audit.db".to_string(),
            failure_db_path: ".nebulus/failure_memory.db".to_string(),
            signing_key_path: ".nebulus/signing_key".to_string(),
            signing_enabled: false,
        }
    }
}

/// Callback listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error.
    pub level: String,
    /// json or pretty.
    pub format: String,
    /// When set, also log to rolling daily files in this directory.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = OverlordConfig::default();
        assert_eq!(config.limits.max_concurrent_minions, 3);
        assert_eq!(config.limits.minion_timeout_secs, 1800);
        assert_eq!(config.limits.max_revisions, 2);
        assert_eq!(config.llm.max_concurrency, 2);
        assert_eq!(config.llm.acquire_timeout_secs, 60);
        assert_eq!(config.github.work_label, "nebulus-ready");
        assert!((config.review.min_confidence_for_approve - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.review.max_diff_lines, 500);
        assert!(!config.review.auto_merge_enabled);
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r"
github:
  watched_repos: [org/repo]
  work_label: ready
limits:
  max_concurrent_minions: 5
";
        let config: OverlordConfig = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.github.watched_repos, vec!["org/repo"]);
        assert_eq!(config.github.work_label, "ready");
        assert_eq!(config.limits.max_concurrent_minions, 5);
        // Unspecified sections keep defaults
        assert_eq!(config.limits.minion_timeout_secs, 1800);
        assert_eq!(config.llm.model, "default");
    }
}
