//! Overlord configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::OverlordConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_minions: {0}. Must be between 1 and 100")]
    InvalidMaxMinions(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid merge method: {0}. Must be one of: merge, squash, rebase")]
    InvalidMergeMethod(String),

    #[error("Invalid confidence threshold: {0}. Must be within [0, 1]")]
    InvalidConfidence(f64),

    #[error("State database path cannot be empty")]
    EmptyDatabasePath,

    #[error("No watched repositories configured")]
    NoWatchedRepos,

    #[error("Watched repository '{0}' is not in owner/name form")]
    InvalidRepoName(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.nebulus/config.yaml` (project config)
    /// 3. `.nebulus/local.yaml` (local overrides, optional)
    /// 4. Environment variables (`OVERLORD_*` prefix, highest priority)
    pub fn load() -> Result<OverlordConfig> {
        let config: OverlordConfig = Figment::new()
            .merge(Serialized::defaults(OverlordConfig::default()))
            .merge(Yaml::file(".nebulus/config.yaml"))
            .merge(Yaml::file(".nebulus/local.yaml"))
            .merge(Env::prefixed("OVERLORD_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OverlordConfig> {
        let config: OverlordConfig = Figment::new()
            .merge(Serialized::defaults(OverlordConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("OVERLORD_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &OverlordConfig) -> Result<(), ConfigError> {
        if config.limits.max_concurrent_minions == 0 || config.limits.max_concurrent_minions > 100 {
            return Err(ConfigError::InvalidMaxMinions(
                config.limits.max_concurrent_minions,
            ));
        }

        if config.storage.state_db_path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_merge_methods = ["merge", "squash", "rebase"];
        if !valid_merge_methods.contains(&config.review.merge_method.as_str()) {
            return Err(ConfigError::InvalidMergeMethod(
                config.review.merge_method.clone(),
            ));
        }

        let confidence = config.review.min_confidence_for_approve;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::InvalidConfidence(confidence));
        }

        if config.github.watched_repos.is_empty() {
            return Err(ConfigError::NoWatchedRepos);
        }
        for repo in &config.github.watched_repos {
            if repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
                return Err(ConfigError::InvalidRepoName(repo.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::OverlordConfig;

    fn valid_config() -> OverlordConfig {
        let mut config = OverlordConfig::default();
        config.github.watched_repos = vec!["org/repo".to_string()];
        config
    }

    #[test]
    fn default_config_with_repo_is_valid() {
        ConfigLoader::validate(&valid_config()).expect("config should validate");
    }

    #[test]
    fn rejects_zero_minions() {
        let mut config = valid_config();
        config.limits.max_concurrent_minions = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxMinions(0))
        ));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = valid_config();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn rejects_invalid_merge_method() {
        let mut config = valid_config();
        config.review.merge_method = "fast-forward".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMergeMethod(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut config = valid_config();
        config.review.min_confidence_for_approve = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConfidence(_))
        ));
    }

    #[test]
    fn rejects_missing_repos() {
        let mut config = valid_config();
        config.github.watched_repos.clear();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::NoWatchedRepos)
        ));
    }

    #[test]
    fn rejects_malformed_repo_name() {
        let mut config = valid_config();
        config.github.watched_repos = vec!["just-a-name".to_string()];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRepoName(_))
        ));
    }

    #[test]
    fn hierarchical_merging() {
        use figment::providers::{Format, Serialized, Yaml};
        use figment::Figment;
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "github:\n  watched_repos: [org/repo]\nlimits:\n  max_concurrent_minions: 2"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "limits:\n  max_concurrent_minions: 7").unwrap();
        override_file.flush().unwrap();

        let config: OverlordConfig = Figment::new()
            .merge(Serialized::defaults(OverlordConfig::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.limits.max_concurrent_minions, 7, "Override should win");
        assert_eq!(
            config.github.watched_repos,
            vec!["org/repo"],
            "Base value should persist when not overridden"
        );
    }
}
