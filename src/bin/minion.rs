//! Minion container entry point.

use std::sync::Arc;

use nebulus_swarm::domain::models::config::LoggingConfig;
use nebulus_swarm::infrastructure::logging::Logger;
use nebulus_swarm::services::failure_memory::FailureMemory;
use nebulus_swarm::services::minion_runtime::{install_signal_handlers, Minion, MinionConfig};

#[tokio::main]
async fn main() {
    let logging = LoggingConfig {
        format: "pretty".to_string(),
        ..Default::default()
    };
    let _logger = match Logger::init(&logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("Minion starting");
    let config = MinionConfig::from_env();

    let errors = config.validate();
    if !errors.is_empty() {
        for error in errors {
            tracing::error!("Config error: {error}");
        }
        std::process::exit(1);
    }

    tracing::info!(
        minion_id = config.minion_id,
        repo = config.repo,
        issue = config.issue_number,
        "Minion configured"
    );

    // Failure memory is best-effort: the minion runs without it when the
    // store cannot be opened.
    let failure_db = std::env::var("MINION_FAILURE_DB")
        .unwrap_or_else(|_| "/workspace/.nebulus/failure_memory.db".to_string());
    let failure_memory = match FailureMemory::open(&failure_db).await {
        Ok(memory) => Some(Arc::new(memory)),
        Err(e) => {
            tracing::warn!(error = %e, "Failure memory unavailable");
            None
        }
    };

    let minion = Minion::new(config, failure_memory);
    install_signal_handlers(minion.shutdown_flag());

    let exit_code = minion.run().await;
    std::process::exit(exit_code);
}
