//! Overlord daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use nebulus_swarm::domain::models::config::OverlordConfig;
use nebulus_swarm::infrastructure::config::ConfigLoader;
use nebulus_swarm::infrastructure::containers::ContainerManager;
use nebulus_swarm::infrastructure::github::GitHubClient;
use nebulus_swarm::infrastructure::llm::client::{LlmClient, LlmClientConfig};
use nebulus_swarm::infrastructure::llm::pool::LlmPool;
use nebulus_swarm::infrastructure::logging::Logger;
use nebulus_swarm::services::audit_trail::{load_or_create_signing_key, AuditTrail};
use nebulus_swarm::services::callback_server::{self, CallbackState};
use nebulus_swarm::services::issue_queue::IssueQueue;
use nebulus_swarm::services::llm_review::LlmReviewer;
use nebulus_swarm::services::review_workflow::ReviewWorkflow;
use nebulus_swarm::services::scheduler::Overlord;
use nebulus_swarm::services::state_store::StateStore;

#[derive(Parser)]
#[command(name = "overlord", about = "Nebulus swarm supervisor")]
struct Cli {
    /// Path to a config file (default: .nebulus/config.yaml hierarchy).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and callback listener.
    Run,
    /// One-shot scan of the ready-issue queue.
    Queue,
    /// Audit-trail inspection.
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Verify the hash chain.
    Verify,
    /// Export the trail as JSON.
    Export {
        /// Restrict the export to one task id (e.g. org/repo#42).
        #[arg(long)]
        task_id: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<OverlordConfig> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("Failed to load configuration")?;
    let _logger = Logger::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Queue => queue(config).await,
        Commands::Audit { command } => audit(config, command).await,
    }
}

async fn run(config: OverlordConfig) -> Result<()> {
    tracing::info!(
        repos = ?config.github.watched_repos,
        max_minions = config.limits.max_concurrent_minions,
        "Starting Overlord"
    );

    // Failing to create the state or audit database is fatal at startup.
    let state = Arc::new(
        StateStore::open(&config.storage.state_db_path)
            .await
            .context("Failed to open state database")?,
    );

    let signing_key = if config.storage.signing_enabled {
        Some(
            load_or_create_signing_key(std::path::Path::new(&config.storage.signing_key_path))
                .context("Failed to load signing key")?,
        )
    } else {
        None
    };
    let audit = Arc::new(
        AuditTrail::open(&config.storage.audit_db_path, signing_key)
            .await
            .context("Failed to open audit database")?,
    );

    let github = Arc::new(GitHubClient::new(config.github.token.clone()));
    let queue = Arc::new(IssueQueue::new(Arc::clone(&github), config.github.clone()));
    let containers = Arc::new(ContainerManager::new(
        config.containers.clone(),
        config.llm.clone(),
        config.github.token.clone(),
        config.limits.minion_timeout_secs,
    ));

    let review = if config.review.enabled {
        let pool = LlmPool::new(
            config.llm.max_concurrency,
            Duration::from_secs(config.llm.acquire_timeout_secs),
        );
        let client = LlmClient::new(
            LlmClientConfig {
                base_url: config.llm.base_url.clone(),
                model: config.llm.model.clone(),
                api_key: config.llm.api_key.clone(),
                timeout: Duration::from_secs(config.llm.timeout_secs),
                ..Default::default()
            },
            Some(pool),
        )
        .context("Failed to build LLM client")?;
        Some(Arc::new(ReviewWorkflow::new(
            Arc::clone(&github),
            LlmReviewer::new(client, config.review.max_diff_lines),
            config.review.clone(),
        )))
    } else {
        None
    };

    let (event_tx, event_rx) = mpsc::channel(256);
    let overlord = Overlord::new(
        config.clone(),
        state,
        audit,
        queue,
        containers,
        review,
        event_tx.clone(),
    );

    Overlord::spawn_timers(&config, &event_tx);

    // Failing to bind the callback listener is fatal.
    let callback_state = CallbackState {
        event_tx,
        answers: overlord.answer_buffer(),
    };
    let bind_addr = config.server.bind_addr.clone();
    let port = config.server.port;
    let server = tokio::spawn(async move {
        if let Err(e) = callback_server::serve(callback_state, &bind_addr, port).await {
            tracing::error!(error = %e, "Callback listener failed");
            std::process::exit(1);
        }
    });

    overlord.run(event_rx).await;
    server.abort();
    Ok(())
}

async fn queue(config: OverlordConfig) -> Result<()> {
    let github = Arc::new(GitHubClient::new(config.github.token.clone()));
    let queue = IssueQueue::new(github, config.github.clone());

    if !queue.can_perform_sweep().await {
        println!("Queue scan skipped: GitHub API budget is too low.");
        return Ok(());
    }

    let issues = queue.scan_queue().await;
    if issues.is_empty() {
        println!("Queue is empty.");
    }
    for issue in issues {
        println!(
            "{}{}",
            issue,
            if issue.priority > 0 { " [high]" } else { "" }
        );
    }
    Ok(())
}

async fn audit(config: OverlordConfig, command: AuditCommands) -> Result<()> {
    let audit = AuditTrail::open(&config.storage.audit_db_path, None)
        .await
        .context("Failed to open audit database")?;

    match command {
        AuditCommands::Verify => {
            let (valid, issues) = audit.verify_integrity().await?;
            if valid {
                println!("Audit trail OK.");
            } else {
                println!("Audit trail INVALID:");
                for issue in issues {
                    println!("  {issue}");
                }
                std::process::exit(1);
            }
        }
        AuditCommands::Export { task_id } => {
            let export = audit.export(task_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&export)?);
        }
    }
    Ok(())
}
