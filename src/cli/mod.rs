//! Command-line entry points and process wiring.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapters::agent_cli::CliAgentSpawner;
use crate::adapters::clients::{
    ConfluenceClient, GitHubClient, JiraClient, SlackClient, UnconfiguredDocStore,
    UnconfiguredIssueTracker, UnconfiguredSourceControl,
};
use crate::adapters::sqlite::{
    all_embedded_migrations, open_store, Migrator, SqliteDesignOutputRepository,
    SqliteDesignRepository, SqlitePrStateRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{DocStore, IssueTracker, SourceControl};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::http::verify::{GitHubVerifier, SlackVerifier};
use crate::infrastructure::http::{self, HttpState};
use crate::infrastructure::logging;
use crate::services::poller::PollingBridge;
use crate::services::queue::{JobQueue, QueueName};
use crate::services::router::{AgentQueues, Router};
use crate::services::supervisor::{AgentSupervisor, SupervisorConfig};
use crate::services::workers::{architect_worker, code_writer_worker, reviewer_worker, PipelineContext};
use crate::services::worktree::WorktreeManager;
use crate::services::Dispatcher;

#[derive(Parser)]
#[command(name = "maestro", about = "Chat-driven engineering pipeline orchestrator")]
pub struct Cli {
    /// Path to a config file (defaults to the hierarchical lookup).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the orchestrator: HTTP ingress, queues, and the polling bridge.
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&config.logging)?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
    }
}

async fn migrate(config: Config) -> Result<()> {
    let pool = open_store(&config.database)
        .await
        .context("opening database")?;
    let applied = Migrator::new(pool)
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("running migrations")?;
    info!(applied, "migrations up to date");
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let pool = open_store(&config.database)
        .await
        .context("opening database")?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("running migrations")?;

    let designs = Arc::new(SqliteDesignRepository::new(pool.clone()));
    let outputs = Arc::new(SqliteDesignOutputRepository::new(pool.clone()));
    let prs = Arc::new(SqlitePrStateRepository::new(pool.clone()));

    let chat = Arc::new(SlackClient::new(&config.chat));
    let source: Arc<dyn SourceControl> = match GitHubClient::new(&config.source_control) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "source control unconfigured, degrading");
            Arc::new(UnconfiguredSourceControl)
        }
    };
    let issues: Arc<dyn IssueTracker> = match JiraClient::new(&config.issue_tracker) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "issue tracker unconfigured, degrading");
            Arc::new(UnconfiguredIssueTracker)
        }
    };
    let docs: Arc<dyn DocStore> = match ConfluenceClient::new(&config.doc_store) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "doc store unconfigured, degrading");
            Arc::new(UnconfiguredDocStore)
        }
    };

    let supervisor = Arc::new(AgentSupervisor::new(
        Arc::new(CliAgentSpawner::new(config.agent.binary_path.clone())),
        WorktreeManager::new(&config.agent.repo_path),
        SupervisorConfig {
            timeout_ms: config.agent.timeout_ms,
            heartbeat_ms: config.agent.heartbeat_ms,
        },
    ));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let ctx = Arc::new(PipelineContext {
        config: config.clone(),
        designs: designs.clone(),
        outputs,
        prs: prs.clone(),
        issues,
        docs: docs.clone(),
        source,
        chat: chat.clone(),
        supervisor,
        events: events_tx.clone(),
    });

    // Agent queues first: their workers only need the shared context.
    let architect = {
        let ctx = ctx.clone();
        JobQueue::new(QueueName::Architect, config.queues.architect, move |item| {
            architect_worker(ctx.clone(), item)
        })
    };
    let code_writer = {
        let ctx = ctx.clone();
        JobQueue::new(QueueName::CodeWriter, config.queues.code_writer, move |item| {
            code_writer_worker(ctx.clone(), item)
        })
    };
    let reviewer = {
        let ctx = ctx.clone();
        JobQueue::new(QueueName::Reviewer, config.queues.reviewer, move |item| {
            reviewer_worker(ctx.clone(), item)
        })
    };
    let agent_queues = AgentQueues {
        architect: architect.clone(),
        code_writer: code_writer.clone(),
        reviewer: reviewer.clone(),
    };

    // The orchestrator queue serialises every route decision.
    let router = Arc::new(Router::new(ctx.clone(), agent_queues.clone()));
    let orchestrator = JobQueue::new(QueueName::Orchestrator, 1, move |item| {
        let router = router.clone();
        async move { router.handle(item).await }
    });

    let mut queue_map = HashMap::new();
    queue_map.insert(QueueName::Architect, architect.clone());
    queue_map.insert(QueueName::CodeWriter, code_writer.clone());
    queue_map.insert(QueueName::Reviewer, reviewer.clone());
    queue_map.insert(QueueName::Orchestrator, orchestrator.clone());
    let dispatcher = Dispatcher::with_default_handlers(queue_map);

    // Single dispatch loop: webhooks, the poller, and workers all feed the
    // same channel.
    tokio::spawn(async move {
        while let Some(envelope) = events_rx.recv().await {
            dispatcher.dispatch(envelope);
        }
    });

    tokio::spawn(
        PollingBridge::new(
            docs,
            events_tx.clone(),
            Duration::from_secs(config.polling.interval_secs),
        )
        .run(),
    );

    let state = Arc::new(HttpState {
        slack_verifier: SlackVerifier::new(config.chat.signing_secret.clone()),
        github_verifier: GitHubVerifier::new(config.source_control.webhook_secret.clone()),
        chat,
        designs,
        prs,
        events: events_tx,
        queues: agent_queues,
    });

    let queues = [architect, code_writer, reviewer, orchestrator];
    tokio::select! {
        result = http::serve(state, config.port) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining queues");
            for queue in &queues {
                queue.destroy();
            }
            let drain = async {
                for queue in &queues {
                    queue.drain().await;
                }
            };
            if tokio::time::timeout(Duration::from_secs(30), drain).await.is_err() {
                warn!("drain grace period elapsed, exiting with jobs in flight");
            }
        }
    }
    Ok(())
}
