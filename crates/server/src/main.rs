mod bootstrap;
mod health;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use summarybot_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "summarybot",
    about = "Mattermost summary bot",
    long_about = "Listens to Mattermost, summarizes threads on request and delivers scheduled channel digests."
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Path to a TOML config file")]
    config: Option<PathBuf>,
}

fn init_logging(config: &AppConfig) {
    use summarybot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    })?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState {
            db_pool: app.db_pool.clone(),
            store: app.store.clone(),
            scheduler_status: app.scheduler.status(),
            event_stream: app.event_runner.status(),
            poll_interval_secs: app.config.scheduler.poll_interval_secs,
        },
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = app.scheduler;
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let event_runner = app.event_runner;
    let event_task = tokio::spawn(async move {
        if let Err(error) = event_runner.start().await {
            tracing::error!(
                event_name = "ingress.mattermost.runner_failed",
                correlation_id = "bootstrap",
                error = %error,
                "event stream runner stopped with an error"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_username = %app.config.mattermost.bot_username,
        "summarybot started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "summarybot stopping"
    );

    let _ = shutdown_tx.send(true);
    event_task.abort();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, scheduler_task).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "scheduler did not finish its tick before the grace period ended"
        );
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
