mod bootstrap;
mod health;
mod jira;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use taskwire_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use taskwire_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let polling = Arc::new(AtomicBool::new(true));

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.db_pool.clone(), polling.clone()),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = app.runner;
    let runner_flag = polling.clone();
    let mut poller = tokio::spawn(async move {
        let outcome = runner.run(shutdown_rx).await;
        runner_flag.store(false, Ordering::Relaxed);
        outcome
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_username = app.bot_username.as_deref().unwrap_or("unknown"),
        "taskwire server started"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        finished = &mut poller => {
            tracing::warn!(
                event_name = "system.server.polling_finished",
                correlation_id = "shutdown",
                "update polling finished before shutdown was requested"
            );
            finished??;
            app.db_pool.close().await;
            return Ok(());
        }
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "taskwire server stopping"
    );
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, poller).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "update polling did not stop within the grace period"
        );
    }
    drop(app.dialogs);
    app.db_pool.close().await;

    Ok(())
}
