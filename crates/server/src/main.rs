mod approvals;
mod auth;
mod bootstrap;
mod catalog;
mod error;
mod health;
mod intents;
mod state;

use std::time::Duration;

use anyhow::Result;
use officeflow_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use officeflow_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.log_level().parse::<Level>().unwrap_or(Level::INFO);

    match config.log_format() {
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
    let listener = tokio::net::TcpListener::bind(&app.config.server.bind).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %app.config.server.bind,
        backend = app.state.backend.name(),
        "officeflow-server listening"
    );

    axum::serve(listener, state::router(app.state.clone()))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "officeflow-server stopping"
    );

    // The worker exits once the engine, and with it the last intent sender,
    // is dropped.
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let bootstrap::Application { state, intent_worker, .. } = app;
    drop(state);
    match tokio::time::timeout(grace, intent_worker).await {
        Ok(Ok(delivered)) => tracing::info!(
            event_name = "system.server.intents_drained",
            correlation_id = "shutdown",
            delivered,
            "intent worker drained"
        ),
        Ok(Err(error)) => tracing::warn!(
            event_name = "system.server.intent_worker_failed",
            correlation_id = "shutdown",
            error = %error,
            "intent worker terminated abnormally"
        ),
        Err(_) => tracing::warn!(
            event_name = "system.server.intent_drain_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "intent worker did not drain before the shutdown deadline"
        ),
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            event_name = "system.server.signal_error",
            error = %error,
            "could not listen for ctrl-c; shutting down"
        );
    }
}
