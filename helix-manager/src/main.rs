//! Helix Job Manager
//!
//! Tracks scientific-compute jobs through their lifecycle on a local or
//! remote compute resource, driven by records in the job store.
//!
//! Architecture:
//! - Configuration: everything from the environment, validated at startup
//! - Store: Postgres job rows with compare-and-set versioned updates
//! - State machine: pure transition logic, no I/O
//! - Manager: polling loop, bounded parallel dispatch, drain-on-shutdown
//! - Connectors: pluggable execution backends selected by name

mod config;
mod db;
mod manager;
mod notify;
mod results;
mod shutdown;
mod state;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use helix_connector::ConnectorRegistry;

use crate::config::Config;
use crate::manager::JobManager;
use crate::notify::LogNotifier;
use crate::store::PgJobStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helix_manager=info,helix_connector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Helix Job Manager");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        connector = %config.connector,
        max_running_jobs = config.max_running_jobs,
        poll_interval = ?config.poll_interval,
        dry_run = config.dry_run,
        "Loaded configuration"
    );

    if config.dry_run {
        info!(
            "This is a dry run. No commands will be executed, no files will be \
             staged, and no updates will be written to the job store."
        );
    }

    // An unknown connector name is fatal before anything else starts. A dry
    // run still resolves the configured name; only the construction it hands
    // back is substituted.
    let registry = ConnectorRegistry::builtin();
    let connector = if config.dry_run {
        registry.build_dry_run(&config.connector, &config.connector_config())
    } else {
        registry.build(&config.connector, &config.connector_config())
    }
    .context("Failed to construct connector")?;
    info!(connector = connector.name(), "Connector initialized");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to the job store")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let store = Arc::new(PgJobStore::new(pool));
    let notifier = Arc::new(LogNotifier);

    let shutdown = shutdown::install_shutdown_handler()
        .context("Failed to install shutdown handler")?;

    let manager = JobManager::new(config, store, connector, notifier);

    info!("Starting job polling loop");
    if let Err(e) = manager.run(shutdown).await {
        error!("Manager error: {:#}", e);
        return Err(e);
    }

    info!("Shutting down the Job Manager");
    Ok(())
}
