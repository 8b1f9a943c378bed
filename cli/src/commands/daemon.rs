// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `agentgate daemon`: background maintenance for a control plane
//! deployment.
//!
//! Loads and validates the configuration, refuses to start without a usable
//! master key, assembles the services, then runs the browser context sweep
//! and logs domain events until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agentgate_core::application::{create_repositories, spawn_cleanup_task, ControlPlane};
use agentgate_core::domain::config::ControlPlaneConfig;
use agentgate_core::infrastructure::{AesGcmCipher, EventBus, EventBusError, LogNotifier, MasterKey};

#[derive(Args)]
pub struct DaemonArgs {
    /// Expose Prometheus metrics even if spec.metrics.enabled is false
    #[arg(long)]
    metrics: bool,

    /// Apply pending migrations before starting (Postgres only)
    #[arg(long)]
    migrate: bool,
}

pub async fn execute(args: DaemonArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = ControlPlaneConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    info!(name = %config.metadata.name, "Configuration loaded");

    let key = MasterKey::from_env(&config.spec.encryption.key_env)
        .context("Master encryption key is missing or malformed")?;

    if args.metrics || config.spec.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.spec.metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus metrics exporter listening");
    }

    let backend = config.storage_backend()?;
    let (repositories, database) = create_repositories(&backend)
        .await
        .context("Failed to initialise repositories")?;
    match &database {
        Some(db) if args.migrate => {
            db.migrate().await.context("Failed to apply migrations")?;
            info!("Database migrations applied");
        }
        Some(_) => {}
        None => warn!("No database configured; using in-memory repositories"),
    }

    let plane = ControlPlane::new(
        &config.spec,
        repositories,
        Arc::new(AesGcmCipher::new(&key)),
        Arc::new(LogNotifier::default()),
        EventBus::with_default_capacity(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = spawn_cleanup_task(
        plane.browser.clone(),
        Duration::from_secs(config.spec.browser.cleanup_interval_secs),
        shutdown.clone(),
    );
    let event_log = spawn_event_logger(&plane.event_bus, shutdown.clone());

    info!("agentgate daemon running");
    shutdown_signal().await;
    shutdown.cancel();

    if let Err(e) = sweeper.await {
        error!(error = %e, "Context sweeper task panicked");
    }
    let _ = event_log.await;
    info!("agentgate daemon stopped");
    Ok(())
}

fn spawn_event_logger(event_bus: &EventBus, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => debug!(?event, "Domain event"),
                    Err(EventBusError::Lagged(n)) => warn!(skipped = n, "Event logger lagged"),
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
