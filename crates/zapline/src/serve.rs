// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `zapline serve` command implementation.
//!
//! Opens SQLite storage, recovers from an unclean previous exit, starts the
//! session supervisor with the sidecar driver registry, optionally resumes
//! every paired connection, and serves the gateway until SIGINT/SIGTERM.

use std::sync::Arc;

use tracing::{info, warn};

use zapline_bus::EventBus;
use zapline_config::model::ZaplineConfig;
use zapline_core::{ConnectionRepository, ZaplineError};
use zapline_gateway::{AuthConfig, GatewayState, HealthState, ServerConfig};
use zapline_storage::SqliteStorage;
use zapline_supervisor::{Supervisor, SupervisorDeps, SupervisorSettings, install_signal_handler};
use zapline_whatsapp::DriverRegistry;

#[cfg(feature = "prometheus")]
use zapline_prometheus::PrometheusExporter;

type MetricsRender = Arc<dyn Fn() -> String + Send + Sync>;

/// Runs the `zapline serve` command.
pub async fn run_serve(config: ZaplineConfig) -> Result<(), ZaplineError> {
    init_tracing(&config.service.log_level);

    info!(name = %config.service.name, "starting zapline serve");

    let storage = Arc::new(SqliteStorage::open(&config.storage).await?);

    // Statuses left over from a crash describe links that no longer exist.
    let stale = storage.mark_stale().await?;
    if stale > 0 {
        info!(count = stale, "marked stale connections as disconnected");
    }

    let prometheus_render = init_metrics(&config);

    let bus = EventBus::new(config.broadcast.queue_capacity);
    let supervisor = Supervisor::spawn(
        SupervisorDeps {
            factory: Arc::new(DriverRegistry::new(config.drivers.clone())),
            credentials: storage.clone(),
            repository: storage.clone(),
            bus,
        },
        SupervisorSettings::from_config(&config.supervisor),
    );

    if config.supervisor.resume_on_start {
        if let Err(e) = supervisor.resume_stored().await {
            warn!(error = %e, "failed to list stored credentials, nothing resumed");
        }
    }

    let cancel = install_signal_handler();

    let auth = AuthConfig::new(config.gateway.bearer_token.clone());
    if !auth.is_enabled() {
        warn!("gateway bearer token not set, API is unauthenticated");
    }
    let state = GatewayState::new(supervisor.clone(), auth, HealthState::new(prometheus_render));
    let server_config = ServerConfig::from(&config.gateway);

    let result = zapline_gateway::start_server(&server_config, state, cancel.clone()).await;
    if let Err(e) = &result {
        warn!(error = %e, "gateway stopped with an error");
    }

    // Release rather than log out so pairings survive the restart.
    info!("releasing all sessions");
    supervisor.shutdown().await;

    info!("zapline serve shutdown complete");
    result
}

#[cfg(feature = "prometheus")]
fn init_metrics(config: &ZaplineConfig) -> Option<MetricsRender> {
    if !config.prometheus.enabled {
        return None;
    }
    match PrometheusExporter::install() {
        Ok(exporter) => {
            let handle = exporter.handle().clone();
            Some(Arc::new(move || handle.render()))
        }
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    }
}

#[cfg(not(feature = "prometheus"))]
fn init_metrics(config: &ZaplineConfig) -> Option<MetricsRender> {
    if config.prometheus.enabled {
        warn!("prometheus enabled in config but this build has no metrics support");
    }
    None
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zapline={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
