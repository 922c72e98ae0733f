// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Zapline session supervisor.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};
use zapline_core::DriverKind;

/// Top-level Zapline configuration.
///
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ZaplineConfig {
    /// Service identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// WebSocket/HTTP command gateway.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// SQLite storage for credentials and connection status.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session supervisor policy (backoff, idle reaping, startup recovery).
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Event broadcaster settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Engine sidecar endpoints.
    #[serde(default)]
    pub drivers: DriversConfig,

    /// Prometheus metrics exporter.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "zapline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token required on every non-public route. `None` disables auth.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            bearer_token: None,
            allowed_origins: Vec::new(),
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    3001
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("zapline").join("zapline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("zapline.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Session supervisor policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// First reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Upper bound for any reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,

    /// How long an explicit disconnect waits for the driver to log out.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Sessions that are not connected and idle this long are released. 0 disables.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Interval between idle sweeps.
    #[serde(default = "default_idle_sweep_secs")]
    pub idle_sweep_secs: u64,

    /// Reopen every connection that has stored credentials on startup.
    #[serde(default = "default_resume_on_start")]
    pub resume_on_start: bool,

    /// Driver used when a create command does not name one.
    #[serde(default = "default_driver")]
    pub default_driver: DriverKind,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            close_timeout_secs: default_close_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            idle_sweep_secs: default_idle_sweep_secs(),
            resume_on_start: default_resume_on_start(),
            default_driver: default_driver(),
        }
    }
}

fn default_reconnect_base_ms() -> u64 {
    5_000
}

fn default_reconnect_cap_ms() -> u64 {
    300_000
}

fn default_close_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    3_600
}

fn default_idle_sweep_secs() -> u64 {
    1_800
}

fn default_resume_on_start() -> bool {
    true
}

fn default_driver() -> DriverKind {
    DriverKind::Baileys
}

/// Event broadcaster configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastConfig {
    /// Per-subscriber queue capacity before the oldest events are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

/// Engine sidecar endpoints, one per driver kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DriversConfig {
    #[serde(default = "default_baileys")]
    pub baileys: DriverEndpointConfig,

    #[serde(default = "default_webjs")]
    pub webjs: DriverEndpointConfig,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            baileys: default_baileys(),
            webjs: default_webjs(),
        }
    }
}

impl DriversConfig {
    pub fn endpoint(&self, kind: DriverKind) -> &DriverEndpointConfig {
        match kind {
            DriverKind::Baileys => &self.baileys,
            DriverKind::WebJs => &self.webjs,
        }
    }
}

fn default_baileys() -> DriverEndpointConfig {
    DriverEndpointConfig {
        endpoint: "ws://127.0.0.1:7001".to_string(),
        send_timeout_secs: default_send_timeout_secs(),
    }
}

fn default_webjs() -> DriverEndpointConfig {
    DriverEndpointConfig {
        endpoint: "ws://127.0.0.1:7002".to_string(),
        send_timeout_secs: default_send_timeout_secs(),
    }
}

/// Where a driver's engine sidecar listens.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DriverEndpointConfig {
    /// Base WebSocket URL; sessions connect to `{endpoint}/sessions/{id}`.
    pub endpoint: String,

    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_send_timeout_secs() -> u64 {
    30
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    #[serde(default = "default_prometheus_enabled")]
    pub enabled: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: default_prometheus_enabled(),
        }
    }
}

fn default_prometheus_enabled() -> bool {
    true
}
