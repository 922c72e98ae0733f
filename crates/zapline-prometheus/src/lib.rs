// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for the Zapline session supervisor.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. The rendered text
//! is served by the gateway's `/metrics` endpoint.

pub mod recording;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use zapline_core::ZaplineError;

pub use recording::{
    record_event_published, record_events_dropped, record_message_sent,
    record_reconnect_scheduled, record_status_change, set_active_sessions, set_subscribers,
};

/// Installed Prometheus recorder.
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    /// Installs the Prometheus recorder globally.
    ///
    /// Only one recorder can be installed per process; a second call fails.
    pub fn install() -> Result<Self, ZaplineError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ZaplineError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
