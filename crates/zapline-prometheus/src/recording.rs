// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without a recorder every call is a no-op.

use metrics::{describe_counter, describe_gauge};
use zapline_core::{ConnectionStatus, DriverKind};

/// Register all Zapline metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_gauge!("zapline_active_sessions", "Sessions currently in the supervisor table");
    describe_gauge!("zapline_subscribers", "Registered event subscribers");
    describe_counter!(
        "zapline_events_published_total",
        "Canonical events accepted by the broadcaster"
    );
    describe_counter!(
        "zapline_events_dropped_total",
        "Events discarded from full subscriber queues"
    );
    describe_counter!(
        "zapline_reconnects_scheduled_total",
        "Reconnect timers armed after a transient close"
    );
    describe_counter!("zapline_messages_sent_total", "Messages accepted by a driver");
    describe_counter!(
        "zapline_status_changes_total",
        "Session status transitions by target status"
    );
    set_active_sessions(0);
    set_subscribers(0);
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("zapline_active_sessions").set(count as f64);
}

pub fn set_subscribers(count: usize) {
    metrics::gauge!("zapline_subscribers").set(count as f64);
}

pub fn record_event_published() {
    metrics::counter!("zapline_events_published_total").increment(1);
}

pub fn record_events_dropped(count: u64) {
    metrics::counter!("zapline_events_dropped_total").increment(count);
}

pub fn record_reconnect_scheduled(driver: DriverKind) {
    metrics::counter!("zapline_reconnects_scheduled_total", "driver" => driver.to_string())
        .increment(1);
}

pub fn record_message_sent(driver: DriverKind) {
    metrics::counter!("zapline_messages_sent_total", "driver" => driver.to_string()).increment(1);
}

pub fn record_status_change(status: ConnectionStatus) {
    metrics::counter!("zapline_status_changes_total", "status" => status.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        register_metrics();
        set_active_sessions(3);
        record_events_dropped(2);
        record_reconnect_scheduled(DriverKind::Baileys);
        record_status_change(ConnectionStatus::AwaitingScan);
    }
}
