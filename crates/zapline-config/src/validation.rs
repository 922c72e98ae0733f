// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks constraints serde cannot express: addresses, ranges, and
//! the relationship between the reconnect base and cap.

use crate::diagnostic::ConfigError;
use crate::model::{DriverEndpointConfig, ZaplineConfig};

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure instead of stopping at the first.
pub fn validate_config(config: &ZaplineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(validation("gateway.host must not be empty".to_string()));
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(validation(format!(
                "gateway.host `{host}` is not a valid IP address or hostname"
            )));
        }
    }

    if config.gateway.port == 0 {
        errors.push(validation("gateway.port must not be 0".to_string()));
    }

    if let Some(token) = &config.gateway.bearer_token
        && token.trim().is_empty()
    {
        errors.push(validation(
            "gateway.bearer_token must not be empty when set".to_string(),
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(validation(
            "storage.database_path must not be empty".to_string(),
        ));
    }

    let supervisor = &config.supervisor;
    if supervisor.reconnect_base_ms == 0 {
        errors.push(validation(
            "supervisor.reconnect_base_ms must be greater than 0".to_string(),
        ));
    }
    if supervisor.reconnect_cap_ms < supervisor.reconnect_base_ms {
        errors.push(validation(format!(
            "supervisor.reconnect_cap_ms ({}) must be at least reconnect_base_ms ({})",
            supervisor.reconnect_cap_ms, supervisor.reconnect_base_ms
        )));
    }
    if supervisor.close_timeout_secs == 0 {
        errors.push(validation(
            "supervisor.close_timeout_secs must be greater than 0".to_string(),
        ));
    }
    if supervisor.idle_timeout_secs > 0 && supervisor.idle_sweep_secs == 0 {
        errors.push(validation(
            "supervisor.idle_sweep_secs must be greater than 0 when idle reaping is enabled"
                .to_string(),
        ));
    }

    if config.broadcast.queue_capacity == 0 {
        errors.push(validation(
            "broadcast.queue_capacity must be at least 1".to_string(),
        ));
    }

    validate_endpoint("drivers.baileys", &config.drivers.baileys, &mut errors);
    validate_endpoint("drivers.webjs", &config.drivers.webjs, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_endpoint(section: &str, endpoint: &DriverEndpointConfig, errors: &mut Vec<ConfigError>) {
    let url = endpoint.endpoint.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        errors.push(validation(format!(
            "{section}.endpoint `{url}` must start with ws:// or wss://"
        )));
    }
    if endpoint.send_timeout_secs == 0 {
        errors.push(validation(format!(
            "{section}.send_timeout_secs must be greater than 0"
        )));
    }
}

fn validation(message: String) -> ConfigError {
    ConfigError::Validation { message }
}
