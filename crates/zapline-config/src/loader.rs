// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./zapline.toml` > `~/.config/zapline/zapline.toml` > `/etc/zapline/zapline.toml`
//! with environment variable overrides via the `ZAPLINE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::ZaplineConfig;

/// Section prefixes recognised in environment variable names, longest first.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("drivers_baileys_", "drivers.baileys."),
    ("drivers_webjs_", "drivers.webjs."),
    ("service_", "service."),
    ("gateway_", "gateway."),
    ("storage_", "storage."),
    ("supervisor_", "supervisor."),
    ("broadcast_", "broadcast."),
    ("prometheus_", "prometheus."),
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/zapline/zapline.toml`
/// 3. `~/.config/zapline/zapline.toml`
/// 4. `./zapline.toml`
/// 5. `ZAPLINE_*` environment variables
pub fn load_config() -> Result<ZaplineConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<ZaplineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZaplineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ZaplineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZaplineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ZaplineConfig::default()))
        .merge(Toml::file("/etc/zapline/zapline.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("zapline/zapline.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("zapline.toml"))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// `Env::split("_")` would turn `ZAPLINE_GATEWAY_BEARER_TOKEN` into
/// `gateway.bearer.token`; only the section prefix may become a dot.
fn env_provider() -> Env {
    Env::prefixed("ZAPLINE_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for (prefix, section) in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{section}{rest}");
        }
    }
    key.to_string()
}
