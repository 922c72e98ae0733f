// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `zapline status` command implementation.
//!
//! Queries the gateway `/health` and `/connections` endpoints of a running
//! instance. Falls back gracefully when nothing is listening.

use std::io::IsTerminal;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use zapline_config::model::ZaplineConfig;
use zapline_core::ZaplineError;

/// Health endpoint response from the gateway.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    active_connections: usize,
    uptime_secs: u64,
}

/// One row of the `/connections` listing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRow {
    pub id: String,
    pub driver: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub status: String,
    pub uptime_secs: Option<u64>,
    pub uptime_human: Option<String>,
    pub active_connections: Option<usize>,
    /// `None` when the listing was refused (for example a missing token).
    pub connections: Option<Vec<ConnectionRow>>,
    pub gateway_host: String,
    pub gateway_port: u16,
}

/// Format seconds into a human-readable duration string.
fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// A wildcard bind address is not dialable; query loopback instead.
fn dial_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

fn base_url(host: &str, port: u16) -> String {
    let host = dial_host(host);
    if host.contains(':') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// Run the `zapline status` command.
///
/// If `--json` is passed, outputs structured JSON for scripting.
/// If `--plain` is passed or stdout is not a TTY, disables colors.
pub async fn run_status(config: &ZaplineConfig, json: bool, plain: bool) -> Result<(), ZaplineError> {
    let response = query(config).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&response, use_color);
    }
    Ok(())
}

async fn query(config: &ZaplineConfig) -> Result<StatusResponse, ZaplineError> {
    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let base = base_url(&host, port);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .map_err(|e| ZaplineError::Internal(format!("failed to create HTTP client: {e}")))?;

    let health = match client.get(format!("{base}/health")).send().await {
        Ok(resp) if resp.status().is_success() => resp.json::<HealthResponse>().await.map_err(|e| {
            ZaplineError::Internal(format!("failed to parse health response: {e}"))
        })?,
        _ => {
            return Ok(StatusResponse {
                running: false,
                status: "not running".to_string(),
                uptime_secs: None,
                uptime_human: None,
                active_connections: None,
                connections: None,
                gateway_host: host,
                gateway_port: port,
            });
        }
    };

    let mut request = client.get(format!("{base}/connections"));
    if let Some(token) = &config.gateway.bearer_token {
        request = request.bearer_auth(token);
    }
    let connections = match request.send().await {
        Ok(resp) if resp.status().is_success() => resp.json::<Vec<ConnectionRow>>().await.ok(),
        Ok(resp) => {
            tracing::debug!(status = %resp.status(), "connection listing refused");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "connection listing failed");
            None
        }
    };

    Ok(StatusResponse {
        running: true,
        uptime_human: Some(format_uptime(health.uptime_secs)),
        status: health.status,
        uptime_secs: Some(health.uptime_secs),
        active_connections: Some(health.active_connections),
        connections,
        gateway_host: host,
        gateway_port: port,
    })
}

fn print_status(response: &StatusResponse, use_color: bool) {
    use colored::Colorize;

    println!();
    println!("  zapline status");
    println!("  {}", "-".repeat(35));

    if !response.running {
        if use_color {
            println!("    State:    {} {}", "✗".red(), "not running".red());
        } else {
            println!("    State:    [FAIL] not running");
        }
        println!(
            "    Endpoint: {}/health",
            base_url(&response.gateway_host, response.gateway_port)
        );
        println!();
        println!("  Start with: zapline serve");
        println!();
        return;
    }

    let uptime = response.uptime_human.as_deref().unwrap_or("?");
    if use_color {
        println!(
            "    State:    {} {} (uptime: {})",
            "✓".green(),
            response.status.green(),
            uptime
        );
    } else {
        println!("    State:    [OK] {} (uptime: {uptime})", response.status);
    }
    println!(
        "    Sessions: {}",
        response.active_connections.unwrap_or_default()
    );

    match &response.connections {
        Some(rows) => {
            for row in rows {
                let phone = row.phone_number.as_deref().unwrap_or("-");
                let status = if use_color && row.status == "connected" {
                    row.status.green().to_string()
                } else {
                    row.status.clone()
                };
                println!("      {:<24} {:<8} {:<16} {phone}", row.id, row.driver, status);
            }
        }
        None => println!("      (connection list unavailable, check gateway.bearer_token)"),
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_uptime_minutes() {
        assert_eq!(format_uptime(120), "2m");
    }

    #[test]
    fn format_uptime_hours() {
        assert_eq!(format_uptime(3720), "1h 2m");
    }

    #[test]
    fn format_uptime_days() {
        assert_eq!(format_uptime(90060), "1d 1h 1m");
    }

    #[test]
    fn wildcard_hosts_dial_loopback() {
        assert_eq!(base_url("0.0.0.0", 8080), "http://127.0.0.1:8080");
        assert_eq!(base_url("::", 8080), "http://[::1]:8080");
        assert_eq!(base_url("example.org", 80), "http://example.org:80");
    }

    #[test]
    fn connection_row_parses_gateway_listing() {
        let rows: Vec<ConnectionRow> = serde_json::from_str(
            r#"[{"id":"c1","driver":"baileys","status":"connected","phoneNumber":"5511"},
                {"id":"c2","driver":"webjs","status":"qr_ready"}]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].phone_number.as_deref(), Some("5511"));
        assert!(rows[1].phone_number.is_none());
    }

    #[tokio::test]
    async fn unreachable_gateway_reports_not_running() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ZaplineConfig::default();
        config.gateway.host = "127.0.0.1".into();
        config.gateway.port = port;
        let response = query(&config).await.unwrap();
        assert!(!response.running);
        assert_eq!(response.status, "not running");
        assert!(response.connections.is_none());
    }

    #[test]
    fn status_response_serializes() {
        let resp = StatusResponse {
            running: true,
            status: "ok".to_string(),
            uptime_secs: Some(3600),
            uptime_human: Some("1h 0m".to_string()),
            active_connections: Some(2),
            connections: Some(vec![]),
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 8080,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"running\":true"));
        assert!(json.contains("\"active_connections\":2"));
    }
}
