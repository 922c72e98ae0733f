// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests driving the compiled `zapline` binary.
//!
//! Each test writes its own config into a temp directory, so tests are
//! independent and order-insensitive.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

use serde_json::Value;
use serial_test::serial;
use tempfile::TempDir;

const TOKEN: &str = "e2e-token";

fn zapline() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zapline"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Write a config for an isolated instance and return its path.
fn write_config(dir: &TempDir, port: u16, extra: &str) -> PathBuf {
    let db = dir.path().join("zapline.db");
    let content = format!(
        r#"
[gateway]
host = "127.0.0.1"
port = {port}
bearer_token = "{TOKEN}"

[storage]
database_path = "{db}"

[supervisor]
resume_on_start = false
{extra}
"#,
        db = db.display().to_string().replace('\\', "/"),
    );
    let path = dir.path().join("zapline.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    zapline()
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

/// Kills the server when the test ends, including on panic.
struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

async fn start_server(config: &Path, port: u16) -> Server {
    let child = zapline()
        .arg("--config")
        .arg(config)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let server = Server(child);

    let url = format!("http://127.0.0.1:{port}/health");
    for _ in 0..100 {
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.status().is_success() {
                return server;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("zapline serve did not become healthy on port {port}");
}

#[test]
fn config_check_accepts_valid_file() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, free_port(), "");
    let output = run(&config, &["config", "check"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[gateway]"));
    assert!(!stdout.contains(TOKEN), "bearer token must be masked");
}

#[test]
fn config_check_rejects_unknown_key() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, free_port(), "reconect_base_ms = 10");
    let output = run(&config, &["config", "check"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reconect_base_ms"), "{stderr}");
}

#[test]
fn status_reports_not_running() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, free_port(), "");
    let output = run(&config, &["status", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["running"], false);
    assert_eq!(status["status"], "not running");
}

#[tokio::test]
#[serial]
async fn serve_exposes_gateway() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let config = write_config(&dir, port, "");
    let _server = start_server(&config, port).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["activeConnections"], 0);

    let anonymous = client.get(format!("{base}/connections")).send().await.unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let listing: Value = client
        .get(format!("{base}/connections"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing, serde_json::json!([]));

    let metrics = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(metrics.status().is_success());
    let body = metrics.text().await.unwrap();
    assert!(body.contains("zapline_"), "{body}");
}

#[tokio::test]
#[serial]
async fn status_reads_running_instance() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let config = write_config(&dir, port, "");
    let _server = start_server(&config, port).await;

    let config_path = config.clone();
    let output = tokio::task::spawn_blocking(move || run(&config_path, &["status", "--json"]))
        .await
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["running"], true);
    assert_eq!(status["active_connections"], 0);
    assert_eq!(status["connections"], serde_json::json!([]));
}
