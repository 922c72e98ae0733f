// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway API.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use zapline_core::{ConnectionId, ConnectionStatus, DriverKind, ErrorCode, ZaplineError};
use zapline_supervisor::{SessionSnapshot, SupervisorStats};

use crate::commands;
use crate::server::GatewayState;

/// POST /connections body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub connection_id: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /connections/{id}/messages body.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_secs: u64,
}

/// One row of GET /connections.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub driver: DriverKind,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

/// A [`ZaplineError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ZaplineError);

impl From<ZaplineError> for ApiError {
    fn from(err: ZaplineError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ZaplineError::InvalidPayload(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.code() {
            ErrorCode::AlreadyExists | ErrorCode::NotConnected => StatusCode::CONFLICT,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::SendFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::InvalidPayload | ErrorCode::ConfigError => StatusCode::BAD_REQUEST,
            ErrorCode::AuthFailure => StatusCode::UNAUTHORIZED,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::StorageError | ErrorCode::EventsDropped | ErrorCode::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// GET /health (public)
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_connections: state.supervisor.active_count(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics (public)
///
/// 404 when the Prometheus exporter is not installed.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// GET /connections
pub async fn list_connections(State(state): State<GatewayState>) -> Json<Vec<ConnectionSummary>> {
    let rows = state
        .supervisor
        .sessions()
        .iter()
        .map(|session| {
            let snapshot = session.current_state();
            ConnectionSummary {
                id: snapshot.connection_id,
                driver: snapshot.driver,
                status: snapshot.status,
                phone_number: snapshot.phone_number,
            }
        })
        .collect();
    Json(rows)
}

/// GET /connections/{id}
pub async fn get_connection(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = state
        .supervisor
        .get_session(&ConnectionId::from(id.as_str()))
        .ok_or(ZaplineError::NotFound { connection_id: id })?;
    Ok(Json(session.current_state()))
}

/// POST /connections
pub async fn create_connection(
    State(state): State<GatewayState>,
    body: Result<Json<CreateConnectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let Json(body) = body?;
    let request = commands::create_request(
        &body.connection_id,
        body.driver.as_deref(),
        body.tenant_id.as_deref(),
        body.name.as_deref(),
    )?;
    let session = state.supervisor.create_connection(request).await?;
    Ok((StatusCode::CREATED, Json(session.current_state())))
}

/// POST /connections/{id}/messages
pub async fn send_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(body) = body?;
    let ack = state
        .supervisor
        .send_message(&ConnectionId::from(id.as_str()), &body.to, &body.message)
        .await?;
    Ok(Json(SendMessageResponse {
        message_id: ack.message_id,
        timestamp: ack.timestamp,
    }))
}

/// POST /connections/{id}/disconnect
pub async fn disconnect_connection(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .supervisor
        .disconnect_connection(&ConnectionId::from(id.as_str()))
        .await?;
    Ok(StatusCode::OK)
}

/// GET /stats
pub async fn get_stats(State(state): State<GatewayState>) -> Json<SupervisorStats> {
    Json(state.supervisor.stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_deserializes_camel_case() {
        let json = r#"{"connectionId": "c1", "driver": "baileys", "tenantId": "t1"}"#;
        let req: CreateConnectionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.connection_id, "c1");
        assert_eq!(req.driver.as_deref(), Some("baileys"));
        assert_eq!(req.tenant_id.as_deref(), Some("t1"));
        assert!(req.name.is_none());
    }

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "ok".to_string(),
            active_connections: 3,
            timestamp: Utc::now(),
            version: "0.1.0".to_string(),
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"activeConnections\":3"));
        assert!(json.contains("\"uptimeSecs\":42"));
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (
                ZaplineError::AlreadyExists {
                    connection_id: "c1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                ZaplineError::NotFound {
                    connection_id: "c1".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                ZaplineError::NotConnected {
                    connection_id: "c1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (ZaplineError::send_failed("nope"), StatusCode::BAD_GATEWAY),
            (ZaplineError::Config("bad".into()), StatusCode::BAD_REQUEST),
            (
                ZaplineError::InvalidPayload("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ZaplineError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn connection_summary_omits_missing_phone() {
        let row = ConnectionSummary {
            id: ConnectionId::from("c1"),
            driver: DriverKind::WebJs,
            status: ConnectionStatus::AwaitingScan,
            phone_number: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], "c1");
        assert_eq!(json["driver"], "webjs");
        assert_eq!(json["status"], "qr_ready");
        assert!(json.get("phoneNumber").is_none());
    }
}
