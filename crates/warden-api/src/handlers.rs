//! PAM session endpoint handlers

use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::middleware::AuthUser;
use crate::models::*;
use crate::AppState;
use warden_broker::{BrokerError, ExecuteQueryRequest};

/// Upper bound on statement length accepted over HTTP
const MAX_SQL_LENGTH: usize = 100_000;

fn error_response(err: BrokerError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        BrokerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        BrokerError::SessionEnded => (StatusCode::BAD_REQUEST, "SESSION_ENDED"),
        BrokerError::SessionExpired => (StatusCode::BAD_REQUEST, "SESSION_EXPIRED"),
        BrokerError::GatewayUnavailable(_) => (StatusCode::BAD_REQUEST, "GATEWAY_UNAVAILABLE"),
        BrokerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: Some(code.to_string()),
        }),
    )
}

pub(crate) fn validate_sql(sql: &str) -> Result<(), &'static str> {
    if sql.is_empty() {
        return Err("sql must not be empty");
    }
    if sql.chars().count() > MAX_SQL_LENGTH {
        return Err("sql exceeds the maximum statement length");
    }
    Ok(())
}

/// Affirm a session is usable
#[utoipa::path(
    post,
    path = "/api/v1/pam/sessions/{sessionId}/connect",
    params(
        ("sessionId" = String, Path, description = "PAM session ID")
    ),
    responses(
        (status = 200, description = "Session is usable", body = ConnectResponse),
        (status = 400, description = "Session is not usable", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "pam-sessions"
)]
pub async fn connect_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> Result<Json<ConnectResponse>, (StatusCode, Json<ErrorResponse>)> {
    debug!(session_id = %session_id, "Connect handshake");

    let handshake = state
        .broker
        .connect_check(&session_id, &user.to_actor())
        .await
        .map_err(error_response)?;

    Ok(Json(ConnectResponse {
        status: "connected".to_string(),
        message: "Session is active and ready to execute queries".to_string(),
        server_version: None,
        database: Some(handshake.database),
    }))
}

/// Execute one statement through the session's gateway tunnel
#[utoipa::path(
    post,
    path = "/api/v1/pam/sessions/{sessionId}/query",
    params(
        ("sessionId" = String, Path, description = "PAM session ID")
    ),
    request_body = QueryRequestBody,
    responses(
        (status = 200, description = "Query result", body = QueryResponse),
        (status = 400, description = "Query failed", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "pam-sessions"
)]
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<String>,
    Json(body): Json<QueryRequestBody>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ErrorResponse>)> {
    if let Err(reason) = validate_sql(&body.sql) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: reason.to_string(),
                code: Some("INVALID_SQL".to_string()),
            }),
        ));
    }

    let started = Instant::now();
    let result = state
        .broker
        .execute_query(ExecuteQueryRequest {
            session_id: session_id.clone(),
            sql: body.sql,
            params: body.params.unwrap_or_default(),
            actor: user.to_actor(),
        })
        .await
        .map_err(error_response)?;

    let execution_time_ms = started.elapsed().as_millis() as u64;
    info!(
        session_id = %session_id,
        rows = result.row_count,
        execution_time_ms = execution_time_ms,
        "Query executed"
    );

    let fields = if result.fields.is_empty() {
        None
    } else {
        Some(
            result
                .fields
                .into_iter()
                .map(|field| QueryFieldDto {
                    name: field.name,
                    data_type: field.data_type,
                })
                .collect(),
        )
    };

    Ok(Json(QueryResponse {
        fields,
        rows: result.rows,
        row_count: result.row_count,
        execution_time_ms,
    }))
}

/// Close the session's tunnel
#[utoipa::path(
    post,
    path = "/api/v1/pam/sessions/{sessionId}/disconnect",
    params(
        ("sessionId" = String, Path, description = "PAM session ID")
    ),
    responses(
        (status = 200, description = "Tunnel closed", body = DisconnectResponse)
    ),
    tag = "pam-sessions"
)]
pub async fn disconnect_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<DisconnectResponse> {
    let closed = state.broker.disconnect(&session_id);
    info!(session_id = %session_id, closed = closed, "Disconnect requested");

    Json(DisconnectResponse {
        status: "disconnected".to_string(),
        message: if closed {
            "Session tunnel closed".to_string()
        } else {
            "No active tunnel for session".to_string()
        },
    })
}

/// Operational view over pooled connections
#[utoipa::path(
    get,
    path = "/api/v1/pam/sessions/connections/health",
    responses(
        (status = 200, description = "Connection pool snapshot", body = ConnectionsHealthResponse)
    ),
    tag = "pam-sessions"
)]
pub async fn connections_health(
    State(state): State<Arc<AppState>>,
) -> Json<ConnectionsHealthResponse> {
    let health = state.broker.health().await;

    let connection_pool_info: Vec<ConnectionPoolEntry> = health
        .pooled_connections
        .into_iter()
        .map(|entry| ConnectionPoolEntry {
            session_id: entry.session_id,
            resource_type: entry.resource_type.as_str().to_string(),
            created_at: entry.created_at,
            last_used: entry.last_used,
        })
        .collect();

    Json(ConnectionsHealthResponse {
        status: "healthy".to_string(),
        active_connections: connection_pool_info.len(),
        connection_pool_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_length_validation() {
        assert!(validate_sql("SELECT 1").is_ok());
        assert!(validate_sql("").is_err());
        assert!(validate_sql(&"x".repeat(MAX_SQL_LENGTH)).is_ok());
        assert!(validate_sql(&"x".repeat(MAX_SQL_LENGTH + 1)).is_err());
    }
}
