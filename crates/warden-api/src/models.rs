//! HTTP request/response shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Generic error body with a stable machine-readable code
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Response of the connect handshake
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Body of the query endpoint
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequestBody {
    /// Statement to execute, 1..=100000 characters
    pub sql: String,
    /// Positional parameters forwarded to the driver
    #[serde(default)]
    pub params: Option<Vec<Value>>,
}

/// One result column
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryFieldDto {
    pub name: String,
    pub data_type: String,
}

/// Response of the query endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<QueryFieldDto>>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: u64,
    pub execution_time_ms: u64,
}

/// Response of the disconnect endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
    pub status: String,
    pub message: String,
}

/// One pooled direct connection, without credentials
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoolEntry {
    pub session_id: String,
    pub resource_type: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Response of the connections health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsHealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub connection_pool_info: Vec<ConnectionPoolEntry>,
}
