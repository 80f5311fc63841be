//! Single-statement execution against the loopback bridge

use serde_json::Value;

use crate::error::QueryError;
use crate::{mysql, postgres};
use warden_proto::{DbCredentials, QueryResult, ResourceKind};

/// Run one statement through the bridge on `127.0.0.1:local_port`.
///
/// The driver connects with the session's database credentials but without
/// TLS: encryption is already provided by the tunnel the bridge fronts.
/// Parameters are forwarded to the driver's parameterized-query facility.
pub async fn execute_query(
    kind: ResourceKind,
    credentials: &DbCredentials,
    local_port: u16,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult, QueryError> {
    match kind {
        ResourceKind::Postgres => postgres::execute(credentials, local_port, sql, params).await,
        ResourceKind::Mysql => mysql::execute(credentials, local_port, sql, params).await,
    }
}
