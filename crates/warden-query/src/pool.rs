//! Direct connection pool
//!
//! Used where the database is reachable without a tunnel. One live driver
//! connection per session, refreshed on every touch; a background sweeper
//! evicts entries idle past the limit, and health probes evict on failure.
//! `destroy` cancels the sweeper and settles every close before returning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_postgres::config::SslMode;
use tokio_postgres_rustls::MakeRustlsConnect;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::tls::postgres_client_config;
use warden_proto::{DbCredentials, ResourceKind};

pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handle to one pooled driver connection
#[derive(Clone, Debug)]
pub enum DirectConnection {
    Postgres(Arc<tokio_postgres::Client>),
    /// `None` once the connection has been handed to `disconnect`
    MySql(Arc<Mutex<Option<Conn>>>),
}

impl DirectConnection {
    /// Same underlying connection object?
    pub fn same_as(&self, other: &DirectConnection) -> bool {
        match (self, other) {
            (DirectConnection::Postgres(a), DirectConnection::Postgres(b)) => Arc::ptr_eq(a, b),
            (DirectConnection::MySql(a), DirectConnection::MySql(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

struct PoolEntry {
    connection: DirectConnection,
    kind: ResourceKind,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    /// Postgres connection driver task; aborted on close
    driver_task: Option<JoinHandle<()>>,
}

/// Snapshot row exposed by the health endpoint (no credentials)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledConnectionInfo {
    pub session_id: String,
    pub resource_type: ResourceKind,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Process-wide pool of session-sticky direct connections
pub struct DirectConnectionPool {
    entries: Arc<Mutex<HashMap<String, PoolEntry>>>,
    max_idle: Duration,
    sweeper_cancel: CancellationToken,
    sweeper_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DirectConnectionPool {
    /// Create the pool and start its sweeper. Must run inside a runtime.
    pub fn new(max_idle: Duration, health_check_interval: Duration) -> Self {
        let entries = Arc::new(Mutex::new(HashMap::new()));
        let sweeper_cancel = CancellationToken::new();
        let sweeper_task = spawn_sweeper(
            Arc::clone(&entries),
            sweeper_cancel.clone(),
            max_idle,
            health_check_interval,
        );

        Self {
            entries,
            max_idle,
            sweeper_cancel,
            sweeper_task: std::sync::Mutex::new(Some(sweeper_task)),
        }
    }

    /// Return the session's connection, opening one if none exists.
    pub async fn create(
        &self,
        session_id: &str,
        credentials: &DbCredentials,
        kind: ResourceKind,
    ) -> Result<DirectConnection, QueryError> {
        if let Some(existing) = self.touch(session_id).await {
            return Ok(existing);
        }

        // Connect outside the map lock.
        let (connection, driver_task) = open_connection(credentials, kind).await?;

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(session_id) {
            // Another task raced us here; keep its connection.
            entry.last_used = Utc::now();
            let existing = entry.connection.clone();
            drop(entries);
            close_connection(connection, driver_task).await;
            return Ok(existing);
        }

        let now = Utc::now();
        entries.insert(
            session_id.to_string(),
            PoolEntry {
                connection: connection.clone(),
                kind,
                created_at: now,
                last_used: now,
                driver_task,
            },
        );
        info!(session_id = %session_id, kind = %kind.as_str(), "Opened pooled connection");
        Ok(connection)
    }

    /// Fetch the session's connection, refreshing its idle clock.
    pub async fn get(&self, session_id: &str) -> Result<DirectConnection, QueryError> {
        self.touch(session_id)
            .await
            .ok_or(QueryError::NoPooledConnection)
    }

    /// Mark the session's connection as used. Connections are
    /// session-sticky, so nothing is actually returned to a free list.
    pub async fn release(&self, session_id: &str) {
        let _ = self.touch(session_id).await;
    }

    async fn touch(&self, session_id: &str) -> Option<DirectConnection> {
        let mut entries = self.entries.lock().await;
        entries.get_mut(session_id).map(|entry| {
            entry.last_used = Utc::now();
            entry.connection.clone()
        })
    }

    /// End the driver connection and drop the entry. The entry is removed
    /// even when ending the driver fails.
    pub async fn close(&self, session_id: &str) -> bool {
        let removed = self.entries.lock().await.remove(session_id);
        match removed {
            Some(entry) => {
                close_connection(entry.connection, entry.driver_task).await;
                info!(session_id = %session_id, "Closed pooled connection");
                true
            }
            None => false,
        }
    }

    /// Probe the session's connection with `SELECT 1`.
    ///
    /// Probe failures are not surfaced: the entry is evicted and the probe
    /// reports `false`.
    pub async fn health_check(&self, session_id: &str) -> bool {
        let connection = {
            let entries = self.entries.lock().await;
            match entries.get(session_id) {
                Some(entry) => entry.connection.clone(),
                None => return false,
            }
        };

        let healthy = match &connection {
            DirectConnection::Postgres(client) => client.simple_query("SELECT 1").await.is_ok(),
            DirectConnection::MySql(slot) => {
                let mut guard = slot.lock().await;
                match guard.as_mut() {
                    Some(conn) => {
                        use mysql_async::prelude::Queryable;
                        conn.query_drop("SELECT 1").await.is_ok()
                    }
                    None => false,
                }
            }
        };

        if !healthy {
            warn!(session_id = %session_id, "Health check failed, evicting connection");
            self.close(session_id).await;
        }
        healthy
    }

    /// Close every entry concurrently; all closes settle before returning.
    pub async fn close_all(&self) {
        let drained: Vec<(String, PoolEntry)> = {
            let mut entries = self.entries.lock().await;
            entries.drain().collect()
        };
        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        futures::future::join_all(drained.into_iter().map(|(_, entry)| async move {
            close_connection(entry.connection, entry.driver_task).await;
        }))
        .await;
        info!(count = count, "Closed all pooled connections");
    }

    /// Cancel the sweeper, then close everything. Safe to call repeatedly.
    pub async fn destroy(&self) {
        self.sweeper_cancel.cancel();
        let task = self.sweeper_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.close_all().await;
    }

    /// Snapshot of all entries, without credentials.
    pub async fn info(&self) -> Vec<PooledConnectionInfo> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(session_id, entry)| PooledConnectionInfo {
                session_id: session_id.clone(),
                resource_type: entry.kind,
                created_at: entry.created_at,
                last_used: entry.last_used,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }
}

impl Default for DirectConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE, DEFAULT_HEALTH_CHECK_INTERVAL)
    }
}

fn spawn_sweeper(
    entries: Arc<Mutex<HashMap<String, PoolEntry>>>,
    cancel: CancellationToken,
    max_idle: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Utc::now();
            let expired: Vec<(String, PoolEntry)> = {
                let mut map = entries.lock().await;
                let idle: Vec<String> = map
                    .iter()
                    .filter(|(_, entry)| is_idle_expired(entry.last_used, now, max_idle))
                    .map(|(id, _)| id.clone())
                    .collect();
                idle.into_iter()
                    .filter_map(|id| map.remove(&id).map(|entry| (id, entry)))
                    .collect()
            };

            for (session_id, entry) in expired {
                info!(session_id = %session_id, "Evicting idle pooled connection");
                close_connection(entry.connection, entry.driver_task).await;
            }
        }
    })
}

pub(crate) fn is_idle_expired(
    last_used: DateTime<Utc>,
    now: DateTime<Utc>,
    max_idle: Duration,
) -> bool {
    let max_idle =
        chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
    now.signed_duration_since(last_used) > max_idle
}

async fn open_connection(
    credentials: &DbCredentials,
    kind: ResourceKind,
) -> Result<(DirectConnection, Option<JoinHandle<()>>), QueryError> {
    match kind {
        ResourceKind::Postgres => {
            let mut config = tokio_postgres::Config::new();
            config
                .host(&credentials.host)
                .port(credentials.port)
                .dbname(&credentials.database)
                .user(&credentials.username)
                .password(&credentials.password)
                .connect_timeout(CONNECT_TIMEOUT);

            if credentials.ssl_enabled {
                config.ssl_mode(SslMode::Require);
                let tls = MakeRustlsConnect::new(postgres_client_config(credentials)?);
                let (client, connection) = config
                    .connect(tls)
                    .await
                    .map_err(|e| QueryError::Connect(e.to_string()))?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(error = %e, "Postgres connection task ended");
                    }
                });
                Ok((DirectConnection::Postgres(Arc::new(client)), Some(task)))
            } else {
                config.ssl_mode(SslMode::Disable);
                let (client, connection) = config
                    .connect(tokio_postgres::NoTls)
                    .await
                    .map_err(|e| QueryError::Connect(e.to_string()))?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(error = %e, "Postgres connection task ended");
                    }
                });
                Ok((DirectConnection::Postgres(Arc::new(client)), Some(task)))
            }
        }
        ResourceKind::Mysql => {
            let mut opts = OptsBuilder::default()
                .ip_or_hostname(credentials.host.clone())
                .tcp_port(credentials.port)
                .user(Some(credentials.username.clone()))
                .pass(Some(credentials.password.clone()))
                .db_name(Some(credentials.database.clone()))
                .prefer_socket(false);

            if credentials.ssl_enabled {
                let mut ssl = SslOpts::default();
                if let Some(pem) = credentials.ssl_certificate.as_ref() {
                    ssl = ssl.with_root_certs(vec![pem.clone().into_bytes().into()]);
                }
                if !credentials.ssl_reject_unauthorized {
                    ssl = ssl
                        .with_danger_accept_invalid_certs(true)
                        .with_danger_skip_domain_validation(true);
                }
                opts = opts.ssl_opts(ssl);
            }

            let conn = timeout(CONNECT_TIMEOUT, Conn::new(Opts::from(opts)))
                .await
                .map_err(|_| QueryError::ConnectTimeout)?
                .map_err(|e| QueryError::Connect(e.to_string()))?;
            Ok((
                DirectConnection::MySql(Arc::new(Mutex::new(Some(conn)))),
                None,
            ))
        }
    }
}

async fn close_connection(connection: DirectConnection, driver_task: Option<JoinHandle<()>>) {
    match connection {
        DirectConnection::Postgres(client) => {
            // Dropping the (last) client handle closes the connection; the
            // abort covers handles still held by callers.
            drop(client);
            if let Some(task) = driver_task {
                task.abort();
            }
        }
        DirectConnection::MySql(slot) => {
            let conn = slot.lock().await.take();
            if let Some(conn) = conn {
                if let Err(e) = conn.disconnect().await {
                    debug!(error = %e, "MySQL disconnect failed");
                }
            }
        }
    }
}
