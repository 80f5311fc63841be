//! The broker pipeline

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::BrokerError;
use warden_access::{ResolvedQueryContext, Resolver};
use warden_proto::{Actor, QueryResult, Session};
use warden_query::{
    execute_query, DirectConnectionPool, PooledConnectionInfo, QueryError,
};
use warden_tunnel::{
    EstablishedTunnel, LocalBridge, TunnelBuilder, TunnelError, TunnelInfo, TunnelRegistry,
};

/// Fallback message when a pipeline failure carries no text of its own
const DEFAULT_PIPELINE_ERROR: &str = "Failed to execute query via gateway";

/// One query on behalf of a session
#[derive(Debug, Clone)]
pub struct ExecuteQueryRequest {
    pub session_id: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub actor: Actor,
}

/// Result of the connect handshake: the session is usable
#[derive(Debug, Clone)]
pub struct SessionHandshake {
    pub session: Session,
    pub database: String,
}

/// Read-only operational snapshot
#[derive(Debug, Clone)]
pub struct BrokerHealth {
    pub tunnels: Vec<TunnelInfo>,
    pub pooled_connections: Vec<PooledConnectionInfo>,
}

#[derive(Debug, Error)]
enum PipelineError {
    #[error("{0}")]
    Tunnel(#[from] TunnelError),
    #[error("{0}")]
    Driver(#[from] QueryError),
}

/// The query-execution core of the PAM broker
pub struct Broker {
    resolver: Resolver,
    tunnel_builder: TunnelBuilder,
    registry: TunnelRegistry,
    pool: Arc<DirectConnectionPool>,
}

impl Broker {
    pub fn new(resolver: Resolver, pool: Arc<DirectConnectionPool>) -> Self {
        Self {
            resolver,
            tunnel_builder: TunnelBuilder::new(),
            registry: TunnelRegistry::new(),
            pool,
        }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &DirectConnectionPool {
        &self.pool
    }

    /// Affirm the session is usable without opening a tunnel.
    pub async fn connect_check(
        &self,
        session_id: &str,
        actor: &Actor,
    ) -> Result<SessionHandshake, BrokerError> {
        let (session, credentials) = self
            .resolver
            .resolve_for_connect(session_id, actor)
            .await?;
        Ok(SessionHandshake {
            session,
            database: credentials.database,
        })
    }

    /// Run one statement through a fresh relay→gateway tunnel.
    ///
    /// Resolution errors pass through unwrapped; any failure after
    /// resolution tears down whatever was built and surfaces as
    /// `BadRequest` with the inner error's message.
    pub async fn execute_query(
        &self,
        request: ExecuteQueryRequest,
    ) -> Result<QueryResult, BrokerError> {
        let context = self
            .resolver
            .resolve_for_query(&request.session_id, &request.actor)
            .await?;

        match self.run_tunneled(&context, &request).await {
            Ok(result) => {
                debug!(
                    session_id = %request.session_id,
                    rows = result.row_count,
                    "Query completed through gateway tunnel"
                );
                Ok(result)
            }
            Err(err) => {
                let message = err.to_string();
                Err(BrokerError::BadRequest(if message.is_empty() {
                    DEFAULT_PIPELINE_ERROR.to_string()
                } else {
                    message
                }))
            }
        }
    }

    async fn run_tunneled(
        &self,
        context: &ResolvedQueryContext,
        request: &ExecuteQueryRequest,
    ) -> Result<QueryResult, PipelineError> {
        let EstablishedTunnel { stream, handle } = self.tunnel_builder.build(&context.bundle).await?;
        self.registry.register(handle.clone());

        let outcome = async {
            let bridge = LocalBridge::start(stream, handle.cancellation()).await?;
            let local_port = bridge.local_port();
            debug!(
                session_id = %request.session_id,
                local_port = local_port,
                "Bridge ready, executing statement"
            );

            let result = execute_query(
                context.resource.kind,
                &context.credentials,
                local_port,
                &request.sql,
                &request.params,
            )
            .await;

            bridge.shutdown().await;
            result.map_err(PipelineError::from)
        }
        .await;

        // Success or failure, the session leaves no tunnel state behind.
        self.registry.close_one(&request.session_id);
        outcome
    }

    /// Close the session's tunnel, if any.
    pub fn disconnect(&self, session_id: &str) -> bool {
        self.registry.close_one(session_id)
    }

    /// Operational snapshot over the registry and the direct pool.
    pub async fn health(&self) -> BrokerHealth {
        BrokerHealth {
            tunnels: self.registry.list(),
            pooled_connections: self.pool.info().await,
        }
    }

    /// Graceful teardown: every tunnel, then the pool and its sweeper.
    pub async fn shutdown(&self) {
        info!("Broker shutting down");
        self.registry.close_all();
        self.pool.destroy().await;
    }
}
