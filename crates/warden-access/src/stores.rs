//! Collaborator contracts
//!
//! The broker consumes persistence, the credential vault and the gateway
//! service through these traits; concrete implementations live in the host
//! process.

use async_trait::async_trait;

use crate::error::AccessError;
use warden_proto::{
    Account, Actor, DbCredentials, PamConnectionDetails, Resource, ResourceKind, Session,
};

/// Read access to session records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>, AccessError>;
}

/// Read access to account records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, account_id: &str) -> Result<Option<Account>, AccessError>;
}

/// Read access to resource records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_by_id(&self, resource_id: &str) -> Result<Option<Resource>, AccessError>;
}

/// Decrypted credentials for one session, as returned by the vault
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub credentials: DbCredentials,
    pub project_id: String,
    pub account: Account,
    pub session_started: bool,
}

/// The credential vault decrypts per-session database credentials
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn session_credentials(
        &self,
        session_id: &str,
        actor: &Actor,
    ) -> Result<SessionCredentials, AccessError>;
}

/// Request for gateway connection details
#[derive(Debug, Clone)]
pub struct PamConnectionRequest {
    pub session_id: String,
    pub gateway_id: String,
    pub resource_type: ResourceKind,
    pub host: String,
    pub port: u16,
    pub actor_metadata: Actor,
}

/// The gateway-v2 service hands out relay endpoints and certificate material
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayService: Send + Sync {
    async fn pam_connection_details(
        &self,
        request: PamConnectionRequest,
    ) -> Result<Option<PamConnectionDetails>, AccessError>;
}
