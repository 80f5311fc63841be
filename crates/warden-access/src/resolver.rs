//! Credential & gateway resolver
//!
//! Pure orchestration over the collaborator contracts: validate the session,
//! walk session → account → resource, fetch decrypted credentials, then ask
//! the gateway service for the relay/gateway certificate bundle.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::AccessError;
use crate::stores::{
    AccountStore, CredentialVault, GatewayService, PamConnectionRequest, ResourceStore,
    SessionStore,
};
use warden_proto::{
    Actor, DbCredentials, GatewayConnectionBundle, Resource, Session, SessionStatus,
    DEFAULT_RELAY_PORT,
};

/// Host presented to the gateway service for PAM tunnel requests
const GATEWAY_REQUEST_HOST: &str = "localhost";

/// Everything the tunnel builder and query executor need for one query
#[derive(Debug, Clone)]
pub struct ResolvedQueryContext {
    pub session: Session,
    pub resource: Resource,
    pub credentials: DbCredentials,
    pub bundle: GatewayConnectionBundle,
}

/// Resolves sessions to credentials and gateway connection bundles
pub struct Resolver {
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountStore>,
    resources: Arc<dyn ResourceStore>,
    vault: Arc<dyn CredentialVault>,
    gateway: Arc<dyn GatewayService>,
}

impl Resolver {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
        resources: Arc<dyn ResourceStore>,
        vault: Arc<dyn CredentialVault>,
        gateway: Arc<dyn GatewayService>,
    ) -> Self {
        Self {
            sessions,
            accounts,
            resources,
            vault,
            gateway,
        }
    }

    /// Fetch a session and check it is usable right now.
    ///
    /// A session is usable iff its status is not `Ended` and its expiry, if
    /// any, lies strictly in the future.
    pub async fn validate_session(&self, session_id: &str) -> Result<Session, AccessError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AccessError::NotFound("Session not found".to_string()))?;

        if session.status == SessionStatus::Ended {
            return Err(AccessError::SessionEnded);
        }
        if session.is_expired(Utc::now()) {
            return Err(AccessError::SessionExpired);
        }

        Ok(session)
    }

    /// Validate the session and fetch its decrypted credentials.
    ///
    /// Used by the connect handshake, which affirms usability without
    /// touching the gateway service.
    pub async fn resolve_for_connect(
        &self,
        session_id: &str,
        actor: &Actor,
    ) -> Result<(Session, DbCredentials), AccessError> {
        let session = self.validate_session(session_id).await?;
        let creds = self.vault.session_credentials(session_id, actor).await?;
        Ok((session, creds.credentials))
    }

    /// Resolve everything required to tunnel and execute one query.
    pub async fn resolve_for_query(
        &self,
        session_id: &str,
        actor: &Actor,
    ) -> Result<ResolvedQueryContext, AccessError> {
        let session = self.validate_session(session_id).await?;

        let account = self
            .accounts
            .find_by_id(&session.account_id)
            .await?
            .ok_or_else(|| AccessError::NotFound("Account not found".to_string()))?;

        let resource = self
            .resources
            .find_by_id(&account.resource_id)
            .await?
            .ok_or_else(|| AccessError::NotFound("Resource not found".to_string()))?;

        let gateway_id = resource.gateway_id.clone().ok_or_else(|| {
            AccessError::GatewayUnavailable(
                "Resource does not have a gateway configured".to_string(),
            )
        })?;

        let creds = self.vault.session_credentials(session_id, actor).await?;

        let details = self
            .gateway
            .pam_connection_details(PamConnectionRequest {
                session_id: session_id.to_string(),
                gateway_id,
                resource_type: resource.kind,
                host: GATEWAY_REQUEST_HOST.to_string(),
                port: DEFAULT_RELAY_PORT,
                actor_metadata: Actor::system_gateway(),
            })
            .await?
            .ok_or_else(|| {
                AccessError::GatewayUnavailable(
                    "Failed to get gateway connection details".to_string(),
                )
            })?;

        debug!(
            session_id = %session_id,
            resource_id = %resource.id,
            relay_host = %details.relay_host,
            "Resolved gateway connection details"
        );

        Ok(ResolvedQueryContext {
            session,
            resource,
            credentials: creds.credentials,
            bundle: GatewayConnectionBundle::from_details(details, session_id),
        })
    }
}
