//! Shared domain types for the PAM database broker
//!
//! This crate defines the records exchanged with the external session,
//! account and resource stores, the gateway connection bundle and its flat
//! projection, and the normalized query result returned to callers.

pub mod bundle;
pub mod records;
pub mod result;

pub use bundle::{GatewayCertificates, GatewayConnectionBundle, PamConnectionDetails, RelayCertificates};
pub use records::{
    Account, Actor, ActorType, DbCredentials, Resource, ResourceKind, Session, SessionStatus,
};
pub use result::{QueryField, QueryResult};

/// Default relay port when `relayHost` carries no explicit port
pub const DEFAULT_RELAY_PORT: u16 = 8443;

/// ALPN protocol identifier for the gateway leg of the tunnel
pub const PAM_PROXY_ALPN: &str = "infisical-pam-proxy";
