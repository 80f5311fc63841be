//! Tunnel errors

use thiserror::Error;

/// Errors raised while building or bridging a gateway tunnel
#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    #[error("Missing relay TLS certificates or keys")]
    MissingRelayMaterial,

    #[error("Missing gateway TLS certificates or keys")]
    MissingGatewayMaterial,

    /// The certificate or key material could not be parsed
    #[error("Invalid TLS material: {0}")]
    InvalidMaterial(String),

    #[error("Relay TLS connection error: {0}")]
    RelayConnection(String),

    #[error("Relay TLS authorization failed: {0}")]
    RelayAuthorization(String),

    #[error("Gateway TLS handshake failed: {0}")]
    GatewayHandshake(String),

    /// The loopback bridge could not be established
    #[error("Local bridge error: {0}")]
    Bridge(String),
}
