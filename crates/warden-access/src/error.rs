//! Resolution errors

use thiserror::Error;

/// Errors surfaced while validating a session and resolving its material
///
/// These pass through the pipeline boundary unwrapped so HTTP callers can
/// distinguish a missing session from an unusable one.
#[derive(Debug, Clone, Error)]
pub enum AccessError {
    /// Session, account or resource record is missing
    #[error("{0}")]
    NotFound(String),

    #[error("Session has ended")]
    SessionEnded,

    #[error("Session has expired")]
    SessionExpired,

    /// Resource has no gateway, or the gateway service returned nothing
    #[error("{0}")]
    GatewayUnavailable(String),

    /// A collaborator call failed (vault, store or gateway-service transport)
    #[error("{0}")]
    Upstream(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            AccessError::NotFound("Session not found".to_string()).to_string(),
            "Session not found"
        );
        assert_eq!(AccessError::SessionEnded.to_string(), "Session has ended");
        assert_eq!(
            AccessError::SessionExpired.to_string(),
            "Session has expired"
        );
    }
}
