//! Broker-level errors

use thiserror::Error;

use warden_access::AccessError;

/// Errors surfaced by the broker to HTTP callers
///
/// Resolution failures keep their kind; tunnel and driver failures are
/// wrapped into `BadRequest` at the pipeline boundary so responses stay
/// uniform.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("{0}")]
    NotFound(String),

    #[error("Session has ended")]
    SessionEnded,

    #[error("Session has expired")]
    SessionExpired,

    #[error("{0}")]
    GatewayUnavailable(String),

    #[error("{0}")]
    BadRequest(String),
}

impl From<AccessError> for BrokerError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(message) => BrokerError::NotFound(message),
            AccessError::SessionEnded => BrokerError::SessionEnded,
            AccessError::SessionExpired => BrokerError::SessionExpired,
            AccessError::GatewayUnavailable(message) => BrokerError::GatewayUnavailable(message),
            AccessError::Upstream(message) => BrokerError::BadRequest(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_errors_pass_through_unwrapped() {
        let err: BrokerError = AccessError::SessionEnded.into();
        assert!(matches!(err, BrokerError::SessionEnded));

        let err: BrokerError = AccessError::NotFound("Session not found".to_string()).into();
        assert_eq!(err.to_string(), "Session not found");
    }
}
