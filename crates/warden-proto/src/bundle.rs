//! Gateway connection bundle
//!
//! The gateway service returns certificate material in a nested shape; the
//! tunnel builder consumes a flat projection of it. The projection is pure:
//! missing nested fields stay absent, nothing is substituted.

use serde::{Deserialize, Serialize};

/// Certificate material for the relay leg, as returned by the gateway service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCertificates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_certificate_chain: Option<String>,
}

/// Certificate material for the gateway leg, as returned by the gateway service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCertificates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_certificate_chain: Option<String>,
}

/// Nested response of the gateway service's connection-details call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PamConnectionDetails {
    /// `host` or `host:port`; the default relay port applies when no port is
    /// present
    pub relay_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayCertificates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayCertificates>,
}

/// Flat certificate bundle consumed by the tunnel builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConnectionBundle {
    pub relay_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_client_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_client_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_server_certificate_chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_client_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_client_private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_server_certificate_chain: Option<String>,
    pub session_id: String,
}

impl GatewayConnectionBundle {
    /// Flatten the nested service response into the bundle shape.
    pub fn from_details(details: PamConnectionDetails, session_id: impl Into<String>) -> Self {
        let relay = details.relay;
        let gateway = details.gateway;
        Self {
            relay_host: details.relay_host,
            relay_client_certificate: relay.as_ref().and_then(|r| r.client_certificate.clone()),
            relay_client_private_key: relay.as_ref().and_then(|r| r.client_private_key.clone()),
            relay_server_certificate_chain: relay
                .as_ref()
                .and_then(|r| r.server_certificate_chain.clone()),
            gateway_client_certificate: gateway
                .as_ref()
                .and_then(|g| g.client_certificate.clone()),
            gateway_client_private_key: gateway
                .as_ref()
                .and_then(|g| g.client_private_key.clone()),
            gateway_server_certificate_chain: gateway
                .as_ref()
                .and_then(|g| g.server_certificate_chain.clone()),
            session_id: session_id.into(),
        }
    }
}
