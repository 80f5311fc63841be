//! Two-leg TLS tunnel builder
//!
//! The outer leg dials the relay with full WebPKI verification against the
//! relay server chain from the bundle and presents the relay client
//! certificate. The inner leg then runs a second client handshake *over the
//! outer stream*: the gateway is identified by mTLS plus the
//! `infisical-pam-proxy` ALPN rather than by hostname, so its verifier
//! accepts any server certificate while the gateway's own verifier decides
//! whether our client certificate may pass.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::TunnelError;
use crate::registry::TunnelHandle;
use warden_proto::{GatewayConnectionBundle, DEFAULT_RELAY_PORT, PAM_PROXY_ALPN};

/// Upper bound for each TLS handshake (and the relay TCP connect)
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The gateway tunnel as seen by the bridge: TLS nested inside TLS over TCP
pub type TunnelStream = TlsStream<TlsStream<TcpStream>>;

/// A freshly built tunnel: the nested stream plus its registry handle
#[derive(Debug)]
pub struct EstablishedTunnel {
    pub stream: TunnelStream,
    pub handle: TunnelHandle,
}

/// Builds relay→gateway tunnels from gateway connection bundles
#[derive(Debug, Clone)]
pub struct TunnelBuilder {
    handshake_timeout: Duration,
}

impl Default for TunnelBuilder {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl TunnelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish both tunnel legs for the bundle's session.
    ///
    /// On any failure every stream opened so far is dropped (and thereby
    /// closed) before the error propagates.
    pub async fn build(
        &self,
        bundle: &GatewayConnectionBundle,
    ) -> Result<EstablishedTunnel, TunnelError> {
        ensure_crypto_provider();

        let (host, port) = parse_relay_host(&bundle.relay_host)?;

        let outer = self.connect_relay(bundle, &host, port).await?;
        debug!(
            session_id = %bundle.session_id,
            relay = %format!("{host}:{port}"),
            "Relay TLS leg established"
        );

        let inner = self.connect_gateway(bundle, outer).await?;
        debug!(session_id = %bundle.session_id, "Gateway TLS leg established");

        Ok(EstablishedTunnel {
            stream: inner,
            handle: TunnelHandle::new(bundle.session_id.clone()),
        })
    }

    async fn connect_relay(
        &self,
        bundle: &GatewayConnectionBundle,
        host: &str,
        port: u16,
    ) -> Result<TlsStream<TcpStream>, TunnelError> {
        let (cert, key, chain) = match (
            bundle.relay_client_certificate.as_deref(),
            bundle.relay_client_private_key.as_deref(),
            bundle.relay_server_certificate_chain.as_deref(),
        ) {
            (Some(cert), Some(key), Some(chain)) => (cert, key, chain),
            _ => return Err(TunnelError::MissingRelayMaterial),
        };

        let config = rustls::ClientConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS12,
            &rustls::version::TLS13,
        ])
        .with_root_certificates(root_store(chain)?)
        .with_client_auth_cert(parse_cert_chain(cert)?, parse_private_key(key)?)
        .map_err(|e| TunnelError::InvalidMaterial(e.to_string()))?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TunnelError::RelayConnection(format!("invalid relay host name: {e}")))?;

        let tcp = timeout(self.handshake_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TunnelError::RelayConnection("connection timed out".to_string()))?
            .map_err(|e| TunnelError::RelayConnection(e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        let connector = TlsConnector::from(Arc::new(config));
        timeout(self.handshake_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TunnelError::RelayConnection("handshake timed out".to_string()))?
            .map_err(classify_relay_error)
    }

    async fn connect_gateway(
        &self,
        bundle: &GatewayConnectionBundle,
        outer: TlsStream<TcpStream>,
    ) -> Result<TunnelStream, TunnelError> {
        // The relay leg is already up at this point; returning here drops
        // (and closes) the outer stream.
        let (cert, key, _chain) = match (
            bundle.gateway_client_certificate.as_deref(),
            bundle.gateway_client_private_key.as_deref(),
            bundle.gateway_server_certificate_chain.as_deref(),
        ) {
            (Some(cert), Some(key), Some(chain)) => (cert, key, chain),
            _ => return Err(TunnelError::MissingGatewayMaterial),
        };

        let mut config = rustls::ClientConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS12,
            &rustls::version::TLS13,
        ])
        .dangerous()
        .with_custom_certificate_verifier(GatewayPeerVerifier::new())
        .with_client_auth_cert(parse_cert_chain(cert)?, parse_private_key(key)?)
        .map_err(|e| TunnelError::InvalidMaterial(e.to_string()))?;
        config.alpn_protocols = vec![PAM_PROXY_ALPN.as_bytes().to_vec()];

        let server_name =
            ServerName::try_from("localhost").map_err(|e| TunnelError::GatewayHandshake(e.to_string()))?;

        let connector = TlsConnector::from(Arc::new(config));
        let stream = timeout(self.handshake_timeout, connector.connect(server_name, outer))
            .await
            .map_err(|_| TunnelError::GatewayHandshake("handshake timed out".to_string()))?
            .map_err(|e| TunnelError::GatewayHandshake(e.to_string()))?;

        // The gateway multiplexes protocols on ALPN; a handshake that
        // negotiated nothing did not reach a PAM gateway.
        let (_, connection) = stream.get_ref();
        if connection.alpn_protocol().is_none() {
            return Err(TunnelError::GatewayHandshake(
                "no ALPN protocol negotiated".to_string(),
            ));
        }

        Ok(stream)
    }
}

/// Split `relayHost` into host and port, defaulting the port when absent.
pub(crate) fn parse_relay_host(relay_host: &str) -> Result<(String, u16), TunnelError> {
    match relay_host.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                TunnelError::RelayConnection(format!("invalid relay port in '{relay_host}'"))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((relay_host.to_string(), DEFAULT_RELAY_PORT)),
    }
}

fn parse_cert_chain(pem: &str) -> Result<Vec<CertificateDer<'static>>, TunnelError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TunnelError::InvalidMaterial(format!("bad certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(TunnelError::InvalidMaterial(
            "no certificates in PEM".to_string(),
        ));
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, TunnelError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| TunnelError::InvalidMaterial(format!("bad private key PEM: {e}")))?
        .ok_or_else(|| TunnelError::InvalidMaterial("no private key in PEM".to_string()))
}

fn root_store(pem: &str) -> Result<RootCertStore, TunnelError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_cert_chain(pem)? {
        roots
            .add(cert)
            .map_err(|e| TunnelError::InvalidMaterial(format!("bad trust anchor: {e}")))?;
    }
    Ok(roots)
}

/// Distinguish verification failures from transport failures on the relay leg.
fn classify_relay_error(err: std::io::Error) -> TunnelError {
    let is_authz = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map(|tls| {
            matches!(
                tls,
                rustls::Error::InvalidCertificate(_) | rustls::Error::AlertReceived(_)
            )
        })
        .unwrap_or(false);

    if is_authz {
        TunnelError::RelayAuthorization(err.to_string())
    } else {
        TunnelError::RelayConnection(err.to_string())
    }
}

// Install the ring provider once per process
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

/// Accepts any gateway server certificate.
///
/// The gateway leg terminates inside the customer network on a certificate
/// the broker cannot pin by hostname; authenticity comes from the client
/// certificate the gateway demands plus the ALPN check after the handshake.
#[derive(Debug)]
struct GatewayPeerVerifier;

impl GatewayPeerVerifier {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for GatewayPeerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
