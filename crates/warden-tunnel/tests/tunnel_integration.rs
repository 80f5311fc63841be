//! End-to-end tunnel tests against an in-process relay/gateway loopback
//!
//! The fake relay terminates the outer mTLS leg, then acts as the gateway by
//! running a second TLS accept over the outer stream (ALPN
//! `infisical-pam-proxy`, client certificates required) and echoing whatever
//! arrives. This exercises both handshakes, ALPN negotiation and the
//! loopback bridge without a real database.

use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, DnType, Ia5String, IsCa, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use warden_proto::GatewayConnectionBundle;
use warden_tunnel::{LocalBridge, TunnelBuilder, TunnelError};

struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
    pem: String,
    der: CertificateDer<'static>,
}

fn make_ca(name: &str) -> TestCa {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, name);
    let cert = params.self_signed(&key).unwrap();
    let pem = cert.pem();
    let der = cert.der().clone();
    TestCa {
        cert,
        key,
        pem,
        der,
    }
}

struct TestLeaf {
    cert_pem: String,
    key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: PrivateKeyDer<'static>,
}

fn make_leaf(ca: &TestCa, name: &str, localhost_san: bool) -> TestLeaf {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, name);
    if localhost_san {
        params.subject_alt_names = vec![
            SanType::DnsName(Ia5String::try_from("localhost").unwrap()),
            SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))),
        ];
    }
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    TestLeaf {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        cert_der: CertificateDer::from(cert.der().to_vec()),
        key_der: PrivateKeyDer::try_from(key.serialize_der()).unwrap(),
    }
}

fn mtls_server_config(
    server: &TestLeaf,
    client_ca: &TestCa,
    alpn: Option<&str>,
) -> Arc<ServerConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(client_ca.der.clone()).unwrap();
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build().unwrap();

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![server.cert_der.clone()], server.key_der.clone_key())
        .unwrap();
    if let Some(proto) = alpn {
        config.alpn_protocols = vec![proto.as_bytes().to_vec()];
    }
    Arc::new(config)
}

struct FakeRelay {
    port: u16,
}

/// Accept one connection: outer TLS, then gateway TLS over it, then echo.
async fn spawn_relay(relay_cfg: Arc<ServerConfig>, gateway_cfg: Arc<ServerConfig>) -> FakeRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let relay_acceptor = TlsAcceptor::from(relay_cfg);
        let gateway_acceptor = TlsAcceptor::from(gateway_cfg);
        loop {
            let (tcp, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let relay_acceptor = relay_acceptor.clone();
            let gateway_acceptor = gateway_acceptor.clone();
            tokio::spawn(async move {
                let outer = match relay_acceptor.accept(tcp).await {
                    Ok(stream) => stream,
                    Err(_) => return,
                };
                let mut inner = match gateway_acceptor.accept(outer).await {
                    Ok(stream) => stream,
                    Err(_) => return,
                };
                let mut buf = [0u8; 4096];
                loop {
                    match inner.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if inner.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = inner.shutdown().await;
            });
        }
    });

    FakeRelay { port }
}

struct Pki {
    relay_ca: TestCa,
    gateway_ca: TestCa,
    relay_server: TestLeaf,
    relay_client: TestLeaf,
    gateway_server: TestLeaf,
    gateway_client: TestLeaf,
}

fn make_pki() -> Pki {
    let relay_ca = make_ca("test relay ca");
    let gateway_ca = make_ca("test gateway ca");
    let relay_server = make_leaf(&relay_ca, "relay", true);
    let relay_client = make_leaf(&relay_ca, "broker", false);
    let gateway_server = make_leaf(&gateway_ca, "gateway", true);
    let gateway_client = make_leaf(&gateway_ca, "broker", false);
    Pki {
        relay_ca,
        gateway_ca,
        relay_server,
        relay_client,
        gateway_server,
        gateway_client,
    }
}

fn bundle_for(pki: &Pki, port: u16, session_id: &str) -> GatewayConnectionBundle {
    GatewayConnectionBundle {
        relay_host: format!("localhost:{port}"),
        relay_client_certificate: Some(pki.relay_client.cert_pem.clone()),
        relay_client_private_key: Some(pki.relay_client.key_pem.clone()),
        relay_server_certificate_chain: Some(pki.relay_ca.pem.clone()),
        gateway_client_certificate: Some(pki.gateway_client.cert_pem.clone()),
        gateway_client_private_key: Some(pki.gateway_client.key_pem.clone()),
        gateway_server_certificate_chain: Some(pki.gateway_ca.pem.clone()),
        session_id: session_id.to_string(),
    }
}

fn install_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[tokio::test]
async fn test_tunnel_and_bridge_round_trip() {
    install_provider();
    let pki = make_pki();
    let relay = spawn_relay(
        mtls_server_config(&pki.relay_server, &pki.relay_ca, None),
        mtls_server_config(&pki.gateway_server, &pki.gateway_ca, Some("infisical-pam-proxy")),
    )
    .await;

    let bundle = bundle_for(&pki, relay.port, "sess-1");
    let tunnel = TunnelBuilder::new().build(&bundle).await.unwrap();
    assert!(tunnel.handle.is_active());
    assert_eq!(tunnel.handle.session_id(), "sess-1");

    let cancel = tunnel.handle.cancellation();
    let bridge = LocalBridge::start(tunnel.stream, cancel).await.unwrap();

    let mut driver = TcpStream::connect(("127.0.0.1", bridge.local_port()))
        .await
        .unwrap();
    driver.write_all(b"startup-packet").await.unwrap();
    let mut echoed = [0u8; 14];
    driver.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"startup-packet");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_registry_teardown_closes_bridge() {
    install_provider();
    let pki = make_pki();
    let relay = spawn_relay(
        mtls_server_config(&pki.relay_server, &pki.relay_ca, None),
        mtls_server_config(&pki.gateway_server, &pki.gateway_ca, Some("infisical-pam-proxy")),
    )
    .await;

    let bundle = bundle_for(&pki, relay.port, "sess-2");
    let tunnel = TunnelBuilder::new().build(&bundle).await.unwrap();

    let registry = warden_tunnel::TunnelRegistry::new();
    registry.register(tunnel.handle.clone());

    let bridge = LocalBridge::start(tunnel.stream, tunnel.handle.cancellation())
        .await
        .unwrap();
    let mut driver = TcpStream::connect(("127.0.0.1", bridge.local_port()))
        .await
        .unwrap();
    driver.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    driver.read_exact(&mut buf).await.unwrap();

    assert!(registry.close_one("sess-2"));

    // The spliced socket observes EOF once teardown propagates.
    let n = driver.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
    assert_eq!(registry.count(), 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_missing_gateway_material_after_relay_leg() {
    install_provider();
    let pki = make_pki();
    let relay = spawn_relay(
        mtls_server_config(&pki.relay_server, &pki.relay_ca, None),
        mtls_server_config(&pki.gateway_server, &pki.gateway_ca, Some("infisical-pam-proxy")),
    )
    .await;

    let mut bundle = bundle_for(&pki, relay.port, "sess-3");
    bundle.gateway_client_private_key = None;

    let err = TunnelBuilder::new().build(&bundle).await.unwrap_err();
    assert_eq!(err.to_string(), "Missing gateway TLS certificates or keys");
}

#[tokio::test]
async fn test_untrusted_relay_is_authorization_failure() {
    install_provider();
    let pki = make_pki();
    let relay = spawn_relay(
        mtls_server_config(&pki.relay_server, &pki.relay_ca, None),
        mtls_server_config(&pki.gateway_server, &pki.gateway_ca, Some("infisical-pam-proxy")),
    )
    .await;

    // Trust a CA the relay's certificate does not chain to.
    let other_ca = make_ca("unrelated ca");
    let mut bundle = bundle_for(&pki, relay.port, "sess-4");
    bundle.relay_server_certificate_chain = Some(other_ca.pem.clone());

    let err = TunnelBuilder::new().build(&bundle).await.unwrap_err();
    assert!(
        matches!(err, TunnelError::RelayAuthorization(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_gateway_without_alpn_is_rejected() {
    install_provider();
    let pki = make_pki();
    let relay = spawn_relay(
        mtls_server_config(&pki.relay_server, &pki.relay_ca, None),
        // Gateway acceptor that never negotiates a protocol
        mtls_server_config(&pki.gateway_server, &pki.gateway_ca, None),
    )
    .await;

    let bundle = bundle_for(&pki, relay.port, "sess-5");
    let err = TunnelBuilder::new().build(&bundle).await.unwrap_err();
    assert!(
        err.to_string().contains("no ALPN protocol negotiated"),
        "unexpected error: {err}"
    );
}
