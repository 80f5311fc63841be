//! TLS configuration for direct (non-tunneled) Postgres connections

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::error::QueryError;
use warden_proto::DbCredentials;

pub(crate) fn postgres_client_config(
    creds: &DbCredentials,
) -> Result<rustls::ClientConfig, QueryError> {
    ensure_crypto_provider();

    if !creds.ssl_reject_unauthorized {
        return Ok(rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(AcceptAnyServerCert::new())
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    match creds.ssl_certificate.as_deref() {
        Some(pem) => {
            for cert in parse_certs(pem)? {
                roots
                    .add(cert)
                    .map_err(|e| QueryError::Tls(format!("bad trust anchor: {e}")))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, QueryError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| QueryError::Tls(format!("bad certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(QueryError::Tls("no certificates in PEM".to_string()));
    }
    Ok(certs)
}

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

// Certificate verifier for `sslRejectUnauthorized = false` connections
#[derive(Debug)]
struct AcceptAnyServerCert;

impl AcceptAnyServerCert {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(reject: bool, cert: Option<&str>) -> DbCredentials {
        DbCredentials {
            host: "db.internal".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "svc".to_string(),
            password: "secret".to_string(),
            ssl_enabled: true,
            ssl_reject_unauthorized: reject,
            ssl_certificate: cert.map(str::to_string),
        }
    }

    #[test]
    fn test_insecure_config_builds() {
        assert!(postgres_client_config(&creds(false, None)).is_ok());
    }

    #[test]
    fn test_verified_config_uses_webpki_without_custom_chain() {
        assert!(postgres_client_config(&creds(true, None)).is_ok());
    }

    #[test]
    fn test_garbage_chain_is_rejected() {
        assert!(postgres_client_config(&creds(true, Some("not a pem"))).is_err());
    }
}
