//! TLS certificate expiry lookup.

use chrono::Utc;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::debug;

const SECONDS_PER_DAY: i64 = 86_400;

static VERIFYING_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::const_new();
static PERMISSIVE_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::const_new();

#[derive(Debug, thiserror::Error)]
pub(super) enum TlsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),

    #[error("invalid server name '{0}'")]
    InvalidName(String),

    #[error("peer sent no certificate")]
    NoCertificate,

    #[error("certificate parse error: {0}")]
    Parse(String),

    #[error("TLS handshake timed out")]
    Timeout,
}

/// Whole days between now and the certificate's expiry, rounded down
pub fn days_remaining(not_after_unix: i64, now_unix: i64) -> i64 {
    (not_after_unix - now_unix).div_euclid(SECONDS_PER_DAY)
}

/// Accepts any server certificate, for monitors with verification disabled.
/// Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

async fn client_config(verify: bool) -> Result<Arc<ClientConfig>, TlsError> {
    let cell = if verify {
        &VERIFYING_CONFIG
    } else {
        &PERMISSIVE_CONFIG
    };

    cell.get_or_try_init(|| async {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let config = if verify {
            let mut roots = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for err in &native.errors {
                debug!(error = %err, "Skipping unreadable native certificate");
            }
            roots.add_parsable_certificates(native.certs);
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
                .with_no_client_auth()
        };
        Ok::<_, TlsError>(Arc::new(config))
    })
    .await
    .cloned()
}

/// Open a TLS session to `host:port` and return the days until its
/// certificate expires
///
/// Gives up with [`TlsError::Timeout`] once `deadline` passes.
pub(super) async fn days_until_expiry(
    host: &str,
    port: u16,
    verify: bool,
    deadline: Instant,
) -> Result<i64, TlsError> {
    let config = client_config(verify).await?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TlsError::InvalidName(host.to_string()))?;
    let connector = TlsConnector::from(config);

    let handshake = async {
        let stream = TcpStream::connect((host, port)).await?;
        let tls = connector.connect(server_name, stream).await?;
        let (_, connection) = tls.get_ref();
        let certificate = connection
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or(TlsError::NoCertificate)?;
        let (_, parsed) = x509_parser::parse_x509_certificate(certificate.as_ref())
            .map_err(|e| TlsError::Parse(e.to_string()))?;
        Ok::<_, TlsError>(parsed.validity().not_after.timestamp())
    };

    let not_after = tokio::time::timeout_at(deadline, handshake)
        .await
        .map_err(|_| TlsError::Timeout)??;

    let days = days_remaining(not_after, Utc::now().timestamp());
    debug!(host, port, days, "TLS certificate expiry checked");
    Ok(days)
}
