use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use std::fmt;
use std::sync::Arc;
use x509_parser::parse_x509_certificate;

/// The parts of a peer certificate worth putting next to a trace's TLS timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSummary {
    pub subject: String,
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
}

impl CertSummary {
    pub fn parse(der: &CertificateDer<'_>) -> Result<Self, anyhow::Error> {
        let (_, cert) = parse_x509_certificate(der.as_ref())
            .map_err(|e| anyhow!("unparseable certificate: {e}"))?;
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: cert.validity().not_before.to_string(),
            not_after: cert.validity().not_after.to_string(),
        })
    }
}

impl fmt::Display for CertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject={} issuer={} valid {} - {}",
            self.subject, self.issuer, self.not_before, self.not_after
        )
    }
}

/// WebPKI verification for traced hosts, optionally accepting any certificate (`--insecure`).
///
/// The outcome is logged per handshake with the server name, inside the span of
/// the trace that dialed it.
#[derive(Debug)]
pub struct TraceCertVerifier {
    webpki: Arc<dyn ServerCertVerifier>,
    accept_invalid: bool,
}

impl TraceCertVerifier {
    pub fn new(
        accept_invalid: bool,
        provider: Arc<CryptoProvider>,
        root_store: &RootCertStore,
    ) -> Result<Self, anyhow::Error> {
        let webpki = rustls::client::WebPkiServerVerifier::builder_with_provider(
            root_store.clone().into(),
            provider,
        )
        .build()?;

        Ok(Self {
            webpki,
            accept_invalid,
        })
    }
}

impl ServerCertVerifier for TraceCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let server = server_name.to_str();
        if tracing::enabled!(tracing::Level::DEBUG) {
            match CertSummary::parse(end_entity) {
                Ok(summary) => debug!(%server, "Server certificate: {}", summary),
                Err(e) => debug!(%server, "{:#}", e),
            }
        }

        let verdict = self
            .webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now);
        match verdict {
            Err(e) if self.accept_invalid => {
                warn!(%server, "Accepting invalid certificate: {}", e);
                Ok(ServerCertVerified::assertion())
            }
            verdict => verdict,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}
