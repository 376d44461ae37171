use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, SignatureScheme};

/// Loads a PEM certificate chain from `path`.
fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening certificate file {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificate file {}", path.display()))
}

/// Loads a single PEM private key from `path`.
fn load_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening key file {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parsing key file {}", path.display()))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))
}

/// Builds the server-side `rustls::ServerConfig` from a cert/key pair and,
/// when client authentication is required, a trust anchor file.
pub fn server_tls_config(
    cert_file: &Path,
    key_file: &Path,
    ca_file: Option<&Path>,
    require_client_auth: bool,
) -> Result<Arc<rustls::ServerConfig>> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let builder = rustls::ServerConfig::builder();
    let config = if require_client_auth {
        let ca_path = ca_file.context("require_client_auth is set but no ca_file configured")?;
        let ca_certs = load_certs(ca_path)?;
        let mut roots = rustls::RootCertStore::empty();
        for cert in ca_certs {
            roots.add(cert)?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .context("building client certificate verifier")?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(certs, key)?
    };

    Ok(Arc::new(config))
}

/// Builds the client-side `rustls::ClientConfig`. When `ca_file` is given,
/// trusts only that CA; otherwise falls back to the platform's native
/// trust roots via `rustls-native-certs`-free webpki defaults is not
/// available without that crate, so an explicit `ca_file` is required for
/// non-ephemeral deployments.
///
/// `verify_server = false` disables server certificate verification
/// entirely (spec.md §10's `ClientConfig::verify_server`); this is meant
/// for testing against self-signed deployments without a distributed CA
/// file and logs a warning every time it is exercised.
pub fn client_tls_config(
    ca_file: Option<&Path>,
    client_cert: Option<(&Path, &Path)>,
    verify_server: bool,
) -> Result<Arc<rustls::ClientConfig>> {
    let builder = rustls::ClientConfig::builder();

    let builder = if verify_server {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(ca_path) = ca_file {
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }
        }
        builder.with_root_certificates(roots)
    } else {
        tracing::warn!("server certificate verification disabled (verify_server = false)");
        let provider = rustls::crypto::CryptoProvider::get_default()
            .context("no default rustls crypto provider installed")?
            .clone();
        builder.dangerous().with_custom_certificate_verifier(Arc::new(NoServerVerification(provider)))
    };

    let config = if let Some((cert_file, key_file)) = client_cert {
        let certs = load_certs(cert_file)?;
        let key = load_private_key(key_file)?;
        builder.with_client_auth_cert(certs, key)?
    } else {
        builder.with_no_client_auth()
    };

    Ok(Arc::new(config))
}

struct NoServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl std::fmt::Debug for NoServerVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoServerVerification").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
