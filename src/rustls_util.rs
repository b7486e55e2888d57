use std::sync::Arc;
use std::sync::OnceLock;

use rustls::SupportedProtocolVersion;

use crate::context::{Method, TlsContext};
use crate::provider::ProviderError;

static TLS12_ONLY: [&SupportedProtocolVersion; 1] = [&rustls::version::TLS12];
static TLS13_ONLY: [&SupportedProtocolVersion; 1] = [&rustls::version::TLS13];

pub fn create_client_config(context: &TlsContext) -> Result<rustls::ClientConfig, ProviderError> {
    let builder = rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_protocol_versions(protocol_versions(context.method()))
        .map_err(|e| ProviderError::Credentials(format!("unsupported protocol versions: {e}")))?;

    let builder = if context.verifies_server_certificate() {
        builder.with_root_certificates(create_root_cert_store(context)?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(get_disabled_verifier())
    };

    match context.identity() {
        Some(identity) => builder
            .with_client_auth_cert(
                identity.certificate().chain().to_vec(),
                identity.private_key().clone_key(),
            )
            .map_err(|e| ProviderError::Credentials(format!("invalid client certificate: {e}"))),
        None => Ok(builder.with_no_client_auth()),
    }
}

pub fn create_server_config(context: &TlsContext) -> Result<rustls::ServerConfig, ProviderError> {
    let identity = context.identity().ok_or_else(|| {
        ProviderError::Credentials("server role requires a certificate".to_string())
    })?;

    let mut config = rustls::ServerConfig::builder_with_provider(get_crypto_provider())
        .with_protocol_versions(protocol_versions(context.method()))
        .map_err(|e| ProviderError::Credentials(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(
            identity.certificate().chain().to_vec(),
            identity.private_key().clone_key(),
        )
        .map_err(|e| ProviderError::Credentials(format!("bad certificate/key: {e}")))?;

    config.max_fragment_size = None;
    config.ignore_client_order = true;

    Ok(config)
}

fn protocol_versions(method: Method) -> &'static [&'static SupportedProtocolVersion] {
    match method {
        Method::SystemDefault => rustls::DEFAULT_VERSIONS,
        Method::Tls12 => &TLS12_ONLY,
        Method::Tls13 => &TLS13_ONLY,
    }
}

fn create_root_cert_store(context: &TlsContext) -> Result<rustls::RootCertStore, ProviderError> {
    let mut root_store = if context.uses_default_certificates() {
        get_root_cert_store().as_ref().clone()
    } else {
        rustls::RootCertStore::empty()
    };
    for authority in context.certificate_authorities() {
        root_store
            .add(authority.end_entity().clone())
            .map_err(|e| ProviderError::Credentials(format!("invalid certificate authority: {e}")))?;
    }
    if root_store.is_empty() {
        return Err(ProviderError::Credentials(
            "server certificate verification needs at least one trust anchor".to_string(),
        ));
    }
    Ok(root_store)
}

#[derive(Debug)]
pub struct DisabledVerifier {
    supported_algs: rustls::crypto::WebPkiSupportedAlgorithms,
}

impl rustls::client::danger::ServerCertVerifier for DisabledVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    static INSTANCE: OnceLock<Arc<rustls::crypto::CryptoProvider>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .clone()
}

fn get_supported_algorithms() -> rustls::crypto::WebPkiSupportedAlgorithms {
    get_crypto_provider().signature_verification_algorithms
}

fn get_disabled_verifier() -> Arc<DisabledVerifier> {
    static INSTANCE: OnceLock<Arc<DisabledVerifier>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            Arc::new(DisabledVerifier {
                supported_algs: get_supported_algorithms(),
            })
        })
        .clone()
}

fn get_root_cert_store() -> Arc<rustls::RootCertStore> {
    static INSTANCE: OnceLock<Arc<rustls::RootCertStore>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let root_store = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            Arc::new(root_store)
        })
        .clone()
}
