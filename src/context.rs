use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use serde::Deserialize;

use crate::key_store::{Certificate, Identity};
use crate::provider::{Credential, ProviderError, RustlsProvider, SecurityProvider};

/// Size of the per-engine transport read buffers. Large enough for one
/// maximum-size TLS record.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Smallest transport buffer that can hold a full TLS record.
pub const MIN_TLS_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Protocol versions a context is willing to negotiate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Method {
    #[default]
    #[serde(alias = "default", alias = "system_default")]
    SystemDefault,
    #[serde(alias = "tls12", alias = "tls1.2")]
    Tls12,
    #[serde(alias = "tls13", alias = "tls1.3")]
    Tls13,
}

/// Shared configuration from which every stream acquires its credential.
#[derive(Debug, Clone)]
pub struct TlsContext {
    method: Method,
    provider: Arc<dyn SecurityProvider>,
    identity: Option<Identity>,
    authorities: Vec<Certificate>,
    use_default_certificates: bool,
    verify_server_certificate: bool,
    server_name: Option<String>,
    buffer_size: usize,
}

impl TlsContext {
    pub fn new(method: Method) -> Self {
        Self::with_provider(method, Arc::new(RustlsProvider))
    }

    pub fn with_provider(method: Method, provider: Arc<dyn SecurityProvider>) -> Self {
        Self {
            method,
            provider,
            identity: None,
            authorities: vec![],
            use_default_certificates: false,
            verify_server_certificate: true,
            server_name: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Sets the certificate and key presented to the peer.
    pub fn use_certificate(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn add_certificate_authority(&mut self, certificate: Certificate) {
        self.authorities.push(certificate);
    }

    pub fn certificate_authorities(&self) -> &[Certificate] {
        &self.authorities
    }

    /// Trusts the bundled web PKI roots in addition to explicit authorities.
    pub fn use_default_certificates(&mut self, enabled: bool) {
        self.use_default_certificates = enabled;
    }

    pub fn uses_default_certificates(&self) -> bool {
        self.use_default_certificates
    }

    pub fn verify_server_certificate(&mut self, enabled: bool) {
        self.verify_server_certificate = enabled;
    }

    pub fn verifies_server_certificate(&self) -> bool {
        self.verify_server_certificate
    }

    /// Hostname client streams use when none was set on the stream itself.
    pub fn set_server_name(&mut self, server_name: impl Into<String>) {
        self.server_name = Some(server_name.into());
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Sizes below [`MIN_TLS_BUFFER_SIZE`] are raised to it.
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        if buffer_size < MIN_TLS_BUFFER_SIZE {
            log::warn!(
                "buffer size {buffer_size} is below one TLS record, using {MIN_TLS_BUFFER_SIZE}"
            );
        }
        self.buffer_size = buffer_size.max(MIN_TLS_BUFFER_SIZE);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn provider(&self) -> &Arc<dyn SecurityProvider> {
        &self.provider
    }

    pub fn acquire_credentials(&self, role: Role) -> Result<Box<dyn Credential>, ProviderError> {
        self.provider.acquire_credentials(role, self)
    }
}
