use serde::Deserialize;

use super::pem::PemSource;
pub use crate::context::MIN_TLS_BUFFER_SIZE;
use crate::context::{DEFAULT_BUFFER_SIZE, Method, Role, TlsContext};
use crate::error::{Error, Result};
use crate::key_store::{Certificate, FileFormat, KeyStore};

fn default_true() -> bool {
    true
}

fn default_key_name() -> String {
    "default".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    #[serde(default)]
    pub method: Method,
    pub role: Role,
    #[serde(alias = "sni_hostname", default)]
    pub server_name: Option<String>,
    #[serde(default = "default_true")]
    pub verify_server_certificate: bool,
    #[serde(default)]
    pub use_default_certificates: bool,
    #[serde(alias = "cert", default)]
    pub certificate: Option<PemSource>,
    #[serde(default)]
    pub key: Option<PemSource>,
    #[serde(default = "default_key_name")]
    pub key_name: String,
    #[serde(alias = "ca_certs", default)]
    pub certificate_authorities: Vec<PemSource>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_TLS_BUFFER_SIZE {
            return Err(Error::Configuration(format!(
                "buffer_size {} is smaller than the minimum of {MIN_TLS_BUFFER_SIZE}",
                self.buffer_size
            )));
        }
        match (&self.certificate, &self.key) {
            (Some(_), None) => {
                return Err(Error::Configuration("certificate given without a key".to_string()));
            }
            (None, Some(_)) => {
                return Err(Error::Configuration("key given without a certificate".to_string()));
            }
            (None, None) if self.role == Role::Server => {
                return Err(Error::Configuration(
                    "server role requires a certificate and key".to_string(),
                ));
            }
            _ => {}
        }
        if self.role == Role::Server && self.server_name.is_some() {
            return Err(Error::Configuration(
                "server_name is only used by the client role".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a context from this config. The private key is imported into
    /// `store` under `key_name` unless a key with that name is already there.
    pub async fn build_context(&self, store: &mut KeyStore) -> Result<TlsContext> {
        self.validate()?;

        let mut context = TlsContext::new(self.method);
        context.verify_server_certificate(self.verify_server_certificate);
        context.use_default_certificates(self.use_default_certificates);
        context.set_buffer_size(self.buffer_size);
        if let Some(server_name) = &self.server_name {
            context.set_server_name(server_name.as_str());
        }

        if let (Some(certificate), Some(key)) = (&self.certificate, &self.key) {
            if !store.contains(&self.key_name) {
                let key = key.load().await?;
                store.import_private_key(&self.key_name, key.as_bytes(), FileFormat::Pem)?;
            }
            let certificate = certificate.load().await?;
            let certificate = Certificate::from_bytes(certificate.as_bytes(), FileFormat::Pem)?;
            context.use_certificate(store.assign_private_key(&certificate, &self.key_name)?);
        }

        for authority in self.certificate_authorities.iter() {
            let authority = authority.load().await?;
            context.add_certificate_authority(Certificate::from_bytes(
                authority.as_bytes(),
                FileFormat::Pem,
            )?);
        }

        Ok(context)
    }
}
