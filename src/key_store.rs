//! Caller-owned private keys and certificate parsing.

use std::collections::HashMap;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Pem,
    Der,
}

/// A certificate chain, end entity first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    chain: Vec<CertificateDer<'static>>,
}

impl Certificate {
    pub fn from_bytes(bytes: &[u8], format: FileFormat) -> Result<Self> {
        let chain = match format {
            FileFormat::Pem => CertificateDer::pem_slice_iter(bytes)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Configuration(format!("failed to parse certificate: {e}")))?,
            FileFormat::Der => vec![CertificateDer::from(bytes.to_vec())],
        };
        if chain.is_empty() || chain.iter().any(|cert| cert.is_empty()) {
            return Err(Error::Configuration("no certificate found".to_string()));
        }
        Ok(Self { chain })
    }

    pub fn end_entity(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

/// A certificate paired with the private key it was assigned.
#[derive(Debug)]
pub struct Identity {
    certificate: Certificate,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            certificate: self.certificate.clone(),
            key: self.key.clone_key(),
        }
    }
}

#[derive(Debug, Default)]
pub struct KeyStore {
    keys: HashMap<String, PrivateKeyDer<'static>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_private_key(&mut self, name: &str, bytes: &[u8], format: FileFormat) -> Result<()> {
        if self.keys.contains_key(name) {
            return Err(Error::Configuration(format!("key {name} already exists")));
        }
        let key = match format {
            FileFormat::Pem => PrivateKeyDer::from_pem_slice(bytes)
                .map_err(|e| Error::Configuration(format!("failed to parse key {name}: {e}")))?,
            FileFormat::Der => PrivateKeyDer::try_from(bytes.to_vec())
                .map_err(|e| Error::Configuration(format!("failed to parse key {name}: {e}")))?,
        };
        log::debug!("imported private key {name}");
        self.keys.insert(name.to_string(), key);
        Ok(())
    }

    pub fn delete_private_key(&mut self, name: &str) -> Result<()> {
        match self.keys.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::Configuration(format!("no key named {name}"))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    pub fn assign_private_key(&self, certificate: &Certificate, name: &str) -> Result<Identity> {
        let key = self
            .keys
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("no key named {name}")))?;
        Ok(Identity {
            certificate: certificate.clone(),
            key: key.clone_key(),
        })
    }
}
