//! PEM values that are either inline data or a path to a file.

use log::debug;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum PemSource {
    Path(String),
    Data(String),
}

impl From<String> for PemSource {
    fn from(s: String) -> Self {
        if is_pem_file_path(&s) {
            PemSource::Path(s)
        } else {
            PemSource::Data(s)
        }
    }
}

impl PemSource {
    /// Returns the PEM text, reading it from disk for path sources.
    pub async fn load(&self) -> Result<String> {
        match self {
            PemSource::Data(data) => Ok(data.clone()),
            PemSource::Path(path) => read_pem_to_string(path).await,
        }
    }
}

fn is_pem_file_path(s: &str) -> bool {
    !s.trim_start().starts_with("-----BEGIN")
}

async fn read_pem_to_string(path: &str) -> Result<String> {
    debug!("Reading PEM file: {path}");
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Configuration(format!("Failed to read PEM file '{path}': {e}")))
}
