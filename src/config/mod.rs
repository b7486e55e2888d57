//! YAML configuration for secure streams.
//!
//! - [`types`]: the [`StreamConfig`] document and its fields
//! - [`pem`]: PEM values given inline or as file paths
//!
//! [`load_config`] reads a file from disk, [`StreamConfig::build_context`]
//! turns it into a [`TlsContext`](crate::context::TlsContext).

mod pem;
mod types;

pub use pem::PemSource;
pub use types::*;

use crate::error::{Error, Result};

/// Reads and parses a YAML config file.
pub async fn load_config<T>(config_filename: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let config_bytes = match tokio::fs::read(config_filename).await {
        Ok(b) => b,
        Err(e) => {
            return Err(Error::Configuration(format!(
                "Could not read config file {config_filename}: {e}"
            )));
        }
    };

    let config_str = match String::from_utf8(config_bytes) {
        Ok(s) => s,
        Err(e) => {
            return Err(Error::Configuration(format!(
                "Could not parse config file {config_filename} as UTF8: {e}"
            )));
        }
    };

    parse_config(&config_str).map_err(|e| {
        Error::Configuration(format!("Could not parse config file {config_filename}: {e}"))
    })
}

/// Parses a YAML config document.
pub fn parse_config<T>(config_str: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_yaml::from_str(config_str)
        .map_err(|e| Error::Configuration(format!("invalid config YAML: {e}")))
}
