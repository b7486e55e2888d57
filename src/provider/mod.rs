//! The security-context capability the engines drive.
//!
//! A provider communicates only through [`BufferSet`]s and [`SecStatus`]
//! outcomes. It must move every input byte it did not consume into an
//! [`BufferKind::Extra`](crate::BufferKind::Extra) slot, including
//! when it reports [`SecStatus::IncompleteMessage`].

mod rustls_provider;
pub(crate) mod tls_record;

pub use rustls_provider::RustlsProvider;

use std::fmt::Debug;

use crate::buffer_set::BufferSet;
use crate::context::{Role, TlsContext};

/// Outcome of a provider call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecStatus {
    Ok,
    ContinueNeeded,
    IncompleteMessage,
    ContextExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSizes {
    pub header: usize,
    pub trailer: usize,
    pub max_message: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("credentials rejected: {0}")]
    Credentials(String),
    #[error("{0}")]
    Protocol(String),
    #[error("internal provider failure: {0}")]
    Internal(String),
}

pub trait SecurityProvider: Send + Sync + Debug {
    fn acquire_credentials(
        &self,
        role: Role,
        context: &TlsContext,
    ) -> Result<Box<dyn Credential>, ProviderError>;
}

pub trait Credential: Send + Sync {
    fn role(&self) -> Role;

    /// `server_name` is only meaningful for the client role.
    fn initialize_context(
        &self,
        server_name: Option<&str>,
    ) -> Result<Box<dyn SecurityContext>, ProviderError>;
}

pub trait SecurityContext: Send {
    /// Initiates or accepts one round of the handshake.
    ///
    /// `input` is TOKEN, EMPTY on entry; `output` is TOKEN, ALERT. On error the
    /// ALERT slot may carry bytes to send to the peer.
    fn initialize(
        &mut self,
        input: &mut BufferSet<2>,
        output: &mut BufferSet<2>,
    ) -> Result<SecStatus, ProviderError>;

    /// Decrypts at most one record from the DATA slot.
    fn decrypt_message(&mut self, buffers: &mut BufferSet<4>) -> Result<SecStatus, ProviderError>;

    /// Replaces the DATA slot with ciphertext and fills HEADER and TRAILER.
    fn encrypt_message(&mut self, buffers: &mut BufferSet<3>) -> Result<(), ProviderError>;

    fn stream_sizes(&self) -> StreamSizes;

    fn shutdown(
        &mut self,
        input: &mut BufferSet<2>,
        output: &mut BufferSet<1>,
    ) -> Result<SecStatus, ProviderError>;
}
