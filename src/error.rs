use std::io;

use crate::provider::ProviderError;

/// Classification shared by the blocking and suspendable forms of every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credential or certificate setup was rejected.
    Configuration,
    /// The security context rejected a handshake message or record.
    Protocol,
    /// The underlying transport failed.
    Transport,
    /// The peer closed the secure channel gracefully.
    PeerClosed,
    /// An operation was invoked out of the allowed sequence.
    Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("protocol error: {0}")]
    Protocol(ProviderError),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("peer closed the secure channel")]
    PeerClosed,
    #[error("usage error: {0}")]
    Usage(&'static str),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Transport(_) => ErrorKind::Transport,
            Error::PeerClosed => ErrorKind::PeerClosed,
            Error::Usage(_) => ErrorKind::Usage,
        }
    }

    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Error::PeerClosed)
    }

    pub(crate) fn unexpected_eof(message: &'static str) -> Self {
        Error::Transport(io::Error::new(io::ErrorKind::UnexpectedEof, message))
    }
}

impl From<ProviderError> for Error {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Credentials(message) => Error::Configuration(message),
            other => Error::Protocol(other),
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Transport(_) => None,
            Error::Configuration(_) => Some(io::ErrorKind::InvalidInput),
            Error::Protocol(_) => Some(io::ErrorKind::InvalidData),
            Error::PeerClosed => Some(io::ErrorKind::UnexpectedEof),
            Error::Usage(_) => Some(io::ErrorKind::NotConnected),
        };
        match (error, kind) {
            (Error::Transport(e), _) => e,
            (other, kind) => io::Error::new(kind.unwrap_or(io::ErrorKind::Other), other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
