//! securestream - a secure channel layered over any byte stream.
//!
//! A [`SecureStream`] wraps a transport and drives a pluggable security
//! context through four engines: handshake, decrypt, encrypt and shutdown.
//! Every operation is available in a blocking form over `std::io` and a
//! suspendable form over tokio's `AsyncRead`/`AsyncWrite`.
//!
//! The bundled provider is backed by rustls:
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::sync::Arc;
//!
//! use securestream::{Method, Role, SecureStream, TlsContext};
//!
//! let mut context = TlsContext::new(Method::SystemDefault);
//! context.use_default_certificates(true);
//!
//! let tcp = TcpStream::connect("example.com:443")?;
//! let mut stream = SecureStream::new(tcp, Arc::new(context));
//! stream.set_server_hostname("example.com");
//! stream.handshake(Role::Client)?;
//! stream.write_some(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod buffer_set;
mod context;
mod driver;
mod error;
mod key_store;
mod rustls_connection_util;
mod rustls_util;
mod stream;

pub mod config;
pub mod engine;
pub mod provider;

#[cfg(test)]
mod test_util;

pub use buffer_set::{Buffer, BufferKind, BufferSet};
pub use context::{DEFAULT_BUFFER_SIZE, MIN_TLS_BUFFER_SIZE, Method, Role, TlsContext};
pub use error::{Error, ErrorKind, Result};
pub use key_store::{Certificate, FileFormat, Identity, KeyStore};
pub use stream::{Handshake, ReadSome, SecureStream, Shutdown, StreamState, WriteSome};
