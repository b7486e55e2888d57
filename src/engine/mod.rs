//! Step-wise state machines that drive a security context.
//!
//! Engines never touch the transport. Each step returns an [`EngineState`]
//! telling the caller which I/O to perform before stepping again.

mod decrypt;
mod encrypt;
mod handshake;
mod shutdown;

pub use decrypt::DecryptEngine;
pub use encrypt::EncryptEngine;
pub use handshake::HandshakeEngine;
pub use shutdown::ShutdownEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Read from the transport into the engine's input buffer.
    NeedsInput,
    /// Bytes are ready for the transport.
    HasOutput,
    /// Plaintext was delivered to the caller.
    HasData,
    Done,
    Error,
}

/// Appends up to `n` bytes of `read_buf` to `staged`.
fn stage_input(staged: &mut bytes::BytesMut, read_buf: &[u8], n: usize) -> usize {
    let n = n.min(read_buf.len());
    staged.extend_from_slice(&read_buf[..n]);
    n
}
