use bytes::{Buf, BytesMut};

use super::{EngineState, stage_input};
use crate::buffer_set::{self, BufferKind};
use crate::error::Error;
use crate::provider::{ProviderError, SecStatus, SecurityContext};

/// Turns transport bytes into plaintext, one record per provider call.
///
/// Ciphertext past a record boundary stays staged and plaintext that did not
/// fit the caller's buffer is retained, so neither is read twice or lost.
pub struct DecryptEngine {
    staging: BytesMut,
    plaintext: BytesMut,
    read_buf: Box<[u8]>,
    peer_closed: bool,
    failed: bool,
    last_error: Option<Error>,
}

impl DecryptEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            staging: BytesMut::new(),
            plaintext: BytesMut::new(),
            read_buf: vec![0u8; buffer_size].into_boxed_slice(),
            peer_closed: false,
            failed: false,
            last_error: None,
        }
    }

    /// Copies plaintext into `out`, returning the state and the number of
    /// bytes produced.
    pub fn decrypt(&mut self, context: &mut dyn SecurityContext, out: &mut [u8]) -> (EngineState, usize) {
        if self.failed {
            return (EngineState::Error, 0);
        }
        if !self.plaintext.is_empty() {
            return (EngineState::HasData, self.deliver(out));
        }
        if self.peer_closed {
            self.last_error = Some(Error::PeerClosed);
            return (EngineState::Error, 0);
        }

        loop {
            if self.staging.is_empty() {
                return (EngineState::NeedsInput, 0);
            }

            let mut buffers = buffer_set::decrypt_input(self.staging.split());
            let result = context.decrypt_message(&mut buffers);
            self.staging = buffers.take(BufferKind::Extra).unwrap_or_default();

            match result {
                Ok(SecStatus::Ok) => {
                    let data = buffers.take(BufferKind::Data).unwrap_or_default();
                    if data.is_empty() {
                        log::trace!("skipped record without application data");
                        continue;
                    }
                    log::trace!(
                        "decrypted {} bytes, {} bytes still staged",
                        data.len(),
                        self.staging.len()
                    );
                    self.plaintext = data;
                    return (EngineState::HasData, self.deliver(out));
                }
                Ok(SecStatus::IncompleteMessage) => return (EngineState::NeedsInput, 0),
                Ok(SecStatus::ContextExpired) => {
                    log::debug!("peer closed the secure channel");
                    self.peer_closed = true;
                    self.staging.clear();
                    self.last_error = Some(Error::PeerClosed);
                    return (EngineState::Error, 0);
                }
                Ok(SecStatus::ContinueNeeded) => {
                    return self.fail(Error::Protocol(ProviderError::Protocol(
                        "peer requested renegotiation".to_string(),
                    )));
                }
                Err(e) => return self.fail(e.into()),
            }
        }
    }

    pub fn input_buf(&mut self) -> &mut [u8] {
        &mut self.read_buf
    }

    pub fn feed(&mut self, n: usize) {
        stage_input(&mut self.staging, &self.read_buf, n);
    }

    /// Stages bytes that precede anything read later, such as application
    /// data that arrived with the last handshake message.
    pub fn set_extra(&mut self, mut extra: BytesMut) {
        if !self.staging.is_empty() {
            extra.extend_from_slice(&self.staging);
        }
        log::debug!("decrypt engine took over {} bytes", extra.len());
        self.staging = extra;
    }

    pub fn staged_len(&self) -> usize {
        self.staging.len()
    }

    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Drops intermediate buffers of an abandoned read.
    pub fn discard(&mut self) {
        self.staging = BytesMut::new();
        self.plaintext = BytesMut::new();
        self.failed = true;
    }

    fn deliver(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.plaintext.len());
        out[..n].copy_from_slice(&self.plaintext[..n]);
        self.plaintext.advance(n);
        n
    }

    fn fail(&mut self, error: Error) -> (EngineState, usize) {
        log::debug!("decrypt failed: {error}");
        self.failed = true;
        self.last_error = Some(error);
        (EngineState::Error, 0)
    }
}
