use bytes::{Buf, BytesMut};

use super::EngineState;
use crate::buffer_set::{self, BufferSet};
use crate::error::Error;
use crate::provider::SecurityContext;

/// Frames plaintext into a single record and tracks how much of it the
/// transport accepted.
pub struct EncryptEngine {
    framed: BufferSet<3>,
    consumed: usize,
    pending: bool,
    failed: bool,
    last_error: Option<Error>,
}

impl EncryptEngine {
    pub fn new() -> Self {
        Self {
            framed: BufferSet::new(),
            consumed: 0,
            pending: false,
            failed: false,
            last_error: None,
        }
    }

    /// Returns the state and how many bytes of `input` the current record
    /// holds. `input` is only read when no record is pending.
    pub fn encrypt(&mut self, context: &mut dyn SecurityContext, input: &[u8]) -> (EngineState, usize) {
        if self.failed {
            return (EngineState::Error, 0);
        }

        if self.pending {
            if self.framed.total_len() > 0 {
                return (EngineState::HasOutput, self.consumed);
            }
            let consumed = self.consumed;
            self.reset();
            return (EngineState::Done, consumed);
        }

        let sizes = context.stream_sizes();
        let n = input.len().min(sizes.max_message);
        let mut buffers =
            buffer_set::encrypt_input(BytesMut::from(&input[..n]), sizes.header, sizes.trailer);
        if let Err(e) = context.encrypt_message(&mut buffers) {
            log::debug!("encrypt failed: {e}");
            self.failed = true;
            self.last_error = Some(e.into());
            return (EngineState::Error, 0);
        }

        log::trace!("framed {n} bytes into a {} byte record", buffers.total_len());
        self.framed = buffers;
        self.consumed = n;
        self.pending = true;
        (EngineState::HasOutput, n)
    }

    /// The framed record, HEADER, DATA, TRAILER.
    pub fn buffers(&self) -> &BufferSet<3> {
        &self.framed
    }

    /// Next unsent region of the record.
    pub fn output_buffer(&self) -> &[u8] {
        self.framed
            .iter()
            .map(|slot| slot.data())
            .find(|data| !data.is_empty())
            .unwrap_or(&[])
    }

    pub fn mark_sent(&mut self, mut n: usize) {
        for slot in self.framed.iter_mut() {
            let data = slot.data_mut();
            let sent = n.min(data.len());
            data.advance(sent);
            n -= sent;
            if n == 0 {
                break;
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Drops a partially sent record. The stream cannot continue after this.
    pub fn discard(&mut self) {
        self.reset();
        self.failed = true;
    }

    fn reset(&mut self) {
        self.framed = BufferSet::new();
        self.consumed = 0;
        self.pending = false;
    }
}

impl Default for EncryptEngine {
    fn default() -> Self {
        Self::new()
    }
}
