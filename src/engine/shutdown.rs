use bytes::{Buf, BytesMut};

use super::{EngineState, stage_input};
use crate::buffer_set::{self, BufferKind};
use crate::error::Error;
use crate::provider::{SecStatus, SecurityContext};

/// Produces the close token and, if the provider asks for it, consumes the
/// peer's acknowledgment.
pub struct ShutdownEngine {
    state: EngineState,
    buffer_size: usize,
    input: BytesMut,
    read_buf: Box<[u8]>,
    output: BytesMut,
    finished: bool,
    last_error: Option<Error>,
}

impl ShutdownEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            state: EngineState::NeedsInput,
            buffer_size,
            input: BytesMut::new(),
            read_buf: Box::default(),
            output: BytesMut::new(),
            finished: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn step(&mut self, context: &mut dyn SecurityContext) -> EngineState {
        self.state = match self.state {
            EngineState::Done => EngineState::Done,
            EngineState::Error => EngineState::Error,
            _ => self.advance(context),
        };
        self.state
    }

    pub fn input_buf(&mut self) -> &mut [u8] {
        if self.read_buf.is_empty() {
            self.read_buf = vec![0u8; self.buffer_size].into_boxed_slice();
        }
        &mut self.read_buf
    }

    pub fn feed_input(&mut self, n: usize) {
        stage_input(&mut self.input, &self.read_buf, n);
    }

    pub fn output_buffer(&self) -> &[u8] {
        &self.output
    }

    pub fn mark_sent(&mut self, n: usize) {
        let n = n.min(self.output.len());
        self.output.advance(n);
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    pub fn discard(&mut self) {
        self.input = BytesMut::new();
        self.output = BytesMut::new();
        self.read_buf = Box::default();
        self.state = EngineState::Error;
    }

    fn advance(&mut self, context: &mut dyn SecurityContext) -> EngineState {
        if !self.output.is_empty() {
            return EngineState::HasOutput;
        }
        if self.finished {
            log::debug!("close token sent");
            self.read_buf = Box::default();
            return EngineState::Done;
        }

        let mut input = buffer_set::token_input(self.input.split());
        let mut output = buffer_set::shutdown_output();
        let result = context.shutdown(&mut input, &mut output);
        self.input = input.take(BufferKind::Extra).unwrap_or_default();

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                log::debug!("shutdown failed: {e}");
                self.last_error = Some(e.into());
                return EngineState::Error;
            }
        };
        let token = output.take(BufferKind::Token).unwrap_or_default();

        match status {
            SecStatus::Ok | SecStatus::ContextExpired => self.finished = true,
            SecStatus::ContinueNeeded | SecStatus::IncompleteMessage => {}
        }
        if !token.is_empty() {
            self.output = token;
            return EngineState::HasOutput;
        }
        if self.finished {
            return EngineState::Done;
        }
        EngineState::NeedsInput
    }
}
