use bytes::{Buf, BytesMut};

use super::{EngineState, stage_input};
use crate::buffer_set::{self, BufferKind};
use crate::context::Role;
use crate::error::Error;
use crate::provider::{ProviderError, SecStatus, SecurityContext};

const MAX_ATTEMPTS_PER_STEP: usize = 100;

/// Drives the multi-round token exchange for one role.
pub struct HandshakeEngine {
    role: Role,
    server_name: Option<String>,
    state: EngineState,
    input: BytesMut,
    read_buf: Box<[u8]>,
    output: BytesMut,
    alert: Option<BytesMut>,
    complete: bool,
    extra: Option<BytesMut>,
    last_error: Option<Error>,
    rounds: usize,
}

impl HandshakeEngine {
    pub fn new(role: Role, server_name: Option<String>, buffer_size: usize) -> Self {
        Self {
            role,
            server_name,
            state: EngineState::NeedsInput,
            input: BytesMut::new(),
            read_buf: vec![0u8; buffer_size].into_boxed_slice(),
            output: BytesMut::new(),
            alert: None,
            complete: false,
            extra: None,
            last_error: None,
            rounds: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn step(&mut self, context: &mut dyn SecurityContext) -> EngineState {
        self.state = self.advance(context);
        self.state
    }

    /// Region the caller reads transport bytes into before `feed_input`.
    pub fn input_buf(&mut self) -> &mut [u8] {
        &mut self.read_buf
    }

    pub fn feed_input(&mut self, n: usize) {
        let n = stage_input(&mut self.input, &self.read_buf, n);
        log::trace!("TLS handshake: staged {n} bytes, {} pending", self.input.len());
    }

    pub fn output_buffer(&self) -> &[u8] {
        &self.output
    }

    pub fn mark_sent(&mut self, n: usize) {
        let n = n.min(self.output.len());
        self.output.advance(n);
    }

    /// Application bytes that arrived together with the final handshake
    /// message, to be decrypted before reading the transport again.
    pub fn take_extra(&mut self) -> Option<BytesMut> {
        self.extra.take()
    }

    /// Alert the provider produced when it failed.
    pub fn take_alert(&mut self) -> Option<BytesMut> {
        self.alert.take()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    fn advance(&mut self, context: &mut dyn SecurityContext) -> EngineState {
        match self.state {
            EngineState::Error => return EngineState::Error,
            EngineState::Done => return self.fail(Error::Usage("handshake already completed")),
            _ => {}
        }

        if !self.output.is_empty() {
            return EngineState::HasOutput;
        }
        if self.complete {
            self.finish();
            return EngineState::Done;
        }

        let mut attempts = 0;
        loop {
            self.rounds += 1;
            attempts += 1;
            if attempts > MAX_ATTEMPTS_PER_STEP {
                log::error!("TLS handshake made no progress after {MAX_ATTEMPTS_PER_STEP} attempts");
                return self.fail(Error::Protocol(ProviderError::Protocol(
                    "handshake stalled".to_string(),
                )));
            }

            let staged = self.input.len();
            let mut input = buffer_set::token_input(self.input.split());
            let mut output = buffer_set::handshake_output();
            let result = context.initialize(&mut input, &mut output);
            self.input = input.take(BufferKind::Extra).unwrap_or_default();

            let status = match result {
                Ok(status) => status,
                Err(e) => {
                    self.alert = output.take(BufferKind::Alert).filter(|alert| !alert.is_empty());
                    log::debug!("TLS handshake failed as {}: {e}", self.role);
                    return self.fail(e.into());
                }
            };

            let token = output.take(BufferKind::Token).unwrap_or_default();
            log::debug!(
                "TLS handshake round {}: {status:?}, consumed {} of {staged} bytes, produced {} bytes",
                self.rounds,
                staged.saturating_sub(self.input.len()),
                token.len()
            );

            match status {
                SecStatus::Ok => {
                    self.complete = true;
                    if !token.is_empty() {
                        self.output = token;
                        return EngineState::HasOutput;
                    }
                    self.finish();
                    return EngineState::Done;
                }
                SecStatus::ContinueNeeded | SecStatus::IncompleteMessage => {
                    if !token.is_empty() {
                        self.output = token;
                        return EngineState::HasOutput;
                    }
                    // progress without output: retry with what is left before reading
                    if status == SecStatus::ContinueNeeded
                        && !self.input.is_empty()
                        && self.input.len() < staged
                    {
                        continue;
                    }
                    return EngineState::NeedsInput;
                }
                SecStatus::ContextExpired => {
                    return self.fail(Error::Protocol(ProviderError::Protocol(
                        "security context expired during handshake".to_string(),
                    )));
                }
            }
        }
    }

    fn finish(&mut self) {
        if !self.input.is_empty() {
            log::debug!(
                "TLS handshake complete with {} bytes of application data pending",
                self.input.len()
            );
            self.extra = Some(self.input.split());
        } else {
            log::debug!("TLS handshake complete after {} rounds", self.rounds);
        }
        self.input = BytesMut::new();
        self.read_buf = Box::default();
    }

    fn fail(&mut self, error: Error) -> EngineState {
        self.last_error = Some(error);
        EngineState::Error
    }
}
