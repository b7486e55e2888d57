//! Runs an engine against a transport.
//!
//! An [`Operation`] wraps one engine step function. [`run_blocking`] drives it
//! with `std::io`, [`poll_operation`] drives it from inside `poll` functions,
//! resuming at the transport read or write it last suspended on.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::engine::{DecryptEngine, EncryptEngine, EngineState, HandshakeEngine, ShutdownEngine};
use crate::error::Error;
use crate::provider::{ProviderError, SecurityContext};

pub(crate) enum Next<T> {
    Read,
    Write,
    Done(T),
}

pub(crate) trait Operation {
    type Output;

    fn step(&mut self) -> Result<Next<Self::Output>, Error>;

    fn input_buf(&mut self) -> &mut [u8];

    fn on_read(&mut self, n: usize);

    fn output_buf(&self) -> &[u8];

    fn on_written(&mut self, n: usize);

    /// Bytes to send best-effort after a failed step.
    fn last_gasp(&mut self) -> Option<BytesMut> {
        None
    }

    fn eof_error(&self) -> Error;
}

pub(crate) fn run_blocking<O, S>(op: &mut O, io: &mut S) -> Result<O::Output, Error>
where
    O: Operation,
    S: Read + Write,
{
    let mut wrote = false;
    loop {
        let next = match op.step() {
            Ok(next) => next,
            Err(e) => {
                if let Some(alert) = op.last_gasp() {
                    log::debug!("sending {} byte alert before failing", alert.len());
                    let _ = io.write_all(&alert).and_then(|()| io.flush());
                }
                return Err(e);
            }
        };

        match next {
            Next::Read => {
                let n = loop {
                    match io.read(op.input_buf()) {
                        Ok(n) => break n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                };
                if n == 0 {
                    return Err(op.eof_error());
                }
                log::trace!("read {n} bytes from transport");
                op.on_read(n);
            }
            Next::Write => {
                let n = loop {
                    match io.write(op.output_buf()) {
                        Ok(n) => break n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                };
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                log::trace!("wrote {n} bytes to transport");
                op.on_written(n);
                wrote = true;
            }
            Next::Done(output) => {
                if wrote {
                    io.flush()?;
                }
                return Ok(output);
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Phase {
    #[default]
    Step,
    Reading,
    Writing,
    Flushing,
}

/// Continuation of a suspendable operation between polls.
#[derive(Debug, Default)]
pub(crate) struct OpState {
    phase: Phase,
    entries: usize,
    suspended: bool,
}

impl OpState {
    pub(crate) fn is_started(&self) -> bool {
        self.entries > 0
    }

    /// Whether the operation ever returned `Pending` from the transport.
    pub(crate) fn has_suspended(&self) -> bool {
        self.suspended
    }
}

pub(crate) fn poll_operation<O, S>(
    op: &mut O,
    io: &mut S,
    cx: &mut Context<'_>,
    state: &mut OpState,
) -> Poll<Result<O::Output, Error>>
where
    O: Operation,
    S: AsyncRead + AsyncWrite + Unpin,
{
    state.entries += 1;
    loop {
        match state.phase {
            Phase::Step => match op.step() {
                Ok(Next::Read) => state.phase = Phase::Reading,
                Ok(Next::Write) => state.phase = Phase::Writing,
                Ok(Next::Done(output)) => return Poll::Ready(Ok(output)),
                Err(e) => {
                    if let Some(alert) = op.last_gasp() {
                        log::debug!("sending {} byte alert before failing", alert.len());
                        let _ = Pin::new(&mut *io).poll_write(cx, &alert);
                    }
                    return Poll::Ready(Err(e));
                }
            },
            Phase::Reading => {
                let n = {
                    let mut read_buf = ReadBuf::new(op.input_buf());
                    let poll = Pin::new(&mut *io).poll_read(cx, &mut read_buf);
                    state.suspended |= poll.is_pending();
                    ready!(poll)?;
                    read_buf.filled().len()
                };
                if n == 0 {
                    return Poll::Ready(Err(op.eof_error()));
                }
                log::trace!("read {n} bytes from transport");
                op.on_read(n);
                state.phase = Phase::Step;
            }
            Phase::Writing => {
                let poll = Pin::new(&mut *io).poll_write(cx, op.output_buf());
                state.suspended |= poll.is_pending();
                let n = ready!(poll)?;
                if n == 0 {
                    return Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero).into()));
                }
                log::trace!("wrote {n} bytes to transport");
                op.on_written(n);
                state.phase = if op.output_buf().is_empty() {
                    Phase::Flushing
                } else {
                    Phase::Step
                };
            }
            Phase::Flushing => {
                let poll = Pin::new(&mut *io).poll_flush(cx);
                state.suspended |= poll.is_pending();
                ready!(poll)?;
                state.phase = Phase::Step;
            }
        }
    }
}

/// Holds back a completion produced on the first poll so it is delivered
/// through the executor rather than inline.
pub(crate) fn defer_first_completion<T>(
    poll: Poll<Result<T, Error>>,
    state: &OpState,
    parked: &mut Option<Result<T, Error>>,
    cx: &mut Context<'_>,
) -> Poll<Result<T, Error>> {
    match poll {
        Poll::Ready(result) if !state.has_suspended() => {
            *parked = Some(result);
            cx.waker().wake_by_ref();
            Poll::Pending
        }
        other => other,
    }
}

pub(crate) fn engine_failure(error: Option<Error>, what: &'static str) -> Error {
    error.unwrap_or_else(|| Error::Protocol(ProviderError::Internal(format!("{what} failed"))))
}

pub(crate) struct HandshakeOp<'a> {
    engine: &'a mut HandshakeEngine,
    context: &'a mut dyn SecurityContext,
}

impl<'a> HandshakeOp<'a> {
    pub(crate) fn new(engine: &'a mut HandshakeEngine, context: &'a mut dyn SecurityContext) -> Self {
        Self { engine, context }
    }
}

impl Operation for HandshakeOp<'_> {
    type Output = ();

    fn step(&mut self) -> Result<Next<()>, Error> {
        match self.engine.step(&mut *self.context) {
            EngineState::NeedsInput => Ok(Next::Read),
            EngineState::HasOutput => Ok(Next::Write),
            EngineState::Done => Ok(Next::Done(())),
            EngineState::HasData | EngineState::Error => {
                Err(engine_failure(self.engine.take_error(), "handshake"))
            }
        }
    }

    fn input_buf(&mut self) -> &mut [u8] {
        self.engine.input_buf()
    }

    fn on_read(&mut self, n: usize) {
        self.engine.feed_input(n);
    }

    fn output_buf(&self) -> &[u8] {
        self.engine.output_buffer()
    }

    fn on_written(&mut self, n: usize) {
        self.engine.mark_sent(n);
    }

    fn last_gasp(&mut self) -> Option<BytesMut> {
        self.engine.take_alert()
    }

    fn eof_error(&self) -> Error {
        Error::unexpected_eof("EOF during TLS handshake")
    }
}

pub(crate) struct ReadOp<'a> {
    engine: &'a mut DecryptEngine,
    context: &'a mut dyn SecurityContext,
    out: &'a mut [u8],
}

impl<'a> ReadOp<'a> {
    pub(crate) fn new(
        engine: &'a mut DecryptEngine,
        context: &'a mut dyn SecurityContext,
        out: &'a mut [u8],
    ) -> Self {
        Self { engine, context, out }
    }
}

impl Operation for ReadOp<'_> {
    type Output = usize;

    fn step(&mut self) -> Result<Next<usize>, Error> {
        match self.engine.decrypt(&mut *self.context, self.out) {
            (EngineState::NeedsInput, _) => Ok(Next::Read),
            (EngineState::HasData, n) => Ok(Next::Done(n)),
            (_, _) => Err(engine_failure(self.engine.take_error(), "decrypt")),
        }
    }

    fn input_buf(&mut self) -> &mut [u8] {
        self.engine.input_buf()
    }

    fn on_read(&mut self, n: usize) {
        self.engine.feed(n);
    }

    fn output_buf(&self) -> &[u8] {
        &[]
    }

    fn on_written(&mut self, _n: usize) {}

    fn eof_error(&self) -> Error {
        Error::unexpected_eof("EOF without close_notify")
    }
}

pub(crate) struct WriteOp<'a> {
    engine: &'a mut EncryptEngine,
    context: &'a mut dyn SecurityContext,
    input: &'a [u8],
}

impl<'a> WriteOp<'a> {
    pub(crate) fn new(
        engine: &'a mut EncryptEngine,
        context: &'a mut dyn SecurityContext,
        input: &'a [u8],
    ) -> Self {
        Self { engine, context, input }
    }
}

impl Operation for WriteOp<'_> {
    type Output = usize;

    fn step(&mut self) -> Result<Next<usize>, Error> {
        match self.engine.encrypt(&mut *self.context, self.input) {
            (EngineState::HasOutput, _) => Ok(Next::Write),
            (EngineState::Done, n) => Ok(Next::Done(n)),
            (_, _) => Err(engine_failure(self.engine.take_error(), "encrypt")),
        }
    }

    fn input_buf(&mut self) -> &mut [u8] {
        &mut []
    }

    fn on_read(&mut self, _n: usize) {}

    fn output_buf(&self) -> &[u8] {
        self.engine.output_buffer()
    }

    fn on_written(&mut self, n: usize) {
        self.engine.mark_sent(n);
    }

    fn eof_error(&self) -> Error {
        Error::unexpected_eof("EOF while writing")
    }
}

pub(crate) struct ShutdownOp<'a> {
    engine: &'a mut ShutdownEngine,
    context: &'a mut dyn SecurityContext,
}

impl<'a> ShutdownOp<'a> {
    pub(crate) fn new(engine: &'a mut ShutdownEngine, context: &'a mut dyn SecurityContext) -> Self {
        Self { engine, context }
    }
}

impl Operation for ShutdownOp<'_> {
    type Output = ();

    fn step(&mut self) -> Result<Next<()>, Error> {
        match self.engine.step(&mut *self.context) {
            EngineState::NeedsInput => Ok(Next::Read),
            EngineState::HasOutput => Ok(Next::Write),
            EngineState::Done => Ok(Next::Done(())),
            EngineState::HasData | EngineState::Error => {
                Err(engine_failure(self.engine.take_error(), "shutdown"))
            }
        }
    }

    fn input_buf(&mut self) -> &mut [u8] {
        self.engine.input_buf()
    }

    fn on_read(&mut self, n: usize) {
        self.engine.feed_input(n);
    }

    fn output_buf(&self) -> &[u8] {
        self.engine.output_buffer()
    }

    fn on_written(&mut self, n: usize) {
        self.engine.mark_sent(n);
    }

    fn eof_error(&self) -> Error {
        Error::unexpected_eof("EOF during shutdown")
    }
}
