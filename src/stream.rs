use std::fmt;
use std::future::Future;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::context::{Role, TlsContext};
use crate::driver::{
    HandshakeOp, OpState, ReadOp, ShutdownOp, WriteOp, defer_first_completion, engine_failure,
    poll_operation, run_blocking,
};
use crate::engine::{DecryptEngine, EncryptEngine, EngineState, HandshakeEngine, ShutdownEngine};
use crate::error::{Error, Result};
use crate::provider::{Credential, SecurityContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Fresh,
    Handshaking,
    Established,
    ShuttingDown,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Handshake,
    Read,
    Write,
    Shutdown,
}

/// A secure channel layered over a byte-oriented transport.
///
/// The same stream works with blocking `std::io` transports and with tokio
/// transports. Reads and writes use disjoint engines, so the halves returned
/// by `tokio::io::split` may be driven concurrently.
pub struct SecureStream<S> {
    io: S,
    context: Arc<TlsContext>,
    server_name: Option<String>,
    credential: Option<Box<dyn Credential>>,
    session: Option<Box<dyn SecurityContext>>,
    handshake: Option<HandshakeEngine>,
    decrypt: DecryptEngine,
    encrypt: EncryptEngine,
    shutdown: ShutdownEngine,
    state: StreamState,
    read_op: OpState,
    write_op: OpState,
    shutdown_op: OpState,
}

impl<S> SecureStream<S> {
    pub fn new(io: S, context: Arc<TlsContext>) -> Self {
        let buffer_size = context.buffer_size();
        Self {
            io,
            context,
            server_name: None,
            credential: None,
            session: None,
            handshake: None,
            decrypt: DecryptEngine::new(buffer_size),
            encrypt: EncryptEngine::new(),
            shutdown: ShutdownEngine::new(buffer_size),
            state: StreamState::Fresh,
            read_op: OpState::default(),
            write_op: OpState::default(),
            shutdown_op: OpState::default(),
        }
    }

    /// Name used for SNI and certificate checks when acting as a client.
    /// Overrides [`TlsContext::server_name`].
    pub fn set_server_hostname(&mut self, hostname: impl Into<String>) {
        self.server_name = Some(hostname.into());
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.context
    }

    pub fn next_layer(&self) -> &S {
        &self.io
    }

    pub fn next_layer_mut(&mut self) -> &mut S {
        &mut self.io
    }

    pub fn into_inner(self) -> S {
        self.io
    }

    fn begin_handshake(&mut self, role: Role) -> Result<()> {
        match self.state {
            StreamState::Fresh => {}
            StreamState::Error => return Err(Error::Usage("stream is in error state")),
            _ => return Err(Error::Usage("handshake already performed")),
        }

        let server_name = match role {
            Role::Client => self
                .server_name
                .clone()
                .or_else(|| self.context.server_name().map(str::to_string)),
            Role::Server => None,
        };
        let started = self.context.acquire_credentials(role).and_then(|credential| {
            let session = credential.initialize_context(server_name.as_deref())?;
            Ok((credential, session))
        });
        let (credential, session) = match started {
            Ok(started) => started,
            Err(e) => {
                let error = Error::from(e);
                self.fail(&error);
                return Err(error);
            }
        };

        log::debug!("TLS handshake starting as {role}");
        self.credential = Some(credential);
        self.session = Some(session);
        self.handshake = Some(HandshakeEngine::new(
            role,
            server_name,
            self.context.buffer_size(),
        ));
        self.state = StreamState::Handshaking;
        Ok(())
    }

    fn finish_handshake(&mut self, result: Result<()>) -> Result<()> {
        let engine = self.handshake.take();
        match result {
            Ok(()) => {
                if let Some(extra) = engine.and_then(|mut engine| engine.take_extra()) {
                    self.decrypt.set_extra(extra);
                }
                self.state = StreamState::Established;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn check_readable(&self) -> Result<()> {
        match self.state {
            StreamState::Established | StreamState::ShuttingDown | StreamState::Closed => Ok(()),
            StreamState::Error => Err(Error::Usage("stream is in error state")),
            StreamState::Fresh | StreamState::Handshaking => {
                Err(Error::Usage("read before handshake completed"))
            }
        }
    }

    fn check_writable(&self) -> Result<()> {
        match self.state {
            StreamState::Established => Ok(()),
            StreamState::ShuttingDown | StreamState::Closed => {
                Err(Error::Usage("write after shutdown"))
            }
            StreamState::Error => Err(Error::Usage("stream is in error state")),
            StreamState::Fresh | StreamState::Handshaking => {
                Err(Error::Usage("write before handshake completed"))
            }
        }
    }

    fn begin_shutdown(&mut self) -> Result<()> {
        match self.state {
            StreamState::Established | StreamState::ShuttingDown | StreamState::Closed => {
                if self.state == StreamState::Established {
                    log::debug!("sending close_notify");
                    self.state = StreamState::ShuttingDown;
                }
                Ok(())
            }
            StreamState::Error => Err(Error::Usage("stream is in error state")),
            StreamState::Fresh | StreamState::Handshaking => {
                Err(Error::Usage("shutdown before handshake completed"))
            }
        }
    }

    fn finish_shutdown(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.state = StreamState::Closed;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Peer close is an orderly outcome and leaves the stream usable for writes.
    fn finish_io<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && !e.is_peer_closed()
        {
            self.fail(e);
        }
        result
    }

    fn fail(&mut self, error: &Error) {
        log::debug!("secure stream failed: {error}");
        self.state = StreamState::Error;
    }

    fn abort(&mut self, operation: OperationKind) {
        log::debug!("{operation:?} operation cancelled");
        match operation {
            OperationKind::Handshake => self.handshake = None,
            OperationKind::Read => self.decrypt.discard(),
            OperationKind::Write => self.encrypt.discard(),
            OperationKind::Shutdown => self.shutdown.discard(),
        }
        self.state = StreamState::Error;
    }
}

impl<S: Read + Write> SecureStream<S> {
    pub fn handshake(&mut self, role: Role) -> Result<()> {
        self.begin_handshake(role)?;
        let result = match (self.handshake.as_mut(), self.session.as_deref_mut()) {
            (Some(engine), Some(session)) => {
                run_blocking(&mut HandshakeOp::new(engine, session), &mut self.io)
            }
            _ => Err(Error::Usage("no handshake in progress")),
        };
        self.finish_handshake(result)
    }

    /// Reads plaintext into `buf`. A graceful close by the peer is reported
    /// as [`Error::PeerClosed`].
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match self.session.as_deref_mut() {
            Some(session) => run_blocking(&mut ReadOp::new(&mut self.decrypt, session, buf), &mut self.io),
            None => Err(Error::Usage("no security context")),
        };
        self.finish_io(result)
    }

    /// Writes at most one record's worth of `buf`, returning how much was sent.
    pub fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = match self.session.as_deref_mut() {
            Some(session) => {
                run_blocking(&mut WriteOp::new(&mut self.encrypt, session, buf), &mut self.io)
            }
            None => Err(Error::Usage("no security context")),
        };
        self.finish_io(result)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.begin_shutdown()?;
        let result = match self.session.as_deref_mut() {
            Some(session) => {
                run_blocking(&mut ShutdownOp::new(&mut self.shutdown, session), &mut self.io)
            }
            None => Err(Error::Usage("no security context")),
        };
        self.finish_shutdown(result)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureStream<S> {
    pub fn handshake_async(&mut self, role: Role) -> Handshake<'_, S> {
        Handshake {
            stream: self,
            role,
            op: OpState::default(),
            parked: None,
            finished: false,
        }
    }

    pub fn read_some_async<'a>(&'a mut self, buf: &'a mut [u8]) -> ReadSome<'a, S> {
        ReadSome {
            stream: self,
            buf,
            op: OpState::default(),
            parked: None,
            finished: false,
        }
    }

    pub fn write_some_async<'a>(&'a mut self, buf: &'a [u8]) -> WriteSome<'a, S> {
        WriteSome {
            stream: self,
            buf,
            op: OpState::default(),
            parked: None,
            finished: false,
        }
    }

    pub fn shutdown_async(&mut self) -> Shutdown<'_, S> {
        Shutdown {
            stream: self,
            op: OpState::default(),
            parked: None,
            finished: false,
        }
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>, role: Role, op: &mut OpState) -> Poll<Result<()>> {
        if !op.is_started()
            && let Err(e) = self.begin_handshake(role)
        {
            return Poll::Ready(Err(e));
        }
        let (Some(engine), Some(session)) = (self.handshake.as_mut(), self.session.as_deref_mut())
        else {
            return Poll::Ready(Err(Error::Usage("no handshake in progress")));
        };
        let mut handshake = HandshakeOp::new(engine, session);
        let result = ready!(poll_operation(&mut handshake, &mut self.io, cx, op));
        Poll::Ready(self.finish_handshake(result))
    }

    fn poll_read_some(&mut self, cx: &mut Context<'_>, buf: &mut [u8], op: &mut OpState) -> Poll<Result<usize>> {
        if !op.is_started() {
            if let Err(e) = self.check_readable() {
                return Poll::Ready(Err(e));
            }
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
        }
        let Some(session) = self.session.as_deref_mut() else {
            return Poll::Ready(Err(Error::Usage("no security context")));
        };
        let mut read = ReadOp::new(&mut self.decrypt, session, buf);
        let result = ready!(poll_operation(&mut read, &mut self.io, cx, op));
        Poll::Ready(self.finish_io(result))
    }

    fn poll_write_some(&mut self, cx: &mut Context<'_>, buf: &[u8], op: &mut OpState) -> Poll<Result<usize>> {
        if !op.is_started() {
            if let Err(e) = self.check_writable() {
                return Poll::Ready(Err(e));
            }
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            ready!(self.poll_pending_record(cx))?;
        }
        let Some(session) = self.session.as_deref_mut() else {
            return Poll::Ready(Err(Error::Usage("no security context")));
        };
        let mut write = WriteOp::new(&mut self.encrypt, session, buf);
        let result = ready!(poll_operation(&mut write, &mut self.io, cx, op));
        Poll::Ready(self.finish_io(result))
    }

    /// Sends what is left of a record whose plaintext an earlier
    /// `poll_write` already reported as written.
    fn poll_pending_record(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if !self.encrypt.is_pending() {
            return Poll::Ready(Ok(()));
        }
        let Some(session) = self.session.as_deref_mut() else {
            return Poll::Ready(Err(Error::Usage("no security context")));
        };
        let mut op = std::mem::take(&mut self.write_op);
        let mut write = WriteOp::new(&mut self.encrypt, session, &[]);
        let poll = poll_operation(&mut write, &mut self.io, cx, &mut op);
        if poll.is_pending() {
            self.write_op = op;
        }
        let result = ready!(poll);
        Poll::Ready(self.finish_io(result).map(|_| ()))
    }

    fn poll_close(&mut self, cx: &mut Context<'_>, op: &mut OpState) -> Poll<Result<()>> {
        if !op.is_started() {
            ready!(self.poll_pending_record(cx))?;
            if let Err(e) = self.begin_shutdown() {
                return Poll::Ready(Err(e));
            }
        }
        let Some(session) = self.session.as_deref_mut() else {
            return Poll::Ready(Err(Error::Usage("no security context")));
        };
        let mut shutdown = ShutdownOp::new(&mut self.shutdown, session);
        let result = ready!(poll_operation(&mut shutdown, &mut self.io, cx, op));
        Poll::Ready(self.finish_shutdown(result))
    }
}

impl<S> fmt::Debug for SecureStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStream")
            .field("state", &self.state)
            .field("role", &self.credential.as_ref().map(|credential| credential.role()))
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

macro_rules! operation_future {
    ($(#[$meta:meta])* $name:ident<$lt:lifetime, S> { $($field:ident: $ty:ty),* } -> $output:ty,
     $kind:expr, |$this:ident, $cx:ident, $op:ident| $poll:expr) => {
        $(#[$meta])*
        #[must_use = "futures do nothing unless polled"]
        pub struct $name<$lt, S> {
            stream: &$lt mut SecureStream<S>,
            $($field: $ty,)*
            op: OpState,
            parked: Option<Result<$output>>,
            finished: bool,
        }

        impl<S: AsyncRead + AsyncWrite + Unpin> Future for $name<'_, S> {
            type Output = Result<$output>;

            fn poll(self: Pin<&mut Self>, $cx: &mut Context<'_>) -> Poll<Self::Output> {
                let $this = self.get_mut();
                if let Some(result) = $this.parked.take() {
                    $this.finished = true;
                    return Poll::Ready(result);
                }
                let mut $op = std::mem::take(&mut $this.op);
                let poll = $poll;
                let poll = defer_first_completion(poll, &$op, &mut $this.parked, $cx);
                $this.op = $op;
                if poll.is_ready() {
                    $this.finished = true;
                }
                poll
            }
        }

        impl<S> Drop for $name<'_, S> {
            fn drop(&mut self) {
                if self.op.is_started() && !self.finished {
                    self.stream.abort($kind);
                }
            }
        }
    };
}

operation_future!(
    /// Future returned by [`SecureStream::handshake_async`].
    Handshake<'a, S> { role: Role } -> (),
    OperationKind::Handshake,
    |this, cx, op| this.stream.poll_handshake(cx, this.role, &mut op)
);

operation_future!(
    /// Future returned by [`SecureStream::read_some_async`].
    ReadSome<'a, S> { buf: &'a mut [u8] } -> usize,
    OperationKind::Read,
    |this, cx, op| this.stream.poll_read_some(cx, this.buf, &mut op)
);

operation_future!(
    /// Future returned by [`SecureStream::write_some_async`].
    WriteSome<'a, S> { buf: &'a [u8] } -> usize,
    OperationKind::Write,
    |this, cx, op| this.stream.poll_write_some(cx, this.buf, &mut op)
);

operation_future!(
    /// Future returned by [`SecureStream::shutdown_async`].
    Shutdown<'a, S> {} -> (),
    OperationKind::Shutdown,
    |this, cx, op| this.stream.poll_close(cx, &mut op)
);

impl<S: Read + Write> Read for SecureStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_some(buf) {
            Err(Error::PeerClosed) => Ok(0),
            result => result.map_err(io::Error::from),
        }
    }
}

impl<S: Read + Write> Write for SecureStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_some(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io.flush()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for SecureStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut op = std::mem::take(&mut this.read_op);
        let poll = this.poll_read_some(cx, buf.initialize_unfilled(), &mut op);
        if poll.is_pending() {
            this.read_op = op;
        }
        match ready!(poll) {
            Ok(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Err(Error::PeerClosed) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for SecureStream<S> {
    /// Frames up to one record of `buf` and reports it written. A record
    /// the transport did not take yet is finished by the next write, flush
    /// or shutdown, so a cancelled caller never leaves stale bytes behind.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.check_writable()?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(this.poll_pending_record(cx))?;

        let Some(session) = this.session.as_deref_mut() else {
            return Poll::Ready(Err(Error::Usage("no security context").into()));
        };
        let consumed = match this.encrypt.encrypt(session, buf) {
            (EngineState::HasOutput, n) => n,
            _ => {
                let error = engine_failure(this.encrypt.take_error(), "encrypt");
                this.fail(&error);
                return Poll::Ready(Err(error.into()));
            }
        };
        if let Poll::Ready(Err(e)) = this.poll_pending_record(cx) {
            return Poll::Ready(Err(e.into()));
        }
        Poll::Ready(Ok(consumed))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_pending_record(cx))?;
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.state != StreamState::Closed {
            let mut op = std::mem::take(&mut this.shutdown_op);
            let poll = this.poll_close(cx, &mut op);
            if poll.is_pending() {
                this.shutdown_op = op;
            }
            ready!(poll)?;
        }

        match Pin::new(&mut this.io).poll_shutdown(cx) {
            Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::NotConnected => {
                // When trying to shutdown, not being connected is fine
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
