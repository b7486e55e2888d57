//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::buffer_set::{BufferKind, BufferSet};
use crate::context::{Method, Role, TlsContext};
use crate::key_store::{Certificate, FileFormat, Identity, KeyStore};
use crate::provider::{
    Credential, ProviderError, SecStatus, SecurityContext, SecurityProvider, StreamSizes,
};
use crate::stream::SecureStream;

pub(crate) const CERT_PEM: &[u8] = include_bytes!("testdata/localhost.crt");
pub(crate) const KEY_PEM: &[u8] = include_bytes!("testdata/localhost.key");

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn identity() -> Identity {
    let mut store = KeyStore::new();
    store.import_private_key("localhost", KEY_PEM, FileFormat::Pem).unwrap();
    let certificate = Certificate::from_bytes(CERT_PEM, FileFormat::Pem).unwrap();
    store.assign_private_key(&certificate, "localhost").unwrap()
}

pub(crate) fn server_context(method: Method) -> TlsContext {
    let mut context = TlsContext::new(method);
    context.use_certificate(identity());
    context
}

pub(crate) fn insecure_client_context(method: Method) -> TlsContext {
    let mut context = TlsContext::new(method);
    context.verify_server_certificate(false);
    context
}

pub(crate) fn verified_client_context(method: Method) -> TlsContext {
    let mut context = TlsContext::new(method);
    context.add_certificate_authority(Certificate::from_bytes(CERT_PEM, FileFormat::Pem).unwrap());
    context
}

/// Handshakes a client over `client_io` with a server over `server_io`.
pub(crate) async fn connected_pair<C, S>(
    client_io: C,
    server_io: S,
    method: Method,
) -> (SecureStream<C>, SecureStream<S>)
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = SecureStream::new(client_io, insecure_client_context(method).into());
    client.set_server_hostname("localhost");
    let mut server = SecureStream::new(server_io, server_context(method).into());

    let (client_result, server_result) = tokio::join!(
        client.handshake_async(Role::Client),
        server.handshake_async(Role::Server)
    );
    client_result.unwrap();
    server_result.unwrap();
    (client, server)
}

/// Counts completed transport reads and bytes written.
pub(crate) struct CountingIo<T> {
    inner: T,
    pub reads: usize,
    pub written: usize,
}

impl<T> CountingIo<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            inner,
            reads: 0,
            written: 0,
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for CountingIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if result.is_ready() {
            this.reads += 1;
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for CountingIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = result {
            this.written += n;
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Delivers at most one byte per read.
pub(crate) struct TrickleIo<T> {
    inner: T,
}

impl<T> TrickleIo<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TrickleIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let mut byte = [0u8; 1];
        let mut one = ReadBuf::new(&mut byte);
        let result = Pin::new(&mut self.get_mut().inner).poll_read(cx, &mut one);
        if let Poll::Ready(Ok(())) = result {
            buf.put_slice(one.filled());
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TrickleIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// A transport whose reads always fail.
#[derive(Default)]
pub(crate) struct FailingIo {
    pub written: usize,
}

fn reset_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by test")
}

impl Read for FailingIo {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(reset_error())
    }
}

impl Write for FailingIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for FailingIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(reset_error()))
    }
}

impl AsyncWrite for FailingIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().written += buf.len();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const RECORD_DATA: u8 = 0x17;
const RECORD_CONTROL: u8 = 0x16;
const RECORD_CLOSE: u8 = 0x15;
const RECORD_HEADER_LEN: usize = 3;
const RECORD_TRAILER: u8 = 0xee;
const MASK: u8 = 0x5a;

fn record(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut record = vec![kind];
    record.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    record.extend(payload.iter().map(|b| b ^ MASK));
    record.push(RECORD_TRAILER);
    record
}

/// A record the scripted context decrypts to `payload`.
pub(crate) fn data_record(payload: &[u8]) -> Vec<u8> {
    record(RECORD_DATA, payload)
}

/// A record without application data.
pub(crate) fn control_record() -> Vec<u8> {
    record(RECORD_CONTROL, &[])
}

pub(crate) fn close_record() -> Vec<u8> {
    record(RECORD_CLOSE, &[])
}

/// One scripted answer to `initialize` or `shutdown`.
///
/// The step is only taken once at least `consume` bytes are staged; before
/// that the context reports an incomplete message.
pub(crate) struct HandshakeStep {
    consume: usize,
    token: Vec<u8>,
    result: Result<SecStatus, ProviderError>,
    alert: Vec<u8>,
}

impl HandshakeStep {
    pub(crate) fn reply(consume: usize, token: &[u8], status: SecStatus) -> Self {
        Self {
            consume,
            token: token.to_vec(),
            result: Ok(status),
            alert: vec![],
        }
    }

    pub(crate) fn fail(alert: &[u8], error: ProviderError) -> Self {
        Self {
            consume: 0,
            token: vec![],
            result: Err(error),
            alert: alert.to_vec(),
        }
    }
}

/// Deterministic security context with a trivial record format:
/// kind, big-endian length, masked payload, one trailer byte.
pub(crate) struct ScriptedContext {
    pub handshake: VecDeque<HandshakeStep>,
    pub shutdown: VecDeque<HandshakeStep>,
    pub max_message: usize,
    pub fail_encrypt: bool,
    pub initialize_calls: usize,
    pub decrypt_calls: usize,
    pub shutdown_calls: usize,
    pub seen_inputs: Vec<Vec<u8>>,
}

impl ScriptedContext {
    pub(crate) fn new() -> Self {
        Self {
            handshake: VecDeque::new(),
            shutdown: VecDeque::new(),
            max_message: 8,
            fail_encrypt: false,
            initialize_calls: 0,
            decrypt_calls: 0,
            shutdown_calls: 0,
            seen_inputs: vec![],
        }
    }
}

/// Applies the next step of `script`, filling `input` and the TOKEN slot
/// of `output`. Returns the alert to report on failure.
fn run_step(
    script: &mut VecDeque<HandshakeStep>,
    input: &mut BufferSet<2>,
    token_out: &mut BytesMut,
) -> Result<SecStatus, (ProviderError, Vec<u8>)> {
    let mut staged = input[0].take();
    let step = match script.pop_front() {
        Some(step) if staged.len() >= step.consume => step,
        Some(step) => {
            script.push_front(step);
            if !staged.is_empty() {
                input[1].set(BufferKind::Extra, staged);
            }
            return Ok(SecStatus::IncompleteMessage);
        }
        None => return Err((ProviderError::Internal("script exhausted".to_string()), vec![])),
    };
    let consumed = staged.split_to(step.consume);
    input[0].set(BufferKind::Token, consumed);
    if !staged.is_empty() {
        input[1].set(BufferKind::Extra, staged);
    }
    let status = step.result.map_err(|e| (e, step.alert))?;
    token_out.extend_from_slice(&step.token);
    Ok(status)
}

impl SecurityContext for ScriptedContext {
    fn initialize(
        &mut self,
        input: &mut BufferSet<2>,
        output: &mut BufferSet<2>,
    ) -> Result<SecStatus, ProviderError> {
        self.initialize_calls += 1;
        self.seen_inputs.push(input[0].data().to_vec());
        let mut token = BytesMut::new();
        match run_step(&mut self.handshake, input, &mut token) {
            Ok(status) => {
                output[0].set(BufferKind::Token, token);
                Ok(status)
            }
            Err((error, alert)) => {
                output[1].set(BufferKind::Alert, BytesMut::from(&alert[..]));
                Err(error)
            }
        }
    }

    fn decrypt_message(&mut self, buffers: &mut BufferSet<4>) -> Result<SecStatus, ProviderError> {
        self.decrypt_calls += 1;
        let mut data = buffers[0].take();
        if data.len() < RECORD_HEADER_LEN {
            if !data.is_empty() {
                buffers[3].set(BufferKind::Extra, data);
            }
            return Ok(SecStatus::IncompleteMessage);
        }
        if ![RECORD_DATA, RECORD_CONTROL, RECORD_CLOSE].contains(&data[0]) {
            return Err(ProviderError::Protocol(format!("bad record type {}", data[0])));
        }
        let len = u16::from_be_bytes([data[1], data[2]]) as usize;
        let total = RECORD_HEADER_LEN + len + 1;
        if data.len() < total {
            buffers[3].set(BufferKind::Extra, data);
            return Ok(SecStatus::IncompleteMessage);
        }

        let mut payload = data.split_to(total);
        let header = payload.split_to(RECORD_HEADER_LEN);
        let trailer = payload.split_off(len);
        if trailer[..] != [RECORD_TRAILER] {
            return Err(ProviderError::Protocol("bad record trailer".to_string()));
        }
        for byte in payload.iter_mut() {
            *byte ^= MASK;
        }
        let kind = header[0];
        buffers[0].set(BufferKind::Header, header);
        buffers[1].set(BufferKind::Data, if kind == RECORD_DATA { payload } else { BytesMut::new() });
        buffers[2].set(BufferKind::Trailer, trailer);
        if !data.is_empty() {
            buffers[3].set(BufferKind::Extra, data);
        }
        Ok(if kind == RECORD_CLOSE {
            SecStatus::ContextExpired
        } else {
            SecStatus::Ok
        })
    }

    fn encrypt_message(&mut self, buffers: &mut BufferSet<3>) -> Result<(), ProviderError> {
        if self.fail_encrypt {
            return Err(ProviderError::Protocol("encryption refused".to_string()));
        }
        let plaintext = buffers[1].take();
        let framed = record(RECORD_DATA, &plaintext);
        buffers[0].set(BufferKind::Header, BytesMut::from(&framed[..RECORD_HEADER_LEN]));
        buffers[1].set(
            BufferKind::Data,
            BytesMut::from(&framed[RECORD_HEADER_LEN..framed.len() - 1]),
        );
        buffers[2].set(BufferKind::Trailer, BytesMut::from(&[RECORD_TRAILER][..]));
        Ok(())
    }

    fn stream_sizes(&self) -> StreamSizes {
        StreamSizes {
            header: RECORD_HEADER_LEN,
            trailer: 1,
            max_message: self.max_message,
        }
    }

    fn shutdown(
        &mut self,
        input: &mut BufferSet<2>,
        output: &mut BufferSet<1>,
    ) -> Result<SecStatus, ProviderError> {
        self.shutdown_calls += 1;
        if self.shutdown.is_empty() {
            output[0].set(BufferKind::Token, BytesMut::from(&close_record()[..]));
            return Ok(SecStatus::Ok);
        }
        let mut token = BytesMut::new();
        let status = run_step(&mut self.shutdown, input, &mut token).map_err(|(error, _)| error)?;
        output[0].set(BufferKind::Token, token);
        Ok(status)
    }
}

/// Blocking and async transport over an in-memory script, for driver tests.
pub(crate) struct MemoryIo {
    pub incoming: VecDeque<u8>,
    pub outgoing: Vec<u8>,
    pub max_read: usize,
    pub max_write: usize,
}

impl MemoryIo {
    pub(crate) fn new(incoming: &[u8]) -> Self {
        Self {
            incoming: incoming.iter().copied().collect(),
            outgoing: vec![],
            max_read: usize::MAX,
            max_write: usize::MAX,
        }
    }
}

impl Read for MemoryIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.max_read).min(self.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.max_write);
        self.outgoing.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for MemoryIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = this.read(buf.initialize_unfilled())?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemoryIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.get_mut().write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Provider whose contexts complete the handshake on a fixed greeting.
#[derive(Debug)]
pub(crate) struct ScriptedProvider {
    pub greeting: &'static [u8],
}

struct ScriptedCredential {
    role: Role,
    greeting: &'static [u8],
}

impl SecurityProvider for ScriptedProvider {
    fn acquire_credentials(
        &self,
        role: Role,
        _context: &TlsContext,
    ) -> Result<Box<dyn Credential>, ProviderError> {
        Ok(Box::new(ScriptedCredential {
            role,
            greeting: self.greeting,
        }))
    }
}

impl Credential for ScriptedCredential {
    fn role(&self) -> Role {
        self.role
    }

    fn initialize_context(
        &self,
        _server_name: Option<&str>,
    ) -> Result<Box<dyn SecurityContext>, ProviderError> {
        let mut context = ScriptedContext::new();
        let step = match self.role {
            Role::Client => HandshakeStep::reply(0, self.greeting, SecStatus::Ok),
            Role::Server => HandshakeStep::reply(self.greeting.len(), b"", SecStatus::Ok),
        };
        context.handshake.push_back(step);
        Ok(Box::new(context))
    }
}
