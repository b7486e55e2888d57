use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use bytes::BytesMut;
use rustls::pki_types::ServerName;

use super::tls_record::{self, HEADER_LEN, MAX_CIPHERTEXT_LEN, MAX_PLAINTEXT_LEN};
use super::{Credential, ProviderError, SecStatus, SecurityContext, SecurityProvider, StreamSizes};
use crate::buffer_set::{BufferKind, BufferSet};
use crate::context::{Role, TlsContext};
use crate::rustls_connection_util::{drain_rustls_connection, feed_rustls_connection};
use crate::rustls_util::{create_client_config, create_server_config};

/// Adapts rustls to the token and buffer contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustlsProvider;

impl SecurityProvider for RustlsProvider {
    fn acquire_credentials(
        &self,
        role: Role,
        context: &TlsContext,
    ) -> Result<Box<dyn Credential>, ProviderError> {
        let credential = match role {
            Role::Client => RustlsCredential::Client {
                config: Arc::new(create_client_config(context)?),
                verify_server_name: context.verifies_server_certificate(),
            },
            Role::Server => RustlsCredential::Server(Arc::new(create_server_config(context)?)),
        };
        Ok(Box::new(credential))
    }
}

enum RustlsCredential {
    Client {
        config: Arc<rustls::ClientConfig>,
        verify_server_name: bool,
    },
    Server(Arc<rustls::ServerConfig>),
}

impl Credential for RustlsCredential {
    fn role(&self) -> Role {
        match self {
            RustlsCredential::Client { .. } => Role::Client,
            RustlsCredential::Server(_) => Role::Server,
        }
    }

    fn initialize_context(
        &self,
        server_name: Option<&str>,
    ) -> Result<Box<dyn SecurityContext>, ProviderError> {
        let connection = match self {
            RustlsCredential::Client {
                config,
                verify_server_name,
            } => {
                let server_name = match server_name {
                    Some(name) => ServerName::try_from(name.to_string()).map_err(|e| {
                        ProviderError::Credentials(format!("invalid server name {name}: {e}"))
                    })?,
                    None if *verify_server_name => {
                        return Err(ProviderError::Credentials(
                            "server hostname required for certificate verification".to_string(),
                        ));
                    }
                    // only sent when verification is off, where no name is checked
                    None => ServerName::from(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                };
                rustls::ClientConnection::new(config.clone(), server_name)
                    .map(rustls::Connection::Client)
            }
            RustlsCredential::Server(config) => {
                rustls::ServerConnection::new(config.clone()).map(rustls::Connection::Server)
            }
        }
        .map_err(|e| ProviderError::Internal(format!("failed to create rustls connection: {e}")))?;

        Ok(Box::new(RustlsContext { connection }))
    }
}

struct RustlsContext {
    connection: rustls::Connection,
}

impl RustlsContext {
    fn feed_record(&mut self, record: &[u8]) -> Result<(), ProviderError> {
        feed_rustls_connection(&mut self.connection, record)
            .map_err(|e| ProviderError::Protocol(e.to_string()))
    }

    fn drain(&mut self) -> Result<BytesMut, ProviderError> {
        drain_rustls_connection(&mut self.connection)
            .map_err(|e| ProviderError::Internal(format!("failed to write TLS data: {e}")))
    }
}

impl SecurityContext for RustlsContext {
    fn initialize(
        &mut self,
        input: &mut BufferSet<2>,
        output: &mut BufferSet<2>,
    ) -> Result<SecStatus, ProviderError> {
        let mut remaining = input[0].take();
        let mut consumed = BytesMut::new();

        let fed = loop {
            if !self.connection.is_handshaking() {
                break Ok(());
            }
            let record_len = match tls_record::record_len(&remaining) {
                Ok(Some(record_len)) => record_len,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            let record = remaining.split_to(record_len);
            if let Err(e) = self.feed_record(&record) {
                break Err(e);
            }
            consumed.unsplit(record);
            if let Err(e) = self.connection.process_new_packets() {
                break Err(ProviderError::Protocol(e.to_string()));
            }
        };

        input[0].set(BufferKind::Token, consumed);
        if !remaining.is_empty() {
            input[1].set(BufferKind::Extra, remaining);
        }

        if let Err(e) = fed {
            // rustls queues an alert describing the failure
            if let Ok(alert) = self.drain() {
                output[1].set(BufferKind::Alert, alert);
            }
            return Err(e);
        }

        let token = self.drain()?;
        let produced = !token.is_empty();
        output[0].set(BufferKind::Token, token);

        let status = if !self.connection.is_handshaking() {
            SecStatus::Ok
        } else if produced || !input[0].is_empty() {
            SecStatus::ContinueNeeded
        } else {
            SecStatus::IncompleteMessage
        };
        Ok(status)
    }

    fn decrypt_message(&mut self, buffers: &mut BufferSet<4>) -> Result<SecStatus, ProviderError> {
        let mut remaining = buffers[0].take();
        let record_len = match tls_record::record_len(&remaining)? {
            Some(record_len) => record_len,
            None => {
                buffers[3].set(BufferKind::Extra, remaining);
                return Ok(SecStatus::IncompleteMessage);
            }
        };

        let mut record = remaining.split_to(record_len);
        self.feed_record(&record)?;
        let io_state = self
            .connection
            .process_new_packets()
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;

        let mut plaintext = BytesMut::zeroed(io_state.plaintext_bytes_to_read());
        self.connection
            .reader()
            .read_exact(&mut plaintext)
            .map_err(|e| ProviderError::Internal(format!("failed to read plaintext: {e}")))?;

        record.truncate(HEADER_LEN);
        buffers[0].set(BufferKind::Header, record);
        buffers[1].set(BufferKind::Data, plaintext);
        buffers[2].set(BufferKind::Trailer, BytesMut::new());
        if !remaining.is_empty() {
            buffers[3].set(BufferKind::Extra, remaining);
        }

        if io_state.peer_has_closed() && buffers[1].is_empty() {
            return Ok(SecStatus::ContextExpired);
        }
        if self.connection.wants_write() {
            log::trace!("rustls queued post-handshake output that will not be sent");
        }
        Ok(SecStatus::Ok)
    }

    fn encrypt_message(&mut self, buffers: &mut BufferSet<3>) -> Result<(), ProviderError> {
        let plaintext = buffers[1].take();
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(ProviderError::Internal(format!(
                "message of {} bytes exceeds maximum {MAX_PLAINTEXT_LEN}",
                plaintext.len()
            )));
        }
        self.connection
            .writer()
            .write_all(&plaintext)
            .map_err(|e| ProviderError::Internal(format!("failed to write plaintext: {e}")))?;

        let mut framed = self.drain()?;
        if framed.len() < HEADER_LEN {
            return Err(ProviderError::Internal(
                "rustls produced no record for plaintext".to_string(),
            ));
        }
        let ciphertext = framed.split_off(HEADER_LEN);
        buffers[0].set(BufferKind::Header, framed);
        buffers[1].set(BufferKind::Data, ciphertext);
        buffers[2].set(BufferKind::Trailer, BytesMut::new());
        Ok(())
    }

    fn stream_sizes(&self) -> StreamSizes {
        StreamSizes {
            header: HEADER_LEN,
            trailer: MAX_CIPHERTEXT_LEN - MAX_PLAINTEXT_LEN,
            max_message: MAX_PLAINTEXT_LEN,
        }
    }

    fn shutdown(
        &mut self,
        _input: &mut BufferSet<2>,
        output: &mut BufferSet<1>,
    ) -> Result<SecStatus, ProviderError> {
        self.connection.send_close_notify();
        output[0].set(BufferKind::Token, self.drain()?);
        Ok(SecStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_set::{decrypt_input, encrypt_input, handshake_output, token_input};
    use crate::context::Method;
    use crate::test_util::{insecure_client_context, server_context, verified_client_context};

    fn start(context: &TlsContext, role: Role) -> Box<dyn SecurityContext> {
        RustlsProvider
            .acquire_credentials(role, context)
            .unwrap()
            .initialize_context(Some("localhost"))
            .unwrap()
    }

    /// Runs one initialize call, returning status, token and leftover input.
    fn exchange(
        context: &mut dyn SecurityContext,
        staged: BytesMut,
    ) -> (SecStatus, BytesMut, Option<BytesMut>) {
        let mut input = token_input(staged);
        let mut output = handshake_output();
        let status = context.initialize(&mut input, &mut output).unwrap();
        (
            status,
            output.take(BufferKind::Token).unwrap(),
            input.take(BufferKind::Extra),
        )
    }

    #[test]
    fn test_handshake_and_record_splitting() {
        let mut client = start(&insecure_client_context(Method::Tls13), Role::Client);
        let mut server = start(&server_context(Method::Tls13), Role::Server);

        let (status, hello, _) = exchange(client.as_mut(), BytesMut::new());
        assert_eq!(status, SecStatus::ContinueNeeded);

        // a partial ClientHello is reported as incomplete and handed back
        let partial = BytesMut::from(&hello[..3]);
        let (status, token, extra) = exchange(server.as_mut(), partial);
        assert_eq!(status, SecStatus::IncompleteMessage);
        assert!(token.is_empty());
        assert_eq!(extra.as_deref(), Some(&hello[..3]));

        let (status, server_flight, _) = exchange(server.as_mut(), hello);
        assert_eq!(status, SecStatus::ContinueNeeded);

        let (status, client_finished, extra) = exchange(client.as_mut(), server_flight);
        assert_eq!(status, SecStatus::Ok);
        assert!(extra.is_none());

        let (status, tickets, _) = exchange(server.as_mut(), client_finished);
        assert_eq!(status, SecStatus::Ok);

        // two records in one buffer decrypt one at a time
        let mut ciphertext = tickets;
        for message in [&b"first"[..], &b"second"[..]] {
            let mut framed = encrypt_input(BytesMut::from(message), 5, 0);
            server.encrypt_message(&mut framed).unwrap();
            assert_eq!(framed[0].len(), HEADER_LEN);
            for slot in framed.iter() {
                ciphertext.extend_from_slice(slot.data());
            }
        }

        let mut received = vec![];
        while !ciphertext.is_empty() {
            let mut buffers = decrypt_input(ciphertext.split());
            assert_eq!(client.decrypt_message(&mut buffers).unwrap(), SecStatus::Ok);
            if let Some(data) = buffers.find(BufferKind::Data)
                && !data.is_empty()
            {
                received.push(data.data().to_vec());
            }
            ciphertext = buffers.take(BufferKind::Extra).unwrap_or_default();
        }
        assert_eq!(received, [b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_close_notify_expires_context() {
        let mut client = start(&insecure_client_context(Method::Tls12), Role::Client);
        let mut server = start(&server_context(Method::Tls12), Role::Server);

        let mut to_server = exchange(client.as_mut(), BytesMut::new()).1;
        let mut client_done = false;
        let mut server_done = false;
        while !(client_done && server_done) {
            let (status, to_client, _) = exchange(server.as_mut(), to_server);
            server_done = status == SecStatus::Ok;
            let (status, token, _) = exchange(client.as_mut(), to_client);
            client_done = status == SecStatus::Ok;
            to_server = token;
        }
        if !to_server.is_empty() {
            exchange(server.as_mut(), to_server);
        }

        let mut input = token_input(BytesMut::new());
        let mut output = crate::buffer_set::shutdown_output();
        server.shutdown(&mut input, &mut output).unwrap();
        let close = output.take(BufferKind::Token).unwrap();
        assert!(!close.is_empty());

        let mut buffers = decrypt_input(close);
        assert_eq!(
            client.decrypt_message(&mut buffers).unwrap(),
            SecStatus::ContextExpired
        );
    }

    #[test]
    fn test_garbage_handshake_produces_alert() {
        let mut server = start(&server_context(Method::SystemDefault), Role::Server);
        let mut input = token_input(BytesMut::from(&[22u8, 3, 1, 0, 4, 1, 0, 0, 0][..]));
        let mut output = handshake_output();
        assert!(matches!(
            server.initialize(&mut input, &mut output),
            Err(ProviderError::Protocol(_))
        ));
        assert!(!output[1].is_empty());
        assert_eq!(output[1].kind(), BufferKind::Alert);
    }

    #[test]
    fn test_verified_client_needs_hostname() {
        let credential = RustlsProvider
            .acquire_credentials(Role::Client, &verified_client_context(Method::Tls13))
            .unwrap();
        assert!(matches!(
            credential.initialize_context(None),
            Err(ProviderError::Credentials(_))
        ));
        assert!(credential.initialize_context(Some("localhost")).is_ok());

        let insecure = RustlsProvider
            .acquire_credentials(Role::Client, &insecure_client_context(Method::Tls13))
            .unwrap();
        assert!(insecure.initialize_context(None).is_ok());
    }
}
