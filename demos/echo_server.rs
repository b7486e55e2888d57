//! Accepts TCP connections, performs the server side of the handshake and
//! echoes plaintext back until the peer closes.
//!
//! Usage: echo_server <config.yaml>
//!
//! ```yaml
//! address: 127.0.0.1:8443
//! tls:
//!   role: server
//!   cert: certs/localhost.crt
//!   key: certs/localhost.key
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use securestream::config::{StreamConfig, load_config};
use securestream::{KeyStore, Role, SecureStream, TlsContext};

#[derive(Debug, Deserialize)]
struct EchoConfig {
    address: SocketAddr,
    tls: StreamConfig,
}

fn print_usage_and_exit(arg0: String) -> ! {
    eprintln!("Usage: {arg0} <config.yaml>");
    std::process::exit(1);
}

async fn echo(tcp: TcpStream, context: Arc<TlsContext>) -> securestream::Result<()> {
    let mut stream = SecureStream::new(tcp, context);
    stream.handshake_async(Role::Server).await?;

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match stream.read_some_async(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.is_peer_closed() => break,
            Err(e) => return Err(e),
        };
        debug!("echoing {n} bytes");
        stream.write_all(&buf[..n]).await?;
        stream.flush().await?;
    }

    stream.shutdown_async().await
}

#[tokio::main]
async fn main() {
    env_logger::builder()
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            let level_style = buf.default_level_style(record.level());
            let sanitized_args = format!("{}", record.args())
                .chars()
                .map(|c| {
                    if c.is_ascii_graphic() || c == ' ' {
                        c
                    } else {
                        '?'
                    }
                })
                .collect::<String>();

            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}] {}",
                timestamp,
                record.level(),
                record.target(),
                sanitized_args
            )
        })
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let arg0 = args.remove(0);
    if args.len() != 1 {
        print_usage_and_exit(arg0);
    }

    let config: EchoConfig = match load_config(&args[0]).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            print_usage_and_exit(arg0);
        }
    };
    if config.tls.role != Role::Server {
        eprintln!("tls.role must be server");
        std::process::exit(1);
    }

    let mut key_store = KeyStore::new();
    let context = match config.tls.build_context(&mut key_store).await {
        Ok(context) => Arc::new(context),
        Err(e) => {
            eprintln!("Failed to build TLS context: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(config.address).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {e}", config.address);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", config.address);

    loop {
        let (tcp, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept failed: {e}");
                continue;
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            warn!("Failed to set TCP nodelay for {addr}: {e}");
        }

        let context = context.clone();
        tokio::spawn(async move {
            match echo(tcp, context).await {
                Ok(()) => debug!("{addr} finished"),
                Err(e) => warn!("{addr} finished with error: {e}"),
            }
        });
    }
}
