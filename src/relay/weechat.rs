//! WeeChat relay connection: TLS, handshake, event loop and reconnection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ConstantBuilder};
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::error::{RelayError, RelayResult};
use crate::common::{Buffer, RelayEvent};
use crate::config::types::RelayConfig;
use crate::relay::buffers::BufferRegistry;
use crate::relay::protocol::{
    new_relay_connection, Command, RelayConnection, RelayMessage, BUFFERS_ID,
};
use crate::relay::SourceRelay;

/// Time allowed for the `_pong` reply and the buffer listing.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte stream the relay can run over (plain TCP or TLS).
pub trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayStream for T {}

pub type RelaySession = RelayConnection<Box<dyn RelayStream>>;

/// Handle used by the bridge. Cheap to share.
pub struct WeeChatRelay {
    registry: BufferRegistry,
    commands: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

/// Owns the socket side: connects, serves and reconnects.
pub struct RelayConnector {
    config: RelayConfig,
    registry: BufferRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<RelayEvent>,
    connected: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl WeeChatRelay {
    /// Create the bridge handle and its connector. Nothing connects yet.
    pub fn new(
        config: RelayConfig,
        events: mpsc::Sender<RelayEvent>,
        reconnect_delay: Duration,
    ) -> (Arc<Self>, RelayConnector) {
        let registry = BufferRegistry::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let relay = Arc::new(Self {
            registry: registry.clone(),
            commands: commands_tx,
            connected: Arc::clone(&connected),
        });
        let connector = RelayConnector {
            config,
            registry,
            commands: commands_rx,
            events,
            connected,
            reconnect_delay,
        };
        (relay, connector)
    }
}

#[async_trait]
impl SourceRelay for WeeChatRelay {
    fn list_buffers(&self) -> Vec<Buffer> {
        self.registry.list()
    }

    fn buffer_by_pointer(&self, pointer: &str) -> Option<Buffer> {
        self.registry.get(pointer)
    }

    async fn wait_for_buffer(&self, pointer: &str, timeout: Duration) -> Option<Buffer> {
        self.registry.wait_for(pointer, timeout).await
    }

    async fn send_input(&self, full_name: &str, text: &str) -> RelayResult<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(RelayError::NotConnected);
        }

        // One command per line; a newline would end the command early.
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            self.commands
                .send(Command::Input {
                    buffer: full_name.to_string(),
                    text: line.to_string(),
                })
                .map_err(|_| RelayError::NotConnected)?;
        }
        Ok(())
    }
}

impl RelayConnector {
    /// Connect and authenticate once. Fills the buffer registry.
    pub async fn connect(&mut self) -> RelayResult<RelaySession> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        info!(host, port, tls = self.config.use_tls, "Connecting to WeeChat relay");

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| RelayError::ConnectFailed {
                host: host.to_string(),
                port,
                source,
            })?;

        let stream: Box<dyn RelayStream> = if self.config.use_tls {
            Box::new(tls_connect(tcp, host).await?)
        } else {
            Box::new(tcp)
        };

        let mut session = new_relay_connection(stream);
        let buffers = handshake(&mut session, &self.config.password).await?;
        info!(buffers = buffers.len(), "Logged in to WeeChat relay");
        self.registry.replace_all(buffers);

        Ok(session)
    }

    /// Serve `session`, reconnecting with a fixed delay until cancelled.
    pub async fn run(mut self, session: RelaySession, cancel: CancellationToken) {
        let mut session = Some(session);
        let mut delays = reconnect_backoff(self.reconnect_delay);

        loop {
            if let Some(active) = session.take() {
                self.connected.store(true, Ordering::Release);
                let result = self.serve(active, &cancel).await;
                self.connected.store(false, Ordering::Release);

                match result {
                    Ok(()) => {
                        info!("Relay connection closed");
                        return;
                    }
                    Err(e) => warn!("Relay connection lost: {}", e),
                }
            }

            let delay = delays.next().unwrap_or(self.reconnect_delay);
            info!("Reconnecting to relay in {:.1} seconds...", delay.as_secs_f64());
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect().await {
                Ok(active) => session = Some(active),
                Err(e) => warn!("Relay reconnect failed: {}", e),
            }
        }
    }

    /// Pump commands out and events in. `Ok` means an orderly stop.
    async fn serve<S>(
        &mut self,
        mut session: RelayConnection<S>,
        cancel: &CancellationToken,
    ) -> RelayResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = session.send(Command::Quit).await {
                        debug!("Failed to send quit: {}", e);
                    }
                    return Ok(());
                }
                command = self.commands.recv() => match command {
                    Some(command) => session.send(command).await?,
                    None => return Ok(()),
                },
                message = session.next() => match message {
                    Some(Ok(message)) => {
                        let Some(event) = message.to_event() else {
                            continue;
                        };
                        self.track(&event);
                        if self.events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(RelayError::ConnectionClosed),
                },
            }
        }
    }

    fn track(&self, event: &RelayEvent) {
        match event {
            RelayEvent::BufferOpened(buffer) => self.registry.insert(buffer.clone()),
            RelayEvent::BufferClosing(buffer) => self.registry.remove(&buffer.pointer),
            RelayEvent::LineAdded { .. } => {}
        }
    }
}

fn reconnect_backoff(delay: Duration) -> impl Iterator<Item = Duration> {
    ConstantBuilder::default()
        .with_delay(delay)
        .without_max_times()
        .build()
}

async fn tls_connect(
    tcp: TcpStream,
    host: &str,
) -> RelayResult<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        debug!("Skipping native certificate: {}", error);
    }
    roots.add_parsable_certificates(native.certs);

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| RelayError::Tls {
        message: e.to_string(),
    })?
    .with_root_certificates(roots)
    .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string()).map_err(|e| RelayError::Tls {
        message: e.to_string(),
    })?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| RelayError::Tls {
            message: e.to_string(),
        })
}

/// Authenticate, list buffers and enable sync.
async fn handshake<S>(session: &mut RelayConnection<S>, password: &str) -> RelayResult<Vec<Buffer>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session
        .send(Command::Init {
            password: password.to_string(),
        })
        .await?;
    session.send(Command::Ping).await?;

    // A wrong password makes the relay drop the connection without a reply.
    let auth_failed = |reason: &str| RelayError::AuthFailed {
        reason: format!("{} (check relay.password)", reason),
    };
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_id(session, "_pong")).await {
        Ok(Ok(_)) => {}
        Ok(Err(RelayError::ConnectionClosed)) => return Err(auth_failed("connection closed")),
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(auth_failed("no pong received")),
    }

    session.send(Command::ListBuffers).await?;
    let listing = tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_id(session, BUFFERS_ID))
        .await
        .map_err(|_| RelayError::Timeout)??;

    session.send(Command::Sync).await?;
    Ok(listing.buffers())
}

async fn wait_for_id<S>(
    session: &mut RelayConnection<S>,
    id: &str,
) -> RelayResult<RelayMessage>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = session.next().await {
        let message = message?;
        if message.id == id {
            return Ok(message);
        }
        debug!(id = %message.id, "Ignoring relay message during handshake");
    }
    Err(RelayError::ConnectionClosed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn frame(id: &str, body: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut data = BytesMut::new();
        data.put_i32(id.len() as i32);
        data.put_slice(id.as_bytes());
        body(&mut data);

        let mut out = Vec::new();
        out.put_u32((5 + data.len()) as u32);
        out.put_u8(0);
        out.put_slice(&data);
        out
    }

    fn put_str(buf: &mut BytesMut, s: &str) {
        buf.put_i32(s.len() as i32);
        buf.put_slice(s.as_bytes());
    }

    fn buffer_listing() -> Vec<u8> {
        frame(BUFFERS_ID, |b| {
            b.put_slice(b"hda");
            put_str(b, "buffer");
            put_str(b, "full_name:str");
            b.put_i32(1);
            b.put_u8(2);
            b.put_slice(b"1a");
            put_str(b, "irc.libera.#general");
        })
    }

    #[tokio::test]
    async fn test_handshake_lists_buffers() {
        let (client, server) = duplex(4096);
        let mut session = new_relay_connection(client);

        let server_task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();

            assert_eq!(
                lines.next_line().await.unwrap().unwrap(),
                "init password=secret,compression=off"
            );
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "ping");
            write.write_all(&frame("_pong", |_| {})).await.unwrap();

            assert_eq!(
                lines.next_line().await.unwrap().unwrap(),
                "(buffers) hdata buffer:gui_buffers(*) full_name"
            );
            write.write_all(&buffer_listing()).await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "sync");
        });

        let buffers = handshake(&mut session, "secret").await.unwrap();
        server_task.await.unwrap();

        assert_eq!(
            buffers,
            vec![Buffer {
                pointer: "1a".to_string(),
                full_name: "irc.libera.#general".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_handshake_rejected_password() {
        let (client, server) = duplex(4096);
        let mut session = new_relay_connection(client);

        // Relay reads the commands and hangs up.
        tokio::spawn(async move {
            let mut lines = BufReader::new(server).lines();
            let _ = lines.next_line().await;
            let _ = lines.next_line().await;
        });

        let result = handshake(&mut session, "wrong").await;
        assert!(matches!(result, Err(RelayError::AuthFailed { .. })));
    }

    #[tokio::test]
    async fn test_send_input_requires_connection() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let config = RelayConfig {
            host: "localhost".to_string(),
            port: 9001,
            password: "pw".to_string(),
            use_tls: false,
        };
        let (relay, connector) = WeeChatRelay::new(config, events_tx, Duration::from_secs(5));

        assert!(matches!(
            relay.send_input("irc.libera.#general", "hi").await,
            Err(RelayError::NotConnected)
        ));

        connector.connected.store(true, Ordering::Release);
        relay
            .send_input("irc.libera.#general", "one\n\ntwo")
            .await
            .unwrap();

        let mut commands = connector.commands;
        assert_eq!(
            commands.recv().await,
            Some(Command::Input {
                buffer: "irc.libera.#general".to_string(),
                text: "one".to_string(),
            })
        );
        assert_eq!(
            commands.recv().await,
            Some(Command::Input {
                buffer: "irc.libera.#general".to_string(),
                text: "two".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_serve_forwards_events_and_tracks_buffers() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let config = RelayConfig {
            host: "localhost".to_string(),
            port: 9001,
            password: "pw".to_string(),
            use_tls: false,
        };
        let (relay, mut connector) = WeeChatRelay::new(config, events_tx, Duration::from_secs(5));

        let (client, mut server) = duplex(4096);
        let opened = frame("_buffer_opened", |b| {
            b.put_slice(b"hda");
            put_str(b, "buffer");
            put_str(b, "full_name:str");
            b.put_i32(1);
            b.put_u8(2);
            b.put_slice(b"2b");
            put_str(b, "irc.libera.nick");
        });
        server.write_all(&opened).await.unwrap();
        drop(server);

        let cancel = CancellationToken::new();
        let result = connector.serve(new_relay_connection(client), &cancel).await;
        assert!(matches!(result, Err(RelayError::ConnectionClosed)));

        assert!(matches!(
            events_rx.recv().await,
            Some(RelayEvent::BufferOpened(Buffer { ref full_name, .. })) if full_name == "irc.libera.nick"
        ));
        assert_eq!(
            relay.buffer_by_pointer("2b").map(|b| b.full_name),
            Some("irc.libera.nick".to_string())
        );
    }
}
