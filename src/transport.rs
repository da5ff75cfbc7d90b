// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Transport layer for the agentlink SDK.
//!
//! A [`Transport`] owns one duplex connection. It tracks the
//! [`ConnectionStatus`], queues outbound frames while disconnected, and runs a
//! background reader that decodes inbound frames and reports them as
//! [`TransportEvent`]s on a channel.
//!
//! The physical link sits behind the [`Connector`] seam. [`WebSocketConnector`]
//! is the production implementation; [`memory::MemoryConnector`] wires a
//! transport to an in-process peer.

use crate::error::{AgentError, ErrorKind, Result};
use crate::protocol::Message;
use crate::types::{ConnectOptions, ConnectionStatus};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Boxed future returned by the connection traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Writer and reader halves of an open connection.
pub type FramePair = (Box<dyn FrameWriter>, Box<dyn FrameReader>);

// =============================================================================
// Connection Traits
// =============================================================================

/// Outbound half of a connection. One text frame per message.
pub trait FrameWriter: Send {
    /// Write one frame.
    fn write_frame<'a>(&'a mut self, frame: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Close the connection.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Inbound half of a connection.
pub trait FrameReader: Send {
    /// Read the next frame. `None` means the remote side closed.
    ///
    /// A protocol error rejects one frame only; the reader stays usable.
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Opens connections.
pub trait Connector: Send + Sync {
    /// Open a connection to `target`, authenticating with its credential.
    fn connect<'a>(&'a self, target: &'a ConnectOptions) -> BoxFuture<'a, Result<FramePair>>;
}

// =============================================================================
// WebSocket Connector
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket, passing the credential as the `token` query parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

fn map_ws_error(err: WsError) -> AgentError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if matches!(status.as_u16(), 401 | 403) {
                AgentError::Authentication(format!("server responded with {status}"))
            } else {
                AgentError::connection(format!("handshake rejected with {status}"))
            }
        }
        WsError::Io(e) => AgentError::Io(e),
        WsError::ConnectionClosed | WsError::AlreadyClosed => AgentError::ConnectionClosed,
        other => AgentError::connection(other.to_string()),
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, target: &'a ConnectOptions) -> BoxFuture<'a, Result<FramePair>> {
        Box::pin(async move {
            let url = target.target_url()?;
            debug!(host = ?url.host_str(), "Opening WebSocket");

            let (stream, _response) = connect_async(url.as_str()).await.map_err(map_ws_error)?;
            let (sink, stream) = stream.split();

            let writer: Box<dyn FrameWriter> = Box::new(WebSocketWriter { sink });
            let reader: Box<dyn FrameReader> = Box::new(WebSocketReader { stream });
            Ok((writer, reader))
        })
    }
}

struct WebSocketWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

impl FrameWriter for WebSocketWriter {
    fn write_frame<'a>(&'a mut self, frame: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.sink
                .send(WsMessage::Text(frame.to_string()))
                .await
                .map_err(map_ws_error)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.sink.close().await {
                Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(map_ws_error(e)),
            }
        })
    }
}

struct WebSocketReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader for WebSocketReader {
    fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    None => return Ok(None),
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                    Some(Ok(WsMessage::Binary(data))) => {
                        return String::from_utf8(data).map(Some).map_err(|e| {
                            AgentError::protocol(format!("Binary frame is not UTF-8: {e}"))
                        })
                    }
                    Some(Ok(WsMessage::Close(_))) => return Ok(None),
                    // Pings are answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                        return Ok(None)
                    }
                    Some(Err(e)) => return Err(map_ws_error(e)),
                }
            }
        })
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Something observable happened on the connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded inbound message.
    Message(Message),
    /// The remote side closed the connection.
    Closed,
    /// Connect failure, undecodable frame, or read failure.
    Error(AgentError),
    /// The connection status changed.
    StatusChanged(ConnectionStatus),
}

struct Link {
    status: ConnectionStatus,
    writer: Option<Box<dyn FrameWriter>>,
    outbound: VecDeque<String>,
    /// Bumped on every connect and disconnect so a stale reader cannot
    /// close a newer connection.
    generation: u64,
}

impl Link {
    fn transition(
        &mut self,
        status: ConnectionStatus,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        if self.status != status {
            debug!(from = ?self.status, to = ?status, "Connection status changed");
            self.status = status;
            let _ = events.send(TransportEvent::StatusChanged(status));
        }
    }
}

/// One duplex connection with outbound queuing.
pub struct Transport {
    options: ConnectOptions,
    connector: Arc<dyn Connector>,
    link: Arc<Mutex<Link>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    /// Serializes connect and disconnect.
    lifecycle: Mutex<()>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Transport {
    /// Create a disconnected transport and the receiver for its events.
    pub fn new(
        options: ConnectOptions,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            options,
            connector,
            link: Arc::new(Mutex::new(Link {
                status: ConnectionStatus::Disconnected,
                writer: None,
                outbound: VecDeque::new(),
                generation: 0,
            })),
            events,
            lifecycle: Mutex::new(()),
            shutdown_tx: Mutex::new(None),
        };
        (transport, events_rx)
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.link.lock().await.status
    }

    /// Number of frames waiting for a connection.
    pub async fn queued_len(&self) -> usize {
        self.link.lock().await.outbound.len()
    }

    /// Open the connection. Returns immediately if already connected.
    ///
    /// On success, frames queued while disconnected are written in order
    /// before any later [`send`](Self::send). On failure the status becomes
    /// [`ConnectionStatus::Error`] and the error is both returned and reported
    /// as a [`TransportEvent::Error`].
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        {
            let mut link = self.link.lock().await;
            if link.status == ConnectionStatus::Connected {
                return Ok(());
            }
            link.transition(ConnectionStatus::Connecting, &self.events);
        }

        let (mut writer, reader) = match self.connector.connect(&self.options).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "Connect failed");
                self.fail(err.clone()).await;
                return Err(err);
            }
        };

        let mut link = self.link.lock().await;
        while let Some(frame) = link.outbound.pop_front() {
            if let Err(err) = writer.write_frame(&frame).await {
                warn!(error = %err, "Flushing queued frames failed");
                link.outbound.push_front(frame);
                drop(link);
                let _ = writer.close().await;
                self.fail(err.clone()).await;
                return Err(err);
            }
            debug!(frame = %frame, "Flushed queued frame");
        }
        link.writer = Some(writer);
        link.generation += 1;
        let generation = link.generation;
        link.transition(ConnectionStatus::Connected, &self.events);
        drop(link);

        self.spawn_reader(reader, generation).await;
        Ok(())
    }

    async fn fail(&self, err: AgentError) {
        let mut link = self.link.lock().await;
        link.transition(ConnectionStatus::Error, &self.events);
        let _ = self.events.send(TransportEvent::Error(err));
    }

    async fn spawn_reader(&self, mut reader: Box<dyn FrameReader>, generation: u64) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let link = Arc::clone(&self.link);
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    frame = reader.read_frame() => {
                        match frame {
                            Ok(Some(raw)) => {
                                debug!(frame = %raw, "Received frame");
                                match Message::decode(&raw) {
                                    Ok(message) => {
                                        let _ = events.send(TransportEvent::Message(message));
                                    }
                                    Err(err) => {
                                        warn!(error = %err, "Dropping undecodable frame");
                                        let _ = events.send(TransportEvent::Error(err));
                                    }
                                }
                            }
                            Ok(None) => {
                                Self::remote_closed(&link, &events, generation).await;
                                break;
                            }
                            Err(err) if err.kind() == ErrorKind::Protocol => {
                                warn!(error = %err, "Dropping malformed frame");
                                let _ = events.send(TransportEvent::Error(err));
                            }
                            Err(err) => {
                                warn!(error = %err, "Read failed");
                                let _ = events.send(TransportEvent::Error(err));
                                Self::remote_closed(&link, &events, generation).await;
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    async fn remote_closed(
        link: &Mutex<Link>,
        events: &mpsc::UnboundedSender<TransportEvent>,
        generation: u64,
    ) {
        let mut link = link.lock().await;
        if link.generation != generation || link.status != ConnectionStatus::Connected {
            return;
        }
        debug!("Connection closed by remote");
        link.writer = None;
        link.transition(ConnectionStatus::Disconnected, events);
        let _ = events.send(TransportEvent::Closed);
    }

    /// Send a message, or queue it until the next successful connect.
    ///
    /// Queuing is not an error.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let frame = message.encode()?;
        let mut link = self.link.lock().await;

        if link.status == ConnectionStatus::Connected {
            if let Some(writer) = link.writer.as_mut() {
                debug!(frame = %frame, "Sending frame");
                return writer.write_frame(&frame).await;
            }
        }

        debug!(kind = message.kind(), status = ?link.status, "Queued frame");
        link.outbound.push_back(frame);
        Ok(())
    }

    /// Close the connection if open. Never fails.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }

        let mut link = self.link.lock().await;
        link.generation += 1;
        if let Some(mut writer) = link.writer.take() {
            if let Err(err) = writer.close().await {
                debug!(error = %err, "Close failed");
            }
        }
        link.transition(ConnectionStatus::Disconnected, &self.events);
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// In-Memory Connector
// =============================================================================

/// In-process connections.
///
/// Every connect made through a [`MemoryConnector`] yields a [`MemoryPeer`]
/// from the paired [`MemoryServer`], which plays the remote side.
pub mod memory {
    use super::{BoxFuture, Connector, FramePair, FrameReader, FrameWriter};
    use crate::error::{AgentError, Result};
    use crate::protocol::Message;
    use crate::types::ConnectOptions;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Client side of the in-memory link.
    #[derive(Clone)]
    pub struct MemoryConnector {
        accept_tx: mpsc::UnboundedSender<MemoryPeer>,
        refusals: Arc<std::sync::Mutex<VecDeque<AgentError>>>,
    }

    /// Accepts connections made through the paired [`MemoryConnector`].
    pub struct MemoryServer {
        accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    }

    /// The remote end of one in-memory connection.
    pub struct MemoryPeer {
        target: ConnectOptions,
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: Option<mpsc::UnboundedSender<String>>,
    }

    impl MemoryConnector {
        pub fn new() -> (Self, MemoryServer) {
            let (accept_tx, accept_rx) = mpsc::unbounded_channel();
            let connector = Self {
                accept_tx,
                refusals: Arc::new(std::sync::Mutex::new(VecDeque::new())),
            };
            (connector, MemoryServer { accept_rx })
        }

        /// Fail the next connect attempt with `err`.
        pub fn refuse_next(&self, err: AgentError) {
            if let Ok(mut refusals) = self.refusals.lock() {
                refusals.push_back(err);
            }
        }

        fn next_refusal(&self) -> Option<AgentError> {
            self.refusals.lock().ok().and_then(|mut r| r.pop_front())
        }
    }

    impl Connector for MemoryConnector {
        fn connect<'a>(&'a self, target: &'a ConnectOptions) -> BoxFuture<'a, Result<FramePair>> {
            Box::pin(async move {
                if let Some(err) = self.next_refusal() {
                    return Err(err);
                }

                let (client_tx, from_client) = mpsc::unbounded_channel();
                let (to_client, client_rx) = mpsc::unbounded_channel();
                let peer = MemoryPeer {
                    target: target.clone(),
                    from_client,
                    to_client: Some(to_client),
                };
                self.accept_tx
                    .send(peer)
                    .map_err(|_| AgentError::connection("memory server is gone"))?;

                let writer: Box<dyn FrameWriter> = Box::new(MemoryWriter {
                    tx: Some(client_tx),
                });
                let reader: Box<dyn FrameReader> = Box::new(MemoryReader { rx: client_rx });
                Ok((writer, reader))
            })
        }
    }

    impl MemoryServer {
        /// Wait for the next connection.
        pub async fn accept(&mut self) -> Option<MemoryPeer> {
            self.accept_rx.recv().await
        }
    }

    impl MemoryPeer {
        /// The target the client connected with.
        pub fn target(&self) -> &ConnectOptions {
            &self.target
        }

        /// Next raw frame from the client. `None` once the client closed.
        pub async fn recv_raw(&mut self) -> Option<String> {
            self.from_client.recv().await
        }

        /// Next frame from the client, decoded.
        pub async fn recv(&mut self) -> Option<Message> {
            let raw = self.from_client.recv().await?;
            Message::decode(&raw).ok()
        }

        /// A frame the client already wrote, without waiting.
        pub fn try_recv_raw(&mut self) -> Option<String> {
            self.from_client.try_recv().ok()
        }

        pub fn send(&self, message: &Message) -> Result<()> {
            self.send_raw(&message.encode()?)
        }

        /// Deliver an arbitrary frame, well-formed or not.
        pub fn send_raw(&self, frame: &str) -> Result<()> {
            let tx = self.to_client.as_ref().ok_or(AgentError::ConnectionClosed)?;
            tx.send(frame.to_string())
                .map_err(|_| AgentError::ConnectionClosed)
        }

        /// Close from the remote side.
        pub fn close(&mut self) {
            self.to_client = None;
        }
    }

    struct MemoryWriter {
        tx: Option<mpsc::UnboundedSender<String>>,
    }

    impl FrameWriter for MemoryWriter {
        fn write_frame<'a>(&'a mut self, frame: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                let tx = self.tx.as_ref().ok_or(AgentError::ConnectionClosed)?;
                tx.send(frame.to_string())
                    .map_err(|_| AgentError::ConnectionClosed)
            })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.tx = None;
                Ok(())
            })
        }
    }

    struct MemoryReader {
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl FrameReader for MemoryReader {
        fn read_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
            Box::pin(async move { Ok(self.rx.recv().await) })
        }
    }
}
