//! Connection facade and application-facing stream handles.
//!
//! [`Connection::establish`] wires a raw transport and a set of negotiated
//! parameters into a working multiplexed connection: it splits the
//! transport, spawns the writer and dispatch tasks, and (for the client
//! role) sends SETUP.
//!
//! All handles are message-passing: they carry a stream id and a sender for
//! the multiplexer's command channel, never a reference into connection
//! state. Demand and cancellation flow in through [`StreamReceiver`] and
//! [`StreamSender`]; payloads, completion and errors flow out through each
//! stream's event channel.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

mod config;

pub use config::{
    ConnectionConfig,
    ConnectionRole,
    DEFAULT_COMMAND_CAPACITY,
    DEFAULT_INCOMING_CAPACITY,
    DEFAULT_MAX_FRAME_LEN,
    DEFAULT_WRITER_CAPACITY,
    MIN_FRAME_LEN,
};

use crate::{
    error::ConnectionError,
    frame::{ErrorCode, FrameCodec, Payload, SetupParams, StreamId},
    mux::{Command, Multiplexer},
    reader::FrameReader,
    stream::{InteractionKind, StreamEvent},
    transport::Transport,
    writer,
};

/// Handle to one multiplexed connection.
///
/// Cloneable; all clones drive the same connection. The connection closes
/// when [`close`](Connection::close) is called or every handle (including
/// stream handles) has been dropped.
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::Sender<Command>,
}

impl Connection {
    /// Wire `transport` into a working multiplexed connection.
    ///
    /// Spawns the writer and dispatch tasks. For the client role this also
    /// sends the SETUP frame announcing the configured version, keepalive
    /// cadence and lease mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the transport fails before the
    /// connection is established.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wiremux::{ByteStream, Connection, ConnectionConfig};
    ///
    /// # async fn demo(socket: tokio::net::TcpStream) -> Result<(), wiremux::ConnectionError> {
    /// let (conn, mut incoming) =
    ///     Connection::establish(ByteStream::new(socket), ConnectionConfig::client()).await?;
    /// # drop(conn);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn establish<T: Transport>(
        transport: T,
        config: ConnectionConfig,
    ) -> Result<(Self, IncomingStreams), ConnectionError> {
        let codec = FrameCodec::new(config.version, config.framing, config.max_frame_len);
        let (sender, receiver) = transport.split();
        let shutdown = CancellationToken::new();
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let (writer, writer_task) = writer::channel(
            sender,
            codec,
            config.writer_capacity,
            fatal_tx,
            shutdown.clone(),
        );
        tokio::spawn(writer_task.run());

        if config.role == ConnectionRole::Client {
            let setup = SetupParams {
                version: config.version,
                keepalive: config.keepalive,
                lease: config.lease_enabled,
            };
            writer
                .send(setup.to_frame())
                .await
                .map_err(|_| ConnectionError::Closed)?;
        }

        let reader = FrameReader::new(receiver, codec);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_capacity);
        let mux = Multiplexer::new(
            reader,
            writer,
            cmd_rx,
            cmd_tx.downgrade(),
            fatal_rx,
            incoming_tx,
            shutdown,
            config,
        );
        tokio::spawn(mux.run());

        Ok((Self { cmd_tx }, IncomingStreams { rx: incoming_rx }))
    }

    /// Issue a request expecting a single response payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down, or
    /// [`ConnectionError::LeaseExhausted`] when leasing is enabled and no
    /// admission credit remains.
    pub async fn request_response(&self, payload: Payload) -> Result<StreamReceiver, ConnectionError> {
        let (_, receiver) = self
            .open(InteractionKind::RequestResponse, payload, 1)
            .await?;
        Ok(receiver)
    }

    /// Issue a request expecting a stream of payloads, granting the
    /// responder `initial_n` units of credit up front.
    ///
    /// # Errors
    ///
    /// See [`request_response`](Connection::request_response).
    pub async fn request_stream(
        &self,
        payload: Payload,
        initial_n: u32,
    ) -> Result<StreamReceiver, ConnectionError> {
        let (_, receiver) = self
            .open(InteractionKind::RequestStream, payload, initial_n)
            .await?;
        Ok(receiver)
    }

    /// Open a bidirectional payload channel.
    ///
    /// Returns the sender for the local outbound direction alongside the
    /// receiver for inbound events.
    ///
    /// # Errors
    ///
    /// See [`request_response`](Connection::request_response).
    pub async fn request_channel(
        &self,
        payload: Payload,
        initial_n: u32,
    ) -> Result<(StreamSender, StreamReceiver), ConnectionError> {
        self.open(InteractionKind::RequestChannel, payload, initial_n)
            .await
    }

    /// Grant the peer a connection-wide admission lease.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down.
    pub async fn grant_lease(
        &self,
        ttl: Duration,
        allowed_requests: u32,
    ) -> Result<(), ConnectionError> {
        self.cmd_tx
            .send(Command::GrantLease {
                ttl,
                allowed_requests,
            })
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Close the connection, cancelling every live stream with a
    /// connection-closed error. Idempotent.
    pub async fn close(&self) { let _ = self.cmd_tx.send(Command::Close).await; }

    async fn open(
        &self,
        kind: InteractionKind,
        payload: Payload,
        initial_n: u32,
    ) -> Result<(StreamSender, StreamReceiver), ConnectionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::OpenStream {
                kind,
                payload,
                initial_n,
                events: events_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ConnectionError::Closed)?;
        let id = reply_rx.await.map_err(|_| ConnectionError::Closed)??;
        Ok((
            StreamSender::new(id, self.cmd_tx.clone()),
            StreamReceiver::new(id, events_rx, self.cmd_tx.clone(), true),
        ))
    }
}

/// Sequence of peer-initiated streams surfaced by the multiplexer.
pub struct IncomingStreams {
    rx: mpsc::Receiver<IncomingStream>,
}

impl IncomingStreams {
    /// Await the next peer-initiated stream.
    ///
    /// Returns `None` once the connection has closed.
    pub async fn accept(&mut self) -> Option<IncomingStream> { self.rx.recv().await }
}

impl Stream for IncomingStreams {
    type Item = IncomingStream;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// One peer-initiated stream, handed to the acceptor.
pub struct IncomingStream {
    id: StreamId,
    /// Interaction model the peer requested.
    pub kind: InteractionKind,
    /// The request payload carried by the opening frame.
    pub request: Payload,
    /// Responder-side handle for emitting payloads within granted credit.
    pub responder: StreamSender,
    /// Events for this stream: credit grants, cancellation, and (for
    /// channels) inbound payloads.
    pub events: StreamReceiver,
}

impl IncomingStream {
    pub(crate) fn new(
        id: StreamId,
        kind: InteractionKind,
        request: Payload,
        responder: StreamSender,
        events: StreamReceiver,
    ) -> Self {
        Self {
            id,
            kind,
            request,
            responder,
            events,
        }
    }

    /// Stream id assigned by the peer.
    #[must_use]
    pub fn id(&self) -> StreamId { self.id }
}

/// Outbound half of a stream: emits payloads within granted credit.
///
/// Emissions beyond the peer's current grant are buffered by the
/// multiplexer and flushed FIFO as REQUEST_N frames arrive.
#[derive(Clone)]
pub struct StreamSender {
    id: StreamId,
    cmd: mpsc::Sender<Command>,
}

impl StreamSender {
    pub(crate) fn new(id: StreamId, cmd: mpsc::Sender<Command>) -> Self { Self { id, cmd } }

    /// Stream id this sender emits on.
    #[must_use]
    pub fn id(&self) -> StreamId { self.id }

    /// Emit one payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down.
    pub async fn send(&self, payload: Payload) -> Result<(), ConnectionError> {
        self.submit(Command::Emit {
            id: self.id,
            payload,
            complete: false,
        })
        .await
    }

    /// Emit one payload and complete the local direction with it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down.
    pub async fn send_last(&self, payload: Payload) -> Result<(), ConnectionError> {
        self.submit(Command::Emit {
            id: self.id,
            payload,
            complete: true,
        })
        .await
    }

    /// Complete the local direction without a payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down.
    pub async fn complete(&self) -> Result<(), ConnectionError> {
        self.submit(Command::Complete { id: self.id }).await
    }

    /// Terminate the stream with an application error.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down.
    pub async fn error(&self, message: impl Into<String>) -> Result<(), ConnectionError> {
        self.submit(Command::Abort {
            id: self.id,
            code: ErrorCode::ApplicationError,
            message: message.into(),
        })
        .await
    }

    async fn submit(&self, cmd: Command) -> Result<(), ConnectionError> {
        self.cmd.send(cmd).await.map_err(|_| ConnectionError::Closed)
    }
}

/// Inbound half of a stream: events plus demand and cancellation.
///
/// Receivers created for locally initiated requests cancel the stream when
/// dropped; receivers attached to peer-initiated streams do not, since the
/// responder may still be emitting.
#[derive(Debug)]
pub struct StreamReceiver {
    id: StreamId,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cmd: mpsc::Sender<Command>,
    cancel_on_drop: bool,
}

impl StreamReceiver {
    pub(crate) fn new(
        id: StreamId,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        cmd: mpsc::Sender<Command>,
        cancel_on_drop: bool,
    ) -> Self {
        Self {
            id,
            events,
            cmd,
            cancel_on_drop,
        }
    }

    /// Stream id this receiver observes.
    #[must_use]
    pub fn id(&self) -> StreamId { self.id }

    /// Await the next event.
    ///
    /// Returns `None` after the terminal event has been consumed and the
    /// stream's state is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> { self.events.recv().await }

    /// Grant the peer `n` further units of credit.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is down.
    pub async fn request(&self, n: u32) -> Result<(), ConnectionError> {
        self.cmd
            .send(Command::RequestN { id: self.id, n })
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Cancel the stream. The pending buffer is discarded and the peer is
    /// informed; other streams are unaffected.
    pub async fn cancel(&self) {
        let _ = self.cmd.send(Command::Cancel { id: self.id }).await;
    }
}

impl Stream for StreamReceiver {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        if self.cancel_on_drop {
            // Best effort; a closed or saturated command channel means the
            // connection is tearing down anyway.
            let _ = self.cmd.try_send(Command::Cancel { id: self.id });
        }
    }
}
