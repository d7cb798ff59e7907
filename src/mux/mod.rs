//! Connection multiplexer.
//!
//! The multiplexer owns the frame reader, the writer handle and the stream
//! registry, and drives one biased `tokio::select!` loop per connection.
//! That loop is the single dispatch path: inbound frames, application
//! commands and keepalive timers are all serviced sequentially, so registry
//! and stream state need no locking and inbound events have a total order
//! per connection.
//!
//! Outbound emission from concurrent application producers funnels through
//! the command channel; the writer task's queue is the only other
//! synchronisation point on the write side.

mod command;
mod dispatch;

use std::sync::Arc;

use bytes::Bytes;
pub(crate) use command::Command;
use log::info;
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connection::{ConnectionConfig, ConnectionRole, IncomingStream},
    error::{ConnectionError, ProtocolError, StreamError},
    frame::{ErrorCode, Frame, LeaseParams, Payload, StreamId},
    reader::FrameReader,
    stream::{
        InteractionKind,
        PendingItem,
        StreamEvent,
        StreamState,
        registry::StreamRegistry,
    },
    transport::TransportReceiver,
    writer::FrameWriter,
};

/// Admission budget granted by the peer's most recent LEASE frame.
#[derive(Clone, Copy, Debug)]
struct LeaseBudget {
    remaining: u32,
    expires: Instant,
}

impl LeaseBudget {
    fn admit(&mut self, now: Instant) -> bool {
        if now >= self.expires || self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Per-connection dispatch engine.
pub(crate) struct Multiplexer<R> {
    reader: FrameReader<R>,
    writer: FrameWriter,
    registry: StreamRegistry,
    cmd_rx: mpsc::Receiver<Command>,
    /// Weak handle used to mint stream handles for peer-initiated streams;
    /// weak so that dropped application handles still close the channel.
    cmd_tx: mpsc::WeakSender<Command>,
    fatal_rx: mpsc::Receiver<ConnectionError>,
    incoming_tx: mpsc::Sender<IncomingStream>,
    shutdown: CancellationToken,
    config: ConnectionConfig,
    /// Server connections must observe SETUP before anything else.
    setup_done: bool,
    lease: Option<LeaseBudget>,
    keepalive_timer: Option<time::Interval>,
    keepalive_deadline: Option<Instant>,
    /// Timeout used to re-arm the deadline on each keepalive receipt. The
    /// client takes it from local config; the server adopts the cadence the
    /// peer announces in SETUP.
    keepalive_timeout: Option<std::time::Duration>,
}

impl<R: TransportReceiver> Multiplexer<R> {
    #[must_use]
    #[expect(
        clippy::too_many_arguments,
        reason = "construction wires every channel end exactly once"
    )]
    pub fn new(
        reader: FrameReader<R>,
        writer: FrameWriter,
        cmd_rx: mpsc::Receiver<Command>,
        cmd_tx: mpsc::WeakSender<Command>,
        fatal_rx: mpsc::Receiver<ConnectionError>,
        incoming_tx: mpsc::Sender<IncomingStream>,
        shutdown: CancellationToken,
        config: ConnectionConfig,
    ) -> Self {
        let is_client = config.role == ConnectionRole::Client;
        let keepalive_timer = config.keepalive.filter(|_| is_client).map(|ka| {
            let mut timer = time::interval(ka.interval);
            timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            timer
        });
        // The client arms its deadline immediately; the server arms it once
        // SETUP announces the peer's keepalive cadence.
        let keepalive_deadline = config
            .keepalive
            .filter(|_| is_client)
            .map(|ka| Instant::now() + ka.timeout);
        Self {
            reader,
            writer,
            registry: StreamRegistry::new(config.role),
            cmd_rx,
            cmd_tx,
            fatal_rx,
            incoming_tx,
            shutdown,
            setup_done: is_client,
            lease: None,
            keepalive_timer,
            keepalive_deadline,
            keepalive_timeout: config.keepalive.filter(|_| is_client).map(|ka| ka.timeout),
            config,
        }
    }

    /// Drive the connection until it closes, then tear everything down.
    pub async fn run(mut self) {
        let result = self.drive().await;
        let cause = match result {
            Ok(()) => ConnectionError::Closed,
            Err(err) => err,
        };
        self.teardown(cause);
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        loop {
            let keepalive_armed = self.keepalive_timer.is_some();
            let keepalive_deadline = self.keepalive_deadline;
            tokio::select! {
                biased;

                Some(err) = self.fatal_rx.recv() => return Err(err),

                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => return Ok(()),
                    Some(cmd) => self.handle_command(cmd).await?,
                },

                frame = self.reader.next_frame() => match frame {
                    None => return Err(ConnectionError::Closed),
                    Some(Err(err)) => return Err(err),
                    Some(Ok(frame)) => self.handle_frame(frame).await?,
                },

                () = tick(self.keepalive_timer.as_mut()), if keepalive_armed => {
                    self.send_frame(Frame::keepalive(true, Bytes::new())).await?;
                }

                () = deadline(keepalive_deadline), if keepalive_deadline.is_some() => {
                    return Err(ProtocolError::KeepaliveTimeout.into());
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<(), ConnectionError> {
        match cmd {
            Command::OpenStream {
                kind,
                payload,
                initial_n,
                events,
                reply,
            } => match self.open_stream(kind, payload, initial_n, events).await {
                Ok(id) => {
                    let _ = reply.send(Ok(id));
                    Ok(())
                }
                Err(err) if err.is_fatal() => {
                    let _ = reply.send(Err(ConnectionError::Closed));
                    Err(err)
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    Ok(())
                }
            },
            Command::Emit {
                id,
                payload,
                complete,
            } => self.emit(id, payload, complete).await,
            Command::Complete { id } => self.complete(id).await,
            Command::Abort { id, code, message } => self.abort(id, code, &message).await,
            Command::RequestN { id, n } => self.request_n(id, n).await,
            Command::Cancel { id } => self.cancel_local(id).await,
            Command::GrantLease {
                ttl,
                allowed_requests,
            } => {
                self.send_frame(
                    LeaseParams {
                        ttl,
                        allowed_requests,
                    }
                    .to_frame(),
                )
                .await
            }
            Command::Close => unreachable!("Close is intercepted by the dispatch loop"),
        }
    }

    async fn open_stream(
        &mut self,
        kind: InteractionKind,
        payload: Payload,
        initial_n: u32,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<StreamId, ConnectionError> {
        if self.config.lease_enabled {
            let admitted = self
                .lease
                .as_mut()
                .is_some_and(|budget| budget.admit(Instant::now()));
            if !admitted {
                debug!("rejecting request: lease budget exhausted or expired");
                return Err(ConnectionError::LeaseExhausted);
            }
        }
        let id = self.registry.allocate()?;
        self.registry
            .insert(StreamState::requester(id, kind, initial_n, events))?;
        self.send_frame(Frame::request(kind.frame_type(), id, payload, initial_n))
            .await?;
        Ok(id)
    }

    async fn emit(
        &mut self,
        id: StreamId,
        payload: Payload,
        complete: bool,
    ) -> Result<(), ConnectionError> {
        let (frame, terminal) = {
            let Some(state) = self.registry.lookup_mut(id) else {
                debug!(stream_id = id.value(), "dropping emission for finished stream");
                return Ok(());
            };
            if state.local_done() {
                warn!(stream_id = id.value(), "emission after local completion discarded");
                return Ok(());
            }
            if !state.try_consume_send_credit() {
                state.push_pending(PendingItem { payload, complete });
                return Ok(());
            }
            state.mark_active();
            if complete {
                state.note_local_done();
            }
            (Frame::payload(id, payload, complete), state.is_terminal())
        };
        self.send_frame(frame).await?;
        if terminal {
            self.remove_stream(id);
        }
        Ok(())
    }

    async fn complete(&mut self, id: StreamId) -> Result<(), ConnectionError> {
        let terminal = {
            let Some(state) = self.registry.lookup_mut(id) else {
                return Ok(());
            };
            if state.local_done() {
                return Ok(());
            }
            // A buffered item absorbs the completion so it still goes out
            // last, once credit arrives.
            if state.mark_pending_complete() {
                return Ok(());
            }
            state.note_local_done();
            state.is_terminal()
        };
        self.send_frame(Frame::complete(id)).await?;
        if terminal {
            self.remove_stream(id);
        }
        Ok(())
    }

    async fn abort(
        &mut self,
        id: StreamId,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), ConnectionError> {
        {
            let Some(state) = self.registry.lookup_mut(id) else {
                return Ok(());
            };
            state.terminate();
            state.deliver(StreamEvent::Error(StreamError::Aborted {
                code,
                message: message.to_owned(),
            }));
        }
        self.remove_stream(id);
        self.send_frame(Frame::error(id, code, message)).await
    }

    async fn request_n(&mut self, id: StreamId, n: u32) -> Result<(), ConnectionError> {
        if n == 0 {
            warn!(stream_id = id.value(), "ignoring request for zero items");
            return Ok(());
        }
        {
            let Some(state) = self.registry.lookup_mut(id) else {
                return Ok(());
            };
            if state.remote_done() {
                return Ok(());
            }
            state.grant_recv_credit(n);
        }
        self.send_frame(Frame::request_n(id, n)).await
    }

    async fn cancel_local(&mut self, id: StreamId) -> Result<(), ConnectionError> {
        {
            let Some(state) = self.registry.lookup_mut(id) else {
                return Ok(());
            };
            state.terminate();
            state.deliver(StreamEvent::Cancelled);
        }
        self.remove_stream(id);
        self.send_frame(Frame::cancel(id)).await
    }

    /// Flush buffered items for `id` as far as fresh credit allows.
    async fn flush_pending(&mut self, id: StreamId) -> Result<(), ConnectionError> {
        loop {
            let (frame, terminal) = {
                let Some(state) = self.registry.lookup_mut(id) else {
                    return Ok(());
                };
                let Some(item) = state.pop_pending() else {
                    return Ok(());
                };
                state.mark_active();
                if item.complete {
                    state.note_local_done();
                }
                (
                    Frame::payload(id, item.payload, item.complete),
                    state.is_terminal(),
                )
            };
            self.send_frame(frame).await?;
            if terminal {
                self.remove_stream(id);
                return Ok(());
            }
        }
    }

    /// Queue a frame on the writer, surfacing the writer's fatal cause if it
    /// has already stopped.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if self.writer.send(frame).await.is_err() {
            return Err(self
                .fatal_rx
                .try_recv()
                .unwrap_or(ConnectionError::Closed));
        }
        Ok(())
    }

    fn remove_stream(&mut self, id: StreamId) {
        if self.registry.remove(id).is_some() {
            debug!(
                stream_id = id.value(),
                live = self.registry.len(),
                "stream finished"
            );
        }
    }

    /// Tear down every live stream with one shared terminal cause, then stop
    /// the writer task and close the transport.
    fn teardown(mut self, cause: ConnectionError) {
        // Best effort: tell the peer why the connection is going away. A
        // writer that is already dead ignores this.
        if matches!(
            cause,
            ConnectionError::Protocol(_) | ConnectionError::Decode(_) | ConnectionError::Encode(_)
        ) {
            let _ = self.writer.try_send(Frame::error(
                StreamId::ZERO,
                ErrorCode::ConnectionError,
                &cause.to_string(),
            ));
        }
        info!(
            "connection closed: cause={}, live_streams={}",
            cause.error_type(),
            self.registry.len()
        );
        let cause = Arc::new(cause);
        for state in self.registry.drain() {
            if !state.is_terminal() {
                state.deliver(StreamEvent::Error(StreamError::ConnectionClosed(
                    Arc::clone(&cause),
                )));
            }
        }
        self.shutdown.cancel();
        self.cmd_rx.close();
        // Outstanding opens must not hang on a dropped reply channel.
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if let Command::OpenStream { reply, .. } = cmd {
                let _ = reply.send(Err(ConnectionError::Closed));
            }
        }
    }
}

/// Await the next keepalive tick; pending forever when disabled.
async fn tick(timer: Option<&mut time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Await the keepalive deadline; pending forever when disabled.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
