//! Inbound frame dispatch.
//!
//! Every decoded frame passes through [`Multiplexer::handle_frame`] on the
//! connection's single dispatch path. Connection-scoped frames (stream id 0)
//! are handled inline; stream frames are routed through the registry, with
//! peer-initiated REQUEST frames creating new responder-side streams.

use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, warn};

use super::{LeaseBudget, Multiplexer};
use crate::{
    connection::{IncomingStream, StreamReceiver, StreamSender},
    error::{ConnectionError, ProtocolError, StreamError},
    frame::{
        ErrorCode,
        Frame,
        FrameFlags,
        FrameType,
        LeaseParams,
        Payload,
        SetupParams,
        StreamId,
        params,
    },
    stream::{InteractionKind, StreamEvent, StreamState, registry::IdClass},
    transport::TransportReceiver,
};

impl<R: TransportReceiver> Multiplexer<R> {
    /// Route one decoded frame.
    ///
    /// # Errors
    ///
    /// Any returned error is connection-fatal and triggers full teardown.
    pub(super) async fn handle_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if !self.setup_done {
            if frame.stream_id.is_connection() && frame.frame_type == FrameType::Setup {
                return self.handle_setup(&frame);
            }
            return Err(ProtocolError::MissingSetup.into());
        }
        if frame.stream_id.is_connection() {
            self.handle_connection_frame(frame).await
        } else {
            self.handle_stream_frame(frame).await
        }
    }

    fn handle_setup(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let setup = SetupParams::from_frame(frame)?;
        if setup.version.major != self.config.version.major {
            return Err(ProtocolError::UnsupportedVersion {
                version: setup.version,
            }
            .into());
        }
        self.setup_done = true;
        if let Some(ka) = setup.keepalive {
            self.keepalive_timeout = Some(ka.timeout);
            self.keepalive_deadline = Some(Instant::now() + ka.timeout);
        }
        debug!(
            version = %setup.version,
            keepalive = setup.keepalive.is_some(),
            lease = setup.lease,
            "connection established"
        );
        Ok(())
    }

    async fn handle_connection_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        match frame.frame_type {
            FrameType::Setup => Err(ProtocolError::UnexpectedSetup.into()),
            FrameType::Keepalive => {
                self.touch_keepalive();
                if frame.flags.contains(FrameFlags::RESPOND) {
                    self.send_frame(Frame::keepalive(false, frame.payload)).await?;
                }
                Ok(())
            }
            FrameType::Lease => {
                let lease = LeaseParams::from_frame(&frame)?;
                debug!(
                    allowed = lease.allowed_requests,
                    ttl_ms = lease.ttl.as_millis(),
                    "lease received"
                );
                self.lease = Some(LeaseBudget {
                    remaining: lease.allowed_requests,
                    expires: Instant::now() + lease.ttl,
                });
                Ok(())
            }
            FrameType::Error => {
                let (code, message) = params::decode_error_body(&frame)?;
                Err(ConnectionError::Remote { code, message })
            }
            other => {
                warn!(frame_type = ?other, "stream frame addressed to the connection scope");
                Err(ProtocolError::InvalidStreamId { id: StreamId::ZERO }.into())
            }
        }
    }

    async fn handle_stream_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let id = frame.stream_id;
        if self.registry.lookup_mut(id).is_some() {
            return self.on_live_stream_frame(frame).await;
        }
        match self.registry.classify(id) {
            IdClass::NewPeer if frame.frame_type.opens_stream() => self.accept_stream(frame).await,
            IdClass::Retired => {
                debug!(
                    stream_id = id.value(),
                    frame_type = ?frame.frame_type,
                    "dropping late frame for finished stream"
                );
                Ok(())
            }
            IdClass::NewPeer | IdClass::NeverAssigned => {
                Err(ProtocolError::InvalidStreamId { id }.into())
            }
        }
    }

    async fn on_live_stream_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let id = frame.stream_id;
        match frame.frame_type {
            FrameType::RequestResponse | FrameType::RequestStream | FrameType::RequestChannel => {
                Err(ProtocolError::DuplicateStream { id }.into())
            }
            FrameType::Payload => {
                let terminal = {
                    let Some(state) = self.registry.lookup_mut(id) else {
                        return Ok(());
                    };
                    let completes = frame.flags.contains(FrameFlags::COMPLETE);
                    if frame.consumes_credit() {
                        state.consume_recv_credit()?;
                        state.mark_active();
                        state.deliver(StreamEvent::Payload(frame.into_payload()));
                    }
                    if completes {
                        state.note_remote_done();
                        state.deliver(StreamEvent::Complete);
                    }
                    state.is_terminal()
                };
                if terminal {
                    self.remove_stream(id);
                }
                Ok(())
            }
            FrameType::RequestN => {
                let n = params::decode_request_n(&frame)?;
                if n == 0 {
                    return Err(ProtocolError::ZeroRequestN { id }.into());
                }
                {
                    let Some(state) = self.registry.lookup_mut(id) else {
                        return Ok(());
                    };
                    state.add_send_credit(n);
                    state.deliver(StreamEvent::CreditGranted(n));
                }
                self.flush_pending(id).await
            }
            FrameType::Cancel => {
                {
                    let Some(state) = self.registry.lookup_mut(id) else {
                        return Ok(());
                    };
                    state.terminate();
                    state.deliver(StreamEvent::Cancelled);
                }
                self.remove_stream(id);
                Ok(())
            }
            FrameType::Error => {
                let (code, message) = params::decode_error_body(&frame)?;
                {
                    let Some(state) = self.registry.lookup_mut(id) else {
                        return Ok(());
                    };
                    state.terminate();
                    state.deliver(StreamEvent::Error(StreamError::Remote { code, message }));
                }
                self.remove_stream(id);
                Ok(())
            }
            FrameType::Setup | FrameType::Lease | FrameType::Keepalive => {
                warn!(
                    stream_id = id.value(),
                    frame_type = ?frame.frame_type,
                    "connection frame addressed to a stream"
                );
                Err(ProtocolError::InvalidStreamId { id }.into())
            }
        }
    }

    /// Create responder-side state for a peer-initiated request and surface
    /// it to the acceptor.
    async fn accept_stream(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let id = frame.stream_id;
        let Some(kind) = InteractionKind::from_frame_type(frame.frame_type) else {
            return Err(ProtocolError::InvalidStreamId { id }.into());
        };
        let completes = frame.flags.contains(FrameFlags::COMPLETE);
        let (initial_n, data) = match kind {
            InteractionKind::RequestResponse => (1, frame.payload),
            _ => params::split_initial_request_n(frame.payload)?,
        };
        let request = Payload {
            metadata: frame.metadata,
            data,
        };

        let Some(cmd_tx) = self.cmd_tx.upgrade() else {
            // Every application handle is gone; the loop is about to see the
            // closed command channel and tear down.
            return Ok(());
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut state = StreamState::responder(id, kind, initial_n, events_tx);
        if completes {
            // A channel request may close the requester's direction at once.
            state.note_remote_done();
        }
        self.registry.insert(state)?;

        let incoming = IncomingStream::new(
            id,
            kind,
            request,
            StreamSender::new(id, cmd_tx.clone()),
            StreamReceiver::new(id, events_rx, cmd_tx, false),
        );
        if self.incoming_tx.try_send(incoming).is_ok() {
            debug!(stream_id = id.value(), kind = ?kind, "peer stream accepted");
            Ok(())
        } else {
            warn!(stream_id = id.value(), "acceptor saturated, rejecting peer stream");
            self.remove_stream(id);
            self.send_frame(Frame::error(id, ErrorCode::Rejected, "no acceptor capacity"))
                .await
        }
    }

    fn touch_keepalive(&mut self) {
        if let Some(timeout) = self.keepalive_timeout {
            self.keepalive_deadline = Some(Instant::now() + timeout);
        }
    }
}
