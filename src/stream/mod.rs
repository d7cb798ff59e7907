//! Per-stream lifecycle and credit state.
//!
//! One [`StreamState`] exists per live logical stream, owned exclusively by
//! the multiplexer's registry and mutated only from the dispatch path.
//! Application subscribers observe the stream through an event channel and
//! never touch this state directly.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::{
    error::{ProtocolError, StreamError},
    frame::{FrameType, MAX_REQUEST_N, Payload, StreamId},
};

pub(crate) mod registry;


/// Lifecycle of one logical stream.
///
/// ```text
/// Pending -> Active -> Completing -> Terminal
///     \________\___________\______/
///              (cancel / error)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Request sent or received; no data has flowed yet.
    Pending,
    /// Data flowing in at least one direction.
    Active,
    /// One direction has completed; awaiting the other side's terminal
    /// signal.
    Completing,
    /// Both directions finalised. No frames are routed here again.
    Terminal,
}

/// The local side's role in one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    /// The local side issued the request and consumes payloads.
    Requester,
    /// The local side answers the request within granted credit.
    Responder,
}

/// Interaction model requested for a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionKind {
    /// One request, one response payload.
    RequestResponse,
    /// One request, a stream of response payloads.
    RequestStream,
    /// Payloads flowing in both directions.
    RequestChannel,
}

impl InteractionKind {
    /// The frame type that opens a stream of this kind.
    #[must_use]
    pub fn frame_type(self) -> FrameType {
        match self {
            Self::RequestResponse => FrameType::RequestResponse,
            Self::RequestStream => FrameType::RequestStream,
            Self::RequestChannel => FrameType::RequestChannel,
        }
    }

    /// Map a request-opening frame type to its interaction kind.
    #[must_use]
    pub fn from_frame_type(frame_type: FrameType) -> Option<Self> {
        match frame_type {
            FrameType::RequestResponse => Some(Self::RequestResponse),
            FrameType::RequestStream => Some(Self::RequestStream),
            FrameType::RequestChannel => Some(Self::RequestChannel),
            _ => None,
        }
    }
}

/// Events delivered to a stream's subscriber.
///
/// Every subscriber receives exactly one terminal event: [`Complete`],
/// [`Cancelled`] or [`Error`].
///
/// [`Complete`]: StreamEvent::Complete
/// [`Cancelled`]: StreamEvent::Cancelled
/// [`Error`]: StreamEvent::Error
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A data item arrived.
    Payload(Payload),
    /// The peer completed its direction of the stream.
    Complete,
    /// The peer granted `n` further units of outbound credit.
    CreditGranted(u32),
    /// The stream was cancelled, locally or by the peer.
    Cancelled,
    /// The stream failed.
    Error(StreamError),
}

/// An outbound item held back by zero credit.
#[derive(Debug)]
pub(crate) struct PendingItem {
    pub payload: Payload,
    /// Whether this item also completes the local direction.
    pub complete: bool,
}

/// State of one live logical stream.
#[derive(Debug)]
pub(crate) struct StreamState {
    id: StreamId,
    role: StreamRole,
    kind: InteractionKind,
    lifecycle: Lifecycle,
    /// Units of credit the peer has granted for local payload emission.
    send_credit: u32,
    /// Units of credit granted to the peer for inbound payloads.
    recv_credit: u32,
    /// Locally emitted items awaiting credit, flushed FIFO.
    pending: VecDeque<PendingItem>,
    events: mpsc::UnboundedSender<StreamEvent>,
    local_done: bool,
    remote_done: bool,
}

impl StreamState {
    /// Create the state for a locally initiated (requester) stream.
    ///
    /// For non-channel interactions the request itself is the requester's
    /// entire output, so the local direction starts complete.
    pub fn requester(
        id: StreamId,
        kind: InteractionKind,
        initial_n: u32,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let recv_credit = match kind {
            InteractionKind::RequestResponse => 1,
            _ => initial_n.min(MAX_REQUEST_N),
        };
        Self {
            id,
            role: StreamRole::Requester,
            kind,
            lifecycle: Lifecycle::Pending,
            send_credit: 0,
            recv_credit,
            pending: VecDeque::new(),
            events,
            local_done: kind != InteractionKind::RequestChannel,
            remote_done: false,
        }
    }

    /// Create the state for a peer-initiated (responder) stream.
    pub fn responder(
        id: StreamId,
        kind: InteractionKind,
        initial_n: u32,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let send_credit = match kind {
            InteractionKind::RequestResponse => 1,
            _ => initial_n.min(MAX_REQUEST_N),
        };
        Self {
            id,
            role: StreamRole::Responder,
            kind,
            lifecycle: Lifecycle::Pending,
            send_credit,
            recv_credit: 0,
            pending: VecDeque::new(),
            events,
            local_done: false,
            remote_done: kind != InteractionKind::RequestChannel,
        }
    }

    pub fn id(&self) -> StreamId { self.id }

    pub fn is_terminal(&self) -> bool { self.lifecycle == Lifecycle::Terminal }

    /// Deliver an event to the subscriber.
    ///
    /// A vanished subscriber only discards delivery; the stream's wire state
    /// is unaffected.
    pub fn deliver(&self, event: StreamEvent) { let _ = self.events.send(event); }

    /// Record the first data-bearing frame in either direction.
    pub fn mark_active(&mut self) {
        if self.lifecycle == Lifecycle::Pending {
            self.lifecycle = Lifecycle::Active;
        }
    }

    /// Add peer-granted credit for local emission, saturating at
    /// [`MAX_REQUEST_N`].
    pub fn add_send_credit(&mut self, n: u32) {
        self.send_credit = self.send_credit.saturating_add(n).min(MAX_REQUEST_N);
    }

    /// Consume one unit of send credit if available.
    ///
    /// Returns false when the item must be buffered instead. The caller is
    /// the credit-respecting side by construction, so an overrun here is a
    /// local programming error, not a wire condition.
    pub fn try_consume_send_credit(&mut self) -> bool {
        match self.send_credit.checked_sub(1) {
            Some(rest) => {
                self.send_credit = rest;
                true
            }
            None => false,
        }
    }

    /// Extend the credit granted to the peer for inbound payloads.
    pub fn grant_recv_credit(&mut self, n: u32) {
        self.recv_credit = self.recv_credit.saturating_add(n).min(MAX_REQUEST_N);
    }

    /// Account one inbound data item against the credit granted to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CreditViolation`] if the peer emitted beyond
    /// its grant; this is connection-fatal.
    pub fn consume_recv_credit(&mut self) -> Result<(), ProtocolError> {
        match self.recv_credit.checked_sub(1) {
            Some(rest) => {
                self.recv_credit = rest;
                Ok(())
            }
            None => Err(ProtocolError::CreditViolation { id: self.id }),
        }
    }

    /// Buffer an outbound item that could not be sent for lack of credit.
    pub fn push_pending(&mut self, item: PendingItem) { self.pending.push_back(item); }

    /// Take the next buffered item if credit allows it.
    pub fn pop_pending(&mut self) -> Option<PendingItem> {
        if self.pending.is_empty() || !self.try_consume_send_credit() {
            return None;
        }
        let item = self.pending.pop_front();
        debug_assert!(item.is_some(), "credit consumed for a buffered item");
        item
    }

    /// Fold a completion request into the last buffered item so it still
    /// goes out last once credit arrives.
    ///
    /// Returns false when nothing is buffered and the completion must be
    /// sent immediately.
    pub fn mark_pending_complete(&mut self) -> bool {
        match self.pending.back_mut() {
            Some(last) => {
                last.complete = true;
                true
            }
            None => false,
        }
    }

    /// Record completion of the local direction.
    pub fn note_local_done(&mut self) {
        self.local_done = true;
        self.advance_completion();
    }

    /// Record completion of the remote direction.
    pub fn note_remote_done(&mut self) {
        self.remote_done = true;
        self.advance_completion();
    }

    /// Whether the local direction has already completed.
    pub fn local_done(&self) -> bool { self.local_done }

    /// Whether the remote direction has already completed.
    pub fn remote_done(&self) -> bool { self.remote_done }

    fn advance_completion(&mut self) {
        self.lifecycle = match (self.local_done, self.remote_done) {
            (true, true) => Lifecycle::Terminal,
            (false, false) => self.lifecycle,
            _ if self.lifecycle == Lifecycle::Terminal => Lifecycle::Terminal,
            _ => Lifecycle::Completing,
        };
    }

    /// Force the stream to its terminal state (cancel or error), discarding
    /// any buffered output.
    pub fn terminate(&mut self) {
        self.lifecycle = Lifecycle::Terminal;
        self.local_done = true;
        self.remote_done = true;
        self.pending.clear();
    }
}
