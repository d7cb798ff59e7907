//! Application-side commands submitted to the dispatch loop.
//!
//! Every application handle (connection, stream sender, stream receiver)
//! communicates with the multiplexer exclusively through this channel; no
//! handle holds a reference into connection state.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::{
    error::ConnectionError,
    frame::{ErrorCode, Payload, StreamId},
    stream::{InteractionKind, StreamEvent},
};

/// One application event for the multiplexer to act on.
#[derive(Debug)]
pub(crate) enum Command {
    /// Open a locally initiated stream.
    OpenStream {
        kind: InteractionKind,
        payload: Payload,
        initial_n: u32,
        events: mpsc::UnboundedSender<StreamEvent>,
        reply: oneshot::Sender<Result<StreamId, ConnectionError>>,
    },
    /// Emit a payload on a stream, optionally completing the local
    /// direction with it.
    Emit {
        id: StreamId,
        payload: Payload,
        complete: bool,
    },
    /// Complete the local direction without a payload.
    Complete { id: StreamId },
    /// Terminate a stream with an ERROR frame.
    Abort {
        id: StreamId,
        code: ErrorCode,
        message: String,
    },
    /// Grant the peer `n` further units of inbound credit.
    RequestN { id: StreamId, n: u32 },
    /// Cancel a stream.
    Cancel { id: StreamId },
    /// Grant the peer a connection-wide admission lease.
    GrantLease {
        ttl: Duration,
        allowed_requests: u32,
    },
    /// Close the connection.
    Close,
}
