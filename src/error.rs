//! Error types for the connection core.
//!
//! This module provides a structured error taxonomy that distinguishes
//! between wire-level codec failures, protocol violations, transport I/O
//! failures, and per-stream application errors.
//!
//! # Error Categories
//!
//! - [`ProtocolError`]: semantic violations observed after a frame was successfully decoded
//!   (duplicate stream ids, credit overruns, setup violations). Always connection-fatal.
//! - [`ConnectionError`]: top-level enum wrapping all connection-terminating categories plus the
//!   non-fatal local rejections surfaced when opening a stream.
//! - [`StreamError`]: terminal failure delivered to a single stream's subscriber. Stream errors
//!   never affect other streams on the same connection.
//!
//! Codec errors ([`EncodeError`], [`DecodeError`]) live in [`crate::frame::error`]
//! and convert into [`ConnectionError`] via `#[from]`.

use std::{io, sync::Arc};

use thiserror::Error;

use crate::frame::{
    ErrorCode,
    ProtocolVersion,
    StreamId,
    error::{DecodeError, EncodeError},
};

/// Protocol violations observed on an otherwise well-formed frame stream.
///
/// Every variant is connection-fatal: once the peer has broken a protocol
/// invariant the per-stream state on both sides can no longer be trusted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A REQUEST frame arrived for a stream id that is currently live.
    #[error("duplicate stream id {id}")]
    DuplicateStream {
        /// The id carried by the offending frame.
        id: StreamId,
    },

    /// A frame referenced a stream id that was never validly assigned.
    ///
    /// Late frames for retired ids are dropped silently; this variant is
    /// reserved for ids outside the space either side could have allocated.
    #[error("invalid stream id {id}")]
    InvalidStreamId {
        /// The id carried by the offending frame.
        id: StreamId,
    },

    /// The peer emitted a payload without outstanding credit.
    #[error("credit violation on stream {id}")]
    CreditViolation {
        /// Stream whose credit window was overrun.
        id: StreamId,
    },

    /// A REQUEST_N frame carried a demand of zero.
    #[error("zero REQUEST_N on stream {id}")]
    ZeroRequestN {
        /// Stream the invalid demand was addressed to.
        id: StreamId,
    },

    /// The first frame on a server connection was not SETUP.
    #[error("expected SETUP as first frame")]
    MissingSetup,

    /// A SETUP frame arrived after the connection was already established.
    #[error("unexpected SETUP on an established connection")]
    UnexpectedSetup,

    /// The peer requested a protocol version this connection does not speak.
    #[error("unsupported protocol version {version}")]
    UnsupportedVersion {
        /// Version requested by the peer.
        version: ProtocolVersion,
    },

    /// No keepalive was received within the negotiated timeout.
    #[error("keepalive timeout")]
    KeepaliveTimeout,

    /// The local stream id space is exhausted.
    ///
    /// Ids are allocated monotonically and never reused, so once the 31-bit
    /// space for a role runs out the connection has no further ids to hand
    /// out and must be replaced.
    #[error("stream id space exhausted")]
    StreamIdExhausted,
}

/// Top-level error for a multiplexed connection.
///
/// Fatal variants tear down every live stream; see [`ConnectionError::is_fatal`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A frame could not be encoded for transmission.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The inbound byte stream could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The peer violated a protocol invariant.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The peer terminated the connection with an ERROR frame on stream 0.
    #[error("remote connection error {code}: {message}")]
    Remote {
        /// Error code carried by the frame.
        code: ErrorCode,
        /// UTF-8 message carried by the frame.
        message: String,
    },

    /// The connection was closed, locally or by transport EOF.
    #[error("connection closed")]
    Closed,

    /// A new request was rejected locally because the current lease window
    /// has no remaining admission credit.
    #[error("lease exhausted")]
    LeaseExhausted,
}

impl ConnectionError {
    /// Returns true if this error terminates the connection.
    ///
    /// [`ConnectionError::LeaseExhausted`] is the only non-fatal variant: it
    /// rejects one local request and leaves every existing stream running.
    #[must_use]
    pub fn is_fatal(&self) -> bool { !matches!(self, Self::LeaseExhausted) }

    /// Returns the error category as a string for logging.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::Protocol(_) => "protocol",
            Self::Transport(_) => "transport",
            Self::Remote { .. } => "remote",
            Self::Closed => "closed",
            Self::LeaseExhausted => "lease",
        }
    }
}

/// Terminal failure of a single logical stream.
///
/// Delivered as [`StreamEvent::Error`](crate::stream::StreamEvent::Error);
/// the connection and all other streams are unaffected unless the variant is
/// [`StreamError::ConnectionClosed`], in which case every live stream
/// receives the same shared cause.
#[derive(Clone, Debug, Error)]
pub enum StreamError {
    /// The peer terminated this stream with an ERROR frame.
    #[error("remote stream error {code}: {message}")]
    Remote {
        /// Error code carried by the frame.
        code: ErrorCode,
        /// UTF-8 message carried by the frame.
        message: String,
    },

    /// The local application terminated this stream with an error.
    #[error("stream aborted locally {code}: {message}")]
    Aborted {
        /// Error code sent to the peer.
        code: ErrorCode,
        /// Message sent to the peer.
        message: String,
    },

    /// The connection died while this stream was live.
    #[error("connection closed: {0}")]
    ConnectionClosed(Arc<ConnectionError>),
}
