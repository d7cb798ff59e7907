//! Frame model for the multiplexed wire protocol.
//!
//! A [`Frame`] is one discrete protocol message, either connection-scoped
//! (stream id 0) or addressed to a single logical stream. The binary layout
//! is owned by [`codec`]; typed bodies for SETUP, LEASE, REQUEST_N and ERROR
//! frames live in [`params`].

use bytes::Bytes;

pub mod codec;
pub mod error;
pub mod params;

pub use codec::{FrameCodec, FramingMode, LengthPrefix};
pub use params::{KeepaliveParams, LeaseParams, SetupParams};

#[cfg(test)]
mod tests;

/// Fixed header size: 4-byte stream id word plus 2-byte type/flags word.
pub const HEADER_LEN: usize = 6;

/// Width of the metadata length prefix that follows the header when the
/// METADATA flag is set.
pub const METADATA_LEN_BYTES: usize = 3;

/// Largest metadata section representable by the 3-byte length prefix.
pub const MAX_METADATA_LEN: usize = 0x00FF_FFFF;

/// Saturation point for stream credit: 2^31 - 1.
///
/// REQUEST_N grants accumulate up to this value and saturate rather than
/// wrap, per the credit invariant.
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Identifier of one logical stream on a connection.
///
/// Ids occupy 31 bits on the wire. Id 0 is reserved for connection-scoped
/// frames; client-initiated streams take odd ids and server-initiated
/// streams take even ids, both strictly increasing for the life of the
/// connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// The reserved connection-scope id.
    pub const ZERO: StreamId = StreamId(0);

    /// Largest representable stream id (31 bits).
    pub const MAX: u32 = 0x7FFF_FFFF;

    /// Create a stream id, rejecting values outside the 31-bit range.
    #[must_use]
    pub fn new(value: u32) -> Option<Self> { (value <= Self::MAX).then_some(Self(value)) }

    /// Return the raw id value.
    #[must_use]
    pub fn value(self) -> u32 { self.0 }

    /// Returns true for the reserved connection-scope id.
    #[must_use]
    pub fn is_connection(self) -> bool { self.0 == 0 }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol version negotiated for a connection.
///
/// Immutable once negotiated; the codec, reader and writer all receive it by
/// value at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Major version; a mismatch here is a setup failure.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

impl ProtocolVersion {
    /// The current protocol revision spoken by this crate.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    /// Create a version value.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self { Self { major, minor } }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Discrete frame types carried in the 6-bit type field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Connection establishment; first frame sent by the client role.
    Setup = 0x01,
    /// Connection-wide admission grant.
    Lease = 0x02,
    /// Liveness probe; echoed back when the RESPOND flag is set.
    Keepalive = 0x03,
    /// Single request expecting a single response.
    RequestResponse = 0x04,
    /// Request expecting a stream of payloads.
    RequestStream = 0x05,
    /// Bidirectional payload channel.
    RequestChannel = 0x06,
    /// Credit grant for an existing stream.
    RequestN = 0x07,
    /// Requester abandons a stream.
    Cancel = 0x08,
    /// Data item, optionally carrying stream completion via the COMPLETE flag.
    Payload = 0x09,
    /// Stream error (stream id != 0) or connection error (stream id 0).
    Error = 0x0A,
}

impl FrameType {
    /// Map a wire type id to a frame type, if recognised by this version.
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Setup),
            0x02 => Some(Self::Lease),
            0x03 => Some(Self::Keepalive),
            0x04 => Some(Self::RequestResponse),
            0x05 => Some(Self::RequestStream),
            0x06 => Some(Self::RequestChannel),
            0x07 => Some(Self::RequestN),
            0x08 => Some(Self::Cancel),
            0x09 => Some(Self::Payload),
            0x0A => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns true for the three request-opening frame types.
    #[must_use]
    pub fn opens_stream(self) -> bool {
        matches!(
            self,
            Self::RequestResponse | Self::RequestStream | Self::RequestChannel
        )
    }
}

bitflags::bitflags! {
    /// Frame flags.
    ///
    /// `IGNORE` travels in bit 31 of the stream-id word on the wire; the
    /// remaining flags occupy the 10-bit field beside the frame type. The
    /// codec performs that mapping, so in-memory all flags live in one set.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        /// Receiver may skip this frame if the type is unrecognised.
        const IGNORE = 0x0200;
        /// A metadata section precedes the payload.
        const METADATA = 0x0100;
        /// More fragments of this frame follow.
        const FOLLOWS = 0x0080;
        /// Terminates the sender's direction of the stream.
        const COMPLETE = 0x0040;
        /// The frame carries a data item (consumes one unit of credit).
        const NEXT = 0x0020;
        /// Keepalive: the receiver must echo this frame back.
        const RESPOND = 0x0010;
        /// Setup: the client requests lease-governed admission control.
        const LEASE = 0x0008;
    }
}

impl FrameFlags {
    /// Mask of flags that occupy the on-wire 10-bit flag field.
    pub(crate) const WIRE_MASK: u16 = 0x01FF;
}

/// Error codes carried by ERROR frames.
///
/// Codes below `0x0200` are connection-scoped; the rest apply to a single
/// stream. Unrecognised codes round-trip through [`ErrorCode::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The SETUP frame was malformed.
    InvalidSetup,
    /// The server does not speak the requested protocol version.
    UnsupportedSetup,
    /// The server declined the connection.
    RejectedSetup,
    /// The connection is being terminated due to an internal error.
    ConnectionError,
    /// The responder's application logic failed.
    ApplicationError,
    /// The responder declined the request.
    Rejected,
    /// The responder acknowledges a cancellation it cannot honour in-band.
    Canceled,
    /// The request violated the responder's contract.
    Invalid,
    /// A code not defined by this protocol version.
    Other(u32),
}

impl ErrorCode {
    /// Map a wire code to an error code.
    #[must_use]
    pub fn from_wire(value: u32) -> Self {
        match value {
            0x0001 => Self::InvalidSetup,
            0x0002 => Self::UnsupportedSetup,
            0x0003 => Self::RejectedSetup,
            0x0101 => Self::ConnectionError,
            0x0201 => Self::ApplicationError,
            0x0202 => Self::Rejected,
            0x0203 => Self::Canceled,
            0x0204 => Self::Invalid,
            other => Self::Other(other),
        }
    }

    /// Return the wire representation of this code.
    #[must_use]
    pub fn to_wire(self) -> u32 {
        match self {
            Self::InvalidSetup => 0x0001,
            Self::UnsupportedSetup => 0x0002,
            Self::RejectedSetup => 0x0003,
            Self::ConnectionError => 0x0101,
            Self::ApplicationError => 0x0201,
            Self::Rejected => 0x0202,
            Self::Canceled => 0x0203,
            Self::Invalid => 0x0204,
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "{code:#06x}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// One application data item: opaque payload bytes plus optional metadata.
///
/// The core never interprets either section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    /// Optional metadata bytes.
    pub metadata: Option<Bytes>,
    /// Payload bytes.
    pub data: Bytes,
}

impl Payload {
    /// Create a payload carrying only data.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    /// Attach metadata to this payload.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// One decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Stream the frame is addressed to; 0 for connection scope.
    pub stream_id: StreamId,
    /// Frame type.
    pub frame_type: FrameType,
    /// Flag set; `METADATA` must agree with the `metadata` field.
    pub flags: FrameFlags,
    /// Optional metadata section.
    pub metadata: Option<Bytes>,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, deriving the METADATA flag from the metadata option.
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        frame_type: FrameType,
        mut flags: FrameFlags,
        metadata: Option<Bytes>,
        payload: Bytes,
    ) -> Self {
        flags.set(FrameFlags::METADATA, metadata.is_some());
        Self {
            stream_id,
            frame_type,
            flags,
            metadata,
            payload,
        }
    }

    /// Build a request-opening frame carrying the initial demand and payload.
    ///
    /// REQUEST_STREAM and REQUEST_CHANNEL prefix the body with the initial
    /// REQUEST_N value; REQUEST_RESPONSE has an implicit demand of one and
    /// carries the payload bytes directly.
    #[must_use]
    pub fn request(kind: FrameType, stream_id: StreamId, payload: Payload, initial_n: u32) -> Self {
        debug_assert!(kind.opens_stream());
        let body = if kind == FrameType::RequestResponse {
            payload.data
        } else {
            params::prefix_request_n(initial_n, &payload.data)
        };
        Self::new(stream_id, kind, FrameFlags::empty(), payload.metadata, body)
    }

    /// Build a PAYLOAD frame carrying a data item.
    #[must_use]
    pub fn payload(stream_id: StreamId, payload: Payload, complete: bool) -> Self {
        let mut flags = FrameFlags::NEXT;
        flags.set(FrameFlags::COMPLETE, complete);
        Self::new(
            stream_id,
            FrameType::Payload,
            flags,
            payload.metadata,
            payload.data,
        )
    }

    /// Build a PAYLOAD frame that only signals completion.
    #[must_use]
    pub fn complete(stream_id: StreamId) -> Self {
        Self::new(
            stream_id,
            FrameType::Payload,
            FrameFlags::COMPLETE,
            None,
            Bytes::new(),
        )
    }

    /// Build a REQUEST_N credit grant.
    #[must_use]
    pub fn request_n(stream_id: StreamId, n: u32) -> Self {
        Self::new(
            stream_id,
            FrameType::RequestN,
            FrameFlags::empty(),
            None,
            params::encode_u32(n.min(MAX_REQUEST_N)),
        )
    }

    /// Build a CANCEL frame.
    #[must_use]
    pub fn cancel(stream_id: StreamId) -> Self {
        Self::new(
            stream_id,
            FrameType::Cancel,
            FrameFlags::empty(),
            None,
            Bytes::new(),
        )
    }

    /// Build an ERROR frame for a stream, or for the connection with
    /// [`StreamId::ZERO`].
    #[must_use]
    pub fn error(stream_id: StreamId, code: ErrorCode, message: &str) -> Self {
        Self::new(
            stream_id,
            FrameType::Error,
            FrameFlags::empty(),
            None,
            params::encode_error_body(code, message),
        )
    }

    /// Build a KEEPALIVE frame.
    #[must_use]
    pub fn keepalive(respond: bool, data: Bytes) -> Self {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::RESPOND, respond);
        Self::new(StreamId::ZERO, FrameType::Keepalive, flags, None, data)
    }

    /// Returns true if this frame carries a data item and therefore consumes
    /// one unit of stream credit.
    #[must_use]
    pub fn consumes_credit(&self) -> bool {
        self.frame_type == FrameType::Payload && self.flags.contains(FrameFlags::NEXT)
    }

    /// Extract the application payload carried by this frame.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        Payload {
            metadata: self.metadata,
            data: self.payload,
        }
    }
}
