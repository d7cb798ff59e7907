//! Typed bodies for connection-level and credit frames.
//!
//! SETUP, LEASE, REQUEST_N and ERROR frames carry small fixed layouts in
//! their payload section. This module owns those layouts so the codec can
//! stay agnostic of frame semantics.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    ErrorCode,
    Frame,
    FrameFlags,
    FrameType,
    MAX_REQUEST_N,
    ProtocolVersion,
    StreamId,
    error::DecodeError,
};

/// Keepalive timing negotiated in SETUP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepaliveParams {
    /// How often the client emits KEEPALIVE frames.
    pub interval: Duration,
    /// How long either side waits for a keepalive before declaring the
    /// connection dead.
    pub timeout: Duration,
}

/// Parameters carried by the SETUP frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupParams {
    /// Protocol version the client intends to speak.
    pub version: ProtocolVersion,
    /// Keepalive timing; `None` disables liveness probing.
    pub keepalive: Option<KeepaliveParams>,
    /// Whether the client requests lease-governed admission control.
    pub lease: bool,
}

impl SetupParams {
    /// Body length: version (4) + interval ms (4) + timeout ms (4).
    const BODY_LEN: usize = 12;

    /// Build the SETUP frame announcing these parameters.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut body = BytesMut::with_capacity(Self::BODY_LEN);
        body.put_u16(self.version.major);
        body.put_u16(self.version.minor);
        let (interval, timeout) = match self.keepalive {
            Some(ka) => (millis_u32(ka.interval), millis_u32(ka.timeout)),
            None => (0, 0),
        };
        body.put_u32(interval);
        body.put_u32(timeout);
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::LEASE, self.lease);
        Frame::new(StreamId::ZERO, FrameType::Setup, flags, None, body.freeze())
    }

    /// Parse SETUP parameters out of a received frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TruncatedBody`] if the body is shorter than the
    /// fixed SETUP layout.
    pub fn from_frame(frame: &Frame) -> Result<Self, DecodeError> {
        let mut body = frame.payload.clone();
        if body.len() < Self::BODY_LEN {
            return Err(DecodeError::TruncatedBody {
                frame: "SETUP",
                have: body.len(),
                need: Self::BODY_LEN,
            });
        }
        let version = ProtocolVersion::new(body.get_u16(), body.get_u16());
        let interval = body.get_u32();
        let timeout = body.get_u32();
        let keepalive = (interval > 0).then(|| KeepaliveParams {
            interval: Duration::from_millis(u64::from(interval)),
            timeout: Duration::from_millis(u64::from(timeout)),
        });
        Ok(Self {
            version,
            keepalive,
            lease: frame.flags.contains(FrameFlags::LEASE),
        })
    }
}

/// Parameters carried by a LEASE frame.
///
/// A lease grants the receiver permission to initiate `allowed_requests` new
/// streams within `ttl` of receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseParams {
    /// Validity window of the grant.
    pub ttl: Duration,
    /// Number of new requests admitted within the window.
    pub allowed_requests: u32,
}

impl LeaseParams {
    const BODY_LEN: usize = 8;

    /// Build the LEASE frame announcing this grant.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut body = BytesMut::with_capacity(Self::BODY_LEN);
        body.put_u32(millis_u32(self.ttl));
        body.put_u32(self.allowed_requests);
        Frame::new(
            StreamId::ZERO,
            FrameType::Lease,
            FrameFlags::empty(),
            None,
            body.freeze(),
        )
    }

    /// Parse LEASE parameters out of a received frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TruncatedBody`] if the body is shorter than the
    /// fixed LEASE layout.
    pub fn from_frame(frame: &Frame) -> Result<Self, DecodeError> {
        let mut body = frame.payload.clone();
        if body.len() < Self::BODY_LEN {
            return Err(DecodeError::TruncatedBody {
                frame: "LEASE",
                have: body.len(),
                need: Self::BODY_LEN,
            });
        }
        Ok(Self {
            ttl: Duration::from_millis(u64::from(body.get_u32())),
            allowed_requests: body.get_u32(),
        })
    }
}

/// Encode a bare big-endian u32 body.
#[must_use]
pub(crate) fn encode_u32(value: u32) -> Bytes {
    let mut body = BytesMut::with_capacity(4);
    body.put_u32(value);
    body.freeze()
}

/// Prefix `data` with an initial REQUEST_N value, as carried by
/// REQUEST_STREAM and REQUEST_CHANNEL bodies.
#[must_use]
pub(crate) fn prefix_request_n(n: u32, data: &Bytes) -> Bytes {
    let mut body = BytesMut::with_capacity(4 + data.len());
    body.put_u32(n.min(MAX_REQUEST_N));
    body.put_slice(data);
    body.freeze()
}

/// Split the initial REQUEST_N prefix off a REQUEST_STREAM or
/// REQUEST_CHANNEL body, returning the demand and the remaining payload.
///
/// # Errors
///
/// Returns [`DecodeError::TruncatedBody`] if fewer than four bytes remain.
pub fn split_initial_request_n(mut body: Bytes) -> Result<(u32, Bytes), DecodeError> {
    if body.len() < 4 {
        return Err(DecodeError::TruncatedBody {
            frame: "REQUEST",
            have: body.len(),
            need: 4,
        });
    }
    let n = body.get_u32() & MAX_REQUEST_N;
    Ok((n, body))
}

/// Parse the demand out of a REQUEST_N frame body.
///
/// # Errors
///
/// Returns [`DecodeError::TruncatedBody`] if the body is shorter than four
/// bytes.
pub fn decode_request_n(frame: &Frame) -> Result<u32, DecodeError> {
    let mut body = frame.payload.clone();
    if body.len() < 4 {
        return Err(DecodeError::TruncatedBody {
            frame: "REQUEST_N",
            have: body.len(),
            need: 4,
        });
    }
    Ok(body.get_u32() & MAX_REQUEST_N)
}

/// Encode an ERROR frame body: u32 code followed by a UTF-8 message.
#[must_use]
pub(crate) fn encode_error_body(code: ErrorCode, message: &str) -> Bytes {
    let mut body = BytesMut::with_capacity(4 + message.len());
    body.put_u32(code.to_wire());
    body.put_slice(message.as_bytes());
    body.freeze()
}

/// Parse an ERROR frame body into its code and message.
///
/// # Errors
///
/// Returns [`DecodeError::TruncatedBody`] for a body shorter than the code
/// field and [`DecodeError::InvalidErrorMessage`] for a non-UTF-8 message.
pub fn decode_error_body(frame: &Frame) -> Result<(ErrorCode, String), DecodeError> {
    let mut body = frame.payload.clone();
    if body.len() < 4 {
        return Err(DecodeError::TruncatedBody {
            frame: "ERROR",
            have: body.len(),
            need: 4,
        });
    }
    let code = ErrorCode::from_wire(body.get_u32());
    let message = std::str::from_utf8(&body)
        .map_err(|_| DecodeError::InvalidErrorMessage)?
        .to_owned();
    Ok((code, message))
}

/// Clamp a duration to the u32 millisecond range used on the wire.
fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
