//! Codec error types.
//!
//! Encode and decode failures are always connection-fatal: once the framing
//! of the byte stream cannot be trusted, no further frame boundary can be
//! recovered reliably.

use thiserror::Error;

/// Errors raised while encoding a frame for transmission.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The frame's metadata option disagrees with its METADATA flag.
    #[error("metadata present without METADATA flag (or vice versa)")]
    MetadataFlagMismatch,

    /// The metadata section exceeds the 3-byte length prefix range.
    #[error("metadata too large: {len} > {max}")]
    MetadataTooLarge {
        /// Metadata length in bytes.
        len: usize,
        /// Largest encodable metadata length.
        max: usize,
    },

    /// The encoded frame would exceed the negotiated maximum frame size.
    #[error("frame exceeds max length: {len} > {max}")]
    FrameTooLarge {
        /// Encoded frame length in bytes.
        len: usize,
        /// Maximum frame length for this connection.
        max: usize,
    },
}

/// Errors raised while decoding bytes into a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header requires.
    #[error("truncated frame header: have {have}, need {need}")]
    TruncatedHeader {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// The 6-bit type field holds a value this protocol version does not
    /// recognise and the IGNORE flag is absent.
    #[error("unknown frame type {type_id:#04x}")]
    UnknownFrameType {
        /// Raw type field value.
        type_id: u8,
    },

    /// The declared metadata length overruns the frame body.
    #[error("metadata length {declared} exceeds remaining {remaining} bytes")]
    TruncatedMetadata {
        /// Length declared by the metadata prefix.
        declared: usize,
        /// Bytes actually remaining in the frame.
        remaining: usize,
    },

    /// A length prefix declared a frame larger than the negotiated maximum.
    #[error("frame exceeds max length: {len} > {max}")]
    FrameTooLarge {
        /// Declared frame length in bytes.
        len: usize,
        /// Maximum frame length for this connection.
        max: usize,
    },

    /// A typed frame body (SETUP, LEASE, REQUEST_N, ERROR) was shorter than
    /// its fixed layout requires.
    #[error("truncated {frame} body: have {have}, need {need}")]
    TruncatedBody {
        /// Frame type whose body was short.
        frame: &'static str,
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// An ERROR frame body was not valid UTF-8.
    #[error("error message is not valid UTF-8")]
    InvalidErrorMessage,
}
