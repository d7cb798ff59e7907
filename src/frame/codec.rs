//! Binary frame codec.
//!
//! The codec is a pure value: it holds the negotiated [`ProtocolVersion`],
//! the transport [`FramingMode`] and the maximum frame size, and exposes
//! stateless `encode`/`decode` over complete frame bodies. Reassembly of
//! bodies from arbitrary byte chunks belongs to the reader.
//!
//! # Wire layout
//!
//! ```text
//! [length prefix]            u24/u32, length-prefixed mode only
//! stream id word             u32: bit 31 = IGNORE, bits 30..0 = stream id
//! type/flags word            u16: bits 15..10 = type, bits 9..0 = flags
//! [metadata length]          u24, present when the METADATA flag is set
//! [metadata bytes]
//! payload bytes              remainder of the frame
//! ```
//!
//! Transports that delimit messages natively (`FramingMode::SelfDelimiting`)
//! omit the length prefix entirely; each received chunk is exactly one frame
//! body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    Frame,
    FrameFlags,
    FrameType,
    HEADER_LEN,
    MAX_METADATA_LEN,
    METADATA_LEN_BYTES,
    ProtocolVersion,
    StreamId,
    error::{DecodeError, EncodeError},
};

const IGNORE_BIT: u32 = 1 << 31;
const STREAM_ID_MASK: u32 = StreamId::MAX;

/// Width of the connection-level length prefix.
///
/// The exact width is version- and transport-dependent, so it is a
/// construction parameter rather than a constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthPrefix {
    /// 3-byte big-endian prefix (the protocol default).
    U24,
    /// 4-byte big-endian prefix.
    U32,
}

impl LengthPrefix {
    /// Prefix width in bytes.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::U24 => 3,
            Self::U32 => 4,
        }
    }

    /// Largest frame body length this prefix can declare.
    #[must_use]
    pub fn max_representable(self) -> usize {
        match self {
            Self::U24 => 0x00FF_FFFF,
            Self::U32 => 0xFFFF_FFFF,
        }
    }

    /// Append a length prefix to `dst`.
    pub(crate) fn write(self, len: usize, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if len > self.max_representable() {
            return Err(EncodeError::FrameTooLarge {
                len,
                max: self.max_representable(),
            });
        }
        dst.put_uint(len as u64, self.width());
        Ok(())
    }

    /// Try to split one complete length-prefixed frame body off the front of
    /// `src`.
    ///
    /// Returns `Ok(None)` while `src` holds less than one complete message;
    /// the caller buffers the remainder and retries after the next chunk.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::FrameTooLarge`] as soon as the prefix declares
    /// a length beyond `max_len`, without waiting for the body to arrive.
    pub fn split_frame(
        self,
        src: &mut BytesMut,
        max_len: usize,
    ) -> Result<Option<Bytes>, DecodeError> {
        let width = self.width();
        if src.len() < width {
            return Ok(None);
        }
        let mut prefix = &src[..width];
        let len = usize::try_from(prefix.get_uint(width)).unwrap_or(usize::MAX);
        if len > max_len {
            return Err(DecodeError::FrameTooLarge { len, max: max_len });
        }
        if src.len() < width + len {
            return Ok(None);
        }
        src.advance(width);
        Ok(Some(src.split_to(len).freeze()))
    }
}

/// How frame boundaries are delimited on the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingMode {
    /// Byte-stream transports: every frame is preceded by a length prefix.
    LengthPrefixed(LengthPrefix),
    /// Message transports (for example WebSocket): the transport delivers
    /// one complete frame body per chunk and no prefix is written.
    SelfDelimiting,
}

impl Default for FramingMode {
    fn default() -> Self { Self::LengthPrefixed(LengthPrefix::U24) }
}

/// Stateless frame encoder/decoder bound to one connection's parameters.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    version: ProtocolVersion,
    framing: FramingMode,
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec for the negotiated connection parameters.
    #[must_use]
    pub fn new(version: ProtocolVersion, framing: FramingMode, max_frame_len: usize) -> Self {
        Self {
            version,
            framing,
            max_frame_len,
        }
    }

    /// Protocol version this codec encodes for.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion { self.version }

    /// Framing mode in effect for the connection.
    #[must_use]
    pub fn framing(&self) -> FramingMode { self.framing }

    /// Maximum frame body length accepted and produced.
    #[must_use]
    pub fn max_frame_len(&self) -> usize { self.max_frame_len }

    /// Encode `frame` into `dst`, including the length prefix when the
    /// framing mode calls for one.
    ///
    /// # Errors
    ///
    /// - [`EncodeError::MetadataFlagMismatch`] if the METADATA flag disagrees with the metadata
    ///   option.
    /// - [`EncodeError::MetadataTooLarge`] if the metadata exceeds the 3-byte length range.
    /// - [`EncodeError::FrameTooLarge`] if the body exceeds the connection's maximum frame size.
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if frame.flags.contains(FrameFlags::METADATA) != frame.metadata.is_some() {
            return Err(EncodeError::MetadataFlagMismatch);
        }
        let metadata_section = match &frame.metadata {
            Some(md) if md.len() > MAX_METADATA_LEN => {
                return Err(EncodeError::MetadataTooLarge {
                    len: md.len(),
                    max: MAX_METADATA_LEN,
                });
            }
            Some(md) => METADATA_LEN_BYTES + md.len(),
            None => 0,
        };
        let body_len = HEADER_LEN + metadata_section + frame.payload.len();
        if body_len > self.max_frame_len {
            return Err(EncodeError::FrameTooLarge {
                len: body_len,
                max: self.max_frame_len,
            });
        }

        if let FramingMode::LengthPrefixed(prefix) = self.framing {
            prefix.write(body_len, dst)?;
        }
        dst.reserve(body_len);

        let mut id_word = frame.stream_id.value() & STREAM_ID_MASK;
        if frame.flags.contains(FrameFlags::IGNORE) {
            id_word |= IGNORE_BIT;
        }
        dst.put_u32(id_word);
        dst.put_u16(u16::from(frame.frame_type as u8) << 10 | (frame.flags.bits() & FrameFlags::WIRE_MASK));

        if let Some(md) = &frame.metadata {
            dst.put_uint(md.len() as u64, METADATA_LEN_BYTES);
            dst.put_slice(md);
        }
        dst.put_slice(&frame.payload);
        Ok(())
    }

    /// Decode one complete frame body (without length prefix).
    ///
    /// Returns `Ok(None)` for a frame whose type is unrecognised but whose
    /// IGNORE flag is set; the caller skips it. An unrecognised type without
    /// IGNORE is fatal.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::TruncatedHeader`] if `body` is shorter than the fixed header.
    /// - [`DecodeError::UnknownFrameType`] for an unrecognised type without IGNORE.
    /// - [`DecodeError::TruncatedMetadata`] if the metadata prefix overruns the body.
    /// - [`DecodeError::FrameTooLarge`] if the body exceeds the maximum frame size (relevant for
    ///   self-delimiting transports, where no prefix was checked).
    pub fn decode(&self, body: Bytes) -> Result<Option<Frame>, DecodeError> {
        if body.len() > self.max_frame_len {
            return Err(DecodeError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_len,
            });
        }
        if body.len() < HEADER_LEN {
            return Err(DecodeError::TruncatedHeader {
                have: body.len(),
                need: HEADER_LEN,
            });
        }
        let mut rest = body;
        let id_word = rest.get_u32();
        let ignore = id_word & IGNORE_BIT != 0;
        // Infallible: the mask confines the value to 31 bits.
        let stream_id = StreamId::new(id_word & STREAM_ID_MASK)
            .unwrap_or(StreamId::ZERO);
        let type_word = rest.get_u16();
        let type_id = (type_word >> 10) as u8;
        let mut flags = FrameFlags::from_bits_truncate(type_word & FrameFlags::WIRE_MASK);
        flags.set(FrameFlags::IGNORE, ignore);

        let Some(frame_type) = FrameType::from_wire(type_id) else {
            if ignore {
                return Ok(None);
            }
            return Err(DecodeError::UnknownFrameType { type_id });
        };

        let metadata = if flags.contains(FrameFlags::METADATA) {
            if rest.len() < METADATA_LEN_BYTES {
                return Err(DecodeError::TruncatedHeader {
                    have: HEADER_LEN + rest.len(),
                    need: HEADER_LEN + METADATA_LEN_BYTES,
                });
            }
            let declared = usize::try_from(rest.get_uint(METADATA_LEN_BYTES))
                .unwrap_or(usize::MAX);
            if declared > rest.len() {
                return Err(DecodeError::TruncatedMetadata {
                    declared,
                    remaining: rest.len(),
                });
            }
            Some(rest.split_to(declared))
        } else {
            None
        };

        Ok(Some(Frame {
            stream_id,
            frame_type,
            flags,
            metadata,
            payload: rest,
        }))
    }
}
