//! Frame reader: raw byte chunks in, decoded frames out.
//!
//! The reader owns the receive half of the transport and an accumulator
//! buffer. Chunks may arrive split at arbitrary offsets, including inside a
//! frame header; the reader buffers until a complete length-prefixed message
//! is available, decodes it, and yields it. It never yields a partial frame.
//!
//! A fatal decode or transport error is yielded exactly once, after which
//! the reader is poisoned and produces only `None`. Recovery requires a new
//! reader bound to a new transport.

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::{
    error::ConnectionError,
    frame::{Frame, FrameCodec, FramingMode},
    transport::TransportReceiver,
};


/// Decodes a lazy sequence of frames from a transport's receive half.
pub struct FrameReader<R> {
    receiver: R,
    codec: FrameCodec,
    acc: BytesMut,
    poisoned: bool,
}

impl<R: TransportReceiver> FrameReader<R> {
    /// Create a reader over `receiver` using the connection's codec.
    #[must_use]
    pub fn new(receiver: R, codec: FrameCodec) -> Self {
        Self {
            receiver,
            codec,
            acc: BytesMut::new(),
            poisoned: false,
        }
    }

    /// Await the next decoded frame.
    ///
    /// Returns `None` once the transport has closed at a frame boundary, or
    /// on any call after a fatal error was yielded. Frames with an
    /// unrecognised type and the IGNORE flag are skipped, not yielded.
    ///
    /// Cancel-safe: dropping the returned future between chunks loses no
    /// data, because buffered bytes stay in the accumulator.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, ConnectionError>> {
        if self.poisoned {
            return None;
        }
        loop {
            match self.extract_buffered() {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => {}
                Err(err) => return Some(self.poison(err)),
            }
            match self.receiver.receive().await {
                None => {
                    if self.acc.is_empty() {
                        return None;
                    }
                    let err = std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("transport closed mid-frame with {} bytes buffered", self.acc.len()),
                    );
                    return Some(self.poison(err.into()));
                }
                Some(Err(err)) => return Some(self.poison(err.into())),
                Some(Ok(chunk)) => match self.codec.framing() {
                    FramingMode::LengthPrefixed(_) => {
                        trace!(len = chunk.len(), "buffering chunk");
                        self.acc.extend_from_slice(&chunk);
                    }
                    FramingMode::SelfDelimiting => {
                        if chunk.is_empty() {
                            continue;
                        }
                        match self.codec.decode(chunk) {
                            Ok(Some(frame)) => return Some(Ok(frame)),
                            Ok(None) => debug!("skipping ignorable unknown frame"),
                            Err(err) => return Some(self.poison(err.into())),
                        }
                    }
                },
            }
        }
    }

    /// Try to decode one frame from the accumulator without reading more
    /// input. Skips ignorable unknown frames in place.
    fn extract_buffered(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let FramingMode::LengthPrefixed(prefix) = self.codec.framing() else {
            return Ok(None);
        };
        loop {
            let Some(body) = prefix.split_frame(&mut self.acc, self.codec.max_frame_len())? else {
                return Ok(None);
            };
            match self.codec.decode(body)? {
                Some(frame) => return Ok(Some(frame)),
                None => debug!("skipping ignorable unknown frame"),
            }
        }
    }

    fn poison(&mut self, err: ConnectionError) -> Result<Frame, ConnectionError> {
        self.poisoned = true;
        self.acc.clear();
        Err(err)
    }
}
