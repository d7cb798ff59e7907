//! Transport capability traits.
//!
//! The core depends on an abstract duplex byte channel, never on a concrete
//! socket type. A transport splits into independent send and receive halves
//! so the writer task and the frame reader can run without sharing state.
//!
//! [`ByteStream`] adapts any `AsyncRead + AsyncWrite` pair (TCP, TLS,
//! in-memory duplex pipes in tests) to the capability traits. Byte-stream
//! transports do not delimit messages, so they are used with
//! [`FramingMode::LengthPrefixed`](crate::frame::FramingMode::LengthPrefixed);
//! message transports such as WebSocket implement the traits directly and
//! run self-delimiting.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Read size for byte-stream chunks.
const READ_CHUNK: usize = 8 * 1024;

/// Send half of a duplex transport.
#[async_trait]
pub trait TransportSender: Send + 'static {
    /// Transmit `bytes` in order, suspending while the transport is not
    /// ready to accept more output.
    ///
    /// # Errors
    ///
    /// Returns the transport's fatal send failure; the connection treats any
    /// error here as unrecoverable.
    async fn send(&mut self, bytes: Bytes) -> io::Result<()>;

    /// Close the send direction. Best effort; errors are discarded.
    async fn close(&mut self);
}

/// Receive half of a duplex transport.
#[async_trait]
pub trait TransportReceiver: Send + 'static {
    /// Await the next chunk of bytes.
    ///
    /// Chunk boundaries carry no meaning on byte-stream transports and may
    /// fall anywhere, including inside a frame header. Message transports
    /// deliver exactly one frame body per chunk. Returns `None` once the
    /// transport has closed.
    async fn receive(&mut self) -> Option<io::Result<Bytes>>;
}

/// A duplex transport that can be split into independent halves.
pub trait Transport: Send + 'static {
    /// Send half type.
    type Sender: TransportSender;
    /// Receive half type.
    type Receiver: TransportReceiver;

    /// Split into send and receive halves.
    fn split(self) -> (Self::Sender, Self::Receiver);
}

/// Adapter presenting any async byte stream as a [`Transport`].
pub struct ByteStream<T> {
    inner: T,
}

impl<T> ByteStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a byte stream.
    #[must_use]
    pub fn new(inner: T) -> Self { Self { inner } }
}

impl<T> Transport for ByteStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    type Sender = ByteStreamSender<T>;
    type Receiver = ByteStreamReceiver<T>;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        let (reader, writer) = tokio::io::split(self.inner);
        (
            ByteStreamSender { writer },
            ByteStreamReceiver { reader },
        )
    }
}

/// Send half of a [`ByteStream`].
pub struct ByteStreamSender<T> {
    writer: WriteHalf<T>,
}

#[async_trait]
impl<T> TransportSender for ByteStreamSender<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, bytes: Bytes) -> io::Result<()> {
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await
    }

    async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Receive half of a [`ByteStream`].
pub struct ByteStreamReceiver<T> {
    reader: ReadHalf<T>,
}

#[async_trait]
impl<T> TransportReceiver for ByteStreamReceiver<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn receive(&mut self) -> Option<io::Result<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        match self.reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some(Ok(buf.freeze())),
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn byte_stream_round_trip_and_eof() {
        let (a, b) = tokio::io::duplex(1024);
        let (mut a_tx, _a_rx) = ByteStream::new(a).split();
        let (_b_tx, mut b_rx) = ByteStream::new(b).split();

        a_tx.send(Bytes::from_static(b"hello")).await.expect("send");
        a_tx.send(Bytes::from_static(b" world")).await.expect("send");

        let mut received = Vec::new();
        while received.len() < 11 {
            let chunk = b_rx
                .receive()
                .await
                .expect("stream open")
                .expect("no transport error");
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"hello world");

        a_tx.close().await;
        drop(_a_rx);
        assert!(b_rx.receive().await.is_none(), "EOF after close");
    }
}
