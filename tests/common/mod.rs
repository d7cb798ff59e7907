//! Shared helpers for integration tests.
//!
//! `pair` wires two real connections over an in-memory duplex pipe.
//! `RawPeer` speaks the wire format directly so tests can inject arbitrary
//! byte sequences, including malformed ones no well-behaved endpoint would
//! produce.
#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use wiremux::{
    ByteStream,
    Connection,
    ConnectionConfig,
    Frame,
    FrameCodec,
    FrameType,
    FramingMode,
    IncomingStreams,
    LengthPrefix,
    ProtocolVersion,
    connection::DEFAULT_MAX_FRAME_LEN,
};

/// One side of an established connection pair.
pub struct Endpoint {
    pub conn: Connection,
    pub incoming: IncomingStreams,
}

/// Install a test subscriber once so failing tests come with trace context.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Establish a client/server connection pair over an in-memory pipe.
pub async fn pair() -> (Endpoint, Endpoint) {
    pair_with(ConnectionConfig::client(), ConnectionConfig::server()).await
}

/// Establish a pair with explicit configurations.
pub async fn pair_with(client: ConnectionConfig, server: ConnectionConfig) -> (Endpoint, Endpoint) {
    init_tracing();
    let (a, b) = duplex(256 * 1024);
    let (client_conn, client_incoming) = Connection::establish(ByteStream::new(a), client)
        .await
        .expect("client establish");
    let (server_conn, server_incoming) = Connection::establish(ByteStream::new(b), server)
        .await
        .expect("server establish");
    (
        Endpoint {
            conn: client_conn,
            incoming: client_incoming,
        },
        Endpoint {
            conn: server_conn,
            incoming: server_incoming,
        },
    )
}

/// Establish one real connection; the returned [`RawPeer`] plays the other
/// side byte by byte.
pub async fn with_raw_peer(config: ConnectionConfig) -> (Endpoint, RawPeer) {
    init_tracing();
    let (a, b) = duplex(256 * 1024);
    let (conn, incoming) = Connection::establish(ByteStream::new(a), config)
        .await
        .expect("establish");
    (Endpoint { conn, incoming }, RawPeer::new(b))
}

/// Await `future` with a generous guard against hung tests.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(30), future)
        .await
        .expect("test future timed out")
}

/// Hand-rolled protocol endpoint for byte-level control.
pub struct RawPeer {
    codec: FrameCodec,
    stream: DuplexStream,
    acc: BytesMut,
}

impl RawPeer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            codec: FrameCodec::new(
                ProtocolVersion::CURRENT,
                FramingMode::LengthPrefixed(LengthPrefix::U24),
                DEFAULT_MAX_FRAME_LEN,
            ),
            stream,
            acc: BytesMut::new(),
        }
    }

    /// Encode and transmit one frame.
    pub async fn send(&mut self, frame: &Frame) {
        let mut wire = BytesMut::new();
        self.codec.encode(frame, &mut wire).expect("encode");
        self.stream.write_all(&wire).await.expect("raw send");
        self.stream.flush().await.expect("raw flush");
    }

    /// Transmit arbitrary bytes verbatim.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("raw send");
        self.stream.flush().await.expect("raw flush");
    }

    /// Receive the next frame; `None` once the peer closed the transport.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(body) = LengthPrefix::U24
                .split_frame(&mut self.acc, DEFAULT_MAX_FRAME_LEN)
                .expect("well-formed peer output")
            {
                match self.codec.decode(body).expect("decodable peer output") {
                    Some(frame) => return Some(frame),
                    None => continue,
                }
            }
            let mut chunk = vec![0u8; 4096];
            match self.stream.read(&mut chunk).await.expect("raw read") {
                0 => return None,
                n => self.acc.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Receive frames until one of the given type arrives.
    pub async fn expect_frame(&mut self, frame_type: FrameType) -> Frame {
        loop {
            let frame = self.recv().await.expect("peer closed unexpectedly");
            if frame.frame_type == frame_type {
                return frame;
            }
        }
    }
}
