#![doc(html_root_url = "https://docs.rs/wiremux/latest")]
//! Public API for the `wiremux` library.
//!
//! This crate is the multiplexing and flow-control core of a reactive
//! request/response protocol: it frames a duplex byte connection into
//! discrete protocol messages, demultiplexes them onto independent logical
//! streams, and enforces credit-based backpressure so a slow consumer never
//! causes unbounded buffering or data loss.
//!
//! The building blocks compose as:
//!
//! ```text
//! transport bytes -> FrameReader -> frames -> multiplexer -> StreamEvent
//! application     -> Connection / StreamSender -> frames -> FrameWriter
//! ```
//!
//! [`Connection::establish`] wires a [`Transport`] and a
//! [`ConnectionConfig`] into a running connection; everything else is
//! reachable from the handles it returns.

pub mod connection;
pub mod error;
pub mod frame;
mod mux;
pub mod reader;
pub mod stream;
pub mod transport;
pub mod writer;

pub use connection::{
    Connection,
    ConnectionConfig,
    ConnectionRole,
    IncomingStream,
    IncomingStreams,
    StreamReceiver,
    StreamSender,
};
pub use error::{ConnectionError, ProtocolError, StreamError};
pub use frame::{
    ErrorCode,
    Frame,
    FrameCodec,
    FrameFlags,
    FrameType,
    FramingMode,
    KeepaliveParams,
    LeaseParams,
    LengthPrefix,
    Payload,
    ProtocolVersion,
    SetupParams,
    StreamId,
};
pub use reader::FrameReader;
pub use stream::{InteractionKind, Lifecycle, StreamEvent, StreamRole};
pub use transport::{ByteStream, Transport, TransportReceiver, TransportSender};
pub use writer::{FrameWriter, WriteError};
