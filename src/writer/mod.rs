//! Frame writer: serialized outbound frame delivery.
//!
//! All frames destined for the transport funnel through one bounded queue
//! into a dedicated writer task that owns the send half. Each frame is fully
//! encoded and handed to the transport before the next is taken, so encoded
//! byte sequences are never interleaved mid-write. Transport backpressure
//! propagates to producers through the queue's capacity.
//!
//! A fatal transport or encode failure is reported to the multiplexer
//! through the connection's fatal-error channel; the task then stops and
//! every queued or future send fails with [`WriteError::Closed`].

use bytes::BytesMut;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::ConnectionError,
    frame::{Frame, FrameCodec},
    transport::TransportSender,
};


/// Error returned when a frame cannot be queued for transmission.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The writer task has stopped; the connection is down.
    #[error("frame writer closed")]
    Closed,
}

/// Cloneable handle accepting frames for transmission.
///
/// Multiple producers may hold handles concurrently; frames from one handle
/// are delivered in the order they were accepted.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<Frame>,
}

impl FrameWriter {
    /// Queue `frame` for transmission, suspending while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closed`] once the writer task has stopped.
    pub async fn send(&self, frame: Frame) -> Result<(), WriteError> {
        self.tx.send(frame).await.map_err(|_| WriteError::Closed)
    }

    /// Queue `frame` without waiting for capacity.
    ///
    /// Used for best-effort frames during teardown, where blocking on a
    /// wedged transport would stall the whole connection.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closed`] if the queue is full or the writer
    /// task has stopped.
    pub fn try_send(&self, frame: Frame) -> Result<(), WriteError> {
        self.tx.try_send(frame).map_err(|_| WriteError::Closed)
    }
}

/// Task draining the frame queue into the transport's send half.
pub struct WriterTask<S> {
    rx: mpsc::Receiver<Frame>,
    sender: S,
    codec: FrameCodec,
    fatal_tx: mpsc::Sender<ConnectionError>,
    shutdown: CancellationToken,
}

/// Create a writer handle and the task that services it.
///
/// `fatal_tx` receives the first fatal failure; `shutdown` aborts the task,
/// discarding queued frames, and closes the transport.
#[must_use]
pub fn channel<S: TransportSender>(
    sender: S,
    codec: FrameCodec,
    capacity: usize,
    fatal_tx: mpsc::Sender<ConnectionError>,
    shutdown: CancellationToken,
) -> (FrameWriter, WriterTask<S>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        FrameWriter { tx },
        WriterTask {
            rx,
            sender,
            codec,
            fatal_tx,
            shutdown,
        },
    )
}

impl<S: TransportSender> WriterTask<S> {
    /// Drive the writer until shutdown, queue closure, or a fatal failure.
    pub async fn run(mut self) {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                frame = self.rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if let Err(err) = self.write_frame(frame).await {
                debug!(error = %err, "writer stopping on fatal error");
                let _ = self.fatal_tx.try_send(err);
                break;
            }
        }
        self.rx.close();
        self.sender.close().await;
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        trace!(
            stream_id = frame.stream_id.value(),
            frame_type = ?frame.frame_type,
            "writing frame"
        );
        let mut buf = BytesMut::new();
        self.codec.encode(&frame, &mut buf)?;
        self.sender.send(buf.freeze()).await?;
        Ok(())
    }
}
