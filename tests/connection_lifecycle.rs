//! Connection-level behaviour: setup validation, fatal error isolation,
//! keepalive liveness, leases, and close semantics.

mod common;

use std::{sync::Arc, time::Duration};

use bytes::{BufMut, BytesMut};
use common::{Endpoint, pair, pair_with, with_raw_peer, within};
use wiremux::{
    ConnectionConfig,
    ConnectionError,
    ErrorCode,
    Frame,
    FrameType,
    KeepaliveParams,
    LeaseParams,
    Payload,
    ProtocolVersion,
    SetupParams,
    StreamError,
    StreamEvent,
    StreamId,
};

fn payload(text: &str) -> Payload { Payload::new(text.to_owned()) }

async fn open_live_stream(endpoint: &Endpoint) -> wiremux::StreamReceiver {
    endpoint
        .conn
        .request_stream(payload("live"), 1)
        .await
        .expect("open stream")
}

fn connection_closed_cause(event: Option<StreamEvent>) -> Arc<ConnectionError> {
    match event {
        Some(StreamEvent::Error(StreamError::ConnectionClosed(cause))) => cause,
        other => panic!("expected connection-closed error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_frame_type_kills_the_connection_and_every_stream() {
    let (client, mut peer) = with_raw_peer(ConnectionConfig::client()).await;
    peer.expect_frame(FrameType::Setup).await;

    let mut stream_a = open_live_stream(&client).await;
    let mut stream_b = open_live_stream(&client).await;
    peer.expect_frame(FrameType::RequestStream).await;
    peer.expect_frame(FrameType::RequestStream).await;

    // Unknown frame type 0x3F without the IGNORE flag: framing can no longer
    // be trusted.
    let mut wire = BytesMut::new();
    wire.put_uint(6, 3);
    wire.put_u32(0);
    wire.put_u16(0x3F << 10);
    peer.send_bytes(&wire).await;

    let cause_a = connection_closed_cause(within(stream_a.recv()).await);
    assert!(matches!(cause_a.as_ref(), ConnectionError::Decode(_)));
    let cause_b = connection_closed_cause(within(stream_b.recv()).await);
    assert!(matches!(cause_b.as_ref(), ConnectionError::Decode(_)));

    // New work is refused once the connection is down.
    let err = client
        .conn
        .request_response(payload("late"))
        .await
        .expect_err("connection is closed");
    assert!(matches!(err, ConnectionError::Closed));
}

#[tokio::test]
async fn ignorable_unknown_frame_is_skipped_and_connection_survives() {
    let (client, mut peer) = with_raw_peer(ConnectionConfig::client()).await;
    peer.expect_frame(FrameType::Setup).await;

    let mut stream = open_live_stream(&client).await;
    let request = peer.expect_frame(FrameType::RequestStream).await;

    // Same unknown type, but with IGNORE set in the stream id word.
    let mut wire = BytesMut::new();
    wire.put_uint(6, 3);
    wire.put_u32(1 << 31);
    wire.put_u16(0x3F << 10);
    peer.send_bytes(&wire).await;

    peer.send(&Frame::payload(request.stream_id, payload("after"), true))
        .await;
    match within(stream.recv()).await {
        Some(StreamEvent::Payload(p)) => assert_eq!(p.data.as_ref(), b"after"),
        other => panic!("expected payload, got {other:?}"),
    }
    match within(stream.recv()).await {
        Some(StreamEvent::Complete) => {}
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_credit_violation_is_fatal() {
    let (client, mut peer) = with_raw_peer(ConnectionConfig::client()).await;
    peer.expect_frame(FrameType::Setup).await;

    let mut stream = client
        .conn
        .request_stream(payload("two"), 2)
        .await
        .expect("open");
    let request = peer.expect_frame(FrameType::RequestStream).await;

    for i in 0..3 {
        peer.send(&Frame::payload(request.stream_id, payload(&format!("{i}")), false))
            .await;
    }

    let mut events = Vec::new();
    while let Some(event) = within(stream.recv()).await {
        events.push(event);
    }
    let payloads = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Payload(_)))
        .count();
    assert_eq!(payloads, 2, "only credited payloads are delivered");
    let cause = connection_closed_cause(events.pop());
    assert!(matches!(
        cause.as_ref(),
        ConnectionError::Protocol(wiremux::ProtocolError::CreditViolation { .. })
    ));
}

#[tokio::test]
async fn late_frames_for_finished_streams_are_dropped_silently() {
    let (client, mut peer) = with_raw_peer(ConnectionConfig::client()).await;
    peer.expect_frame(FrameType::Setup).await;

    let mut stream = client
        .conn
        .request_stream(payload("short"), 1)
        .await
        .expect("open");
    let request = peer.expect_frame(FrameType::RequestStream).await;

    peer.send(&Frame::payload(request.stream_id, payload("only"), true))
        .await;
    match within(stream.recv()).await {
        Some(StreamEvent::Payload(_)) => {}
        other => panic!("expected payload, got {other:?}"),
    }
    match within(stream.recv()).await {
        Some(StreamEvent::Complete) => {}
        other => panic!("expected completion, got {other:?}"),
    }

    // A straggler for the retired id must not kill the connection: a fresh
    // request still makes it to the peer afterwards.
    peer.send(&Frame::payload(request.stream_id, payload("late"), false))
        .await;
    let _probe = open_live_stream(&client).await;
    peer.expect_frame(FrameType::RequestStream).await;
}

#[tokio::test]
async fn server_requires_setup_first() {
    // The whole endpoint stays alive: closure must come from the protocol
    // violation, not from dropped handles.
    let (mut server, mut peer) = with_raw_peer(ConnectionConfig::server()).await;

    // First frame is not SETUP: the server must refuse the connection.
    peer.send(&Frame::cancel(StreamId::new(1).expect("id")))
        .await;
    assert!(
        within(server.incoming.accept()).await.is_none(),
        "connection must close without ever accepting a stream"
    );
}

#[tokio::test]
async fn server_rejects_version_mismatch() {
    let (mut server, mut peer) = with_raw_peer(ConnectionConfig::server()).await;

    let setup = SetupParams {
        version: ProtocolVersion::new(9, 0),
        keepalive: None,
        lease: false,
    };
    peer.send(&setup.to_frame()).await;
    assert!(within(server.incoming.accept()).await.is_none());
}

#[tokio::test]
async fn server_accepts_matching_setup() {
    let (mut server, mut peer) = with_raw_peer(ConnectionConfig::server()).await;

    let setup = SetupParams {
        version: ProtocolVersion::CURRENT,
        keepalive: None,
        lease: false,
    };
    peer.send(&setup.to_frame()).await;
    peer.send(&Frame::request(
        FrameType::RequestResponse,
        StreamId::new(1).expect("id"),
        payload("hello"),
        1,
    ))
    .await;

    let request = within(server.incoming.accept()).await.expect("stream accepted");
    assert_eq!(request.request.data.as_ref(), b"hello");
}

#[tokio::test]
async fn remote_connection_error_reaches_every_stream() {
    let (client, mut peer) = with_raw_peer(ConnectionConfig::client()).await;
    peer.expect_frame(FrameType::Setup).await;

    let mut stream = open_live_stream(&client).await;
    peer.expect_frame(FrameType::RequestStream).await;

    peer.send(&Frame::error(
        StreamId::ZERO,
        ErrorCode::ConnectionError,
        "maintenance",
    ))
    .await;

    let cause = connection_closed_cause(within(stream.recv()).await);
    match cause.as_ref() {
        ConnectionError::Remote { code, message } => {
            assert_eq!(*code, ErrorCode::ConnectionError);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected remote cause, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn missed_keepalives_kill_the_connection() {
    let config = ConnectionConfig::client().with_keepalive(KeepaliveParams {
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(5),
    });
    let (client, mut peer) = with_raw_peer(config).await;
    peer.expect_frame(FrameType::Setup).await;

    let mut stream = open_live_stream(&client).await;
    peer.expect_frame(FrameType::RequestStream).await;

    // The peer never answers any KEEPALIVE; after the timeout the
    // connection declares the peer dead.
    let cause = connection_closed_cause(within(stream.recv()).await);
    assert!(matches!(
        cause.as_ref(),
        ConnectionError::Protocol(wiremux::ProtocolError::KeepaliveTimeout)
    ));
}

#[tokio::test]
async fn keepalives_are_echoed_between_real_endpoints() {
    let client_config = ConnectionConfig::client().with_keepalive(KeepaliveParams {
        interval: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
    });
    let (client, mut server) = pair_with(client_config, ConnectionConfig::server()).await;

    // Enough round trips for several keepalive exchanges.
    let mut response = client
        .conn
        .request_response(payload("checkup"))
        .await
        .expect("open");
    let incoming = within(server.incoming.accept()).await.expect("incoming");
    tokio::time::sleep(Duration::from_millis(100)).await;
    incoming
        .responder
        .send_last(payload("fine"))
        .await
        .expect("respond");
    match within(response.recv()).await {
        Some(StreamEvent::Payload(p)) => assert_eq!(p.data.as_ref(), b"fine"),
        other => panic!("expected payload, got {other:?}"),
    }
}

#[tokio::test]
async fn lease_gates_new_requests() {
    let config = ConnectionConfig::client().with_lease();
    let (client, mut peer) = with_raw_peer(config).await;
    peer.expect_frame(FrameType::Setup).await;

    // No lease granted yet.
    let err = client
        .conn
        .request_response(payload("early"))
        .await
        .expect_err("no admission credit");
    assert!(matches!(err, ConnectionError::LeaseExhausted));

    peer.send(
        &LeaseParams {
            ttl: Duration::from_secs(60),
            allowed_requests: 2,
        }
        .to_frame(),
    )
    .await;

    // Lease processing races the already-queued command path, so poll until
    // the grant has been dispatched; rejected attempts consume no budget.
    let _first = loop {
        match client.conn.request_response(payload("one")).await {
            Ok(receiver) => break receiver,
            Err(ConnectionError::LeaseExhausted) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(other) => panic!("unexpected open failure: {other}"),
        }
    };
    peer.expect_frame(FrameType::RequestResponse).await;
    let _second = within(client.conn.request_response(payload("two")))
        .await
        .expect("admitted");
    peer.expect_frame(FrameType::RequestResponse).await;

    let err = within(client.conn.request_response(payload("three")))
        .await
        .expect_err("budget exhausted");
    assert!(matches!(err, ConnectionError::LeaseExhausted));
}

#[tokio::test]
async fn close_is_idempotent_and_terminates_streams() {
    let (client, mut server) = pair().await;

    let mut stream = client
        .conn
        .request_stream(payload("live"), 1)
        .await
        .expect("open");
    let _incoming = within(server.incoming.accept()).await.expect("incoming");

    client.conn.close().await;
    let cause = connection_closed_cause(within(stream.recv()).await);
    assert!(matches!(cause.as_ref(), ConnectionError::Closed));

    // Closing again is a no-op.
    client.conn.close().await;
    let err = client
        .conn
        .request_response(payload("after-close"))
        .await
        .expect_err("closed");
    assert!(matches!(err, ConnectionError::Closed));

    // The peer observes transport EOF and winds down too.
    assert!(within(server.incoming.accept()).await.is_none());
}
