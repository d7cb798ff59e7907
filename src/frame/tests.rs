//! Unit tests for the frame codec and typed frame bodies.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;

use super::{
    ErrorCode,
    Frame,
    FrameCodec,
    FrameFlags,
    FrameType,
    FramingMode,
    KeepaliveParams,
    LeaseParams,
    LengthPrefix,
    MAX_REQUEST_N,
    Payload,
    ProtocolVersion,
    SetupParams,
    StreamId,
    error::{DecodeError, EncodeError},
    params,
};

const MAX_LEN: usize = 4096;

fn codec(framing: FramingMode) -> FrameCodec {
    FrameCodec::new(ProtocolVersion::CURRENT, framing, MAX_LEN)
}

fn sid(value: u32) -> StreamId { StreamId::new(value).expect("stream id in range") }

fn sample_frames() -> Vec<Frame> {
    vec![
        Frame::request(
            FrameType::RequestStream,
            sid(1),
            Payload::new("query").with_metadata("route"),
            2,
        ),
        Frame::request(FrameType::RequestResponse, sid(3), Payload::new("ping"), 1),
        Frame::payload(sid(1), Payload::new("item"), false),
        Frame::payload(sid(1), Payload::new("last").with_metadata("md"), true),
        Frame::complete(sid(1)),
        Frame::request_n(sid(1), 128),
        Frame::cancel(sid(5)),
        Frame::error(sid(1), ErrorCode::ApplicationError, "boom"),
        Frame::error(StreamId::ZERO, ErrorCode::ConnectionError, "going away"),
        Frame::keepalive(true, Bytes::from_static(b"ka")),
        SetupParams {
            version: ProtocolVersion::CURRENT,
            keepalive: Some(KeepaliveParams {
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(30),
            }),
            lease: true,
        }
        .to_frame(),
        LeaseParams {
            ttl: Duration::from_secs(10),
            allowed_requests: 64,
        }
        .to_frame(),
    ]
}

#[test]
fn round_trip_self_delimiting() {
    let codec = codec(FramingMode::SelfDelimiting);
    for frame in sample_frames() {
        let mut wire = BytesMut::new();
        codec.encode(&frame, &mut wire).expect("encode");
        let decoded = codec
            .decode(wire.freeze())
            .expect("decode")
            .expect("recognised type");
        assert_eq!(decoded, frame);
    }
}

#[rstest]
#[case(LengthPrefix::U24)]
#[case(LengthPrefix::U32)]
fn round_trip_length_prefixed(#[case] prefix: LengthPrefix) {
    let codec = codec(FramingMode::LengthPrefixed(prefix));
    let frames = sample_frames();
    let mut wire = BytesMut::new();
    for frame in &frames {
        codec.encode(frame, &mut wire).expect("encode");
    }
    for expected in &frames {
        let body = prefix
            .split_frame(&mut wire, MAX_LEN)
            .expect("split")
            .expect("complete frame buffered");
        let decoded = codec.decode(body).expect("decode").expect("recognised type");
        assert_eq!(&decoded, expected);
    }
    assert!(wire.is_empty());
}

#[test]
fn ignore_flag_travels_in_stream_id_word() {
    let codec = codec(FramingMode::SelfDelimiting);
    let mut frame = Frame::cancel(sid(7));
    frame.flags |= FrameFlags::IGNORE;
    let mut wire = BytesMut::new();
    codec.encode(&frame, &mut wire).expect("encode");
    assert_eq!(wire[0] & 0x80, 0x80, "bit 31 of the id word carries IGNORE");
    assert_eq!(u32::from_be_bytes([wire[0] & 0x7F, wire[1], wire[2], wire[3]]), 7);
    let decoded = codec.decode(wire.freeze()).expect("decode").expect("frame");
    assert!(decoded.flags.contains(FrameFlags::IGNORE));
}

fn raw_header(stream_id: u32, type_id: u8, flags: u16, ignore: bool) -> BytesMut {
    let mut wire = BytesMut::new();
    let mut word = stream_id;
    if ignore {
        word |= 1 << 31;
    }
    wire.put_u32(word);
    wire.put_u16(u16::from(type_id) << 10 | flags);
    wire
}

#[test]
fn unknown_type_without_ignore_is_fatal() {
    let codec = codec(FramingMode::SelfDelimiting);
    let wire = raw_header(1, 0x3F, 0, false);
    assert_eq!(
        codec.decode(wire.freeze()).unwrap_err(),
        DecodeError::UnknownFrameType { type_id: 0x3F }
    );
}

#[test]
fn unknown_type_with_ignore_is_skipped() {
    let codec = codec(FramingMode::SelfDelimiting);
    let wire = raw_header(1, 0x3F, 0, true);
    assert!(codec.decode(wire.freeze()).expect("ignorable").is_none());
}

#[test]
fn metadata_flag_mismatch_rejected() {
    let codec = codec(FramingMode::SelfDelimiting);
    let frame = Frame {
        stream_id: sid(1),
        frame_type: FrameType::Payload,
        flags: FrameFlags::METADATA | FrameFlags::NEXT,
        metadata: None,
        payload: Bytes::from_static(b"x"),
    };
    let mut wire = BytesMut::new();
    assert_eq!(
        codec.encode(&frame, &mut wire).unwrap_err(),
        EncodeError::MetadataFlagMismatch
    );
}

#[rstest]
#[case(0)]
#[case(3)]
#[case(5)]
fn truncated_header_rejected(#[case] len: usize) {
    let codec = codec(FramingMode::SelfDelimiting);
    let wire = Bytes::from(vec![0u8; len]);
    assert_eq!(
        codec.decode(wire).unwrap_err(),
        DecodeError::TruncatedHeader { have: len, need: 6 }
    );
}

#[test]
fn metadata_length_overrun_rejected() {
    let codec = codec(FramingMode::SelfDelimiting);
    let mut wire = raw_header(1, FrameType::Payload as u8, FrameFlags::METADATA.bits(), false);
    wire.put_uint(100, 3); // declares 100 metadata bytes
    wire.put_slice(b"short");
    assert_eq!(
        codec.decode(wire.freeze()).unwrap_err(),
        DecodeError::TruncatedMetadata {
            declared: 100,
            remaining: 5
        }
    );
}

#[test]
fn oversized_payload_rejected_on_encode() {
    let codec = codec(FramingMode::SelfDelimiting);
    let frame = Frame::payload(sid(1), Payload::new(vec![0u8; MAX_LEN]), false);
    let mut wire = BytesMut::new();
    let err = codec.encode(&frame, &mut wire).unwrap_err();
    assert!(matches!(err, EncodeError::FrameTooLarge { .. }));
}

#[test]
fn split_frame_waits_for_complete_message() {
    let codec = codec(FramingMode::LengthPrefixed(LengthPrefix::U24));
    let mut wire = BytesMut::new();
    codec
        .encode(&Frame::cancel(sid(9)), &mut wire)
        .expect("encode");
    let total = wire.len();
    for cut in 0..total {
        let mut partial = BytesMut::from(&wire[..cut]);
        assert!(
            LengthPrefix::U24
                .split_frame(&mut partial, MAX_LEN)
                .expect("no error on partial input")
                .is_none(),
            "cut at {cut} must not yield a frame"
        );
    }
}

#[test]
fn split_frame_rejects_oversized_declaration_early() {
    let mut wire = BytesMut::new();
    wire.put_uint(u64::try_from(MAX_LEN).expect("fits") + 1, 3);
    let err = LengthPrefix::U24.split_frame(&mut wire, MAX_LEN).unwrap_err();
    assert_eq!(
        err,
        DecodeError::FrameTooLarge {
            len: MAX_LEN + 1,
            max: MAX_LEN
        }
    );
}

#[rstest]
#[case(None, false)]
#[case(
    Some(KeepaliveParams {
        interval: Duration::from_millis(1500),
        timeout: Duration::from_millis(9000),
    }),
    true
)]
fn setup_params_round_trip(#[case] keepalive: Option<KeepaliveParams>, #[case] lease: bool) {
    let params = SetupParams {
        version: ProtocolVersion::new(2, 1),
        keepalive,
        lease,
    };
    let frame = params.to_frame();
    assert_eq!(frame.frame_type, FrameType::Setup);
    assert_eq!(SetupParams::from_frame(&frame).expect("parse"), params);
}

#[test]
fn lease_params_round_trip() {
    let params = LeaseParams {
        ttl: Duration::from_millis(2500),
        allowed_requests: 17,
    };
    let parsed = LeaseParams::from_frame(&params.to_frame()).expect("parse");
    assert_eq!(parsed, params);
}

#[test]
fn request_n_round_trip_saturates() {
    let frame = Frame::request_n(sid(1), u32::MAX);
    assert_eq!(params::decode_request_n(&frame).expect("parse"), MAX_REQUEST_N);
}

#[test]
fn initial_request_n_prefix_round_trip() {
    let frame = Frame::request(FrameType::RequestStream, sid(1), Payload::new("body"), 42);
    let (n, rest) = params::split_initial_request_n(frame.payload).expect("split");
    assert_eq!(n, 42);
    assert_eq!(rest, Bytes::from_static(b"body"));
}

#[test]
fn error_body_round_trip() {
    let frame = Frame::error(sid(1), ErrorCode::Rejected, "not today");
    let (code, message) = params::decode_error_body(&frame).expect("parse");
    assert_eq!(code, ErrorCode::Rejected);
    assert_eq!(message, "not today");
}

#[test]
fn error_body_rejects_invalid_utf8() {
    let mut frame = Frame::error(sid(1), ErrorCode::Invalid, "");
    let mut body = BytesMut::from(&frame.payload[..]);
    body.put_slice(&[0xFF, 0xFE]);
    frame.payload = body.freeze();
    assert_eq!(
        params::decode_error_body(&frame).unwrap_err(),
        DecodeError::InvalidErrorMessage
    );
}

prop_compose! {
    fn arb_frame()(
        stream_id in 0u32..=StreamId::MAX,
        type_idx in 0usize..8,
        metadata in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        complete in any::<bool>(),
        ignore in any::<bool>(),
    ) -> Frame {
        let frame_type = [
            FrameType::RequestResponse,
            FrameType::RequestStream,
            FrameType::RequestChannel,
            FrameType::RequestN,
            FrameType::Cancel,
            FrameType::Payload,
            FrameType::Error,
            FrameType::Keepalive,
        ][type_idx];
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::COMPLETE, complete);
        flags.set(FrameFlags::IGNORE, ignore);
        if frame_type == FrameType::Payload {
            flags |= FrameFlags::NEXT;
        }
        Frame::new(
            StreamId::new(stream_id).expect("in range"),
            frame_type,
            flags,
            metadata.map(Bytes::from),
            Bytes::from(payload),
        )
    }
}

proptest! {
    #[test]
    fn decode_inverts_encode(frame in arb_frame()) {
        let codec = codec(FramingMode::SelfDelimiting);
        let mut wire = BytesMut::new();
        codec.encode(&frame, &mut wire).expect("encode");
        let decoded = codec
            .decode(wire.freeze())
            .expect("decode")
            .expect("recognised type");
        prop_assert_eq!(decoded, frame);
    }
}
