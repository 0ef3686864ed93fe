use std::io::Cursor;

use pretty_assertions::assert_eq;

use super::*;
use crate::HealthRecord;

#[test]
fn frame_round_trip() {
    let mut buf = Vec::new();
    send_frame(&mut buf, b"hello").unwrap();
    assert_eq!(&buf[..4], &5u32.to_be_bytes());
    let payload = recv_frame(&mut Cursor::new(buf)).unwrap();
    assert_eq!(payload, b"hello");
}

#[test]
fn empty_frame() {
    let mut buf = Vec::new();
    send_frame(&mut buf, b"").unwrap();
    let payload = recv_frame(&mut Cursor::new(buf)).unwrap();
    assert!(payload.is_empty());
}

#[test]
fn record_round_trip() {
    let mut buf = Vec::new();
    send_record(&mut buf, &HealthRecord::Ping).unwrap();
    let record: HealthRecord = recv_record(&mut Cursor::new(buf)).unwrap();
    assert!(matches!(record, HealthRecord::Ping));
}

#[test]
fn several_frames_in_sequence() {
    let mut buf = Vec::new();
    send_frame(&mut buf, b"one").unwrap();
    send_frame(&mut buf, b"two").unwrap();
    let mut cursor = Cursor::new(buf);
    assert_eq!(recv_frame(&mut cursor).unwrap(), b"one");
    assert_eq!(recv_frame(&mut cursor).unwrap(), b"two");
}

#[test]
fn eof_is_closed() {
    let err = recv_frame(&mut Cursor::new(Vec::new())).unwrap_err();
    assert!(matches!(err, CodecError::Closed));
}

#[test]
fn truncated_payload_is_closed() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&10u32.to_be_bytes());
    buf.extend_from_slice(b"abc");
    let err = recv_frame(&mut Cursor::new(buf)).unwrap_err();
    assert!(matches!(err, CodecError::Closed));
}

#[test]
fn oversize_prefix_rejected() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(u32::MAX).to_be_bytes());
    let err = recv_frame(&mut Cursor::new(buf)).unwrap_err();
    assert!(matches!(err, CodecError::Oversize(_)));
}

#[test]
fn oversize_send_rejected() {
    let payload = vec![0u8; MAX_FRAME_LEN + 1];
    let err = send_frame(&mut Vec::new(), &payload).unwrap_err();
    assert!(matches!(err, CodecError::Oversize(_)));
}

#[test]
fn garbage_payload_is_malformed() {
    let mut buf = Vec::new();
    send_frame(&mut buf, b"not json").unwrap();
    let err = recv_record::<HealthRecord>(&mut Cursor::new(buf)).unwrap_err();
    assert!(matches!(err, CodecError::Malformed(_)));
}
