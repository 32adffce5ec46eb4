//! Tests for HTTP/2 frame building

use bytes::{Bytes, BytesMut};
use h2_server_core::{error_code, flags, frame_type, settings_id, Frame, Payload, Priority};

use super::parse;

#[test]
fn test_create_rst_stream() {
    let frame = Frame::rst_stream(1, error_code::HTTP_1_1_REQUIRED).to_bytes();
    assert_eq!(frame.len(), 13);
    assert_eq!(&frame[0..3], &[0, 0, 4]);
    assert_eq!(frame[3], frame_type::RST_STREAM);
    assert_eq!(&frame[9..], &[0, 0, 0, 0xd]);
}

#[test]
fn test_create_settings_ack() {
    let frame = Frame::settings_ack().to_bytes();
    assert_eq!(frame.len(), 9);
    assert_eq!(&frame[0..3], &[0, 0, 0]);
    assert_eq!(frame[3], frame_type::SETTINGS);
    assert_eq!(frame[4], 0x1);
}

#[test]
fn test_create_settings_empty() {
    let frame = Frame::settings(Vec::new()).to_bytes();
    assert_eq!(frame.len(), 9);
    assert_eq!(frame[3], frame_type::SETTINGS);
}

#[test]
fn test_create_settings_with_window() {
    let frame = Frame::settings(vec![(settings_id::INITIAL_WINDOW_SIZE, 1_048_576)]).to_bytes();
    assert_eq!(frame.len(), 15);
    assert_eq!(&frame[9..11], &[0, 4]);
    assert_eq!(&frame[11..], &[0, 0x10, 0, 0]);
}

#[test]
fn test_create_ping_ack() {
    let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let frame = Frame::ping_ack(data).to_bytes();
    assert_eq!(frame.len(), 17);
    assert_eq!(frame[3], frame_type::PING);
    assert_eq!(frame[4], 0x1);
    assert_eq!(&frame[9..], &data);
}

#[test]
fn test_create_window_update() {
    let frame = Frame::window_update(7, 32768).to_bytes();
    assert_eq!(frame.len(), 13);
    assert_eq!(frame[3], frame_type::WINDOW_UPDATE);
    assert_eq!(&frame[5..9], &[0, 0, 0, 7]);
}

#[test]
fn test_create_goaway() {
    let frame = Frame::goaway(5, error_code::NO_ERROR, Bytes::new()).to_bytes();
    assert_eq!(frame.len(), 17);
    assert_eq!(frame[3], frame_type::GOAWAY);
    assert_eq!(&frame[9..13], &[0, 0, 0, 5]);
}

#[test]
fn test_create_continuation_frame() {
    let payload: &'static [u8] = b"test-header-block";
    let frame = Frame::continuation(1, payload, false).to_bytes();
    assert_eq!(frame.len(), 9 + payload.len());
    assert_eq!(frame[3], 0x9);
}

#[test]
fn test_continuation_end_headers_flag() {
    let payload: &'static [u8] = b"header-data";
    let with_flag = Frame::continuation(1, payload, true).to_bytes();
    let without_flag = Frame::continuation(1, payload, false).to_bytes();
    assert_eq!(with_flag[4], 0x4);
    assert_eq!(without_flag[4], 0x0);
}

#[test]
fn test_continuation_frame_empty_payload() {
    let frame = Frame::continuation(1, Bytes::new(), true).to_bytes();
    assert_eq!(frame.len(), 9);
    assert_eq!(frame[2], 0);
}

#[test]
fn test_headers_builder_flags() {
    let frame = Frame::headers(3, Bytes::from_static(&[0x88]), true, true).to_bytes();
    assert_eq!(frame[3], frame_type::HEADERS);
    assert_eq!(frame[4], flags::END_STREAM | flags::END_HEADERS);
}

#[test]
fn test_padded_flag_follows_payload() {
    // PADDED set in flags but no pad length in the payload: flag is dropped.
    let frame = Frame::new(
        1,
        flags::PADDED | flags::END_STREAM,
        Payload::Data {
            data: Bytes::from_static(b"abc"),
            pad_length: None,
        },
    );
    let bytes = frame.to_bytes();
    assert_eq!(bytes[4], flags::END_STREAM);
    assert_eq!(&bytes[0..3], &[0, 0, 3]);
}

#[test]
fn test_padding_is_zero_filled_and_preserved() {
    let frame = Frame::new(
        1,
        0,
        Payload::Data {
            data: Bytes::from_static(b"abc"),
            pad_length: Some(4),
        },
    );
    let bytes = frame.to_bytes();
    assert_eq!(&bytes[0..3], &[0, 0, 8]);
    assert_eq!(bytes[4], flags::PADDED);
    assert_eq!(&bytes[9..], &[4, b'a', b'b', b'c', 0, 0, 0, 0]);

    let parsed = parse(&bytes).unwrap();
    assert_eq!(parsed.flags, flags::PADDED);
    assert_eq!(parsed.payload, frame.payload);
}

#[test]
fn test_priority_frame_roundtrip() {
    let frame = Frame::new(
        5,
        0,
        Payload::Priority(Priority {
            exclusive: true,
            dependency: 3,
            weight: 200,
        }),
    );
    let bytes = frame.to_bytes();
    assert_eq!(&bytes[9..], &[0x80, 0, 0, 3, 200]);
    assert_eq!(parse(&bytes).unwrap(), frame);
}

#[test]
fn test_encode_appends_to_buffer() {
    let mut buf = BytesMut::new();
    Frame::settings_ack().encode(&mut buf);
    Frame::ping_ack([0; 8]).encode(&mut buf);
    assert_eq!(buf.len(), 9 + 17);
}
