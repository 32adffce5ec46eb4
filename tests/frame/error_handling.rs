//! Tests for frame validation errors

use h2_server_core::{error_code, H2Codec, MAX_HEADER_BLOCK_SIZE};

fn process_one(frame: &[u8]) -> h2_server_core::H2Error {
    let mut codec = H2Codec::new();
    codec.set_preface_received(true);
    codec.process(frame).unwrap_err()
}

#[test]
fn test_window_update_too_short_returns_error() {
    let err = process_one(&[0, 0, 2, 8, 0, 0, 0, 0, 1, 0, 0]);
    assert!(err.to_string().contains("WINDOW_UPDATE"));
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_ping_too_short_returns_error() {
    let err = process_one(&[0, 0, 4, 6, 0, 0, 0, 0, 0, 1, 2, 3, 4]);
    assert!(err.to_string().contains("PING"));
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_goaway_too_short_returns_error() {
    let err = process_one(&[0, 0, 4, 7, 0, 0, 0, 0, 0, 0, 0, 0, 5]);
    assert!(err.to_string().contains("GOAWAY"));
}

#[test]
fn test_rst_stream_too_short_returns_error() {
    let err = process_one(&[0, 0, 2, 3, 0, 0, 0, 0, 1, 0, 0]);
    assert!(err.to_string().contains("RST_STREAM"));
}

#[test]
fn test_settings_length_not_multiple_of_six() {
    let err = process_one(&[0, 0, 4, 4, 0, 0, 0, 0, 0, 0, 1, 0, 0]);
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_settings_ack_with_payload() {
    let err = process_one(&[0, 0, 6, 4, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0x10, 0]);
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_padded_data_frame_invalid_padding() {
    // PADDED DATA frame with padding exceeding payload
    let mut frame = vec![0, 0, 6, 0, 0x8, 0, 0, 0, 1]; // length 6
    frame.push(10); // Pad length 10 > payload (only 5 bytes after pad length)
    frame.extend_from_slice(b"hello");

    let err = process_one(&frame);
    assert!(err.to_string().contains("Invalid padding"));
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);
}

#[test]
fn test_stream_frames_on_stream_zero() {
    // DATA on stream 0
    let err = process_one(&[0, 0, 1, 0, 0, 0, 0, 0, 0, b'x']);
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);

    // HEADERS on stream 0
    let err = process_one(&[0, 0, 1, 1, 4, 0, 0, 0, 0, 0x82]);
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);
}

#[test]
fn test_connection_frames_on_a_stream() {
    // SETTINGS on stream 1
    let err = process_one(&[0, 0, 0, 4, 0, 0, 0, 0, 1]);
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);

    // PING on stream 3
    let err = process_one(&[0, 0, 8, 6, 0, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);
}

#[test]
fn test_frame_larger_than_max_frame_size() {
    // Header alone is enough to reject a 300 KB frame.
    let len = (300 * 1024) as u32;
    assert!(len as usize > MAX_HEADER_BLOCK_SIZE);
    let frame = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, 1, 0, 0, 0, 0, 1];
    let err = process_one(&frame);
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_larger_max_frame_size_accepts_bigger_frames() {
    let mut codec = H2Codec::with_max_frame_size(32_768);
    codec.set_preface_received(true);

    let mut frame = vec![0, 0x4e, 0x20, 0, 0, 0, 0, 0, 1]; // 20000 byte DATA
    frame.extend(std::iter::repeat(0u8).take(20_000));
    assert_eq!(codec.process(&frame).unwrap().len(), 1);
}
