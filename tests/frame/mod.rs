//! Frame layer integration tests

mod error_handling;
mod frame_building;
mod properties;

use bytes::Bytes;
use h2_server_core::{Frame, FrameHeader};

/// Parse one complete serialized frame.
pub fn parse(bytes: &[u8]) -> Result<Frame, h2_server_core::H2Error> {
    let header = FrameHeader::parse(bytes).expect("frame header");
    Frame::parse(&header, Bytes::copy_from_slice(&bytes[9..]))
}
