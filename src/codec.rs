//! Incremental, sans-I/O frame splitter.
//!
//! Feed it whatever the socket produced; it validates the client connection
//! preface once, buffers partial frames, and yields complete [`Frame`]s.

use bytes::{Buf, BytesMut};

use crate::error::H2Error;
use crate::frame::{check_frame_size, Frame, FrameHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

#[derive(Debug)]
pub struct H2Codec {
    /// Buffer for incomplete frames
    buffer: BytesMut,
    /// Connection preface received (for servers)
    preface_received: bool,
    /// Largest frame payload we accept (our SETTINGS_MAX_FRAME_SIZE).
    max_frame_size: u32,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Codec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            preface_received: false,
            max_frame_size,
        }
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// Skip preface validation (e.g. after an h2c upgrade consumed it).
    pub fn set_preface_received(&mut self, received: bool) {
        self.preface_received = received;
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Process incoming data and return the frames it completes.
    ///
    /// Any error is connection-fatal: framing is lost from that point on.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<Frame>, H2Error> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        if !self.preface_received {
            let available = self.buffer.len().min(CONNECTION_PREFACE.len());
            if self.buffer[..available] != CONNECTION_PREFACE[..available] {
                return Err(H2Error::protocol("invalid connection preface"));
            }
            if available < CONNECTION_PREFACE.len() {
                return Ok(frames);
            }
            self.buffer.advance(CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        while let Some(header) = FrameHeader::parse(&self.buffer) {
            check_frame_size(&header, self.max_frame_size)?;

            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                break;
            }

            let mut frame_data = self.buffer.split_to(total_size);
            let payload = frame_data.split_off(FRAME_HEADER_LEN).freeze();
            frames.push(Frame::parse(&header, payload)?);
        }

        Ok(frames)
    }

    /// Reset codec state (e.g. before reusing it for a new connection)
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.preface_received = false;
    }
}
