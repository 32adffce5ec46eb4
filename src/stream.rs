//! Per-stream state machine (RFC 9113 Section 5.1).
//!
//! A stream collects header-block fragments and DATA payloads in arrival
//! order. Header blocks are decoded through the connection's shared HPACK
//! context once END_HEADERS has been seen; the request is assembled when the
//! peer half-closes.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::H2Error;
use crate::frame::{error_code, Priority};
use crate::hpack::{Context, HeaderField};
use crate::request::Request;

/// Default stream weight when no priority is given (RFC 9113 Section 5.3.5).
pub const DEFAULT_WEIGHT: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// This side has sent END_STREAM.
    HalfClosedLocal,
    /// The peer has sent END_STREAM.
    HalfClosedRemote,
    Closed,
}

#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: StreamState,
    stream_dependency: u32,
    priority_weight: u8,
    /// Fragments of the header block currently being received.
    header_fragments: Vec<Bytes>,
    /// True while a header block is open (no END_HEADERS yet).
    receiving_headers: bool,
    /// Decoded request header fields, once the first block is complete.
    fields: Option<Vec<HeaderField>>,
    trailers: Option<Vec<HeaderField>>,
    body: Vec<Bytes>,
    request: Option<Request>,
    /// Peer's flow-control window for this stream. Tracked, not enforced.
    send_window: i64,
}

impl Stream {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            stream_dependency: 0,
            priority_weight: DEFAULT_WEIGHT,
            header_fragments: Vec::new(),
            receiving_headers: false,
            fields: None,
            trailers: None,
            body: Vec::new(),
            request: None,
            send_window: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn stream_dependency(&self) -> u32 {
        self.stream_dependency
    }

    pub fn priority_weight(&self) -> u8 {
        self.priority_weight
    }

    pub fn send_window(&self) -> i64 {
        self.send_window
    }

    /// True once the first header block has been fully received.
    pub fn headers_complete(&self) -> bool {
        self.fields.is_some() || (!self.header_fragments.is_empty() && !self.receiving_headers)
    }

    /// True once the peer has sent END_STREAM.
    pub fn remote_closed(&self) -> bool {
        matches!(self.state, StreamState::HalfClosedRemote | StreamState::Closed)
    }

    /// True while a header block is open (no END_HEADERS yet).
    pub fn receiving_headers(&self) -> bool {
        self.receiving_headers
    }

    /// Decoded request header fields, once the first block was decoded.
    pub fn header_fields(&self) -> Option<&[HeaderField]> {
        self.fields.as_deref()
    }

    pub fn trailer_fields(&self) -> Option<&[HeaderField]> {
        self.trailers.as_deref()
    }

    /// Headers complete, peer half-closed, no request built yet.
    pub fn ready_to_build(&self) -> bool {
        self.request.is_none()
            && self.remote_closed()
            && self.headers_complete()
            && !self.receiving_headers
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Total body bytes received so far.
    pub fn body_len(&self) -> usize {
        self.body.iter().map(Bytes::len).sum()
    }

    /// Accept a HEADERS frame: the request headers or, on an open stream,
    /// the trailers (which must end the stream).
    pub fn recv_headers(
        &mut self,
        fragment: Bytes,
        priority: Option<Priority>,
        end_stream: bool,
        end_headers: bool,
    ) -> Result<(), H2Error> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if !end_stream {
                    return Err(self.error(error_code::PROTOCOL_ERROR, "trailers without END_STREAM"));
                }
                self.recv_end_stream();
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(self.error(error_code::STREAM_CLOSED, "HEADERS after END_STREAM"));
            }
        }

        if let Some(priority) = priority {
            self.set_priority(priority);
        }
        self.header_fragments.push(fragment);
        self.receiving_headers = !end_headers;
        trace!(stream_id = self.id, state = ?self.state, "HEADERS received");
        Ok(())
    }

    /// Accept a CONTINUATION fragment of the open header block.
    pub fn recv_continuation(&mut self, fragment: Bytes, end_headers: bool) -> Result<(), H2Error> {
        if !self.receiving_headers {
            return Err(H2Error::protocol(format!(
                "Unexpected CONTINUATION frame for stream {}",
                self.id
            )));
        }
        self.header_fragments.push(fragment);
        self.receiving_headers = !end_headers;
        Ok(())
    }

    pub fn recv_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), H2Error> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::Idle => {
                return Err(H2Error::protocol(format!("DATA on idle stream {}", self.id)));
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(self.error(error_code::STREAM_CLOSED, "DATA after END_STREAM"));
            }
        }
        if !data.is_empty() {
            self.body.push(data);
        }
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    /// RST_STREAM from the peer: closed immediately, whatever the state.
    pub fn recv_reset(&mut self) {
        self.state = StreamState::Closed;
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.stream_dependency = priority.dependency;
        self.priority_weight = priority.weight;
    }

    pub fn add_send_window(&mut self, increment: u32) {
        self.send_window += i64::from(increment);
    }

    pub(crate) fn set_send_window(&mut self, window: i64) {
        self.send_window = window;
    }

    /// This side sent END_STREAM.
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote | StreamState::HalfClosedLocal | StreamState::Closed => {
                StreamState::Closed
            }
        };
    }

    /// This side sent RST_STREAM.
    pub fn send_reset(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Decode the fully received header block through the shared context.
    ///
    /// The connection calls this as soon as END_HEADERS arrives so that
    /// blocks are decoded in wire order across all streams.
    pub fn decode_header_block(&mut self, context: &mut Context) -> Result<(), H2Error> {
        if self.receiving_headers || self.header_fragments.is_empty() {
            return Ok(());
        }
        let block = concat(std::mem::take(&mut self.header_fragments));
        let decoded = context.decode(&block)?;

        if self.fields.is_none() {
            self.fields = Some(decoded);
        } else {
            self.trailers = Some(decoded);
        }
        Ok(())
    }

    /// Build the request: decodes the header block if that has not happened
    /// yet and attaches the body received so far.
    ///
    /// Requires END_HEADERS to have been observed. Decompression errors are
    /// propagated unchanged; malformed pseudo-headers are a stream error.
    pub fn build(&mut self, context: &mut Context) -> Result<Request, H2Error> {
        if self.receiving_headers || !self.headers_complete() {
            return Err(self.error(error_code::PROTOCOL_ERROR, "header block incomplete"));
        }
        self.decode_header_block(context)?;

        let fields = self.fields.as_deref().unwrap_or_default();
        let body = concat(self.body.clone());
        let mut request =
            Request::from_fields(fields, body).map_err(|reason| self.error(error_code::PROTOCOL_ERROR, reason))?;
        if let Some(trailers) = &self.trailers {
            request
                .set_trailers(trailers)
                .map_err(|reason| self.error(error_code::PROTOCOL_ERROR, reason))?;
        }

        self.request = Some(request.clone());
        Ok(request)
    }

    fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::HalfClosedLocal => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        };
    }

    fn error(&self, code: u32, reason: impl Into<String>) -> H2Error {
        H2Error::stream(self.id, code, reason)
    }
}

pub(crate) fn concat(chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => {
            let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    }
}
