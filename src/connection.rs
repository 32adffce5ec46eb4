//! Server side of one HTTP/2 connection, sans I/O.
//!
//! [`Connection`] owns the stream table, the connection's single HPACK
//! [`Context`] and the peer's settings. Inbound frames go in through
//! [`Connection::recv_frame`] strictly in arrival order; outbound frames are
//! queued and collected with [`Connection::take_frames`] in the order they
//! must be written. Header blocks are decoded and encoded only here, which
//! keeps both dynamic tables in step with the peer.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::{ServerConfig, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::error::H2Error;
use crate::frame::{
    error_code, flags, settings_id, Frame, Payload, Priority, DEFAULT_MAX_FRAME_SIZE,
    MAX_FRAME_SIZE_LIMIT,
};
use crate::hpack::{Context, DEFAULT_TABLE_SIZE};
use crate::request::{Request, Response};
use crate::stream::{concat, Stream, StreamState};

/// Something the application needs to know about.
#[derive(Debug)]
pub enum Event {
    /// A stream delivered a complete request.
    Request { stream_id: u32, request: Request },
    /// The peer reset a stream.
    Reset { stream_id: u32, error_code: u32 },
    /// A stream failed locally and was reset; the connection continues.
    StreamError { stream_id: u32, error: H2Error },
    /// The peer is shutting the connection down.
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
}

/// A header block that has started but not yet seen END_HEADERS.
#[derive(Debug)]
struct PendingBlock {
    stream_id: u32,
    len: usize,
    /// Set when the stream cannot take the block. The fragments are still
    /// decoded (the peer's encoder already updated its table), then the
    /// error is raised.
    rejected: Option<H2Error>,
    orphan: Vec<Bytes>,
}

#[derive(Debug)]
pub struct Connection {
    hpack: Context,
    streams: HashMap<u32, Stream>,
    /// Highest stream id the peer has opened.
    last_stream_id: u32,
    /// Peer settings by identifier. An absent identifier means "no limit".
    settings: HashMap<u16, u32>,
    settings_acked: bool,
    /// Our advertised HEADER_TABLE_SIZE. Binds the decoder once the peer
    /// acknowledges our SETTINGS; until then the peer may use the default.
    local_header_table_size: usize,
    pending: Option<PendingBlock>,
    outbound: VecDeque<Frame>,
    /// Connection-level send window. Tracked, not enforced.
    send_window: i64,
    max_concurrent_streams: Option<u32>,
    max_header_list_size: Option<u32>,
    max_header_block_size: usize,
    going_away: bool,
    peer_going_away: bool,
}

impl Connection {
    /// New connection; the server's SETTINGS frame is queued immediately.
    pub fn new(config: &ServerConfig) -> Self {
        let settings = HashMap::from([
            (settings_id::HEADER_TABLE_SIZE, DEFAULT_TABLE_SIZE as u32),
            (settings_id::ENABLE_PUSH, 1),
            (settings_id::INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE),
            (settings_id::MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE),
        ]);
        let mut outbound = VecDeque::new();
        outbound.push_back(Frame::settings(config.local_settings()));

        Self {
            hpack: Context::new(DEFAULT_TABLE_SIZE, DEFAULT_TABLE_SIZE),
            streams: HashMap::new(),
            last_stream_id: 0,
            settings,
            settings_acked: false,
            local_header_table_size: config.header_table_size as usize,
            pending: None,
            outbound,
            send_window: i64::from(DEFAULT_INITIAL_WINDOW_SIZE),
            max_concurrent_streams: config.max_concurrent_streams,
            max_header_list_size: config.max_header_list_size,
            max_header_block_size: config.max_header_block_size,
            going_away: false,
            peer_going_away: false,
        }
    }

    pub fn hpack(&self) -> &Context {
        &self.hpack
    }

    pub fn stream(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    /// Streams not yet closed.
    pub fn active_streams(&self) -> usize {
        self.streams.values().filter(|s| !s.is_closed()).count()
    }

    pub fn last_stream_id(&self) -> u32 {
        self.last_stream_id
    }

    pub fn settings(&self) -> &HashMap<u16, u32> {
        &self.settings
    }

    /// A peer setting; `None` means the peer set no limit.
    pub fn setting(&self, id: u16) -> Option<u32> {
        self.settings.get(&id).copied()
    }

    /// Whether the peer acknowledged our SETTINGS.
    pub fn settings_acknowledged(&self) -> bool {
        self.settings_acked
    }

    pub fn send_window(&self) -> i64 {
        self.send_window
    }

    pub fn is_going_away(&self) -> bool {
        self.going_away || self.peer_going_away
    }

    /// GOAWAY was exchanged and no stream is left to finish.
    pub fn is_finished(&self) -> bool {
        self.is_going_away() && self.streams.is_empty()
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Drain queued outbound frames in write order.
    pub fn take_frames(&mut self) -> Vec<Frame> {
        self.outbound.drain(..).collect()
    }

    /// Process one inbound frame.
    ///
    /// Stream errors are handled here (RST_STREAM queued, stream dropped) and
    /// reported as [`Event::StreamError`]. A returned `Err` is always
    /// connection-fatal; a GOAWAY carrying its code is already queued.
    pub fn recv_frame(&mut self, frame: Frame) -> Result<Vec<Event>, H2Error> {
        trace!(
            stream_id = frame.stream_id,
            frame_type = ?frame.frame_type(),
            flags = frame.flags,
            "recv frame"
        );
        match self.dispatch(frame) {
            Ok(events) => Ok(events),
            Err(error) if error.is_connection_error() => {
                warn!(%error, last_stream_id = self.last_stream_id, "connection error");
                self.go_away(error.error_code(), error.to_string());
                Err(error)
            }
            Err(error) => {
                let stream_id = error.stream_id().unwrap_or_default();
                debug!(stream_id, %error, "stream error");
                self.reset_stream(stream_id, error.error_code());
                Ok(vec![Event::StreamError { stream_id, error }])
            }
        }
    }

    /// Serialize a response on `stream_id` and half-close our side.
    ///
    /// The header block is split across HEADERS and CONTINUATION frames and
    /// the body across DATA frames, by the peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn send_response(&mut self, stream_id: u32, response: Response) -> Result<(), H2Error> {
        let max_frame_size = self
            .setting(settings_id::MAX_FRAME_SIZE)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE) as usize;

        let stream = self.streams.get_mut(&stream_id).ok_or_else(|| {
            H2Error::stream(stream_id, error_code::STREAM_CLOSED, "response for unknown stream")
        })?;
        if !matches!(stream.state(), StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(H2Error::stream(
                stream_id,
                error_code::STREAM_CLOSED,
                "stream not writable",
            ));
        }

        let mut block = Bytes::from(self.hpack.encode(&response.header_fields()));
        let mut body = response.body;
        let headers_end_stream = body.is_empty();

        let first = block.split_to(block.len().min(max_frame_size));
        self.outbound.push_back(Frame::headers(
            stream_id,
            first,
            headers_end_stream,
            block.is_empty(),
        ));
        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max_frame_size));
            self.outbound
                .push_back(Frame::continuation(stream_id, fragment, block.is_empty()));
        }
        while !body.is_empty() {
            let chunk = body.split_to(body.len().min(max_frame_size));
            self.outbound
                .push_back(Frame::data(stream_id, chunk, body.is_empty()));
        }

        stream.send_end_stream();
        debug!(stream_id, status = response.status, state = ?stream.state(), "response queued");
        if stream.is_closed() {
            self.streams.remove(&stream_id);
        }
        Ok(())
    }

    /// Reset a stream from this side and forget it.
    pub fn reset_stream(&mut self, stream_id: u32, error_code: u32) {
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            stream.send_reset();
        }
        self.outbound.push_back(Frame::rst_stream(stream_id, error_code));
    }

    /// Queue a GOAWAY naming the last stream this side will process.
    pub fn go_away(&mut self, error_code: u32, debug_data: impl Into<Bytes>) {
        self.going_away = true;
        self.outbound.push_back(Frame::goaway(
            self.last_stream_id,
            error_code,
            debug_data.into(),
        ));
    }

    fn dispatch(&mut self, frame: Frame) -> Result<Vec<Event>, H2Error> {
        if let Some(pending) = &self.pending {
            if !matches!(frame.payload, Payload::Continuation { .. }) {
                return Err(H2Error::protocol(format!(
                    "{:?} frame while header block on stream {} is open",
                    frame.frame_type(),
                    pending.stream_id
                )));
            }
            if frame.stream_id != pending.stream_id {
                return Err(H2Error::protocol(format!(
                    "CONTINUATION for stream {} but pending headers on stream {}",
                    frame.stream_id, pending.stream_id
                )));
            }
        }

        let stream_id = frame.stream_id;
        let frame_flags = frame.flags;
        match frame.payload {
            Payload::Headers {
                priority, fragment, ..
            } => self.recv_headers(stream_id, frame_flags, priority, fragment),
            Payload::Continuation { fragment } => {
                self.recv_continuation(stream_id, frame_flags, fragment)
            }
            Payload::Data { data, .. } => self.recv_data(stream_id, frame_flags, data),
            Payload::Priority(priority) => {
                self.recv_priority(stream_id, priority)?;
                Ok(Vec::new())
            }
            Payload::RstStream { error_code } => self.recv_rst_stream(stream_id, error_code),
            Payload::Settings(settings) => {
                self.recv_settings(frame_flags & flags::ACK != 0, settings)?;
                Ok(Vec::new())
            }
            Payload::PushPromise { .. } => {
                Err(H2Error::protocol("PUSH_PROMISE received by a server"))
            }
            Payload::Ping(data) => {
                if frame_flags & flags::ACK == 0 {
                    self.outbound.push_back(Frame::ping_ack(data));
                }
                Ok(Vec::new())
            }
            Payload::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                debug!(last_stream_id, error_code, "peer sent GOAWAY");
                self.peer_going_away = true;
                Ok(vec![Event::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data,
                }])
            }
            Payload::WindowUpdate { increment } => {
                self.recv_window_update(stream_id, increment)?;
                Ok(Vec::new())
            }
            Payload::Unknown { frame_type, .. } => {
                trace!(frame_type, stream_id, "skipping unknown frame type");
                Ok(Vec::new())
            }
        }
    }

    fn recv_headers(
        &mut self,
        stream_id: u32,
        frame_flags: u8,
        priority: Option<Priority>,
        fragment: Bytes,
    ) -> Result<Vec<Event>, H2Error> {
        let end_stream = frame_flags & flags::END_STREAM != 0;
        let end_headers = frame_flags & flags::END_HEADERS != 0;

        let mut rejected = match self.streams.get_mut(&stream_id) {
            Some(stream) => stream
                .recv_headers(fragment.clone(), priority, end_stream, end_headers)
                .err(),
            None => {
                if stream_id % 2 == 0 {
                    return Err(H2Error::protocol(format!(
                        "HEADERS on even stream id {}",
                        stream_id
                    )));
                }
                if stream_id <= self.last_stream_id {
                    return Err(H2Error::protocol(format!(
                        "HEADERS on stream {} not above last stream {}",
                        stream_id, self.last_stream_id
                    )));
                }
                self.last_stream_id = stream_id;
                let mut stream = Stream::new(stream_id);
                stream.set_send_window(self.initial_send_window());
                let result = stream.recv_headers(fragment.clone(), priority, end_stream, end_headers);
                self.streams.insert(stream_id, stream);
                debug!(stream_id, end_stream, "stream opened");
                result.err()
            }
        };
        if priority.is_some_and(|p| p.dependency == stream_id) {
            rejected = Some(H2Error::stream(
                stream_id,
                error_code::PROTOCOL_ERROR,
                "stream depends on itself",
            ));
        }

        let orphan = if rejected.is_some() {
            vec![fragment.clone()]
        } else {
            Vec::new()
        };
        self.pending = Some(PendingBlock {
            stream_id,
            len: 0,
            rejected,
            orphan,
        });
        self.track_block_len(fragment.len())?;

        if end_headers {
            self.finish_header_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn recv_continuation(
        &mut self,
        stream_id: u32,
        frame_flags: u8,
        fragment: Bytes,
    ) -> Result<Vec<Event>, H2Error> {
        let end_headers = frame_flags & flags::END_HEADERS != 0;
        let Some(pending) = self.pending.as_mut() else {
            return Err(H2Error::protocol(format!(
                "Unexpected CONTINUATION frame for stream {}",
                stream_id
            )));
        };

        if pending.rejected.is_some() {
            pending.orphan.push(fragment.clone());
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.recv_continuation(fragment.clone(), end_headers)?;
        }
        self.track_block_len(fragment.len())?;

        if end_headers {
            self.finish_header_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn track_block_len(&mut self, added: usize) -> Result<(), H2Error> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        pending.len += added;
        if pending.len > self.max_header_block_size {
            let len = pending.len;
            self.pending = None;
            return Err(H2Error::Connection {
                code: error_code::ENHANCE_YOUR_CALM,
                reason: format!(
                    "Header block too large ({} bytes, max {})",
                    len, self.max_header_block_size
                ),
            });
        }
        Ok(())
    }

    /// END_HEADERS seen: decode the block now, in wire order.
    fn finish_header_block(&mut self) -> Result<Vec<Event>, H2Error> {
        let Some(pending) = self.pending.take() else {
            return Ok(Vec::new());
        };
        let stream_id = pending.stream_id;

        if let Some(error) = pending.rejected {
            self.hpack.decode(&concat(pending.orphan))?;
            return Err(error);
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(Vec::new());
        };
        let initial = stream.header_fields().is_none();
        stream.decode_header_block(&mut self.hpack)?;

        if initial {
            self.admit_stream(stream_id)?;
        }
        self.try_dispatch(stream_id)
    }

    /// Checks applied once a new request's header block is decoded.
    fn admit_stream(&self, stream_id: u32) -> Result<(), H2Error> {
        if self.going_away {
            return Err(H2Error::stream(
                stream_id,
                error_code::REFUSED_STREAM,
                "connection is going away",
            ));
        }
        if let Some(limit) = self.max_concurrent_streams {
            let others = self
                .streams
                .values()
                .filter(|s| s.id() != stream_id && !s.is_closed())
                .count();
            if others >= limit as usize {
                return Err(H2Error::stream(
                    stream_id,
                    error_code::REFUSED_STREAM,
                    format!("concurrent stream limit {} reached", limit),
                ));
            }
        }
        if let Some(limit) = self.max_header_list_size {
            let size: usize = self
                .streams
                .get(&stream_id)
                .and_then(Stream::header_fields)
                .map(|fields| fields.iter().map(|f| f.size()).sum())
                .unwrap_or_default();
            if size > limit as usize {
                return Err(H2Error::stream(
                    stream_id,
                    error_code::PROTOCOL_ERROR,
                    format!("header list of {} bytes exceeds {}", size, limit),
                ));
            }
        }
        Ok(())
    }

    /// Emit the request once headers are decoded and the peer half-closed.
    /// A stream closed on both sides is dropped instead.
    fn try_dispatch(&mut self, stream_id: u32) -> Result<Vec<Event>, H2Error> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(Vec::new());
        };
        if stream.is_closed() {
            trace!(stream_id, "stream closed");
            self.streams.remove(&stream_id);
            return Ok(Vec::new());
        }
        if !stream.ready_to_build() {
            return Ok(Vec::new());
        }
        let request = stream.build(&mut self.hpack)?;
        debug!(
            stream_id,
            method = %request.method,
            uri = %request.uri,
            body_len = request.body.len(),
            "request complete"
        );
        Ok(vec![Event::Request { stream_id, request }])
    }

    fn recv_data(&mut self, stream_id: u32, frame_flags: u8, data: Bytes) -> Result<Vec<Event>, H2Error> {
        let end_stream = frame_flags & flags::END_STREAM != 0;
        match self.streams.get_mut(&stream_id) {
            Some(stream) => stream.recv_data(data, end_stream)?,
            None if stream_id > self.last_stream_id => {
                return Err(H2Error::protocol(format!("DATA on idle stream {}", stream_id)));
            }
            None => {
                return Err(H2Error::stream(
                    stream_id,
                    error_code::STREAM_CLOSED,
                    "DATA on closed stream",
                ));
            }
        }
        self.try_dispatch(stream_id)
    }

    fn recv_priority(&mut self, stream_id: u32, priority: Priority) -> Result<(), H2Error> {
        if priority.dependency == stream_id {
            return Err(H2Error::stream(
                stream_id,
                error_code::PROTOCOL_ERROR,
                "stream depends on itself",
            ));
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.set_priority(priority);
        }
        Ok(())
    }

    fn recv_rst_stream(&mut self, stream_id: u32, error_code: u32) -> Result<Vec<Event>, H2Error> {
        if stream_id > self.last_stream_id {
            return Err(H2Error::protocol(format!(
                "RST_STREAM on idle stream {}",
                stream_id
            )));
        }
        match self.streams.remove(&stream_id) {
            Some(mut stream) => {
                stream.recv_reset();
                debug!(stream_id, error_code, "stream reset by peer");
                Ok(vec![Event::Reset {
                    stream_id,
                    error_code,
                }])
            }
            None => Ok(Vec::new()),
        }
    }

    fn recv_settings(&mut self, ack: bool, settings: Vec<(u16, u32)>) -> Result<(), H2Error> {
        if ack {
            debug!(
                header_table_size = self.local_header_table_size,
                "peer acknowledged SETTINGS"
            );
            self.settings_acked = true;
            self.hpack.set_decoder_limit(self.local_header_table_size);
            return Ok(());
        }

        for (id, value) in settings {
            match id {
                settings_id::HEADER_TABLE_SIZE => self.hpack.set_encoder_limit(value as usize),
                settings_id::ENABLE_PUSH if value > 1 => {
                    return Err(H2Error::protocol(format!("ENABLE_PUSH value {}", value)));
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    if value > i32::MAX as u32 {
                        return Err(H2Error::Connection {
                            code: error_code::FLOW_CONTROL_ERROR,
                            reason: format!("INITIAL_WINDOW_SIZE {} too large", value),
                        });
                    }
                    let delta = i64::from(value) - self.initial_send_window();
                    for stream in self.streams.values_mut() {
                        stream.set_send_window(stream.send_window() + delta);
                    }
                }
                settings_id::MAX_FRAME_SIZE
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&value) =>
                {
                    return Err(H2Error::protocol(format!("MAX_FRAME_SIZE {} out of range", value)));
                }
                _ => {}
            }
            debug!(id, value, "peer setting");
            self.settings.insert(id, value);
        }

        self.outbound.push_back(Frame::settings_ack());
        Ok(())
    }

    fn recv_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), H2Error> {
        if increment == 0 {
            return Err(if stream_id == 0 {
                H2Error::protocol("WINDOW_UPDATE with zero increment")
            } else {
                H2Error::stream(
                    stream_id,
                    error_code::PROTOCOL_ERROR,
                    "WINDOW_UPDATE with zero increment",
                )
            });
        }
        if stream_id == 0 {
            self.send_window += i64::from(increment);
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.add_send_window(increment);
        } else if stream_id > self.last_stream_id {
            return Err(H2Error::protocol(format!(
                "WINDOW_UPDATE on idle stream {}",
                stream_id
            )));
        }
        Ok(())
    }

    fn initial_send_window(&self) -> i64 {
        i64::from(
            self.setting(settings_id::INITIAL_WINDOW_SIZE)
                .unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE),
        )
    }
}
