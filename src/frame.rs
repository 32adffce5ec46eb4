//! HTTP/2 frame codec (RFC 9113 Section 4 and 6).
//!
//! Frames are parsed into a closed [`Payload`] sum type with an `Unknown`
//! catch-all, and serialized back with the length field always recomputed
//! from the payload.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::H2Error;

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Initial SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take (2^24 - 1).
pub const MAX_FRAME_SIZE_LIMIT: u32 = (1 << 24) - 1;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// HTTP/2 frame types (RFC 9113 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 9113 Section 6.5.2)
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 9113 Section 7)
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & STREAM_ID_MASK;

        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_uint(u64::from(self.length), 3);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & STREAM_ID_MASK);
    }
}

/// Frame type as a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            frame_type::DATA => Self::Data,
            frame_type::HEADERS => Self::Headers,
            frame_type::PRIORITY => Self::Priority,
            frame_type::RST_STREAM => Self::RstStream,
            frame_type::SETTINGS => Self::Settings,
            frame_type::PUSH_PROMISE => Self::PushPromise,
            frame_type::PING => Self::Ping,
            frame_type::GOAWAY => Self::GoAway,
            frame_type::WINDOW_UPDATE => Self::WindowUpdate,
            frame_type::CONTINUATION => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => frame_type::DATA,
            Self::Headers => frame_type::HEADERS,
            Self::Priority => frame_type::PRIORITY,
            Self::RstStream => frame_type::RST_STREAM,
            Self::Settings => frame_type::SETTINGS,
            Self::PushPromise => frame_type::PUSH_PROMISE,
            Self::Ping => frame_type::PING,
            Self::GoAway => frame_type::GOAWAY,
            Self::WindowUpdate => frame_type::WINDOW_UPDATE,
            Self::Continuation => frame_type::CONTINUATION,
            Self::Unknown(other) => other,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Headers => "HEADERS",
            Self::Priority => "PRIORITY",
            Self::RstStream => "RST_STREAM",
            Self::Settings => "SETTINGS",
            Self::PushPromise => "PUSH_PROMISE",
            Self::Ping => "PING",
            Self::GoAway => "GOAWAY",
            Self::WindowUpdate => "WINDOW_UPDATE",
            Self::Continuation => "CONTINUATION",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Stream priority fields carried by HEADERS and PRIORITY frames.
/// Advisory only; never used for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl Priority {
    fn parse(src: &mut Bytes) -> Self {
        let word = src.get_u32();
        Self {
            exclusive: word & !STREAM_ID_MASK != 0,
            dependency: word & STREAM_ID_MASK,
            weight: src.get_u8(),
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        let exclusive = if self.exclusive { !STREAM_ID_MASK } else { 0 };
        dst.put_u32(exclusive | (self.dependency & STREAM_ID_MASK));
        dst.put_u8(self.weight);
    }
}

/// Type-specific frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Data {
        data: Bytes,
        pad_length: Option<u8>,
    },
    Headers {
        priority: Option<Priority>,
        fragment: Bytes,
        pad_length: Option<u8>,
    },
    Priority(Priority),
    RstStream {
        error_code: u32,
    },
    Settings(Vec<(u16, u32)>),
    PushPromise {
        promised_stream_id: u32,
        fragment: Bytes,
        pad_length: Option<u8>,
    },
    Ping([u8; 8]),
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        increment: u32,
    },
    Continuation {
        fragment: Bytes,
    },
    /// Extension frame; kept verbatim so it can be skipped or forwarded.
    Unknown {
        frame_type: u8,
        payload: Bytes,
    },
}

impl Payload {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Data { .. } => FrameType::Data,
            Self::Headers { .. } => FrameType::Headers,
            Self::Priority(_) => FrameType::Priority,
            Self::RstStream { .. } => FrameType::RstStream,
            Self::Settings(_) => FrameType::Settings,
            Self::PushPromise { .. } => FrameType::PushPromise,
            Self::Ping(_) => FrameType::Ping,
            Self::GoAway { .. } => FrameType::GoAway,
            Self::WindowUpdate { .. } => FrameType::WindowUpdate,
            Self::Continuation { .. } => FrameType::Continuation,
            Self::Unknown { frame_type, .. } => FrameType::Unknown(*frame_type),
        }
    }
}

/// A complete HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub flags: u8,
    pub payload: Payload,
}

impl Frame {
    pub fn new(stream_id: u32, flags: u8, payload: Payload) -> Self {
        Self {
            stream_id,
            flags,
            payload,
        }
    }

    /// Parse a frame payload according to its header.
    pub fn parse(header: &FrameHeader, mut payload: Bytes) -> Result<Self, H2Error> {
        let kind = FrameType::from_u8(header.frame_type);
        if payload.len() != header.length as usize {
            return Err(H2Error::frame_size(format!(
                "{} frame declares {} bytes but carries {}",
                kind.name(),
                header.length,
                payload.len()
            )));
        }
        check_stream_scope(kind, header.stream_id)?;

        let payload = match kind {
            FrameType::Data => {
                let pad_length = strip_padding(kind, header.flags, &mut payload)?;
                Payload::Data {
                    data: payload,
                    pad_length,
                }
            }
            FrameType::Headers => {
                let pad_length = strip_padding(kind, header.flags, &mut payload)?;
                let priority = if header.flags & flags::PRIORITY != 0 {
                    if payload.len() < 5 {
                        return Err(H2Error::frame_size(
                            "PRIORITY HEADERS frame with insufficient data",
                        ));
                    }
                    Some(Priority::parse(&mut payload))
                } else {
                    None
                };
                Payload::Headers {
                    priority,
                    fragment: payload,
                    pad_length,
                }
            }
            FrameType::Priority => {
                expect_len(kind, &payload, 5)?;
                Payload::Priority(Priority::parse(&mut payload))
            }
            FrameType::RstStream => {
                expect_len(kind, &payload, 4)?;
                Payload::RstStream {
                    error_code: payload.get_u32(),
                }
            }
            FrameType::Settings => {
                if header.flags & flags::ACK != 0 && !payload.is_empty() {
                    return Err(H2Error::frame_size("SETTINGS ACK frame with a payload"));
                }
                if payload.len() % 6 != 0 {
                    return Err(H2Error::frame_size(format!(
                        "SETTINGS frame length {} is not a multiple of 6",
                        payload.len()
                    )));
                }
                let mut settings = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    settings.push((payload.get_u16(), payload.get_u32()));
                }
                Payload::Settings(settings)
            }
            FrameType::PushPromise => {
                let pad_length = strip_padding(kind, header.flags, &mut payload)?;
                if payload.len() < 4 {
                    return Err(H2Error::frame_size("PUSH_PROMISE frame too short"));
                }
                Payload::PushPromise {
                    promised_stream_id: payload.get_u32() & STREAM_ID_MASK,
                    fragment: payload,
                    pad_length,
                }
            }
            FrameType::Ping => {
                expect_len(kind, &payload, 8)?;
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Payload::Ping(data)
            }
            FrameType::GoAway => {
                if payload.len() < 8 {
                    return Err(H2Error::frame_size("GOAWAY frame too short"));
                }
                Payload::GoAway {
                    last_stream_id: payload.get_u32() & STREAM_ID_MASK,
                    error_code: payload.get_u32(),
                    debug_data: payload,
                }
            }
            FrameType::WindowUpdate => {
                expect_len(kind, &payload, 4)?;
                Payload::WindowUpdate {
                    increment: payload.get_u32() & STREAM_ID_MASK,
                }
            }
            FrameType::Continuation => Payload::Continuation { fragment: payload },
            FrameType::Unknown(frame_type) => Payload::Unknown { frame_type, payload },
        };

        Ok(Self {
            stream_id: header.stream_id,
            flags: header.flags,
            payload,
        })
    }

    pub fn frame_type(&self) -> FrameType {
        self.payload.frame_type()
    }

    pub fn is_end_stream(&self) -> bool {
        matches!(self.frame_type(), FrameType::Data | FrameType::Headers)
            && self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        matches!(
            self.frame_type(),
            FrameType::Headers | FrameType::PushPromise | FrameType::Continuation
        ) && self.flags & flags::END_HEADERS != 0
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.frame_type(), FrameType::Settings | FrameType::Ping)
            && self.flags & flags::ACK != 0
    }

    /// Flags as they go on the wire: PADDED and PRIORITY follow the payload.
    fn wire_flags(&self) -> u8 {
        match &self.payload {
            Payload::Data { pad_length, .. } | Payload::PushPromise { pad_length, .. } => {
                with_flag(self.flags & !flags::PADDED, flags::PADDED, pad_length.is_some())
            }
            Payload::Headers {
                priority,
                pad_length,
                ..
            } => {
                let base = self.flags & !(flags::PADDED | flags::PRIORITY);
                let base = with_flag(base, flags::PADDED, pad_length.is_some());
                with_flag(base, flags::PRIORITY, priority.is_some())
            }
            _ => self.flags,
        }
    }

    /// Serialize into `dst`. The length field is computed from the payload.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        match &self.payload {
            Payload::Data { data, pad_length } => {
                write_padded(&mut body, *pad_length, |b| b.put_slice(data));
            }
            Payload::Headers {
                priority,
                fragment,
                pad_length,
            } => write_padded(&mut body, *pad_length, |b| {
                if let Some(priority) = priority {
                    priority.encode(b);
                }
                b.put_slice(fragment);
            }),
            Payload::Priority(priority) => priority.encode(&mut body),
            Payload::RstStream { error_code } => body.put_u32(*error_code),
            Payload::Settings(settings) => {
                for (id, value) in settings {
                    body.put_u16(*id);
                    body.put_u32(*value);
                }
            }
            Payload::PushPromise {
                promised_stream_id,
                fragment,
                pad_length,
            } => write_padded(&mut body, *pad_length, |b| {
                b.put_u32(promised_stream_id & STREAM_ID_MASK);
                b.put_slice(fragment);
            }),
            Payload::Ping(data) => body.put_slice(data),
            Payload::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                body.put_u32(last_stream_id & STREAM_ID_MASK);
                body.put_u32(*error_code);
                body.put_slice(debug_data);
            }
            Payload::WindowUpdate { increment } => body.put_u32(increment & STREAM_ID_MASK),
            Payload::Continuation { fragment } => body.put_slice(fragment),
            Payload::Unknown { payload, .. } => body.put_slice(payload),
        }

        let header = FrameHeader {
            length: body.len() as u32,
            frame_type: self.frame_type().as_u8(),
            flags: self.wire_flags(),
            stream_id: self.stream_id,
        };
        dst.reserve(FRAME_HEADER_LEN + body.len());
        header.encode(dst);
        dst.put_slice(&body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }

    // ------------------------------------------------------------------
    // Frame builders
    // ------------------------------------------------------------------

    pub fn data(stream_id: u32, data: impl Into<Bytes>, end_stream: bool) -> Self {
        let flags = if end_stream { flags::END_STREAM } else { 0 };
        Self::new(
            stream_id,
            flags,
            Payload::Data {
                data: data.into(),
                pad_length: None,
            },
        )
    }

    pub fn headers(
        stream_id: u32,
        fragment: impl Into<Bytes>,
        end_stream: bool,
        end_headers: bool,
    ) -> Self {
        let mut flags_byte = 0;
        if end_stream {
            flags_byte |= flags::END_STREAM;
        }
        if end_headers {
            flags_byte |= flags::END_HEADERS;
        }
        Self::new(
            stream_id,
            flags_byte,
            Payload::Headers {
                priority: None,
                fragment: fragment.into(),
                pad_length: None,
            },
        )
    }

    /// CONTINUATION frame; `end_headers` marks the last frame of the block.
    pub fn continuation(stream_id: u32, fragment: impl Into<Bytes>, end_headers: bool) -> Self {
        let flags = if end_headers { flags::END_HEADERS } else { 0 };
        Self::new(
            stream_id,
            flags,
            Payload::Continuation {
                fragment: fragment.into(),
            },
        )
    }

    pub fn rst_stream(stream_id: u32, error_code: u32) -> Self {
        Self::new(stream_id, 0, Payload::RstStream { error_code })
    }

    pub fn settings(settings: Vec<(u16, u32)>) -> Self {
        Self::new(0, 0, Payload::Settings(settings))
    }

    pub fn settings_ack() -> Self {
        Self::new(0, flags::ACK, Payload::Settings(Vec::new()))
    }

    pub fn ping_ack(data: [u8; 8]) -> Self {
        Self::new(0, flags::ACK, Payload::Ping(data))
    }

    pub fn goaway(last_stream_id: u32, error_code: u32, debug_data: impl Into<Bytes>) -> Self {
        Self::new(
            0,
            0,
            Payload::GoAway {
                last_stream_id,
                error_code,
                debug_data: debug_data.into(),
            },
        )
    }

    /// WINDOW_UPDATE; stream 0 targets the connection window.
    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        Self::new(
            stream_id,
            0,
            Payload::WindowUpdate {
                increment: increment & STREAM_ID_MASK,
            },
        )
    }
}

/// Read exactly one frame from a blocking byte source.
///
/// Frames longer than `max_frame_size` are rejected before their payload is
/// read. Unknown frame types are returned as [`Payload::Unknown`].
pub fn read_frame<R: Read>(source: &mut R, max_frame_size: u32) -> Result<Frame, H2Error> {
    let mut head = [0u8; FRAME_HEADER_LEN];
    source.read_exact(&mut head)?;
    let header = FrameHeader::parse(&head)
        .ok_or_else(|| H2Error::frame_size("short frame header"))?;
    check_frame_size(&header, max_frame_size)?;

    let mut payload = vec![0u8; header.length as usize];
    source.read_exact(&mut payload)?;
    Frame::parse(&header, Bytes::from(payload))
}

pub(crate) fn check_frame_size(header: &FrameHeader, max_frame_size: u32) -> Result<(), H2Error> {
    if header.length > max_frame_size {
        return Err(H2Error::frame_size(format!(
            "frame of {} bytes exceeds max frame size {}",
            header.length, max_frame_size
        )));
    }
    Ok(())
}

fn check_stream_scope(kind: FrameType, stream_id: u32) -> Result<(), H2Error> {
    let connection_scoped = matches!(kind, FrameType::Settings | FrameType::Ping | FrameType::GoAway);
    let stream_scoped = matches!(
        kind,
        FrameType::Data
            | FrameType::Headers
            | FrameType::Priority
            | FrameType::RstStream
            | FrameType::PushPromise
            | FrameType::Continuation
    );
    if connection_scoped && stream_id != 0 {
        return Err(H2Error::protocol(format!(
            "{} frame on stream {}",
            kind.name(),
            stream_id
        )));
    }
    if stream_scoped && stream_id == 0 {
        return Err(H2Error::protocol(format!("{} frame on stream 0", kind.name())));
    }
    Ok(())
}

fn expect_len(kind: FrameType, payload: &Bytes, len: usize) -> Result<(), H2Error> {
    if payload.len() != len {
        return Err(H2Error::frame_size(format!(
            "{} frame must be {} bytes, got {}",
            kind.name(),
            len,
            payload.len()
        )));
    }
    Ok(())
}

/// Strip the pad-length octet and trailing padding if PADDED is set.
fn strip_padding(kind: FrameType, frame_flags: u8, payload: &mut Bytes) -> Result<Option<u8>, H2Error> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(H2Error::frame_size(format!(
            "PADDED {} frame with no payload",
            kind.name()
        )));
    }
    let pad_length = payload.get_u8();
    if pad_length as usize > payload.len() {
        return Err(H2Error::protocol(format!(
            "Invalid padding length in {} frame",
            kind.name()
        )));
    }
    payload.truncate(payload.len() - pad_length as usize);
    Ok(Some(pad_length))
}

fn write_padded(body: &mut BytesMut, pad_length: Option<u8>, content: impl FnOnce(&mut BytesMut)) {
    if let Some(pad) = pad_length {
        body.put_u8(pad);
    }
    content(body);
    if let Some(pad) = pad_length {
        body.put_bytes(0, pad as usize);
    }
}

fn with_flag(base: u8, flag: u8, set: bool) -> u8 {
    if set {
        base | flag
    } else {
        base
    }
}
