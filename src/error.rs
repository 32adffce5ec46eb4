//! Error types for the HPACK engine and the HTTP/2 protocol core.
//!
//! Every [`H2Error`] knows its severity: connection errors tear down the whole
//! connection (after a GOAWAY), stream errors only reset one stream.

use std::time::Duration;

use thiserror::Error;

use crate::frame::error_code;

/// HPACK decompression failure (RFC 7541).
///
/// Always connection-fatal once it escapes the HPACK context: the dynamic
/// tables of both peers are no longer in agreement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HpackError {
    #[error("index 0 is not a valid header table index")]
    ZeroIndex,
    #[error("header table index {0} out of range")]
    InvalidIndex(usize),
    #[error("integer representation overflows")]
    IntegerOverflow,
    #[error("header block truncated")]
    Truncated,
    #[error("invalid Huffman-coded string: {0}")]
    InvalidHuffman(&'static str),
    #[error("dynamic table size update to {requested} exceeds limit {limit}")]
    SizeUpdateTooLarge { requested: usize, limit: usize },
    #[error("dynamic table size update after a header field")]
    LateSizeUpdate,
}

/// HTTP/2 protocol error with its severity attached.
#[derive(Debug, Error)]
pub enum H2Error {
    #[error("connection error (code {code:#x}): {reason}")]
    Connection { code: u32, reason: String },
    #[error("stream {stream_id} error (code {code:#x}): {reason}")]
    Stream {
        stream_id: u32,
        code: u32,
        reason: String,
    },
    #[error("decompression error: {0}")]
    Compression(#[from] HpackError),
    #[error("connection idle for {0:?}")]
    IdleTimeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl H2Error {
    /// Connection-level PROTOCOL_ERROR.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Connection {
            code: error_code::PROTOCOL_ERROR,
            reason: reason.into(),
        }
    }

    /// Connection-level FRAME_SIZE_ERROR.
    pub fn frame_size(reason: impl Into<String>) -> Self {
        Self::Connection {
            code: error_code::FRAME_SIZE_ERROR,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: u32, reason: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// True unless the error is confined to a single stream.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }

    /// The HTTP/2 error code to put on the wire (GOAWAY or RST_STREAM).
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
            Self::Compression(_) => error_code::COMPRESSION_ERROR,
            Self::IdleTimeout(_) => error_code::NO_ERROR,
            Self::Io(_) => error_code::INTERNAL_ERROR,
        }
    }

    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Self::Stream { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }
}
