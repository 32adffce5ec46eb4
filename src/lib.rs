//! h2-server-core: the protocol core of an HTTP/2 server
//!
//! This crate implements the server side of HTTP/2 (RFC 9113) together with
//! its header compression (HPACK, RFC 7541). The protocol layers are sans-I/O;
//! a small tokio driver wires them to a socket.
//!
//! # Features
//!
//! - **HPACK**: static table, size-bounded dynamic table, canonical Huffman
//!   code, one encoder and one decoder context per connection
//! - **Frame Codec**: all ten RFC 9113 frame types plus pass-through of
//!   unknown types, with padding and priority fields
//! - **Streams**: per-stream state machine, CONTINUATION reassembly,
//!   trailers and request assembly
//! - **Connection**: settings exchange, PING, GOAWAY, RST_STREAM and the
//!   connection vs. stream error split
//! - **Server**: bounded reader/worker/writer pipeline with concurrent
//!   request handlers
//!
//! # Quick Start
//!
//! ```rust
//! use h2_server_core::{Connection, Event, Frame, H2Codec, ServerConfig, CONNECTION_PREFACE};
//! use h2_server_core::hpack::{Context, HeaderField};
//!
//! let mut conn = Connection::new(&ServerConfig::default());
//! let mut codec = H2Codec::new();
//!
//! // The client side: preface, then a GET on stream 1.
//! let mut client = Context::default();
//! let block = client.encode(&[
//!     HeaderField::new(":method", "GET"),
//!     HeaderField::new(":scheme", "https"),
//!     HeaderField::new(":path", "/"),
//!     HeaderField::new(":authority", "example.com"),
//! ]);
//! let mut wire = CONNECTION_PREFACE.to_vec();
//! wire.extend_from_slice(&Frame::headers(1, block, true, true).to_bytes());
//!
//! for frame in codec.process(&wire).unwrap() {
//!     for event in conn.recv_frame(frame).unwrap() {
//!         if let Event::Request { stream_id, request } = event {
//!             assert_eq!(stream_id, 1);
//!             assert_eq!(request.uri, "/");
//!         }
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`hpack`]: header compression, usable on its own
//! - [`frame`] and [`codec`]: bytes to frames and back
//! - [`stream`] and [`connection`]: protocol state, fed one frame at a time
//! - [`server`]: tokio tasks around a [`Connection`]
//!
//! Not covered: TLS and ALPN, server push, flow-control enforcement and
//! priority scheduling.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod hpack;
pub mod request;
pub mod server;
pub mod stream;

pub use codec::{is_h2c_preface, H2Codec, CONNECTION_PREFACE};
pub use config::{ServerConfig, MAX_HEADER_BLOCK_SIZE};
pub use connection::{Connection, Event};
pub use error::{H2Error, HpackError};
pub use frame::{
    error_code, flags, frame_type, read_frame, settings_id, Frame, FrameHeader, FrameType,
    Payload, Priority,
};
pub use request::{Request, Response};
pub use server::{BoxError, Handler, Server};
pub use stream::{Stream, StreamState};
