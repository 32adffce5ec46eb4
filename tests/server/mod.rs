//! End-to-end tests: a scripted client talking to `Server` over an in-memory pipe

mod serving;

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use h2_server_core::hpack::{Context, HeaderField};
use h2_server_core::{Frame, H2Codec, Payload, CONNECTION_PREFACE};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub enum Outcome {
    Response {
        fields: Vec<HeaderField>,
        body: Bytes,
    },
    Reset(u32),
}

pub struct TestClient {
    io: DuplexStream,
    codec: H2Codec,
    hpack: Context,
    pending: VecDeque<Frame>,
}

impl TestClient {
    pub fn new(io: DuplexStream) -> Self {
        let mut codec = H2Codec::new();
        codec.set_preface_received(true);
        Self {
            io,
            codec,
            hpack: Context::default(),
            pending: VecDeque::new(),
        }
    }

    /// Connection preface plus an empty SETTINGS frame.
    pub async fn handshake(io: DuplexStream) -> Self {
        let mut client = Self::new(io);
        client.write(CONNECTION_PREFACE).await;
        client.send(Frame::settings(Vec::new())).await;
        client
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    pub async fn send(&mut self, frame: Frame) {
        let bytes = frame.to_bytes();
        self.write(&bytes).await;
    }

    pub async fn send_request(&mut self, stream_id: u32, fields: &[HeaderField], body: Option<&'static [u8]>) {
        let block = self.hpack.encode(fields);
        self.send(Frame::headers(stream_id, block, body.is_none(), true))
            .await;
        if let Some(body) = body {
            self.send(Frame::data(stream_id, body, true)).await;
        }
    }

    /// Next frame from the server; `None` once the server closed its side.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout(TIMEOUT, self.io.read(&mut buf))
                .await
                .expect("server stalled")
                .ok()?;
            if n == 0 {
                return None;
            }
            self.pending.extend(self.codec.process(&buf[..n]).unwrap());
        }
    }

    /// Read until `stream_id` ends, skipping frames for other streams.
    pub async fn read_outcome(&mut self, stream_id: u32) -> Outcome {
        let mut block = BytesMut::new();
        let mut fields = Vec::new();
        let mut body = BytesMut::new();

        while let Some(frame) = self.next_frame().await {
            if frame.stream_id != stream_id {
                continue;
            }
            let end_stream = frame.is_end_stream();
            let end_headers = frame.is_end_headers();
            match frame.payload {
                Payload::Headers { fragment, .. } | Payload::Continuation { fragment } => {
                    block.extend_from_slice(&fragment);
                    if end_headers {
                        fields = self.hpack.decode(&block.split()).unwrap();
                    }
                }
                Payload::Data { data, .. } => body.extend_from_slice(&data),
                Payload::RstStream { error_code } => return Outcome::Reset(error_code),
                _ => {}
            }
            if end_stream {
                break;
            }
        }
        Outcome::Response {
            fields,
            body: body.freeze(),
        }
    }

    /// First stream id a response HEADERS frame arrives on.
    pub async fn first_response_stream(&mut self) -> u32 {
        loop {
            let frame = self.next_frame().await.expect("connection closed");
            if matches!(frame.payload, Payload::Headers { .. }) {
                let stream_id = frame.stream_id;
                self.pending.push_front(frame);
                return stream_id;
            }
        }
    }

    /// All remaining frames until the server closes.
    pub async fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }
}

pub fn get_fields(path: &'static str) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "http"),
        HeaderField::new(":path", path),
        HeaderField::new(":authority", "localhost"),
    ]
}

pub fn post_fields(path: &'static str) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "POST"),
        HeaderField::new(":scheme", "http"),
        HeaderField::new(":path", path),
        HeaderField::new(":authority", "localhost"),
    ]
}

pub fn status(outcome: &Outcome) -> &str {
    match outcome {
        Outcome::Response { fields, .. } => std::str::from_utf8(&fields[0].value).unwrap(),
        Outcome::Reset(code) => panic!("stream reset with code {:#x}", code),
    }
}
