//! Async driver for [`Connection`] on top of tokio.
//!
//! Each served socket gets a reader task (bytes into frames), a writer task
//! (frames into bytes) and the calling task as the single worker that owns
//! the [`Connection`]. All queues between them are bounded; a full queue makes
//! the producer wait, nothing is dropped. Request handlers run concurrently
//! on a [`JoinSet`] and their results are collected by the worker as the tasks
//! finish, so responses are serialized (and HPACK-encoded) by the worker alone.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, trace, warn};

use crate::codec::H2Codec;
use crate::config::ServerConfig;
use crate::connection::{Connection, Event};
use crate::error::H2Error;
use crate::frame::{error_code, Frame};
use crate::request::{Request, Response};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type HandlerResult = Result<Response, BoxError>;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Application callback turning a request into a response.
///
/// An `Err` resets the stream with INTERNAL_ERROR.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = Result<Response, BoxError>> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    fn handle(&self, request: Request) -> impl Future<Output = Result<Response, BoxError>> + Send {
        self(request)
    }
}

pub struct Server<H> {
    config: ServerConfig,
    handler: Arc<H>,
}

impl<H: Handler> Server<H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve one connection until the peer goes away or a connection error
    /// occurs. The client preface is expected as the first bytes.
    pub async fn serve_connection<IO>(&self, io: IO) -> Result<(), H2Error>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.serve_connection_with_shutdown(io, std::future::pending::<()>())
            .await
    }

    /// Like [`Server::serve_connection`]; when `shutdown` resolves a GOAWAY
    /// (NO_ERROR) is sent, in-flight streams finish and new ones are refused.
    pub async fn serve_connection_with_shutdown<IO, S>(&self, io: IO, shutdown: S) -> Result<(), H2Error>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
        S: Future<Output = ()>,
    {
        let capacity = self.config.queue_capacity.max(1);
        let (read_half, write_half) = tokio::io::split(io);

        let (frame_tx, mut frame_rx) = mpsc::channel(capacity);
        let reader = tokio::spawn(read_loop(
            read_half,
            frame_tx,
            self.config.max_frame_size,
            self.config.idle_timeout,
        ));
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let writer = tokio::spawn(write_loop(write_half, out_rx));

        let mut handlers = JoinSet::new();
        // Handler task id to the stream it answers.
        let mut in_flight: HashMap<Id, u32> = HashMap::new();
        let mut conn = Connection::new(&self.config);
        let mut shutdown = std::pin::pin!(shutdown);
        let mut shutdown_requested = false;
        let mut inbound_closed = false;

        debug!(
            max_frame_size = self.config.max_frame_size,
            max_concurrent_streams = ?self.config.max_concurrent_streams,
            "connection started"
        );

        let result = loop {
            if let Err(error) = flush(&mut conn, &out_tx).await {
                break Err(error);
            }
            if conn.is_finished() {
                debug!("connection finished after GOAWAY");
                break Ok(());
            }
            if inbound_closed && in_flight.is_empty() {
                break Ok(());
            }

            tokio::select! {
                inbound = frame_rx.recv(), if !inbound_closed => match inbound {
                    Some(Ok(frame)) => match conn.recv_frame(frame) {
                        Ok(events) => {
                            for event in events {
                                self.dispatch_event(event, &mut handlers, &mut in_flight);
                            }
                        }
                        Err(error) => break Err(error),
                    },
                    Some(Err(error)) => {
                        warn!(%error, "read side failed");
                        if !matches!(error, H2Error::Io(_)) {
                            conn.go_away(error.error_code(), error.to_string());
                        }
                        break Err(error);
                    }
                    None => {
                        debug!(in_flight = in_flight.len(), "peer closed the connection");
                        inbound_closed = true;
                    }
                },
                Some(joined) = handlers.join_next_with_id() => {
                    complete_handler(&mut conn, &mut in_flight, joined);
                }
                _ = &mut shutdown, if !shutdown_requested => {
                    debug!(last_stream_id = conn.last_stream_id(), "graceful shutdown requested");
                    shutdown_requested = true;
                    conn.go_away(error_code::NO_ERROR, "shutdown");
                }
            }
        };

        // Frames queued by the failing step (GOAWAY, RST_STREAM) still go out.
        let _ = flush(&mut conn, &out_tx).await;
        drop(out_tx);

        handlers.abort_all();
        reader.abort();
        match writer.await {
            Ok(Err(error)) => debug!(%error, "writer failed during teardown"),
            Err(error) => debug!(%error, "writer task aborted"),
            Ok(Ok(())) => {}
        }
        result
    }

    fn dispatch_event(
        &self,
        event: Event,
        handlers: &mut JoinSet<HandlerResult>,
        in_flight: &mut HashMap<Id, u32>,
    ) {
        match event {
            Event::Request { stream_id, request } => {
                let handler = Arc::clone(&self.handler);
                let task = handlers.spawn(async move { handler.handle(request).await });
                in_flight.insert(task.id(), stream_id);
            }
            Event::Reset {
                stream_id,
                error_code,
            } => debug!(stream_id, error_code, "stream reset by peer"),
            Event::StreamError { stream_id, error } => {
                debug!(stream_id, %error, "stream reset locally")
            }
            Event::GoAway {
                last_stream_id,
                error_code,
                ..
            } => debug!(last_stream_id, error_code, "peer going away"),
        }
    }
}

/// Answer the stream of a finished handler: its response, or RST_STREAM
/// (INTERNAL_ERROR) when it failed, panicked or was cancelled.
fn complete_handler(
    conn: &mut Connection,
    in_flight: &mut HashMap<Id, u32>,
    joined: Result<(Id, HandlerResult), JoinError>,
) {
    let (id, result) = match joined {
        Ok((id, result)) => (id, result),
        Err(error) => {
            let id = error.id();
            if error.is_panic() {
                warn!(%error, "handler panicked");
            }
            (id, Err(error.into()))
        }
    };
    let Some(stream_id) = in_flight.remove(&id) else {
        return;
    };
    match result {
        Ok(response) => {
            if let Err(error) = conn.send_response(stream_id, response) {
                debug!(stream_id, %error, "response dropped");
            }
        }
        Err(error) => {
            warn!(stream_id, %error, "handler failed");
            conn.reset_stream(stream_id, error_code::INTERNAL_ERROR);
        }
    }
}

async fn flush(conn: &mut Connection, out_tx: &mpsc::Sender<Frame>) -> Result<(), H2Error> {
    for frame in conn.take_frames() {
        trace!(stream_id = frame.stream_id, frame_type = ?frame.frame_type(), "queue frame");
        if out_tx.send(frame).await.is_err() {
            return Err(H2Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "writer task stopped",
            )));
        }
    }
    Ok(())
}

async fn read_loop<R>(
    mut reader: R,
    tx: mpsc::Sender<Result<Frame, H2Error>>,
    max_frame_size: u32,
    idle_timeout: Option<Duration>,
) where
    R: AsyncRead + Unpin,
{
    let mut codec = H2Codec::with_max_frame_size(max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    debug!(?limit, "idle timeout");
                    let _ = tx.send(Err(H2Error::IdleTimeout(limit))).await;
                    return;
                }
            },
            None => reader.read(&mut buf).await,
        };

        let n = match read {
            Ok(0) => return,
            Ok(n) => n,
            Err(error) => {
                let _ = tx.send(Err(error.into())).await;
                return;
            }
        };
        trace!(bytes = n, "read");

        match codec.process(&buf[..n]) {
            Ok(frames) => {
                for frame in frames {
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                let _ = tx.send(Err(error)).await;
                return;
            }
        }
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Frame>) -> Result<(), H2Error>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    while let Some(frame) = rx.recv().await {
        frame.encode(&mut buf);
        while let Ok(next) = rx.try_recv() {
            next.encode(&mut buf);
        }
        writer.write_all(&buf).await?;
        writer.flush().await?;
        buf.clear();
    }
    writer.shutdown().await?;
    Ok(())
}
