//! Tests for request handling over a live connection

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2_server_core::{
    error_code, BoxError, Frame, FrameType, H2Error, Payload, Request, Response, Server,
    ServerConfig,
};
use tokio::sync::Barrier;

use super::*;

async fn echo(request: Request) -> Result<Response, BoxError> {
    let body = if request.body.is_empty() {
        Bytes::from(format!("{} {}", request.method, request.uri))
    } else {
        Bytes::from(request.body.to_ascii_uppercase())
    };
    Ok(Response::new(200)
        .with_header("content-type", "text/plain")
        .with_body(body))
}

#[tokio::test]
async fn test_get_round_trip() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), echo);

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        client.send_request(1, &get_fields("/hello"), None).await;

        let outcome = client.read_outcome(1).await;
        assert_eq!(status(&outcome), "200");
        match outcome {
            Outcome::Response { fields, body } => {
                assert_eq!(fields[1], HeaderField::new("content-type", "text/plain"));
                assert_eq!(body.as_ref(), b"GET /hello");
            }
            Outcome::Reset(code) => panic!("unexpected reset {:#x}", code),
        }
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test]
async fn test_post_body_reaches_handler() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), echo);

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        client
            .send_request(1, &post_fields("/shout"), Some(b"quiet please"))
            .await;

        match client.read_outcome(1).await {
            Outcome::Response { body, .. } => assert_eq!(body.as_ref(), b"QUIET PLEASE"),
            Outcome::Reset(code) => panic!("unexpected reset {:#x}", code),
        }
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test]
async fn test_server_settings_and_acks() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let config = ServerConfig::default().with_max_concurrent_streams(Some(10));
    let expected = config.local_settings();
    let server = Server::new(config, echo);

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        client.send(Frame::new(0, 0, Payload::Ping(*b"12345678"))).await;

        let first = client.next_frame().await.unwrap();
        assert_eq!(first.payload, Payload::Settings(expected));
        let second = client.next_frame().await.unwrap();
        assert!(second.is_ack());
        assert_eq!(second.frame_type(), FrameType::Settings);
        let third = client.next_frame().await.unwrap();
        assert_eq!(third, Frame::ping_ack(*b"12345678"));
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_handler_does_not_block_other_streams() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), |request: Request| async move {
        if request.uri == "/slow" {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok::<_, BoxError>(Response::new(200).with_body(request.uri.clone()))
    });

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        client.send_request(1, &get_fields("/slow"), None).await;
        client.send_request(3, &get_fields("/fast"), None).await;

        assert_eq!(client.first_response_stream().await, 3);
        assert_eq!(status(&client.read_outcome(3).await), "200");
        match client.read_outcome(1).await {
            Outcome::Response { body, .. } => assert_eq!(body.as_ref(), b"/slow"),
            Outcome::Reset(code) => panic!("unexpected reset {:#x}", code),
        }
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test]
async fn test_handler_error_resets_stream() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), |request: Request| async move {
        if request.uri == "/fail" {
            return Err::<Response, BoxError>("backend unavailable".into());
        }
        Ok(Response::new(200))
    });

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        client.send_request(1, &get_fields("/fail"), None).await;
        assert!(matches!(
            client.read_outcome(1).await,
            Outcome::Reset(error_code::INTERNAL_ERROR)
        ));

        // The connection keeps serving.
        client.send_request(3, &get_fields("/ok"), None).await;
        assert_eq!(status(&client.read_outcome(3).await), "200");
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test]
async fn test_handler_panic_resets_stream() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), |request: Request| async move {
        if request.uri == "/panic" {
            panic!("handler bug");
        }
        Ok::<_, BoxError>(Response::new(200))
    });

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        client.send_request(1, &get_fields("/panic"), None).await;
        assert!(matches!(
            client.read_outcome(1).await,
            Outcome::Reset(error_code::INTERNAL_ERROR)
        ));
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test]
async fn test_concurrent_handler_panics_reset_every_stream() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let config = ServerConfig::default().with_queue_capacity(1);
    let barrier = Arc::new(Barrier::new(4));
    let server = Server::new(config, move |request: Request| {
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            if request.uri == "/panic" {
                panic!("handler bug");
            }
            Ok::<_, BoxError>(Response::new(200).with_body("ok"))
        }
    });

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        for stream_id in [1, 3, 5] {
            client.send_request(stream_id, &get_fields("/panic"), None).await;
        }
        client.send_request(7, &get_fields("/ok"), None).await;

        let mut resets = Vec::new();
        let mut answered = false;
        while resets.len() < 3 || !answered {
            let frame = client.next_frame().await.expect("connection closed");
            match frame.payload {
                Payload::RstStream { error_code: code } => {
                    assert_eq!(code, error_code::INTERNAL_ERROR);
                    resets.push(frame.stream_id);
                }
                Payload::Data { .. } if frame.stream_id == 7 => {
                    answered = frame.is_end_stream();
                }
                _ => {}
            }
        }
        resets.sort_unstable();
        assert_eq!(resets, vec![1, 3, 5]);
    };

    let (result, ()) = tokio::join!(server.serve_connection(server_io), client);
    result.unwrap();
}

#[tokio::test]
async fn test_invalid_preface_is_rejected() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), echo);

    let client = async move {
        let mut client = TestClient::new(client_io);
        client.write(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        client.drain().await
    };

    let (result, frames) = tokio::join!(server.serve_connection(server_io), client);
    let err = result.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);

    let goaway = frames.iter().find_map(|frame| match &frame.payload {
        Payload::GoAway { error_code: code, .. } => Some(*code),
        _ => None,
    });
    assert_eq!(goaway, Some(error_code::PROTOCOL_ERROR));
}

#[tokio::test]
async fn test_protocol_violation_closes_connection() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(ServerConfig::default(), echo);

    let client = async move {
        let mut client = TestClient::handshake(client_io).await;
        // DATA on a stream that was never opened.
        client.send(Frame::data(7, &b"oops"[..], true)).await;
        client.drain().await
    };

    let (result, frames) = tokio::join!(server.serve_connection(server_io), client);
    assert!(matches!(result, Err(H2Error::Connection { .. })));
    assert!(frames
        .iter()
        .any(|frame| frame.frame_type() == FrameType::GoAway));
}
