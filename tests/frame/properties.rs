//! Property tests for frame serialization

use bytes::Bytes;
use proptest::prelude::*;

use h2_server_core::{flags, Frame, Payload, Priority};

use super::parse;

fn bytes_strategy(max: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..max).prop_map(Bytes::from)
}

fn priority_strategy() -> impl Strategy<Value = Priority> {
    (any::<bool>(), 0u32..0x8000_0000, any::<u8>()).prop_map(|(exclusive, dependency, weight)| {
        Priority {
            exclusive,
            dependency,
            weight,
        }
    })
}

fn stream_frame() -> impl Strategy<Value = Frame> {
    let payload = prop_oneof![
        (bytes_strategy(64), prop::option::of(any::<u8>()))
            .prop_map(|(data, pad_length)| Payload::Data { data, pad_length }),
        (
            prop::option::of(priority_strategy()),
            bytes_strategy(64),
            prop::option::of(any::<u8>())
        )
            .prop_map(|(priority, fragment, pad_length)| Payload::Headers {
                priority,
                fragment,
                pad_length,
            }),
        priority_strategy().prop_map(Payload::Priority),
        any::<u32>().prop_map(|error_code| Payload::RstStream { error_code }),
        (1u32..0x8000_0000).prop_map(|increment| Payload::WindowUpdate { increment }),
        bytes_strategy(64).prop_map(|fragment| Payload::Continuation { fragment }),
        (10u8..=255, bytes_strategy(32))
            .prop_map(|(frame_type, payload)| Payload::Unknown { frame_type, payload }),
    ];
    (
        1u32..0x8000_0000,
        prop::sample::select(vec![0, flags::END_STREAM, flags::END_HEADERS]),
        payload,
    )
        .prop_map(|(stream_id, flags, payload)| Frame::new(stream_id, flags, payload))
}

fn connection_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        prop::collection::vec((any::<u16>(), any::<u32>()), 0..8).prop_map(Frame::settings),
        any::<[u8; 8]>().prop_map(|data| Frame::new(0, 0, Payload::Ping(data))),
        (0u32..0x8000_0000, any::<u32>(), bytes_strategy(32)).prop_map(
            |(last_stream_id, error_code, debug_data)| Frame::goaway(
                last_stream_id,
                error_code,
                debug_data
            )
        ),
        (1u32..0x8000_0000).prop_map(|increment| Frame::window_update(0, increment)),
    ]
}

proptest! {
    #[test]
    fn prop_stream_frame_roundtrip(frame in stream_frame()) {
        let bytes = frame.to_bytes();
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
        prop_assert_eq!(length, bytes.len() - 9);

        let parsed = parse(&bytes).unwrap();
        prop_assert_eq!(&parsed.payload, &frame.payload);
        prop_assert_eq!(parsed.stream_id, frame.stream_id);
        prop_assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn prop_connection_frame_roundtrip(frame in connection_frame()) {
        let bytes = frame.to_bytes();
        let parsed = parse(&bytes).unwrap();
        prop_assert_eq!(&parsed, &frame);
        prop_assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn prop_parse_never_panics(
        frame_type in 0u8..=12,
        frame_flags in any::<u8>(),
        stream_id in 0u32..4,
        payload in bytes_strategy(48),
    ) {
        let mut bytes = Vec::with_capacity(9 + payload.len());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        bytes.push(frame_type);
        bytes.push(frame_flags);
        bytes.extend_from_slice(&stream_id.to_be_bytes());
        bytes.extend_from_slice(&payload);
        if let Ok(frame) = parse(&bytes) {
            prop_assert_eq!(frame.to_bytes().len(), bytes.len());
        }
    }
}
