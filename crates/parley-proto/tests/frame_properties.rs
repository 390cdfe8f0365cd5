//! Property-based tests for frame decoding
//!
//! The decoder sits directly on network input, so it must hold for ALL byte
//! sequences, not just well-formed ones.

use parley_proto::{InboundFrame, MessagePayload, OutboundFrame, SenderPayload, TypingPayload};
use proptest::prelude::*;

/// Strategy for generating arbitrary message payloads
fn arbitrary_message() -> impl Strategy<Value = MessagePayload> {
    (
        "[a-f0-9]{1,24}",
        "[a-f0-9]{1,24}",
        ".{0,64}",
        any::<u64>(),
        "[a-z0-9]{1,12}",
        ".{0,16}",
        proptest::option::of("[a-z]{1,8}"),
    )
        .prop_map(|(id, room_id, content, created_at, sender_id, name, temp)| MessagePayload {
            id,
            room_id,
            content,
            created_at,
            sender: SenderPayload { id: sender_id, name, avatar: None },
            attachments: vec![],
            client_temp_id: temp,
        })
}

proptest! {
    /// Property: decoding arbitrary bytes never panics
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = InboundFrame::decode(&bytes);
    }

    /// Property: a pushed message survives the server's JSON encoding intact
    #[test]
    fn prop_new_message_decodes_to_same_payload(message in arbitrary_message()) {
        let frame = InboundFrame::NewMessage(message.clone());
        let bytes = serde_json::to_vec(&frame).unwrap();

        let decoded = InboundFrame::decode(&bytes).unwrap();
        prop_assert_eq!(decoded.room_id(), Some(message.room_id.as_str()));
        prop_assert_eq!(decoded, InboundFrame::NewMessage(message));
    }

    /// Property: any unrecognized type tag on a well-formed object is ignored
    #[test]
    fn prop_unknown_types_decode_to_unknown(tag in "[a-z_]{1,20}") {
        prop_assume!(!["new_message", "typing", "ack", "pong"].contains(&tag.as_str()));

        let raw = format!(r#"{{"type":"{tag}","room_id":"r1","extra":[1,2,3]}}"#);
        prop_assert_eq!(InboundFrame::decode(raw.as_bytes()).unwrap(), InboundFrame::Unknown);
    }

    /// Property: outbound frames are always valid JSON objects with a type tag
    #[test]
    fn prop_outbound_frames_are_tagged_objects(nonce in any::<u64>(), typing in any::<bool>()) {
        let frames = [
            OutboundFrame::Ping { nonce },
            OutboundFrame::Typing(TypingPayload {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                typing,
            }),
        ];

        for frame in frames {
            let value: serde_json::Value = serde_json::from_slice(&frame.encode().unwrap()).unwrap();
            prop_assert!(value.get("type").and_then(serde_json::Value::as_str).is_some());
        }
    }
}
