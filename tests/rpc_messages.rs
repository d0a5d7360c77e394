//! Wire-level codec checks: the canonical frame shapes, their byte layout,
//! and a round-trip property over the whole value universe.

use prise_io::{CodecError, Message, Value};
use proptest::prelude::*;

#[test]
fn request_frame_layout_and_round_trip() {
    let msg = Message::Request {
        msgid: 1,
        method: "test_method".into(),
        params: Value::Array(vec![]),
    };
    let bytes = msg.to_bytes();
    // fixarray(4), tag 0, msgid 1.
    assert_eq!(bytes[0], 0x94);
    assert_eq!(bytes[1], 0x00);
    assert_eq!(bytes[2], 0x01);
    assert_eq!(Message::decode(&bytes).unwrap(), msg);
}

#[test]
fn response_with_null_error() {
    let msg = Message::Response {
        msgid: 1,
        error: Value::Nil,
        result: Value::from(42),
    };
    let bytes = msg.to_bytes();
    assert_eq!(bytes[0], 0x94);
    assert_eq!(bytes[1], 0x01);
    // The error slot is the nil marker.
    assert_eq!(bytes[3], 0xc0);
    let decoded = Message::decode(&bytes).unwrap();
    assert_eq!(
        decoded,
        Message::Response {
            msgid: 1,
            error: Value::Nil,
            result: Value::from(42),
        }
    );
}

#[test]
fn notification_frame_layout_and_round_trip() {
    let msg = Message::Notification {
        method: "event_name".into(),
        params: Value::Map(vec![]),
    };
    let bytes = msg.to_bytes();
    // fixarray(3), tag 2.
    assert_eq!(bytes[0], 0x93);
    assert_eq!(bytes[1], 0x02);
    assert_eq!(Message::decode(&bytes).unwrap(), msg);
}

#[test]
fn frame_shape_errors() {
    // Two-element array.
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, 0).unwrap();
    rmp::encode::write_uint(&mut buf, 1).unwrap();
    assert_eq!(Message::decode(&buf), Err(CodecError::InvalidArrayLength(2)));

    // Three elements with a request tag.
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 3).unwrap();
    rmp::encode::write_uint(&mut buf, 0).unwrap();
    rmp::encode::write_uint(&mut buf, 1).unwrap();
    rmp::encode::write_str(&mut buf, "m").unwrap();
    assert_eq!(Message::decode(&buf), Err(CodecError::InvalidArrayLength(3)));

    // Four elements with a notification tag.
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 4).unwrap();
    rmp::encode::write_uint(&mut buf, 2).unwrap();
    rmp::encode::write_str(&mut buf, "m").unwrap();
    rmp::encode::write_nil(&mut buf).unwrap();
    rmp::encode::write_nil(&mut buf).unwrap();
    assert_eq!(Message::decode(&buf), Err(CodecError::InvalidArrayLength(4)));
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        "[a-z_]{0,12}".prop_map(|s| Value::from(s.as_str())),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Binary),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::vec(
                ("[a-z]{1,6}".prop_map(|s| Value::from(s.as_str())), inner),
                0..4
            )
            .prop_map(Value::Map),
        ]
    })
}

fn message_strategy() -> impl Strategy<Value = Message> {
    prop_oneof![
        (any::<u32>(), "[a-z_]{1,16}", value_strategy()).prop_map(|(msgid, method, params)| {
            Message::Request {
                msgid,
                method,
                params,
            }
        }),
        (any::<u32>(), value_strategy(), value_strategy()).prop_map(|(msgid, error, result)| {
            Message::Response {
                msgid,
                error,
                result,
            }
        }),
        ("[a-z_]{1,16}", value_strategy()).prop_map(|(method, params)| Message::Notification {
            method,
            params,
        }),
    ]
}

proptest! {
    #[test]
    fn well_formed_frames_survive_a_round_trip(msg in message_strategy()) {
        let decoded = Message::decode(&msg.to_bytes()).unwrap();
        prop_assert_eq!(decoded, msg);
    }
}
