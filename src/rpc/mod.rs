//! MessagePack-RPC message codec.
//!
//! A frame on the wire is a 3- or 4-element self-describing array whose
//! first element is an integer tag: `0` request, `1` response, `2`
//! notification. Requests and responses carry a 32-bit `msgid` chosen by
//! the initiator and echoed back; a response's `error` is nil on success
//! and, by convention, a `[code, message]` pair on failure. Notifications
//! have no reply.
//!
//! The codec is stream-agnostic; [`stream`] adds the length prefix used
//! when frames are pushed onto a byte stream.

use std::io;

use thiserror::Error;

pub use rmpv::Value;

pub mod decode;
pub mod stream;

pub use decode::Decoder;

use decode::NIL_MARKER;

const REQUEST: i64 = 0;
const RESPONSE: i64 = 1;
const NOTIFICATION: i64 = 2;

/// Framing and shape errors. Any of these terminates the connection: the
/// dispatcher closes the fd and reports upward.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated or malformed message")]
    InvalidFormat,

    #[error("unknown message tag {0}")]
    InvalidMessageType(i64),

    #[error("array length {0} does not match the message tag")]
    InvalidArrayLength(u32),

    #[error("expected an array")]
    NotAnArray,

    #[error("expected an integer")]
    NotAnInteger,

    #[error("expected a string")]
    NotAString,
}

/// One frame on the RPC wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        msgid: u32,
        method: String,
        params: Value,
    },
    Response {
        msgid: u32,
        /// `Value::Nil` on success.
        error: Value,
        result: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    /// Decodes one frame from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
        Self::decode_from(&mut Decoder::new(buf))
    }

    /// Decodes one frame at the decoder's cursor, leaving the cursor just
    /// past it.
    pub fn decode_from(d: &mut Decoder<'_>) -> Result<Message, CodecError> {
        let len = d.read_array_len()?;
        if !(3..=4).contains(&len) {
            return Err(CodecError::InvalidArrayLength(len));
        }
        let tag = d.read_int()?;
        match tag {
            REQUEST => {
                if len != 4 {
                    return Err(CodecError::InvalidArrayLength(len));
                }
                let msgid = read_msgid(d)?;
                let method = d.read_string()?;
                let params = d.decode_value()?;
                Ok(Message::Request {
                    msgid,
                    method,
                    params,
                })
            }
            RESPONSE => {
                if len != 4 {
                    return Err(CodecError::InvalidArrayLength(len));
                }
                let msgid = read_msgid(d)?;
                let error = if d.peek_byte()? == NIL_MARKER {
                    d.read_byte()?;
                    Value::Nil
                } else {
                    d.decode_value()?
                };
                let result = d.decode_value()?;
                Ok(Message::Response {
                    msgid,
                    error,
                    result,
                })
            }
            NOTIFICATION => {
                if len != 3 {
                    return Err(CodecError::InvalidArrayLength(len));
                }
                let method = d.read_string()?;
                let params = d.decode_value()?;
                Ok(Message::Notification { method, params })
            }
            other => Err(CodecError::InvalidMessageType(other)),
        }
    }

    /// Encodes the frame onto `wr` as its tagged array.
    pub fn encode<W: io::Write>(&self, wr: &mut W) -> io::Result<()> {
        let frame = match self {
            Message::Request {
                msgid,
                method,
                params,
            } => Value::Array(vec![
                Value::from(REQUEST),
                Value::from(*msgid),
                Value::from(method.as_str()),
                params.clone(),
            ]),
            Message::Response {
                msgid,
                error,
                result,
            } => Value::Array(vec![
                Value::from(RESPONSE),
                Value::from(*msgid),
                error.clone(),
                result.clone(),
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                Value::from(NOTIFICATION),
                Value::from(method.as_str()),
                params.clone(),
            ]),
        };
        rmpv::encode::write_value(wr, &frame).map_err(io::Error::other)
    }

    /// Encodes into a fresh buffer; handy for tests and for framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing to a Vec cannot fail.
        if let Err(e) = self.encode(&mut buf) {
            unreachable!("encoding to a Vec failed: {e}");
        }
        buf
    }
}

/// A msgid must fit an unsigned 32-bit integer; anything negative or wider
/// is rejected rather than wrapped.
fn read_msgid(d: &mut Decoder<'_>) -> Result<u32, CodecError> {
    u32::try_from(d.read_int()?).map_err(|_| CodecError::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let msg = Message::Request {
            msgid: 1,
            method: "test_method".into(),
            params: Value::Array(vec![]),
        };
        assert_eq!(Message::decode(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_response_error_is_nil_on_success() {
        let msg = Message::Response {
            msgid: 1,
            error: Value::Nil,
            result: Value::from(42),
        };
        let decoded = Message::decode(&msg.to_bytes()).unwrap();
        let Message::Response { error, result, .. } = decoded else {
            panic!("wrong message shape");
        };
        assert_eq!(error, Value::Nil);
        assert_eq!(result, Value::from(42));
    }

    #[test]
    fn test_response_error_value_survives() {
        let msg = Message::Response {
            msgid: 9,
            error: Value::Array(vec![Value::from(404), Value::from("not found")]),
            result: Value::Nil,
        };
        assert_eq!(Message::decode(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_notification_round_trip() {
        let msg = Message::Notification {
            method: "event_name".into(),
            params: Value::Map(vec![]),
        };
        assert_eq!(Message::decode(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_short_array_is_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_uint(&mut buf, 0).unwrap();
        rmp::encode::write_uint(&mut buf, 1).unwrap();
        assert_eq!(
            Message::decode(&buf),
            Err(CodecError::InvalidArrayLength(2))
        );
    }

    #[test]
    fn test_request_requires_four_elements() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_uint(&mut buf, 0).unwrap();
        rmp::encode::write_uint(&mut buf, 1).unwrap();
        rmp::encode::write_str(&mut buf, "m").unwrap();
        assert_eq!(
            Message::decode(&buf),
            Err(CodecError::InvalidArrayLength(3))
        );
    }

    #[test]
    fn test_notification_requires_three_elements() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 4).unwrap();
        rmp::encode::write_uint(&mut buf, 2).unwrap();
        rmp::encode::write_str(&mut buf, "m").unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();
        assert_eq!(
            Message::decode(&buf),
            Err(CodecError::InvalidArrayLength(4))
        );
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 4).unwrap();
        rmp::encode::write_uint(&mut buf, 9).unwrap();
        assert_eq!(Message::decode(&buf), Err(CodecError::InvalidMessageType(9)));
    }

    #[test]
    fn test_non_array_is_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_uint(&mut buf, 5).unwrap();
        assert_eq!(Message::decode(&buf), Err(CodecError::NotAnArray));
    }

    #[test]
    fn test_negative_msgid_is_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 4).unwrap();
        rmp::encode::write_uint(&mut buf, 0).unwrap();
        rmp::encode::write_sint(&mut buf, -1).unwrap();
        rmp::encode::write_str(&mut buf, "m").unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();
        assert_eq!(Message::decode(&buf), Err(CodecError::NotAnInteger));
    }

    #[test]
    fn test_msgid_wider_than_u32_is_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 4).unwrap();
        rmp::encode::write_uint(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, u64::from(u32::MAX) + 1).unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();
        rmp::encode::write_uint(&mut buf, 0).unwrap();
        assert_eq!(Message::decode(&buf), Err(CodecError::NotAnInteger));
    }

    #[test]
    fn test_non_string_method_is_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 4).unwrap();
        rmp::encode::write_uint(&mut buf, 0).unwrap();
        rmp::encode::write_uint(&mut buf, 1).unwrap();
        rmp::encode::write_uint(&mut buf, 2).unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();
        assert_eq!(Message::decode(&buf), Err(CodecError::NotAString));
    }

    #[test]
    fn test_truncated_params_is_invalid_format() {
        let msg = Message::Request {
            msgid: 3,
            method: "m".into(),
            params: Value::Array(vec![Value::from(1), Value::from(2)]),
        };
        let mut buf = msg.to_bytes();
        buf.truncate(buf.len() - 1);
        assert_eq!(Message::decode(&buf), Err(CodecError::InvalidFormat));
    }
}
