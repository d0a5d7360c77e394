//! Length-prefixed framing for messages on a byte stream.
//!
//! The socket carries frames as a 4-byte big-endian payload length followed
//! by the encoded message. The assembler sits on top of the reactor's
//! `recv` buffers: bytes go in as they arrive, complete messages come out
//! for the dispatcher.

use bytes::{Buf, BufMut, BytesMut};

use super::{CodecError, Message};
use crate::config;

/// Reassembles length-prefixed frames from an incoming byte stream.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Bytes buffered but not yet assembled into a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feeds bytes received from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next message if a whole frame has arrived. `Ok(None)` means
    /// more bytes are needed. Any error poisons the stream; the caller is
    /// expected to close the connection.
    pub fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let mut header = [0u8; 4];
        header.copy_from_slice(&self.buf[..4]);
        let len = u32::from_be_bytes(header) as usize;
        if len > config::MAX_FRAME_LEN {
            return Err(CodecError::InvalidFormat);
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        self.buf.advance(4);
        let payload = self.buf.split_to(len);
        Message::decode(&payload).map(Some)
    }
}

/// Encodes `msg` and appends it, length-prefixed, to `out`.
pub fn write_frame(msg: &Message, out: &mut BytesMut) {
    let payload = msg.to_bytes();
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(&payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmpv::Value;

    fn ping() -> Message {
        Message::Notification {
            method: "ping".into(),
            params: Value::Array(vec![]),
        }
    }

    #[test]
    fn test_frame_round_trip() {
        let mut wire = BytesMut::new();
        write_frame(&ping(), &mut wire);
        let mut assembler = FrameAssembler::new();
        assembler.push(&wire);
        assert_eq!(assembler.next_message().unwrap(), Some(ping()));
        assert_eq!(assembler.next_message().unwrap(), None);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_partial_frames_wait_for_more_bytes() {
        let mut wire = BytesMut::new();
        write_frame(&ping(), &mut wire);
        let mut assembler = FrameAssembler::new();
        // Deliver one byte at a time, as a slow peer would.
        for chunk in wire.chunks(1) {
            assert_eq!(assembler.next_message().unwrap(), None);
            assembler.push(chunk);
        }
        assert_eq!(assembler.next_message().unwrap(), Some(ping()));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut wire = BytesMut::new();
        write_frame(&ping(), &mut wire);
        write_frame(&ping(), &mut wire);
        let mut assembler = FrameAssembler::new();
        assembler.push(&wire);
        assert_eq!(assembler.next_message().unwrap(), Some(ping()));
        assert_eq!(assembler.next_message().unwrap(), Some(ping()));
        assert_eq!(assembler.next_message().unwrap(), None);
    }

    #[test]
    fn test_oversized_length_prefix_is_corruption() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&u32::MAX.to_be_bytes());
        assert_eq!(assembler.next_message(), Err(CodecError::InvalidFormat));
    }

    #[test]
    fn test_corrupt_payload_is_a_codec_error() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&2u32.to_be_bytes());
        assembler.push(&[0x92, 0x01]); // two-element array: too short for any frame
        assert!(assembler.next_message().is_err());
    }
}
