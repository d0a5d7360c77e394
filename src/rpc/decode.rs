//! Cursor-based MessagePack decoding primitives.
//!
//! A [`Decoder`] walks a byte slice, consuming one self-describing value at
//! a time. The message layer drives these primitives directly so it can
//! validate shape as it goes (array length before tag, nil-peek for
//! response errors) instead of materializing every frame as a tree first.

use std::io::Cursor;

use rmp::decode::{self, NumValueReadError, ValueReadError};
use rmpv::Value;

use super::CodecError;

/// Marker byte for the MessagePack nil value.
pub(crate) const NIL_MARKER: u8 = 0xc0;

pub struct Decoder<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            cur: Cursor::new(buf),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.cur.position() as usize
    }

    /// Looks at the next byte without consuming it.
    pub fn peek_byte(&self) -> Result<u8, CodecError> {
        self.cur
            .get_ref()
            .get(self.position())
            .copied()
            .ok_or(CodecError::InvalidFormat)
    }

    pub fn read_byte(&mut self) -> Result<u8, CodecError> {
        let byte = self.peek_byte()?;
        self.cur.set_position(self.cur.position() + 1);
        Ok(byte)
    }

    pub fn read_array_len(&mut self) -> Result<u32, CodecError> {
        decode::read_array_len(&mut self.cur).map_err(|e| match e {
            ValueReadError::TypeMismatch(_) => CodecError::NotAnArray,
            _ => CodecError::InvalidFormat,
        })
    }

    /// Reads any MessagePack integer as a signed 64-bit value.
    pub fn read_int(&mut self) -> Result<i64, CodecError> {
        decode::read_int::<i64, _>(&mut self.cur).map_err(|e| match e {
            NumValueReadError::TypeMismatch(_) | NumValueReadError::OutOfRange => {
                CodecError::NotAnInteger
            }
            _ => CodecError::InvalidFormat,
        })
    }

    /// Reads a string into an owned `String`.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = decode::read_str_len(&mut self.cur).map_err(|e| match e {
            ValueReadError::TypeMismatch(_) => CodecError::NotAString,
            _ => CodecError::InvalidFormat,
        })? as usize;
        let start = self.position();
        let data = self
            .cur
            .get_ref()
            .get(start..start + len)
            .ok_or(CodecError::InvalidFormat)?;
        let text = std::str::from_utf8(data)
            .map_err(|_| CodecError::NotAString)?
            .to_owned();
        self.cur.set_position((start + len) as u64);
        Ok(text)
    }

    /// Decodes one complete value of any type, recursively.
    pub fn decode_value(&mut self) -> Result<Value, CodecError> {
        rmpv::decode::read_value(&mut self.cur).map_err(|_| CodecError::InvalidFormat)
    }
}
