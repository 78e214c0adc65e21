//! ICB length-tagged frame codec.
//!
//! An ICB frame is one length byte `L` followed by `L` bytes of payload.
//! The first payload byte is the packet type character; the remainder is a
//! run of NUL-terminated UTF-8 fields.
//!
//! Inbound types the bridge understands: `a` (login ok), `b` (open
//! message), `c` (personal message), `d` (status), `e` (error), `g` (exit),
//! `i` (command output), `j` (protocol), `l` (ping), `m` (pong). Outbound
//! the bridge produces `a`, `b`, `h` (command), `l` and `m`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Largest payload a single frame can carry (the length is one byte).
pub const MAX_PAYLOAD: usize = 255;

/// Incremental decoder for length-tagged frames.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Returns the type character and the raw field area of the payload;
    /// splitting into fields is left to [`split_fields`].
    pub fn next_frame(&mut self) -> Result<Option<(char, Bytes)>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let len = self.buf[0] as usize;
        if len == 0 {
            return Err(Error::protocol("frame without a type byte"));
        }
        if self.buf.len() < 1 + len {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(1 + len);
        frame.advance(1); // length byte
        let ty = frame[0];
        frame.advance(1); // type byte

        Ok(Some((ty as char, frame.freeze())))
    }
}

/// Split a frame's field area into UTF-8 fields.
///
/// Every field on the wire carries a NUL terminator, so the area splits
/// into the fields plus one empty trailer, which is discarded. An area
/// missing the final NUL still decodes.
pub fn split_fields(tail: &[u8]) -> Result<Vec<String>> {
    if tail.is_empty() {
        return Ok(Vec::new());
    }

    let mut fields = Vec::new();
    for piece in tail.split(|&b| b == 0) {
        let text = std::str::from_utf8(piece)
            .map_err(|_| Error::protocol("field is not valid UTF-8"))?;
        fields.push(text.to_string());
    }
    if fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }

    Ok(fields)
}

/// Builder for a single outbound frame.
#[derive(Debug)]
pub struct Encoder {
    payload: Vec<u8>,
}

impl Encoder {
    /// Start a frame of the given type.
    pub fn new(ty: char) -> Self {
        let mut payload = Vec::with_capacity(32);
        payload.push(ty as u8);
        Self { payload }
    }

    /// Append one NUL-terminated field.
    pub fn field(mut self, value: &str) -> Self {
        self.payload.extend_from_slice(value.as_bytes());
        self.payload.push(0);
        self
    }

    /// Finish the frame, prefixing the payload length.
    pub fn encode(self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::FrameTooLarge {
                limit: MAX_PAYLOAD,
                actual: self.payload.len(),
            });
        }

        let mut out = BytesMut::with_capacity(1 + self.payload.len());
        out.put_u8(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        Ok(out.freeze())
    }
}

/// Encode a frame with no fields (`l` ping, `m` pong).
pub fn empty(ty: char) -> Bytes {
    Bytes::from(vec![1, ty as u8])
}
