// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary property-list record codec.
//!
//! Outbound: one plist tree becomes one `bplist00` body with a 4-byte
//! big-endian length prefix, delivered to the transport as a single atomic
//! record. Inbound: [`FrameDecoder`] reassembles records from arbitrary TCP
//! chunks and is restartable at any byte boundary.
//!
//! Real-device transports frame for us; [`encode_body`] and
//! [`decode_record`] bypass the prefix for those.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use plist::Value;

use crate::error::Error;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Default cap on a single frame. Resource trees for heavy pages run to
/// megabytes; anything past this is treated as stream corruption.
pub const DEFAULT_MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

/// Encode one record with the length prefix.
pub fn encode_record(value: &Value) -> Result<Bytes, Error> {
    let body = encode_body(value)?;
    if body.len() > u32::MAX as usize {
        return Err(Error::Codec(format!("record of {} bytes overflows framing", body.len())));
    }
    let mut framed = BytesMut::with_capacity(LENGTH_PREFIX + body.len());
    framed.put_u32(body.len() as u32);
    framed.extend_from_slice(&body);
    Ok(framed.freeze())
}

/// Encode one record without framing, for transports that frame themselves.
pub fn encode_body(value: &Value) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    value
        .to_writer_binary(&mut body)
        .map_err(|e| Error::Codec(format!("bplist encode: {e}")))?;
    Ok(body)
}

/// Decode one complete, already-unframed record.
pub fn decode_record(bytes: &[u8]) -> Result<Value, Error> {
    Value::from_reader(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Codec(format!("bplist decode: {e}")))
}

/// Reassembles length-prefixed records from a byte stream.
///
/// `feed` consumes whatever whole records the buffer now holds and leaves any
/// partial tail buffered; a short read never moves the cursor. Any decode
/// failure is permanent: framing is length-based, so a misparse means the
/// stream offset can no longer be trusted.
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self { buf: BytesMut::new(), max_frame_len }
    }

    /// Bytes currently buffered (partial frame awaiting more input).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and drain every complete record it finishes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Value>, Error> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        loop {
            if self.buf.len() < LENGTH_PREFIX {
                break;
            }
            let len =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if len > self.max_frame_len {
                return Err(Error::Codec(format!(
                    "frame of {len} bytes exceeds cap of {}",
                    self.max_frame_len
                )));
            }
            if self.buf.len() < LENGTH_PREFIX + len {
                break;
            }
            self.buf.advance(LENGTH_PREFIX);
            let body = self.buf.split_to(len);
            records.push(decode_record(&body)?);
        }
        Ok(records)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
