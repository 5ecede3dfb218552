//! Secure-shell wire encoding (RFC 4251 section 5) for control payloads.
//!
//! Only the two field types the control messages need are supported:
//! `uint32` (big-endian) and `string` (`uint32` length followed by bytes).

use crate::error::ProtocolError;
use crate::messages::ControlKind;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A typed control payload with a fixed discriminator.
pub trait WireMessage: Sized {
    const KIND: ControlKind;

    fn encode(&self, w: &mut WireWriter);

    fn decode(r: &mut WireReader) -> Result<Self, ProtocolError>;

    fn to_payload(&self) -> Bytes {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode a complete payload. Trailing bytes are rejected.
    fn from_payload(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(Self::KIND, payload);
        let msg = Self::decode(&mut r)?;
        r.finish()?;
        Ok(msg)
    }
}

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        // Payloads are bounded by MAX_CONTROL_FRAME long before this matters.
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a payload. Errors name the message kind and field.
#[derive(Debug)]
pub struct WireReader {
    kind: ControlKind,
    buf: Bytes,
}

impl WireReader {
    pub fn new(kind: ControlKind, buf: Bytes) -> Self {
        Self { kind, buf }
    }

    pub fn read_u32(&mut self, field: &str) -> Result<u32, ProtocolError> {
        if self.buf.remaining() < 4 {
            return Err(ProtocolError::malformed(
                self.kind,
                format!("truncated uint32 field `{field}`"),
            ));
        }
        Ok(self.buf.get_u32())
    }

    pub fn read_bytes(&mut self, field: &str) -> Result<Bytes, ProtocolError> {
        let len = self.read_u32(field)? as usize;
        if self.buf.remaining() < len {
            return Err(ProtocolError::malformed(
                self.kind,
                format!(
                    "string field `{field}` declares {len} bytes, {} available",
                    self.buf.remaining()
                ),
            ));
        }
        Ok(self.buf.split_to(len))
    }

    pub fn read_string(&mut self, field: &str) -> Result<String, ProtocolError> {
        let raw = self.read_bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| {
            ProtocolError::malformed(self.kind, format!("field `{field}` is not valid UTF-8"))
        })
    }

    /// Ensure the whole payload was consumed.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.has_remaining() {
            return Err(ProtocolError::malformed(
                self.kind,
                format!("{} trailing bytes", self.buf.remaining()),
            ));
        }
        Ok(())
    }
}
