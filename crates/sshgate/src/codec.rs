//! Framing for control messages.
//!
//! Each frame is a big-endian `uint32` length covering the rest of the frame,
//! one discriminator byte, then the payload.

use crate::error::ProtocolError;
use crate::messages::ControlKind;
use crate::wire::WireMessage;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum size of a control frame body (discriminator + payload), 64 KiB.
pub const MAX_CONTROL_FRAME: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

/// One undecoded control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub kind: u8,
    pub payload: Bytes,
}

impl ControlPacket {
    pub fn new(kind: ControlKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.as_u8(),
            payload: payload.into(),
        }
    }

    pub fn from_message<M: WireMessage>(msg: &M) -> Self {
        Self::new(M::KIND, msg.to_payload())
    }

    /// Decode the payload as `M`, rejecting any other discriminator.
    pub fn into_message<M: WireMessage>(self) -> Result<M, ProtocolError> {
        if self.kind != M::KIND.as_u8() {
            return Err(ProtocolError::UnexpectedMessage {
                expected: M::KIND,
                got: self.kind,
            });
        }
        M::from_payload(self.payload)
    }
}

/// `tokio_util` codec for control frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCodec;

impl Decoder for ControlCodec {
    type Item = ControlPacket;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ControlPacket>, ProtocolError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&src[..LEN_PREFIX]);
        let len = check_frame_len(u32::from_be_bytes(prefix) as usize)?;

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }
        src.advance(LEN_PREFIX);
        let mut body = src.split_to(len);
        let kind = body.get_u8();
        Ok(Some(ControlPacket {
            kind,
            payload: body.freeze(),
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ControlPacket>, ProtocolError> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated),
        }
    }
}

impl Encoder<ControlPacket> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: ControlPacket, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = check_frame_len(1 + packet.payload.len())?;
        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(len as u32);
        dst.put_u8(packet.kind);
        dst.put_slice(&packet.payload);
        Ok(())
    }
}

fn check_frame_len(len: usize) -> Result<usize, ProtocolError> {
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > MAX_CONTROL_FRAME {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Write one control frame and flush it.
pub async fn write_control_packet<W>(
    stream: &mut W,
    kind: ControlKind,
    payload: &[u8],
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut frame = BytesMut::new();
    ControlCodec.encode(
        ControlPacket::new(kind, Bytes::copy_from_slice(payload)),
        &mut frame,
    )?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read exactly one control frame.
///
/// Never reads past the end of the frame, so the stream can be handed to
/// something else afterwards.
pub async fn read_control_packet<R>(stream: &mut R) -> Result<ControlPacket, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LEN_PREFIX];
    if stream.read(&mut prefix[..1]).await? == 0 {
        return Err(ProtocolError::Closed);
    }
    read_exact_or_truncated(stream, &mut prefix[1..]).await?;
    let len = check_frame_len(u32::from_be_bytes(prefix) as usize)?;

    let mut body = vec![0u8; len];
    read_exact_or_truncated(stream, &mut body).await?;
    let mut body = Bytes::from(body);
    let kind = body.get_u8();
    Ok(ControlPacket {
        kind,
        payload: body,
    })
}

async fn read_exact_or_truncated<R>(stream: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated),
        Err(e) => Err(e.into()),
    }
}

/// Encode and write a typed message.
pub async fn write_message<W, M>(stream: &mut W, msg: &M) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
    M: WireMessage,
{
    write_control_packet(stream, M::KIND, &msg.to_payload()).await
}

/// Read one frame and decode it as `M`. Any other discriminator is an error.
pub async fn expect_message<R, M>(stream: &mut R) -> Result<M, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
    M: WireMessage,
{
    read_control_packet(stream).await?.into_message()
}
