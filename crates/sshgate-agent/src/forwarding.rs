//! Agent-forwarding notice relay.
//!
//! A remote host reaches the agent through a reverse-forwarded socket. The
//! forwarding helper on this machine accepts each such connection and relays
//! it with [`relay_agent_connection`], which puts an [`AgentForwardingNotice`]
//! in front of the peer's bytes. The agent reads it back with
//! [`read_connection_prelude`] and attributes the connection's requests to the
//! endpoint the notice names.

use bytes::{Bytes, BytesMut};
use sshgate::codec::write_message;
use sshgate::{AgentForwardingNotice, ControlCodec, ControlKind, ProtocolError};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::codec::Decoder;

/// Offset of the discriminator byte in a control frame.
const KIND_OFFSET: usize = 4;

/// Announce `notice` on `agent`, then copy bytes both ways until both
/// directions reach end of stream.
///
/// Returns the byte counts copied client→agent and agent→client.
pub async fn relay_agent_connection<C, A>(
    client: C,
    mut agent: A,
    notice: &AgentForwardingNotice,
) -> Result<(u64, u64), ProtocolError>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    write_message(&mut agent, notice).await?;
    tracing::debug!(
        hostname = %notice.hostname,
        port = notice.port,
        username = %notice.username,
        "relaying forwarded agent connection"
    );

    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut agent_rd, mut agent_wr) = tokio::io::split(agent);

    let upstream = tokio::spawn(async move {
        let n = tokio::io::copy(&mut client_rd, &mut agent_wr).await?;
        agent_wr.shutdown().await?;
        Ok::<_, io::Error>(n)
    });
    let downstream = tokio::spawn(async move {
        let n = tokio::io::copy(&mut agent_rd, &mut client_wr).await?;
        client_wr.shutdown().await?;
        Ok::<_, io::Error>(n)
    });

    let (up, down) = tokio::join!(upstream, downstream);
    let up = up.map_err(io::Error::other)??;
    let down = down.map_err(io::Error::other)??;
    Ok((up, down))
}

/// Take an optional [`AgentForwardingNotice`] off the front of a connection.
///
/// Direct connections start with multiplexer traffic instead. A yamux header
/// carries the top byte of a stream id where a frame carries its
/// discriminator, and that byte is zero for any stream a new peer opens, so
/// five bytes tell the two apart. Bytes read past the notice are replayed
/// by the returned stream.
pub async fn read_connection_prelude<C>(
    mut conn: C,
) -> Result<(Rewound<C>, Option<AgentForwardingNotice>), ProtocolError>
where
    C: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(256);
    while buf.len() <= KIND_OFFSET {
        if conn.read_buf(&mut buf).await? == 0 {
            return Err(if buf.is_empty() {
                ProtocolError::Closed
            } else {
                ProtocolError::Truncated
            });
        }
    }
    if buf[KIND_OFFSET] != ControlKind::AgentForwardingNotice.as_u8() {
        return Ok((Rewound::new(conn, buf.freeze()), None));
    }

    let mut codec = ControlCodec;
    let packet = loop {
        if let Some(packet) = codec.decode(&mut buf)? {
            break packet;
        }
        if conn.read_buf(&mut buf).await? == 0 {
            return Err(ProtocolError::Truncated);
        }
    };
    let notice: AgentForwardingNotice = packet.into_message()?;
    Ok((Rewound::new(conn, buf.freeze()), Some(notice)))
}

/// A stream with already-read bytes put back in front of it.
#[derive(Debug)]
pub struct Rewound<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewound<S> {
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewound<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewound<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
