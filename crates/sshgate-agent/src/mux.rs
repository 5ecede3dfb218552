//! Stream multiplexing over one peer connection.
//!
//! A peer opens three streams in a fixed order: control, SSH data, then the
//! tunnelled transport. The dispatcher only needs to accept them in order
//! and to notice when the peer drops the connection.

use futures_util::StreamExt;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_yamux::{Config, Session, StreamHandle};

/// Inbound streams that have not been accepted yet.
const DEFAULT_BACKLOG: usize = 8;

/// Starts a server-side multiplexed session over a raw connection.
pub trait Multiplexer: Send + Sync + 'static {
    type Session: MuxSession;

    fn open<C>(&self, conn: C) -> io::Result<Self::Session>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static;
}

pub trait MuxSession: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Next stream opened by the peer, in the order it was opened.
    fn accept(&mut self) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Resolves once the peer has closed the underlying connection.
    fn closed(&self) -> impl Future<Output = ()> + Send;

    /// Refuse further streams. Frames already queued still reach the peer
    /// while the session lives; dropping it tears the connection down.
    fn close(&mut self);
}

/// Yamux in server mode.
#[derive(Debug, Clone)]
pub struct YamuxMultiplexer {
    backlog: usize,
}

impl YamuxMultiplexer {
    pub fn new(backlog: usize) -> Self {
        Self {
            backlog: backlog.max(1),
        }
    }
}

impl Default for YamuxMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }
}

impl Multiplexer for YamuxMultiplexer {
    type Session = YamuxSession;

    fn open<C>(&self, conn: C) -> io::Result<YamuxSession>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut session = Session::new_server(conn, Config::default());
        let (incoming_tx, incoming) = mpsc::channel(self.backlog);
        let peer_closed = CancellationToken::new();
        let shutdown = CancellationToken::new();

        // The session only makes progress while polled, so a driver task owns
        // it for its whole life and hands inbound streams over the channel.
        let driver_closed = peer_closed.clone();
        let driver_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = driver_shutdown.cancelled() => break,
                    next = session.next() => match next {
                        Some(Ok(stream)) => {
                            // After close() the stream is dropped, which resets it.
                            if incoming_tx.send(stream).await.is_err() {
                                tracing::debug!("refused stream on closed session");
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!(err = %e, "multiplexed session failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
            driver_closed.cancel();
        });

        Ok(YamuxSession {
            incoming,
            peer_closed,
            shutdown,
        })
    }
}

pub struct YamuxSession {
    incoming: mpsc::Receiver<StreamHandle>,
    peer_closed: CancellationToken,
    shutdown: CancellationToken,
}

impl MuxSession for YamuxSession {
    type Stream = StreamHandle;

    async fn accept(&mut self) -> io::Result<StreamHandle> {
        self.incoming.recv().await.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "multiplexed connection closed",
            )
        })
    }

    async fn closed(&self) {
        self.peer_closed.cancelled().await
    }

    fn close(&mut self) {
        self.incoming.close();
    }
}

impl Drop for YamuxSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
