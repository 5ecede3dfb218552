use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Running total of bytes read through a [`CountingStream`].
///
/// Clones share the same total, so the proxy can keep one while the stream
/// itself is owned by the engine.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::AcqRel);
    }
}

/// Stream wrapper that counts bytes read. Writes pass through uncounted.
#[derive(Debug)]
pub struct CountingStream<S> {
    inner: S,
    counter: ByteCounter,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S) -> (Self, ByteCounter) {
        let counter = ByteCounter::new();
        (
            Self {
                inner,
                counter: counter.clone(),
            },
            counter,
        )
    }

    pub fn bytes_read(&self) -> u64 {
        self.counter.get()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.counter.add(buf.filled().len() - before);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn counts_reads_only() {
        let (near, mut far) = duplex(64);
        let (mut counted, counter) = CountingStream::new(near);

        far.write_all(b"hello world").await.unwrap();
        let mut buf = [0u8; 5];
        counted.read_exact(&mut buf).await.unwrap();
        assert_eq!(counter.get(), 5);

        counted.write_all(b"reply").await.unwrap();
        assert_eq!(counter.get(), 5);

        let mut rest = [0u8; 6];
        counted.read_exact(&mut rest).await.unwrap();
        assert_eq!(counted.bytes_read(), 11);
        assert_eq!(counter.get(), 11);
    }

    #[tokio::test]
    async fn eof_adds_nothing() {
        let (near, far) = duplex(64);
        let (mut counted, counter) = CountingStream::new(near);
        drop(far);
        let mut buf = Vec::new();
        counted.read_to_end(&mut buf).await.unwrap();
        assert_eq!(counter.get(), 0);
    }
}
