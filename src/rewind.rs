use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Replays bytes that were read past the end of the handshake before
/// handing reads over to the underlying stream.
///
/// The header reader may pull early frame bytes into its buffer together
/// with the HTTP head; those bytes belong to the framing layer and are
/// served first. Writes always go straight through.
#[derive(Debug)]
pub struct Rewind<S> {
    leftover: Vec<u8>,
    pos: usize,
    stream: S,
}

impl<S> Rewind<S> {
    pub(crate) fn new(leftover: Vec<u8>, stream: S) -> Self {
        Self {
            leftover,
            pos: 0,
            stream,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.pos < this.leftover.len() {
            let amt = (this.leftover.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.leftover[this.pos..this.pos + amt]);
            this.pos += amt;
            if this.pos == this.leftover.len() {
                this.leftover = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn replays_leftover_before_the_stream() {
        let mut rewind = Rewind::new(b"head".to_vec(), b"tail".as_slice());
        let mut out = vec![];
        rewind.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"headtail");
    }

    #[tokio::test]
    async fn serves_leftover_across_small_reads() {
        let mut rewind = Rewind::new(b"abcdef".to_vec(), b"".as_slice());
        let mut buf = [0; 4];
        rewind.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcd");
        let mut buf = [0; 2];
        rewind.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ef");
    }

    #[tokio::test]
    async fn empty_leftover_is_transparent() {
        let mut rewind = Rewind::new(vec![], b"data".as_slice());
        let mut out = vec![];
        rewind.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"data");
    }
}
