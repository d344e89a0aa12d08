//! In-process byte channels with blocking, back-pressured ends.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Write end of a byte channel.
///
/// Writes wait while the channel buffer is full. Shutting down (or
/// dropping) the writer gives the reader end-of-stream once the buffer
/// drains.
#[derive(Debug)]
pub struct ChannelWriter {
    inner: DuplexStream,
}

/// Read end of a byte channel.
///
/// Dropping the reader makes further writes fail with `BrokenPipe`.
#[derive(Debug)]
pub struct ChannelReader {
    inner: DuplexStream,
}

/// Creates a one-way byte channel buffering at most `buffer` bytes.
#[must_use]
pub fn duplex_channel(buffer: usize) -> (ChannelWriter, ChannelReader) {
    let (write_side, read_side) = tokio::io::duplex(buffer.max(1));
    (
        ChannelWriter { inner: write_side },
        ChannelReader { inner: read_side },
    )
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}
