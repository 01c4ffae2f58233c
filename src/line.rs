//! Delimited line and exact-length reads over a byte stream
//!
//! IMAP interleaves CRLF-terminated lines with counted literals, so
//! both read shapes must go through the same buffer: after a
//! `read_line` returns `a1 APPEND INBOX {120}\r\n`, the next
//! `read_exact(120)` has to see the octets immediately following that
//! CRLF.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Buffered reader exposing line-delimited and exact-length reads.
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Read bytes up to and including the next `\n`.
    ///
    /// Returns an empty vec on EOF, and a partial line without the
    /// terminator if the stream closes mid-line.
    pub async fn read_line(&mut self) -> std::io::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.inner.read_until(b'\n', &mut line).await?;
        Ok(line)
    }

    /// Read exactly `n` bytes, failing with `UnexpectedEof` if the
    /// stream closes first.
    pub async fn read_exact(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
