//! Packet-boundary-safe buffered reader.
//!
//! [`PacketReader`] only pulls from its source once the buffer is fully
//! drained, and a refill is exactly one source read. Over a datagram
//! source this keeps the small consecutive reads of one decode (tag,
//! fixed field, payload) inside a single datagram, while still allowing
//! byte-by-byte inspection of the input.
//!
//! Scans (`read_until`) never cross a refill boundary: a delimiter that
//! is not in the current buffer is reported as end of input.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// How many zero-length, non-error source reads a refill tolerates.
const MAX_CONSECUTIVE_EMPTY_READS: usize = 3;

/// Errors surfaced by [`PacketReader`].
#[derive(Debug, Error)]
pub enum ReadError {
    /// The current buffer ran out before the request could be satisfied.
    /// `consumed` bytes were still taken from the buffer.
    #[error("end of input after {consumed} bytes")]
    EndOfInput { consumed: usize },

    /// The source kept returning empty reads.
    #[error("source made no progress after {} empty reads", MAX_CONSECUTIVE_EMPTY_READS)]
    NoProgress,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReadError {
    /// Whether the underlying source failed because a deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReadError::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Buffering for an [`AsyncRead`] that never merges two source reads.
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
    buf: Box<[u8]>,
    r: usize,
    w: usize,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Wrap `inner` with a buffer of `size` bytes. `size` should hold the
    /// largest datagram the source is expected to deliver.
    pub fn new(inner: R, size: usize) -> Self {
        PacketReader {
            inner,
            buf: vec![0u8; size].into_boxed_slice(),
            r: 0,
            w: 0,
        }
    }

    /// Switch to reading from `inner`, discarding any buffered bytes.
    /// The buffer allocation is kept. Returns the previous source.
    pub fn reset(&mut self, inner: R) -> R {
        self.r = 0;
        self.w = 0;
        std::mem::replace(&mut self.inner, inner)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Size of the internal buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can be read from the current buffer without a refill.
    pub fn buffered(&self) -> usize {
        self.w - self.r
    }

    /// Copy buffered bytes into `dst` without consuming them.
    ///
    /// Refills only if the buffer is empty; may return fewer than
    /// `dst.len()` bytes if the current buffer is shorter.
    pub async fn peek(&mut self, dst: &mut [u8]) -> Result<usize, ReadError> {
        self.fill_if_drained().await?;

        let n = copy_prefix(dst, &self.buf[self.r..self.w]);
        Ok(n)
    }

    /// Skip the next `n` buffered bytes.
    ///
    /// Never refills. If fewer than `n` bytes are buffered, all of them are
    /// skipped and [`ReadError::EndOfInput`] reports how many.
    pub fn discard(&mut self, n: usize) -> Result<usize, ReadError> {
        let available = self.buffered();
        if n > available {
            self.r = self.w;
            return Err(ReadError::EndOfInput {
                consumed: available,
            });
        }

        self.r += n;
        Ok(n)
    }

    /// Read buffered bytes into `dst`, refilling first if the buffer is empty.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, ReadError> {
        if dst.is_empty() {
            return Ok(0);
        }
        self.fill_if_drained().await?;

        let n = copy_prefix(dst, &self.buf[self.r..self.w]);
        self.r += n;
        Ok(n)
    }

    /// Read exactly `dst.len()` bytes, refilling as often as needed.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), ReadError> {
        let mut filled = 0;
        while filled < dst.len() {
            filled += self.read(&mut dst[filled..]).await?;
        }
        Ok(())
    }

    pub async fn read_byte(&mut self) -> Result<u8, ReadError> {
        self.fill_if_drained().await?;

        let b = self.buf[self.r];
        self.r += 1;
        Ok(b)
    }

    /// Consume up to and including the first `delim` in the current buffer.
    ///
    /// The returned slice borrows the internal buffer and is only valid
    /// until the next read. If `delim` is not in the current buffer the
    /// rest of the buffer is consumed and [`ReadError::EndOfInput`] is
    /// returned; the scan does not continue into the next refill.
    pub async fn read_until(&mut self, delim: u8) -> Result<&[u8], ReadError> {
        self.fill_if_drained().await?;

        let start = self.r;
        match self.buf[start..self.w].iter().position(|&b| b == delim) {
            Some(i) => {
                self.r = start + i + 1;
                Ok(&self.buf[start..self.r])
            }
            None => {
                let consumed = self.w - start;
                self.r = self.w;
                Err(ReadError::EndOfInput { consumed })
            }
        }
    }

    async fn fill_if_drained(&mut self) -> Result<(), ReadError> {
        if self.r == self.w {
            self.fill().await?;
        }
        Ok(())
    }

    /// Replace the buffer contents with exactly one source read.
    async fn fill(&mut self) -> Result<(), ReadError> {
        self.r = 0;
        self.w = 0;

        for _ in 0..MAX_CONSECUTIVE_EMPTY_READS {
            let n = self.inner.read(&mut self.buf).await?;
            if n > 0 {
                self.w = n;
                return Ok(());
            }
        }
        Err(ReadError::NoProgress)
    }
}

fn copy_prefix(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
