//! Generated byte sources for upload bodies and test fixtures.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ 0123456789 ";

/// Infinite sequence `A..=Z`, space, `0..=9`, space, repeated. There is no
/// reset: start over by creating a new source.
#[derive(Debug, Clone, Default)]
pub struct AlphabetSource {
    pos: usize,
}

impl AlphabetSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Async reader over the first `limit` bytes of the sequence.
    pub fn reader(self, limit: u64) -> AlphabetReader {
        AlphabetReader {
            source: self,
            remaining: limit,
        }
    }

    fn fill(&mut self, out: &mut [u8]) {
        for b in out.iter_mut() {
            *b = ALPHABET[self.pos];
            self.pos = (self.pos + 1) % ALPHABET.len();
        }
    }
}

impl Iterator for AlphabetSource {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let b = ALPHABET[self.pos];
        self.pos = (self.pos + 1) % ALPHABET.len();
        Some(b)
    }
}

/// Bounded `AsyncRead` view of an [`AlphabetSource`].
#[derive(Debug)]
pub struct AlphabetReader {
    source: AlphabetSource,
    remaining: u64,
}

impl AsyncRead for AlphabetReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = (buf.remaining() as u64).min(this.remaining) as usize;
        if n > 0 {
            let dst = buf.initialize_unfilled_to(n);
            this.source.fill(&mut dst[..n]);
            buf.advance(n);
            this.remaining -= n as u64;
        }
        Poll::Ready(Ok(()))
    }
}

/// `len` bytes of the lowercase alphabet repeated (`abc...zabc...`).
pub fn alphabet_block(len: usize) -> Vec<u8> {
    b"abcdefghijklmnopqrstuvwxyz"
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}
