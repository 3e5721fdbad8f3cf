//! Body framing codec.
//!
//! `BodyDecoder` is a pure state machine over the connection's read buffer: it
//! never touches the socket, so the connection decides when to read more. It
//! only ever consumes bytes that belong to the current body; anything after
//! the end of the body stays in the buffer for the next response.

use bytes::{Bytes, BytesMut};

use super::error::HttpError;
use super::parse::MAX_HEAD_LEN;

/// Longest accepted chunk-size line, extensions included.
pub const MAX_CHUNK_HEAD: usize = 1024;

/// Terminating zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// How the end of a response body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all (HEAD, 1xx, 204, 304, `Content-Length: 0`).
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes the connection.
    UntilClose,
}

/// One step of decoding.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Data(Bytes),
    /// The buffer holds no complete unit; read more and call again.
    NeedMore,
    /// End of body. Further calls keep returning `Done`.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Length { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailers,
    UntilClose,
    Done,
}

#[derive(Debug)]
pub struct BodyDecoder {
    framing: Framing,
    state: State,
    raw_consumed: u64,
    decoded: u64,
}

impl BodyDecoder {
    pub fn new(framing: Framing) -> Self {
        let state = match framing {
            Framing::Empty | Framing::Length(0) => State::Done,
            Framing::Length(n) => State::Length { remaining: n },
            Framing::Chunked => State::ChunkSize,
            Framing::UntilClose => State::UntilClose,
        };
        Self {
            framing,
            state,
            raw_consumed: 0,
            decoded: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Framing bytes plus payload bytes taken from the buffer so far.
    pub fn raw_consumed(&self) -> u64 {
        self.raw_consumed
    }

    /// Payload bytes produced so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Take the next piece of body out of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, HttpError> {
        loop {
            match self.state {
                State::Done => return Ok(Decoded::Done),
                State::Length { remaining } => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let data = self.take(buf, remaining);
                    let left = remaining - data.len() as u64;
                    self.state = if left == 0 {
                        State::Done
                    } else {
                        State::Length { remaining: left }
                    };
                    return Ok(Decoded::Data(data));
                }
                State::ChunkData { remaining } => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let data = self.take(buf, remaining);
                    let left = remaining - data.len() as u64;
                    self.state = if left == 0 {
                        State::ChunkDataEnd
                    } else {
                        State::ChunkData { remaining: left }
                    };
                    return Ok(Decoded::Data(data));
                }
                State::ChunkSize => {
                    let Some(line) = self.take_line(buf, MAX_CHUNK_HEAD)? else {
                        return Ok(Decoded::NeedMore);
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        State::Trailers
                    } else {
                        State::ChunkData { remaining: size }
                    };
                }
                State::ChunkDataEnd => {
                    let Some(line) = self.take_line(buf, 2)? else {
                        return Ok(Decoded::NeedMore);
                    };
                    if !line.is_empty() {
                        return Err(HttpError::Protocol(
                            "chunk data not followed by CRLF".into(),
                        ));
                    }
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    let Some(line) = self.take_line(buf, MAX_HEAD_LEN)? else {
                        return Ok(Decoded::NeedMore);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
                State::UntilClose => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let n = buf.len() as u64;
                    let data = self.take(buf, n);
                    return Ok(Decoded::Data(data));
                }
            }
        }
    }

    /// The peer closed the stream. Fine for `UntilClose` bodies, a truncated
    /// message for every other framing.
    pub fn finish_eof(&mut self) -> Result<(), HttpError> {
        match self.state {
            State::Done => Ok(()),
            State::UntilClose => {
                self.state = State::Done;
                Ok(())
            }
            _ => Err(HttpError::Protocol(format!(
                "connection closed mid-body after {} bytes",
                self.decoded
            ))),
        }
    }

    fn take(&mut self, buf: &mut BytesMut, limit: u64) -> Bytes {
        let n = buf.len().min(usize::try_from(limit).unwrap_or(usize::MAX));
        self.raw_consumed += n as u64;
        self.decoded += n as u64;
        buf.split_to(n).freeze()
    }

    /// Split one LF-terminated line off `buf` (trailing CR removed).
    fn take_line(&mut self, buf: &mut BytesMut, max: usize) -> Result<Option<Bytes>, HttpError> {
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) if pos <= max => {
                let mut line = buf.split_to(pos + 1);
                self.raw_consumed += line.len() as u64;
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                Ok(Some(line.freeze()))
            }
            Some(_) => Err(HttpError::Protocol("chunk framing line too long".into())),
            None if buf.len() > max => {
                Err(HttpError::Protocol("chunk framing line too long".into()))
            }
            None => Ok(None),
        }
    }
}

/// Hex size before any `;extension`, surrounding whitespace allowed.
fn parse_chunk_size(line: &[u8]) -> Result<u64, HttpError> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let size = std::str::from_utf8(size)
        .map_err(|_| HttpError::Protocol("non-ASCII chunk size".into()))?
        .trim_matches(|c| c == ' ' || c == '\t');
    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HttpError::Protocol(format!("bad chunk size {size:?}")));
    }
    u64::from_str_radix(size, 16).map_err(|_| HttpError::Protocol(format!("bad chunk size {size:?}")))
}

/// Frame one piece of a request body. Empty input yields nothing, so a
/// zero-length read never terminates the body early.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}
