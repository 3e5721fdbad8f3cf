//! Status line and header block parsing, and body framing selection.

use super::body::Framing;
use super::error::HttpError;
use super::headers::{has_token, is_chunked, Headers};

const MAX_HEADERS: usize = 100;
/// Upper bound on a response head (status line plus headers).
pub(crate) const MAX_HEAD_LEN: usize = 64 * 1024;

/// Parsed status line and headers of one response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub version: u8,
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn status_line(&self) -> String {
        format!("HTTP/1.{} {} {}", self.version, self.code, self.reason)
    }
}

/// Try to parse a response head from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied, or `None` when more
/// input is needed. Heads with more than `MAX_HEADERS` fields are parsed again
/// with room for one field per buffered line.
pub(crate) fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, HttpError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let parsed = match parse_into(buf, &mut storage)? {
        Parsed::TooManyHeaders => {
            let window = &buf[..buf.len().min(MAX_HEAD_LEN)];
            let lines = window.iter().filter(|&&b| b == b'\n').count();
            let mut storage = vec![httparse::EMPTY_HEADER; lines + 1];
            parse_into(buf, &mut storage)?
        }
        parsed => parsed,
    };
    match parsed {
        Parsed::Head(head, len) => Ok(Some((head, len))),
        Parsed::Partial if buf.len() > MAX_HEAD_LEN => {
            Err(HttpError::Protocol("response head too large".into()))
        }
        Parsed::Partial => Ok(None),
        Parsed::TooManyHeaders => Err(HttpError::Protocol("too many response headers".into())),
    }
}

enum Parsed {
    Head(ResponseHead, usize),
    Partial,
    TooManyHeaders,
}

fn parse_into<'b>(
    buf: &'b [u8],
    storage: &mut [httparse::Header<'b>],
) -> Result<Parsed, HttpError> {
    let mut resp = httparse::Response::new(storage);
    let len = match resp.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(Parsed::Partial),
        Err(httparse::Error::TooManyHeaders) => return Ok(Parsed::TooManyHeaders),
        Err(e) => return Err(HttpError::Protocol(format!("bad response head: {e}"))),
    };

    let mut headers = Headers::new();
    for h in resp.headers.iter() {
        let value = std::str::from_utf8(h.value)
            .map_err(|_| HttpError::Protocol(format!("non-UTF-8 value in header {}", h.name)))?;
        headers.append(h.name, value.trim());
    }

    let head = ResponseHead {
        version: resp.version.unwrap_or(1),
        code: resp.code.unwrap_or(0),
        reason: resp.reason.unwrap_or("").to_string(),
        headers,
    };
    Ok(Parsed::Head(head, len))
}

/// Choose the body framing for a response and whether the connection must be
/// closed once the body is consumed.
pub(crate) fn body_framing(
    head: &ResponseHead,
    is_head_request: bool,
) -> Result<(Framing, bool), HttpError> {
    let mut close = head.version == 0 || head.headers.has_token("Connection", "close");
    if head.version == 0 && head.headers.has_token("Connection", "keep-alive") {
        close = false;
    }

    let no_body = is_head_request
        || (100..200).contains(&head.code)
        || head.code == 204
        || head.code == 304;
    if no_body {
        return Ok((Framing::Empty, close));
    }

    if let Some(te) = head.headers.get("Transfer-Encoding") {
        if is_chunked(te) {
            // A Content-Length alongside chunked is ignored, and the socket is
            // not reused.
            let conflicting = head.headers.contains("Content-Length");
            return Ok((Framing::Chunked, close || conflicting));
        }
        // Any other final coding is delimited by connection close.
        if !has_token(te, "identity") {
            return Ok((Framing::UntilClose, true));
        }
    }

    let mut length: Option<u64> = None;
    for value in head.headers.get_all("Content-Length") {
        for part in value.split(',') {
            let n: u64 = part
                .trim()
                .parse()
                .map_err(|_| HttpError::Protocol(format!("bad Content-Length {value:?}")))?;
            match length {
                Some(prev) if prev != n => {
                    return Err(HttpError::Protocol(format!(
                        "conflicting Content-Length {prev} and {n}"
                    )))
                }
                _ => length = Some(n),
            }
        }
    }

    match length {
        Some(0) => Ok((Framing::Empty, close)),
        Some(n) => Ok((Framing::Length(n), close)),
        None => Ok((Framing::UntilClose, true)),
    }
}
