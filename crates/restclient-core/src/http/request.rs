//! Request model and serialization of the request head.

use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::headers::{is_chunked, Headers};

/// Outgoing request body.
pub enum Body {
    Empty,
    /// In-memory body; sent with `Content-Length`.
    Bytes(Bytes),
    /// Body of unknown size; sent with `Transfer-Encoding: chunked` unless the
    /// caller supplied a `Content-Length`. Consumed by sending.
    Stream(Box<dyn AsyncRead + Unpin>),
}

impl Body {
    pub fn stream(reader: impl AsyncRead + Unpin + 'static) -> Self {
        Body::Stream(Box::new(reader))
    }

    /// Size known before sending, if any.
    pub fn known_len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Stream(_) => None,
        }
    }

    /// True when the body can be sent a second time.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Body::Stream(_))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Bytes(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

/// An HTTP request: verb, path, headers and body.
#[derive(Debug)]
pub struct Request {
    pub verb: String,
    pub path: String,
    pub headers: Headers,
    pub body: Body,
}

impl Request {
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            path: path.into(),
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_head(&self) -> bool {
        self.verb.eq_ignore_ascii_case("HEAD")
    }

    /// True when the body goes out chunk-encoded.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("Transfer-Encoding")
            .map(is_chunked)
            .unwrap_or(false)
    }

    /// Methods that carry a body even when it is empty.
    fn expects_body(&self) -> bool {
        ["POST", "PUT", "PATCH"]
            .iter()
            .any(|m| self.verb.eq_ignore_ascii_case(m))
    }

    /// Request line, headers and the blank line that ends the head.
    pub(crate) fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.verb.as_bytes());
        out.push(b' ');
        if self.path.is_empty() {
            out.push(b'/');
        } else {
            out.extend_from_slice(self.path.as_bytes());
        }
        out.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Add the default headers without touching any the caller already set:
/// `Host`, `User-Agent`, `Accept`, `Connection: keep-alive` and body framing
/// (`Content-Length` for known sizes, `Transfer-Encoding: chunked` otherwise).
pub fn add_default_headers(request: &mut Request, host_header: &str, user_agent: &str) {
    let expects_body = request.expects_body();
    let known_len = request.body.known_len();
    let headers = &mut request.headers;
    headers.set_default("Host", host_header);
    headers.set_default("User-Agent", user_agent);
    headers.set_default("Accept", "*/*");
    headers.set_default("Connection", "keep-alive");

    if headers.contains("Content-Length") || headers.contains("Transfer-Encoding") {
        return;
    }
    match known_len {
        Some(0) if !expects_body => {}
        Some(len) => {
            headers.set_default("Content-Length", len.to_string());
        }
        None => {
            headers.set_default("Transfer-Encoding", "chunked");
        }
    }
}
