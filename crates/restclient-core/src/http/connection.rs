//! One persistent HTTP/1.1 connection to one host.
//!
//! The socket is opened lazily on the first request and reused until the
//! server asks for close, a connection-fatal error occurs, or the caller
//! closes it. Exactly one request/response cycle is in flight at a time: the
//! returned [`Response`] mutably borrows the connection, and any body the
//! caller left unread is drained before the next request is written.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::body::{encode_chunk, BodyDecoder, Decoded, Framing, LAST_CHUNK};
use super::error::HttpError;
use super::parse::{body_framing, parse_head, ResponseHead};
use super::request::{self, Body, Request};
use super::response::Response;
use super::transport::Transport;
use crate::host::HostInfo;
use crate::services::Services;

const READ_CHUNK: usize = 16 * 1024;
const STREAM_CHUNK: usize = 16 * 1024;

pub struct HttpConnection {
    host: HostInfo,
    services: Arc<Services>,
    /// Resolved once per connection object and reused for reconnects.
    addrs: Option<Vec<SocketAddr>>,
    transport: Option<Transport>,
    read_buf: BytesMut,
    /// Decoder of the last response's body while it is not fully read.
    body: Option<BodyDecoder>,
    close_after_body: bool,
    requests_on_transport: u32,
    bytes_received: u64,
    connects: u32,
}

impl HttpConnection {
    pub fn new(host: HostInfo, services: Arc<Services>) -> Self {
        Self {
            host,
            services,
            addrs: None,
            transport: None,
            read_buf: BytesMut::new(),
            body: None,
            close_after_body: false,
            requests_on_transport: 0,
            bytes_received: 0,
            connects: 0,
        }
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Raw bytes read from the socket over the connection's lifetime,
    /// framing and headers included. Never decreases.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Number of sockets this connection has opened.
    pub fn connects(&self) -> u32 {
        self.connects
    }

    /// Drop the socket and any unread response state. Safe to call any
    /// number of times.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(host = %self.host, "connection closed");
        }
        self.body = None;
        self.close_after_body = false;
        self.requests_on_transport = 0;
        self.read_buf.clear();
    }

    /// Send a graceful shutdown to the peer, then close.
    pub async fn shutdown(&mut self) {
        let io_timeout = self.services.io_timeout();
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = with_timeout(io_timeout, "shutdown", transport.shutdown()).await {
                tracing::debug!(host = %self.host, error = %e, "shutdown failed");
            }
        }
        self.close();
    }

    /// Fill in `Host`, `User-Agent`, `Accept`, `Connection` and body framing
    /// headers the caller has not set.
    pub fn add_default_headers(&self, req: &mut Request) {
        request::add_default_headers(req, &self.host.host_header(), self.services.user_agent());
    }

    /// Write `req` and read the response head. Status codes are not checked.
    pub async fn send(&mut self, req: &mut Request) -> Result<Response<'_>, HttpError> {
        self.finish_pending_body().await;
        self.add_default_headers(req);

        let reused = self.transport.is_some() && self.requests_on_transport > 0;
        let head = match self.exchange(req).await {
            Ok(head) => head,
            Err(e) if reused && e.is_stale_connection() && req.body.is_replayable() => {
                tracing::debug!(host = %self.host, error = %e, "stale keep-alive connection, resending");
                self.close();
                self.exchange(req).await?
            }
            Err(e) => return Err(e),
        };
        Ok(Response::new(head, self))
    }

    /// `send`, then turn a status of 400 or above into `HttpError::Status`.
    /// The connection stays usable after a status error.
    pub async fn action(&mut self, req: &mut Request) -> Result<Response<'_>, HttpError> {
        let resp = self.send(req).await?;
        resp.error_for_status()
    }

    pub async fn get(&mut self, path: &str) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("GET", path);
        self.action(&mut req).await
    }

    pub async fn del(&mut self, path: &str) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("DELETE", path);
        self.action(&mut req).await
    }

    pub async fn put(
        &mut self,
        path: &str,
        body: impl Into<Body>,
    ) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("PUT", path).with_body(body);
        self.action(&mut req).await
    }

    pub async fn post(
        &mut self,
        path: &str,
        body: impl Into<Body>,
    ) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("POST", path).with_body(body);
        self.action(&mut req).await
    }

    pub async fn patch(
        &mut self,
        path: &str,
        body: impl Into<Body>,
    ) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("PATCH", path).with_body(body);
        self.action(&mut req).await
    }

    /// PUT a body of unknown size with chunked transfer coding.
    pub async fn put_stream(
        &mut self,
        path: &str,
        reader: impl AsyncRead + Unpin + 'static,
    ) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("PUT", path).with_body(Body::stream(reader));
        self.action(&mut req).await
    }

    /// POST a body of unknown size with chunked transfer coding.
    pub async fn post_stream(
        &mut self,
        path: &str,
        reader: impl AsyncRead + Unpin + 'static,
    ) -> Result<Response<'_>, HttpError> {
        let mut req = Request::new("POST", path).with_body(Body::stream(reader));
        self.action(&mut req).await
    }

    /// GET `path` and write the body to `file`. Returns the bytes written.
    pub async fn get_to_file(&mut self, path: &str, file: &Path) -> Result<u64, HttpError> {
        let mut resp = self.get(path).await?;
        crate::storage::save_body(&mut resp, file).await
    }

    /// Connect if the socket is not open. DNS is resolved only once.
    pub async fn ensure_connected(&mut self) -> Result<(), HttpError> {
        if self.transport.is_some() {
            return Ok(());
        }
        let addrs = match &self.addrs {
            Some(addrs) => addrs.clone(),
            None => {
                let addrs = self.services.resolve(&self.host).await?;
                self.addrs = Some(addrs.clone());
                addrs
            }
        };
        let transport = Transport::connect(&self.host, &addrs, &self.services).await?;
        tracing::debug!(host = %self.host, tls = transport.is_tls(), "connected");
        self.transport = Some(transport);
        self.read_buf.clear();
        self.requests_on_transport = 0;
        self.connects += 1;
        Ok(())
    }

    /// One write-then-read-head cycle. Connection-fatal errors close the
    /// socket before returning.
    async fn exchange(&mut self, req: &mut Request) -> Result<ResponseHead, HttpError> {
        let result = self.exchange_inner(req).await;
        if let Err(e) = &result {
            if e.is_fatal_to_connection() {
                self.close();
            }
        }
        result
    }

    async fn exchange_inner(&mut self, req: &mut Request) -> Result<ResponseHead, HttpError> {
        self.ensure_connected().await?;
        self.write_request(req).await?;
        self.requests_on_transport += 1;

        let head = self.read_head().await?;
        let (framing, close) = body_framing(&head, req.is_head())?;
        tracing::debug!(
            host = %self.host,
            code = head.code,
            ?framing,
            close,
            "response"
        );
        self.close_after_body = close || head.code == 101;
        let decoder = BodyDecoder::new(framing);
        if decoder.is_done() {
            self.complete_body();
        } else {
            self.body = Some(decoder);
        }
        Ok(head)
    }

    async fn write_request(&mut self, req: &mut Request) -> Result<(), HttpError> {
        let io_timeout = self.services.io_timeout();
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        tracing::debug!(host = %self.host, verb = %req.verb, path = %req.path, "request");

        let chunked = req.is_chunked();
        let mut head = req.head_bytes();
        match &mut req.body {
            Body::Empty => {
                if chunked {
                    head.extend_from_slice(LAST_CHUNK);
                }
                with_timeout(io_timeout, "write", transport.write_all(&head)).await?;
            }
            Body::Bytes(data) => {
                if chunked {
                    head.extend(encode_chunk(data));
                    head.extend_from_slice(LAST_CHUNK);
                    with_timeout(io_timeout, "write", transport.write_all(&head)).await?;
                } else if data.len() <= STREAM_CHUNK {
                    head.extend_from_slice(data);
                    with_timeout(io_timeout, "write", transport.write_all(&head)).await?;
                } else {
                    with_timeout(io_timeout, "write", transport.write_all(&head)).await?;
                    with_timeout(io_timeout, "write", transport.write_all(data)).await?;
                }
            }
            Body::Stream(reader) => {
                with_timeout(io_timeout, "write", transport.write_all(&head)).await?;
                let mut piece = vec![0u8; STREAM_CHUNK];
                loop {
                    let n = reader.read(&mut piece).await?;
                    if n == 0 {
                        break;
                    }
                    if chunked {
                        let framed = encode_chunk(&piece[..n]);
                        with_timeout(io_timeout, "write", transport.write_all(&framed)).await?;
                    } else {
                        with_timeout(io_timeout, "write", transport.write_all(&piece[..n]))
                            .await?;
                    }
                }
                if chunked {
                    with_timeout(io_timeout, "write", transport.write_all(LAST_CHUNK)).await?;
                }
            }
        }
        with_timeout(io_timeout, "write", transport.flush()).await
    }

    /// Read until a full response head is buffered. Interim 1xx responses
    /// other than 101 are skipped.
    async fn read_head(&mut self) -> Result<ResponseHead, HttpError> {
        loop {
            if let Some((head, len)) = parse_head(&self.read_buf)? {
                self.read_buf.advance(len);
                if (100..200).contains(&head.code) && head.code != 101 {
                    tracing::debug!(host = %self.host, code = head.code, "interim response");
                    continue;
                }
                return Ok(head);
            }
            if self.fill_buf().await? == 0 {
                if self.read_buf.is_empty() {
                    return Err(HttpError::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before response",
                    )));
                }
                return Err(HttpError::Protocol(
                    "connection closed in the middle of the response head".into(),
                ));
            }
        }
    }

    /// Read more bytes from the socket into the buffer. Zero means EOF.
    async fn fill_buf(&mut self) -> Result<usize, HttpError> {
        let io_timeout = self.services.io_timeout();
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        let is_tls = transport.is_tls();
        self.read_buf.reserve(READ_CHUNK);
        let n = match tokio::time::timeout(io_timeout, transport.read_buf(&mut self.read_buf)).await
        {
            Ok(Ok(n)) => n,
            // Peers that skip close_notify surface as an unexpected EOF.
            Ok(Err(e)) if is_tls && e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Ok(Err(e)) => return Err(HttpError::Transport(e)),
            Err(_) => return Err(HttpError::Timeout("read")),
        };
        self.bytes_received += n as u64;
        Ok(n)
    }

    /// Next decoded piece of the current body, or `None` once it has ended.
    pub(crate) async fn next_body_chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        loop {
            let Some(decoder) = self.body.as_mut() else {
                return Ok(None);
            };
            match decoder.decode(&mut self.read_buf) {
                Ok(Decoded::Data(data)) => return Ok(Some(data)),
                Ok(Decoded::Done) => {
                    self.complete_body();
                    return Ok(None);
                }
                Ok(Decoded::NeedMore) => {}
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }

            let n = match self.fill_buf().await {
                Ok(n) => n,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            };
            if n == 0 {
                let result = match self.body.as_mut() {
                    Some(decoder) => decoder.finish_eof(),
                    None => Ok(()),
                };
                self.close();
                result?;
                return Ok(None);
            }
        }
    }

    fn complete_body(&mut self) {
        self.body = None;
        if self.close_after_body {
            self.close();
        }
    }

    /// Make the socket ready for the next request: drain a leftover body, or
    /// close when the leftover can only end at EOF.
    async fn finish_pending_body(&mut self) {
        let Some(decoder) = &self.body else {
            return;
        };
        if decoder.framing() == Framing::UntilClose {
            self.close();
            return;
        }
        let mut drained = 0u64;
        loop {
            match self.next_body_chunk().await {
                Ok(Some(data)) => drained += data.len() as u64,
                Ok(None) => break,
                Err(e) => {
                    // Already closed; the next exchange reconnects.
                    tracing::debug!(host = %self.host, error = %e, "failed to drain previous body");
                    break;
                }
            }
        }
        if drained > 0 {
            tracing::debug!(host = %self.host, drained, "drained unread body");
        }
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("host", &self.host)
            .field("open", &self.is_open())
            .field("bytes_received", &self.bytes_received)
            .finish_non_exhaustive()
    }
}

fn not_connected() -> HttpError {
    HttpError::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection is closed",
    ))
}

async fn with_timeout<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, HttpError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(HttpError::Transport),
        Err(_) => Err(HttpError::Timeout(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestClientConfig;

    fn conn() -> HttpConnection {
        let services = Arc::new(Services::new(&RestClientConfig::default()).unwrap());
        HttpConnection::new(HostInfo::parse("http://127.0.0.1:9").unwrap(), services)
    }

    #[test]
    fn close_is_idempotent() {
        let mut c = conn();
        assert!(!c.is_open());
        c.close();
        c.close();
        assert!(!c.is_open());
        assert_eq!(c.bytes_received(), 0);
    }

    #[test]
    fn default_headers_use_host_and_agent() {
        let c = conn();
        let mut req = Request::new("GET", "/get");
        c.add_default_headers(&mut req);
        assert_eq!(req.headers.get("Host"), Some("127.0.0.1:9"));
        assert!(req.headers.get("User-Agent").unwrap().starts_with("restclient/"));
    }
}
