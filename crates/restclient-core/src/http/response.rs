use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::connection::HttpConnection;
use super::error::HttpError;
use super::headers::Headers;
use super::parse::ResponseHead;

/// A response whose head has been read. The body is a forward-only stream
/// pulled from the connection on demand; it must be consumed (or the
/// response dropped) before the connection can send again.
pub struct Response<'c> {
    head: ResponseHead,
    conn: &'c mut HttpConnection,
}

impl<'c> Response<'c> {
    pub(crate) fn new(head: ResponseHead, conn: &'c mut HttpConnection) -> Self {
        Self { head, conn }
    }

    pub fn code(&self) -> u16 {
        self.head.code
    }

    /// Reason phrase as sent by the server.
    pub fn reason(&self) -> &str {
        &self.head.reason
    }

    pub fn status_line(&self) -> String {
        self.head.status_line()
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    /// Minor HTTP version: 0 or 1.
    pub fn version(&self) -> u8 {
        self.head.version
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.head.code)
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// `HttpError::Status` for codes of 400 and above. The unread body stays
    /// with the connection and is drained before the next request.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.head.code >= 400 {
            tracing::debug!(
                host = %self.conn.host(),
                code = self.head.code,
                "status error"
            );
            return Err(HttpError::status(self.head.code));
        }
        Ok(self)
    }

    /// Next piece of the decoded body; `None` at the end. Calling again after
    /// the end keeps returning `None`.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        self.conn.next_body_chunk().await
    }

    /// Read the rest of the body into memory.
    pub async fn bytes(mut self) -> Result<Bytes, HttpError> {
        let mut out = BytesMut::new();
        while let Some(data) = self.chunk().await? {
            out.extend_from_slice(&data);
        }
        Ok(out.freeze())
    }

    /// Read the rest of the body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String, HttpError> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Stream the rest of the body into `writer`. Write failures are reported
    /// as `HttpError::Storage`.
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64, HttpError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        while let Some(data) = self.chunk().await? {
            writer.write_all(&data).await.map_err(HttpError::Storage)?;
            total += data.len() as u64;
        }
        writer.flush().await.map_err(HttpError::Storage)?;
        Ok(total)
    }

    /// Read and discard the rest of the body; returns its length.
    pub async fn drain(mut self) -> Result<u64, HttpError> {
        let mut total = 0u64;
        while let Some(data) = self.chunk().await? {
            total += data.len() as u64;
        }
        Ok(total)
    }

    /// Raw byte counter of the underlying connection.
    pub fn bytes_received(&self) -> u64 {
        self.conn.bytes_received()
    }
}

impl std::fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.head.status_line())
            .field("headers", &self.head.headers)
            .finish()
    }
}
