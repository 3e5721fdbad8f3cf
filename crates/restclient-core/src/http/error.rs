use std::io;

use super::codes::reason_phrase;

/// Errors produced by an `HttpConnection`.
///
/// Protocol, transport, timeout and TLS failures close the connection before
/// they are returned. Status failures leave it usable; the unread body is
/// drained before the next request.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Malformed status line, header block or chunk framing, or the peer
    /// closed the stream in the middle of a message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with a status code of 400 or above.
    #[error("HTTP {code} {reason}")]
    Status { code: u16, reason: &'static str },

    /// Connect, read or write failure on the socket.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A connect, handshake, read or write did not finish in time.
    #[error("timed out during {0}")]
    Timeout(&'static str),

    /// TLS handshake or server-name failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// The host could not be resolved to any address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Writing a response body to local storage failed.
    #[error("storage error: {0}")]
    Storage(#[source] io::Error),
}

impl HttpError {
    /// Status failure with the reason phrase from the static table.
    pub fn status(code: u16) -> Self {
        HttpError::Status {
            code,
            reason: reason_phrase(code),
        }
    }

    /// Numeric HTTP status for status failures.
    pub fn code(&self) -> Option<u16> {
        match self {
            HttpError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Retry classification of this error.
    pub fn kind(&self) -> crate::retry::ErrorKind {
        crate::retry::classify_http_error(self)
    }

    /// True when the failure leaves the socket in an unknown state.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            HttpError::Protocol(_)
                | HttpError::Transport(_)
                | HttpError::Timeout(_)
                | HttpError::Tls(_)
        )
    }

    /// A reused keep-alive socket the server already closed: the request never
    /// reached a live peer, so it is safe to resend on a fresh connection.
    pub(crate) fn is_stale_connection(&self) -> bool {
        match self {
            HttpError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
