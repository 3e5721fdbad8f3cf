//! Classify HTTP statuses and client errors into retry policy error kinds.

use crate::http::HttpError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        400..=499 => ErrorKind::Status(code),
        _ => ErrorKind::Other,
    }
}

/// Classify a connection error for retry decisions.
pub fn classify_http_error(e: &HttpError) -> ErrorKind {
    match e {
        HttpError::Status { code, .. } => classify_http_status(*code),
        HttpError::Timeout(_) => ErrorKind::Timeout,
        HttpError::Transport(io) if io.kind() == std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
        HttpError::Transport(_) | HttpError::Tls(_) | HttpError::Resolve(_) => {
            ErrorKind::Connection
        }
        HttpError::Protocol(_) => ErrorKind::Protocol,
        HttpError::Storage(_) => ErrorKind::Other,
    }
}

/// Classify a job error: the first `HttpError` in the chain decides, anything
/// else is `Other`.
pub fn classify(e: &anyhow::Error) -> ErrorKind {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<HttpError>())
        .map(classify_http_error)
        .unwrap_or(ErrorKind::Other)
}
