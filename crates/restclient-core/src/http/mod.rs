//! HTTP/1.1 client connection over plain TCP or TLS.
//!
//! - `headers`, `request`, `response`: the message model.
//! - `parse`, `body`: response head parsing and the body framing codec.
//! - `transport`: plain and TLS sockets behind one byte stream.
//! - `connection`: lazy connect, keep-alive reuse, request writing and
//!   response reading.

mod body;
mod codes;
mod connection;
mod error;
mod headers;
mod parse;
mod request;
mod response;
mod transport;

pub use body::{encode_chunk, BodyDecoder, Decoded, Framing, LAST_CHUNK, MAX_CHUNK_HEAD};
pub use codes::reason_phrase;
pub use connection::HttpConnection;
pub use error::HttpError;
pub use headers::Headers;
pub use parse::ResponseHead;
pub use request::{add_default_headers, Body, Request};
pub use response::Response;
pub use transport::Transport;
