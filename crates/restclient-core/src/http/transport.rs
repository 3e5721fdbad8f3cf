//! Plain and TLS sockets behind one byte-stream type.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;

use super::error::HttpError;
use crate::host::HostInfo;
use crate::services::Services;

/// The connection's socket. Everything above this type is transport-agnostic.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Connect to the first reachable address, then run the TLS handshake when
    /// the host asks for it.
    pub async fn connect(
        host: &HostInfo,
        addrs: &[SocketAddr],
        services: &Services,
    ) -> Result<Self, HttpError> {
        let mut last_err: Option<HttpError> = None;
        let mut tcp = None;
        for addr in addrs {
            match tokio::time::timeout(services.connect_timeout(), TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    tcp = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(host = %host, %addr, error = %e, "connect failed");
                    last_err = Some(HttpError::Transport(e));
                }
                Err(_) => {
                    tracing::debug!(host = %host, %addr, "connect timed out");
                    last_err = Some(HttpError::Timeout("connect"));
                }
            }
        }
        let tcp = match tcp {
            Some(tcp) => tcp,
            None => {
                return Err(last_err
                    .unwrap_or_else(|| HttpError::Resolve(host.hostname().to_string())))
            }
        };
        let _ = tcp.set_nodelay(true);

        if !host.is_tls() {
            return Ok(Transport::Plain(tcp));
        }

        let server_name = ServerName::try_from(host.hostname().to_string())
            .map_err(|e| HttpError::Tls(format!("invalid server name {}: {e}", host.hostname())))?;
        let handshake = services.tls_connector().connect(server_name, tcp);
        match tokio::time::timeout(services.io_timeout(), handshake).await {
            Ok(Ok(stream)) => Ok(Transport::Tls(Box::new(stream))),
            Ok(Err(e)) => Err(HttpError::Tls(e.to_string())),
            Err(_) => Err(HttpError::Timeout("TLS handshake")),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
