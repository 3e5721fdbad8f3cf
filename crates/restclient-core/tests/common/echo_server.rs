//! Minimal HTTP/1.1 keep-alive echo server for integration tests.
//!
//! Routes (a small subset of the public echo service the client is smoke
//! tested against):
//! - `GET /get` echoes the `Host` header and URL as JSON.
//! - `GET /range/N?chunk_size=C` streams N bytes of the lowercase alphabet in
//!   chunks of C bytes with `Transfer-Encoding: chunked`.
//! - `DELETE /delete`, `PUT /put`, `POST /post`, `PATCH /patch` echo the URL
//!   and request body.
//! - `GET /status/N` answers with status N and an empty body.
//! - `GET /drop` answers, then closes the socket without `Connection: close`.
//! - `GET /until-close` answers with no framing headers and closes.
//! - `GET /bad-chunk` sends a chunked body whose size line is not hex, then
//!   closes. With `?once=ID` only the first request for that ID is broken;
//!   later ones get a valid chunked body.
//! - `GET /bad-status` answers with an unparsable status line and closes.
//!
//! Every accepted connection is counted so tests can check reuse.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};

pub struct EchoServer {
    /// e.g. `http://127.0.0.1:12345`
    pub base: String,
    pub connections: Arc<AtomicUsize>,
}

impl EchoServer {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Starts a plain HTTP server on a background thread.
pub fn start() -> EchoServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::spawn(move || {
                let mut stream = stream;
                set_timeouts(&stream);
                serve(&mut stream);
            });
        }
    });
    EchoServer {
        base: format!("http://127.0.0.1:{port}"),
        connections,
    }
}

/// Starts an HTTPS server with a self-signed certificate for `localhost`.
/// Returns the server and a client config that trusts the certificate.
pub fn start_tls() -> (EchoServer, Arc<rustls::ClientConfig>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let cert_der = CertificateDer::from(cert.cert);

    let server_config = Arc::new(
        rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key.into())
        .unwrap(),
    );

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert_der).unwrap();
    let client_config = Arc::new(
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            let server_config = Arc::clone(&server_config);
            thread::spawn(move || {
                set_timeouts(&stream);
                let Ok(conn) = rustls::ServerConnection::new(server_config) else {
                    return;
                };
                let mut tls = rustls::StreamOwned::new(conn, stream);
                serve(&mut tls);
                tls.conn.send_close_notify();
                let _ = tls.flush();
            });
        }
    });
    (
        EchoServer {
            base: format!("https://localhost:{port}"),
            connections,
        },
        client_config,
    )
}

/// IDs of `/bad-chunk?once=ID` requests already answered with a broken body.
fn broken_once() -> &'static Mutex<HashSet<String>> {
    static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    SEEN.get_or_init(|| Mutex::new(HashSet::new()))
}

fn set_timeouts(stream: &TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
}

struct Request {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serve requests on one connection until the client closes it or a route
/// asks for close.
fn serve<S: Read + Write>(stream: &mut S) {
    let mut buf = Vec::new();
    loop {
        let Some(req) = read_request(stream, &mut buf) else {
            return;
        };
        let keep_open = respond(stream, &req);
        let _ = stream.flush();
        let client_close = req
            .header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);
        if !keep_open || client_close {
            return;
        }
    }
}

fn fill<S: Read>(stream: &mut S, buf: &mut Vec<u8>) -> bool {
    let mut tmp = [0u8; 8192];
    match stream.read(&mut tmp) {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&tmp[..n]);
            true
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn read_request<S: Read>(stream: &mut S, buf: &mut Vec<u8>) -> Option<Request> {
    let head_end = loop {
        if let Some(pos) = find(buf, b"\r\n\r\n") {
            break pos;
        }
        if !fill(stream, buf) {
            return None;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    buf.drain(..head_end + 4);

    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let mut req = Request {
        method,
        target,
        headers,
        body: Vec::new(),
    };

    let chunked = req
        .header("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    if chunked {
        req.body = read_chunked(stream, buf)?;
    } else if let Some(len) = req.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while buf.len() < len {
            if !fill(stream, buf) {
                return None;
            }
        }
        req.body = buf.drain(..len).collect();
    }
    Some(req)
}

fn read_chunked<S: Read>(stream: &mut S, buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = loop {
            if let Some(pos) = find(buf, b"\r\n") {
                break pos;
            }
            if !fill(stream, buf) {
                return None;
            }
        };
        let line = String::from_utf8_lossy(&buf[..line_end]).to_string();
        buf.drain(..line_end + 2);
        let size = usize::from_str_radix(line.split(';').next()?.trim(), 16).ok()?;
        while buf.len() < size + 2 {
            if !fill(stream, buf) {
                return None;
            }
        }
        if size == 0 {
            // No trailers are sent by the client: just the final CRLF.
            buf.drain(..2);
            return Some(body);
        }
        body.extend(buf.drain(..size));
        buf.drain(..2);
    }
}

fn json_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn send<S: Write>(stream: &mut S, status: &str, extra: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{extra}\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

/// Returns false when the connection should be closed after the response.
fn respond<S: Write>(stream: &mut S, req: &Request) -> bool {
    let host = req.header("host").unwrap_or("").to_string();
    let (path, query) = match req.target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (req.target.as_str(), ""),
    };
    let url = format!("http://{host}{}", req.target);

    match (req.method.as_str(), path) {
        ("GET", "/get") => {
            let body = format!(
                "{{\"headers\": {{\"Host\": \"{}\", \"User-Agent\": \"{}\"}}, \"url\": \"{}\"}}",
                json_escape(&host),
                json_escape(req.header("user-agent").unwrap_or("")),
                json_escape(&url)
            );
            send(stream, "200 OK", "Content-Type: application/json\r\n", body.as_bytes());
            true
        }
        ("GET", p) if p.starts_with("/range/") => {
            let n: usize = p["/range/".len()..].parse().unwrap_or(0);
            let chunk_size: usize = query
                .split('&')
                .find_map(|kv| kv.strip_prefix("chunk_size="))
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024)
                .max(1);
            let data: Vec<u8> = b"abcdefghijklmnopqrstuvwxyz"
                .iter()
                .copied()
                .cycle()
                .take(n)
                .collect();
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nTransfer-Encoding: chunked\r\n\r\n",
            );
            for piece in data.chunks(chunk_size) {
                let _ = stream.write_all(format!("{:x};ext=1\r\n", piece.len()).as_bytes());
                let _ = stream.write_all(piece);
                let _ = stream.write_all(b"\r\n");
            }
            let _ = stream.write_all(b"0\r\nX-Checksum: none\r\n\r\n");
            true
        }
        (method @ ("DELETE" | "PUT" | "POST" | "PATCH"), p)
            if p.trim_start_matches('/').eq_ignore_ascii_case(method) =>
        {
            let body = format!(
                "{{\"data\": \"{}\", \"url\": \"{}\", \"chunked\": {}}}",
                json_escape(&String::from_utf8_lossy(&req.body)),
                json_escape(&url),
                req.header("transfer-encoding").is_some()
            );
            send(stream, "200 OK", "Content-Type: application/json\r\n", body.as_bytes());
            true
        }
        ("GET", p) if p.starts_with("/status/") => {
            let code: u16 = p["/status/".len()..].parse().unwrap_or(500);
            send(stream, &format!("{code} Status"), "", b"");
            true
        }
        ("GET", "/drop") => {
            send(stream, "200 OK", "", b"dropping");
            false
        }
        ("GET", "/until-close") => {
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nread me until EOF");
            false
        }
        ("GET", "/bad-chunk") => {
            let once = query.split('&').find_map(|kv| kv.strip_prefix("once="));
            let already_broken = match once {
                Some(id) => !broken_once().lock().unwrap().insert(id.to_string()),
                None => false,
            };
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
            if already_broken {
                let _ = stream.write_all(b"9\r\nrecovered\r\n0\r\n\r\n");
                return true;
            }
            let _ = stream.write_all(b"4\r\nabcd\r\nzz\r\nbroken\r\n");
            false
        }
        ("GET", "/bad-status") => {
            let _ = stream.write_all(b"HTTP/1.1 abc Nope\r\nContent-Length: 0\r\n\r\n");
            false
        }
        _ => {
            send(stream, "405 Method Not Allowed", "", b"");
            true
        }
    }
}
