//! Authenticating upload server
//!
//! Every path is guarded by HTTP Basic authentication. Authenticated uploads
//! are read to the end and counted; the response echoes what the server saw
//! so a client can tell whether its body arrived intact.
//!
//! Responses sent before a body has been read (an authentication challenge or
//! the `X-401` short circuit) are followed by a lingering close: the write
//! side is shut down and incoming bytes are discarded for a while, so the
//! client gets to read the response instead of a connection reset.

use super::chunked::ChunkedDecoder;
use super::session::{read_with_timeout, write_all_with_timeout};
use super::{
    AuthResult, BasicAuthenticator, Error, FdSessionOps, Headers, RequestHead, RequestHeadParser,
    Response, Result, SessionOps, Status, UserStore, MAX_HEAD_SIZE, X_401, X_AUTH,
    X_CONTENT_LENGTH,
};
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Size of the reads used to consume request bodies
const BODY_READ_SIZE: usize = 10 * 1024;

const LISTEN_BACKLOG: i32 = 128;

/// Bounds for the pause after a failed `accept`
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub realm: String,
    pub role: String,
    pub users: UserStore,
    /// How long to discard an unread body after an early response
    pub linger_timeout: Duration,
    /// How long a connection may sit idle before it is dropped
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut users = UserStore::new();
        users.add_user("user", "pwd", &["user"]);
        ServerConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            realm: "MyRealm".to_string(),
            role: "user".to_string(),
            users,
            linger_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Running server; stops when closed or dropped
pub struct AuthServer {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    handler: Arc<ConnectionHandler>,
    acceptor: Option<JoinHandle<()>>,
}

impl AuthServer {
    /// Bind and start accepting connections on a background thread
    pub fn start(config: ServerConfig) -> Result<Self> {
        let listener = bind_listener(config.bind)?;
        let local_addr = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));

        let handler = Arc::new(ConnectionHandler {
            authenticator: BasicAuthenticator::new(config.realm, config.role, config.users),
            linger_timeout: config.linger_timeout,
            idle_timeout: config.idle_timeout,
            accepted: AtomicU64::new(0),
        });

        let flag = Arc::clone(&stopping);
        let shared = Arc::clone(&handler);
        let acceptor = thread::Builder::new()
            .name("upload-abort-accept".to_string())
            .spawn(move || accept_loop(listener, shared, flag))?;

        tracing::info!(addr = %local_addr, "server listening");

        Ok(AuthServer {
            local_addr,
            stopping,
            handler,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections accepted so far
    pub fn connections(&self) -> u64 {
        self.handler.accepted.load(Ordering::SeqCst)
    }

    /// Stop accepting connections and wait for the accept loop to exit
    ///
    /// Connections already being served finish on their own threads.
    pub fn close(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };

        self.stopping.store(true, Ordering::SeqCst);
        // Wake the blocked accept call.
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        if let Err(e) = TcpStream::connect_timeout(&wake_addr, Duration::from_secs(1)) {
            tracing::warn!(error = %e, "failed to wake accept loop");
        }

        if acceptor.join().is_err() {
            tracing::warn!("accept loop panicked");
        }
        tracing::info!(addr = %self.local_addr, "server stopped");
    }
}

impl Drop for AuthServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Pause after `failures` consecutive accept errors, doubling up to a cap
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

fn accept_loop(listener: TcpListener, handler: Arc<ConnectionHandler>, stopping: Arc<AtomicBool>) {
    let mut failures = 0u32;
    loop {
        let accepted = listener.accept();
        if stopping.load(Ordering::SeqCst) {
            break;
        }

        let (stream, peer) = match accepted {
            Ok(conn) => {
                failures = 0;
                conn
            }
            Err(e) => {
                // Errors such as EMFILE persist; don't spin on them.
                failures = failures.saturating_add(1);
                let pause = accept_backoff(failures);
                tracing::warn!(error = %e, failures, ?pause, "accept failed");
                thread::sleep(pause);
                continue;
            }
        };
        handler.accepted.fetch_add(1, Ordering::SeqCst);

        let handler = Arc::clone(&handler);
        let spawned = thread::Builder::new()
            .name("upload-abort-conn".to_string())
            .spawn(move || {
                tracing::debug!(%peer, "connection accepted");
                if let Err(e) = handler.serve(stream) {
                    tracing::debug!(%peer, error = %e, "connection ended with error");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(%peer, error = %e, "failed to spawn connection thread");
        }
    }
}

/// What to do with the connection after a response
enum Next {
    KeepAlive(BytesMut),
    Close,
}

/// Body bytes counted for one request
struct BodyCount {
    counted: u64,
    /// The body ended where its framing said it would
    complete: bool,
    /// Bytes past the end of the body
    leftover: BytesMut,
}

struct ConnectionHandler {
    authenticator: BasicAuthenticator,
    linger_timeout: Duration,
    idle_timeout: Duration,
    accepted: AtomicU64,
}

impl ConnectionHandler {
    fn serve(&self, stream: TcpStream) -> Result<()> {
        let mut session = FdSessionOps::new(stream);
        let mut parser = RequestHeadParser::new();
        let mut pending = BytesMut::new();

        loop {
            let Some(head) = self.read_head(&mut session, &mut parser, &pending)? else {
                return Ok(());
            };
            let prefix = parser.take_remaining();

            match self.handle(&mut session, &head, prefix)? {
                Next::KeepAlive(leftover) => pending = leftover,
                Next::Close => {
                    session.shutdown(Shutdown::Both)?;
                    return Ok(());
                }
            }
        }
    }

    /// Read the next request head; `None` if the peer closed between requests
    fn read_head(
        &self,
        session: &mut FdSessionOps,
        parser: &mut RequestHeadParser,
        pending: &[u8],
    ) -> Result<Option<RequestHead>> {
        parser.reset();
        let mut seen = pending.len();
        if let Some(head) = parser.parse(pending)? {
            return Ok(Some(head));
        }

        let mut buf = [0u8; 4096];
        loop {
            let n = read_with_timeout(session, &mut buf, Some(self.idle_timeout))?;
            if n == 0 {
                return if seen == 0 {
                    Ok(None)
                } else {
                    Err(Error::ConnectionClosed)
                };
            }
            seen += n;
            if let Some(head) = parser.parse(&buf[..n])? {
                return Ok(Some(head));
            }
        }
    }

    fn handle(&self, session: &mut FdSessionOps, head: &RequestHead, prefix: BytesMut) -> Result<Next> {
        let headers = head.headers();
        let declared = match headers.content_length() {
            Ok(declared) => declared,
            Err(e) => {
                tracing::debug!(error = %e, "bad Content-Length");
                let response = Response::builder()
                    .status(Status::BAD_REQUEST)
                    .header("Connection", "close")
                    .body(e.to_string())
                    .build();
                self.respond(session, &response)?;
                self.linger(session, 0, None);
                return Ok(Next::Close);
            }
        };

        let user = match self.authenticator.authenticate(headers) {
            AuthResult::Authenticated(user) => user,
            AuthResult::Challenge => {
                tracing::debug!(method = %head.method(), uri = head.uri(), "sending authentication challenge");
                let response = Response::builder()
                    .status(Status::UNAUTHORIZED)
                    .header("WWW-Authenticate", self.authenticator.challenge_header())
                    .header("Connection", "close")
                    .build();
                self.respond(session, &response)?;
                self.linger(session, prefix.len() as u64, declared);
                return Ok(Next::Close);
            }
        };

        if headers.contains(X_401) {
            tracing::debug!(%user, "X-401 requested");
            let response = Response::builder()
                .status(Status::UNAUTHORIZED)
                .header("Connection", "close")
                .build();
            self.respond(session, &response)?;
            self.linger(session, prefix.len() as u64, declared);
            return Ok(Next::Close);
        }

        let body = match self.count_body(session, headers, declared, prefix) {
            Ok(body) => body,
            Err(e @ (Error::InvalidChunkSize(_) | Error::Protocol(_))) => {
                tracing::debug!(%user, error = %e, "bad chunked framing");
                let response = Response::builder()
                    .status(Status::BAD_REQUEST)
                    .header("Connection", "close")
                    .body(e.to_string())
                    .build();
                self.respond(session, &response)?;
                self.linger(session, 0, None);
                return Ok(Next::Close);
            }
            Err(e) => return Err(e),
        };
        let declared_value = declared.map(|d| d as i64).unwrap_or(-1);
        tracing::debug!(%user, declared = declared_value, counted = body.counted, "request body consumed");

        if i64::try_from(body.counted).ok() != Some(declared_value) {
            let response = Response::builder()
                .status(Status::INTERNAL_SERVER_ERROR)
                .header("Connection", "close")
                .body(format!(
                    "Expected Content-Length of {} but actually received {}",
                    declared_value, body.counted
                ))
                .build();
            self.respond(session, &response)?;
            return Ok(Next::Close);
        }

        let keep_alive = body.complete && !headers.wants_close();
        let mut builder = Response::builder()
            .status(Status::OK)
            .header(X_AUTH, headers.get("Authorization").unwrap_or_default())
            .header(X_CONTENT_LENGTH, declared_value.to_string());
        if !keep_alive {
            builder = builder.header("Connection", "close");
        }
        self.respond(session, &builder.build())?;

        Ok(if keep_alive {
            Next::KeepAlive(body.leftover)
        } else {
            Next::Close
        })
    }

    fn respond(&self, session: &mut FdSessionOps, response: &Response) -> Result<()> {
        write_all_with_timeout(session, &response.to_wire(), Some(self.idle_timeout))
    }

    /// Read and count the request body without keeping it
    fn count_body(
        &self,
        session: &mut FdSessionOps,
        headers: &Headers,
        declared: Option<u64>,
        mut prefix: BytesMut,
    ) -> Result<BodyCount> {
        if headers.is_chunked() {
            return self.count_chunked(session, prefix);
        }

        let Some(declared) = declared else {
            // Without framing a request has no body.
            return Ok(BodyCount {
                counted: 0,
                complete: true,
                leftover: prefix,
            });
        };

        let in_prefix = (prefix.len() as u64).min(declared) as usize;
        let leftover = prefix.split_off(in_prefix);
        let mut counted = in_prefix as u64;

        let mut buf = vec![0u8; BODY_READ_SIZE];
        while counted < declared {
            let want = (declared - counted).min(BODY_READ_SIZE as u64) as usize;
            let n = match read_with_timeout(session, &mut buf[..want], Some(self.idle_timeout)) {
                Ok(n) => n,
                Err(Error::Io(e)) => {
                    tracing::debug!(error = %e, counted, "body read failed");
                    0
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Ok(BodyCount {
                    counted,
                    complete: false,
                    leftover,
                });
            }
            counted += n as u64;
        }

        Ok(BodyCount {
            counted,
            complete: true,
            leftover,
        })
    }

    fn count_chunked(&self, session: &mut FdSessionOps, prefix: BytesMut) -> Result<BodyCount> {
        let mut decoder = ChunkedDecoder::new();
        let mut input = prefix;
        let mut counted = 0u64;
        let mut buf = vec![0u8; BODY_READ_SIZE];

        loop {
            let progress = decoder.feed(&input)?;
            counted += progress.payload as u64;
            let _ = input.split_to(progress.consumed);

            if progress.complete {
                return Ok(BodyCount {
                    counted,
                    complete: true,
                    leftover: input,
                });
            }
            // Whatever the decoder left behind is one unfinished line.
            if input.len() > MAX_HEAD_SIZE {
                return Err(Error::Protocol(format!(
                    "chunk size or trailer line exceeds {} bytes",
                    MAX_HEAD_SIZE
                )));
            }

            let n = read_with_timeout(session, &mut buf, Some(self.idle_timeout))?;
            if n == 0 {
                return Ok(BodyCount {
                    counted,
                    complete: false,
                    leftover: BytesMut::new(),
                });
            }
            input.extend_from_slice(&buf[..n]);
        }
    }

    /// Half-close and discard the unread body for up to `linger_timeout`
    fn linger(&self, session: &mut FdSessionOps, already_read: u64, declared: Option<u64>) {
        if let Err(e) = session.shutdown(Shutdown::Write) {
            tracing::debug!(error = %e, "half-close failed");
            return;
        }

        let mut remaining = declared
            .map(|d| d.saturating_sub(already_read))
            .unwrap_or(u64::MAX);
        let deadline = Instant::now() + self.linger_timeout;
        let mut buf = vec![0u8; BODY_READ_SIZE];
        let mut discarded = 0u64;

        while remaining > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match read_with_timeout(session, &mut buf, Some(left)) {
                Ok(0) => break,
                Ok(n) => {
                    discarded += n as u64;
                    remaining = remaining.saturating_sub(n as u64);
                }
                Err(_) => break,
            }
        }

        tracing::debug!(discarded, "lingering close finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Credentials;
    use std::io::{Read, Write};

    fn start() -> AuthServer {
        AuthServer::start(ServerConfig::default()).unwrap()
    }

    fn exchange(server: &AuthServer, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(request).unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn auth_header() -> String {
        Credentials::new("user", "pwd").to_header_value()
    }

    #[test]
    fn test_challenge_without_credentials() {
        let server = start();
        let response = exchange(&server, b"PUT / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\n\r\nbody");

        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(response.contains("WWW-Authenticate: Basic realm=\"MyRealm\"\r\n"));
        assert!(response.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_authenticated_upload_echoes_headers() {
        let server = start();
        let request = format!(
            "PUT / HTTP/1.1\r\nHost: localhost\r\nAuthorization: {}\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
            auth_header()
        );
        let response = exchange(&server, request.as_bytes());

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(&format!("X-Auth: {}\r\n", auth_header())));
        assert!(response.contains("X-Content-Length: 11\r\n"));
    }

    #[test]
    fn test_x401_with_credentials() {
        let server = start();
        let request = format!(
            "PUT / HTTP/1.1\r\nAuthorization: {}\r\nX-401: yes\r\nContent-Length: 3\r\n\r\nabc",
            auth_header()
        );
        let response = exchange(&server, request.as_bytes());

        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(!response.contains("WWW-Authenticate"));
        assert!(response.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn test_short_body_is_500() {
        let server = start();
        let request = format!(
            "PUT / HTTP/1.1\r\nAuthorization: {}\r\nContent-Length: 100\r\n\r\nonly-twenty-bytes!!!",
            auth_header()
        );
        let response = exchange(&server, request.as_bytes());

        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.ends_with("Expected Content-Length of 100 but actually received 20"));
    }

    #[test]
    fn test_chunked_body_has_no_declared_length() {
        let server = start();
        let request = format!(
            "PUT / HTTP/1.1\r\nAuthorization: {}\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            auth_header()
        );
        let response = exchange(&server, request.as_bytes());

        assert!(response.ends_with("Expected Content-Length of -1 but actually received 5"));
    }

    #[test]
    fn test_keep_alive_serves_second_request() {
        let server = start();
        let request = format!(
            "PUT / HTTP/1.1\r\nAuthorization: {auth}\r\nContent-Length: 2\r\n\r\nab\
             PUT / HTTP/1.1\r\nAuthorization: {auth}\r\nContent-Length: 3\r\n\r\nabc",
            auth = auth_header()
        );
        let response = exchange(&server, request.as_bytes());

        assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(response.contains("X-Content-Length: 2\r\n"));
        assert!(response.contains("X-Content-Length: 3\r\n"));
    }

    #[test]
    fn test_conflicting_content_length_rejected() {
        let server = start();
        let response = exchange(
            &server,
            b"PUT / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\nab",
        );
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn test_no_response_before_head_is_complete() {
        let server = start();
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(b"PUT / HTTP/1.1\r\nHost: local").unwrap();

        stream.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        let mut buf = [0u8; 64];
        let err = stream.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));

        stream.write_all(b"host\r\nContent-Length: 0\r\n\r\n").unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
    }

    #[test]
    fn test_endless_chunk_size_line_rejected() {
        let server = start();
        let mut request = format!(
            "PUT / HTTP/1.1\r\nAuthorization: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
            auth_header()
        )
        .into_bytes();
        request.extend(std::iter::repeat(b'a').take(MAX_HEAD_SIZE + 1024));
        let response = exchange(&server, &request);

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("chunk size or trailer line exceeds"));
    }

    #[test]
    fn test_malformed_chunk_size_rejected() {
        let server = start();
        let request = format!(
            "PUT / HTTP/1.1\r\nAuthorization: {}\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
            auth_header()
        );
        let response = exchange(&server, request.as_bytes());
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn test_accept_backoff_grows_to_cap() {
        assert_eq!(accept_backoff(1), ACCEPT_BACKOFF_MIN);
        assert_eq!(accept_backoff(2), ACCEPT_BACKOFF_MIN * 2);
        assert!(accept_backoff(5) > accept_backoff(4));
        assert_eq!(accept_backoff(50), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
    }

    #[test]
    fn test_connections_are_counted() {
        let server = start();
        assert_eq!(server.connections(), 0);
        for _ in 0..3 {
            exchange(&server, b"PUT / HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        }
        assert_eq!(server.connections(), 3);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut server = start();
        let addr = server.local_addr();
        server.close();
        server.close();
        drop(server);

        // Port is released; a fresh server can take it again.
        let config = ServerConfig {
            bind: addr,
            ..ServerConfig::default()
        };
        AuthServer::start(config).unwrap();
    }
}
