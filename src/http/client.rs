//! Upload client
//!
//! Each upload opens its own connection, writes the request head and then
//! pumps the file body while watching the socket for a response. A response
//! that arrives before the body is finished aborts the upload: nothing more
//! is written and the response is returned as the outcome.

use super::session::{read_with_timeout, write_all_with_timeout};
use super::{
    Credentials, Error, FdSessionOps, Headers, Method, PollEvents, RequestHead, ResponseHead,
    ResponseHeadParser, Result, SessionOps, Status,
};
use crate::body::BodySource;
use bytes::BytesMut;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

const READ_BUFFER_SIZE: usize = 8192;

const HOST: &str = "localhost";

/// Request line and extra headers of an upload
///
/// `Content-Length` and `Host` are filled in by the client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    method: Method,
    uri: String,
    headers: Headers,
}

impl UploadRequest {
    pub fn put(uri: impl Into<String>) -> Self {
        UploadRequest {
            method: Method::Put,
            uri: uri.into(),
            headers: Headers::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach Basic credentials
    pub fn credentials(self, credentials: &Credentials) -> Self {
        self.header("Authorization", credentials.to_header_value())
    }

    fn head(&self, host: &str, content_length: u64) -> RequestHead {
        let mut head = RequestHead::builder()
            .method(self.method)
            .uri(self.uri.clone())
            .headers(self.headers.clone())
            .build();
        head.headers_mut().set("Content-Length", content_length.to_string());
        head.headers_mut().set("Host", host);
        head
    }
}

/// Result of one upload exchange
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub status: Status,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Body bytes accepted by the socket before the exchange ended
    pub bytes_sent: u64,
    /// Declared body length
    pub body_length: u64,
    /// The response arrived before the body was fully sent
    pub aborted: bool,
}

/// What a non-blocking read turned up
enum Inbound {
    Head(ResponseHead),
    Pending,
    Closed,
}

/// HTTP/1.1 upload client
#[derive(Debug, Clone)]
pub struct UploadClient {
    addr: SocketAddr,
    response_timeout: Duration,
}

impl UploadClient {
    pub fn new(addr: SocketAddr, response_timeout: Duration) -> Self {
        UploadClient {
            addr,
            response_timeout,
        }
    }

    /// Send `body` with `request` over a fresh connection
    pub fn upload(&self, request: &UploadRequest, mut body: Box<dyn BodySource>) -> Result<UploadOutcome> {
        let timeout = Some(self.response_timeout);
        let stream = TcpStream::connect_timeout(&self.addr, self.response_timeout)?;
        stream.set_nodelay(true)?;

        let mut session = FdSessionOps::new(stream);
        session.set_nonblocking(true)?;

        let head = request.head(HOST, body.len());
        write_all_with_timeout(&mut session, &head.to_wire(), timeout)?;
        tracing::debug!(
            addr = %self.addr,
            method = %head.method(),
            uri = head.uri(),
            body_length = body.len(),
            "request head sent"
        );

        let mut parser = ResponseHeadParser::new();
        let early = self.pump(&mut session, &mut parser, body.as_mut())?;
        let aborted = early.is_some();

        let response = match early {
            Some(head) => {
                tracing::debug!(
                    status = head.status().code(),
                    bytes_sent = body.position(),
                    body_length = body.len(),
                    "early response, upload aborted"
                );
                // Stop sending; the rest of the body is abandoned.
                session.shutdown(Shutdown::Write)?;
                head
            }
            None => self.wait_for_head(&mut session, &mut parser)?,
        };

        let body_bytes = self.read_body(&mut session, &mut parser, response.headers())?;
        session.shutdown(Shutdown::Both)?;

        Ok(UploadOutcome {
            status: response.status(),
            headers: response.into_headers(),
            body: body_bytes,
            bytes_sent: body.position(),
            body_length: body.len(),
            aborted,
        })
    }

    /// Write the body until it completes or a response shows up
    ///
    /// Returns the response head if it arrived first.
    fn pump(
        &self,
        session: &mut FdSessionOps,
        parser: &mut ResponseHeadParser,
        body: &mut dyn BodySource,
    ) -> Result<Option<ResponseHead>> {
        while !body.is_complete() {
            let ready = session.poll(PollEvents::Both, Some(self.response_timeout))?;
            if ready.is_idle() {
                return Err(Error::Timeout);
            }

            if ready.readable || ready.hangup {
                match read_inbound(session, parser)? {
                    Inbound::Head(head) => return Ok(Some(head)),
                    Inbound::Pending => {}
                    Inbound::Closed => return Err(Error::ConnectionClosed),
                }
            }

            if !ready.writable {
                continue;
            }

            match body.transmit(session) {
                Ok(_) => {}
                Err(e) if is_retry(&e) => {}
                Err(e) if is_disconnect(&e) => {
                    // The server may have answered and closed before reading
                    // everything; prefer its response over the write error.
                    tracing::debug!(
                        error = %e,
                        bytes_sent = body.position(),
                        "upload interrupted, looking for a response"
                    );
                    return match self.wait_for_head(session, parser) {
                        Ok(head) => Ok(Some(head)),
                        Err(_) => Err(Error::Io(e)),
                    };
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(None)
    }

    fn wait_for_head(
        &self,
        session: &mut FdSessionOps,
        parser: &mut ResponseHeadParser,
    ) -> Result<ResponseHead> {
        loop {
            let ready = session.poll(PollEvents::Read, Some(self.response_timeout))?;
            if ready.is_idle() {
                return Err(Error::Timeout);
            }
            match read_inbound(session, parser)? {
                Inbound::Head(head) => return Ok(head),
                Inbound::Pending => {}
                Inbound::Closed => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Read a `Content-Length` delimited response body
    ///
    /// A connection closed early yields what arrived so far.
    fn read_body(
        &self,
        session: &mut FdSessionOps,
        parser: &mut ResponseHeadParser,
        headers: &Headers,
    ) -> Result<Vec<u8>> {
        let expected = headers.content_length()?.unwrap_or(0) as usize;
        let mut body: BytesMut = parser.take_remaining();
        body.truncate(expected);

        let mut buf = [0u8; READ_BUFFER_SIZE];
        while body.len() < expected {
            let n = match read_with_timeout(session, &mut buf, Some(self.response_timeout)) {
                Ok(n) => n,
                Err(Error::Io(e)) if is_disconnect(&e) => 0,
                Err(e) => return Err(e),
            };
            if n == 0 {
                tracing::warn!(
                    received = body.len(),
                    expected,
                    "connection closed before response body completed"
                );
                break;
            }
            let take = n.min(expected - body.len());
            body.extend_from_slice(&buf[..take]);
        }

        Ok(body.to_vec())
    }
}

fn read_inbound(session: &mut FdSessionOps, parser: &mut ResponseHeadParser) -> Result<Inbound> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match session.read(&mut buf) {
            Ok(0) => return Ok(Inbound::Closed),
            Ok(n) => {
                if let Some(head) = parser.parse(&buf[..n])? {
                    return Ok(Inbound::Head(head));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Inbound::Pending),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
