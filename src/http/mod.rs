//! HTTP/1.1 plumbing for the upload harness
//!
//! A deliberately small HTTP/1.1 layer: just enough to run an authenticating
//! upload server and a raw upload client that can notice an early response
//! while the request body is still in flight.
//!
//! # Architecture
//!
//! - `SessionOps` abstracts the transport (poll, read, write, shutdown) so the
//!   client and server only deal with readiness and byte slices
//! - `RequestHeadParser` / `ResponseHeadParser` parse heads incrementally and
//!   hand back whatever body bytes arrived with them
//! - `AuthServer` guards every path with HTTP Basic authentication
//! - `UploadClient` streams a file body and aborts on an early response
//!
//! # Examples
//!
//! ```no_run
//! use upload_abort::body::BodyStrategy;
//! use upload_abort::http::{AuthServer, ServerConfig, UploadClient, UploadRequest};
//! use std::time::Duration;
//!
//! let server = AuthServer::start(ServerConfig::default()).unwrap();
//! let client = UploadClient::new(server.local_addr(), Duration::from_secs(10));
//!
//! let body = BodyStrategy::FileRegion.open("/tmp/payload.data", 8192).unwrap();
//! let outcome = client.upload(&UploadRequest::put("/"), body).unwrap();
//! assert_eq!(outcome.status.code(), 401);
//! ```

pub mod auth;
pub mod chunked;
pub mod client;
pub mod headers;
pub mod message;
pub mod parser;
pub mod server;
pub mod session;

pub use auth::{AuthResult, BasicAuthenticator, Credentials, UserStore};
pub use client::{UploadClient, UploadOutcome, UploadRequest};
pub use headers::Headers;
pub use message::{Method, RequestHead, Response, ResponseHead, Status, Version};
pub use parser::{RequestHeadParser, ResponseHeadParser};
pub use server::{AuthServer, ServerConfig};
pub use session::{FdSessionOps, PollEvents, Readiness, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// Maximum size of a request or response head
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// Header that makes the server answer 401 to an authenticated request
pub const X_401: &str = "X-401";

/// Header echoing the received `Authorization` value
pub const X_AUTH: &str = "X-Auth";

/// Header echoing the received `Content-Length` value
pub const X_CONTENT_LENGTH: &str = "X-Content-Length";
