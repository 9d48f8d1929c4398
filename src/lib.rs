//! upload-abort - early 401 upload reproduction harness
//!
//! This crate checks that an HTTP/1.1 client gives up on a file upload as
//! soon as the server answers `401 Unauthorized`, instead of failing on the
//! broken connection or pushing the whole body first. The same exchange is
//! run with three ways of streaming the body: a zero-copy file region,
//! buffered chunks, and chunks of a memory-mapped file.

pub mod body;
pub mod config;
pub mod fixture;
pub mod harness;
pub mod http;

pub use body::BodyStrategy;
pub use config::HarnessConfig;
pub use fixture::UploadFixture;
pub use harness::Harness;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Harness errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Iteration {iteration}: expected status {expected} but got {actual}")]
    UnexpectedStatus {
        iteration: usize,
        expected: u16,
        actual: u16,
    },
}
