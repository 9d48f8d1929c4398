//! Request body sources
//!
//! A body source owns an open file and pushes it into a socket piece by piece.
//! Every call to `transmit` writes at most what the socket accepts right now,
//! which lets the client check for an early response between pieces.
//!
//! Three strategies are provided:
//!
//! - [`region::FileRegion`]: zero-copy `sendfile(2)` from the file descriptor
//! - [`chunked::ChunkedFile`]: buffered reads of fixed-size chunks
//! - [`mapped::ChunkedMappedFile`]: fixed-size slices of a memory mapping

pub mod chunked;
pub mod mapped;
pub mod region;

use crate::http::SessionOps;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

pub use chunked::ChunkedFile;
pub use mapped::ChunkedMappedFile;
pub use region::FileRegion;

/// Default chunk size for the chunked strategies
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// A request body that can be written to a session incrementally
pub trait BodySource: Send {
    /// Total body length in bytes
    fn len(&self) -> u64;

    /// Bytes already accepted by the socket
    fn position(&self) -> u64;

    /// Write the next piece of the body
    ///
    /// Returns the number of bytes the socket accepted, `Ok(0)` once the body
    /// is complete, or the socket error (including `WouldBlock`).
    fn transmit(&mut self, out: &mut dyn SessionOps) -> io::Result<usize>;

    fn remaining(&self) -> u64 {
        self.len() - self.position()
    }

    fn is_complete(&self) -> bool {
        self.position() >= self.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How the file body is streamed to the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyStrategy {
    FileRegion,
    ChunkedFile,
    ChunkedMappedFile,
}

impl BodyStrategy {
    pub const ALL: [BodyStrategy; 3] = [
        BodyStrategy::FileRegion,
        BodyStrategy::ChunkedFile,
        BodyStrategy::ChunkedMappedFile,
    ];

    /// Open `path` as a body source using this strategy
    ///
    /// `chunk_size` is ignored by the file region strategy.
    pub fn open(self, path: impl AsRef<Path>, chunk_size: usize) -> io::Result<Box<dyn BodySource>> {
        let path = path.as_ref();
        let body: Box<dyn BodySource> = match self {
            BodyStrategy::FileRegion => Box::new(FileRegion::open(path)?),
            BodyStrategy::ChunkedFile => Box::new(ChunkedFile::open(path, chunk_size)?),
            BodyStrategy::ChunkedMappedFile => Box::new(ChunkedMappedFile::open(path, chunk_size)?),
        };
        Ok(body)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyStrategy::FileRegion => "file-region",
            BodyStrategy::ChunkedFile => "chunked-file",
            BodyStrategy::ChunkedMappedFile => "chunked-mapped-file",
        }
    }
}

impl fmt::Display for BodyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BodyStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown body strategy: {}", s))
    }
}

pub(crate) fn invalid_chunk_size() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "chunk size must be non-zero")
}
