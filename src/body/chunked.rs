//! Buffered chunked file body

use super::{invalid_chunk_size, BodySource};
use crate::http::SessionOps;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A file read into a reusable buffer one chunk at a time
///
/// A chunk may take several `transmit` calls to drain; the next one is read
/// only after the previous one has been fully accepted by the socket.
pub struct ChunkedFile {
    file: File,
    len: u64,
    read: u64,
    sent: u64,
    buf: Vec<u8>,
    filled: usize,
    drained: usize,
}

impl ChunkedFile {
    pub fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(invalid_chunk_size());
        }

        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(ChunkedFile {
            file,
            len,
            read: 0,
            sent: 0,
            buf: vec![0u8; chunk_size],
            filled: 0,
            drained: 0,
        })
    }

    fn fill(&mut self) -> io::Result<()> {
        let want = (self.len - self.read).min(self.buf.len() as u64) as usize;
        let n = loop {
            match self.file.read(&mut self.buf[..want]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file ended after {} of {} bytes", self.read, self.len),
            ));
        }

        self.read += n as u64;
        self.filled = n;
        self.drained = 0;
        Ok(())
    }
}

impl BodySource for ChunkedFile {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.sent
    }

    fn transmit(&mut self, out: &mut dyn SessionOps) -> io::Result<usize> {
        if self.drained == self.filled {
            if self.read == self.len {
                return Ok(0);
            }
            self.fill()?;
        }

        let n = out.write(&self.buf[self.drained..self.filled])?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }

        self.drained += n;
        self.sent += n as u64;
        Ok(n)
    }
}
