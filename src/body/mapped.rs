//! Memory-mapped chunked file body

use super::{invalid_chunk_size, BodySource};
use crate::http::SessionOps;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

/// Read-only private mapping of a whole file
struct Mapping {
    ptr: NonNull<libc::c_void>,
    len: usize,
}

// The mapping is read-only and owned by exactly one body.
unsafe impl Send for Mapping {}

impl Mapping {
    fn new(file: &File, len: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Mapping { ptr, len })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr(), self.len);
        }
    }
}

/// A memory-mapped file written out in slices of at most `chunk_size`
///
/// The file must not be truncated while the body is in use. Touching mapped
/// pages past the new end of file raises `SIGBUS`; `transmit` checks the
/// file length before each slice and reports `UnexpectedEof` when it has
/// shrunk, which only narrows that window.
pub struct ChunkedMappedFile {
    file: File,
    // Zero-length files cannot be mapped.
    mapping: Option<Mapping>,
    chunk_size: usize,
    sent: usize,
}

impl ChunkedMappedFile {
    pub fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(invalid_chunk_size());
        }

        let file = File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large to map"))?;

        let mapping = if len == 0 {
            None
        } else {
            Some(Mapping::new(&file, len)?)
        };

        Ok(ChunkedMappedFile {
            file,
            mapping,
            chunk_size,
            sent: 0,
        })
    }
}

impl BodySource for ChunkedMappedFile {
    fn len(&self) -> u64 {
        self.mapping.as_ref().map(|m| m.len as u64).unwrap_or(0)
    }

    fn position(&self) -> u64 {
        self.sent as u64
    }

    fn transmit(&mut self, out: &mut dyn SessionOps) -> io::Result<usize> {
        let Some(mapping) = &self.mapping else {
            return Ok(0);
        };

        let data = mapping.as_slice();
        if self.sent == data.len() {
            return Ok(0);
        }

        let end = (self.sent + self.chunk_size).min(data.len());
        if self.file.metadata()?.len() < end as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "mapped file was truncated",
            ));
        }
        let n = out.write(&data[self.sent..end])?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }

        self.sent += n;
        Ok(n)
    }
}
