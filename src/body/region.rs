//! Zero-copy file region body

use super::BodySource;
use crate::http::SessionOps;
use std::fs::File;
use std::io;
use std::path::Path;

/// Largest count a single `sendfile(2)` call transfers on Linux
const MAX_SENDFILE: u64 = 0x7fff_f000;

/// A file range sent with `sendfile(2)`
///
/// Data never passes through user space; the kernel copies straight from the
/// page cache into the socket buffer.
pub struct FileRegion {
    file: File,
    start: u64,
    count: u64,
    transferred: u64,
}

impl FileRegion {
    /// Region covering the whole file
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::new(file, 0, len))
    }

    pub fn new(file: File, start: u64, count: u64) -> Self {
        FileRegion {
            file,
            start,
            count,
            transferred: 0,
        }
    }
}

impl BodySource for FileRegion {
    fn len(&self) -> u64 {
        self.count
    }

    fn position(&self) -> u64 {
        self.transferred
    }

    fn transmit(&mut self, out: &mut dyn SessionOps) -> io::Result<usize> {
        let remaining = self.count - self.transferred;
        if remaining == 0 {
            return Ok(0);
        }

        let n = send_file(
            out,
            &self.file,
            self.start + self.transferred,
            remaining.min(MAX_SENDFILE) as usize,
        )?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "file region ended after {} of {} bytes",
                    self.transferred, self.count
                ),
            ));
        }

        self.transferred += n as u64;
        Ok(n)
    }
}

#[cfg(target_os = "linux")]
fn send_file(out: &mut dyn SessionOps, file: &File, offset: u64, count: usize) -> io::Result<usize> {
    use std::os::fd::AsRawFd;

    let mut off = offset as libc::off_t;
    let n = unsafe { libc::sendfile(out.as_raw_fd(), file.as_raw_fd(), &mut off, count) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

// Without a portable sendfile, fall back to a positioned read through a buffer.
#[cfg(not(target_os = "linux"))]
fn send_file(out: &mut dyn SessionOps, file: &File, offset: u64, count: usize) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    let mut buf = vec![0u8; count.min(64 * 1024)];
    let n = file.read_at(&mut buf, offset)?;
    if n == 0 {
        return Ok(0);
    }
    out.write(&buf[..n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::testing;

    #[test]
    fn test_partial_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = testing::sample_file(&dir, 10_000);
        let expected = std::fs::read(&path).unwrap();

        let region = FileRegion::new(File::open(&path).unwrap(), 1_000, 2_500);
        assert_eq!(region.len(), 2_500);
        assert_eq!(testing::drain(Box::new(region)), &expected[1_000..3_500]);
    }
}
