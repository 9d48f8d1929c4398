//! Upload payload on disk
//!
//! The payload is a text pattern encoded as UTF-16 (big-endian with a byte
//! order mark), repeated until it passes the requested size.

use crate::{Error, Result};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

const PATTERN_TEXT: &str = "FooBarBazQixFooBarBazQixFooBarBazQixFooBarBazQixFooBarBazQixFooBarBazQix";

/// Pattern bytes: byte order mark followed by big-endian UTF-16 code units
pub fn pattern_bytes() -> Vec<u8> {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in PATTERN_TEXT.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

/// Number of pattern repetitions for a payload of at least `target_size`
pub fn repetitions(target_size: u64, pattern_len: u64) -> u64 {
    target_size / pattern_len + 1
}

/// Temporary payload file, removed with its directory on drop
#[derive(Debug)]
pub struct UploadFixture {
    // Declared first so the file is removed before its directory.
    file: NamedTempFile,
    dir: TempDir,
    len: u64,
}

impl UploadFixture {
    pub fn create(target_size: u64) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("upload-abort-").tempdir()?;
        let file = tempfile::Builder::new()
            .prefix("tmpfile-")
            .suffix(".data")
            .tempfile_in(dir.path())?;

        let pattern = pattern_bytes();
        let repeats = repetitions(target_size, pattern.len() as u64);
        let expected = pattern.len() as u64 * repeats;

        {
            let mut out = BufWriter::new(file.as_file());
            for _ in 0..repeats {
                out.write_all(&pattern)?;
            }
            out.flush()?;
        }

        let actual = file.as_file().metadata()?.len();
        if actual != expected {
            return Err(Error::Fixture(format!(
                "invalid file length: expected {} bytes, found {}",
                expected, actual
            )));
        }

        tracing::debug!(path = %file.path().display(), len = actual, "upload fixture created");
        Ok(UploadFixture {
            file,
            dir,
            len: actual,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_encoding() {
        let pattern = pattern_bytes();
        assert_eq!(pattern.len(), 146);
        assert_eq!(&pattern[..6], &[0xFE, 0xFF, 0x00, b'F', 0x00, b'o']);
    }

    #[test]
    fn test_default_size() {
        assert_eq!(repetitions(500 * 1024, 146), 3507);

        let fixture = UploadFixture::create(500 * 1024).unwrap();
        assert_eq!(fixture.len(), 512_022);
        assert_eq!(std::fs::metadata(fixture.path()).unwrap().len(), 512_022);

        let name = fixture.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("tmpfile-") && name.ends_with(".data"));
    }

    #[test]
    fn test_content_repeats_pattern() {
        let fixture = UploadFixture::create(1_000).unwrap();
        let pattern = pattern_bytes();
        let data = std::fs::read(fixture.path()).unwrap();

        assert_eq!(data.len(), pattern.len() * 7);
        assert!(data.chunks(pattern.len()).all(|chunk| chunk == &pattern[..]));
    }

    #[test]
    fn test_removed_on_drop() {
        let fixture = UploadFixture::create(10).unwrap();
        let dir = fixture.dir().to_path_buf();
        let path = fixture.path().to_path_buf();
        drop(fixture);

        assert!(!path.exists());
        assert!(!dir.exists());
    }
}
