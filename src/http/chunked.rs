//! Chunked transfer encoding
//!
//! The server never keeps request bodies, it only counts them, so the decoder
//! walks the framing and reports how many payload bytes went past.

use super::{Error, Result};

/// Progress reported by one `ChunkedDecoder::feed` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Input bytes consumed, framing included
    pub consumed: usize,
    /// Payload bytes seen
    pub payload: usize,
    /// Whether the terminating chunk and trailers were consumed
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkEnd,
    Trailer,
    Complete,
}

/// Incremental chunked body decoder
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
        }
    }

    /// Consume as much of `input` as possible
    ///
    /// Unconsumed bytes are an incomplete line and must be fed again with more
    /// data appended.
    pub fn feed(&mut self, input: &[u8]) -> Result<Progress> {
        let mut pos = 0;
        let mut payload = 0;

        while pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(len) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&input[pos..pos + len]);
                    let size_str = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    pos += len + 2;
                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData { remaining: size }
                    };
                }

                DecoderState::ChunkData { remaining } => {
                    let available = (input.len() - pos) as u64;
                    let take = remaining.min(available);
                    pos += take as usize;
                    payload += take as usize;

                    self.state = if take == remaining {
                        DecoderState::ChunkEnd
                    } else {
                        DecoderState::ChunkData {
                            remaining: remaining - take,
                        }
                    };
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let Some(len) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    pos += len + 2;
                    // An empty line ends the trailer section.
                    if len == 0 {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok(Progress {
            consumed: pos,
            payload,
            complete: self.is_complete(),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pass() {
        let mut decoder = ChunkedDecoder::new();
        let input = b"5\r\nHello\r\n6;ext=1\r\n World\r\n0\r\n\r\n";

        let progress = decoder.feed(input).unwrap();
        assert_eq!(progress.consumed, input.len());
        assert_eq!(progress.payload, 11);
        assert!(progress.complete);
    }

    #[test]
    fn test_trailers_skipped() {
        let mut decoder = ChunkedDecoder::new();
        let progress = decoder
            .feed(b"3\r\nabc\r\n0\r\nX-Checksum: 1\r\n\r\n")
            .unwrap();
        assert_eq!(progress.payload, 3);
        assert!(progress.complete);
    }

    #[test]
    fn test_incremental_with_partial_size_line() {
        let mut decoder = ChunkedDecoder::new();
        let mut pending = Vec::new();
        let mut payload = 0;

        for piece in [&b"a"[..], b"\r\n0123", b"456789\r", b"\n0\r", b"\n\r\n"] {
            pending.extend_from_slice(piece);
            let progress = decoder.feed(&pending).unwrap();
            pending.drain(..progress.consumed);
            payload += progress.payload;
        }

        assert_eq!(payload, 10);
        assert!(decoder.is_complete());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_invalid_size() {
        let mut decoder = ChunkedDecoder::new();
        assert!(matches!(
            decoder.feed(b"zz\r\n"),
            Err(Error::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn test_missing_crlf_after_data() {
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.feed(b"2\r\nabXY").is_err());
    }
}
