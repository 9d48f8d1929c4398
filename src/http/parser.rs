//! HTTP head parsing
//!
//! Both parsers accept data in arbitrary slices. Once the blank line that
//! ends a head has been seen they return the head; any bytes that arrived
//! after it stay buffered and are the start of the message body.

use super::{Error, Headers, RequestHead, ResponseHead, Result, Method, Status, Version, MAX_HEAD_SIZE};
use bytes::{Buf, BytesMut};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Parse a request line such as `PUT / HTTP/1.1`
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() != 3 {
        return Err(Error::Parse(format!(
            "Invalid request line: expected 3 parts, got {}",
            parts.len()
        )));
    }

    let method = Method::from_str(parts[0])?;
    let version = Version::from_str(parts[2])?;

    Ok((method, parts[1].to_string(), version))
}

/// Parse a status line such as `HTTP/1.1 401 Unauthorized`
///
/// The reason phrase is optional and defaults to the canonical one.
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])?;
    let code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(code)?;
    let reason = match parts.get(2) {
        Some(reason) if !reason.is_empty() => reason.to_string(),
        _ => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Accumulates bytes until a full head is available
#[derive(Debug, Default)]
struct HeadBuffer {
    buffer: BytesMut,
    scanned: usize,
}

impl HeadBuffer {
    /// Returns the first line and the header lines once the head is complete
    fn push(&mut self, data: &[u8]) -> Result<Option<(String, Headers)>> {
        self.buffer.extend_from_slice(data);

        // Resume a little before the previous end so a split terminator is found.
        let start = self.scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
        let found = self.buffer[start..]
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
            .map(|pos| start + pos);

        let Some(end) = found else {
            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::HeadTooLarge(MAX_HEAD_SIZE));
            }
            self.scanned = self.buffer.len();
            return Ok(None);
        };

        if end > MAX_HEAD_SIZE {
            return Err(Error::HeadTooLarge(MAX_HEAD_SIZE));
        }

        let head = self.buffer.split_to(end);
        self.buffer.advance(HEAD_TERMINATOR.len());
        self.scanned = 0;

        let text = String::from_utf8_lossy(&head);
        let mut lines = text.split("\r\n");
        let first = lines.next().unwrap_or_default().to_string();

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = Headers::parse_header_line(line)?;
            headers.insert(name, value);
        }

        Ok(Some((first, headers)))
    }

    fn take_remaining(&mut self) -> BytesMut {
        self.scanned = 0;
        self.buffer.split()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

/// Incremental request head parser
#[derive(Debug, Default)]
pub struct RequestHeadParser {
    inner: HeadBuffer,
}

impl RequestHeadParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data to the parser
    ///
    /// Returns `Ok(Some(head))` once the head is complete, `Ok(None)` if more
    /// data is needed.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<RequestHead>> {
        let Some((line, headers)) = self.inner.push(data)? else {
            return Ok(None);
        };

        let (method, uri, version) = parse_request_line(&line)?;
        Ok(Some(
            RequestHead::builder()
                .method(method)
                .uri(uri)
                .version(version)
                .headers(headers)
                .build(),
        ))
    }

    /// Bytes received after the head, i.e. the start of the body
    pub fn take_remaining(&mut self) -> BytesMut {
        self.inner.take_remaining()
    }

    pub fn reset(&mut self) {
        self.inner.clear();
    }
}

/// Incremental response head parser
#[derive(Debug, Default)]
pub struct ResponseHeadParser {
    inner: HeadBuffer,
}

impl ResponseHeadParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data to the parser
    ///
    /// Interim `1xx` responses are skipped; only a final response is returned.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<ResponseHead>> {
        let mut input = data;
        loop {
            let Some((line, headers)) = self.inner.push(input)? else {
                return Ok(None);
            };

            let (version, status, reason) = parse_status_line(&line)?;
            if status.code() >= 200 {
                return Ok(Some(ResponseHead::new(version, status, reason, headers)));
            }
            input = &[];
        }
    }

    /// Bytes received after the head, i.e. the start of the body
    pub fn take_remaining(&mut self) -> BytesMut {
        self.inner.take_remaining()
    }

    pub fn reset(&mut self) {
        self.inner.clear();
    }
}
