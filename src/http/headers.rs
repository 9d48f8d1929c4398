//! HTTP headers handling
//!
//! Headers keep insertion order, compare names case-insensitively and allow
//! repeated names. The server echoes some of them back, so values are kept
//! verbatim apart from surrounding whitespace.

use super::{Error, Result, CRLF, MAX_HEADERS};

/// HTTP headers collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Append a header, keeping any existing values of the same name
    ///
    /// Headers past `MAX_HEADERS` are dropped.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.entries.len() >= MAX_HEADERS {
            return;
        }
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.insert(name, value);
    }

    /// First value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Declared `Content-Length`, if any
    ///
    /// Repeated headers are accepted only when every value agrees.
    pub fn content_length(&self) -> Result<Option<u64>> {
        let mut declared: Option<u64> = None;
        for raw in self.get_all("Content-Length") {
            let value = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: {}", raw)))?;
            match declared {
                Some(previous) if previous != value => {
                    return Err(Error::InvalidHeader(format!(
                        "conflicting Content-Length values {} and {}",
                        previous, value
                    )));
                }
                _ => declared = Some(value),
            }
        }
        Ok(declared)
    }

    /// Whether the message body uses chunked transfer encoding
    pub fn is_chunked(&self) -> bool {
        self.get_all("Transfer-Encoding").iter().any(|v| {
            v.split(',')
                .last()
                .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false)
        })
    }

    /// Whether the peer asked to close the connection after this message
    pub fn wants_close(&self) -> bool {
        self.get_all("Connection")
            .iter()
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("close"))
    }

    /// Parse a `name: value` header line
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }

    /// Append the headers in wire format to `buf`
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
    }
}
