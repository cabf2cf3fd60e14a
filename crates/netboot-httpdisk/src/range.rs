//! Byte-range request formatting and the matching response-header parsing.
//!
//! Wire format sent to the server (exact, decimal, inclusive end):
//!
//! ```text
//! Range: bytes=<start>-<end>\r\n
//! ```

use std::fmt::Write as _;

use crate::{HttpDiskError, Result};

const RANGE_PREFIX: &str = "Range: bytes=";
const LINE_END: &str = "\r\n";

/// Scratch capacity for one range header line.
///
/// Sized for two 16-digit offsets, which covers any image smaller than 10^16 bytes. Larger
/// offsets are rejected with [`HttpDiskError::HeaderTooLong`] rather than reallocating.
pub const RANGE_HEADER_CAPACITY: usize = RANGE_PREFIX.len() + 16 + 1 + 16 + LINE_END.len();

/// Header line used by the 1-byte probe read.
pub const PROBE_RANGE_HEADER: &str = "Range: bytes=0-0\r\n";

/// Reusable fixed-capacity buffer holding the outgoing `Range` header line.
#[derive(Debug)]
pub struct RangeHeader {
    text: String,
    capacity: usize,
}

impl RangeHeader {
    pub fn new() -> Result<Self> {
        Self::with_capacity(RANGE_HEADER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut text = String::new();
        text.try_reserve_exact(capacity)
            .map_err(|_| HttpDiskError::OutOfMemory {
                what: "range header scratch buffer",
            })?;
        Ok(Self { text, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overwrite the buffer with `Range: bytes=<start>-<end>\r\n`.
    ///
    /// The formatted length is validated before anything is written, so the buffer never grows
    /// past its capacity.
    pub fn format(&mut self, start: u64, end_inclusive: u64) -> Result<&str> {
        let len = RANGE_PREFIX.len()
            + decimal_len(start)
            + 1
            + decimal_len(end_inclusive)
            + LINE_END.len();
        if len > self.capacity {
            return Err(HttpDiskError::HeaderTooLong {
                len,
                capacity: self.capacity,
            });
        }

        self.text.clear();
        write!(self.text, "{RANGE_PREFIX}{start}-{end_inclusive}{LINE_END}").map_err(|_| {
            HttpDiskError::HeaderTooLong {
                len,
                capacity: self.capacity,
            }
        })?;
        debug_assert_eq!(self.text.len(), len);
        Ok(&self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn decimal_len(mut value: u64) -> usize {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

/// Parse a single `bytes=<start>-<end>` range, either as a bare header value or as a full
/// `Range: ...\r\n` line. Returns the inclusive bounds.
pub fn parse_range_spec(header: &str) -> Option<(u64, u64)> {
    let header = header.trim();
    let value = match header.split_once(':') {
        Some((name, value)) if name.trim().eq_ignore_ascii_case("range") => value.trim(),
        Some(_) => return None,
        None => header,
    };
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (end >= start).then_some((start, end))
}

/// Parsed `Content-Range` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end_inclusive: u64,
    /// `None` when the server sent `*` for the complete length.
    pub total: Option<u64>,
}

/// Parse `bytes <start>-<end>/<total>` (total may be `*`).
pub fn parse_content_range(content_range: &str) -> Option<ContentRange> {
    let content_range = content_range.trim();
    let mut parts = content_range.split_whitespace();
    let unit = parts.next()?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let spec = parts.next()?;
    let (range_part, total_part) = spec.split_once('/')?;
    let total = match total_part {
        "*" => None,
        total => Some(total.parse().ok()?),
    };
    let (start, end) = range_part.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end_inclusive: u64 = end.parse().ok()?;
    if end_inclusive < start {
        return None;
    }
    Some(ContentRange {
        start,
        end_inclusive,
        total,
    })
}
