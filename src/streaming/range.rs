//! HTTP `Range` header handling for single byte ranges.

use crate::app::error::SessionError;

/// Inclusive byte span inside one file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Span covering a whole non-empty file
    pub fn full(length: u64) -> Option<Self> {
        if length == 0 {
            None
        } else {
            Some(Self {
                start: 0,
                end: length - 1,
            })
        }
    }

    // Never empty: `end` is inclusive and `start <= end`
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a file of `total` bytes
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// A parsed but not yet bounds-checked range spec
#[derive(Debug, PartialEq, Eq)]
enum RangeSpec {
    FromTo { start: u64, end: Option<u64> },
    Suffix { len: u64 },
}

fn parse_spec(header: &str) -> Option<RangeSpec> {
    let rest = header.trim().strip_prefix("bytes=")?;
    if rest.contains(',') {
        return None;
    }

    let (start, end) = rest.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let len = end.parse::<u64>().ok()?;
        return Some(RangeSpec::Suffix { len });
    }

    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };

    Some(RangeSpec::FromTo { start, end })
}

/// Resolve a `Range` header against a file of `length` bytes.
///
/// Accepts `bytes=start-end`, `bytes=start-` and `bytes=-suffix`. Multi-range
/// and malformed headers, `start >= length`, `end >= length` and `start > end`
/// are all rejected with `InvalidRange`.
pub fn resolve_range(header: &str, length: u64) -> Result<ByteRange, SessionError> {
    let invalid = || SessionError::InvalidRange {
        header: header.to_string(),
        length,
    };

    let spec = parse_spec(header).ok_or_else(invalid)?;

    let (start, end) = match spec {
        RangeSpec::FromTo { start, end } => (start, end.unwrap_or(length.saturating_sub(1))),
        RangeSpec::Suffix { len } => {
            if len == 0 {
                return Err(invalid());
            }
            (length.saturating_sub(len), length.saturating_sub(1))
        }
    };

    if start >= length || end >= length || start > end {
        return Err(invalid());
    }

    Ok(ByteRange { start, end })
}
