//! Zero-Copy Request Framing
//!
//! Splits the connection's read buffer into requests. A request is either a
//! RESP array of bulk strings (what every client library sends) or an
//! inline command line (what a human types into telnet).
//!
//! [`decode`] returns:
//! - `Ok(Some(tokens))` - a complete request was removed from the buffer
//! - `Ok(None)` - the request is incomplete; read more and try again
//! - `Err(FrameError)` - the bytes are not a valid request
//!
//! Tokens are `Bytes` slices of the frozen request, so arguments are never
//! copied out of the read buffer.

use super::reply::{prefix, CRLF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while framing a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Invalid length or count line
    #[error("invalid {what} length")]
    InvalidLength { what: &'static str },

    /// Request array element that is not a bulk string
    #[error("expected '$', got byte {0:#04x}")]
    ExpectedBulk(u8),

    /// Protocol violation (missing CRLF, etc.)
    #[error("{0}")]
    Protocol(&'static str),

    /// The request exceeds maximum allowed size
    #[error("{what} too large: {size} (max: {max})")]
    TooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },
}

/// Maximum size for a single bulk string (16 MB)
pub const MAX_BULK_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of arguments in one request
pub const MAX_ARGS: usize = 1024 * 1024;

/// Upper bound on argument slots reserved up front; larger requests grow
/// as their arguments arrive.
const PREALLOC_ARGS: usize = 1024;

/// Maximum length of an inline command line
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Removes one complete request from `buf` and returns its tokens.
///
/// An empty request (`*0\r\n` or a blank inline line) yields an empty token
/// list; callers skip it.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == prefix::ARRAY {
        decode_multibulk(buf)
    } else {
        decode_inline(buf)
    }
}

/// Parses `*<count>\r\n` followed by `count` bulk strings.
fn decode_multibulk(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    let Some((count, mut pos)) = read_number(buf, 1, "multibulk")? else {
        return Ok(None);
    };
    if count <= 0 {
        let _ = buf.split_to(pos);
        return Ok(Some(Vec::new()));
    }
    let count = count as usize;
    if count > MAX_ARGS {
        return Err(FrameError::TooLarge {
            what: "multibulk",
            size: count,
            max: MAX_ARGS,
        });
    }

    // Locate every argument before consuming anything.
    let mut spans = Vec::with_capacity(count.min(PREALLOC_ARGS));
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != prefix::BULK_STRING {
            return Err(FrameError::ExpectedBulk(buf[pos]));
        }
        let Some((len, start)) = read_number(buf, pos + 1, "bulk")? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(FrameError::InvalidLength { what: "bulk" });
        }
        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(FrameError::TooLarge {
                what: "bulk",
                size: len,
                max: MAX_BULK_SIZE,
            });
        }
        let end = start + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != CRLF {
            return Err(FrameError::Protocol("bulk string missing trailing CRLF"));
        }
        spans.push((start, end));
        pos = end + 2;
    }

    let frame = buf.split_to(pos).freeze();
    Ok(Some(
        spans
            .into_iter()
            .map(|(start, end)| frame.slice(start..end))
            .collect(),
    ))
}

/// Parses a whitespace-separated command line.
fn decode_inline(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    let Some(eol) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_SIZE {
            return Err(FrameError::TooLarge {
                what: "inline request",
                size: buf.len(),
                max: MAX_INLINE_SIZE,
            });
        }
        return Ok(None);
    };

    let line = buf.split_to(eol + 1).freeze();
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, b) in line.iter().enumerate() {
        match (b.is_ascii_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                tokens.push(line.slice(s..i));
                start = None;
            }
            _ => {}
        }
    }
    Ok(Some(tokens))
}

/// Reads a decimal number terminated by CRLF starting at `from`. Returns the
/// number and the position just after the CRLF.
fn read_number(
    buf: &[u8],
    from: usize,
    what: &'static str,
) -> Result<Option<(i64, usize)>, FrameError> {
    let Some(len) = find_crlf(&buf[from..]) else {
        if buf.len() - from > 32 {
            return Err(FrameError::InvalidLength { what });
        }
        return Ok(None);
    };
    let n = std::str::from_utf8(&buf[from..from + len])
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(FrameError::InvalidLength { what })?;
    Ok(Some((n, from + len + 2)))
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
