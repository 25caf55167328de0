//! Incremental RESP Parser
//!
//! The parser works over a byte buffer and returns either:
//! - `Ok(Some((value, consumed)))` - a complete value was decoded from the
//!   first `consumed` bytes
//! - `Ok(None)` - the buffer holds an incomplete value, read more bytes
//! - `Err(ProtocolError)` - the bytes cannot be valid RESP
//!
//! It never looks past the value it decodes, so the caller advances its buffer
//! by exactly `consumed` and any pipelined bytes that follow stay untouched.
//! There is no state beyond the nesting depth of the current call, which makes
//! one parser per connection trivially reentrant.
//!
//! Two entry points exist:
//! - [`RespParser::parse`] accepts any value (replies, nested arrays).
//! - [`RespParser::parse_request`] accepts only what clients send: an array
//!   whose elements are bulk strings. Any other sigil is reported as
//!   [`ProtocolError::UnexpectedPrefix`].

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors raised while decoding RESP input.
///
/// None of these are recoverable on the same stream: framing cannot
/// resynchronize mid-stream, so the connection should be closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line started with a different sigil than the grammar requires
    #[error("expected '{expected}', got '{}'", .found.escape_default())]
    UnexpectedPrefix { expected: char, found: char },

    /// A line started with a byte that is not a RESP sigil at all
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Header digits did not form an i64
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string, error, or header line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk length below -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative array length. Null arrays are not accepted.
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk payload was not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// A bulk payload or the read buffer outgrew its cap
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Arrays nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded: {0}")]
    NestingTooDeep(usize),

    /// The stream ended in the middle of a value
    #[error("unexpected end of stream ({buffered} bytes of an incomplete value)")]
    UnexpectedEof { buffered: usize },

    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoders return `Ok(None)` while the value is still incomplete.
pub type ParseResult<T> = Result<T, ProtocolError>;

/// Largest accepted bulk payload, 512 MiB.
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Arrays may nest this deep before decoding fails.
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP parser.
///
/// # Example
///
/// ```
/// use cinderkv::protocol::parser::RespParser;
/// use cinderkv::protocol::RespValue;
/// use bytes::Bytes;
///
/// let mut parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (value, consumed) = parser.parse_request(buf).unwrap().unwrap();
/// assert_eq!(consumed, buf.len());
/// assert_eq!(
///     value,
///     RespValue::array(vec![
///         RespValue::bulk_string(Bytes::from("GET")),
///         RespValue::bulk_string(Bytes::from("name")),
///     ])
/// );
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Arrays currently open
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decodes any RESP value from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Decodes a client request: `*<N>\r\n` followed by N bulk strings.
    pub fn parse_request(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        expect_prefix(first, prefix::ARRAY)?;

        let (count, mut consumed) = match parse_header(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let count = array_len(count)?;

        let mut args = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let rest = &buf[consumed..];
            let Some(&sigil) = rest.first() else {
                return Ok(None);
            };
            expect_prefix(sigil, prefix::BULK_STRING)?;

            match parse_bulk_string(rest)? {
                Some((value, used)) => {
                    args.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(args), consumed)))
    }

    /// Dispatches on the sigil. Recurses through `parse_array`.
    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        match first {
            prefix::SIMPLE_STRING => parse_text_line(buf).map(|r| {
                r.map(|(s, used)| (RespValue::SimpleString(s), used))
            }),
            prefix::ERROR => {
                parse_text_line(buf).map(|r| r.map(|(s, used)| (RespValue::Error(s), used)))
            }
            prefix::INTEGER => {
                parse_header(buf).map(|r| r.map(|(n, used)| (RespValue::Integer(n), used)))
            }
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ProtocolError::UnknownPrefix(other)),
        }
    }

    /// `*<count>` header, then `count` nested values.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, mut consumed) = match parse_header(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let count = array_len(count)?;

        let mut elements = Vec::with_capacity(count.min(1024));
        self.depth += 1;

        for _ in 0..count {
            match self.parse_value(&buf[consumed..]) {
                Ok(Some((value, used))) => {
                    elements.push(value);
                    consumed += used;
                }
                other => {
                    self.depth -= 1;
                    return other.map(|_| None);
                }
            }
        }

        self.depth -= 1;
        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Fails unless `found` is the sigil the grammar expects here.
#[inline]
fn expect_prefix(found: u8, expected: u8) -> ParseResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedPrefix {
            expected: expected as char,
            found: found as char,
        })
    }
}

fn array_len(count: i64) -> ParseResult<usize> {
    usize::try_from(count).map_err(|_| ProtocolError::InvalidArrayLength(count))
}

/// Parses the text after a one-byte prefix up to CRLF.
fn parse_text_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let s = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
            // +1 for prefix, +2 for CRLF
            Ok(Some((s.to_string(), 1 + pos + 2)))
        }
        None => Ok(None),
    }
}

/// Parses a `<prefix><decimal>\r\n` line, returning the number and the
/// bytes consumed.
fn parse_header(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some(pos) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };

    let digits = std::str::from_utf8(&buf[1..1 + pos])
        .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    let n: i64 = digits
        .parse()
        .map_err(|_| ProtocolError::InvalidInteger(digits.to_string()))?;

    Ok(Some((n, 1 + pos + 2)))
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`, or `$-1\r\n` for Null.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let (length, data_start) = match parse_header(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if length == -1 {
        return Ok(Some((RespValue::Null, data_start)));
    }
    let length =
        usize::try_from(length).map_err(|_| ProtocolError::InvalidBulkLength(length))?;

    if length > MAX_BULK_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total_needed = data_start + length + 2;
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[data_start + length..total_needed] != CRLF {
        return Err(ProtocolError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((RespValue::BulkString(data), total_needed)))
}

/// Position of the first CRLF in `buf`, if any.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single value of any type from `buf`.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
