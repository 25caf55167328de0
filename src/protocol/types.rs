//! RESP values and their wire encoding.
//!
//! | type          | sigil | encoding                        |
//! |---------------|-------|---------------------------------|
//! | simple string | `+`   | `+OK\r\n`                       |
//! | error         | `-`   | `-ERR bad thing\r\n`            |
//! | integer       | `:`   | `:42\r\n`                       |
//! | bulk string   | `$`   | `$3\r\nfoo\r\n`                 |
//! | null          | `$`   | `$-1\r\n`                       |
//! | array         | `*`   | `*1\r\n$4\r\nPING\r\n`          |
//!
//! Headers end in CRLF. Bulk payloads are length-prefixed and may contain any
//! byte, CR and LF included.

use bytes::{BufMut, Bytes};

pub const CRLF: &[u8] = b"\r\n";

/// Leading byte of each value type.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value: a decoded request or a reply waiting to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status text. CR and LF are written as spaces.
    SimpleString(String),
    /// Error text, conventionally starting with an upper-case code such as
    /// `ERR` or `OOM`.
    Error(String),
    Integer(i64),
    /// Binary-safe payload.
    BulkString(Bytes),
    /// Encoded as the null bulk string.
    Null,
    /// Elements in order. May be empty or nested.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// ```
    /// use cinderkv::protocol::RespValue;
    ///
    /// assert_eq!(RespValue::simple_string("QUEUED").serialize(), b"+QUEUED\r\n");
    /// ```
    pub fn simple_string(text: impl Into<String>) -> Self {
        RespValue::SimpleString(single_line(text.into()))
    }

    /// Error reply. Line breaks in `message` become spaces.
    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(single_line(message.into()))
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// ```
    /// use cinderkv::protocol::RespValue;
    ///
    /// let reply = RespValue::bulk_string(&b"a\r\nb"[..]);
    /// assert_eq!(reply.serialize(), b"$4\r\na\r\nb\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(items)
    }

    /// `+OK`
    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

    /// `+PONG`
    pub fn pong() -> Self {
        Self::simple_string("PONG")
    }

    /// Encodes into a new, pre-sized buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_hint());
        self.serialize_into(&mut out);
        out
    }

    /// Appends the encoding to `out`. Array elements are written depth first.
    pub fn serialize_into<B: BufMut>(&self, out: &mut B) {
        match self {
            RespValue::SimpleString(text) => encode_simple_string(out, text),
            RespValue::Error(message) => encode_error(out, message),
            RespValue::Integer(n) => encode_integer(out, *n),
            RespValue::BulkString(data) => encode_bulk_string(out, data),
            RespValue::Null => encode_null(out),
            RespValue::Array(items) => encode_array(out, items),
        }
    }

    fn size_hint(&self) -> usize {
        match self {
            RespValue::SimpleString(text) | RespValue::Error(text) => 1 + text.len() + 2,
            RespValue::Integer(_) => 23,
            RespValue::BulkString(data) => 1 + 20 + 2 + data.len() + 2,
            RespValue::Null => 5,
            RespValue::Array(items) => 23 + items.iter().map(Self::size_hint).sum::<usize>(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Text of a simple string, or of a bulk string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(text) => Some(text.as_str()),
            RespValue::BulkString(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let RespValue::BulkString(data) = self {
            Some(data.as_ref())
        } else {
            None
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        if let RespValue::Integer(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        if let RespValue::Array(items) = self {
            Some(items.as_slice())
        } else {
            None
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        if let RespValue::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }
}

#[inline]
fn encode_header<B: BufMut>(out: &mut B, sigil: u8, n: i64) {
    out.put_u8(sigil);
    out.put_slice(n.to_string().as_bytes());
    out.put_slice(CRLF);
}

fn single_line(text: String) -> String {
    if text.contains(['\r', '\n']) {
        text.replace(['\r', '\n'], " ")
    } else {
        text
    }
}

#[inline]
fn encode_line<B: BufMut>(out: &mut B, sigil: u8, text: &str) {
    out.put_u8(sigil);
    for &b in text.as_bytes() {
        out.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
    }
    out.put_slice(CRLF);
}

pub fn encode_simple_string<B: BufMut>(out: &mut B, text: &str) {
    encode_line(out, prefix::SIMPLE_STRING, text);
}

pub fn encode_error<B: BufMut>(out: &mut B, message: &str) {
    encode_line(out, prefix::ERROR, message);
}

pub fn encode_integer<B: BufMut>(out: &mut B, n: i64) {
    encode_header(out, prefix::INTEGER, n);
}

pub fn encode_bulk_string<B: BufMut>(out: &mut B, data: &[u8]) {
    encode_header(out, prefix::BULK_STRING, data.len() as i64);
    out.put_slice(data);
    out.put_slice(CRLF);
}

pub fn encode_null<B: BufMut>(out: &mut B) {
    encode_header(out, prefix::BULK_STRING, -1);
}

pub fn encode_array<B: BufMut>(out: &mut B, items: &[RespValue]) {
    encode_header(out, prefix::ARRAY, items.len() as i64);
    for item in items {
        item.serialize_into(out);
    }
}
