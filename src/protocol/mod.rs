//! RESP Protocol Implementation
//!
//! The wire codec: typed values, an incremental decoder, and buffered
//! stream adapters for tokio IO.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and one encoder per variant
//! - `parser`: incremental decoder for any value or for client requests
//! - `stream`: `RespReader` / `RespWriter` over `AsyncRead` / `AsyncWrite`
//!
//! ## Example
//!
//! ```
//! use cinderkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//!
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod stream;
pub mod types;

pub use parser::{parse_message, ParseResult, ProtocolError, RespParser};
pub use stream::{RespReader, RespWriter};
pub use types::RespValue;
