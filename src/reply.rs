//! Wire-level reply values exchanged with the command layer.
//!
//! This is the data model both sides of the marshaling boundary speak: the
//! host command dispatcher produces `WireReply` values for script-issued
//! calls, and every script run finishes by converting its return value back
//! into one.

use crate::error::Error;

/// A reply in the store's wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum WireReply {
    /// Integer reply: `:1000`
    Integer(i64),

    /// Nil/missing reply: `$-1`
    Nil,

    /// Bulk string reply: `$6\r\nfoobar`
    Bulk(Vec<u8>),

    /// Single-line status reply: `+OK`
    Status(String),

    /// Error reply: `-ERR ...`
    Error(String),

    /// Ordered array of replies; may nest arbitrarily.
    Array(Vec<WireReply>),
}

impl WireReply {
    /// Create the canonical `OK` status reply.
    pub fn ok() -> Self {
        WireReply::Status("OK".to_string())
    }

    /// Create a status reply, sanitising line terminators.
    pub fn status(msg: impl Into<String>) -> Self {
        WireReply::Status(sanitize_line(&msg.into()))
    }

    /// Create an error reply, sanitising line terminators.
    pub fn error(msg: impl Into<String>) -> Self {
        WireReply::Error(sanitize_line(&msg.into()))
    }

    /// Create a bulk string reply from bytes.
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        WireReply::Bulk(bytes.into())
    }

    /// Check if this reply is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, WireReply::Error(_))
    }

    /// Check if this reply is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, WireReply::Nil)
    }
}

impl From<&Error> for WireReply {
    fn from(err: &Error) -> Self {
        WireReply::error(err.to_string())
    }
}

impl From<Error> for WireReply {
    fn from(err: Error) -> Self {
        WireReply::from(&err)
    }
}

/// Replace the protocol line terminator with a single space so a message can
/// be framed into a single-line status or error reply.
pub fn sanitize_line(msg: &str) -> String {
    msg.replace("\r\n", " ")
}
