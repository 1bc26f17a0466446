//! Script digests and digest-derived function naming.
//!
//! A script body is identified by the lowercase hex encoding of its SHA-1
//! digest; the compiled callable is registered in the interpreter under the
//! same identity with a fixed prefix.

use sha1::{Digest, Sha1};

/// Prefix of every interpreter-side function name.
pub const FUNCTION_PREFIX: &str = "f_";

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 40;

/// Lowercase hex SHA-1 digest of a script body.
pub fn sha1_hex(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Interpreter-side function name for a hex digest.
pub fn function_name(digest: &str) -> String {
    format!("{}{}", FUNCTION_PREFIX, digest)
}
