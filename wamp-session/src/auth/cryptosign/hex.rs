use std::fmt::Write;

use anyhow::{
    Error,
    Result,
};

/// Encodes bytes as a lowercase hex string.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut buf = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(buf, "{byte:02x}");
    }
    buf
}

/// Decodes a hex string of either case.
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::msg("hex string must have an even length"));
    }
    s.as_bytes()
        .chunks_exact(2)
        .map(|chunk| match (hex_digit(chunk[0]), hex_digit(chunk[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(Error::msg("invalid hex digit")),
        })
        .collect()
}

const fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
