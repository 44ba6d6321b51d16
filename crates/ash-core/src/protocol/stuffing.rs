//! Byte stuffing of reserved bytes.

use super::constants::{ESCAPE, ESCAPE_XOR, RESERVED_BYTES};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnstuffError {
    #[error("Escape byte at end of frame")]
    DanglingEscape,
}

fn is_reserved(byte: u8) -> bool {
    RESERVED_BYTES.contains(&byte)
}

/// Escape every reserved byte of `data`.
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 4);
    stuff_into(data, &mut out);
    out
}

/// Escape `data` onto the end of `out`.
pub fn stuff_into(data: &[u8], out: &mut Vec<u8>) {
    for &byte in data {
        if is_reserved(byte) {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
}

/// Reverse [`stuff`].
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, UnstuffError> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            let &escaped = bytes.next().ok_or(UnstuffError::DanglingEscape)?;
            out.push(escaped ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}
