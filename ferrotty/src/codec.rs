//! Escape codec for pushing raw bytes through a terminal line discipline.
//!
//! A terminal in its default (cooked) mode interprets control bytes: `^C`
//! raises SIGINT, `^D` flushes the line, `^U` kills it, and so on. Prefixing
//! each such byte with the literal-next character (`^V`, 0x16) makes the line
//! discipline deliver it to the reader untouched, without switching the
//! terminal to raw mode.
//!
//! Only the reserved set (C0 controls and DEL) is escaped. Everything else
//! passes through as-is, so `decode(encode(b)) == b` for every byte string.

use crate::error::CodecError;

/// The byte introducing an escape sequence (`^V`, literal-next).
pub const ESCAPE_MARKER: u8 = 0x16;

/// Returns true if `byte` must be escaped before reaching a terminal.
pub fn is_reserved(byte: u8) -> bool {
    byte < 0x20 || byte == 0x7f
}

/// Escape `raw` so that every reserved byte is preceded by [`ESCAPE_MARKER`].
pub fn encode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 4);
    encode_into(raw, &mut out);
    out
}

/// Like [`encode`], appending to an existing buffer.
pub fn encode_into(raw: &[u8], out: &mut Vec<u8>) {
    for &byte in raw {
        if is_reserved(byte) {
            out.push(ESCAPE_MARKER);
        }
        out.push(byte);
    }
}

/// Reverse [`encode`].
///
/// # Errors
///
/// Fails on the first malformed position instead of skipping it: a marker
/// at the very end, a marker followed by a byte outside the reserved set, or
/// a reserved byte that is not part of an escape sequence.
pub fn decode(safe: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(safe.len());
    let mut iter = safe.iter().copied().enumerate();

    while let Some((offset, byte)) = iter.next() {
        if byte == ESCAPE_MARKER {
            match iter.next() {
                Some((_, next)) if is_reserved(next) => out.push(next),
                Some((_, next)) => {
                    return Err(CodecError::InvalidEscape { offset, byte: next });
                }
                None => return Err(CodecError::TruncatedEscape { offset }),
            }
        } else if is_reserved(byte) {
            return Err(CodecError::UnescapedControl { offset, byte });
        } else {
            out.push(byte);
        }
    }

    Ok(out)
}

/// Render bytes for a human: caret notation for controls, `\xHH` above ASCII.
///
/// `printable(&encode(b"\x1b"))` gives `^V^[`, i.e. exactly what would be
/// typed to produce the byte on a terminal.
pub fn printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            0x7f => out.push_str("^?"),
            b if b < 0x20 => {
                out.push('^');
                out.push(char::from(b + 0x40));
            }
            b'^' => out.push_str("\\^"),
            b'\\' => out.push_str("\\\\"),
            b if b >= 0x80 => out.push_str(&format!("\\x{b:02x}")),
            b => out.push(char::from(b)),
        }
    }
    out
}
