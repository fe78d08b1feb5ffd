//! Escaping of label values embedded in Graphite paths
//!
//! Graphite-web's grammar reserves a handful of symbols. Values are encoded
//! so that they survive as a single path node and can be recovered exactly:
//!
//! - `.`, `%`, `/` and `=` are percent-encoded (`.` separates nodes, `%`
//!   introduces an encoded byte)
//! - other reserved symbols are backslash-escaped
//! - printable ASCII passes through
//! - every other byte, including each byte of multi-byte characters, is
//!   percent-encoded

use percent_encoding::percent_decode_str;

/// Symbols that graphite-web only accepts backslash-escaped
const SYMBOLS: &[u8] = b"(){},=.'\"\\";

fn is_symbol(c: char) -> bool {
    c.is_ascii() && SYMBOLS.contains(&(c as u8))
}

fn push_percent_encoded(out: &mut String, byte: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push('%');
    out.push(HEX[(byte >> 4) as usize] as char);
    out.push(HEX[(byte & 0x0f) as usize] as char);
}

/// Encode a value so it can be embedded in a path node or tag value.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        match byte {
            b'.' | b'%' | b'/' | b'=' => push_percent_encoded(&mut out, byte),
            b if SYMBOLS.contains(&b) => {
                out.push('\\');
                out.push(b as char);
            }
            b if b.is_ascii_graphic() => out.push(b as char),
            b => push_percent_encoded(&mut out, b),
        }
    }
    out
}

/// Recover a value encoded by [`escape`].
///
/// Percent-encoding is undone first, then a backslash is dropped only when it
/// precedes a reserved symbol; any other backslash is kept literally.
pub fn unescape(value: &str) -> String {
    let decoded = percent_decode_str(value).decode_utf8_lossy();
    let mut out = String::with_capacity(decoded.len());
    let mut chars = decoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if is_symbol(next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}
