//! Subrecord text normalization.
//!
//! Plugin text is a mess of eras: modern files carry UTF-8, legacy files and
//! legacy tooling emit Windows-1252, and both usually (but not always) end in
//! a NUL. The policy here is the one the game tooling converged on: strip a
//! single trailing NUL, accept the bytes verbatim when they already validate
//! as UTF-8, otherwise transcode from Windows-1252.
//!
//! The heuristic is not injective. A byte pair that happens to form a valid
//! UTF-8 sequence but was meant as two Windows-1252 characters decodes as the
//! UTF-8 reading. That ambiguity is inherent to the format (nothing on disk
//! records the encoding) and callers get no knob for it.

/// Unicode codepoints for Windows-1252 bytes 0x80..=0x9F, where the codepage
/// diverges from Latin-1. Bytes 0xA0..=0xFF map straight to U+00A0..U+00FF.
const CP1252_C1: [u16; 32] = [
    0x20AC, 0x0081, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, // 0x80..
    0x02C6, 0x2030, 0x0160, 0x2039, 0x0152, 0x008D, 0x017D, 0x008F, // 0x88..
    0x0090, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, // 0x90..
    0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0x009D, 0x017E, 0x0178, // 0x98..
];

/// Normalizes subrecord bytes into a UTF-8 string.
pub fn decode_to_utf8(bytes: &[u8]) -> String {
    let bytes = match bytes.split_last() {
        Some((&0, rest)) => rest,
        _ => bytes,
    };
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => windows_1252_to_utf8(bytes),
    }
}

fn windows_1252_to_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let cp = match b {
            0x00..=0x7F => u32::from(b),
            0x80..=0x9F => u32::from(CP1252_C1[usize::from(b - 0x80)]),
            0xA0..=0xFF => u32::from(b),
        };
        // Every entry in the table is a valid scalar value.
        out.push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    out
}

/// True iff the string contains anything other than ASCII whitespace and the
/// ideographic full-width space. Gates "is this worth translating" decisions.
pub fn has_visible_text(text: &str) -> bool {
    text.chars()
        .any(|c| !c.is_ascii_whitespace() && c != '\u{3000}')
}
