// encoding.rs - The encoding capability consumed by the engine, plus
// shared helpers. Everything outside this module treats input bytes
// opaquely and goes through these calls.

use crate::defs::*;

/// Encodings are static singletons; the engine holds a trait-object
/// reference in the program.
pub type EncodingRef = &'static dyn Encoding;

// === Encoding flags ===

pub const ENC_FLAG_ASCII_COMPATIBLE: u32 = 1 << 0;
pub const ENC_FLAG_UNICODE: u32 = 1 << 1;

// === Character types the engine queries ===

pub const CTYPE_NEWLINE: u32 = 0;
pub const CTYPE_WORD: u32 = 12;

pub const NEWLINE_CODE: u8 = 0x0a;

/// The narrow capability of an encoding as seen by the match engine:
/// character lengths, decoding, case folding, newline/word tests, head
/// adjustment and validity. Compile-time concerns (property lookup,
/// fold-pair enumeration) live with the parser, not here.
pub trait Encoding: Send + Sync {
    /// Encoding name (e.g. "US-ASCII", "UTF-8").
    fn name(&self) -> &str;

    /// Byte length of the character starting at `p[0]`.
    fn mbc_enc_len(&self, p: &[u8]) -> usize;

    /// Maximum encoded character length in bytes.
    fn max_enc_len(&self) -> usize;

    /// Minimum encoded character length in bytes.
    fn min_enc_len(&self) -> usize;

    /// Does a newline character start at `p[0]`?
    fn is_mbc_newline(&self, p: &[u8], end: usize) -> bool;

    /// Decode the character starting at `p[0]` to a code point.
    fn mbc_to_code(&self, p: &[u8], end: usize) -> CodePoint;

    /// Case fold the character at `*pp` in `source`, advance `*pp` past
    /// it, write the folded bytes to `fold_buf` and return their count.
    fn mbc_case_fold(
        &self,
        flag: CaseFoldType,
        pp: &mut usize,
        end: usize,
        source: &[u8],
        fold_buf: &mut [u8],
    ) -> usize;

    /// Is the code point of the given character type?
    fn is_code_ctype(&self, code: CodePoint, ctype: u32) -> bool;

    /// Find the head of the character containing position `s`, never
    /// moving left of `start`.
    fn left_adjust_char_head(&self, start: usize, s: usize, data: &[u8]) -> usize;

    /// Is the whole byte string valid in this encoding?
    fn is_valid_mbc_string(&self, s: &[u8]) -> bool;

    /// Encoding property flags (`ENC_FLAG_*`).
    fn flag(&self) -> u32;
}

// === Query helpers ===

#[inline]
pub fn is_singlebyte(enc: EncodingRef) -> bool {
    enc.max_enc_len() == 1
}

#[inline]
pub fn is_ascii_compatible(enc: EncodingRef) -> bool {
    (enc.flag() & ENC_FLAG_ASCII_COMPATIBLE) != 0
}

#[inline]
pub fn is_unicode_encoding(enc: EncodingRef) -> bool {
    (enc.flag() & ENC_FLAG_UNICODE) != 0
}

#[inline]
pub fn is_code_word(enc: EncodingRef, code: CodePoint) -> bool {
    enc.is_code_ctype(code, CTYPE_WORD)
}

/// Character length at `s`, clamped to 1 at or past the end of data so
/// scan loops always make progress.
#[inline]
pub fn enclen(enc: EncodingRef, data: &[u8], s: usize) -> usize {
    if s >= data.len() {
        1
    } else {
        enc.mbc_enc_len(&data[s..])
    }
}

// === Position helpers ===

/// Head of the previous character, or `None` at the start.
pub fn prev_char_head(enc: EncodingRef, start: usize, s: usize, data: &[u8]) -> Option<usize> {
    if s <= start {
        None
    } else {
        Some(enc.left_adjust_char_head(start, s - 1, data))
    }
}

/// Step back `n` characters from `s`, or `None` if the start is passed.
pub fn step_back(
    enc: EncodingRef,
    start: usize,
    s: usize,
    data: &[u8],
    n: usize,
) -> Option<usize> {
    let mut s = s;
    for _ in 0..n {
        if s <= start {
            return None;
        }
        s = enc.left_adjust_char_head(start, s - 1, data);
    }
    Some(s)
}

/// Step forward `n` characters from `p`, or `None` past `end`.
pub fn step(enc: EncodingRef, p: usize, end: usize, data: &[u8], n: usize) -> Option<usize> {
    let mut q = p;
    for _ in 0..n {
        q += enclen(enc, data, q);
    }
    if q <= end {
        Some(q)
    } else {
        None
    }
}

/// Count characters in `data[p..end]`.
pub fn strlen(enc: EncodingRef, data: &[u8], p: usize, end: usize) -> usize {
    let mut n = 0;
    let mut q = p;
    while q < end {
        q += enclen(enc, data, q);
        n += 1;
    }
    n
}

/// Smallest character head >= `s`.
pub fn right_adjust_char_head(enc: EncodingRef, start: usize, s: usize, data: &[u8]) -> usize {
    let p = enc.left_adjust_char_head(start, s, data);
    if p < s {
        p + enclen(enc, data, p)
    } else {
        p
    }
}

/// Like `right_adjust_char_head`, also reporting the head left behind
/// when an adjustment happened (the previous character's head).
pub fn right_adjust_char_head_with_prev(
    enc: EncodingRef,
    start: usize,
    s: usize,
    data: &[u8],
) -> (usize, Option<usize>) {
    let p = enc.left_adjust_char_head(start, s, data);
    if p < s {
        (p + enclen(enc, data, p), Some(p))
    } else {
        (p, None)
    }
}

// === ASCII tables ===

pub static ASCII_TO_LOWER_CASE_TABLE: [u8; 256] = {
    let mut t = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        t[i] = if i >= 0x41 && i <= 0x5a {
            (i + 0x20) as u8
        } else {
            i as u8
        };
        i += 1;
    }
    t
};

#[inline]
pub fn ascii_to_lower_case(c: u8) -> u8 {
    ASCII_TO_LOWER_CASE_TABLE[c as usize]
}

#[inline]
pub fn is_ascii_word_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Shared ctype test over the ASCII range.
pub fn ascii_is_code_ctype(code: CodePoint, ctype: u32) -> bool {
    if code >= 128 {
        return false;
    }
    let c = code as u8;
    match ctype {
        CTYPE_NEWLINE => c == NEWLINE_CODE,
        CTYPE_WORD => is_ascii_word_byte(c),
        _ => false,
    }
}

/// Shared single-byte newline test (`0x0a` only).
pub fn is_mbc_newline_0x0a(p: &[u8], end: usize) -> bool {
    end > 0 && !p.is_empty() && p[0] == NEWLINE_CODE
}

/// Shared ASCII case fold: one byte in, one lowered byte out.
pub fn ascii_mbc_case_fold(
    _flag: CaseFoldType,
    pp: &mut usize,
    _end: usize,
    source: &[u8],
    fold_buf: &mut [u8],
) -> usize {
    fold_buf[0] = ascii_to_lower_case(source[*pp]);
    *pp += 1;
    1
}
