// encodings/utf8.rs - UTF-8 encoding (RFC 3629 range: U+0000 - U+10FFFF).

use crate::defs::*;
use crate::encoding::*;

#[inline]
fn utf8_islead(c: u8) -> bool {
    (c & 0xc0) != 0x80
}

#[inline]
fn utf8_istail(c: u8) -> bool {
    (c & 0xc0) == 0x80
}

// Maps first byte to character length (RFC 3629: max 4 bytes). Invalid
// lead bytes map to 1 so scan loops keep moving.
static ENC_LEN_UTF8: [u8; 256] = [
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

pub struct Utf8Encoding;

pub static UTF8: Utf8Encoding = Utf8Encoding;

impl Encoding for Utf8Encoding {
    fn name(&self) -> &str {
        "UTF-8"
    }

    fn mbc_enc_len(&self, p: &[u8]) -> usize {
        ENC_LEN_UTF8[p[0] as usize] as usize
    }

    fn max_enc_len(&self) -> usize {
        4
    }

    fn min_enc_len(&self) -> usize {
        1
    }

    fn is_mbc_newline(&self, p: &[u8], end: usize) -> bool {
        is_mbc_newline_0x0a(p, end)
    }

    fn mbc_to_code(&self, p: &[u8], _end: usize) -> CodePoint {
        let mut len = ENC_LEN_UTF8[p[0] as usize] as usize;
        if len > p.len() {
            len = p.len();
        }

        let c = p[0] as u32;
        if len > 1 {
            let remaining = len - 1;
            let mut n = c & ((1u32 << (6 - remaining)) - 1);
            for i in 1..len {
                n = (n << 6) | ((p[i] as u32) & 0x3f);
            }
            n
        } else {
            c
        }
    }

    fn mbc_case_fold(
        &self,
        _flag: CaseFoldType,
        pp: &mut usize,
        end: usize,
        source: &[u8],
        fold_buf: &mut [u8],
    ) -> usize {
        if source[*pp] < 128 {
            fold_buf[0] = ascii_to_lower_case(source[*pp]);
            *pp += 1;
            return 1;
        }

        let len = (ENC_LEN_UTF8[source[*pp] as usize] as usize).min(end - *pp);
        let code = self.mbc_to_code(&source[*pp..], end);
        *pp += len;

        match char::from_u32(code) {
            Some(ch) => {
                let mut n = 0;
                for low in ch.to_lowercase() {
                    n += low.encode_utf8(&mut fold_buf[n..]).len();
                }
                n
            }
            None => {
                // Ill-formed sequence: fold to itself.
                let from = *pp - len;
                fold_buf[..len].copy_from_slice(&source[from..*pp]);
                len
            }
        }
    }

    fn is_code_ctype(&self, code: CodePoint, ctype: u32) -> bool {
        if code < 128 {
            return ascii_is_code_ctype(code, ctype);
        }
        match ctype {
            CTYPE_NEWLINE => false,
            CTYPE_WORD => char::from_u32(code).is_some_and(|c| c.is_alphanumeric()),
            _ => false,
        }
    }

    fn left_adjust_char_head(&self, start: usize, s: usize, data: &[u8]) -> usize {
        if s <= start || s >= data.len() {
            return s;
        }
        let mut p = s;
        while !utf8_islead(data[p]) && p > start {
            p -= 1;
        }
        p
    }

    fn is_valid_mbc_string(&self, s: &[u8]) -> bool {
        let mut p = 0;
        while p < s.len() {
            if s[p] > 0xf4 || (s[p] > 0x7f && s[p] < 0xc2) {
                return false;
            }
            let len = ENC_LEN_UTF8[s[p] as usize] as usize;
            p += 1;
            for _ in 1..len {
                if p >= s.len() || !utf8_istail(s[p]) {
                    return false;
                }
                p += 1;
            }
        }
        true
    }

    fn flag(&self) -> u32 {
        ENC_FLAG_ASCII_COMPATIBLE | ENC_FLAG_UNICODE
    }
}
