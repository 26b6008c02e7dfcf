// encodings/ascii.rs - US-ASCII encoding.

use crate::defs::*;
use crate::encoding::*;

pub struct AsciiEncoding;

pub static ASCII: AsciiEncoding = AsciiEncoding;

impl Encoding for AsciiEncoding {
    fn name(&self) -> &str {
        "US-ASCII"
    }

    fn mbc_enc_len(&self, _p: &[u8]) -> usize {
        1
    }

    fn max_enc_len(&self) -> usize {
        1
    }

    fn min_enc_len(&self) -> usize {
        1
    }

    fn is_mbc_newline(&self, p: &[u8], end: usize) -> bool {
        is_mbc_newline_0x0a(p, end)
    }

    fn mbc_to_code(&self, p: &[u8], _end: usize) -> CodePoint {
        p[0] as CodePoint
    }

    fn mbc_case_fold(
        &self,
        flag: CaseFoldType,
        pp: &mut usize,
        end: usize,
        source: &[u8],
        fold_buf: &mut [u8],
    ) -> usize {
        ascii_mbc_case_fold(flag, pp, end, source, fold_buf)
    }

    fn is_code_ctype(&self, code: CodePoint, ctype: u32) -> bool {
        ascii_is_code_ctype(code, ctype)
    }

    fn left_adjust_char_head(&self, _start: usize, s: usize, _data: &[u8]) -> usize {
        s
    }

    fn is_valid_mbc_string(&self, _s: &[u8]) -> bool {
        true
    }

    fn flag(&self) -> u32 {
        ENC_FLAG_ASCII_COMPATIBLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_basics() {
        let enc: EncodingRef = &ASCII;
        assert_eq!(enc.mbc_enc_len(b"x"), 1);
        assert_eq!(enc.mbc_to_code(b"A", 1), 0x41);
        assert!(enc.is_mbc_newline(b"\n", 1));
        assert!(!enc.is_mbc_newline(b"x", 1));
        assert!(enc.is_code_ctype(b'_' as CodePoint, CTYPE_WORD));
        assert!(!enc.is_code_ctype(b'-' as CodePoint, CTYPE_WORD));
    }

    #[test]
    fn case_fold_lowers() {
        let enc: EncodingRef = &ASCII;
        let mut buf = [0u8; CASE_FOLD_MAXLEN];
        let mut pp = 0;
        let n = enc.mbc_case_fold(0, &mut pp, 1, b"Q", &mut buf);
        assert_eq!((n, pp, buf[0]), (1, 1, b'q'));
    }
}
