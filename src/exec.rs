// exec.rs - The bytecode interpreter: match_at, its helpers and the
// capture-history builder.
//
// One instruction is read per iteration; each arm is a short transition
// that advances p (and usually s), or routes to the shared fail path
// which pops the backtrack stack and restores p, s and sprev from the
// choice point found there. sprev always names the head of the character
// before s wherever an instruction needs to look one character back.

use crate::defs::*;
use crate::encoding::*;
use crate::error::{into_result, EngineError};
use crate::program::*;
use crate::region::{CaptureTreeNode, Region};
use crate::stack::*;

/// Per-match mutable state shared between the driver and the interpreter.
pub struct MatchArg<'r> {
    pub options: Options,
    pub region: Option<&'r mut Region>,
    /// Search start position (the `\G` anchor target).
    pub start: usize,
    /// Longest match length seen across attempts (FIND_LONGEST).
    pub best_len: i32,
    /// Start position of that longest match.
    pub best_s: usize,
    pub(crate) state_check: Option<StateCheckBuff>,
}

impl<'r> MatchArg<'r> {
    pub fn new(
        reg: &Program,
        options: Options,
        region: Option<&'r mut Region>,
        start: usize,
    ) -> Self {
        MatchArg {
            options: options | reg.options,
            region,
            start,
            best_len: MISMATCH,
            best_s: 0,
            state_check: None,
        }
    }

    pub(crate) fn init_state_check(&mut self, reg: &Program, str_len: usize) {
        self.state_check = StateCheckBuff::new(str_len, reg.num_state_checks);
    }
}

// === Small helpers ===

/// Jump target of an instruction-relative offset.
#[inline]
fn rel(p: usize, addr: i32) -> usize {
    (p as i64).wrapping_add(addr as i64) as usize
}

/// Resolve a capture slot to an input position.
#[inline]
fn resolve(stack: &BtStack, ptr: MemPtr) -> Option<usize> {
    match ptr {
        MemPtr::Invalid => None,
        MemPtr::Pos(pos) => Some(pos),
        MemPtr::StackIdx(si) => Some(stack.mem_frame_pstr(si)),
    }
}

#[inline]
fn is_word_at(enc: EncodingRef, data: &[u8], s: usize, end: usize) -> bool {
    if s >= end {
        return false;
    }
    let code = enc.mbc_to_code(&data[s..], end);
    is_code_word(enc, code)
}

/// Case-insensitive compare of `mblen` bytes at `s1` against the input at
/// `*ps2`, folding both sides one character at a time. Advances `*ps2`
/// past the consumed bytes on success.
pub(crate) fn string_cmp_ic(
    enc: EncodingRef,
    case_fold_flag: CaseFoldType,
    data: &[u8],
    s1: usize,
    ps2: &mut usize,
    mblen: usize,
) -> bool {
    let mut buf1 = [0u8; CASE_FOLD_MAXLEN];
    let mut buf2 = [0u8; CASE_FOLD_MAXLEN];
    let end1 = s1 + mblen;
    let end2 = *ps2 + mblen;
    let mut p1 = s1;
    let mut p2 = *ps2;

    while p1 < end1 {
        let len1 = enc.mbc_case_fold(case_fold_flag, &mut p1, end1, data, &mut buf1);
        let len2 = enc.mbc_case_fold(case_fold_flag, &mut p2, end2, data, &mut buf2);
        if len1 != len2 || buf1[..len1] != buf2[..len2] {
            return false;
        }
    }

    *ps2 = p2;
    true
}

// === Nested-level back-references ===

/// Match a back-reference against the capture recorded at dynamic call
/// depth `nest`. Walks the stack balancing CallFrame/Return markers; the
/// first balanced MemEnd of a listed group supplies the span end, the
/// matching MemStart its begin.
fn backref_match_at_nested_level(
    reg: &Program,
    stack: &BtStack,
    ignore_case: bool,
    nest: i32,
    mems: &[usize],
    s: &mut usize,
    send: usize,
    data: &[u8],
) -> bool {
    let mut level = 0i32;
    let mut pend: Option<usize> = None;

    for i in (0..stack.len()).rev() {
        match stack.frame(i) {
            Frame::CallFrame { .. } => level -= 1,
            Frame::Return => level += 1,
            Frame::MemStart { num, pstr, .. } if level == nest && mems.contains(num) => {
                if let Some(pe) = pend {
                    let pstart = *pstr;
                    let n = pe.saturating_sub(pstart);
                    if n > send - *s {
                        return false;
                    }
                    if ignore_case {
                        let mut ss = *s;
                        if !string_cmp_ic(reg.enc, reg.case_fold_flag, data, pstart, &mut ss, n) {
                            return false;
                        }
                        *s = ss;
                    } else {
                        if data[*s..*s + n] != data[pstart..pstart + n] {
                            return false;
                        }
                        *s += n;
                    }
                    return true;
                }
            }
            Frame::MemEnd { num, pstr, .. } if level == nest && mems.contains(num) => {
                pend = Some(*pstr);
            }
            _ => {}
        }
    }
    false
}

/// Existence-only variant: is any listed group closed at depth `nest`?
fn backref_check_at_nested_level(stack: &BtStack, nest: i32, mems: &[usize]) -> bool {
    let mut level = 0i32;
    for i in (0..stack.len()).rev() {
        match stack.frame(i) {
            Frame::CallFrame { .. } => level -= 1,
            Frame::Return => level += 1,
            Frame::MemEnd { num, .. } if level == nest && mems.contains(num) => return true,
            _ => {}
        }
    }
    false
}

// === Capture history ===

/// One linear pass over the stack with an explicit cursor. Every
/// MemStart of a selected group opens a child under `node`; the matching
/// MemEnd (consumed by the recursive call) closes it. Returns 0 when the
/// node was closed, 1 when the walk ran off the top (root ending).
fn make_capture_history_tree(
    node: &mut CaptureTreeNode,
    cursor: &mut usize,
    stk_top: usize,
    stack: &BtStack,
    reg: &Program,
) -> i32 {
    let mut k = *cursor;
    while k < stk_top {
        match stack.frame(k) {
            Frame::MemStart { num, pstr, .. } => {
                let n = *num;
                if n <= MAX_CAPTURE_HISTORY_GROUP && mem_status_at(reg.capture_history, n) {
                    let mut child = Box::new(CaptureTreeNode::new());
                    child.group = n as i32;
                    child.beg = *pstr as i32;
                    *cursor = k + 1;
                    let r = make_capture_history_tree(&mut child, cursor, stk_top, stack, reg);
                    node.children.push(child);
                    if r != 0 {
                        return r;
                    }
                    k = *cursor;
                }
            }
            Frame::MemEnd { num, pstr, .. } if *num as i32 == node.group => {
                node.end = *pstr as i32;
                *cursor = k;
                return 0;
            }
            _ => {}
        }
        k += 1;
    }
    1
}

// === The interpreter ===

/// Run the program against `data[..end]` starting at `sstart`, with
/// `in_right_range` as the effective input limit and `in_sprev` the head
/// of the character before `sstart` (0 when at the buffer start).
/// Returns the match length, MISMATCH, or a negative error code.
pub(crate) fn match_at(
    reg: &Program,
    data: &[u8],
    end: usize,
    in_right_range: usize,
    sstart: usize,
    in_sprev: usize,
    msa: &mut MatchArg,
) -> i32 {
    let enc = reg.enc;
    let num_mem = reg.num_mem;
    let pop_level = reg.pop_level;

    let mut stack = BtStack::new();
    let mut mem_start_stk = vec![MemPtr::Invalid; num_mem + 1];
    let mut mem_end_stk = vec![MemPtr::Invalid; num_mem + 1];
    let mut repeat_stk = vec![0usize; reg.num_repeat];

    let mut p: usize = 0;
    let mut s = sstart;
    let mut sprev = in_sprev;
    let mut keep = sstart;
    let mut best_len = MISMATCH;
    let mut right_range = in_right_range.min(end);
    let mut right_range_index: Option<usize> = None;

    macro_rules! tri {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(code) => return code,
            }
        };
    }

    loop {
        let Some(op) = reg.ops.get(p) else {
            return ERR_UNDEFINED_BYTECODE;
        };
        let sbegin = s;
        let mut fail = false;

        match op {
            Op::Finish => break,

            Op::End => {
                let n = (s as i64 - sstart as i64) as i32;
                if n > best_len {
                    let record = if msa.options.contains(Options::FIND_LONGEST) {
                        if n > msa.best_len {
                            msa.best_len = n;
                            msa.best_s = sstart;
                            true
                        } else {
                            false
                        }
                    } else {
                        true
                    };

                    if record {
                        best_len = n;
                        if keep > s {
                            keep = s;
                        }
                        if let Some(region) = msa.region.as_deref_mut() {
                            if region.num_regs != num_mem + 1 {
                                region.resize(num_mem + 1);
                            }
                            region.beg[0] = keep as i32;
                            region.end[0] = s as i32;
                            for i in 1..=num_mem {
                                match (
                                    resolve(&stack, mem_start_stk[i]),
                                    resolve(&stack, mem_end_stk[i]),
                                ) {
                                    (Some(b), Some(e)) => {
                                        region.beg[i] = b as i32;
                                        region.end[i] = e as i32;
                                    }
                                    _ => {
                                        region.beg[i] = NOTPOS;
                                        region.end[i] = NOTPOS;
                                    }
                                }
                            }

                            if reg.capture_history != 0 {
                                let mut root = CaptureTreeNode::new();
                                root.group = 0;
                                root.beg = keep as i32;
                                root.end = s as i32;
                                let mut cursor = 0usize;
                                make_capture_history_tree(
                                    &mut root,
                                    &mut cursor,
                                    stack.len(),
                                    &stack,
                                    reg,
                                );
                                region.history_root = Some(Box::new(root));
                            }
                        }
                    }
                }

                if msa.options.contains(Options::FIND_NOT_EMPTY) && s == sstart {
                    best_len = MISMATCH;
                    fail = true;
                } else if msa.options.contains(Options::FIND_LONGEST) && s < right_range {
                    fail = true;
                }
                if !fail {
                    break;
                }
            }

            // === Literals ===
            Op::Str1(bytes) => {
                if s + 1 > right_range || data[s] != bytes[0] {
                    fail = true;
                } else {
                    s += 1;
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::Str2(bytes) => {
                if s + 2 > right_range || data[s..s + 2] != bytes[..] {
                    fail = true;
                } else {
                    sprev = s + 1;
                    s += 2;
                    p += 1;
                }
            }

            Op::Str3(bytes) => {
                if s + 3 > right_range || data[s..s + 3] != bytes[..] {
                    fail = true;
                } else {
                    sprev = s + 2;
                    s += 3;
                    p += 1;
                }
            }

            Op::Str4(bytes) => {
                if s + 4 > right_range || data[s..s + 4] != bytes[..] {
                    fail = true;
                } else {
                    sprev = s + 3;
                    s += 4;
                    p += 1;
                }
            }

            Op::Str5(bytes) => {
                if s + 5 > right_range || data[s..s + 5] != bytes[..] {
                    fail = true;
                } else {
                    sprev = s + 4;
                    s += 5;
                    p += 1;
                }
            }

            Op::StrN(bytes) => {
                let n = bytes.len();
                if s + n > right_range || data[s..s + n] != bytes[..] {
                    fail = true;
                } else {
                    s += n;
                    sprev = s - 1;
                    p += 1;
                }
            }

            Op::StrIc(folded) => {
                let mut buf = [0u8; CASE_FOLD_MAXLEN];
                let mut pi = 0;
                while pi < folded.len() {
                    if s + 1 > right_range {
                        fail = true;
                        break;
                    }
                    sprev = s;
                    let len = enc.mbc_case_fold(reg.case_fold_flag, &mut s, end, data, &mut buf);
                    if s > right_range
                        || pi + len > folded.len()
                        || buf[..len] != folded[pi..pi + len]
                    {
                        fail = true;
                        break;
                    }
                    pi += len;
                }
                if !fail {
                    p += 1;
                }
            }

            Op::StrMbN { enc_len, bytes } => {
                let n = bytes.len();
                if s + n > right_range || data[s..s + n] != bytes[..] {
                    fail = true;
                } else {
                    s += n;
                    sprev = s - (*enc_len).max(1);
                    p += 1;
                }
            }

            // === Character classes ===
            Op::CClass(bs) => {
                if s + 1 > right_range || !bitset_at(bs, data[s] as usize) {
                    fail = true;
                } else {
                    s += enclen(enc, data, s);
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::CClassNot(bs) => {
                if s + 1 > right_range || bitset_at(bs, data[s] as usize) {
                    fail = true;
                } else {
                    s += enclen(enc, data, s);
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::CClassMb(ranges) => {
                if s >= right_range {
                    fail = true;
                } else {
                    let mb_len = enclen(enc, data, s);
                    if s + mb_len > right_range {
                        fail = true;
                    } else {
                        let code = enc.mbc_to_code(&data[s..], end);
                        if !code_range_contains(ranges, code) {
                            fail = true;
                        } else {
                            s += mb_len;
                            p += 1;
                            sprev = sbegin;
                        }
                    }
                }
            }

            Op::CClassMbNot(ranges) => {
                if s >= right_range {
                    fail = true;
                } else {
                    let mb_len = enclen(enc, data, s);
                    if s + mb_len > right_range {
                        fail = true;
                    } else {
                        let code = enc.mbc_to_code(&data[s..], end);
                        if code_range_contains(ranges, code) {
                            fail = true;
                        } else {
                            s += mb_len;
                            p += 1;
                            sprev = sbegin;
                        }
                    }
                }
            }

            Op::CClassMix { bs, ranges } | Op::CClassMixNot { bs, ranges } => {
                let not = matches!(op, Op::CClassMixNot { .. });
                if s >= right_range {
                    fail = true;
                } else {
                    let mb_len = enclen(enc, data, s);
                    if s + mb_len > right_range {
                        fail = true;
                    } else {
                        let in_class = if mb_len > 1 {
                            let code = enc.mbc_to_code(&data[s..], end);
                            code_range_contains(ranges, code)
                        } else {
                            bitset_at(bs, data[s] as usize)
                        };
                        if in_class == not {
                            fail = true;
                        } else {
                            s += mb_len;
                            p += 1;
                            sprev = sbegin;
                        }
                    }
                }
            }

            Op::CClassNode(set) => {
                if s >= right_range {
                    fail = true;
                } else {
                    let mb_len = enclen(enc, data, s);
                    if s + mb_len > right_range {
                        fail = true;
                    } else {
                        let code = enc.mbc_to_code(&data[s..], end);
                        if !set.contains(mb_len, code) {
                            fail = true;
                        } else {
                            s += mb_len;
                            p += 1;
                            sprev = sbegin;
                        }
                    }
                }
            }

            // === Any-char ===
            Op::AnyChar => {
                if s + 1 > right_range {
                    fail = true;
                } else {
                    let n = enclen(enc, data, s);
                    if s + n > right_range || enc.is_mbc_newline(&data[s..], end) {
                        fail = true;
                    } else {
                        s += n;
                        p += 1;
                        sprev = sbegin;
                    }
                }
            }

            Op::AnyCharMl => {
                if s + 1 > right_range {
                    fail = true;
                } else {
                    let n = enclen(enc, data, s);
                    if s + n > right_range {
                        fail = true;
                    } else {
                        s += n;
                        p += 1;
                        sprev = sbegin;
                    }
                }
            }

            Op::AnyCharStar => {
                while s < right_range {
                    tri!(stack.push_alt(p + 1, s, sprev));
                    let n = enclen(enc, data, s);
                    if s + n > right_range || enc.is_mbc_newline(&data[s..], end) {
                        fail = true;
                        break;
                    }
                    sprev = s;
                    s += n;
                }
                if !fail {
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::AnyCharMlStar => {
                while s < right_range {
                    tri!(stack.push_alt(p + 1, s, sprev));
                    let n = enclen(enc, data, s);
                    if s + n > right_range {
                        fail = true;
                        break;
                    }
                    sprev = s;
                    s += n;
                }
                if !fail {
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::AnyCharStarPeekNext(c) => {
                while s < right_range {
                    if data[s] == *c {
                        tri!(stack.push_alt(p + 1, s, sprev));
                    }
                    let n = enclen(enc, data, s);
                    if s + n > right_range || enc.is_mbc_newline(&data[s..], end) {
                        fail = true;
                        break;
                    }
                    sprev = s;
                    s += n;
                }
                if !fail {
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::AnyCharMlStarPeekNext(c) => {
                while s < right_range {
                    if data[s] == *c {
                        tri!(stack.push_alt(p + 1, s, sprev));
                    }
                    let n = enclen(enc, data, s);
                    if s + n > right_range {
                        fail = true;
                        break;
                    }
                    sprev = s;
                    s += n;
                }
                if !fail {
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::StateCheckAnyCharStar { snum } | Op::StateCheckAnyCharMlStar { snum } => {
                let ml = matches!(op, Op::StateCheckAnyCharMlStar { .. });
                let check = if msa.state_check.is_some() { *snum } else { 0 };
                while s < right_range {
                    if let Some(buff) = msa.state_check.as_ref() {
                        if buff.at(s, *snum) {
                            fail = true;
                            break;
                        }
                    }
                    tri!(stack.push(Frame::Alt {
                        pcode: p + 1,
                        pstr: s,
                        pstr_prev: sprev,
                        check,
                    }));
                    let n = enclen(enc, data, s);
                    if s + n > right_range || (!ml && enc.is_mbc_newline(&data[s..], end)) {
                        fail = true;
                        break;
                    }
                    sprev = s;
                    s += n;
                }
                if !fail {
                    p += 1;
                    sprev = sbegin;
                }
            }

            // === Word tests ===
            Op::Word => {
                if s >= right_range || !is_word_at(enc, data, s, end) {
                    fail = true;
                } else {
                    s += enclen(enc, data, s);
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::NotWord => {
                if s >= right_range || is_word_at(enc, data, s, end) {
                    fail = true;
                } else {
                    s += enclen(enc, data, s);
                    p += 1;
                    sprev = sbegin;
                }
            }

            Op::WordBound => {
                let bound = if s == 0 {
                    s < right_range && is_word_at(enc, data, s, end)
                } else if s >= end {
                    is_word_at(enc, data, sprev, end)
                } else {
                    is_word_at(enc, data, s, end) != is_word_at(enc, data, sprev, end)
                };
                if bound {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::NotWordBound => {
                let bound = if s == 0 {
                    s < right_range && is_word_at(enc, data, s, end)
                } else if s >= end {
                    is_word_at(enc, data, sprev, end)
                } else {
                    is_word_at(enc, data, s, end) != is_word_at(enc, data, sprev, end)
                };
                if bound {
                    fail = true;
                } else {
                    p += 1;
                }
            }

            Op::WordBegin => {
                if s < right_range
                    && is_word_at(enc, data, s, end)
                    && (s == 0 || !is_word_at(enc, data, sprev, end))
                {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::WordEnd => {
                if s != 0
                    && is_word_at(enc, data, sprev, end)
                    && (s >= end || !is_word_at(enc, data, s, end))
                {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            // === Anchors ===
            Op::BeginBuf => {
                if s != 0 {
                    fail = true;
                } else {
                    p += 1;
                }
            }

            Op::EndBuf => {
                if s != end {
                    fail = true;
                } else {
                    p += 1;
                }
            }

            Op::BeginLine => {
                if s == 0 {
                    if msa.options.contains(Options::NOTBOL) {
                        fail = true;
                    } else {
                        p += 1;
                    }
                } else if enc.is_mbc_newline(&data[sprev..], end) && s != end {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::EndLine => {
                if s == end {
                    if end == 0 || !enc.is_mbc_newline(&data[sprev..], end) {
                        if msa.options.contains(Options::NOTEOL) {
                            fail = true;
                        } else {
                            p += 1;
                        }
                    } else {
                        fail = true;
                    }
                } else if enc.is_mbc_newline(&data[s..], end) {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::SemiEndBuf => {
                if s == end {
                    if end == 0 || !enc.is_mbc_newline(&data[sprev..], end) {
                        if msa.options.contains(Options::NOTEOL) {
                            fail = true;
                        } else {
                            p += 1;
                        }
                    } else {
                        fail = true;
                    }
                } else if enc.is_mbc_newline(&data[s..], end) && s + enclen(enc, data, s) == end {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::BeginPosition => {
                if s != msa.start {
                    fail = true;
                } else {
                    p += 1;
                }
            }

            // === Capture bookkeeping ===
            Op::MemStart(num) => {
                mem_start_stk[*num] = MemPtr::Pos(s);
                p += 1;
            }

            Op::MemStartPush(num) => {
                let si = stack.len();
                tri!(stack.push(Frame::MemStart {
                    num: *num,
                    pstr: s,
                    prev_start: mem_start_stk[*num],
                    prev_end: mem_end_stk[*num],
                }));
                mem_start_stk[*num] = MemPtr::StackIdx(si);
                mem_end_stk[*num] = MemPtr::Invalid;
                p += 1;
            }

            Op::MemEnd(num) => {
                mem_end_stk[*num] = MemPtr::Pos(s);
                p += 1;
            }

            Op::MemEndPush(num) => {
                let si = stack.len();
                tri!(stack.push(Frame::MemEnd {
                    num: *num,
                    pstr: s,
                    prev_start: mem_start_stk[*num],
                    prev_end: mem_end_stk[*num],
                }));
                mem_end_stk[*num] = MemPtr::StackIdx(si);
                p += 1;
            }

            Op::MemEndPushRec(num) => {
                let start_si = tri!(stack.get_mem_start(*num));
                let si = stack.len();
                tri!(stack.push(Frame::MemEnd {
                    num: *num,
                    pstr: s,
                    prev_start: mem_start_stk[*num],
                    prev_end: mem_end_stk[*num],
                }));
                mem_end_stk[*num] = MemPtr::StackIdx(si);
                mem_start_stk[*num] = MemPtr::StackIdx(start_si);
                p += 1;
            }

            Op::MemEndRec(num) => {
                mem_end_stk[*num] = MemPtr::Pos(s);
                let start_si = tri!(stack.get_mem_start(*num));
                mem_start_stk[*num] = if mem_status_at(reg.bt_mem_start, *num) {
                    MemPtr::StackIdx(start_si)
                } else {
                    MemPtr::Pos(stack.mem_frame_pstr(start_si))
                };
                tri!(stack.push(Frame::MemEndMark { num: *num }));
                p += 1;
            }

            // === Back-references ===
            Op::Backref1 | Op::Backref2 | Op::BackrefN(_) => {
                let mem = match op {
                    Op::Backref1 => 1,
                    Op::Backref2 => 2,
                    Op::BackrefN(n) => *n,
                    _ => unreachable!(),
                };
                match (
                    resolve(&stack, mem_start_stk[mem]),
                    resolve(&stack, mem_end_stk[mem]),
                ) {
                    (Some(ps), Some(pe)) => {
                        let n = pe.saturating_sub(ps);
                        if s + n > right_range || data[s..s + n] != data[ps..ps + n] {
                            fail = true;
                        } else {
                            sprev = s;
                            s += n;
                            while sprev + enclen(enc, data, sprev) < s {
                                sprev += enclen(enc, data, sprev);
                            }
                            p += 1;
                        }
                    }
                    _ => fail = true,
                }
            }

            Op::BackrefNIc(mem) => {
                match (
                    resolve(&stack, mem_start_stk[*mem]),
                    resolve(&stack, mem_end_stk[*mem]),
                ) {
                    (Some(ps), Some(pe)) => {
                        let n = pe.saturating_sub(ps);
                        if s + n > right_range {
                            fail = true;
                        } else {
                            sprev = s;
                            if !string_cmp_ic(enc, reg.case_fold_flag, data, ps, &mut s, n) {
                                fail = true;
                            } else {
                                while sprev + enclen(enc, data, sprev) < s {
                                    sprev += enclen(enc, data, sprev);
                                }
                                p += 1;
                            }
                        }
                    }
                    _ => fail = true,
                }
            }

            Op::BackrefMulti(mems) | Op::BackrefMultiIc(mems) => {
                let ic = matches!(op, Op::BackrefMultiIc(_));
                let mut matched = false;
                for &mem in mems.iter() {
                    let (Some(ps), Some(pe)) = (
                        resolve(&stack, mem_start_stk[mem]),
                        resolve(&stack, mem_end_stk[mem]),
                    ) else {
                        continue;
                    };
                    let n = pe.saturating_sub(ps);
                    if s + n > right_range {
                        continue;
                    }
                    let mut swork = s;
                    let ok = if ic {
                        string_cmp_ic(enc, reg.case_fold_flag, data, ps, &mut swork, n)
                    } else {
                        swork += n;
                        data[s..s + n] == data[ps..ps + n]
                    };
                    if !ok {
                        continue;
                    }
                    sprev = s;
                    s = swork;
                    while sprev + enclen(enc, data, sprev) < s {
                        sprev += enclen(enc, data, sprev);
                    }
                    matched = true;
                    break;
                }
                if matched {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::BackrefCheck(mems) => {
                let found = mems.iter().any(|&mem| {
                    resolve(&stack, mem_start_stk[mem]).is_some()
                        && resolve(&stack, mem_end_stk[mem]).is_some()
                });
                if found {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::BackrefWithLevel { ignore_case, level, mems } => {
                sprev = s;
                if backref_match_at_nested_level(
                    reg,
                    &stack,
                    *ignore_case,
                    *level,
                    mems,
                    &mut s,
                    end,
                    data,
                ) {
                    while sprev + enclen(enc, data, sprev) < s {
                        sprev += enclen(enc, data, sprev);
                    }
                    p += 1;
                } else {
                    fail = true;
                }
            }

            Op::BackrefCheckWithLevel { level, mems } => {
                if backref_check_at_nested_level(&stack, *level, mems) {
                    p += 1;
                } else {
                    fail = true;
                }
            }

            // === Empty-loop guard ===
            Op::EmptyCheckStart(id) => {
                tri!(stack.push(Frame::EmptyCheckStart { num: *id, pstr: s }));
                p += 1;
            }

            Op::EmptyCheckEnd(id) => {
                let is_empty = tri!(stack.empty_check(*id, s));
                p += 1;
                if is_empty {
                    tri!(skip_loop_exit(reg, &mut p));
                }
            }

            Op::EmptyCheckEndMemst(id) => {
                let r = tri!(stack.empty_check_memst(*id, s));
                p += 1;
                if r == -1 {
                    fail = true;
                } else if r == 1 {
                    tri!(skip_loop_exit(reg, &mut p));
                }
            }

            Op::EmptyCheckEndMemstPush(id) => {
                let r = tri!(stack.empty_check_memst_rec(*id, s));
                p += 1;
                if r == -1 {
                    fail = true;
                } else if r == 1 {
                    tri!(skip_loop_exit(reg, &mut p));
                } else {
                    tri!(stack.push(Frame::EmptyCheckEnd { num: *id }));
                }
            }

            // === Control flow ===
            Op::Fail => fail = true,

            Op::Jump(addr) => {
                p = rel(p, *addr);
                if interrupt_requested() {
                    return ERR_INTERRUPTED;
                }
            }

            Op::Push(addr) => {
                tri!(stack.push_alt(rel(p, *addr), s, sprev));
                p += 1;
            }

            Op::Pop => {
                tri!(stack.pop_one());
                p += 1;
            }

            Op::PushOrJumpExact1 { addr, byte } => {
                if s < right_range && data[s] == *byte {
                    tri!(stack.push_alt(rel(p, *addr), s, sprev));
                    p += 1;
                } else {
                    p = rel(p, *addr);
                }
            }

            Op::PushIfPeekNext { addr, byte } => {
                if s < right_range && data[s] == *byte {
                    tri!(stack.push_alt(rel(p, *addr), s, sprev));
                }
                p += 1;
            }

            // === Counted repetition ===
            Op::Repeat { id, addr } => {
                let si = stack.len();
                repeat_stk[*id] = si;
                tri!(stack.push(Frame::Repeat { num: *id, pcode: p + 1, count: 0 }));
                if reg.repeat_range[*id].lower == 0 {
                    tri!(stack.push_alt(rel(p, *addr), s, sprev));
                }
                p += 1;
            }

            Op::RepeatNg { id, addr } => {
                let si = stack.len();
                repeat_stk[*id] = si;
                tri!(stack.push(Frame::Repeat { num: *id, pcode: p + 1, count: 0 }));
                if reg.repeat_range[*id].lower == 0 {
                    tri!(stack.push_alt(p + 1, s, sprev));
                    p = rel(p, *addr);
                } else {
                    p += 1;
                }
            }

            Op::RepeatInc(id) | Op::RepeatIncSg(id) => {
                let si = if matches!(op, Op::RepeatInc(_)) {
                    repeat_stk[*id]
                } else {
                    tri!(stack.get_repeat(*id))
                };
                let range = reg.repeat_range[*id];
                let (pcode, count) = stack.repeat_at(si);
                let count = count + 1;
                stack.repeat_set_count(si, count);

                if !is_infinite_repeat(range.upper) && count >= range.upper {
                    p += 1;
                } else if count >= range.lower {
                    tri!(stack.push_alt(p + 1, s, sprev));
                    p = pcode;
                } else {
                    p = pcode;
                }
                tri!(stack.push(Frame::RepeatInc { si }));
                if interrupt_requested() {
                    return ERR_INTERRUPTED;
                }
            }

            Op::RepeatIncNg(id) | Op::RepeatIncNgSg(id) => {
                let si = if matches!(op, Op::RepeatIncNg(_)) {
                    repeat_stk[*id]
                } else {
                    tri!(stack.get_repeat(*id))
                };
                let range = reg.repeat_range[*id];
                let (pcode, count) = stack.repeat_at(si);
                let count = count + 1;
                stack.repeat_set_count(si, count);

                if !is_infinite_repeat(range.upper) && count == range.upper {
                    tri!(stack.push(Frame::RepeatInc { si }));
                    p += 1;
                } else if count >= range.lower {
                    tri!(stack.push(Frame::RepeatInc { si }));
                    tri!(stack.push_alt(pcode, s, sprev));
                    p += 1;
                } else {
                    p = pcode;
                    tri!(stack.push(Frame::RepeatInc { si }));
                }
                if interrupt_requested() {
                    return ERR_INTERRUPTED;
                }
            }

            // === Look-around and atomic groups ===
            Op::PushPos => {
                tri!(stack.push(Frame::Pos { pstr: s, pstr_prev: sprev }));
                p += 1;
            }

            Op::PopPos => {
                let (pstr, pstr_prev) = tri!(stack.void_to_pos());
                s = pstr;
                sprev = pstr_prev;
                p += 1;
            }

            Op::PushPrecReadNot(addr) => {
                tri!(stack.push(Frame::AltPrecReadNot {
                    pcode: rel(p, *addr),
                    pstr: s,
                    pstr_prev: sprev,
                }));
                p += 1;
            }

            Op::FailPrecReadNot => {
                tri!(stack.pop_til_prec_read_not(
                    &mut mem_start_stk,
                    &mut mem_end_stk,
                    msa.state_check.as_mut(),
                ));
                fail = true;
            }

            Op::PushStopBt => {
                tri!(stack.push(Frame::StopBt));
                p += 1;
            }

            Op::PopStopBt => {
                tri!(stack.void_to_stop_bt());
                p += 1;
            }

            Op::LookBehind(char_len) => match step_back(enc, 0, s, data, *char_len) {
                Some(q) => {
                    s = q;
                    sprev = prev_char_head(enc, 0, s, data).unwrap_or(0);
                    p += 1;
                }
                None => fail = true,
            },

            Op::PushLookBehindNot { addr, char_len } => {
                match step_back(enc, 0, s, data, *char_len) {
                    None => {
                        // Too short to contain the forbidden text, so the
                        // negative assertion holds.
                        p = rel(p, *addr);
                    }
                    Some(q) => {
                        tri!(stack.push(Frame::AltLookBehindNot {
                            pcode: rel(p, *addr),
                            pstr: s,
                            pstr_prev: sprev,
                        }));
                        s = q;
                        sprev = prev_char_head(enc, 0, s, data).unwrap_or(0);
                        p += 1;
                    }
                }
            }

            Op::FailLookBehindNot => {
                tri!(stack.pop_til_look_behind_not(
                    &mut mem_start_stk,
                    &mut mem_end_stk,
                    msa.state_check.as_mut(),
                ));
                fail = true;
            }

            // === Subroutine calls ===
            Op::Call(addr) => {
                tri!(stack.push(Frame::CallFrame { ret_addr: p + 1 }));
                p = *addr;
            }

            Op::Return => {
                let ret = tri!(stack.return_addr());
                tri!(stack.push(Frame::Return));
                p = ret;
            }

            // === Save / update variables ===
            Op::PushSaveVal { kind, id } => {
                match kind {
                    SaveKind::Keep | SaveKind::S => {
                        tri!(stack.push(Frame::SaveVal { id: *id, kind: *kind, val: s }));
                    }
                    SaveKind::RightRange => {
                        right_range_index = Some(stack.len());
                        tri!(stack.push(Frame::SaveVal {
                            id: *id,
                            kind: SaveKind::RightRange,
                            val: right_range,
                        }));
                    }
                }
                p += 1;
            }

            Op::UpdateVar { kind, id } => {
                match kind {
                    UpdateVarKind::KeepFromStackLast => {
                        if let Some(v) = stack.save_val_type_last(SaveKind::Keep) {
                            keep = v;
                        }
                    }
                    UpdateVarKind::SFromStackLast => {
                        if let Some(v) = stack.save_val_last_id(SaveKind::S, *id) {
                            s = v;
                        }
                    }
                    UpdateVarKind::RightRangeFromStackLast => {
                        let from = match right_range_index {
                            Some(i) if i < stack.len() => i,
                            _ => stack.len() - 1,
                        };
                        if let Some(v) = stack.save_val_last_id_from(SaveKind::RightRange, *id, from)
                        {
                            right_range = v;
                        }
                    }
                    UpdateVarKind::RightRangeSprev => {
                        right_range = sprev;
                    }
                }
                p += 1;
            }

            // === State-check memoization ===
            Op::StateCheckPush { snum, addr } => {
                if msa.state_check.as_ref().is_some_and(|b| b.at(s, *snum)) {
                    fail = true;
                } else {
                    let check = if msa.state_check.is_some() { *snum } else { 0 };
                    tri!(stack.push(Frame::Alt {
                        pcode: rel(p, *addr),
                        pstr: s,
                        pstr_prev: sprev,
                        check,
                    }));
                    p += 1;
                }
            }

            Op::StateCheckPushOrJump { snum, addr } => {
                if msa.state_check.as_ref().is_some_and(|b| b.at(s, *snum)) {
                    p = rel(p, *addr);
                } else {
                    let check = if msa.state_check.is_some() { *snum } else { 0 };
                    tri!(stack.push(Frame::Alt {
                        pcode: rel(p, *addr),
                        pstr: s,
                        pstr_prev: sprev,
                        check,
                    }));
                    p += 1;
                }
            }

            Op::StateCheck { snum } => {
                if msa.state_check.as_ref().is_some_and(|b| b.at(s, *snum)) {
                    fail = true;
                } else {
                    if msa.state_check.is_some() {
                        tri!(stack.push(Frame::StateCheckMark { pstr: s, snum: *snum }));
                    }
                    p += 1;
                }
            }
        }

        if fail {
            let alt = tri!(stack.pop(
                pop_level,
                &mut mem_start_stk,
                &mut mem_end_stk,
                msa.state_check.as_mut(),
            ));
            if alt.pcode == FINISH_PCODE {
                break;
            }
            p = alt.pcode;
            s = alt.pstr;
            sprev = alt.pstr_prev;
        }
    }

    best_len
}

/// The instruction after an empty-check is the loop's continuation; when
/// the body matched empty it is skipped to break the loop. Anything else
/// there means the compiler and engine disagree.
fn skip_loop_exit(reg: &Program, p: &mut usize) -> Result<(), i32> {
    match reg.ops.get(*p) {
        Some(
            Op::Jump(_)
            | Op::Push(_)
            | Op::RepeatInc(_)
            | Op::RepeatIncNg(_)
            | Op::RepeatIncSg(_)
            | Op::RepeatIncNgSg(_),
        ) => {
            *p += 1;
            Ok(())
        }
        _ => Err(ERR_UNEXPECTED_BYTECODE),
    }
}

// === Public entry point ===

/// Try to match the program at exactly position `at`. Returns the match
/// length on success, `Ok(None)` on mismatch.
pub fn match_at_checked(
    reg: &Program,
    data: &[u8],
    at: usize,
    region: Option<&mut Region>,
    options: Options,
) -> Result<Option<usize>, EngineError> {
    let end = data.len();
    if at > end {
        return Err(EngineError::InvalidArgument);
    }

    let mut msa = MatchArg::new(reg, options, region, at);
    if let Some(r) = msa.region.as_deref_mut() {
        r.resize_clear(reg.num_mem + 1);
    }

    if msa.options.contains(Options::CHECK_VALIDITY_OF_STRING)
        && !reg.enc.is_valid_mbc_string(data)
    {
        return Err(EngineError::InvalidWideCharValue);
    }

    msa.init_state_check(reg, end);

    let sprev = prev_char_head(reg.enc, 0, at, data).unwrap_or(0);
    let r = match_at(reg, data, end, end, at, sprev, &mut msa);
    into_result(r)
}
