// search.rs - Prefix scanners and the outer search drivers.
//
// The scanners are pure byte-range searches that locate candidate start
// positions; the driver trims the candidate range with the program's
// anchor summary, walks it forward or backward, and hands each candidate
// to the interpreter.

use memchr::memchr_iter;

use crate::defs::*;
use crate::encoding::*;
use crate::error::EngineError;
use crate::exec::{match_at, MatchArg};
use crate::program::{OptimizeKind, Program};
use crate::region::Region;

/// Byte-level skipping is only sound when scan positions cannot land
/// inside a character: single-byte encodings trivially, ASCII-compatible
/// self-synchronizing ones because a compiled literal starts on a
/// character head.
#[inline]
fn byte_scan_ok(enc: EncodingRef) -> bool {
    is_singlebyte(enc) || is_ascii_compatible(enc)
}

// === Forward scanners ===

fn slow_search(
    enc: EncodingRef,
    target: &[u8],
    data: &[u8],
    text: usize,
    text_end: usize,
    text_range: usize,
) -> Option<usize> {
    let mut end = text_end.checked_sub(target.len().checked_sub(1)?)?;
    if end > text_range {
        end = text_range;
    }
    if end <= text {
        return None;
    }

    if byte_scan_ok(enc) {
        for off in memchr_iter(target[0], &data[text..end]) {
            let s = text + off;
            if data[s..s + target.len()] == *target {
                return Some(s);
            }
        }
        return None;
    }

    let mut s = text;
    while s < end {
        if data[s] == target[0] && data[s + 1..s + target.len()] == target[1..] {
            return Some(s);
        }
        s += enclen(enc, data, s);
    }
    None
}

/// Fold the input at `p` character-by-character and compare against the
/// pre-folded `target` bytes.
fn str_lower_case_match(
    enc: EncodingRef,
    case_fold_flag: CaseFoldType,
    data: &[u8],
    target: &[u8],
    mut p: usize,
    end: usize,
) -> bool {
    let mut buf = [0u8; CASE_FOLD_MAXLEN];
    let mut ti = 0;
    while ti < target.len() {
        if p >= end {
            return false;
        }
        let len = enc.mbc_case_fold(case_fold_flag, &mut p, end, data, &mut buf);
        if ti + len > target.len() || buf[..len] != target[ti..ti + len] {
            return false;
        }
        ti += len;
    }
    true
}

fn slow_search_ic(
    enc: EncodingRef,
    case_fold_flag: CaseFoldType,
    target: &[u8],
    data: &[u8],
    text: usize,
    text_end: usize,
    text_range: usize,
) -> Option<usize> {
    let mut end = text_end.checked_sub(target.len().checked_sub(1)?)?;
    if end > text_range {
        end = text_range;
    }

    let mut s = text;
    while s < end {
        if str_lower_case_match(enc, case_fold_flag, data, target, s, text_end) {
            return Some(s);
        }
        s += enclen(enc, data, s);
    }
    None
}

/// Boyer–Moore over a region where every byte position is a valid
/// character boundary; skips by the tail-byte shift table.
fn bm_search(
    reg: &Program,
    target: &[u8],
    data: &[u8],
    text: usize,
    text_end: usize,
    text_range: usize,
) -> Option<usize> {
    let tail = target.len() - 1;
    let mut end = text_range + tail;
    if end > text_end {
        end = text_end;
    }

    let mut s = text + tail;
    while s < end {
        let mut p = s;
        let mut t = tail;
        while data[p] == target[t] {
            if t == 0 {
                return Some(p);
            }
            p -= 1;
            t -= 1;
        }
        s += match &reg.int_map {
            Some(int_map) => int_map[data[s] as usize] as usize,
            None => reg.map[data[s] as usize] as usize,
        };
    }
    None
}

/// Boyer–Moore for multibyte regions that cannot be stepped backwards:
/// candidate starts advance character-wise, at least the shift distance.
fn bm_search_notrev(
    reg: &Program,
    target: &[u8],
    data: &[u8],
    text: usize,
    text_end: usize,
    text_range: usize,
) -> Option<usize> {
    let enc = reg.enc;
    let tlen1 = target.len() - 1;
    let mut end = text_range;
    if end + tlen1 > text_end {
        end = text_end.checked_sub(tlen1)?;
    }

    let mut s = text;
    while s < end {
        let se = s + tlen1;
        let mut p = se;
        let mut t = tlen1;
        loop {
            if data[p] != target[t] {
                break;
            }
            if t == 0 {
                return Some(s);
            }
            p -= 1;
            t -= 1;
        }
        let skip = match &reg.int_map {
            Some(int_map) => int_map[data[se] as usize] as usize,
            None => reg.map[data[se] as usize] as usize,
        };
        let from = s;
        loop {
            s += enclen(enc, data, s);
            if s - from >= skip || s >= end {
                break;
            }
        }
    }
    None
}

fn map_search(
    enc: EncodingRef,
    map: &[u8; 256],
    data: &[u8],
    text: usize,
    text_range: usize,
) -> Option<usize> {
    let mut s = text;
    while s < text_range {
        if map[data[s] as usize] != 0 {
            return Some(s);
        }
        s += enclen(enc, data, s);
    }
    None
}

// === Backward scanners ===

fn slow_search_backward(
    enc: EncodingRef,
    target: &[u8],
    data: &[u8],
    text: usize,
    adjust_text: usize,
    text_end: usize,
    text_start: usize,
) -> Option<usize> {
    let mut s = text_end.checked_sub(target.len())?;
    if s > text_start {
        s = text_start;
    } else {
        s = enc.left_adjust_char_head(adjust_text, s, data);
    }

    loop {
        if s < text {
            return None;
        }
        if s + target.len() <= text_end && data[s..s + target.len()] == *target {
            return Some(s);
        }
        s = prev_char_head(enc, adjust_text, s, data)?;
    }
}

fn slow_search_backward_ic(
    enc: EncodingRef,
    case_fold_flag: CaseFoldType,
    target: &[u8],
    data: &[u8],
    text: usize,
    adjust_text: usize,
    text_end: usize,
    text_start: usize,
) -> Option<usize> {
    let mut s = text_end.checked_sub(target.len())?;
    if s > text_start {
        s = text_start;
    } else {
        s = enc.left_adjust_char_head(adjust_text, s, data);
    }

    loop {
        if s < text {
            return None;
        }
        if str_lower_case_match(enc, case_fold_flag, data, target, s, text_end) {
            return Some(s);
        }
        s = prev_char_head(enc, adjust_text, s, data)?;
    }
}

fn map_search_backward(
    enc: EncodingRef,
    map: &[u8; 256],
    data: &[u8],
    text: usize,
    adjust_text: usize,
    text_start: usize,
) -> Option<usize> {
    let mut s = text_start;
    loop {
        if s < text {
            return None;
        }
        if s < data.len() && map[data[s] as usize] != 0 {
            return Some(s);
        }
        s = prev_char_head(enc, adjust_text, s, data)?;
    }
}

// === Candidate ranges ===

struct CandidateRange {
    low: usize,
    high: usize,
    low_prev: Option<usize>,
}

/// Locate the next candidate window `[low, high]` for the match start at
/// or after `s`, using the program's prefix hint. `None` means no
/// further candidate exists in the range.
fn forward_search_range(
    reg: &Program,
    data: &[u8],
    end: usize,
    s: usize,
    range: usize,
) -> Option<CandidateRange> {
    let enc = reg.enc;
    let dmin = reg.dist_min as usize;

    let mut p = s;
    if dmin > 0 {
        if is_singlebyte(enc) {
            p += dmin;
        } else {
            let q = p + dmin;
            if q >= end {
                return None;
            }
            while p < q {
                p += enclen(enc, data, p);
            }
        }
    }

    let mut pprev: Option<usize> = None;
    loop {
        let found = match reg.optimize {
            OptimizeKind::ExactStr => slow_search(enc, &reg.exact, data, p, end, range),
            OptimizeKind::ExactStrIc => {
                slow_search_ic(enc, reg.case_fold_flag, &reg.exact, data, p, end, range)
            }
            OptimizeKind::ExactBm => bm_search(reg, &reg.exact, data, p, end, range),
            OptimizeKind::ExactBmNotRev => bm_search_notrev(reg, &reg.exact, data, p, end, range),
            OptimizeKind::Map => map_search(enc, &reg.map, data, p, range),
            OptimizeKind::None => None,
        }?;
        if found >= range {
            return None;
        }

        let mut retry = found < s + dmin;

        if !retry && !reg.sub_anchor.is_empty() {
            if reg.sub_anchor.contains(Anchors::BEGIN_LINE) {
                if found != 0 {
                    let prev = prev_char_head(enc, pprev.unwrap_or(0), found, data)?;
                    if !enc.is_mbc_newline(&data[prev..], end) {
                        retry = true;
                    }
                }
            } else if reg.sub_anchor.contains(Anchors::END_LINE) {
                if found == end {
                    let prev = prev_char_head(enc, pprev.unwrap_or(0), found, data);
                    if let Some(prev) = prev {
                        if enc.is_mbc_newline(&data[prev..], end) {
                            retry = true;
                        }
                    }
                } else if !enc.is_mbc_newline(&data[found..], end) {
                    retry = true;
                }
            }
        }

        if retry {
            pprev = Some(found);
            p = found + enclen(enc, data, found);
            continue;
        }

        let high = found - dmin;
        if reg.dist_max == 0 {
            let low_prev = if found > s {
                prev_char_head(enc, s, found, data)
            } else {
                prev_char_head(enc, pprev.unwrap_or(0), found, data)
            };
            return Some(CandidateRange { low: found, high, low_prev });
        }
        if reg.dist_max == INFINITE_DISTANCE {
            // Existence check only; the caller scans from its own start.
            return Some(CandidateRange { low: s, high, low_prev: None });
        }

        let dmax = reg.dist_max as usize;
        if found < dmax {
            return Some(CandidateRange { low: 0, high, low_prev: None });
        }
        let mut low = found - dmax;
        let low_prev = if low > s {
            let (adj, mut prev) = right_adjust_char_head_with_prev(enc, s, low, data);
            low = adj;
            if prev.is_none() {
                prev = prev_char_head(enc, pprev.unwrap_or(s), low, data);
            }
            prev
        } else {
            prev_char_head(enc, pprev.unwrap_or(0), low, data)
        };
        return Some(CandidateRange { low, high, low_prev });
    }
}

/// Backward twin: candidate window for a backward walk starting at `s`.
fn backward_search_range(
    reg: &Program,
    data: &[u8],
    end: usize,
    s: usize,
    range: usize,
    adjrange: usize,
) -> Option<(usize, usize)> {
    let enc = reg.enc;
    let range = range + reg.dist_min as usize;

    let mut p = s;
    loop {
        let found = match reg.optimize {
            OptimizeKind::ExactStr | OptimizeKind::ExactBm | OptimizeKind::ExactBmNotRev => {
                // The wide backward skip table is not built; the slow
                // scan bounds the work instead.
                slow_search_backward(enc, &reg.exact, data, range, adjrange, end, p)
            }
            OptimizeKind::ExactStrIc => slow_search_backward_ic(
                enc,
                reg.case_fold_flag,
                &reg.exact,
                data,
                range,
                adjrange,
                end,
                p,
            ),
            OptimizeKind::Map => map_search_backward(enc, &reg.map, data, range, adjrange, p),
            OptimizeKind::None => None,
        }?;

        if !reg.sub_anchor.is_empty() {
            if reg.sub_anchor.contains(Anchors::BEGIN_LINE) {
                if found != 0 {
                    let prev = prev_char_head(enc, 0, found, data)?;
                    if !enc.is_mbc_newline(&data[prev..], end) {
                        p = prev;
                        continue;
                    }
                }
            } else if reg.sub_anchor.contains(Anchors::END_LINE) {
                if found == end {
                    let prev = prev_char_head(enc, adjrange, found, data)?;
                    if enc.is_mbc_newline(&data[prev..], end) {
                        p = prev;
                        continue;
                    }
                } else if !enc.is_mbc_newline(&data[found..], end) {
                    p = prev_char_head(enc, adjrange, found, data)?;
                    continue;
                }
            }
        }

        if reg.dist_max != INFINITE_DISTANCE {
            let low = found.saturating_sub(reg.dist_max as usize);
            let high =
                right_adjust_char_head(enc, adjrange, found - reg.dist_min as usize, data);
            return Some((low, high));
        }
        return Some((found, found));
    }
}

// === Anchor-derived range trimming ===

/// Tighten `[start, range]` from the program's anchor summary, or report
/// that no position can match.
fn apply_anchor_trim(
    reg: &Program,
    data: &[u8],
    end: usize,
    mut start: usize,
    mut range: usize,
) -> Option<(usize, usize)> {
    let enc = reg.enc;
    let anchor = reg.anchor;

    let begin_position = |start: usize, range: usize| -> (usize, usize) {
        if range > start {
            (start, start + 1)
        } else {
            (start, start)
        }
    };

    if anchor.contains(Anchors::BEGIN_POSITION) || anchor.contains(Anchors::ANYCHAR_STAR_ML) {
        let (s, r) = begin_position(start, range);
        return Some((s, r));
    }

    if anchor.contains(Anchors::BEGIN_BUF) {
        if range > start {
            if start != 0 {
                return None;
            }
            return Some((0, 1));
        }
        if range == 0 {
            return Some((0, 0));
        }
        return None;
    }

    let (min_semi_end, max_semi_end) = if anchor.contains(Anchors::END_BUF) {
        (end, end)
    } else if anchor.contains(Anchors::SEMI_END_BUF) {
        let pre_end = step_back(enc, 0, end, data, 1);
        match pre_end {
            Some(pe) if enc.is_mbc_newline(&data[pe..], end) => {
                if pe > 0 && start <= pe {
                    (pe, end)
                } else {
                    return Some((start, range));
                }
            }
            _ => (end, end),
        }
    } else {
        return Some((start, range));
    };

    // end_buf: clamp both sides by the distance to the semi-end.
    let dmin = reg.anchor_dist_min as u64;
    let dmax = reg.anchor_dist_max as u64;

    if (max_semi_end as u64) < dmin {
        return None;
    }

    if range > start {
        if (min_semi_end - start) as u64 > dmax {
            start = min_semi_end - dmax as usize;
            if start < end {
                start = right_adjust_char_head(enc, 0, start, data);
            }
        }
        if ((max_semi_end - (range - 1)) as u64) < dmin {
            range = max_semi_end - dmin as usize + 1;
        }
        if start > range {
            return None;
        }
    } else {
        if (min_semi_end - range) as u64 > dmax {
            range = min_semi_end - dmax as usize;
        }
        if ((max_semi_end - start) as u64) < dmin {
            start = max_semi_end - dmin as usize;
            start = enc.left_adjust_char_head(0, start, data);
        }
        if range > start {
            return None;
        }
    }

    Some((start, range))
}

// === The search driver ===

fn search_inner(
    reg: &Program,
    data: &[u8],
    end: usize,
    start: usize,
    range: usize,
    msa: &mut MatchArg,
) -> i32 {
    let enc = reg.enc;

    macro_rules! try_match {
        ($s:expr, $sprev:expr) => {{
            let r = match_at(reg, data, end, end, $s, $sprev, msa);
            if r != MISMATCH {
                if r >= 0 {
                    if !msa.options.contains(Options::FIND_LONGEST) {
                        return $s as i32;
                    }
                } else {
                    return r;
                }
            }
        }};
    }

    if range > start {
        // Forward.
        let mut s = start;
        let mut sprev = prev_char_head(enc, 0, s, data).unwrap_or(0);

        if reg.optimize != OptimizeKind::None {
            if end - start < reg.threshold_len {
                return MISMATCH;
            }

            let mut sch_range = range;
            if reg.dist_max != 0 {
                sch_range = if reg.dist_max == INFINITE_DISTANCE {
                    end
                } else {
                    (range + reg.dist_max as usize).min(end)
                };
            }

            if reg.dist_max != INFINITE_DISTANCE {
                loop {
                    let Some(cand) = forward_search_range(reg, data, end, s, sch_range) else {
                        return MISMATCH;
                    };
                    if s < cand.low {
                        s = cand.low;
                        sprev = cand.low_prev.unwrap_or(0);
                    }
                    while s <= cand.high {
                        try_match!(s, sprev);
                        sprev = s;
                        s += enclen(enc, data, s);
                    }
                    if s >= range {
                        return MISMATCH;
                    }
                }
            }

            // Unbounded distance: a single existence check.
            if forward_search_range(reg, data, end, s, sch_range).is_none() {
                return MISMATCH;
            }

            if reg.anchor.contains(Anchors::ANYCHAR_STAR) {
                // The pattern starts with .*: only line starts can begin
                // a distinct match, so skip to just past each newline.
                loop {
                    try_match!(s, sprev);
                    sprev = s;
                    s += enclen(enc, data, s);
                    if !reg
                        .anchor
                        .intersects(Anchors::LOOK_BEHIND | Anchors::PREC_READ_NOT)
                    {
                        while !enc.is_mbc_newline(&data[sprev..], end) && s < range {
                            sprev = s;
                            s += enclen(enc, data, s);
                        }
                    }
                    if s >= range {
                        return MISMATCH;
                    }
                }
            }
        }

        loop {
            try_match!(s, sprev);
            sprev = s;
            s += enclen(enc, data, s);
            if s >= range {
                break;
            }
        }
        if s == range {
            // Zero-width match at the very end (/$/ and friends).
            try_match!(s, sprev);
        }
        MISMATCH
    } else {
        // Backward.
        let mut s = start;

        if reg.optimize != OptimizeKind::None {
            let adjrange = if range < end {
                enc.left_adjust_char_head(0, range, data)
            } else {
                end
            };

            if reg.dist_max != INFINITE_DISTANCE && end - range >= reg.threshold_len {
                loop {
                    let sch_start = (s + reg.dist_max as usize).min(end);
                    let Some((low, high)) =
                        backward_search_range(reg, data, end, sch_start, range, adjrange)
                    else {
                        return MISMATCH;
                    };
                    if s > high {
                        s = high;
                    }
                    loop {
                        if s < low {
                            break;
                        }
                        let sprev_opt = prev_char_head(enc, 0, s, data);
                        try_match!(s, sprev_opt.unwrap_or(0));
                        match sprev_opt {
                            Some(q) => s = q,
                            None => return MISMATCH,
                        }
                    }
                    if s < range {
                        return MISMATCH;
                    }
                }
            }

            if end - range < reg.threshold_len {
                return MISMATCH;
            }

            let mut sch_start = s;
            if reg.dist_max != 0 {
                if reg.dist_max == INFINITE_DISTANCE {
                    sch_start = end;
                } else {
                    sch_start += reg.dist_max as usize;
                    if sch_start > end {
                        sch_start = end;
                    } else {
                        sch_start = enc.left_adjust_char_head(start, sch_start, data);
                    }
                }
            }
            if backward_search_range(reg, data, end, sch_start, range, adjrange).is_none() {
                return MISMATCH;
            }
        }

        loop {
            let sprev_opt = prev_char_head(enc, 0, s, data);
            try_match!(s, sprev_opt.unwrap_or(0));
            match sprev_opt {
                Some(q) if q >= range => s = q,
                _ => break,
            }
        }
        MISMATCH
    }
}

/// Search for a match inside `[start, range]`. `range > start` scans
/// forward, `range < start` backward; `range == start` permits only a
/// zero-width match at `start`. Returns the match start offset.
pub fn search(
    reg: &Program,
    data: &[u8],
    start: usize,
    range: usize,
    mut region: Option<&mut Region>,
    options: Options,
) -> Result<Option<usize>, EngineError> {
    let end = data.len();

    if let Some(r) = region.as_deref_mut() {
        r.resize_clear(reg.num_mem + 1);
    }

    if start > end || range > end {
        return Ok(None);
    }

    let all_options = options | reg.options;
    if all_options.contains(Options::CHECK_VALIDITY_OF_STRING)
        && !reg.enc.is_valid_mbc_string(data)
    {
        return Err(EngineError::InvalidWideCharValue);
    }

    // Anchor trimming; an untrimmable range is a plain mismatch.
    let (start, range) = if !reg.anchor.is_empty() && end > 0 {
        match apply_anchor_trim(reg, data, end, start, range) {
            Some(sr) => sr,
            None => return Ok(None),
        }
    } else if end == 0 {
        // Empty input only matches programs that need no bytes at all.
        if reg.threshold_len != 0 {
            return Ok(None);
        }
        (start, range)
    } else {
        (start, range)
    };

    let orig_start = start;
    let mut msa = MatchArg::new(reg, options, region, orig_start);
    msa.init_state_check(reg, end);

    let r = search_inner(reg, data, end, start, range, &mut msa);

    if r == MISMATCH && msa.options.contains(Options::FIND_LONGEST) && msa.best_len >= 0 {
        return Ok(Some(msa.best_s));
    }

    if r < 0 && msa.options.contains(Options::FIND_NOT_EMPTY) {
        if let Some(reg_out) = msa.region.as_deref_mut() {
            reg_out.clear();
        }
    }

    if r >= 0 {
        Ok(Some(r as usize))
    } else if r == MISMATCH {
        Ok(None)
    } else {
        Err(EngineError::from(r))
    }
}

/// Repeatedly search and report every match through `callback`
/// `(match_index, match_start, region)`. A `false` return stops the scan
/// early. Guarantees progress over zero-width matches by advancing one
/// character. Returns the number of callback invocations.
pub fn scan<F>(
    reg: &Program,
    data: &[u8],
    region: &mut Region,
    options: Options,
    mut callback: F,
) -> Result<usize, EngineError>
where
    F: FnMut(usize, usize, &Region) -> bool,
{
    let enc = reg.enc;
    let end = data.len();
    let mut options = options;

    if (options | reg.options).contains(Options::CHECK_VALIDITY_OF_STRING) {
        if !enc.is_valid_mbc_string(data) {
            return Err(EngineError::InvalidWideCharValue);
        }
        options.remove(Options::CHECK_VALIDITY_OF_STRING);
    }

    let mut n = 0;
    let mut start = 0usize;
    loop {
        match search(reg, data, start, end, Some(region), options)? {
            Some(pos) => {
                let keep_going = callback(n, pos, region);
                n += 1;
                if !keep_going {
                    return Ok(n);
                }

                if region.end[0] as usize == start {
                    if start >= end {
                        break;
                    }
                    start += enclen(enc, data, start);
                } else {
                    start = region.end[0] as usize;
                }
                if start > end {
                    break;
                }
            }
            None => break,
        }
    }
    Ok(n)
}
