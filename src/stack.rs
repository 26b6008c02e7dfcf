// stack.rs - The backtrack stack: typed frames, leveled pops, directed
// pops and the balanced searches used by subroutine-aware opcodes.
//
// Frames are addressed by index, never by reference, so growth can move
// the storage freely. The bottom frame is always the finish sentinel;
// running past it is reported as ERR_STACK_BUG.

use smallvec::SmallVec;

use crate::defs::*;
use crate::program::{PopLevel, SaveKind};

/// Alt target of the bottom sentinel: "stop, no more alternatives".
pub(crate) const FINISH_PCODE: usize = usize::MAX;

/// A capture endpoint slot: unset, a raw input position, or an index of
/// the stack frame that recorded it (for groups the compiler marked as
/// backtrack-tracked).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MemPtr {
    Invalid,
    Pos(usize),
    StackIdx(usize),
}

#[derive(Clone, Debug)]
pub(crate) enum Frame {
    /// Choice point. `check` is a state-check site id (0 = none); on pop
    /// it turns into a `StateCheckMark` so the failed (position, site)
    /// pair gets recorded.
    Alt { pcode: usize, pstr: usize, pstr_prev: usize, check: usize },
    /// Choice point terminating a negative look-ahead.
    AltPrecReadNot { pcode: usize, pstr: usize, pstr_prev: usize },
    /// Choice point terminating a negative look-behind.
    AltLookBehindNot { pcode: usize, pstr: usize, pstr_prev: usize },
    /// Saved position for a positive look-ahead.
    Pos { pstr: usize, pstr_prev: usize },
    /// Atomic-group sentinel.
    StopBt,
    MemStart { num: usize, pstr: usize, prev_start: MemPtr, prev_end: MemPtr },
    MemEnd { num: usize, pstr: usize, prev_start: MemPtr, prev_end: MemPtr },
    /// Balances MemStart for the level-counting walks inside recursion.
    MemEndMark { num: usize },
    /// Active counted-repetition site.
    Repeat { num: usize, pcode: usize, count: i32 },
    /// One recorded increment of the Repeat frame at index `si`.
    RepeatInc { si: usize },
    EmptyCheckStart { num: usize, pstr: usize },
    EmptyCheckEnd { num: usize },
    CallFrame { ret_addr: usize },
    Return,
    SaveVal { id: usize, kind: SaveKind, val: usize },
    /// Pending memo of a failed state-check position; consumed by pops.
    StateCheckMark { pstr: usize, snum: usize },
    Void,
}

impl Frame {
    /// Frames a directed void-walk may overwrite (choice points, empty
    /// checks and pending state-check marks). Bookkeeping frames stay so
    /// later balanced walks and restorations still see them.
    #[inline]
    fn is_void_target(&self) -> bool {
        matches!(
            self,
            Frame::Alt { .. }
                | Frame::AltPrecReadNot { .. }
                | Frame::AltLookBehindNot { .. }
                | Frame::EmptyCheckStart { .. }
                | Frame::EmptyCheckEnd { .. }
                | Frame::StateCheckMark { .. }
        )
    }
}

/// Values restored from a popped choice point.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AltRestore {
    pub pcode: usize,
    pub pstr: usize,
    pub pstr_prev: usize,
}

/// Memoization bitmap: one bit per (input position, state-check site).
pub(crate) struct StateCheckBuff {
    bits: Vec<u8>,
    num_sites: usize,
}

impl StateCheckBuff {
    /// Allocate a bitmap for `str_len + 1` positions, or `None` when the
    /// pattern has no sites, the input is below the activation threshold,
    /// or the bitmap would exceed its size cap.
    pub fn new(str_len: usize, num_sites: usize) -> Option<StateCheckBuff> {
        if num_sites == 0 || str_len < STATE_CHECK_STRING_THRESHOLD_LEN {
            return None;
        }
        let size = ((str_len + 1) * num_sites + 7) >> 3;
        if size == 0 || size >= STATE_CHECK_BUFF_MAX_SIZE {
            return None;
        }
        Some(StateCheckBuff { bits: vec![0; size], num_sites })
    }

    #[inline]
    fn bit_pos(&self, pstr: usize, snum: usize) -> usize {
        pstr * self.num_sites + (snum - 1)
    }

    #[inline]
    pub fn at(&self, pstr: usize, snum: usize) -> bool {
        let x = self.bit_pos(pstr, snum);
        (self.bits[x / 8] & (1 << (x % 8))) != 0
    }

    #[inline]
    pub fn set(&mut self, pstr: usize, snum: usize) {
        let x = self.bit_pos(pstr, snum);
        self.bits[x / 8] |= 1 << (x % 8);
    }
}

pub(crate) struct BtStack {
    frames: SmallVec<[Frame; INIT_MATCH_STACK_SIZE]>,
    limit: usize,
}

impl BtStack {
    /// A fresh stack carrying the finish sentinel. The frame limit is
    /// sampled once per match.
    pub fn new() -> BtStack {
        let mut stack = BtStack {
            frames: SmallVec::new(),
            limit: match_stack_limit() as usize,
        };
        stack.frames.push(Frame::Alt {
            pcode: FINISH_PCODE,
            pstr: 0,
            pstr_prev: 0,
            check: 0,
        });
        stack
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn frame(&self, i: usize) -> &Frame {
        &self.frames[i]
    }

    #[inline]
    pub fn push(&mut self, frame: Frame) -> Result<(), i32> {
        if self.limit != 0 && self.frames.len() >= self.limit {
            return Err(ERR_MATCH_STACK_LIMIT_OVER);
        }
        self.frames.push(frame);
        Ok(())
    }

    #[inline]
    pub fn push_alt(&mut self, pcode: usize, pstr: usize, pstr_prev: usize) -> Result<(), i32> {
        self.push(Frame::Alt { pcode, pstr, pstr_prev, check: 0 })
    }

    /// Discard the top frame (OP_POP).
    pub fn pop_one(&mut self) -> Result<(), i32> {
        self.frames.pop().ok_or(ERR_STACK_BUG)?;
        Ok(())
    }

    /// Read `(pcode, count)` of the Repeat frame at `si`.
    pub fn repeat_at(&self, si: usize) -> (usize, i32) {
        match self.frames[si] {
            Frame::Repeat { pcode, count, .. } => (pcode, count),
            _ => unreachable!("repeat index does not address a Repeat frame"),
        }
    }

    pub fn repeat_set_count(&mut self, si: usize, n: i32) {
        if let Frame::Repeat { count, .. } = &mut self.frames[si] {
            *count = n;
        }
    }

    /// Position recorded by the MemStart/MemEnd frame at `si`.
    pub fn mem_frame_pstr(&self, si: usize) -> usize {
        match self.frames[si] {
            Frame::MemStart { pstr, .. } | Frame::MemEnd { pstr, .. } => pstr,
            _ => unreachable!("mem index does not address a capture frame"),
        }
    }

    // === Backtrack pop ===

    /// Pop until a choice point, reverting bookkeeping according to
    /// `pop_level` and recording failed state checks on the way down.
    pub fn pop(
        &mut self,
        pop_level: PopLevel,
        mem_start_stk: &mut [MemPtr],
        mem_end_stk: &mut [MemPtr],
        mut state: Option<&mut StateCheckBuff>,
    ) -> Result<AltRestore, i32> {
        loop {
            let frame = self.frames.pop().ok_or(ERR_STACK_BUG)?;
            match frame {
                Frame::Alt { pcode, pstr, pstr_prev, check } => {
                    if check != 0 {
                        // Leave the failed (position, site) pair as a mark;
                        // a later pop through it commits the memo bit.
                        self.frames.push(Frame::StateCheckMark { pstr, snum: check });
                    }
                    return Ok(AltRestore { pcode, pstr, pstr_prev });
                }
                Frame::AltPrecReadNot { pcode, pstr, pstr_prev }
                | Frame::AltLookBehindNot { pcode, pstr, pstr_prev } => {
                    return Ok(AltRestore { pcode, pstr, pstr_prev });
                }
                Frame::StateCheckMark { pstr, snum } => {
                    if let Some(buff) = state.as_deref_mut() {
                        buff.set(pstr, snum);
                    }
                }
                Frame::MemStart { num, prev_start, prev_end, .. } => {
                    if pop_level != PopLevel::Free {
                        mem_start_stk[num] = prev_start;
                        mem_end_stk[num] = prev_end;
                    }
                }
                Frame::MemEnd { num, prev_start, prev_end, .. } => {
                    if pop_level == PopLevel::All {
                        mem_start_stk[num] = prev_start;
                        mem_end_stk[num] = prev_end;
                    }
                }
                Frame::RepeatInc { si } => {
                    if pop_level == PopLevel::All {
                        if let Frame::Repeat { count, .. } = &mut self.frames[si] {
                            *count -= 1;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Pop until the choice point of a negative look-ahead, with full
    /// reversion regardless of the program's pop level.
    pub fn pop_til_prec_read_not(
        &mut self,
        mem_start_stk: &mut [MemPtr],
        mem_end_stk: &mut [MemPtr],
        state: Option<&mut StateCheckBuff>,
    ) -> Result<(), i32> {
        self.pop_til(mem_start_stk, mem_end_stk, state, false)
    }

    /// Pop until the choice point of a negative look-behind.
    pub fn pop_til_look_behind_not(
        &mut self,
        mem_start_stk: &mut [MemPtr],
        mem_end_stk: &mut [MemPtr],
        state: Option<&mut StateCheckBuff>,
    ) -> Result<(), i32> {
        self.pop_til(mem_start_stk, mem_end_stk, state, true)
    }

    fn pop_til(
        &mut self,
        mem_start_stk: &mut [MemPtr],
        mem_end_stk: &mut [MemPtr],
        mut state: Option<&mut StateCheckBuff>,
        look_behind: bool,
    ) -> Result<(), i32> {
        loop {
            let frame = self.frames.pop().ok_or(ERR_STACK_BUG)?;
            match frame {
                Frame::AltPrecReadNot { .. } if !look_behind => return Ok(()),
                Frame::AltLookBehindNot { .. } if look_behind => return Ok(()),
                Frame::StateCheckMark { pstr, snum } => {
                    if let Some(buff) = state.as_deref_mut() {
                        buff.set(pstr, snum);
                    }
                }
                Frame::MemStart { num, prev_start, prev_end, .. }
                | Frame::MemEnd { num, prev_start, prev_end, .. } => {
                    mem_start_stk[num] = prev_start;
                    mem_end_stk[num] = prev_end;
                }
                Frame::RepeatInc { si } => {
                    if let Frame::Repeat { count, .. } = &mut self.frames[si] {
                        *count -= 1;
                    }
                }
                _ => {}
            }
        }
    }

    // === Directed void-walks ===

    /// Close a positive look-ahead: void choice points down to the Pos
    /// frame and return its saved positions. The walk rewrites in place;
    /// the stack top does not move.
    pub fn void_to_pos(&mut self) -> Result<(usize, usize), i32> {
        for i in (0..self.frames.len()).rev() {
            if let Frame::Pos { pstr, pstr_prev } = self.frames[i] {
                self.frames[i] = Frame::Void;
                return Ok((pstr, pstr_prev));
            }
            if self.frames[i].is_void_target() {
                self.frames[i] = Frame::Void;
            }
        }
        Err(ERR_STACK_BUG)
    }

    /// Close an atomic group: void every choice point pushed inside it so
    /// nothing can backtrack back in.
    pub fn void_to_stop_bt(&mut self) -> Result<(), i32> {
        for i in (0..self.frames.len()).rev() {
            if let Frame::StopBt = self.frames[i] {
                self.frames[i] = Frame::Void;
                return Ok(());
            }
            if self.frames[i].is_void_target() {
                self.frames[i] = Frame::Void;
            }
        }
        Err(ERR_STACK_BUG)
    }

    // === Balanced searches ===
    // Call frames and Return markers cancel in pairs so these walks see
    // the capture state of the dynamic level they started from.

    /// Frame index of the MemStart matching the innermost unbalanced
    /// occurrence of group `mnum`.
    pub fn get_mem_start(&self, mnum: usize) -> Result<usize, i32> {
        let mut level = 0i32;
        for i in (0..self.frames.len()).rev() {
            match &self.frames[i] {
                Frame::MemEnd { num, .. } | Frame::MemEndMark { num } if *num == mnum => {
                    level += 1;
                }
                Frame::MemStart { num, .. } if *num == mnum => {
                    if level == 0 {
                        return Ok(i);
                    }
                    level -= 1;
                }
                _ => {}
            }
        }
        Err(ERR_STACK_BUG)
    }

    /// Balanced span of group `mnum` recorded above frame `from`:
    /// `(start_pstr, end_pstr)` of the first balanced pair.
    pub fn get_mem_range(&self, from: usize, mnum: usize) -> Option<(usize, usize)> {
        let mut level = 0i32;
        let mut start = None;
        for i in from..self.frames.len() {
            match &self.frames[i] {
                Frame::MemStart { num, pstr, .. } if *num == mnum => {
                    if level == 0 {
                        start = Some(*pstr);
                    }
                    level += 1;
                }
                Frame::MemEnd { num, pstr, .. } if *num == mnum => {
                    level -= 1;
                    if level == 0 {
                        return start.map(|b| (b, *pstr));
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Index of the Repeat frame for site `id` at the current call level.
    pub fn get_repeat(&self, id: usize) -> Result<usize, i32> {
        let mut level = 0i32;
        for i in (0..self.frames.len()).rev() {
            match &self.frames[i] {
                Frame::Repeat { num, .. } => {
                    if level == 0 && *num == id {
                        return Ok(i);
                    }
                }
                Frame::CallFrame { .. } => level -= 1,
                Frame::Return => level += 1,
                _ => {}
            }
        }
        Err(ERR_STACK_BUG)
    }

    /// Return address of the innermost unbalanced call frame.
    pub fn return_addr(&self) -> Result<usize, i32> {
        let mut level = 0i32;
        for i in (0..self.frames.len()).rev() {
            match &self.frames[i] {
                Frame::CallFrame { ret_addr } => {
                    if level == 0 {
                        return Ok(*ret_addr);
                    }
                    level -= 1;
                }
                Frame::Return => level += 1,
                _ => {}
            }
        }
        Err(ERR_STACK_BUG)
    }

    // === Empty-check queries ===

    /// Plain empty check: did the loop body leave the position where the
    /// matching start frame recorded it?
    pub fn empty_check(&self, id: usize, s: usize) -> Result<bool, i32> {
        for i in (0..self.frames.len()).rev() {
            if let Frame::EmptyCheckStart { num, pstr } = &self.frames[i] {
                if *num == id {
                    return Ok(*pstr == s);
                }
            }
        }
        Err(ERR_STACK_BUG)
    }

    /// Capture-aware empty check. 0: the body made progress. 1: empty and
    /// no capture endpoint moved (break the loop). -1: position is the
    /// same but some capture moved (force a fail so the loop cannot spin
    /// on capture churn).
    pub fn empty_check_memst(&self, id: usize, s: usize) -> Result<i32, i32> {
        for i in (0..self.frames.len()).rev() {
            if let Frame::EmptyCheckStart { num, pstr } = &self.frames[i] {
                if *num == id {
                    if *pstr != s {
                        return Ok(0);
                    }
                    return Ok(self.empty_check_mem_scan(i, s));
                }
            }
        }
        Err(ERR_STACK_BUG)
    }

    /// Recursion-balanced variant of `empty_check_memst`; EmptyCheckEnd
    /// frames pushed by inner calls cancel their starts.
    pub fn empty_check_memst_rec(&self, id: usize, s: usize) -> Result<i32, i32> {
        let mut level = 0i32;
        for i in (0..self.frames.len()).rev() {
            match &self.frames[i] {
                Frame::EmptyCheckStart { num, pstr } if *num == id => {
                    if level == 0 {
                        if *pstr != s {
                            return Ok(0);
                        }
                        return Ok(self.empty_check_mem_scan(i, s));
                    }
                    level -= 1;
                }
                Frame::EmptyCheckEnd { num } if *num == id => level += 1,
                _ => {}
            }
        }
        Err(ERR_STACK_BUG)
    }

    /// Scan the capture frames recorded since the start frame at `klow`.
    /// Each MemStart carries the group's previous span; an unset or moved
    /// previous endpoint means the iteration changed capture state.
    fn empty_check_mem_scan(&self, klow: usize, s: usize) -> i32 {
        let mut isnull = 1;
        for i in klow + 1..self.frames.len() {
            if let Frame::MemStart { prev_start, prev_end, .. } = &self.frames[i] {
                let endp = match *prev_end {
                    MemPtr::Invalid => return 0,
                    MemPtr::Pos(p) => p,
                    MemPtr::StackIdx(si) => self.mem_frame_pstr(si),
                };
                let startp = match *prev_start {
                    MemPtr::Invalid => return 0,
                    MemPtr::Pos(p) => p,
                    MemPtr::StackIdx(si) => self.mem_frame_pstr(si),
                };
                if startp != endp {
                    return 0;
                } else if endp != s {
                    isnull = -1;
                }
            }
        }
        isnull
    }

    // === Saved-value lookups ===

    /// Most recent SaveVal of `kind`, any id, any level.
    pub fn save_val_type_last(&self, kind: SaveKind) -> Option<usize> {
        for frame in self.frames.iter().rev() {
            if let Frame::SaveVal { kind: k, val, .. } = frame {
                if *k == kind {
                    return Some(*val);
                }
            }
        }
        None
    }

    /// Most recent SaveVal of `kind` and `id` at the current call level.
    pub fn save_val_last_id(&self, kind: SaveKind, id: usize) -> Option<usize> {
        let mut level = 0i32;
        for frame in self.frames.iter().rev() {
            match frame {
                Frame::SaveVal { id: i, kind: k, val } if *k == kind && *i == id => {
                    if level == 0 {
                        return Some(*val);
                    }
                }
                Frame::CallFrame { .. } => level -= 1,
                Frame::Return => level += 1,
                _ => {}
            }
        }
        None
    }

    /// Most recent SaveVal of `kind` and `id` at or below frame `from`.
    pub fn save_val_last_id_from(&self, kind: SaveKind, id: usize, from: usize) -> Option<usize> {
        for i in (0..=from.min(self.frames.len().saturating_sub(1))).rev() {
            if let Frame::SaveVal { id: fid, kind: fkind, val } = &self.frames[i] {
                if *fkind == kind && *fid == id {
                    return Some(*val);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_mem_pair(stack: &mut BtStack, num: usize, beg: usize, end: usize) {
        stack
            .push(Frame::MemStart {
                num,
                pstr: beg,
                prev_start: MemPtr::Invalid,
                prev_end: MemPtr::Invalid,
            })
            .unwrap();
        stack
            .push(Frame::MemEnd {
                num,
                pstr: end,
                prev_start: MemPtr::Invalid,
                prev_end: MemPtr::Invalid,
            })
            .unwrap();
    }

    #[test]
    fn pop_stops_at_alt_and_restores_mem() {
        let mut stack = BtStack::new();
        let mut starts = vec![MemPtr::Invalid; 2];
        let mut ends = vec![MemPtr::Invalid; 2];

        stack.push_alt(7, 3, 2).unwrap();
        stack
            .push(Frame::MemStart {
                num: 1,
                pstr: 4,
                prev_start: MemPtr::Pos(9),
                prev_end: MemPtr::Pos(11),
            })
            .unwrap();
        starts[1] = MemPtr::StackIdx(stack.len() - 1);
        ends[1] = MemPtr::Invalid;

        let alt = stack
            .pop(PopLevel::All, &mut starts, &mut ends, None)
            .unwrap();
        assert_eq!((alt.pcode, alt.pstr, alt.pstr_prev), (7, 3, 2));
        assert_eq!(starts[1], MemPtr::Pos(9));
        assert_eq!(ends[1], MemPtr::Pos(11));
    }

    #[test]
    fn pop_free_skips_restoration() {
        let mut stack = BtStack::new();
        let mut starts = vec![MemPtr::Invalid; 2];
        let mut ends = vec![MemPtr::Invalid; 2];

        stack.push_alt(7, 3, 0).unwrap();
        stack
            .push(Frame::MemStart {
                num: 1,
                pstr: 4,
                prev_start: MemPtr::Pos(9),
                prev_end: MemPtr::Pos(11),
            })
            .unwrap();
        starts[1] = MemPtr::StackIdx(stack.len() - 1);

        stack.pop(PopLevel::Free, &mut starts, &mut ends, None).unwrap();
        assert_eq!(starts[1], MemPtr::StackIdx(2));
    }

    #[test]
    fn pop_all_unwinds_repeat_counts() {
        let mut stack = BtStack::new();
        let mut starts = vec![MemPtr::Invalid; 1];
        let mut ends = vec![MemPtr::Invalid; 1];

        stack.push(Frame::Repeat { num: 0, pcode: 5, count: 0 }).unwrap();
        let si = stack.len() - 1;
        stack.push_alt(9, 0, 0).unwrap();
        stack.repeat_set_count(si, 3);
        stack.push(Frame::RepeatInc { si }).unwrap();

        stack.pop(PopLevel::All, &mut starts, &mut ends, None).unwrap();
        assert_eq!(stack.repeat_at(si), (5, 2));
    }

    #[test]
    fn pop_past_bottom_is_stack_bug() {
        let mut stack = BtStack::new();
        let mut starts: Vec<MemPtr> = Vec::new();
        let mut ends: Vec<MemPtr> = Vec::new();
        // Pop the sentinel itself...
        let alt = stack.pop(PopLevel::All, &mut starts, &mut ends, None).unwrap();
        assert_eq!(alt.pcode, FINISH_PCODE);
        // ...and past it.
        assert_eq!(
            stack.pop(PopLevel::All, &mut starts, &mut ends, None).unwrap_err(),
            ERR_STACK_BUG
        );
    }

    #[test]
    fn push_respects_limit() {
        let old = match_stack_limit();
        set_match_stack_limit(4);
        let mut stack = BtStack::new();
        // Sentinel occupies one slot; three pushes hit the ceiling.
        stack.push_alt(0, 0, 0).unwrap();
        stack.push_alt(0, 0, 0).unwrap();
        stack.push_alt(0, 0, 0).unwrap();
        assert_eq!(stack.push_alt(0, 0, 0).unwrap_err(), ERR_MATCH_STACK_LIMIT_OVER);
        set_match_stack_limit(old);
    }

    #[test]
    fn void_to_stop_bt_kills_choice_points() {
        let mut stack = BtStack::new();
        stack.push(Frame::StopBt).unwrap();
        stack.push_alt(3, 0, 0).unwrap();
        stack.push(Frame::MemEndMark { num: 1 }).unwrap();
        stack.void_to_stop_bt().unwrap();

        assert!(matches!(stack.frame(1), Frame::Void));
        assert!(matches!(stack.frame(2), Frame::Void));
        // Bookkeeping frames survive the cut.
        assert!(matches!(stack.frame(3), Frame::MemEndMark { num: 1 }));
    }

    #[test]
    fn void_to_pos_returns_saved_positions() {
        let mut stack = BtStack::new();
        stack.push(Frame::Pos { pstr: 5, pstr_prev: 4 }).unwrap();
        stack.push_alt(3, 9, 8).unwrap();
        let (pstr, pstr_prev) = stack.void_to_pos().unwrap();
        assert_eq!((pstr, pstr_prev), (5, 4));
        assert!(matches!(stack.frame(1), Frame::Void));
    }

    #[test]
    fn balanced_mem_start_skips_inner_recursion() {
        let mut stack = BtStack::new();
        stack
            .push(Frame::MemStart {
                num: 1,
                pstr: 0,
                prev_start: MemPtr::Invalid,
                prev_end: MemPtr::Invalid,
            })
            .unwrap();
        let outer = stack.len() - 1;
        // Inner completed occurrence of the same group.
        push_mem_pair(&mut stack, 1, 2, 3);
        assert_eq!(stack.get_mem_start(1).unwrap(), outer);
    }

    #[test]
    fn get_mem_range_finds_balanced_pair() {
        let mut stack = BtStack::new();
        push_mem_pair(&mut stack, 2, 1, 6);
        assert_eq!(stack.get_mem_range(0, 2), Some((1, 6)));
        assert_eq!(stack.get_mem_range(0, 3), None);
    }

    #[test]
    fn return_addr_balances_call_frames() {
        let mut stack = BtStack::new();
        stack.push(Frame::CallFrame { ret_addr: 10 }).unwrap();
        stack.push(Frame::CallFrame { ret_addr: 20 }).unwrap();
        stack.push(Frame::Return).unwrap();
        // The Return cancels the inner call; the walk lands on ret 10.
        assert_eq!(stack.return_addr().unwrap(), 10);
    }

    #[test]
    fn get_repeat_honors_call_level() {
        let mut stack = BtStack::new();
        stack.push(Frame::Repeat { num: 0, pcode: 2, count: 1 }).unwrap();
        let outer = stack.len() - 1;
        stack.push(Frame::CallFrame { ret_addr: 9 }).unwrap();
        stack.push(Frame::Return).unwrap();
        assert_eq!(stack.get_repeat(0).unwrap(), outer);
    }

    #[test]
    fn empty_check_reads_matching_start() {
        let mut stack = BtStack::new();
        stack.push(Frame::EmptyCheckStart { num: 0, pstr: 4 }).unwrap();
        assert!(stack.empty_check(0, 4).unwrap());
        assert!(!stack.empty_check(0, 5).unwrap());
        assert_eq!(stack.empty_check(1, 4).unwrap_err(), ERR_STACK_BUG);
    }

    #[test]
    fn empty_check_memst_tri_state() {
        // Same position, no captures since the start: truly empty.
        let mut stack = BtStack::new();
        stack.push(Frame::EmptyCheckStart { num: 0, pstr: 4 }).unwrap();
        assert_eq!(stack.empty_check_memst(0, 4).unwrap(), 1);
        assert_eq!(stack.empty_check_memst(0, 6).unwrap(), 0);

        // A group captured for the first time inside the body: progress.
        stack
            .push(Frame::MemStart {
                num: 1,
                pstr: 4,
                prev_start: MemPtr::Invalid,
                prev_end: MemPtr::Invalid,
            })
            .unwrap();
        assert_eq!(stack.empty_check_memst(0, 4).unwrap(), 0);

        // Previous span empty but elsewhere: empty with capture movement.
        let mut stack = BtStack::new();
        stack.push(Frame::EmptyCheckStart { num: 0, pstr: 4 }).unwrap();
        stack
            .push(Frame::MemStart {
                num: 1,
                pstr: 4,
                prev_start: MemPtr::Pos(2),
                prev_end: MemPtr::Pos(2),
            })
            .unwrap();
        assert_eq!(stack.empty_check_memst(0, 4).unwrap(), -1);
    }

    #[test]
    fn save_val_lookups() {
        let mut stack = BtStack::new();
        stack.push(Frame::SaveVal { id: 0, kind: SaveKind::Keep, val: 3 }).unwrap();
        stack.push(Frame::SaveVal { id: 1, kind: SaveKind::S, val: 8 }).unwrap();
        stack.push(Frame::SaveVal { id: 0, kind: SaveKind::Keep, val: 5 }).unwrap();
        let top = stack.len() - 1;

        assert_eq!(stack.save_val_type_last(SaveKind::Keep), Some(5));
        assert_eq!(stack.save_val_last_id(SaveKind::S, 1), Some(8));
        assert_eq!(stack.save_val_last_id(SaveKind::S, 2), None);
        assert_eq!(stack.save_val_last_id_from(SaveKind::Keep, 0, top - 1), Some(3));
    }

    #[test]
    fn state_check_buff_thresholds() {
        assert!(StateCheckBuff::new(3, 1).is_none()); // input too short
        assert!(StateCheckBuff::new(40, 0).is_none()); // no sites
        assert!(StateCheckBuff::new(1 << 20, 4).is_none()); // over the cap
        let mut buff = StateCheckBuff::new(16, 2).unwrap();
        assert!(!buff.at(3, 2));
        buff.set(3, 2);
        assert!(buff.at(3, 2));
        assert!(!buff.at(3, 1));
        assert!(!buff.at(4, 2));
    }

    #[test]
    fn pop_commits_state_check_marks() {
        let mut stack = BtStack::new();
        let mut buff = StateCheckBuff::new(16, 1).unwrap();
        let mut starts: Vec<MemPtr> = Vec::new();
        let mut ends: Vec<MemPtr> = Vec::new();

        stack.push_alt(2, 0, 0).unwrap();
        stack.push(Frame::StateCheckMark { pstr: 6, snum: 1 }).unwrap();
        stack
            .pop(PopLevel::All, &mut starts, &mut ends, Some(&mut buff))
            .unwrap();
        assert!(buff.at(6, 1));
    }

    #[test]
    fn popped_checked_alt_leaves_mark() {
        let mut stack = BtStack::new();
        let mut starts: Vec<MemPtr> = Vec::new();
        let mut ends: Vec<MemPtr> = Vec::new();

        stack.push(Frame::Alt { pcode: 2, pstr: 6, pstr_prev: 5, check: 1 }).unwrap();
        stack.pop(PopLevel::All, &mut starts, &mut ends, None).unwrap();
        assert!(matches!(stack.frame(1), Frame::StateCheckMark { pstr: 6, snum: 1 }));
    }
}
