// program.rs - The compiled form the engine executes: typed instructions,
// capture/repeat metadata and the prefix-optimization hints. Programs are
// produced by an external compiler and are read-only during matching.

use std::sync::Arc;

use crate::defs::*;
use crate::encoding::EncodingRef;

// === BitSet (256 bits for single-byte character classes) ===

pub const SINGLE_BYTE_SIZE: usize = 256;
pub const BITS_IN_ROOM: usize = 32;
pub const BITSET_REAL_SIZE: usize = SINGLE_BYTE_SIZE / BITS_IN_ROOM;

pub type BitSet = [u32; BITSET_REAL_SIZE];

#[inline]
pub fn bitset_at(bs: &BitSet, pos: usize) -> bool {
    (bs[pos >> 5] & (1u32 << (pos & 0x1f))) != 0
}

#[inline]
pub fn bitset_set(bs: &mut BitSet, pos: usize) {
    bs[pos >> 5] |= 1u32 << (pos & 0x1f);
}

// === Code point ranges (multibyte character classes) ===

/// Inclusive code point range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub from: CodePoint,
    pub to: CodePoint,
}

/// Binary search over a sorted, non-overlapping range table.
pub fn code_range_contains(ranges: &[CodeRange], code: CodePoint) -> bool {
    let mut low = 0;
    let mut high = ranges.len();
    while low < high {
        let mid = (low + high) >> 1;
        if code > ranges[mid].to {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low < ranges.len() && code >= ranges[low].from
}

/// Precomputed character-class set handed to `Op::CClassNode` as an
/// opaque shared object (large or shared classes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSet {
    pub bs: BitSet,
    pub ranges: Vec<CodeRange>,
    pub not: bool,
}

impl ClassSet {
    /// Membership test keyed by the encoded length of the character.
    pub fn contains(&self, enc_len: usize, code: CodePoint) -> bool {
        let found = if enc_len == 1 {
            bitset_at(&self.bs, code as usize & 0xff)
        } else {
            code_range_contains(&self.ranges, code)
        };
        found != self.not
    }
}

// === Mem status (one bit per group, bit 0 = "all groups") ===

pub type MemStatus = u32;

pub const MEM_STATUS_BITS_NUM: usize = 32;

#[inline]
pub fn mem_status_at(stats: MemStatus, n: usize) -> bool {
    if n < MEM_STATUS_BITS_NUM {
        (stats & (1u32 << n)) != 0
    } else {
        (stats & 1) != 0
    }
}

#[inline]
pub fn mem_status_on(stats: &mut MemStatus, n: usize) {
    if n < MEM_STATUS_BITS_NUM {
        if n != 0 {
            *stats |= 1u32 << n;
        }
    } else {
        *stats |= 1;
    }
}

// === Repetition ===

/// Bounds of one counted-repetition site. `upper == INFINITE_REPEAT`
/// means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatRange {
    pub lower: i32,
    pub upper: i32,
}

impl RepeatRange {
    #[inline]
    pub fn in_range(&self, count: i32) -> bool {
        count >= self.lower && (is_infinite_repeat(self.upper) || count < self.upper)
    }
}

// === Stack pop level ===

/// How much restoration a backtrack pop has to perform; chosen per
/// program by the compiler from the opcodes it emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopLevel {
    /// No group endpoints need reversion; discard frames blindly.
    Free,
    /// Restore capture slots from MemStart frames.
    MemStart,
    /// Restore from MemStart and MemEnd frames and unwind repeat counts.
    #[default]
    All,
}

// === Save / update kinds ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    /// Position of the keep mark (`\K`).
    Keep,
    /// A restart position.
    S,
    /// The effective upper input limit of the current attempt.
    RightRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateVarKind {
    KeepFromStackLast,
    SFromStackLast,
    RightRangeFromStackLast,
    RightRangeSprev,
}

// === Instructions ===

/// One instruction. Operands are typed fields; the program counter
/// advances by whole instructions and relative addresses are measured
/// from the instruction that carries them.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Exit the interpreter loop (bottom-sentinel target).
    Finish,
    /// Commit the current match, or keep going under FIND_LONGEST.
    End,

    // Literals. Str1..Str5 are the unrolled short forms.
    Str1([u8; 1]),
    Str2([u8; 2]),
    Str3([u8; 3]),
    Str4([u8; 4]),
    Str5([u8; 5]),
    StrN(Box<[u8]>),
    /// Case-insensitive literal: the program holds the folded bytes and
    /// the input is folded character-by-character during the compare.
    StrIc(Box<[u8]>),
    /// Multibyte literal: raw byte compare; `enc_len` is the per-character
    /// byte width (0 for mixed widths).
    StrMbN { enc_len: usize, bytes: Box<[u8]> },

    // Character classes.
    CClass(Box<BitSet>),
    CClassNot(Box<BitSet>),
    CClassMb(Box<[CodeRange]>),
    CClassMbNot(Box<[CodeRange]>),
    CClassMix { bs: Box<BitSet>, ranges: Box<[CodeRange]> },
    CClassMixNot { bs: Box<BitSet>, ranges: Box<[CodeRange]> },
    /// Precomputed shared class object.
    CClassNode(Arc<ClassSet>),

    // Any-char.
    AnyChar,
    AnyCharMl,
    AnyCharStar,
    AnyCharMlStar,
    AnyCharStarPeekNext(u8),
    AnyCharMlStarPeekNext(u8),

    // Word tests and boundaries (zero-width ones look back via sprev).
    Word,
    NotWord,
    WordBound,
    NotWordBound,
    WordBegin,
    WordEnd,

    // Position anchors.
    BeginBuf,
    EndBuf,
    BeginLine,
    EndLine,
    SemiEndBuf,
    BeginPosition,

    // Back-references.
    Backref1,
    Backref2,
    BackrefN(usize),
    BackrefNIc(usize),
    BackrefMulti(Box<[usize]>),
    BackrefMultiIc(Box<[usize]>),
    /// Existence-only test: succeeds if any listed group is defined.
    BackrefCheck(Box<[usize]>),
    /// Match against the capture at a dynamic subroutine nesting depth.
    BackrefWithLevel { ignore_case: bool, level: i32, mems: Box<[usize]> },
    BackrefCheckWithLevel { level: i32, mems: Box<[usize]> },

    // Capture bookkeeping.
    MemStart(usize),
    MemStartPush(usize),
    MemEnd(usize),
    MemEndPush(usize),
    /// Subroutine-body variants: keep the stack balanced for the
    /// level-counting walks.
    MemEndPushRec(usize),
    MemEndRec(usize),

    // Control flow.
    Fail,
    Jump(i32),
    Push(i32),
    Pop,
    PushOrJumpExact1 { addr: i32, byte: u8 },
    PushIfPeekNext { addr: i32, byte: u8 },

    // Counted repetition. `addr` targets the instruction after the body.
    Repeat { id: usize, addr: i32 },
    RepeatNg { id: usize, addr: i32 },
    RepeatInc(usize),
    RepeatIncNg(usize),
    /// Stack-search variants for use inside subroutine bodies.
    RepeatIncSg(usize),
    RepeatIncNgSg(usize),

    // Empty-loop guard.
    EmptyCheckStart(usize),
    EmptyCheckEnd(usize),
    EmptyCheckEndMemst(usize),
    EmptyCheckEndMemstPush(usize),

    // Look-around and atomic groups.
    PushPos,
    PopPos,
    PushPrecReadNot(i32),
    FailPrecReadNot,
    PushStopBt,
    PopStopBt,
    /// Step back `char_len` characters before running the look-behind body.
    LookBehind(usize),
    /// Negative look-behind. Stepping back past the start of input makes
    /// the assertion succeed (the "too short" case, e.g. `(?<!xxx)a`
    /// against `"a"`); matching the body makes it fail.
    PushLookBehindNot { addr: i32, char_len: usize },
    FailLookBehindNot,

    // Subroutine calls.
    Call(usize),
    Return,

    // Save/update variables (`\K`, restart positions, right range).
    PushSaveVal { kind: SaveKind, id: usize },
    UpdateVar { kind: UpdateVarKind, id: usize },

    // State-check memoization points.
    StateCheckPush { snum: usize, addr: i32 },
    StateCheckPushOrJump { snum: usize, addr: i32 },
    StateCheck { snum: usize },
    StateCheckAnyCharStar { snum: usize },
    StateCheckAnyCharMlStar { snum: usize },
}

// === Prefix optimization hints ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizeKind {
    #[default]
    None,
    /// Literal scan, character-stepped.
    ExactStr,
    /// Literal scan with case folding on both sides.
    ExactStrIc,
    /// Boyer–Moore over a reversible encoding region.
    ExactBm,
    /// Boyer–Moore variant for encodings that cannot step backwards.
    ExactBmNotRev,
    /// 256-entry first-byte filter.
    Map,
}

// === Program ===

/// A compiled regex program plus everything the engine needs to run it.
/// All fields are written by the compiler and read-only during matching.
pub struct Program {
    pub ops: Vec<Op>,

    // Capture / repeat metadata.
    pub num_mem: usize,
    pub num_repeat: usize,
    pub num_empty_check: usize,
    pub num_call: usize,
    pub num_state_checks: usize,
    pub repeat_range: Vec<RepeatRange>,
    /// Groups whose endpoints may be rewound by backtracking and are
    /// therefore tracked through stack frames.
    pub bt_mem_start: MemStatus,
    pub bt_mem_end: MemStatus,
    /// Groups whose dynamic nesting is recorded in the history tree.
    pub capture_history: MemStatus,
    pub pop_level: PopLevel,

    // Execution environment.
    pub enc: EncodingRef,
    pub options: Options,
    pub case_fold_flag: CaseFoldType,

    // Prefix hints.
    pub optimize: OptimizeKind,
    pub threshold_len: usize,
    pub anchor: Anchors,
    pub anchor_dist_min: Distance,
    pub anchor_dist_max: Distance,
    pub sub_anchor: Anchors,
    pub exact: Vec<u8>,
    /// First-byte filter for `Map`, or the byte-skip table for BM.
    pub map: [u8; SINGLE_BYTE_SIZE],
    /// Wide BM skip table for literals whose shifts overflow a byte.
    pub int_map: Option<Box<[i32; SINGLE_BYTE_SIZE]>>,
    pub dist_min: Distance,
    pub dist_max: Distance,
}

impl Program {
    /// An empty program for the given encoding; the compiler (or a test)
    /// fills in the rest.
    pub fn new(enc: EncodingRef) -> Self {
        Program {
            ops: Vec::new(),
            num_mem: 0,
            num_repeat: 0,
            num_empty_check: 0,
            num_call: 0,
            num_state_checks: 0,
            repeat_range: Vec::new(),
            bt_mem_start: 0,
            bt_mem_end: 0,
            capture_history: 0,
            pop_level: PopLevel::default(),
            enc,
            options: Options::empty(),
            case_fold_flag: CASE_FOLD_MIN,
            optimize: OptimizeKind::None,
            threshold_len: 0,
            anchor: Anchors::empty(),
            anchor_dist_min: 0,
            anchor_dist_max: 0,
            sub_anchor: Anchors::empty(),
            exact: Vec::new(),
            map: [0u8; SINGLE_BYTE_SIZE],
            int_map: None,
            dist_min: 0,
            dist_max: 0,
        }
    }

    pub fn encoding(&self) -> EncodingRef {
        self.enc
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn case_fold_flag(&self) -> CaseFoldType {
        self.case_fold_flag
    }

    pub fn number_of_captures(&self) -> usize {
        self.num_mem
    }

    pub fn number_of_capture_histories(&self) -> usize {
        (0..=MAX_CAPTURE_HISTORY_GROUP)
            .filter(|&i| mem_status_at(self.capture_history, i))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encodings::ASCII;

    #[test]
    fn bitset_ops() {
        let mut bs: BitSet = [0; BITSET_REAL_SIZE];
        bitset_set(&mut bs, b'a' as usize);
        bitset_set(&mut bs, 255);
        assert!(bitset_at(&bs, b'a' as usize));
        assert!(bitset_at(&bs, 255));
        assert!(!bitset_at(&bs, b'b' as usize));
    }

    #[test]
    fn code_range_lookup() {
        let ranges = [
            CodeRange { from: 0x100, to: 0x1ff },
            CodeRange { from: 0x3041, to: 0x3096 },
        ];
        assert!(code_range_contains(&ranges, 0x100));
        assert!(code_range_contains(&ranges, 0x1ff));
        assert!(code_range_contains(&ranges, 0x3042));
        assert!(!code_range_contains(&ranges, 0x200));
        assert!(!code_range_contains(&ranges, 0xff));
        assert!(!code_range_contains(&ranges, 0x3097));
        assert!(!code_range_contains(&[], 0x41));
    }

    #[test]
    fn class_set_negation() {
        let mut bs: BitSet = [0; BITSET_REAL_SIZE];
        bitset_set(&mut bs, b'x' as usize);
        let set = ClassSet { bs, ranges: vec![CodeRange { from: 0x3041, to: 0x3096 }], not: true };
        assert!(!set.contains(1, b'x' as u32));
        assert!(set.contains(1, b'y' as u32));
        assert!(!set.contains(3, 0x3042));
        assert!(set.contains(3, 0x4000));
    }

    #[test]
    fn mem_status_group_zero_means_all() {
        let mut st: MemStatus = 0;
        mem_status_on(&mut st, 40);
        assert!(mem_status_at(st, 40));
        assert!(mem_status_at(st, 77));
        assert!(!mem_status_at(st, 3));
        mem_status_on(&mut st, 3);
        assert!(mem_status_at(st, 3));
    }

    #[test]
    fn repeat_range_bounds() {
        let r = RepeatRange { lower: 2, upper: 4 };
        assert!(!r.in_range(1));
        assert!(r.in_range(2));
        assert!(r.in_range(3));
        assert!(!r.in_range(4));
        let inf = RepeatRange { lower: 0, upper: INFINITE_REPEAT };
        assert!(inf.in_range(1_000_000));
    }

    #[test]
    fn capture_history_count() {
        let mut prog = Program::new(&ASCII);
        mem_status_on(&mut prog.capture_history, 1);
        mem_status_on(&mut prog.capture_history, 3);
        assert_eq!(prog.number_of_capture_histories(), 2);
    }
}
