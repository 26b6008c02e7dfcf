// defs.rs - Public flag types, error codes, sentinels and process-wide
// configuration of the match engine.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bitflags::bitflags;

// === Base types ===

pub type CodePoint = u32;
pub type CaseFoldType = u32;

/// Distance measured in bytes. `INFINITE_DISTANCE` means "unbounded".
pub type Distance = u32;

pub const INFINITE_DISTANCE: Distance = Distance::MAX;

/// Case folding of multi-character expansions (always requested by the
/// compiler; kept for interface compatibility with the fold callbacks).
pub const CASE_FOLD_MIN: CaseFoldType = 1 << 30;

/// Upper bound on the byte length of one case-folded character.
pub const CASE_FOLD_MAXLEN: usize = 18;

// === Results and sentinels ===

/// Internal "no match" result of the interpreter. Not an error.
pub const MISMATCH: i32 = -1;

/// Unset capture endpoint in a `Region`.
pub const NOTPOS: i32 = -1;

// === Error codes ===
// Negative and distinct from MISMATCH (-1 is reserved for it; real errors
// start at -3).

pub const ERR_INTERRUPTED: i32 = -3;
pub const ERR_MEMORY: i32 = -5;
pub const ERR_STACK_BUG: i32 = -12;
pub const ERR_UNDEFINED_BYTECODE: i32 = -13;
pub const ERR_UNEXPECTED_BYTECODE: i32 = -14;
pub const ERR_MATCH_STACK_LIMIT_OVER: i32 = -15;
pub const ERR_INVALID_ARGUMENT: i32 = -30;
pub const ERR_INVALID_WIDE_CHAR_VALUE: i32 = -400;

// === Tunables ===

/// Initial backtrack-stack capacity, in frames. Below this the stack
/// lives inline in the interpreter's own frame; it spills to the heap
/// beyond it.
pub const INIT_MATCH_STACK_SIZE: usize = 64;

/// Default match-stack limit: 0 = unlimited.
pub const DEFAULT_MATCH_STACK_LIMIT: u32 = 0;

/// State-check memoization only engages for inputs at least this long.
pub const STATE_CHECK_STRING_THRESHOLD_LEN: usize = 7;

/// State-check bitmaps larger than this are not allocated at all.
pub const STATE_CHECK_BUFF_MAX_SIZE: usize = 0x4000;

/// Infinite upper bound of a counted repetition.
pub const INFINITE_REPEAT: i32 = -1;

#[inline]
pub fn is_infinite_repeat(n: i32) -> bool {
    n == INFINITE_REPEAT
}

/// Group count cap for capture-history recording (one bit per group).
pub const MAX_CAPTURE_HISTORY_GROUP: usize = 31;

// === Options ===

bitflags! {
    /// Match-time option flags. Compile-time options (case folding,
    /// multiline) are baked into the program by the compiler; the engine
    /// only reacts to the flags below.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Options: u32 {
        /// `^` does not match at the start position.
        const NOTBOL = 1 << 0;
        /// `$` does not match at the end position.
        const NOTEOL = 1 << 1;
        /// Keep searching the whole range and report the longest match.
        const FIND_LONGEST = 1 << 2;
        /// Reject empty matches.
        const FIND_NOT_EMPTY = 1 << 3;
        /// Validate the input byte string against the encoding first.
        const CHECK_VALIDITY_OF_STRING = 1 << 4;
    }
}

impl Options {
    #[inline]
    pub fn find_condition(self) -> bool {
        self.intersects(Options::FIND_LONGEST | Options::FIND_NOT_EMPTY)
    }
}

// === Anchors ===

bitflags! {
    /// Anchor summary computed by the compiler, consumed by the search
    /// driver to trim the candidate range. `BEGIN_LINE` / `END_LINE` also
    /// appear in `Program::sub_anchor` as per-candidate filters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Anchors: u32 {
        const PREC_READ      = 1 << 0;
        const PREC_READ_NOT  = 1 << 1;
        const LOOK_BEHIND    = 1 << 2;
        const BEGIN_BUF      = 1 << 4;
        const BEGIN_LINE     = 1 << 5;
        const BEGIN_POSITION = 1 << 6;
        const END_BUF        = 1 << 7;
        const SEMI_END_BUF   = 1 << 8;
        const END_LINE       = 1 << 9;
        const ANYCHAR_STAR    = 1 << 14;
        const ANYCHAR_STAR_ML = 1 << 15;
    }
}

// === Process-wide configuration ===

static MATCH_STACK_LIMIT: AtomicU32 = AtomicU32::new(DEFAULT_MATCH_STACK_LIMIT);

/// Current backtrack-stack frame limit. 0 means unlimited.
pub fn match_stack_limit() -> u32 {
    MATCH_STACK_LIMIT.load(Ordering::Relaxed)
}

/// Set the backtrack-stack frame limit. Applies to matches started after
/// the store becomes visible.
pub fn set_match_stack_limit(size: u32) {
    MATCH_STACK_LIMIT.store(size, Ordering::Relaxed);
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Ask every in-flight match to abort with `ERR_INTERRUPTED` at its next
/// interrupt-check opcode (JUMP and the REPEAT_INC family).
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

#[inline]
pub(crate) fn interrupt_requested() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}
