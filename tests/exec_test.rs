// Interpreter scenarios over hand-assembled programs: captures,
// backtracking, look-around, atomic groups, repetition, subroutines,
// empty-loop guards and state-check memoization.

mod common;

use common::*;
use onibi::defs::INFINITE_REPEAT;
use onibi::program::{mem_status_on, Op, SaveKind, UpdateVarKind};
use onibi::{capture_tree_traverse, match_at_checked, region::TRAVERSE_CALLBACK_AT_FIRST, search, EngineError, Options};

// ^a(b+)c$ against "abbbc": whole match plus the greedy group span.
#[test]
fn anchored_greedy_plus_with_capture() {
    let mut reg = prog(vec![
        Op::BeginLine,
        Op::Str1(*b"a"),
        Op::MemStartPush(1),
        Op::Repeat { id: 0, addr: 3 }, // loop exit -> 6
        Op::Str1(*b"b"),
        Op::RepeatInc(0),
        Op::MemEndPush(1),
        Op::Str1(*b"c"),
        Op::EndLine,
        Op::End,
    ]);
    with_groups(&mut reg, 1);
    with_repeat(&mut reg, 1, INFINITE_REPEAT);

    let mut r = region();
    let pos = search(&reg, b"abbbc", 0, 5, Some(&mut r), Options::empty()).unwrap();
    assert_eq!(pos, Some(0));
    assert_eq!(span(&r, 0), (0, 5));
    assert_eq!(span(&r, 1), (1, 4));

    assert_eq!(search(&reg, b"ac", 0, 2, None, Options::empty()).unwrap(), None);
}

// (a|ab)c against "abc": the first alternative wins a then loses on c,
// the second alternative wins after backtracking.
#[test]
fn alternation_backtracks_into_second_branch() {
    let mut reg = prog(vec![
        Op::MemStartPush(1),
        Op::Push(3), // alt -> 4
        Op::Str1(*b"a"),
        Op::Jump(3), // -> 6
        Op::Str1(*b"a"),
        Op::Str1(*b"b"),
        Op::MemEndPush(1),
        Op::Str1(*b"c"),
        Op::End,
    ]);
    with_groups(&mut reg, 1);

    let mut r = region();
    let len = match_at_checked(&reg, b"abc", 0, Some(&mut r), Options::empty()).unwrap();
    assert_eq!(len, Some(3));
    assert_eq!(span(&r, 0), (0, 3));
    assert_eq!(span(&r, 1), (0, 2));
}

// (a*)*b against "aaaab": the capture-aware empty check breaks the outer
// loop once an iteration is empty with unchanged captures.
#[test]
fn empty_loop_guard_terminates_nested_star() {
    let mut reg = prog(vec![
        Op::Push(9), // outer exit -> 9
        Op::EmptyCheckStart(0),
        Op::MemStartPush(1),
        Op::Push(3), // inner exit -> 6
        Op::Str1(*b"a"),
        Op::Jump(-2), // -> 3
        Op::MemEndPush(1),
        Op::EmptyCheckEndMemst(0),
        Op::Jump(-8), // -> 0
        Op::Str1(*b"b"),
        Op::End,
    ]);
    with_groups(&mut reg, 1);
    reg.num_empty_check = 1;

    let mut r = region();
    let len = match_at_checked(&reg, b"aaaab", 0, Some(&mut r), Options::empty()).unwrap();
    assert_eq!(len, Some(5));
    assert_eq!(span(&r, 0), (0, 5));
    // The last completed iteration captured the empty string at the end
    // of the run of a's.
    assert_eq!(span(&r, 1), (4, 4));
}

// The plain (positionless) empty check breaks a capture-free loop.
#[test]
fn empty_loop_guard_plain() {
    let mut reg = prog(vec![
        Op::Push(6), // exit -> 6
        Op::EmptyCheckStart(0),
        Op::Push(2), // a? alt -> 4
        Op::Str1(*b"a"),
        Op::EmptyCheckEnd(0),
        Op::Jump(-5), // -> 0
        Op::End,
    ]);
    reg.num_empty_check = 1;

    // (a?)* over plain a's must terminate and consume them all.
    assert_eq!(match_at_checked(&reg, b"aaa", 0, None, Options::empty()).unwrap(), Some(3));
    assert_eq!(match_at_checked(&reg, b"", 0, None, Options::empty()).unwrap(), Some(0));
}

// (?>a|ab)c: the atomic group commits to "a"; no backtracking into the
// alternation is possible, so "abc" cannot match.
#[test]
fn atomic_group_cuts_alternatives() {
    let reg = prog(vec![
        Op::PushStopBt,
        Op::Push(3), // alt -> 4
        Op::Str1(*b"a"),
        Op::Jump(3), // -> 6
        Op::Str1(*b"a"),
        Op::Str1(*b"b"),
        Op::PopStopBt,
        Op::Str1(*b"c"),
        Op::End,
    ]);

    assert_eq!(match_at_checked(&reg, b"abc", 0, None, Options::empty()).unwrap(), None);
    assert_eq!(match_at_checked(&reg, b"ac", 0, None, Options::empty()).unwrap(), Some(2));
}

// (?<=foo)bar searched in "foobar" from offset 3.
#[test]
fn look_behind_matches_behind_start() {
    let reg = prog(vec![
        Op::LookBehind(3),
        Op::Str3(*b"foo"),
        Op::Str3(*b"bar"),
        Op::End,
    ]);

    let mut r = region();
    let pos = search(&reg, b"foobar", 3, 6, Some(&mut r), Options::empty()).unwrap();
    assert_eq!(pos, Some(3));
    assert_eq!(span(&r, 0), (3, 6));
}

// a(b)\1 against "abb" and "abc".
#[test]
fn back_reference_matches_captured_text() {
    let mut reg = prog(vec![
        Op::Str1(*b"a"),
        Op::MemStartPush(1),
        Op::Str1(*b"b"),
        Op::MemEndPush(1),
        Op::Backref1,
        Op::End,
    ]);
    with_groups(&mut reg, 1);

    let mut r = region();
    let len = match_at_checked(&reg, b"abb", 0, Some(&mut r), Options::empty()).unwrap();
    assert_eq!(len, Some(3));
    assert_eq!(span(&r, 0), (0, 3));
    assert_eq!(span(&r, 1), (1, 2));

    assert_eq!(match_at_checked(&reg, b"abc", 0, None, Options::empty()).unwrap(), None);
}

// A back-reference to a group that never matched is a mismatch, not an
// error.
#[test]
fn back_reference_to_undefined_group_mismatches() {
    let mut reg = prog(vec![Op::Str1(*b"x"), Op::BackrefN(1), Op::End]);
    with_groups(&mut reg, 1);

    assert_eq!(match_at_checked(&reg, b"xx", 0, None, Options::empty()).unwrap(), None);
}

// Case-insensitive back-reference.
#[test]
fn back_reference_ignore_case() {
    let mut reg = prog(vec![
        Op::MemStartPush(1),
        Op::Str1(*b"a"),
        Op::Str1(*b"b"),
        Op::MemEndPush(1),
        Op::BackrefNIc(1),
        Op::End,
    ]);
    with_groups(&mut reg, 1);

    assert_eq!(match_at_checked(&reg, b"abAB", 0, None, Options::empty()).unwrap(), Some(4));
    assert_eq!(match_at_checked(&reg, b"abAx", 0, None, Options::empty()).unwrap(), None);
}

// Multi-group back-reference: the first defined and matching group wins.
#[test]
fn back_reference_multi_takes_first_defined() {
    let mut reg = prog(vec![
        Op::MemStartPush(2),
        Op::Str1(*b"b"),
        Op::MemEndPush(2),
        Op::BackrefMulti(vec![1, 2].into()),
        Op::End,
    ]);
    with_groups(&mut reg, 2);

    assert_eq!(match_at_checked(&reg, b"bb", 0, None, Options::empty()).unwrap(), Some(2));
    assert_eq!(match_at_checked(&reg, b"bc", 0, None, Options::empty()).unwrap(), None);
}

// Existence-only check: (?(1)...) style tests consume nothing.
#[test]
fn back_reference_check_consumes_nothing() {
    let mut reg = prog(vec![
        Op::MemStartPush(1),
        Op::Str1(*b"a"),
        Op::MemEndPush(1),
        Op::BackrefCheck(vec![1].into()),
        Op::Str1(*b"b"),
        Op::End,
    ]);
    with_groups(&mut reg, 1);
    assert_eq!(match_at_checked(&reg, b"ab", 0, None, Options::empty()).unwrap(), Some(2));

    // Group never closes: the check fails the match.
    let mut reg = prog(vec![
        Op::BackrefCheck(vec![1].into()),
        Op::End,
    ]);
    with_groups(&mut reg, 1);
    assert_eq!(match_at_checked(&reg, b"ab", 0, None, Options::empty()).unwrap(), None);
}

// (?=ab)a: the look-ahead matches and the position rewinds.
#[test]
fn positive_look_ahead() {
    let reg = prog(vec![
        Op::PushPos,
        Op::Str2(*b"ab"),
        Op::PopPos,
        Op::Str1(*b"a"),
        Op::End,
    ]);

    assert_eq!(match_at_checked(&reg, b"ab", 0, None, Options::empty()).unwrap(), Some(1));
    assert_eq!(match_at_checked(&reg, b"ac", 0, None, Options::empty()).unwrap(), None);
}

// (?!ab)a.: inner success fails the assertion, inner failure passes it.
#[test]
fn negative_look_ahead() {
    let reg = prog(vec![
        Op::PushPrecReadNot(3), // alt -> 3
        Op::Str2(*b"ab"),
        Op::FailPrecReadNot,
        Op::Str1(*b"a"),
        Op::AnyChar,
        Op::End,
    ]);

    assert_eq!(match_at_checked(&reg, b"ab", 0, None, Options::empty()).unwrap(), None);
    assert_eq!(match_at_checked(&reg, b"ac", 0, None, Options::empty()).unwrap(), Some(2));
}

// (?<!x)a and the too-short input case: stepping past the buffer start
// succeeds the negative look-behind.
#[test]
fn negative_look_behind_too_short_succeeds() {
    let reg = prog(vec![
        Op::PushLookBehindNot { addr: 3, char_len: 1 }, // alt -> 3
        Op::Str1(*b"x"),
        Op::FailLookBehindNot,
        Op::Str1(*b"a"),
        Op::End,
    ]);

    // At offset 0 there is no previous character at all.
    assert_eq!(match_at_checked(&reg, b"a", 0, None, Options::empty()).unwrap(), Some(1));
    // Previous character is x: the assertion fails.
    assert_eq!(match_at_checked(&reg, b"xa", 1, None, Options::empty()).unwrap(), None);
    // Previous character is y: fine.
    assert_eq!(match_at_checked(&reg, b"ya", 1, None, Options::empty()).unwrap(), Some(1));
}

// Lazy star via the non-greedy repeat pair: a*?b.
#[test]
fn lazy_star_consumes_minimum() {
    let mut reg = prog(vec![
        Op::RepeatNg { id: 0, addr: 3 }, // skip -> 3
        Op::Str1(*b"a"),
        Op::RepeatIncNg(0),
        Op::Str1(*b"b"),
        Op::End,
    ]);
    with_repeat(&mut reg, 0, INFINITE_REPEAT);

    assert_eq!(match_at_checked(&reg, b"aab", 0, None, Options::empty()).unwrap(), Some(3));
    assert_eq!(match_at_checked(&reg, b"b", 0, None, Options::empty()).unwrap(), Some(1));
    assert_eq!(match_at_checked(&reg, b"aac", 0, None, Options::empty()).unwrap(), None);
}

// a{2,4} greedy: takes four when it can, fails below two.
#[test]
fn counted_repetition_bounds() {
    let mut reg = prog(vec![
        Op::Repeat { id: 0, addr: 3 }, // exit -> 3
        Op::Str1(*b"a"),
        Op::RepeatInc(0),
        Op::End,
    ]);
    with_repeat(&mut reg, 2, 4);

    assert_eq!(match_at_checked(&reg, b"a", 0, None, Options::empty()).unwrap(), None);
    assert_eq!(match_at_checked(&reg, b"aa", 0, None, Options::empty()).unwrap(), Some(2));
    assert_eq!(match_at_checked(&reg, b"aaa", 0, None, Options::empty()).unwrap(), Some(3));
    assert_eq!(match_at_checked(&reg, b"aaaaaa", 0, None, Options::empty()).unwrap(), Some(4));
}

// A counted repetition inside a subroutine body locates its Repeat frame
// by stack search.
#[test]
fn repeat_inside_subroutine_uses_stack_search() {
    let mut reg = prog(vec![
        Op::Call(2),
        Op::End,
        Op::Repeat { id: 0, addr: 3 }, // exit -> 5
        Op::Str1(*b"a"),
        Op::RepeatIncSg(0),
        Op::Return,
    ]);
    with_repeat(&mut reg, 1, 3);
    reg.num_call = 1;

    assert_eq!(match_at_checked(&reg, b"aa", 0, None, Options::empty()).unwrap(), Some(2));
    assert_eq!(match_at_checked(&reg, b"aaaa", 0, None, Options::empty()).unwrap(), Some(3));
    assert_eq!(match_at_checked(&reg, b"b", 0, None, Options::empty()).unwrap(), None);
}

// Recursive subroutine (?<p>a(?:\g<p>)?b): nested calls with balanced
// capture frames; the outermost occurrence wins the region slot.
#[test]
fn recursive_subroutine_captures_outermost_span() {
    let mut reg = prog(vec![
        Op::Call(2),
        Op::Jump(8), // -> 9
        Op::MemStartPush(1),
        Op::Str1(*b"a"),
        Op::Push(2), // optional recursion, alt -> 6
        Op::Call(2),
        Op::Str1(*b"b"),
        Op::MemEndPushRec(1),
        Op::Return,
        Op::End,
    ]);
    with_groups(&mut reg, 1);
    reg.num_call = 1;

    let mut r = region();
    let len = match_at_checked(&reg, b"aabb", 0, Some(&mut r), Options::empty()).unwrap();
    assert_eq!(len, Some(4));
    assert_eq!(span(&r, 0), (0, 4));
    assert_eq!(span(&r, 1), (0, 4));

    assert_eq!(match_at_checked(&reg, b"ab", 0, None, Options::empty()).unwrap(), Some(2));
    assert_eq!(match_at_checked(&reg, b"aab", 0, None, Options::empty()).unwrap(), None);
}

// A back-reference at nesting level 0 sees the capture of the current
// call frame, not an outer one.
#[test]
fn back_reference_with_level_reads_current_frame() {
    let mut reg = prog(vec![
        Op::Call(2),
        Op::End,
        Op::MemStartPush(1),
        Op::AnyChar,
        Op::MemEndPushRec(1),
        Op::BackrefWithLevel { ignore_case: false, level: 0, mems: vec![1].into() },
        Op::Return,
    ]);
    with_groups(&mut reg, 1);
    reg.num_call = 1;

    assert_eq!(match_at_checked(&reg, b"aa", 0, None, Options::empty()).unwrap(), Some(2));
    assert_eq!(match_at_checked(&reg, b"ab", 0, None, Options::empty()).unwrap(), None);
}

// \K via save/update: a\Kb reports the match from the keep point.
#[test]
fn keep_moves_match_start() {
    let reg = prog(vec![
        Op::Str1(*b"a"),
        Op::PushSaveVal { kind: SaveKind::Keep, id: 0 },
        Op::UpdateVar { kind: UpdateVarKind::KeepFromStackLast, id: 0 },
        Op::Str1(*b"b"),
        Op::End,
    ]);

    let mut r = region();
    let len = match_at_checked(&reg, b"ab", 0, Some(&mut r), Options::empty()).unwrap();
    // Match length counts from the attempt start, the region from keep.
    assert_eq!(len, Some(2));
    assert_eq!(span(&r, 0), (1, 2));
}

// Case-insensitive literal: the program carries the folded bytes.
#[test]
fn case_insensitive_literal_folds_input() {
    let reg = prog(vec![Op::StrIc(b"abc".as_slice().into()), Op::End]);

    assert_eq!(match_at_checked(&reg, b"aBC", 0, None, Options::empty()).unwrap(), Some(3));
    assert_eq!(match_at_checked(&reg, b"ABc", 0, None, Options::empty()).unwrap(), Some(3));
    assert_eq!(match_at_checked(&reg, b"abd", 0, None, Options::empty()).unwrap(), None);
}

// Word boundaries look one character back through sprev.
#[test]
fn word_boundaries() {
    let reg = prog(vec![
        Op::WordBound,
        Op::Str3(*b"foo"),
        Op::WordBound,
        Op::End,
    ]);

    assert_eq!(search(&reg, b"a foo b", 0, 7, None, Options::empty()).unwrap(), Some(2));
    assert_eq!(search(&reg, b"afoob", 0, 5, None, Options::empty()).unwrap(), None);

    let begin_end = prog(vec![
        Op::WordBegin,
        Op::Str3(*b"foo"),
        Op::WordEnd,
        Op::End,
    ]);
    assert_eq!(search(&begin_end, b"x foo.", 0, 6, None, Options::empty()).unwrap(), Some(2));
}

// FIND_LONGEST keeps backtracking for a longer alternative.
#[test]
fn find_longest_prefers_longer_alternative() {
    let reg = prog(vec![
        Op::Push(3), // alt -> 3
        Op::Str1(*b"a"),
        Op::Jump(2), // -> 4
        Op::Str2(*b"ab"),
        Op::End,
    ]);

    let mut r = region();
    let pos = search(&reg, b"ab", 0, 2, Some(&mut r), Options::FIND_LONGEST).unwrap();
    assert_eq!(pos, Some(0));
    assert_eq!(span(&r, 0), (0, 2));

    // Without the option the first alternative wins immediately.
    let mut r2 = region();
    search(&reg, b"ab", 0, 2, Some(&mut r2), Options::empty()).unwrap();
    assert_eq!(span(&r2, 0), (0, 1));
}

// FIND_NOT_EMPTY rejects the empty match and clears the region.
#[test]
fn find_not_empty_rejects_empty_match() {
    let reg = prog(vec![Op::End]);

    let mut r = region();
    let pos = search(&reg, b"abc", 0, 3, Some(&mut r), Options::FIND_NOT_EMPTY).unwrap();
    assert_eq!(pos, None);
    assert_eq!(r.beg[0], -1);
}

// State-check memoization: the second arrival at the same (position,
// site) pair fails outright. Below the input-length threshold the bitmap
// is not allocated and the program matches.
#[test]
fn state_check_memoizes_failed_positions() {
    let mut reg = prog(vec![
        Op::Push(4), // alt -> 4
        Op::StateCheck { snum: 1 },
        Op::Fail,
        Op::Fail,
        Op::StateCheck { snum: 1 },
        Op::End,
    ]);
    reg.num_state_checks = 1;

    // Long enough to activate the bitmap: the retried path is cut off.
    assert_eq!(match_at_checked(&reg, b"aaaaaaaa", 0, None, Options::empty()).unwrap(), None);
    // Below the threshold the same program succeeds through the retry.
    assert_eq!(match_at_checked(&reg, b"aaa", 0, None, Options::empty()).unwrap(), Some(0));
}

// Capture history: dynamic nesting recorded under the root.
#[test]
fn capture_history_tree_shape() {
    let mut reg = prog(vec![
        Op::MemStartPush(1),
        Op::MemStartPush(2),
        Op::Str1(*b"b"),
        Op::MemEndPush(2),
        Op::MemEndPush(1),
        Op::End,
    ]);
    with_groups(&mut reg, 2);
    mem_status_on(&mut reg.capture_history, 1);
    mem_status_on(&mut reg.capture_history, 2);

    let mut r = region();
    match_at_checked(&reg, b"b", 0, Some(&mut r), Options::empty()).unwrap();

    let root = r.capture_tree().expect("history recorded");
    assert_eq!((root.group, root.beg, root.end), (0, 0, 1));
    assert_eq!(root.children.len(), 1);
    let child = &root.children[0];
    assert_eq!((child.group, child.beg, child.end), (1, 0, 1));
    assert_eq!(child.children.len(), 1);
    let grand = &child.children[0];
    assert_eq!((grand.group, grand.beg, grand.end), (2, 0, 1));

    let mut seen = Vec::new();
    capture_tree_traverse(&r, TRAVERSE_CALLBACK_AT_FIRST, |g, _, _, level, _| {
        seen.push((g, level));
        0
    });
    assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2)]);

    // The next match into the same region rebuilds the tree.
    let mut plain = prog(vec![Op::Str1(*b"b"), Op::End]);
    plain.num_mem = 0;
    match_at_checked(&plain, b"b", 0, Some(&mut r), Options::empty()).unwrap();
    assert!(r.capture_tree().is_none());
}

// Regions copy structurally, history tree included.
#[test]
fn region_copy_round_trip_after_match() {
    let mut reg = prog(vec![
        Op::MemStartPush(1),
        Op::Str1(*b"x"),
        Op::MemEndPush(1),
        Op::End,
    ]);
    with_groups(&mut reg, 1);
    mem_status_on(&mut reg.capture_history, 1);

    let mut r = region();
    match_at_checked(&reg, b"x", 0, Some(&mut r), Options::empty()).unwrap();

    let mut copy = region();
    copy.copy_from(&r);
    assert_eq!(copy, r);
}

// Skipping after an empty check must land on a loop-control opcode.
#[test]
fn unexpected_opcode_after_empty_check() {
    let mut reg = prog(vec![
        Op::EmptyCheckStart(0),
        Op::EmptyCheckEnd(0),
        Op::Str1(*b"a"), // not a valid skip target
        Op::End,
    ]);
    reg.num_empty_check = 1;

    assert_eq!(
        match_at_checked(&reg, b"a", 0, None, Options::empty()),
        Err(EngineError::UnexpectedBytecode)
    );
}
