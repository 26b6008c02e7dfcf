// Shared helpers for assembling programs by hand. Compilation is the
// caller's job in this crate, so tests play the compiler: they build the
// instruction vector and fill in the metadata a compiler would derive.

#![allow(dead_code)]

use onibi::program::{mem_status_on, Op, PopLevel, Program, RepeatRange};
use onibi::encodings::ASCII;
use onibi::Region;

/// A single-byte-encoding program over the given instructions.
pub fn prog(ops: Vec<Op>) -> Program {
    let mut reg = Program::new(&ASCII);
    reg.ops = ops;
    reg
}

/// Declare `n` capture groups, all tracked through the stack (the layout
/// the compiler picks for groups reachable from backtracking).
pub fn with_groups(reg: &mut Program, n: usize) {
    reg.num_mem = n;
    for i in 1..=n {
        mem_status_on(&mut reg.bt_mem_start, i);
        mem_status_on(&mut reg.bt_mem_end, i);
    }
    reg.pop_level = PopLevel::All;
}

/// Register one counted-repetition site and return its id.
pub fn with_repeat(reg: &mut Program, lower: i32, upper: i32) -> usize {
    let id = reg.num_repeat;
    reg.num_repeat += 1;
    reg.repeat_range.push(RepeatRange { lower, upper });
    id
}

pub fn region() -> Region {
    Region::new()
}

/// Span of group `i` as recorded in the region.
pub fn span(region: &Region, i: usize) -> (i32, i32) {
    (region.beg[i], region.end[i])
}
