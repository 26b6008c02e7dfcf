// onibi - Backtracking bytecode interpreter for Oniguruma-class regex
// programs.
//
// The crate is the execution half of a regex library: it consumes a
// compiled program (typed instructions plus capture/repeat metadata and
// prefix hints) and an encoded input byte string, and reports whether and
// where the program matches, filling capture spans into a caller-owned
// region. Parsing and compilation live with the caller.
//
//   defs      - flags, error codes, sentinels, process-wide config
//   error     - EngineError over the raw error codes
//   encoding  - the Encoding capability + ASCII/UTF-8 implementations
//   region    - capture spans and the capture-history tree
//   program   - instruction set and the compiled Program form
//   stack     - the backtrack stack (frames, pops, balanced walks)
//   exec      - the interpreter (match_at)
//   search    - prefix scanners, the search driver, scan

pub mod defs;
pub mod encoding;
pub mod encodings;
pub mod error;
pub mod exec;
pub mod program;
pub mod region;
pub mod search;

mod stack;

pub use defs::{
    clear_interrupt, match_stack_limit, request_interrupt, set_match_stack_limit, Anchors,
    Options,
};
pub use error::EngineError;
pub use exec::match_at_checked;
pub use program::{Op, OptimizeKind, Program};
pub use region::{capture_tree_traverse, CaptureTreeNode, Region};
pub use search::{scan, search};
