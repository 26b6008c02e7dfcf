// region.rs - Capture spans and the capture-history tree.
//
// A Region is owned by the caller; the engine only resizes and fills it.
// The history tree is rebuilt on each successful match and freed with the
// region.

use crate::defs::NOTPOS;

/// One dynamic occurrence of a capture group. The root node is group 0
/// (the whole match); descendants mirror dynamic nesting at match time,
/// not static group numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTreeNode {
    pub group: i32,
    pub beg: i32,
    pub end: i32,
    pub children: Vec<Box<CaptureTreeNode>>,
}

impl CaptureTreeNode {
    pub fn new() -> Self {
        CaptureTreeNode {
            group: -1,
            beg: NOTPOS,
            end: NOTPOS,
            children: Vec::new(),
        }
    }
}

impl Default for CaptureTreeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Match result: parallel begin/end byte offsets per group (group 0 is
/// the whole match) and an optional capture-history tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub num_regs: usize,
    pub beg: Vec<i32>,
    pub end: Vec<i32>,
    pub history_root: Option<Box<CaptureTreeNode>>,
}

impl Region {
    pub fn new() -> Self {
        Region {
            num_regs: 0,
            beg: Vec::new(),
            end: Vec::new(),
            history_root: None,
        }
    }

    /// Reset every span to unset and drop the history tree.
    pub fn clear(&mut self) {
        for i in 0..self.num_regs {
            self.beg[i] = NOTPOS;
            self.end[i] = NOTPOS;
        }
        self.history_root = None;
    }

    /// Grow or shrink to `n` registers. New registers start unset.
    pub fn resize(&mut self, n: usize) {
        self.beg.resize(n, NOTPOS);
        self.end.resize(n, NOTPOS);
        self.num_regs = n;
    }

    /// Resize then clear; the shape every match entry point starts from.
    pub fn resize_clear(&mut self, n: usize) {
        self.resize(n);
        self.clear();
    }

    /// Set one span. Out-of-range `at` is rejected.
    pub fn set(&mut self, at: usize, beg: i32, end: i32) -> bool {
        if at >= self.num_regs {
            return false;
        }
        self.beg[at] = beg;
        self.end[at] = end;
        true
    }

    /// Structural copy, history tree included.
    pub fn copy_from(&mut self, other: &Region) {
        self.clone_from(other);
    }

    /// Root of the capture-history tree of the last match, if recorded.
    pub fn capture_tree(&self) -> Option<&CaptureTreeNode> {
        self.history_root.as_deref()
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

// === History tree traversal ===

pub const TRAVERSE_CALLBACK_AT_FIRST: i32 = 1;
pub const TRAVERSE_CALLBACK_AT_LAST: i32 = 2;
pub const TRAVERSE_CALLBACK_AT_BOTH: i32 =
    TRAVERSE_CALLBACK_AT_FIRST | TRAVERSE_CALLBACK_AT_LAST;

fn tree_traverse<F>(node: &CaptureTreeNode, at: i32, callback: &mut F, level: i32) -> i32
where
    F: FnMut(i32, i32, i32, i32, i32) -> i32,
{
    if (at & TRAVERSE_CALLBACK_AT_FIRST) != 0 {
        let r = callback(node.group, node.beg, node.end, level, TRAVERSE_CALLBACK_AT_FIRST);
        if r != 0 {
            return r;
        }
    }

    for child in &node.children {
        let r = tree_traverse(child, at, callback, level + 1);
        if r != 0 {
            return r;
        }
    }

    if (at & TRAVERSE_CALLBACK_AT_LAST) != 0 {
        let r = callback(node.group, node.beg, node.end, level, TRAVERSE_CALLBACK_AT_LAST);
        if r != 0 {
            return r;
        }
    }

    0
}

/// Walk the capture-history tree of a region. The callback receives
/// `(group, beg, end, level, at)` and returns 0 to continue; any other
/// value stops the walk and is returned.
pub fn capture_tree_traverse<F>(region: &Region, at: i32, mut callback: F) -> i32
where
    F: FnMut(i32, i32, i32, i32, i32) -> i32,
{
    match region.history_root {
        Some(ref root) => tree_traverse(root, at, &mut callback, 0),
        None => 0,
    }
}
