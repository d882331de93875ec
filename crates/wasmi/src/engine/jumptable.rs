//! The validator's jump-table output (§4.2, §9).
//!
//! Kept as a data structure wholly separate from the validator's algorithm
//! so the validator itself stays pure: it is only ever *produced* by
//! [`crate::module::validate`] and only ever *consumed* by the interpreter.

use alloc::collections::BTreeMap;

/// What a structured control instruction resolves to once its matching
/// `else`/`end` has been seen.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockTarget {
    /// For `if`: the pc to jump to when the condition is false (the `else`
    /// body, or straight to `end_pc` if there is no `else`). Unused for
    /// `block`/`loop`/`else` entries.
    pub else_target: Option<usize>,
    /// The pc of the instruction *after* the matching `end`.
    pub end_pc: usize,
}

/// Precomputed `{pc -> target}` jump table for one function body, plus the
/// stack high-watermarks the validator observed while building it.
#[derive(Debug, Default, Clone)]
pub struct JumpTable {
    /// Keyed by the pc of the `block`/`loop`/`if`/`else` instruction that
    /// owns the entry. A `BTreeMap` gives the "binary-search by source pc"
    /// access pattern called for in §9 without a separate sort step.
    entries: BTreeMap<usize, BlockTarget>,
    /// Keyed by the pc of a `drop`/`select`/`select t` instruction: the cell
    /// width of the operand(s) it consumes, resolved once at validation time
    /// since the interpreter has no symbolic type stack of its own to ask.
    operand_width: BTreeMap<usize, u32>,
    /// High-water mark of live operand-stack cells, used to size the
    /// interpreter's cell stack up front.
    pub max_cells: u32,
    /// High-water mark of live labels (block nesting depth).
    pub max_labels: u32,
}

impl JumpTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pc: usize, target: BlockTarget) {
        self.entries.insert(pc, target);
    }

    pub fn get(&self, pc: usize) -> Option<&BlockTarget> {
        self.entries.get(&pc)
    }

    pub fn insert_width(&mut self, pc: usize, width: u32) {
        self.operand_width.insert(pc, width);
    }

    pub fn width_at(&self, pc: usize) -> Option<u32> {
        self.operand_width.get(&pc).copied()
    }
}
