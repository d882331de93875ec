//! Control-flow targets on the interpreter's label stack (§3, §4.4).

/// A runtime label: where to resume and how many operands survive a branch
/// to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Label {
    /// pc to jump to on a branch that targets this label: the loop header
    /// for a `loop`, or the instruction after the matching `end` for
    /// everything else.
    pub target_pc: usize,
    /// Operand-stack height when this label's block was entered.
    pub height: usize,
    /// Number of result cells a branch to this label carries across.
    pub arity: u32,
    /// `true` for a `loop` label: `br` rewinds here instead of forward.
    pub is_loop: bool,
}
