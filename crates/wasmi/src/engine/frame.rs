//! Runtime activation records (§3).

/// One call's activation record on the interpreter's frame stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    /// pc to resume the caller at once this call returns.
    pub caller_pc: usize,
    /// Index of the function being executed, in `Module::functype_of`'s
    /// index space. `None` for the pseudo-frame representing a direct
    /// embedder invocation with no Wasm caller.
    pub func_idx: Option<u32>,
    /// Number of result cells this call leaves on the operand stack.
    pub result_cells: u32,
    /// Operand-stack height when this frame was entered, i.e. the height
    /// locals/params sat at before the call pushed them.
    pub stack_base: usize,
    /// Cell offset of this frame's local region within the locals stack.
    pub locals_base: usize,
    /// Index into the label stack of this frame's outermost (function-body)
    /// label; popping past it means the call is returning.
    pub label_base: usize,
}
