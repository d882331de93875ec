//! Restartable host-call machinery (§4.4, §5, §9).
//!
//! A host function that needs to call back into Wasm cannot simply recurse
//! (the callback may itself need to suspend, e.g. on `memory.atomic.wait`).
//! Instead it saves a small continuation on the execution context's restart
//! stack and returns [`RestartState::Restart`]; the interpreter resumes the
//! callee and re-enters the host function once that returns.

use alloc::vec::Vec;

/// What a dispatch step returned: either it ran to completion, or it needs
/// to be resumed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartState {
    Done,
    Restart,
}

/// A host function's saved continuation, pushed before it returns
/// [`RestartState::Restart`] and popped when the interpreter re-enters it.
///
/// `step`/`user1`/`user2` are a deliberately small, fixed-width state slot —
/// enough for "which phase of the state machine am I in" plus two scalar
/// operands — rather than a boxed closure, so a restart record survives
/// being moved across an OS thread boundary by the cooperative scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestartRecord {
    pub step: u32,
    pub user1: u64,
    pub user2: u64,
    /// Number of operand-stack cells the host function had already
    /// consumed before suspending; re-popped on re-entry so the second
    /// invocation sees the same arguments it started with.
    pub stack_adjustment: u32,
}

impl RestartRecord {
    pub fn new(step: u32) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user1: u64, user2: u64) -> Self {
        self.user1 = user1;
        self.user2 = user2;
        self
    }

    pub fn with_stack_adjustment(mut self, stack_adjustment: u32) -> Self {
        self.stack_adjustment = stack_adjustment;
        self
    }
}

/// Per-execution-context stack of pending restarts, innermost last.
#[derive(Debug, Default)]
pub(crate) struct RestartStack {
    records: Vec<RestartRecord>,
}

impl RestartStack {
    pub fn push(&mut self, record: RestartRecord) {
        self.records.push(record);
    }

    pub fn pop(&mut self) -> Option<RestartRecord> {
        self.records.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
