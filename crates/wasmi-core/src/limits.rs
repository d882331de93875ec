//! Resource limits for memories/tables and the interpreter's own stacks.

/// Default cap on the depth of the frame stack before a `TooManyFrames` trap.
pub const DEFAULT_MAX_FRAMES: usize = 4096;

/// Default cap on live operand-stack cells before a `TooManyStackCells` trap.
pub const DEFAULT_MAX_STACKCELLS: usize = 1 << 20;

/// A `min..=max` bound, used for memories (in pages) and tables (in elements).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    /// Import subtyping: does `self` (the offered limits) satisfy `required`
    /// (the import's declared limits)?
    ///
    /// `a` matches `b` iff `a.min >= b.min` and (`b.max` is absent, or
    /// `a.max` is present and `a.max <= b.max`).
    pub fn matches(&self, required: &Limits) -> bool {
        if self.min < required.min {
            return false;
        }
        match required.max {
            None => true,
            Some(b_max) => matches!(self.max, Some(a_max) if a_max <= b_max),
        }
    }
}
