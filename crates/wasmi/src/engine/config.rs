//! Interpreter-wide configuration (§4.4).

use wasmi_core::{DEFAULT_MAX_FRAMES, DEFAULT_MAX_STACKCELLS};

/// Engine-wide knobs an embedder can tune before creating instances.
///
/// Mirrors the teacher's own `Config` builder shape: every setter takes and
/// returns `Self` so calls chain, and defaults match the invariants assumed
/// throughout the interpreter.
#[derive(Debug, Clone)]
pub struct Config {
    max_frames: u32,
    max_stackcells: u32,
    generate_jump_table: bool,
    trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            max_stackcells: DEFAULT_MAX_STACKCELLS,
            generate_jump_table: true,
            trace: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_frames(mut self, value: u32) -> Self {
        self.max_frames = value;
        self
    }

    pub fn max_stackcells(mut self, value: u32) -> Self {
        self.max_stackcells = value;
        self
    }

    /// When `false`, branches resolve their target by scanning forward
    /// through nested blocks at runtime instead of consulting the
    /// validator's precomputed jump table. Exists so both dispatch
    /// strategies can be exercised by the same test suite.
    pub fn generate_jump_table(mut self, value: bool) -> Self {
        self.generate_jump_table = value;
        self
    }

    pub fn trace(mut self, value: bool) -> Self {
        self.trace = value;
        self
    }

    pub fn get_max_frames(&self) -> u32 {
        self.max_frames
    }

    pub fn get_max_stackcells(&self) -> u32 {
        self.max_stackcells
    }

    pub fn jump_table_enabled(&self) -> bool {
        self.generate_jump_table
    }

    pub fn tracing_enabled(&self) -> bool {
        self.trace
    }
}
