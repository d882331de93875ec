//! Trap taxonomy.
//!
//! A trap is an abortive runtime condition, tagged by a [`TrapCode`] with a
//! canonical, user-visible message. Traps are not ordinary errors: they
//! unwind the entire Wasm call stack to the nearest embedder boundary and
//! are never mixed with decode/validation/link errors, which instead abort
//! loading or instantiation outright.

use core::fmt;

/// Canonical trap identifiers, matching the Wasm spec testsuite's
/// `assert_trap` message set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrapCode {
    DivByZero,
    IntegerOverflow,
    OutOfBoundsMemoryAccess,
    OutOfBoundsDataAccess,
    OutOfBoundsTableAccess,
    OutOfBoundsElementAccess,
    CallIndirectNullFuncref,
    CallIndirectOutOfBoundsTableAccess,
    CallIndirectFuncTypeMismatch,
    Unreachable,
    InvalidConversionToInteger,
    TooManyFrames,
    TooManyStackCells,
    AtomicWaitOnNonSharedMemory,
    UnalignedAtomicOperation,
    /// Carries the wasi `proc_exit` code.
    VoluntaryExit(u32),
    VoluntaryThreadExit,
}

impl TrapCode {
    /// The canonical message for this trap, matching spectest's
    /// `assert_trap` expectations for every trap that appears there.
    pub fn message(self) -> &'static str {
        match self {
            Self::DivByZero => "integer divide by zero",
            Self::IntegerOverflow => "integer overflow",
            Self::OutOfBoundsMemoryAccess => "out of bounds memory access",
            Self::OutOfBoundsDataAccess => "out of bounds memory access",
            Self::OutOfBoundsTableAccess => "out of bounds table access",
            Self::OutOfBoundsElementAccess => "out of bounds table access",
            Self::CallIndirectNullFuncref => "uninitialized element",
            Self::CallIndirectOutOfBoundsTableAccess => "undefined element",
            Self::CallIndirectFuncTypeMismatch => "indirect call type mismatch",
            Self::Unreachable => "unreachable executed",
            Self::InvalidConversionToInteger => "invalid conversion to integer",
            Self::TooManyFrames => "call stack exhausted",
            Self::TooManyStackCells => "call stack exhausted",
            Self::AtomicWaitOnNonSharedMemory => "expected shared memory",
            Self::UnalignedAtomicOperation => "unaligned atomic",
            Self::VoluntaryExit(_) => "voluntary exit",
            Self::VoluntaryThreadExit => "voluntary thread exit",
        }
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TrapCode {}

/// A runtime trap, carrying its canonical [`TrapCode`] and an optional
/// free-form message (e.g. attached by a host function).
#[derive(Debug, Clone)]
pub struct Trap {
    code: TrapCode,
    message: Option<alloc::string::String>,
}

impl Trap {
    pub fn new(code: TrapCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: TrapCode, message: impl Into<alloc::string::String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn code(&self) -> TrapCode {
        self.code
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{msg}"),
            None => write!(f, "{}", self.code),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Trap {}
