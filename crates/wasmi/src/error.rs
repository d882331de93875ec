//! Error taxonomy for decode, validation, link and resource failures.
//!
//! Traps are modelled separately (see [`wasmi_core::Trap`]) and are never
//! folded into this enum: decode/validation/link errors abort *loading* or
//! *instantiation*, while traps unwind an in-progress *execution*. Mixing
//! the two would make it impossible for an embedder to tell "this module is
//! broken" apart from "this module ran and then faulted".

use alloc::string::String;

/// A byte offset into the original Wasm binary, recorded on most load-time
/// errors so a caller can point a user at the offending bytes.
pub type Offset = usize;

/// Malformed binary encountered while decoding a module.
#[derive(Debug, thiserror::Error)]
#[error("decode error at offset {offset}: {message}")]
pub struct DecodeError {
    pub offset: Offset,
    pub message: String,
}

impl DecodeError {
    pub fn new(offset: Offset, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// A structural or type error discovered by the validator.
#[derive(Debug, thiserror::Error)]
#[error("validation error at offset {offset}: {message}")]
pub struct ValidationError {
    pub offset: Offset,
    pub message: String,
}

impl ValidationError {
    pub fn new(offset: Offset, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// A missing or mismatched import, discovered while building an instance.
#[derive(Debug, thiserror::Error)]
#[error("link error: {module_name}::{name}: {detail}")]
pub struct LinkError {
    pub module_name: String,
    pub name: String,
    pub detail: String,
}

impl LinkError {
    pub fn new(module_name: impl Into<String>, name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            name: name.into(),
            detail: detail.into(),
        }
    }
}

/// Allocation or capacity failure (too many modules, a table/memory grow
/// that would exceed an embedder-imposed ceiling, and the like).
#[derive(Debug, thiserror::Error)]
#[error("resource error: {0}")]
pub struct ResourceError(pub String);

/// The root error type returned by the fallible parts of the embedder API.
///
/// Traps are intentionally excluded from decode/validation/link failures —
/// see the module documentation — but instantiation's own `start` function
/// (§4.3 step 8) can still trap, and that failure has nowhere else to go
/// since it aborts instantiation rather than unwinding a call already in the
/// embedder's hands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("trap during instantiation: {0}")]
    Start(#[from] wasmi_core::Trap),
}
