//! The execution engine: configuration, the operand/frame/label stacks, and
//! the interpreter loop itself (§4.4, §4.5, §4.6).

pub(crate) mod jumptable;
mod config;
mod stack;
mod frame;
mod label;
mod interpreter;
mod restart;
mod wait;

pub use self::config::Config;
pub use self::jumptable::{BlockTarget, JumpTable};
pub use self::interpreter::{resume, run, CallOutcome, ExecContext};
pub use self::restart::{RestartRecord, RestartState};
pub use self::wait::WaitRegistry;
pub(crate) use self::frame::Frame;
pub(crate) use self::label::Label;
pub(crate) use self::stack::Stack;
