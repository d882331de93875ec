//! Core value, type, and trap primitives shared by the `wasmi` interpreter.
//!
//! This crate knows nothing about modules, instances or the interpreter loop;
//! it only defines the vocabulary of Wasm values, function types, limits and
//! traps that the rest of the workspace builds on.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod cell;
mod func_type;
mod limits;
mod trap;
mod value;

pub use self::{
    cell::{Cell, CellLayout},
    func_type::FuncType,
    limits::{Limits, DEFAULT_MAX_FRAMES, DEFAULT_MAX_STACKCELLS},
    trap::{Trap, TrapCode},
    value::{RefType, Value, ValueType, F32, F64},
};
