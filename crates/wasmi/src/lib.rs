//! A WebAssembly interpreter with a structured stack machine and
//! restartable host calls.
//!
//! The embedder-facing surface is small on purpose: [`Module::new`] decodes
//! and validates a binary, a [`Linker`] resolves its imports, and
//! [`Instance::new`] runs the eight-step instantiation pipeline and hands
//! back a live instance whose exports can be called through [`Func`].

extern crate alloc;

mod cluster;
mod error;
mod engine;
mod host;
mod instance;
mod linker;
mod module;

pub use wasmi_core::{FuncType, Trap, TrapCode, Value, ValueType};

pub use crate::cluster::{Cluster, Scheduler, ThreadId, ThreadIdAllocator};
pub use crate::engine::{CallOutcome, Config, ExecContext, RestartState};
pub use crate::error::{DecodeError, Error, LinkError, ResourceError, ValidationError};
pub use crate::host::{
    decode_params, host_fn, host_fn_restartable, host_func_copyin, host_func_copyout, host_module, parse_type_string,
    write_result, yield_once, MemoryCell,
};
pub use crate::instance::{
    Extern, FuncInst, GlobalInst, HostFunc, HostModule, Instance as RawInstance, InstanceData, MemInst, TableInst,
    WASM_PAGE_SIZE,
};
pub use crate::linker::Linker;

use alloc::rc::Rc;

/// A decoded and validated module, ready to be instantiated any number of
/// times (§4.1, §4.2).
#[derive(Clone)]
pub struct Module(Rc<module::Module>);

impl Module {
    /// Decodes and validates a Wasm binary.
    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        let module = module::decode_module(bytes)?;
        Ok(Self(Rc::new(module)))
    }

    #[cfg(feature = "wat")]
    pub fn from_text(text: &str) -> Result<Self, Error> {
        let bytes = wat::parse_str(text).map_err(|e| error::DecodeError::new(0, alloc::format!("{e}")))?;
        Self::new(&bytes)
    }
}

/// A live module activation: the mutable state produced by instantiation
/// (§4.3), holding its own memories, tables, globals and functions.
#[derive(Clone)]
pub struct Instance(instance::Instance);

impl Instance {
    /// Runs the instantiation pipeline for `module`, resolving its imports
    /// against `linker`.
    pub fn new(module: &Module, linker: &Linker, config: Rc<Config>) -> Result<Self, Error> {
        let data = instance::instantiate(Rc::clone(&module.0), linker, config)?;
        Ok(Self(data))
    }

    pub fn get_export(&self, name: &str) -> Option<Extern> {
        self.0.find_export(name)
    }

    pub fn get_func(&self, name: &str) -> Option<Func> {
        match self.0.find_export(name)? {
            Extern::Func(f) => Some(Func(f)),
            _ => None,
        }
    }

    pub fn get_memory(&self, name: &str) -> Option<Rc<core::cell::RefCell<MemInst>>> {
        match self.0.find_export(name)? {
            Extern::Memory(m) => Some(m),
            _ => None,
        }
    }

    /// Exposes the underlying instance for callers (e.g. `wasmi_wasi`) that
    /// need to bind a [`MemoryCell`] or spawn a wasi-threads worker against
    /// it.
    pub fn raw(&self) -> &RawInstance {
        &self.0
    }
}

/// A callable exported function.
#[derive(Clone)]
pub struct Func(FuncInst);

impl Func {
    pub fn ty(&self) -> wasmi_core::FuncType {
        self.0.ty()
    }

    /// Exposes the underlying callable for callers (e.g. `wasmi_wasi`'s
    /// wasi-threads support) that need to hand it to the cooperative
    /// scheduler directly instead of through [`Func::call`].
    pub fn raw(&self) -> &FuncInst {
        &self.0
    }

    /// Runs this function to completion on a fresh execution context. A
    /// function that suspends (e.g. `memory.atomic.wait`) returns
    /// [`CallOutcome::Suspended`]; resume it with [`engine::resume`] and the
    /// same [`engine::ExecContext`] to continue.
    pub fn call(&self, config: Rc<Config>, args: &[Value]) -> Result<alloc::vec::Vec<Value>, Trap> {
        let mut ctx = engine::ExecContext::new(config);
        match engine::run(&mut ctx, &self.0, args)? {
            CallOutcome::Finished(results) => Ok(results),
            CallOutcome::Suspended => Err(Trap::with_message(
                TrapCode::Unreachable,
                "function suspended; call it through engine::run/resume directly to keep its context alive",
            )),
            CallOutcome::Interrupted => Err(Trap::with_message(
                TrapCode::Unreachable,
                "function observed an interrupt with no cluster bound to service it",
            )),
        }
    }
}
