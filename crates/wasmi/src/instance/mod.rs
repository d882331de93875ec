//! Instance-side runtime state (§3, §4.3): the mutable counterpart to the
//! immutable [`crate::module::Module`].

mod builder;

pub use self::builder::instantiate;

use alloc::{boxed::Box, collections::BTreeMap, rc::Rc, string::String, vec::Vec};
use core::cell::RefCell;

use wasmi_core::{FuncType, Value};

use crate::engine::RestartState;
use crate::error::Error;
use crate::module::{GlobalType, MemoryType, Module, TableType};

/// A linear memory's runtime state: always `pages * 65536` bytes, zero
/// extended on grow, capped at the declared (or Wasm's hard) maximum.
#[derive(Debug)]
pub struct MemInst {
    pub data: Vec<u8>,
    pub ty: MemoryType,
}

pub const WASM_PAGE_SIZE: usize = 65536;
/// The hard ceiling on linear memory imposed by the 32-bit address space,
/// used when a memory declares no explicit maximum.
const ABSOLUTE_MAX_PAGES: u32 = 65536;

impl MemInst {
    pub fn new(ty: MemoryType) -> Self {
        Self {
            data: alloc::vec![0u8; ty.limits.min as usize * WASM_PAGE_SIZE],
            ty,
        }
    }

    pub fn size_pages(&self) -> u32 {
        (self.data.len() / WASM_PAGE_SIZE) as u32
    }

    /// Grows by `delta` pages, returning the previous size or `None` if the
    /// grow would exceed the declared (or absolute) maximum.
    pub fn grow(&mut self, delta: u32) -> Option<u32> {
        let old = self.size_pages();
        let max = self.ty.limits.max.unwrap_or(ABSOLUTE_MAX_PAGES);
        let new = old.checked_add(delta)?;
        if new > max || new > ABSOLUTE_MAX_PAGES {
            return None;
        }
        self.data.resize(new as usize * WASM_PAGE_SIZE, 0);
        Some(old)
    }
}

/// A table's runtime state: a flat array of reference values.
#[derive(Debug)]
pub struct TableInst {
    pub elems: Vec<Value>,
    pub ty: TableType,
}

impl TableInst {
    pub fn new(ty: TableType) -> Self {
        let null = crate::module::ref_default(ty.element);
        Self {
            elems: alloc::vec![null; ty.limits.min as usize],
            ty,
        }
    }

    pub fn grow(&mut self, delta: u32, init: Value) -> Option<u32> {
        let old = self.elems.len() as u32;
        let max = self.ty.limits.max.unwrap_or(u32::MAX);
        let new = old.checked_add(delta)?;
        if new > max {
            return None;
        }
        self.elems.resize(new as usize, init);
        Some(old)
    }
}

#[derive(Debug)]
pub struct GlobalInst {
    pub value: Value,
    pub ty: GlobalType,
}

/// A callable host function: the Rust-idiomatic rendering of the C6 ABI's
/// `fn(ctx, host_instance, functype, params, results)` shape, where the
/// `host_instance` pointer becomes whatever state the closure captures
/// (commonly an `Rc<RefCell<WasiCtx>>`) rather than an explicit parameter.
pub type HostFn = Rc<dyn Fn(&mut crate::engine::ExecContext, &[wasmi_core::Cell], &mut [wasmi_core::Cell]) -> Result<RestartState, wasmi_core::Trap>>;

#[derive(Clone)]
pub struct HostFunc {
    pub ty: FuncType,
    pub call: HostFn,
}

/// A callable function: either a Wasm-defined function living inside some
/// instance, or a host function.
#[derive(Clone)]
pub enum FuncInst {
    Wasm { instance: Instance, func_idx: u32 },
    Host(Rc<HostFunc>),
}

impl FuncInst {
    pub fn ty(&self) -> FuncType {
        match self {
            FuncInst::Wasm { instance, func_idx } => instance.module.functype_of(*func_idx).clone(),
            FuncInst::Host(h) => h.ty.clone(),
        }
    }
}

/// Anything nameable in an import or export table.
#[derive(Clone)]
pub enum Extern {
    Func(FuncInst),
    Memory(Rc<RefCell<MemInst>>),
    Table(Rc<RefCell<TableInst>>),
    Global(Rc<RefCell<GlobalInst>>),
}

impl Extern {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Extern::Func(_) => "func",
            Extern::Memory(_) => "memory",
            Extern::Table(_) => "table",
            Extern::Global(_) => "global",
        }
    }
}

/// A module instance: the mutable, per-activation counterpart to a
/// [`Module`]. Reference-counted so that exported functions/memories can
/// outlive a single call without the caller juggling lifetimes, matching
/// how an embedder typically holds on to an instance across many
/// invocations.
pub struct InstanceData {
    pub module: Rc<Module>,
    /// Unified function index space: imports first, then defined functions,
    /// matching `Module`'s own indexing. A defined function's `FuncInst`
    /// holds a strong `Rc` back to this very `InstanceData`, so this field
    /// has to be filled in after the instance's `Rc` already exists —
    /// `RefCell` is what lets the builder do that through a shared
    /// reference instead of reaching for unsafe cell tricks.
    pub funcs: RefCell<Vec<FuncInst>>,
    pub mems: Vec<Rc<RefCell<MemInst>>>,
    pub tables: Vec<Rc<RefCell<TableInst>>>,
    pub globals: Vec<Rc<RefCell<GlobalInst>>>,
    /// Filled in by the builder after every other field, once defined
    /// functions have a back-pointer to this instance to export.
    pub exports: RefCell<BTreeMap<String, Extern>>,
    pub data_dropped: RefCell<Vec<bool>>,
    pub elem_dropped: RefCell<Vec<bool>>,
}

pub type Instance = Rc<InstanceData>;

impl InstanceData {
    pub fn find_export(&self, name: &str) -> Option<Extern> {
        self.exports.borrow().get(name).cloned()
    }
}

/// Bundles a set of host functions under one import module name, the exact
/// shape the host function ABI (§4.5) calls for.
pub struct HostModule {
    pub module_name: String,
    pub funcs: Vec<(String, HostFunc)>,
}

pub fn link_error(module_name: impl Into<String>, name: impl Into<String>, detail: impl Into<String>) -> Error {
    Error::Link(crate::error::LinkError::new(module_name, name, detail))
}
