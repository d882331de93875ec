//! The immutable module intermediate representation produced by the decoder
//! and annotated in place by the validator.

use alloc::{boxed::Box, string::String, vec::Vec};
use wasmi_core::{FuncType, RefType, Value};

use crate::engine::JumpTable;

/// One of the four importable/exportable kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableType {
    pub element: wasmi_core::ValueType,
    pub limits: wasmi_core::Limits,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: wasmi_core::Limits,
    pub shared: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GlobalType {
    pub content: wasmi_core::ValueType,
    pub mutable: bool,
}

/// One of the four import descriptors.
#[derive(Clone, Debug)]
pub enum ImportDesc {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Clone, Debug)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

/// A run of locals sharing a value type, as declared in a function body's
/// local-count vector. Kept compressed rather than flattened eagerly; the
/// instance builder expands it once into a flat per-call local layout.
#[derive(Copy, Clone, Debug)]
pub struct LocalsChunk {
    pub count: u32,
    pub ty: wasmi_core::ValueType,
}

/// A defined function: its type, its compressed local declarations, and a
/// byte-range pointer into the original module binary for its body — the
/// decoder never copies code bytes.
#[derive(Clone, Debug)]
pub struct FuncBody {
    pub type_idx: u32,
    pub locals: Vec<LocalsChunk>,
    /// Byte offset range `[start, end)` of the operator stream, inside the
    /// original binary, *after* the locals declarations.
    pub code_range: (usize, usize),
    /// Filled in by the validator: precomputed jump table and high-water
    /// marks used to size the interpreter's stacks up front.
    pub exec_info: JumpTable,
}

impl FuncBody {
    /// Total number of locals (including params) laid out flat, in cells.
    pub fn num_local_cells(&self) -> u32 {
        self.locals.iter().map(|c| c.count * c.ty.cells()).sum()
    }

    pub fn num_locals(&self) -> u32 {
        self.locals.iter().map(|c| c.count).sum()
    }

    /// The flat value type of local `idx` (0-based, *not* counting params),
    /// or `None` if out of range.
    pub fn local_type(&self, mut idx: u32) -> Option<wasmi_core::ValueType> {
        for chunk in &self.locals {
            if idx < chunk.count {
                return Some(chunk.ty);
            }
            idx -= chunk.count;
        }
        None
    }
}

/// A single element of an element segment: either a direct function index
/// or a constant expression (for `ref.null`/`ref.func` element kinds).
#[derive(Clone, Debug)]
pub enum ElementInit {
    Func(u32),
    Null,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElementMode {
    Active { table_index: u32 },
    Passive,
    Declared,
}

#[derive(Clone, Debug)]
pub struct ElementSegment {
    pub ty: wasmi_core::ValueType,
    pub mode: ElementMode,
    pub offset: Option<ConstExpr>,
    pub items: Vec<ElementInit>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataMode {
    Active { memory_index: u32 },
    Passive,
}

#[derive(Clone, Debug)]
pub struct DataSegment {
    pub mode: DataMode,
    pub offset: Option<ConstExpr>,
    pub bytes: Box<[u8]>,
}

/// A constant initializer expression: `t.const`, `ref.null`, `ref.func`, or
/// `global.get` of an imported immutable global. Evaluated once, outside the
/// general interpreter loop, by the instance builder (§4.3).
#[derive(Clone, Debug)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    RefNull(wasmi_core::ValueType),
    RefFunc(u32),
    GlobalGet(u32),
}

#[derive(Clone, Debug)]
pub struct GlobalDef {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

/// The immutable, validated module representation.
///
/// Indices for every kind always count imports first, then definitions;
/// `Module::functype_of` transparently dispatches between the two so callers
/// never need to know whether a given function index is imported.
#[derive(Debug)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub funcs: Vec<FuncBody>,
    pub tables: Vec<TableType>,
    pub mems: Vec<MemoryType>,
    pub globals: Vec<GlobalDef>,
    pub elems: Vec<ElementSegment>,
    pub datas: Vec<DataSegment>,
    pub start: Option<u32>,
    pub exports: Vec<Export>,
    /// Owns the original binary so `FuncBody::code_range` offsets remain
    /// valid for the module's entire lifetime.
    pub(crate) bytes: Box<[u8]>,
}

impl Module {
    pub fn code(&self) -> &[u8] {
        &self.bytes
    }

    fn imported_funcs(&self) -> impl Iterator<Item = u32> + '_ {
        self.imports.iter().filter_map(|i| match i.desc {
            ImportDesc::Func(ty) => Some(ty),
            _ => None,
        })
    }

    /// Total number of function indices (imported + defined).
    pub fn num_funcs(&self) -> u32 {
        self.imported_funcs().count() as u32 + self.funcs.len() as u32
    }

    /// Resolves a function index (import-space first, then defined-space)
    /// to its [`FuncType`].
    pub fn functype_of(&self, func_idx: u32) -> &FuncType {
        let num_imported = self.imported_funcs().count() as u32;
        if func_idx < num_imported {
            let type_idx = self.imported_funcs().nth(func_idx as usize).expect("checked above");
            &self.types[type_idx as usize]
        } else {
            let def = &self.funcs[(func_idx - num_imported) as usize];
            &self.types[def.type_idx as usize]
        }
    }

    pub fn num_imported_funcs(&self) -> u32 {
        self.imported_funcs().count() as u32
    }

    pub fn find_export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }
}

pub fn default_value(ty: wasmi_core::ValueType) -> Value {
    Value::default_for(ty)
}

pub fn ref_default(ty: wasmi_core::ValueType) -> Value {
    match ty {
        wasmi_core::ValueType::FuncRef => Value::FuncRef(RefType::Null),
        wasmi_core::ValueType::ExternRef => Value::ExternRef(RefType::Null),
        other => Value::default_for(other),
    }
}
