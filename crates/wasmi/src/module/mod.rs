//! Module loading: binary decode (§4.1) and validation (§4.2) combined into
//! a single immutable [`Module`] intermediate representation.

mod decode;
mod types;
pub(crate) mod validate;

pub use self::types::{
    default_value, ref_default, ConstExpr, DataMode, DataSegment, ElementInit, ElementMode, ElementSegment, Export,
    ExternKind, FuncBody, GlobalDef, GlobalType, Import, ImportDesc, LocalsChunk, MemoryType, Module, TableType,
};
pub use self::decode::decode_module;
pub(crate) use self::decode::valtype_from_wp;
