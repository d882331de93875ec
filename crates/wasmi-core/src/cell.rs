//! 32-bit storage cells for the operand stack and locals.
//!
//! A [`Value`] of type `t` occupies `t.cells()` consecutive [`Cell`]s. Using
//! a flat cell array (rather than an array of tagged [`Value`]s) keeps the
//! hot interpreter stack free of the discriminant and padding a tagged union
//! would otherwise carry, at the cost of needing the validator's inferred
//! type to interpret a span of cells back into a [`Value`].

use crate::value::{RefType, ValueType, Value, F32, F64};

/// A single 32-bit operand-stack storage word.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Cell(pub u32);

impl Cell {
    pub const ZERO: Cell = Cell(0);
}

/// Describes how many [`Cell`]s a [`ValueType`] occupies and how to convert
/// between a [`Value`] and its cell-level representation.
pub struct CellLayout;

impl CellLayout {
    /// Writes `value` into `out`, which must be exactly `value.ty().cells()` long.
    pub fn write(value: Value, out: &mut [Cell]) {
        match value {
            Value::I32(v) => out[0] = Cell(v as u32),
            Value::F32(v) => out[0] = Cell(v.to_bits()),
            Value::I64(v) => {
                out[0] = Cell(v as u64 as u32);
                out[1] = Cell((v as u64 >> 32) as u32);
            }
            Value::F64(v) => {
                let bits = v.to_bits();
                out[0] = Cell(bits as u32);
                out[1] = Cell((bits >> 32) as u32);
            }
            Value::V128(v) => {
                for (i, cell) in out.iter_mut().enumerate().take(4) {
                    *cell = Cell((v >> (i * 32)) as u32);
                }
            }
            Value::FuncRef(r) | Value::ExternRef(r) => write_ref(r, out),
        }
    }

    /// Reads a [`Value`] of type `ty` out of `cells`, which must be exactly
    /// `ty.cells()` long.
    pub fn read(ty: ValueType, cells: &[Cell]) -> Value {
        match ty {
            ValueType::I32 => Value::I32(cells[0].0 as i32),
            ValueType::F32 => Value::F32(F32::from_bits(cells[0].0)),
            ValueType::I64 => {
                let lo = cells[0].0 as u64;
                let hi = cells[1].0 as u64;
                Value::I64(((hi << 32) | lo) as i64)
            }
            ValueType::F64 => {
                let lo = cells[0].0 as u64;
                let hi = cells[1].0 as u64;
                Value::F64(F64::from_bits((hi << 32) | lo))
            }
            ValueType::V128 => {
                let mut v = 0u128;
                for (i, cell) in cells.iter().enumerate().take(4) {
                    v |= (cell.0 as u128) << (i * 32);
                }
                Value::V128(v)
            }
            ValueType::FuncRef => Value::FuncRef(read_ref(cells)),
            ValueType::ExternRef => Value::ExternRef(read_ref(cells)),
            ValueType::Unknown => unreachable!("Unknown is validator-only"),
        }
    }
}

/// Reference encoding: cell 0 is a tag (0 = null, 1 = func, 2 = extern),
/// cell 1 the payload index. Kept explicit (rather than a sentinel pointer
/// value) so a null reference can never alias a valid index.
fn write_ref(r: RefType, out: &mut [Cell]) {
    match r {
        RefType::Null => {
            out[0] = Cell(0);
            out[1] = Cell(0);
        }
        RefType::Func(idx) => {
            out[0] = Cell(1);
            out[1] = Cell(idx);
        }
        RefType::Extern(idx) => {
            out[0] = Cell(2);
            out[1] = Cell(idx);
        }
    }
}

fn read_ref(cells: &[Cell]) -> RefType {
    match cells[0].0 {
        0 => RefType::Null,
        1 => RefType::Func(cells[1].0),
        2 => RefType::Extern(cells[1].0),
        tag => unreachable!("invalid reference tag {tag}"),
    }
}
