//! The interpreter's flat operand cell stack (§3, §4.4).

use alloc::vec::Vec;
use wasmi_core::{Cell, CellLayout, Trap, TrapCode, Value, ValueType};

/// A flat array of [`Cell`]s, sized up front from the validator's
/// `max_cells` watermark (plus the local region of whichever frame is
/// active). Values are pushed/popped as runs of `ty.cells()` cells rather
/// than one cell at a time so callers never have to think in cell units.
#[derive(Debug, Default)]
pub(crate) struct Stack {
    cells: Vec<Cell>,
    limit: usize,
}

impl Stack {
    pub fn new(limit: u32) -> Self {
        Self {
            cells: Vec::new(),
            limit: limit as usize,
        }
    }

    pub fn height(&self) -> usize {
        self.cells.len()
    }

    pub fn truncate(&mut self, height: usize) {
        self.cells.truncate(height);
    }

    fn reserve_checked(&mut self, additional: usize) -> Result<(), Trap> {
        if self.cells.len() + additional > self.limit {
            return Err(Trap::new(TrapCode::TooManyStackCells));
        }
        Ok(())
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), Trap> {
        let ty = value.ty();
        let n = ty.cells() as usize;
        self.reserve_checked(n)?;
        let start = self.cells.len();
        self.cells.resize(start + n, Cell::ZERO);
        CellLayout::write(value, &mut self.cells[start..start + n]);
        Ok(())
    }

    pub fn pop_value(&mut self, ty: ValueType) -> Value {
        let n = ty.cells() as usize;
        let start = self.cells.len() - n;
        let value = CellLayout::read(ty, &self.cells[start..]);
        self.cells.truncate(start);
        value
    }

    pub fn push_cells(&mut self, cells: &[Cell]) -> Result<(), Trap> {
        self.reserve_checked(cells.len())?;
        self.cells.extend_from_slice(cells);
        Ok(())
    }

    pub fn pop_cells(&mut self, n: usize) -> Vec<Cell> {
        let start = self.cells.len() - n;
        let tail = self.cells[start..].to_vec();
        self.cells.truncate(start);
        tail
    }

    pub fn cells_from(&self, height: usize) -> &[Cell] {
        &self.cells[height..]
    }

    pub fn cells_mut_from(&mut self, height: usize) -> &mut [Cell] {
        &mut self.cells[height..]
    }

    pub fn as_slice(&self) -> &[Cell] {
        &self.cells
    }
}
