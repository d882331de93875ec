//! The host function ABI (§4.5): registering host-implemented imports, and
//! the memory helpers host functions use to read/write the caller's linear
//! memory.

use alloc::{rc::Rc, string::String, vec::Vec};
use core::cell::RefCell;

use wasmi_core::{Cell, CellLayout, FuncType, Trap, TrapCode, ValueType};

use crate::engine::{ExecContext, RestartRecord, RestartState};
use crate::instance::{HostFunc, HostModule, Instance, MemInst};

/// Parses a compact type-string signature — `'i'`=i32, `'I'`=i64, `'f'`=f32,
/// `'F'`=f64, parenthesised params followed by the (0 or 1) result types —
/// into a [`FuncType`]. `"(iI)i"` is a function taking `(i32, i64)` and
/// returning `i32`.
pub fn parse_type_string(s: &str) -> Result<FuncType, String> {
    let open = s.find('(').ok_or_else(|| alloc::format!("missing '(' in type string {s:?}"))?;
    let close = s.find(')').ok_or_else(|| alloc::format!("missing ')' in type string {s:?}"))?;
    if open != 0 || close < open {
        return Err(alloc::format!("malformed type string {s:?}"));
    }
    let params = s[open + 1..close]
        .chars()
        .map(parse_valtype_char)
        .collect::<Result<Vec<_>, _>>()?;
    let results = s[close + 1..]
        .chars()
        .map(parse_valtype_char)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FuncType::new(params, results))
}

fn parse_valtype_char(c: char) -> Result<ValueType, String> {
    match c {
        'i' => Ok(ValueType::I32),
        'I' => Ok(ValueType::I64),
        'f' => Ok(ValueType::F32),
        'F' => Ok(ValueType::F64),
        other => Err(alloc::format!("unknown type-string character {other:?}")),
    }
}

/// Builds one registerable host function from a type string and a callback
/// that runs to completion without suspending — the common case for
/// non-blocking WASI calls. Wraps it into the restartable ABI by always
/// returning [`RestartState::Done`].
pub fn host_fn(
    type_string: &str,
    f: impl Fn(&mut ExecContext, &[Cell], &mut [Cell]) -> Result<(), Trap> + 'static,
) -> Result<HostFunc, String> {
    let ty = parse_type_string(type_string)?;
    Ok(HostFunc {
        ty,
        call: Rc::new(move |ctx, params, results| {
            f(ctx, params, results)?;
            Ok(RestartState::Done)
        }),
    })
}

/// Builds one registerable host function from a type string and a callback
/// that drives the restartable ABI itself, for host functions that may need
/// to suspend (e.g. a cooperative `sched_yield`) rather than always running
/// to completion in one call.
pub fn host_fn_restartable(
    type_string: &str,
    f: impl Fn(&mut ExecContext, &[Cell], &mut [Cell]) -> Result<RestartState, Trap> + 'static,
) -> Result<HostFunc, String> {
    let ty = parse_type_string(type_string)?;
    Ok(HostFunc {
        ty,
        call: Rc::new(move |ctx, params, results| f(ctx, params, results)),
    })
}

/// Suspends the calling host function exactly once, then completes on
/// re-entry. Used by host functions (e.g. `sched_yield`) whose entire
/// contribution to cooperative scheduling is "give another peer a turn".
///
/// Outside a cluster there is no peer to hand control to, so this resolves
/// immediately instead of parking forever.
pub fn yield_once(ctx: &mut ExecContext) -> Result<RestartState, Trap> {
    if !ctx.in_cluster() {
        return Ok(RestartState::Done);
    }
    match ctx.restarts_mut().pop() {
        Some(record) if record.step == 1 => Ok(RestartState::Done),
        _ => {
            ctx.restarts_mut().push(RestartRecord::new(1));
            Ok(RestartState::Restart)
        }
    }
}

pub fn host_module(module_name: impl Into<String>, funcs: Vec<(String, HostFunc)>) -> HostModule {
    HostModule {
        module_name: module_name.into(),
        funcs,
    }
}

/// A handle a `HostModule`'s closures capture at registration time and the
/// embedder fills in right after `instantiate` returns.
///
/// Import resolution (§4.3 step 1) happens before the instance it resolves
/// into exists, so a host function that needs to read the *new* instance's
/// own exported memory (the overwhelmingly common case for WASI) cannot be
/// handed that memory up front. This cell is the deferred reference: the
/// host closures capture a clone of it, and the embedder calls
/// [`MemoryCell::bind`] once instantiation completes.
#[derive(Clone, Default)]
pub struct MemoryCell(Rc<RefCell<Option<Rc<RefCell<MemInst>>>>>);

impl MemoryCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds this cell to `instance`'s default (`"memory"`) export.
    pub fn bind(&self, instance: &Instance) {
        if let Some(crate::instance::Extern::Memory(mem)) = instance.find_export("memory") {
            *self.0.borrow_mut() = Some(mem);
        }
    }

    fn get(&self) -> Result<Rc<RefCell<MemInst>>, Trap> {
        self.0
            .borrow()
            .clone()
            .ok_or_else(|| Trap::with_message(TrapCode::Unreachable, "host function used before its memory was bound"))
    }
}

/// Copies `size` bytes out of the bound memory at `wasm_addr` into `host_buf`.
///
/// Unlike the original C ABI this mirrors, there is no pointer that can be
/// invalidated out from under a held borrow: the copy happens immediately
/// against the memory's current length, so there is nothing equivalent to
/// the original's "moved, retry" signal to detect here.
pub fn host_func_copyin(mem: &MemoryCell, wasm_addr: u32, host_buf: &mut [u8]) -> Result<(), Trap> {
    let mem = mem.get()?;
    let mem = mem.borrow();
    let start = wasm_addr as usize;
    let end = start
        .checked_add(host_buf.len())
        .ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem.data.len() {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    host_buf.copy_from_slice(&mem.data[start..end]);
    Ok(())
}

/// Copies `host_buf` into the bound memory at `wasm_addr`.
pub fn host_func_copyout(mem: &MemoryCell, wasm_addr: u32, host_buf: &[u8]) -> Result<(), Trap> {
    let mem = mem.get()?;
    let mut mem = mem.borrow_mut();
    let start = wasm_addr as usize;
    let end = start
        .checked_add(host_buf.len())
        .ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem.data.len() {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    mem.data[start..end].copy_from_slice(host_buf);
    Ok(())
}

/// Decodes a host function's whole params slice into [`Value`]s according to
/// `types`, the same `FuncType::params()` the function was registered with.
pub fn decode_params(types: &[ValueType], params: &[Cell]) -> Vec<wasmi_core::Value> {
    let mut values = Vec::with_capacity(types.len());
    let mut offset = 0;
    for ty in types {
        let width = ty.cells() as usize;
        values.push(CellLayout::read(*ty, &params[offset..offset + width]));
        offset += width;
    }
    values
}

/// Writes a single result value into a host function's results slice.
pub fn write_result(value: wasmi_core::Value, results: &mut [Cell]) {
    CellLayout::write(value, results);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_params_and_results() {
        let ty = parse_type_string("(iI)i").unwrap();
        assert_eq!(ty.params(), &[ValueType::I32, ValueType::I64]);
        assert_eq!(ty.results(), &[ValueType::I32]);
    }

    #[test]
    fn parses_no_results() {
        let ty = parse_type_string("(i)").unwrap();
        assert_eq!(ty.params(), &[ValueType::I32]);
        assert!(ty.results().is_empty());
    }

    #[test]
    fn rejects_missing_parens() {
        assert!(parse_type_string("ii").is_err());
    }
}
