//! The per-function validator (§4.2).
//!
//! Walks a function body's operator stream exactly once, maintaining a
//! symbolic operand-type stack and a control-frame stack, and emits the
//! [`JumpTable`] the interpreter uses to resolve block/if/else/end targets
//! without re-scanning the binary.

use alloc::{vec, vec::Vec};
use wasmi_core::{FuncType, ValueType};
use wasmparser::{BlockType as WpBlockType, FunctionBody, Operator};

use crate::{
    engine::jumptable::{BlockTarget, JumpTable},
    error::ValidationError,
    module::types::{FuncBody, Module},
};

/// Symbolic operand stack entry. `Unknown` unifies with any concrete type
/// and is pushed implicitly by `unreachable`/`br`/`br_table`/`return` to
/// keep the stack polymorphic for dead code that follows.
type SymType = ValueType;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CtrlOp {
    Block,
    Loop,
    If,
    /// The `else` arm of an `if` that had a true-branch.
    Else,
    /// The implicit outermost frame representing the function body itself.
    Invoke,
}

struct CtrlFrame {
    op: CtrlOp,
    start_types: Vec<ValueType>,
    end_types: Vec<ValueType>,
    /// Height of the symbolic operand stack when this frame was entered.
    height: usize,
    unreachable: bool,
    /// pc (operator offset) of the opening `block`/`loop`/`if` instruction,
    /// used as the jump-table key to patch in at `end`/`else`.
    open_pc: usize,
    /// Set once an `if` enters its true-branch and needs a companion
    /// `else_target` patched in case no `else` is ever seen.
    is_if_without_else_yet: bool,
}

struct Validator<'m> {
    module: &'m Module,
    valtypes: Vec<SymType>,
    cframes: Vec<CtrlFrame>,
    locals: Vec<ValueType>,
    jump_table: JumpTable,
    max_height: usize,
    max_label_depth: usize,
}

fn blocktype_to_functype(module: &Module, bt: WpBlockType) -> Result<FuncType, ValidationError> {
    Ok(match bt {
        WpBlockType::Empty => FuncType::new([], []),
        WpBlockType::Type(t) => FuncType::new([], [super::decode::valtype_from_wp(t)]),
        WpBlockType::FuncType(idx) => module
            .types
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| ValidationError::new(0, "block type references unknown type index"))?,
    })
}

impl<'m> Validator<'m> {
    fn push(&mut self, ty: SymType) {
        self.valtypes.push(ty);
        self.max_height = self.max_height.max(self.valtypes.len());
    }

    fn push_many(&mut self, tys: &[ValueType]) {
        for &t in tys {
            self.push(t);
        }
    }

    fn top_frame_height(&self) -> usize {
        self.cframes.last().expect("always at least one frame").height
    }

    fn top_unreachable(&self) -> bool {
        self.cframes.last().expect("always at least one frame").unreachable
    }

    fn pop(&mut self, expected: Option<ValueType>, offset: usize) -> Result<ValueType, ValidationError> {
        let height = self.top_frame_height();
        if self.valtypes.len() == height {
            if self.top_unreachable() {
                // Polymorphic stack: popping past the frame's height after
                // `unreachable` yields `Unknown`, which unifies with
                // anything.
                return Ok(expected.unwrap_or(ValueType::Unknown));
            }
            return Err(ValidationError::new(offset, "operand stack underflow"));
        }
        let got = self.valtypes.pop().expect("checked non-empty above");
        if let Some(expected) = expected {
            if got != expected && got != ValueType::Unknown && expected != ValueType::Unknown {
                return Err(ValidationError::new(
                    offset,
                    alloc::format!("type mismatch: expected {expected:?}, got {got:?}"),
                ));
            }
        }
        Ok(got)
    }

    fn pop_many(&mut self, expected: &[ValueType], offset: usize) -> Result<(), ValidationError> {
        for &ty in expected.iter().rev() {
            self.pop(Some(ty), offset)?;
        }
        Ok(())
    }

    fn mark_unreachable(&mut self) {
        let height = self.top_frame_height();
        self.valtypes.truncate(height);
        self.cframes.last_mut().expect("always at least one frame").unreachable = true;
    }

    fn push_ctrl(&mut self, op: CtrlOp, start_types: Vec<ValueType>, end_types: Vec<ValueType>, open_pc: usize) {
        let height = self.valtypes.len();
        self.push_many(&start_types);
        self.cframes.push(CtrlFrame {
            op,
            start_types,
            end_types,
            height,
            unreachable: false,
            open_pc,
            is_if_without_else_yet: false,
        });
        self.max_label_depth = self.max_label_depth.max(self.cframes.len());
    }

    /// Pops the innermost control frame, typechecking its end-types against
    /// the current stack, and returns it.
    fn pop_ctrl(&mut self, offset: usize) -> Result<CtrlFrame, ValidationError> {
        let frame = self.cframes.last().expect("always at least one frame");
        let end_types = frame.end_types.clone();
        self.pop_many(&end_types, offset)?;
        let frame = self.cframes.last().expect("checked above");
        if self.valtypes.len() != frame.height {
            return Err(ValidationError::new(offset, "values remaining on stack at end of block"));
        }
        let frame = self.cframes.pop().expect("checked above");
        self.push_many(&end_types);
        Ok(frame)
    }

    fn label_types(&self, relative_depth: u32, offset: usize) -> Result<Vec<ValueType>, ValidationError> {
        let idx = self
            .cframes
            .len()
            .checked_sub(1 + relative_depth as usize)
            .ok_or_else(|| ValidationError::new(offset, "branch depth out of range"))?;
        let frame = &self.cframes[idx];
        Ok(if frame.op == CtrlOp::Loop {
            frame.start_types.clone()
        } else {
            frame.end_types.clone()
        })
    }
}

/// Runs the validator over a single function's operator stream.
///
/// `offset_base` is the byte offset of the first operator, so emitted pcs
/// and error offsets line up with the original binary.
pub(crate) fn validate_function(
    module: &Module,
    func_type: &FuncType,
    locals: &[ValueType],
    body: &FunctionBody,
    offset_base: usize,
) -> Result<JumpTable, ValidationError> {
    let mut v = Validator {
        module,
        valtypes: Vec::new(),
        cframes: Vec::new(),
        locals: locals.to_vec(),
        jump_table: JumpTable::new(),
        max_height: 0,
        max_label_depth: 0,
    };
    v.push_ctrl(CtrlOp::Invoke, vec![], func_type.results().to_vec(), 0);

    let mut reader = body
        .get_operators_reader()
        .map_err(|e| ValidationError::new(offset_base, alloc::format!("{e}")))?;

    while !reader.eof() {
        let pos = reader.original_position();
        let op = reader
            .read()
            .map_err(|e| ValidationError::new(pos, alloc::format!("{e}")))?;
        validate_one(&mut v, op, pos)?;
    }

    if v.cframes.len() != 1 {
        return Err(ValidationError::new(offset_base, "function body ends with unclosed blocks"));
    }
    v.pop_ctrl(offset_base)?;

    v.jump_table.max_cells = v.max_height as u32 * 2; // conservative: widest value (i64/ref) is 2 cells
    v.jump_table.max_labels = v.max_label_depth as u32;
    Ok(v.jump_table)
}

fn validate_one(v: &mut Validator, op: Operator, pos: usize) -> Result<(), ValidationError> {
    use Operator as O;
    match op {
        O::Unreachable => v.mark_unreachable(),
        O::Nop => {}
        O::Block { blockty } => {
            let ft = blocktype_to_functype(v.module, blockty)?;
            v.pop_many(ft.params(), pos)?;
            v.push_ctrl(CtrlOp::Block, ft.params().to_vec(), ft.results().to_vec(), pos);
        }
        O::Loop { blockty } => {
            let ft = blocktype_to_functype(v.module, blockty)?;
            v.pop_many(ft.params(), pos)?;
            v.push_ctrl(CtrlOp::Loop, ft.params().to_vec(), ft.results().to_vec(), pos);
        }
        O::If { blockty } => {
            v.pop(Some(ValueType::I32), pos)?;
            let ft = blocktype_to_functype(v.module, blockty)?;
            v.pop_many(ft.params(), pos)?;
            v.push_ctrl(CtrlOp::If, ft.params().to_vec(), ft.results().to_vec(), pos);
            v.cframes.last_mut().expect("just pushed").is_if_without_else_yet = true;
        }
        O::Else => {
            let frame = v.pop_ctrl(pos)?;
            if frame.op != CtrlOp::If {
                return Err(ValidationError::new(pos, "`else` without matching `if`"));
            }
            // Patch the `if`'s false-branch target: it jumps here.
            v.jump_table.insert(
                frame.open_pc,
                BlockTarget {
                    else_target: Some(pos),
                    end_pc: usize::MAX, // patched again when the matching `end` is seen
                },
            );
            v.push_ctrl(CtrlOp::Else, frame.start_types, frame.end_types, frame.open_pc);
        }
        O::End => {
            let frame = v.pop_ctrl(pos)?;
            let end_pc = pos; // pc of the instruction right after `end`'s opcode byte is filled by caller advancing
            match frame.op {
                CtrlOp::Loop => {
                    // loops never need a jump-table entry: their branch
                    // target is their own header pc, known statically when
                    // `loop` executes.
                }
                CtrlOp::If if frame.is_if_without_else_yet => {
                    v.jump_table.insert(
                        frame.open_pc,
                        BlockTarget {
                            else_target: Some(end_pc),
                            end_pc,
                        },
                    );
                }
                CtrlOp::If | CtrlOp::Else => {
                    if let Some(existing) = v.jump_table.get(frame.open_pc).copied() {
                        v.jump_table.insert(
                            frame.open_pc,
                            BlockTarget {
                                else_target: existing.else_target,
                                end_pc,
                            },
                        );
                    }
                }
                CtrlOp::Block => {
                    v.jump_table.insert(frame.open_pc, BlockTarget { else_target: None, end_pc });
                }
                CtrlOp::Invoke => {}
            }
        }
        O::Br { relative_depth } => {
            let tys = v.label_types(relative_depth, pos)?;
            v.pop_many(&tys, pos)?;
            v.mark_unreachable();
        }
        O::BrIf { relative_depth } => {
            v.pop(Some(ValueType::I32), pos)?;
            let tys = v.label_types(relative_depth, pos)?;
            v.pop_many(&tys, pos)?;
            v.push_many(&tys);
        }
        O::BrTable { targets } => {
            v.pop(Some(ValueType::I32), pos)?;
            let default_tys = v.label_types(targets.default(), pos)?;
            for t in targets.targets() {
                let t = t.map_err(|e| ValidationError::new(pos, alloc::format!("{e}")))?;
                let tys = v.label_types(t, pos)?;
                if tys.len() != default_tys.len() {
                    return Err(ValidationError::new(pos, "br_table arity mismatch"));
                }
            }
            v.pop_many(&default_tys, pos)?;
            v.mark_unreachable();
        }
        O::Return => {
            let tys = v.cframes[0].end_types.clone();
            v.pop_many(&tys, pos)?;
            v.mark_unreachable();
        }
        O::Call { function_index } => {
            let ft = v.module.functype_of(function_index).clone();
            v.pop_many(ft.params(), pos)?;
            v.push_many(ft.results());
        }
        O::CallIndirect { type_index, table_index, .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            let _ = table_index;
            let ft = v
                .module
                .types
                .get(type_index as usize)
                .cloned()
                .ok_or_else(|| ValidationError::new(pos, "unknown type index"))?;
            v.pop_many(ft.params(), pos)?;
            v.push_many(ft.results());
        }
        O::Drop => {
            let ty = v.pop(None, pos)?;
            v.jump_table.insert_width(pos, ty.cells());
        }
        O::Select => {
            v.pop(Some(ValueType::I32), pos)?;
            let b = v.pop(None, pos)?;
            let a = v.pop(None, pos)?;
            let ty = if a == ValueType::Unknown { b } else { a };
            v.jump_table.insert_width(pos, ty.cells());
            v.push(ty);
        }
        O::TypedSelect { ty } => {
            v.pop(Some(ValueType::I32), pos)?;
            let ty = super::decode::valtype_from_wp(ty);
            v.pop(Some(ty), pos)?;
            v.pop(Some(ty), pos)?;
            v.jump_table.insert_width(pos, ty.cells());
            v.push(ty);
        }
        O::LocalGet { local_index } => {
            let ty = *v.locals.get(local_index as usize).ok_or_else(|| ValidationError::new(pos, "unknown local"))?;
            v.push(ty);
        }
        O::LocalSet { local_index } => {
            let ty = *v.locals.get(local_index as usize).ok_or_else(|| ValidationError::new(pos, "unknown local"))?;
            v.pop(Some(ty), pos)?;
        }
        O::LocalTee { local_index } => {
            let ty = *v.locals.get(local_index as usize).ok_or_else(|| ValidationError::new(pos, "unknown local"))?;
            v.pop(Some(ty), pos)?;
            v.push(ty);
        }
        O::GlobalGet { global_index } => {
            let ty = global_type(v.module, global_index, pos)?.content;
            v.push(ty);
        }
        O::GlobalSet { global_index } => {
            let gty = global_type(v.module, global_index, pos)?;
            if !gty.mutable {
                return Err(ValidationError::new(pos, "global.set of immutable global"));
            }
            v.pop(Some(gty.content), pos)?;
        }
        O::I32Load { .. }
        | O::I32Load8S { .. }
        | O::I32Load8U { .. }
        | O::I32Load16S { .. }
        | O::I32Load16U { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I32);
        }
        O::I64Load { .. }
        | O::I64Load8S { .. }
        | O::I64Load8U { .. }
        | O::I64Load16S { .. }
        | O::I64Load16U { .. }
        | O::I64Load32S { .. }
        | O::I64Load32U { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I64);
        }
        O::F32Load { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::F32);
        }
        O::F64Load { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::F64);
        }
        O::I32Store { .. } | O::I32Store8 { .. } | O::I32Store16 { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
        }
        O::I64Store { .. } | O::I64Store8 { .. } | O::I64Store16 { .. } | O::I64Store32 { .. } => {
            v.pop(Some(ValueType::I64), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
        }
        O::F32Store { .. } => {
            v.pop(Some(ValueType::F32), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
        }
        O::F64Store { .. } => {
            v.pop(Some(ValueType::F64), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
        }
        O::MemorySize { .. } => v.push(ValueType::I32),
        O::MemoryGrow { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I32);
        }
        O::MemoryInit { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32, ValueType::I32], pos)?;
        }
        O::DataDrop { .. } => {}
        O::MemoryCopy { .. } | O::MemoryFill { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32, ValueType::I32], pos)?;
        }
        O::TableGet { table } => {
            v.pop(Some(ValueType::I32), pos)?;
            let ty = table_type(v.module, table, pos)?.element;
            v.push(ty);
        }
        O::TableSet { table } => {
            let ty = table_type(v.module, table, pos)?.element;
            v.pop(Some(ty), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
        }
        O::TableInit { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32, ValueType::I32], pos)?;
        }
        O::ElemDrop { .. } => {}
        O::TableCopy { .. } | O::TableFill { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32, ValueType::I32], pos)?;
        }
        O::TableGrow { table } => {
            let ty = table_type(v.module, table, pos)?.element;
            v.pop(Some(ValueType::I32), pos)?;
            v.pop(Some(ty), pos)?;
            v.push(ValueType::I32);
        }
        O::TableSize { .. } => v.push(ValueType::I32),
        O::RefNull { hty } => {
            let ty = match hty {
                wasmparser::HeapType::Func => ValueType::FuncRef,
                _ => ValueType::ExternRef,
            };
            v.push(ty);
        }
        O::RefIsNull => {
            v.pop(None, pos)?;
            v.push(ValueType::I32);
        }
        O::RefFunc { .. } => v.push(ValueType::FuncRef),
        O::I32Const { .. } => v.push(ValueType::I32),
        O::I64Const { .. } => v.push(ValueType::I64),
        O::F32Const { .. } => v.push(ValueType::F32),
        O::F64Const { .. } => v.push(ValueType::F64),

        // Numeric unary/binary/test/relational/conversion operators: a
        // closed, exhaustively-enumerated family. Grouped by arity/type
        // rather than spelled out with per-opcode prose.
        op if is_i32_unop(&op) => unop(v, ValueType::I32, pos)?,
        op if is_i64_unop(&op) => unop(v, ValueType::I64, pos)?,
        op if is_f32_unop(&op) => unop(v, ValueType::F32, pos)?,
        op if is_f64_unop(&op) => unop(v, ValueType::F64, pos)?,
        op if is_i32_binop(&op) => binop(v, ValueType::I32, pos)?,
        op if is_i64_binop(&op) => binop(v, ValueType::I64, pos)?,
        op if is_f32_binop(&op) => binop(v, ValueType::F32, pos)?,
        op if is_f64_binop(&op) => binop(v, ValueType::F64, pos)?,
        op if is_i32_testop(&op) => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I32);
        }
        op if is_i64_testop(&op) => {
            v.pop(Some(ValueType::I64), pos)?;
            v.push(ValueType::I32);
        }
        O::I32Eq | O::I32Ne | O::I32LtS | O::I32LtU | O::I32GtS | O::I32GtU | O::I32LeS | O::I32LeU | O::I32GeS
        | O::I32GeU => {
            v.pop_many(&[ValueType::I32, ValueType::I32], pos)?;
            v.push(ValueType::I32);
        }
        O::I64Eq | O::I64Ne | O::I64LtS | O::I64LtU | O::I64GtS | O::I64GtU | O::I64LeS | O::I64LeU | O::I64GeS
        | O::I64GeU => {
            v.pop_many(&[ValueType::I64, ValueType::I64], pos)?;
            v.push(ValueType::I32);
        }
        O::F32Eq | O::F32Ne | O::F32Lt | O::F32Gt | O::F32Le | O::F32Ge => {
            v.pop_many(&[ValueType::F32, ValueType::F32], pos)?;
            v.push(ValueType::I32);
        }
        O::F64Eq | O::F64Ne | O::F64Lt | O::F64Gt | O::F64Le | O::F64Ge => {
            v.pop_many(&[ValueType::F64, ValueType::F64], pos)?;
            v.push(ValueType::I32);
        }
        O::I32WrapI64 => conv(v, ValueType::I64, ValueType::I32, pos)?,
        O::I32TruncF32S | O::I32TruncF32U | O::I32TruncSatF32S | O::I32TruncSatF32U => {
            conv(v, ValueType::F32, ValueType::I32, pos)?
        }
        O::I32TruncF64S | O::I32TruncF64U | O::I32TruncSatF64S | O::I32TruncSatF64U => {
            conv(v, ValueType::F64, ValueType::I32, pos)?
        }
        O::I64ExtendI32S | O::I64ExtendI32U => conv(v, ValueType::I32, ValueType::I64, pos)?,
        O::I64TruncF32S | O::I64TruncF32U | O::I64TruncSatF32S | O::I64TruncSatF32U => {
            conv(v, ValueType::F32, ValueType::I64, pos)?
        }
        O::I64TruncF64S | O::I64TruncF64U | O::I64TruncSatF64S | O::I64TruncSatF64U => {
            conv(v, ValueType::F64, ValueType::I64, pos)?
        }
        O::F32ConvertI32S | O::F32ConvertI32U => conv(v, ValueType::I32, ValueType::F32, pos)?,
        O::F32ConvertI64S | O::F32ConvertI64U => conv(v, ValueType::I64, ValueType::F32, pos)?,
        O::F32DemoteF64 => conv(v, ValueType::F64, ValueType::F32, pos)?,
        O::F64ConvertI32S | O::F64ConvertI32U => conv(v, ValueType::I32, ValueType::F64, pos)?,
        O::F64ConvertI64S | O::F64ConvertI64U => conv(v, ValueType::I64, ValueType::F64, pos)?,
        O::F64PromoteF32 => conv(v, ValueType::F32, ValueType::F64, pos)?,
        O::I32ReinterpretF32 => conv(v, ValueType::F32, ValueType::I32, pos)?,
        O::I64ReinterpretF64 => conv(v, ValueType::F64, ValueType::I64, pos)?,
        O::F32ReinterpretI32 => conv(v, ValueType::I32, ValueType::F32, pos)?,
        O::F64ReinterpretI64 => conv(v, ValueType::I64, ValueType::F64, pos)?,

        // Threads/atomics (§4.8): the full load/store/RMW surface, plus
        // `memory.atomic.wait`/`notify`. Narrow (8/16/32-bit) RMW and
        // cmpxchg variants still operate with their declared i32/i64 value
        // type; only the memory-side storage width differs.
        O::MemoryAtomicNotify { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32], pos)?;
            v.push(ValueType::I32);
        }
        O::MemoryAtomicWait32 { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32, ValueType::I64], pos)?;
            v.push(ValueType::I32);
        }
        O::MemoryAtomicWait64 { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I64, ValueType::I64], pos)?;
            v.push(ValueType::I32);
        }
        O::AtomicFence { .. } => {}
        O::I32AtomicLoad { .. } | O::I32AtomicLoad8U { .. } | O::I32AtomicLoad16U { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I32);
        }
        O::I32AtomicStore { .. } | O::I32AtomicStore8 { .. } | O::I32AtomicStore16 { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32], pos)?;
        }
        O::I64AtomicLoad { .. } | O::I64AtomicLoad8U { .. } | O::I64AtomicLoad16U { .. } | O::I64AtomicLoad32U { .. } => {
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I64);
        }
        O::I64AtomicStore { .. } | O::I64AtomicStore8 { .. } | O::I64AtomicStore16 { .. } | O::I64AtomicStore32 { .. } => {
            v.pop(Some(ValueType::I64), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
        }
        O::I32AtomicRmwAdd { .. }
        | O::I32AtomicRmwSub { .. }
        | O::I32AtomicRmwAnd { .. }
        | O::I32AtomicRmwOr { .. }
        | O::I32AtomicRmwXor { .. }
        | O::I32AtomicRmwXchg { .. }
        | O::I32AtomicRmw8AddU { .. }
        | O::I32AtomicRmw8SubU { .. }
        | O::I32AtomicRmw8AndU { .. }
        | O::I32AtomicRmw8OrU { .. }
        | O::I32AtomicRmw8XorU { .. }
        | O::I32AtomicRmw8XchgU { .. }
        | O::I32AtomicRmw16AddU { .. }
        | O::I32AtomicRmw16SubU { .. }
        | O::I32AtomicRmw16AndU { .. }
        | O::I32AtomicRmw16OrU { .. }
        | O::I32AtomicRmw16XorU { .. }
        | O::I32AtomicRmw16XchgU { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32], pos)?;
            v.push(ValueType::I32);
        }
        O::I32AtomicRmwCmpxchg { .. } | O::I32AtomicRmw8CmpxchgU { .. } | O::I32AtomicRmw16CmpxchgU { .. } => {
            v.pop_many(&[ValueType::I32, ValueType::I32, ValueType::I32], pos)?;
            v.push(ValueType::I32);
        }
        O::I64AtomicRmwAdd { .. }
        | O::I64AtomicRmwSub { .. }
        | O::I64AtomicRmwAnd { .. }
        | O::I64AtomicRmwOr { .. }
        | O::I64AtomicRmwXor { .. }
        | O::I64AtomicRmwXchg { .. }
        | O::I64AtomicRmw8AddU { .. }
        | O::I64AtomicRmw8SubU { .. }
        | O::I64AtomicRmw8AndU { .. }
        | O::I64AtomicRmw8OrU { .. }
        | O::I64AtomicRmw8XorU { .. }
        | O::I64AtomicRmw8XchgU { .. }
        | O::I64AtomicRmw16AddU { .. }
        | O::I64AtomicRmw16SubU { .. }
        | O::I64AtomicRmw16AndU { .. }
        | O::I64AtomicRmw16OrU { .. }
        | O::I64AtomicRmw16XorU { .. }
        | O::I64AtomicRmw16XchgU { .. }
        | O::I64AtomicRmw32AddU { .. }
        | O::I64AtomicRmw32SubU { .. }
        | O::I64AtomicRmw32AndU { .. }
        | O::I64AtomicRmw32OrU { .. }
        | O::I64AtomicRmw32XorU { .. }
        | O::I64AtomicRmw32XchgU { .. } => {
            v.pop(Some(ValueType::I64), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I64);
        }
        O::I64AtomicRmwCmpxchg { .. }
        | O::I64AtomicRmw8CmpxchgU { .. }
        | O::I64AtomicRmw16CmpxchgU { .. }
        | O::I64AtomicRmw32CmpxchgU { .. } => {
            v.pop(Some(ValueType::I64), pos)?;
            v.pop(Some(ValueType::I64), pos)?;
            v.pop(Some(ValueType::I32), pos)?;
            v.push(ValueType::I64);
        }

        // SIMD and anything else unrecognised: execution is optional per
        // the non-goals, but we still refuse to silently mis-typecheck it.
        other => {
            return Err(ValidationError::new(
                pos,
                alloc::format!("unsupported instruction: {other:?}"),
            ))
        }
    }
    Ok(())
}

fn unop(v: &mut Validator, ty: ValueType, pos: usize) -> Result<(), ValidationError> {
    v.pop(Some(ty), pos)?;
    v.push(ty);
    Ok(())
}

fn binop(v: &mut Validator, ty: ValueType, pos: usize) -> Result<(), ValidationError> {
    v.pop(Some(ty), pos)?;
    v.pop(Some(ty), pos)?;
    v.push(ty);
    Ok(())
}

fn conv(v: &mut Validator, from: ValueType, to: ValueType, pos: usize) -> Result<(), ValidationError> {
    v.pop(Some(from), pos)?;
    v.push(to);
    Ok(())
}

fn is_i32_unop(op: &Operator) -> bool {
    matches!(op, Operator::I32Clz | Operator::I32Ctz | Operator::I32Popcnt | Operator::I32Extend8S | Operator::I32Extend16S)
}
fn is_i64_unop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::I64Clz | Operator::I64Ctz | Operator::I64Popcnt | Operator::I64Extend8S | Operator::I64Extend16S | Operator::I64Extend32S
    )
}
fn is_f32_unop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::F32Abs | Operator::F32Neg | Operator::F32Ceil | Operator::F32Floor | Operator::F32Trunc | Operator::F32Nearest | Operator::F32Sqrt
    )
}
fn is_f64_unop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::F64Abs | Operator::F64Neg | Operator::F64Ceil | Operator::F64Floor | Operator::F64Trunc | Operator::F64Nearest | Operator::F64Sqrt
    )
}
fn is_i32_binop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::I32Add
            | Operator::I32Sub
            | Operator::I32Mul
            | Operator::I32DivS
            | Operator::I32DivU
            | Operator::I32RemS
            | Operator::I32RemU
            | Operator::I32And
            | Operator::I32Or
            | Operator::I32Xor
            | Operator::I32Shl
            | Operator::I32ShrS
            | Operator::I32ShrU
            | Operator::I32Rotl
            | Operator::I32Rotr
    )
}
fn is_i64_binop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::I64Add
            | Operator::I64Sub
            | Operator::I64Mul
            | Operator::I64DivS
            | Operator::I64DivU
            | Operator::I64RemS
            | Operator::I64RemU
            | Operator::I64And
            | Operator::I64Or
            | Operator::I64Xor
            | Operator::I64Shl
            | Operator::I64ShrS
            | Operator::I64ShrU
            | Operator::I64Rotl
            | Operator::I64Rotr
    )
}
fn is_f32_binop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::F32Add | Operator::F32Sub | Operator::F32Mul | Operator::F32Div | Operator::F32Min | Operator::F32Max | Operator::F32Copysign
    )
}
fn is_f64_binop(op: &Operator) -> bool {
    matches!(
        op,
        Operator::F64Add | Operator::F64Sub | Operator::F64Mul | Operator::F64Div | Operator::F64Min | Operator::F64Max | Operator::F64Copysign
    )
}
fn is_i32_testop(op: &Operator) -> bool {
    matches!(op, Operator::I32Eqz)
}
fn is_i64_testop(op: &Operator) -> bool {
    matches!(op, Operator::I64Eqz)
}

fn global_type(module: &Module, idx: u32, pos: usize) -> Result<super::types::GlobalType, ValidationError> {
    module
        .globals
        .get(idx as usize)
        .map(|def| def.ty)
        .ok_or_else(|| ValidationError::new(pos, "unknown global index"))
}

fn table_type(module: &Module, idx: u32, pos: usize) -> Result<super::types::TableType, ValidationError> {
    module
        .tables
        .get(idx as usize)
        .copied()
        .ok_or_else(|| ValidationError::new(pos, "unknown table index"))
}

/// Flattens a function's param types and declared local chunks into the
/// per-call local layout the validator and interpreter both index into.
pub(crate) fn flatten_locals(func_type: &FuncType, locals: &[super::types::LocalsChunk]) -> Vec<ValueType> {
    let mut flat: Vec<ValueType> = func_type.params().to_vec();
    for chunk in locals {
        flat.extend(core::iter::repeat(chunk.ty).take(chunk.count as usize));
    }
    flat
}
