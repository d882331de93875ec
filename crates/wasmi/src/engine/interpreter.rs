//! The interpreter dispatch loop (§4.4).
//!
//! The program counter is always a byte offset into the owning module's
//! original binary. Instead of translating to a separate bytecode, each
//! step repositions a [`wasmparser::OperatorsReader`] at the current pc and
//! decodes exactly one operator, which is how the "no code copy" property
//! from the decoder is preserved all the way into execution.

use alloc::{rc::Rc, vec::Vec};
use wasmparser::{BinaryReader, FunctionBody, Operator, WasmFeatures};

use wasmi_core::{Cell, CellLayout, Trap, TrapCode, Value, ValueType};

use crate::engine::{restart::RestartStack, wait::WaitRegistry, Config, Frame, Label, RestartState, Stack};
use crate::instance::{FuncInst, Instance};
use crate::module::ref_default;

/// One thread's worth of interpreter state, bound to a single instance for
/// the duration of a call chain.
pub struct ExecContext {
    pub(crate) config: Rc<Config>,
    stack: Stack,
    frames: Vec<Frame>,
    labels: Vec<Label>,
    /// Flat local storage for the currently active call chain; each frame's
    /// `locals_base` indexes into this.
    locals: Vec<Cell>,
    restarts: RestartStack,
    /// Shared interrupt flag (§4.6); polled between instructions when set.
    interrupt: Option<Rc<core::sync::atomic::AtomicU32>>,
    /// Shared wait/notify bookkeeping for `memory.atomic.wait`/`notify`
    /// (§4.8); `None` outside a cooperative cluster, where there is no other
    /// peer that could ever issue a matching `notify`.
    wait_registry: Option<Rc<WaitRegistry>>,
    /// The pc to resume dispatch from: the next instruction after the last
    /// one that completed, kept current across suspend/resume so `resume`
    /// does not have to recompute it from the active frame's function start.
    pc: usize,
    /// Set exactly when the most recent suspension happened inside a host
    /// call that itself asked to be resumed (`RestartState::Restart`); the
    /// callee has already consumed its operands, so resuming it means
    /// re-entering the host closure directly rather than re-dispatching the
    /// `call` instruction that invoked it.
    pending_host_call: Option<FuncInst>,
    /// Set exactly when the most recent suspension parked at a
    /// `memory.atomic.wait32/64` whose condition held; the instruction's
    /// operands are already consumed, so resuming it must re-check the wait
    /// registry directly rather than re-dispatching the instruction.
    parked_wait: Option<crate::engine::wait::WaitKey>,
}

impl ExecContext {
    pub fn new(config: Rc<Config>) -> Self {
        Self {
            stack: Stack::new(config.get_max_stackcells()),
            config,
            frames: Vec::new(),
            labels: Vec::new(),
            locals: Vec::new(),
            restarts: RestartStack::default(),
            interrupt: None,
            wait_registry: None,
            pc: 0,
            pending_host_call: None,
            parked_wait: None,
        }
    }

    pub fn with_interrupt(mut self, interrupt: Rc<core::sync::atomic::AtomicU32>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_wait_registry(mut self, wait_registry: Rc<WaitRegistry>) -> Self {
        self.wait_registry = Some(wait_registry);
        self
    }

    pub(crate) fn restarts_mut(&mut self) -> &mut RestartStack {
        &mut self.restarts
    }

    /// Whether this context is bound to a cooperative cluster (spawned via
    /// [`crate::Scheduler::spawn`]) rather than driven through a plain
    /// synchronous [`crate::Func::call`]. Restartable host functions that
    /// only make sense with a peer able to resume them (e.g. `sched_yield`)
    /// use this to fall back to completing immediately when there is no
    /// cluster to yield to.
    pub fn in_cluster(&self) -> bool {
        self.interrupt.is_some()
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(core::sync::atomic::Ordering::Acquire) != 0)
            .unwrap_or(false)
    }
}

/// Runs `func` to completion (or until it traps / suspends), returning its
/// results.
pub fn run(ctx: &mut ExecContext, func: &FuncInst, args: &[Value]) -> Result<CallOutcome, Trap> {
    match func {
        FuncInst::Host(h) => {
            let param_cells = cells_for(h.ty.params(), args);
            let mut result_cells = alloc::vec![Cell::ZERO; h.ty.results().iter().map(|t| t.cells()).sum::<u32>() as usize];
            let state = (h.call)(ctx, &param_cells, &mut result_cells)?;
            match state {
                RestartState::Restart => {
                    ctx.pending_host_call = Some(func.clone());
                    Ok(CallOutcome::Suspended)
                }
                RestartState::Done => Ok(CallOutcome::Finished(read_results(h.ty.results(), &result_cells))),
            }
        }
        FuncInst::Wasm { instance, func_idx } => {
            enter_wasm_call(ctx, instance, *func_idx, args, 0)?;
            let result_types = instance.module.functype_of(*func_idx).results().to_vec();
            drive(ctx, instance, &result_types)
        }
    }
}

/// Resumes a previously suspended execution context.
///
/// `entry` must be the same function passed to the [`run`] call that
/// suspended, so the result types line up once the call chain unwinds.
pub fn resume(ctx: &mut ExecContext, instance: &Instance, entry: &FuncInst) -> Result<CallOutcome, Trap> {
    let result_types = entry.ty().results().to_vec();
    if let Some(callee) = ctx.pending_host_call.take() {
        // The suspended host call already consumed its operands; finish it
        // out of band and splice its eventual results onto the still-intact
        // operand stack before letting `drive` continue the surrounding Wasm
        // frames from the pc right after the original `call`.
        match run(ctx, &callee, &[])? {
            CallOutcome::Finished(results) => {
                // A host function suspended with no surrounding Wasm frame
                // (it was the top-level entry itself) has no call to resume
                // into; its own results are the whole call's results.
                if ctx.frames.is_empty() {
                    return Ok(CallOutcome::Finished(results));
                }
                for r in results {
                    ctx.stack.push_value(r)?;
                }
            }
            CallOutcome::Suspended => {
                ctx.pending_host_call = Some(callee);
                return Ok(CallOutcome::Suspended);
            }
            CallOutcome::Interrupted => {
                ctx.pending_host_call = Some(callee);
                return Ok(CallOutcome::Interrupted);
            }
        }
    }
    drive(ctx, instance, &result_types)
}

pub enum CallOutcome {
    Finished(Vec<Value>),
    Suspended,
    /// Observed the shared interrupt flag rather than a voluntary suspend;
    /// the scheduler stops requeuing this task instead of spinning on it
    /// forever (§4.6).
    Interrupted,
}

fn cells_for(tys: &[ValueType], values: &[Value]) -> Vec<Cell> {
    let mut out = Vec::with_capacity(tys.iter().map(|t| t.cells() as usize).sum());
    for v in values {
        let mut buf = [Cell::ZERO; 4];
        let n = v.ty().cells() as usize;
        CellLayout::write(*v, &mut buf[..n]);
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn read_results(tys: &[ValueType], cells: &[Cell]) -> Vec<Value> {
    let mut out = Vec::with_capacity(tys.len());
    let mut off = 0;
    for &ty in tys {
        let n = ty.cells() as usize;
        out.push(CellLayout::read(ty, &cells[off..off + n]));
        off += n;
    }
    out
}

fn enter_wasm_call(ctx: &mut ExecContext, instance: &Instance, func_idx: u32, args: &[Value], caller_pc: usize) -> Result<(), Trap> {
    if ctx.frames.len() as u32 >= ctx.config.get_max_frames() {
        return Err(Trap::new(TrapCode::TooManyFrames));
    }
    let num_imported = instance.module.num_imported_funcs();
    let body = &instance.module.funcs[(func_idx - num_imported) as usize];
    let func_type = instance.module.functype_of(func_idx).clone();

    let locals_base = ctx.locals.len();
    for (param_ty, arg) in func_type.params().iter().zip(args) {
        let n = param_ty.cells() as usize;
        let start = ctx.locals.len();
        ctx.locals.resize(start + n, Cell::ZERO);
        CellLayout::write(*arg, &mut ctx.locals[start..start + n]);
    }
    for chunk in &body.locals {
        let n = chunk.ty.cells() as usize * chunk.count as usize;
        ctx.locals.resize(ctx.locals.len() + n, Cell::ZERO);
    }

    let stack_base = ctx.stack.height();
    let label_base = ctx.labels.len();
    ctx.frames.push(Frame {
        caller_pc,
        func_idx: Some(func_idx),
        result_cells: func_type.results().iter().map(|t| t.cells()).sum(),
        stack_base,
        locals_base,
        label_base,
    });
    ctx.labels.push(Label {
        target_pc: body.code_range.1,
        height: stack_base,
        arity: func_type.results().iter().map(|t| t.cells()).sum(),
        is_loop: false,
    });
    ctx.pc = body.code_range.0;
    Ok(())
}

/// Runs the current frame stack until it empties (the original call
/// returns) or a host call suspends it. `entry_result_types` describes the
/// outermost call's own results, used once the last frame pops.
fn drive(ctx: &mut ExecContext, instance: &Instance, entry_result_types: &[ValueType]) -> Result<CallOutcome, Trap> {
    let mut pc = ctx.pc;

    loop {
        if ctx.interrupted() {
            ctx.pc = pc;
            return Ok(CallOutcome::Interrupted);
        }
        let frame_idx = ctx.frames.len() - 1;
        let func_idx = ctx.frames[frame_idx].func_idx.expect("Wasm frame");
        let body = &instance.module.funcs[(func_idx - instance.module.num_imported_funcs()) as usize];

        if pc >= body.code_range.1 {
            // Fell off the end without an explicit `end` operator (should
            // not happen for a validated module, but treat as call-return).
            let (resume_pc, results, done) = pop_frame(ctx)?;
            if done {
                return Ok(CallOutcome::Finished(read_results(entry_result_types, &results)));
            }
            ctx.stack.push_cells(&results)?;
            pc = resume_pc;
            continue;
        }

        let data = &instance.module.code()[pc..body.code_range.1];
        let reader = BinaryReader::new_features(data, pc, WasmFeatures::empty());
        let func_body = FunctionBody::new(reader);
        let mut ops = func_body
            .get_operators_reader()
            .map_err(|_| Trap::new(TrapCode::Unreachable))?;
        let op = ops.read().map_err(|_| Trap::new(TrapCode::Unreachable))?;
        let consumed = ops.original_position() - pc;

        if ctx.config.tracing_enabled() {
            tracing::trace!(pc, op = ?op, stack_height = ctx.stack.height(), "dispatch");
        }

        // A parked `memory.atomic.wait` already consumed its operands; its
        // retry must not go through the normal dispatch below, which would
        // try to pop them again.
        if let Some(key) = ctx.parked_wait {
            if ctx.wait_registry.as_ref().expect("only ever parked with a registry bound").try_consume(key) {
                ctx.parked_wait = None;
                ctx.stack.push_value(Value::I32(0))?;
                pc += consumed;
                continue;
            }
            ctx.pc = pc;
            return Ok(CallOutcome::Suspended);
        }

        let step = step_one(ctx, instance, frame_idx, pc, &op, body.exec_info.get(pc).copied(), body.exec_info.width_at(pc))?;
        match step {
            Step::Advance => pc += consumed,
            Step::Jump(target) => pc = target,
            Step::Park => {
                ctx.pc = pc;
                return Ok(CallOutcome::Suspended);
            }
            Step::EndOfFunction => {
                let (resume_pc, results, done) = pop_frame(ctx)?;
                if done {
                    return Ok(CallOutcome::Finished(read_results(entry_result_types, &results)));
                }
                ctx.stack.push_cells(&results)?;
                pc = resume_pc;
            }
            Step::Call(callee) => {
                match &callee {
                    FuncInst::Wasm {
                        instance: callee_instance,
                        func_idx: callee_idx,
                    } => {
                        let args = pop_args(ctx, &callee.ty());
                        // Cross-instance calls (via imports) keep executing
                        // under the callee's own module/code; same-instance
                        // calls (the overwhelmingly common case) just push a
                        // new frame and keep driving the same loop.
                        if Rc::ptr_eq(callee_instance, instance) {
                            let resume_pc = pc + consumed;
                            enter_wasm_call(ctx, instance, *callee_idx, &args, resume_pc)?;
                            pc = ctx.pc;
                        } else {
                            let outcome = run(ctx, &callee, &args)?;
                            match outcome {
                                CallOutcome::Finished(results) => {
                                    for r in results {
                                        ctx.stack.push_value(r)?;
                                    }
                                    pc += consumed;
                                }
                                CallOutcome::Suspended => {
                                    ctx.pc = pc + consumed;
                                    return Ok(CallOutcome::Suspended);
                                }
                                CallOutcome::Interrupted => {
                                    ctx.pc = pc + consumed;
                                    return Ok(CallOutcome::Interrupted);
                                }
                            }
                        }
                    }
                    FuncInst::Host(_) => {
                        let args = pop_args(ctx, &callee.ty());
                        let outcome = run(ctx, &callee, &args)?;
                        match outcome {
                            CallOutcome::Finished(results) => {
                                for r in results {
                                    ctx.stack.push_value(r)?;
                                }
                                pc += consumed;
                            }
                            CallOutcome::Suspended => {
                                ctx.pc = pc + consumed;
                                return Ok(CallOutcome::Suspended);
                            }
                            CallOutcome::Interrupted => {
                                ctx.pc = pc + consumed;
                                return Ok(CallOutcome::Interrupted);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn pop_args(ctx: &mut ExecContext, ty: &wasmi_core::FuncType) -> Vec<Value> {
    let mut args = Vec::with_capacity(ty.params().len());
    for &p in ty.params().iter().rev() {
        args.push(ctx.stack.pop_value(p));
    }
    args.reverse();
    args
}

/// Pops the current frame, splicing its result cells off the operand stack
/// down to the frame's entry height. Returns the caller's resume pc, the
/// result cells, and whether this was the outermost frame (no caller to
/// resume).
fn pop_frame(ctx: &mut ExecContext) -> Result<(usize, Vec<Cell>, bool), Trap> {
    let frame = ctx.frames.pop().expect("there is always a current frame here");
    ctx.labels.truncate(frame.label_base);
    let results = ctx.stack.pop_cells(frame.result_cells as usize);
    ctx.stack.truncate(frame.stack_base);
    ctx.locals.truncate(frame.locals_base);
    Ok((frame.caller_pc, results, ctx.frames.is_empty()))
}

enum Step {
    Advance,
    Jump(usize),
    EndOfFunction,
    Call(FuncInst),
    /// Parked at a `memory.atomic.wait` whose condition held; `ctx.parked_wait`
    /// is already set, so the dispatch loop should suspend without advancing.
    Park,
}

fn label_at(ctx: &ExecContext, frame: &Frame, relative_depth: u32) -> Label {
    let idx = ctx.labels.len() - 1 - relative_depth as usize;
    debug_assert!(idx >= frame.label_base);
    ctx.labels[idx]
}

fn do_branch(ctx: &mut ExecContext, relative_depth: u32) -> usize {
    let frame = *ctx.frames.last().expect("current frame");
    let label = label_at(ctx, &frame, relative_depth);
    let n = label.arity as usize;
    let saved = ctx.stack.pop_cells(n);
    ctx.stack.truncate(label.height);
    ctx.stack.push_cells(&saved).expect("popped no more than was available");
    if !label.is_loop {
        ctx.labels.truncate(ctx.labels.len() - relative_depth as usize - 1);
    }
    label.target_pc
}

fn step_one(
    ctx: &mut ExecContext,
    instance: &Instance,
    frame_idx: usize,
    pc: usize,
    op: &Operator,
    target: Option<crate::engine::BlockTarget>,
    operand_width: Option<u32>,
) -> Result<Step, Trap> {
    use Operator as O;
    let frame = ctx.frames[frame_idx];

    macro_rules! binop_i32 {
        ($f:expr) => {{
            let b = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32($f(a, b)))?;
            Ok(Step::Advance)
        }};
    }
    macro_rules! binop_i64 {
        ($f:expr) => {{
            let b = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64($f(a, b)))?;
            Ok(Step::Advance)
        }};
    }

    match op {
        O::Unreachable => Err(Trap::new(TrapCode::Unreachable)),
        O::Nop => Ok(Step::Advance),
        O::Block { blockty } => {
            let param_cells = block_param_arity_of(instance, *blockty);
            let height = ctx.stack.height() - param_cells as usize;
            let end_pc = target.map(|t| t.end_pc).unwrap_or(pc);
            ctx.labels.push(Label {
                target_pc: end_pc,
                height,
                arity: block_result_arity_of(instance, *blockty),
                is_loop: false,
            });
            Ok(Step::Advance)
        }
        O::Loop { blockty } => {
            let param_cells = block_param_arity_of(instance, *blockty);
            let height = ctx.stack.height() - param_cells as usize;
            ctx.labels.push(Label {
                target_pc: pc,
                height,
                arity: param_cells,
                is_loop: true,
            });
            Ok(Step::Advance)
        }
        O::If { blockty } => {
            let cond = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let arity = block_result_arity_of(instance, *blockty);
            let param_cells = block_param_arity_of(instance, *blockty);
            let height = ctx.stack.height() - param_cells as usize;
            let t = target.expect("validator always emits a jump-table entry for `if`");
            if cond != 0 {
                ctx.labels.push(Label {
                    target_pc: t.end_pc,
                    height,
                    arity,
                    is_loop: false,
                });
                Ok(Step::Advance)
            } else {
                let else_pc = t.else_target.unwrap_or(t.end_pc);
                ctx.labels.push(Label {
                    target_pc: t.end_pc,
                    height,
                    arity,
                    is_loop: false,
                });
                Ok(Step::Jump(else_pc))
            }
        }
        O::Else => {
            let label = ctx.labels.last().copied().expect("if's label still open");
            Ok(Step::Jump(label.target_pc))
        }
        O::End => {
            if ctx.labels.len() == frame.label_base + 1 {
                Ok(Step::EndOfFunction)
            } else {
                ctx.labels.pop();
                Ok(Step::Advance)
            }
        }
        O::Br { relative_depth } => Ok(Step::Jump(do_branch(ctx, *relative_depth))),
        O::BrIf { relative_depth } => {
            let cond = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            if cond != 0 {
                Ok(Step::Jump(do_branch(ctx, *relative_depth)))
            } else {
                Ok(Step::Advance)
            }
        }
        O::BrTable { targets } => {
            let idx = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let depth = if (idx as usize) < targets.len() {
                targets.targets().nth(idx as usize).expect("checked bound").expect("validated")
            } else {
                targets.default()
            };
            Ok(Step::Jump(do_branch(ctx, depth)))
        }
        O::Return => {
            let depth = (ctx.labels.len() - 1 - frame.label_base) as u32;
            Ok(Step::Jump(do_branch(ctx, depth)))
        }
        O::Call { function_index } => {
            let callee = instance.funcs.borrow()[*function_index as usize].clone();
            Ok(Step::Call(callee))
        }
        O::CallIndirect { type_index, table_index, .. } => {
            let table = instance.tables[*table_index as usize].borrow();
            let elem_idx = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            if elem_idx < 0 || elem_idx as usize >= table.elems.len() {
                return Err(Trap::new(TrapCode::CallIndirectOutOfBoundsTableAccess));
            }
            let val = table.elems[elem_idx as usize];
            let func_idx = match val {
                Value::FuncRef(wasmi_core::RefType::Null) => {
                    return Err(Trap::new(TrapCode::CallIndirectNullFuncref))
                }
                Value::FuncRef(wasmi_core::RefType::Func(idx)) => idx,
                _ => return Err(Trap::new(TrapCode::CallIndirectNullFuncref)),
            };
            drop(table);
            let callee = instance.funcs.borrow()[func_idx as usize].clone();
            let expected = instance.module.types[*type_index as usize].clone();
            if callee.ty() != expected {
                return Err(Trap::new(TrapCode::CallIndirectFuncTypeMismatch));
            }
            Ok(Step::Call(callee))
        }
        O::Drop => {
            let width = operand_width.expect("validator records drop's operand width") as usize;
            let height = ctx.stack.height();
            ctx.stack.truncate(height.saturating_sub(width));
            Ok(Step::Advance)
        }
        O::Select | O::TypedSelect { .. } => {
            let width = operand_width.expect("validator records select's operand width") as usize;
            let cond = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let b = ctx.stack.pop_cells(width);
            let a = ctx.stack.pop_cells(width);
            let chosen = if cond != 0 { a } else { b };
            ctx.stack.push_cells(&chosen)?;
            Ok(Step::Advance)
        }
        O::LocalGet { local_index } => {
            let (base, ty) = local_slot(instance, &frame, *local_index);
            let n = ty.cells() as usize;
            let cells = ctx.locals[base..base + n].to_vec();
            ctx.stack.push_cells(&cells)?;
            Ok(Step::Advance)
        }
        O::LocalSet { local_index } => {
            let (base, ty) = local_slot(instance, &frame, *local_index);
            let n = ty.cells() as usize;
            let cells = ctx.stack.pop_cells(n);
            ctx.locals[base..base + n].copy_from_slice(&cells);
            Ok(Step::Advance)
        }
        O::LocalTee { local_index } => {
            let (base, ty) = local_slot(instance, &frame, *local_index);
            let n = ty.cells() as usize;
            let cells = ctx.stack.pop_cells(n);
            ctx.locals[base..base + n].copy_from_slice(&cells);
            ctx.stack.push_cells(&cells)?;
            Ok(Step::Advance)
        }
        O::GlobalGet { global_index } => {
            let g = instance.globals[*global_index as usize].borrow();
            ctx.stack.push_value(g.value)?;
            Ok(Step::Advance)
        }
        O::GlobalSet { global_index } => {
            let ty = instance.globals[*global_index as usize].borrow().ty.content;
            let v = ctx.stack.pop_value(ty);
            instance.globals[*global_index as usize].borrow_mut().value = v;
            Ok(Step::Advance)
        }
        O::I32Const { value } => {
            ctx.stack.push_value(Value::I32(*value))?;
            Ok(Step::Advance)
        }
        O::I64Const { value } => {
            ctx.stack.push_value(Value::I64(*value))?;
            Ok(Step::Advance)
        }
        O::F32Const { value } => {
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_bits(value.bits())))?;
            Ok(Step::Advance)
        }
        O::F64Const { value } => {
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_bits(value.bits())))?;
            Ok(Step::Advance)
        }
        O::I32Add => binop_i32!(i32::wrapping_add),
        O::I32Sub => binop_i32!(i32::wrapping_sub),
        O::I32Mul => binop_i32!(i32::wrapping_mul),
        O::I32DivS => {
            let b = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            if a == i32::MIN && b == -1 {
                return Err(Trap::new(TrapCode::IntegerOverflow));
            }
            ctx.stack.push_value(Value::I32(a / b))?;
            Ok(Step::Advance)
        }
        O::I32DivU => {
            let b = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            ctx.stack.push_value(Value::I32((a / b) as i32))?;
            Ok(Step::Advance)
        }
        O::I32RemS => {
            let b = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            ctx.stack.push_value(Value::I32(a.wrapping_rem(b)))?;
            Ok(Step::Advance)
        }
        O::I32RemU => {
            let b = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            ctx.stack.push_value(Value::I32((a % b) as i32))?;
            Ok(Step::Advance)
        }
        O::I32And => binop_i32!(|a: i32, b: i32| a & b),
        O::I32Or => binop_i32!(|a: i32, b: i32| a | b),
        O::I32Xor => binop_i32!(|a: i32, b: i32| a ^ b),
        O::I32Shl => binop_i32!(|a: i32, b: i32| a.wrapping_shl(b as u32)),
        O::I32ShrS => binop_i32!(|a: i32, b: i32| a.wrapping_shr(b as u32)),
        O::I32ShrU => binop_i32!(|a: i32, b: i32| ((a as u32).wrapping_shr(b as u32)) as i32),
        O::I32Rotl => binop_i32!(|a: i32, b: i32| (a as u32).rotate_left(b as u32) as i32),
        O::I32Rotr => binop_i32!(|a: i32, b: i32| (a as u32).rotate_right(b as u32) as i32),
        O::I32Eqz => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32((a == 0) as i32))?;
            Ok(Step::Advance)
        }
        O::I32Eq => binop_i32!(|a: i32, b: i32| (a == b) as i32),
        O::I32Ne => binop_i32!(|a: i32, b: i32| (a != b) as i32),
        O::I32LtS => binop_i32!(|a: i32, b: i32| (a < b) as i32),
        O::I32LtU => binop_i32!(|a: i32, b: i32| ((a as u32) < (b as u32)) as i32),
        O::I32GtS => binop_i32!(|a: i32, b: i32| (a > b) as i32),
        O::I32GtU => binop_i32!(|a: i32, b: i32| ((a as u32) > (b as u32)) as i32),
        O::I32LeS => binop_i32!(|a: i32, b: i32| (a <= b) as i32),
        O::I32LeU => binop_i32!(|a: i32, b: i32| ((a as u32) <= (b as u32)) as i32),
        O::I32GeS => binop_i32!(|a: i32, b: i32| (a >= b) as i32),
        O::I32GeU => binop_i32!(|a: i32, b: i32| ((a as u32) >= (b as u32)) as i32),
        O::I64Add => binop_i64!(i64::wrapping_add),
        O::I64Sub => binop_i64!(i64::wrapping_sub),
        O::I64Mul => binop_i64!(i64::wrapping_mul),
        O::I64DivS => {
            let b = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            if a == i64::MIN && b == -1 {
                return Err(Trap::new(TrapCode::IntegerOverflow));
            }
            ctx.stack.push_value(Value::I64(a / b))?;
            Ok(Step::Advance)
        }
        O::I64DivU => {
            let b = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            ctx.stack.push_value(Value::I64((a / b) as i64))?;
            Ok(Step::Advance)
        }
        O::I64RemS => {
            let b = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            ctx.stack.push_value(Value::I64(a.wrapping_rem(b)))?;
            Ok(Step::Advance)
        }
        O::I64RemU => {
            let b = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            if b == 0 {
                return Err(Trap::new(TrapCode::DivByZero));
            }
            ctx.stack.push_value(Value::I64((a % b) as i64))?;
            Ok(Step::Advance)
        }
        O::I64And => binop_i64!(|a: i64, b: i64| a & b),
        O::I64Or => binop_i64!(|a: i64, b: i64| a | b),
        O::I64Xor => binop_i64!(|a: i64, b: i64| a ^ b),
        O::I64Shl => binop_i64!(|a: i64, b: i64| a.wrapping_shl(b as u32)),
        O::I64ShrS => binop_i64!(|a: i64, b: i64| a.wrapping_shr(b as u32)),
        O::I64ShrU => binop_i64!(|a: i64, b: i64| ((a as u64).wrapping_shr(b as u32)) as i64),
        O::I64Rotl => binop_i64!(|a: i64, b: i64| (a as u64).rotate_left(b as u32) as i64),
        O::I64Rotr => binop_i64!(|a: i64, b: i64| (a as u64).rotate_right(b as u32) as i64),
        O::I64Eqz => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I32((a == 0) as i32))?;
            Ok(Step::Advance)
        }
        O::I64Eq => binop_i64!(|a: i64, b: i64| (a == b) as i64),
        O::I64Ne => binop_i64!(|a: i64, b: i64| (a != b) as i64),
        O::I64LtS => binop_i64!(|a: i64, b: i64| (a < b) as i64),
        O::I64LtU => binop_i64!(|a: i64, b: i64| ((a as u64) < (b as u64)) as i64),
        O::I64GtS => binop_i64!(|a: i64, b: i64| (a > b) as i64),
        O::I64GtU => binop_i64!(|a: i64, b: i64| ((a as u64) > (b as u64)) as i64),
        O::I64LeS => binop_i64!(|a: i64, b: i64| (a <= b) as i64),
        O::I64LeU => binop_i64!(|a: i64, b: i64| ((a as u64) <= (b as u64)) as i64),
        O::I64GeS => binop_i64!(|a: i64, b: i64| (a >= b) as i64),
        O::I64GeU => binop_i64!(|a: i64, b: i64| ((a as u64) >= (b as u64)) as i64),
        O::I32Clz => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32(a.leading_zeros() as i32))?;
            Ok(Step::Advance)
        }
        O::I32Ctz => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32(a.trailing_zeros() as i32))?;
            Ok(Step::Advance)
        }
        O::I32Popcnt => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32(a.count_ones() as i32))?;
            Ok(Step::Advance)
        }
        O::I32Extend8S => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32(a as i8 as i32))?;
            Ok(Step::Advance)
        }
        O::I32Extend16S => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I32(a as i16 as i32))?;
            Ok(Step::Advance)
        }
        O::I64Clz => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64(a.leading_zeros() as i64))?;
            Ok(Step::Advance)
        }
        O::I64Ctz => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64(a.trailing_zeros() as i64))?;
            Ok(Step::Advance)
        }
        O::I64Popcnt => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64(a.count_ones() as i64))?;
            Ok(Step::Advance)
        }
        O::I64Extend8S => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64(a as i8 as i64))?;
            Ok(Step::Advance)
        }
        O::I64Extend16S => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64(a as i16 as i64))?;
            Ok(Step::Advance)
        }
        O::I64Extend32S => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I64(a as i32 as i64))?;
            Ok(Step::Advance)
        }
        O::I32WrapI64 => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::I32(a as i32))?;
            Ok(Step::Advance)
        }
        O::I64ExtendI32S => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::I64(a as i64))?;
            Ok(Step::Advance)
        }
        O::I64ExtendI32U => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            ctx.stack.push_value(Value::I64(a as i64))?;
            Ok(Step::Advance)
        }
        O::F32Abs => f32_unop(ctx, wasmi_core::F32::abs),
        O::F32Neg => f32_unop(ctx, wasmi_core::F32::neg),
        O::F32Ceil => f32_unop(ctx, wasmi_core::F32::ceil),
        O::F32Floor => f32_unop(ctx, wasmi_core::F32::floor),
        O::F32Trunc => f32_unop(ctx, wasmi_core::F32::trunc),
        O::F32Nearest => f32_unop(ctx, wasmi_core::F32::nearest),
        O::F32Sqrt => f32_unop(ctx, wasmi_core::F32::sqrt),
        O::F32Add => f32_binop(ctx, core::ops::Add::add),
        O::F32Sub => f32_binop(ctx, core::ops::Sub::sub),
        O::F32Mul => f32_binop(ctx, core::ops::Mul::mul),
        O::F32Div => f32_binop(ctx, core::ops::Div::div),
        O::F32Min => f32_binop(ctx, wasmi_core::F32::min),
        O::F32Max => f32_binop(ctx, wasmi_core::F32::max),
        O::F32Copysign => f32_binop(ctx, wasmi_core::F32::copysign),
        O::F64Abs => f64_unop(ctx, wasmi_core::F64::abs),
        O::F64Neg => f64_unop(ctx, wasmi_core::F64::neg),
        O::F64Ceil => f64_unop(ctx, wasmi_core::F64::ceil),
        O::F64Floor => f64_unop(ctx, wasmi_core::F64::floor),
        O::F64Trunc => f64_unop(ctx, wasmi_core::F64::trunc),
        O::F64Nearest => f64_unop(ctx, wasmi_core::F64::nearest),
        O::F64Sqrt => f64_unop(ctx, wasmi_core::F64::sqrt),
        O::F64Add => f64_binop(ctx, core::ops::Add::add),
        O::F64Sub => f64_binop(ctx, core::ops::Sub::sub),
        O::F64Mul => f64_binop(ctx, core::ops::Mul::mul),
        O::F64Div => f64_binop(ctx, core::ops::Div::div),
        O::F64Min => f64_binop(ctx, wasmi_core::F64::min),
        O::F64Max => f64_binop(ctx, wasmi_core::F64::max),
        O::F64Copysign => f64_binop(ctx, wasmi_core::F64::copysign),
        O::F32Eq => f32_relop(ctx, |a, b| a == b),
        O::F32Ne => f32_relop(ctx, |a, b| a != b),
        O::F32Lt => f32_relop(ctx, |a, b| a < b),
        O::F32Gt => f32_relop(ctx, |a, b| a > b),
        O::F32Le => f32_relop(ctx, |a, b| a <= b),
        O::F32Ge => f32_relop(ctx, |a, b| a >= b),
        O::F64Eq => f64_relop(ctx, |a, b| a == b),
        O::F64Ne => f64_relop(ctx, |a, b| a != b),
        O::F64Lt => f64_relop(ctx, |a, b| a < b),
        O::F64Gt => f64_relop(ctx, |a, b| a > b),
        O::F64Le => f64_relop(ctx, |a, b| a <= b),
        O::F64Ge => f64_relop(ctx, |a, b| a >= b),
        O::F32ConvertI32S => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_float(a as f32)))?;
            Ok(Step::Advance)
        }
        O::F32ConvertI32U => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_float(a as f32)))?;
            Ok(Step::Advance)
        }
        O::F32ConvertI64S => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_float(a as f32)))?;
            Ok(Step::Advance)
        }
        O::F32ConvertI64U => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_float(a as f32)))?;
            Ok(Step::Advance)
        }
        O::F64ConvertI32S => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_float(a as f64)))?;
            Ok(Step::Advance)
        }
        O::F64ConvertI32U => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_float(a as f64)))?;
            Ok(Step::Advance)
        }
        O::F64ConvertI64S => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_float(a as f64)))?;
            Ok(Step::Advance)
        }
        O::F64ConvertI64U => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_float(a as f64)))?;
            Ok(Step::Advance)
        }
        O::F32DemoteF64 => {
            let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_float(a.to_float() as f32)))?;
            Ok(Step::Advance)
        }
        O::F64PromoteF32 => {
            let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_float(a.to_float() as f64)))?;
            Ok(Step::Advance)
        }
        O::I32ReinterpretF32 => {
            let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
            ctx.stack.push_value(Value::I32(a.to_bits() as i32))?;
            Ok(Step::Advance)
        }
        O::F32ReinterpretI32 => {
            let a = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            ctx.stack.push_value(Value::F32(wasmi_core::F32::from_bits(a as u32)))?;
            Ok(Step::Advance)
        }
        O::I64ReinterpretF64 => {
            let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
            ctx.stack.push_value(Value::I64(a.to_bits() as i64))?;
            Ok(Step::Advance)
        }
        O::F64ReinterpretI64 => {
            let a = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            ctx.stack.push_value(Value::F64(wasmi_core::F64::from_bits(a as u64)))?;
            Ok(Step::Advance)
        }
        O::I32TruncF32S => trunc_f32_to_i32(ctx, true, false),
        O::I32TruncF32U => trunc_f32_to_i32(ctx, false, false),
        O::I32TruncF64S => trunc_f64_to_i32(ctx, true, false),
        O::I32TruncF64U => trunc_f64_to_i32(ctx, false, false),
        O::I64TruncF32S => trunc_f32_to_i64(ctx, true, false),
        O::I64TruncF32U => trunc_f32_to_i64(ctx, false, false),
        O::I64TruncF64S => trunc_f64_to_i64(ctx, true, false),
        O::I64TruncF64U => trunc_f64_to_i64(ctx, false, false),
        O::I32TruncSatF32S => trunc_f32_to_i32(ctx, true, true),
        O::I32TruncSatF32U => trunc_f32_to_i32(ctx, false, true),
        O::I32TruncSatF64S => trunc_f64_to_i32(ctx, true, true),
        O::I32TruncSatF64U => trunc_f64_to_i32(ctx, false, true),
        O::I64TruncSatF32S => trunc_f32_to_i64(ctx, true, true),
        O::I64TruncSatF32U => trunc_f32_to_i64(ctx, false, true),
        O::I64TruncSatF64S => trunc_f64_to_i64(ctx, true, true),
        O::I64TruncSatF64U => trunc_f64_to_i64(ctx, false, true),
        O::I32Load { memarg } => load_int(ctx, instance, memarg, 4, false),
        O::I64Load { memarg } => load_int64(ctx, instance, memarg, 8, false),
        O::I32Load8S { memarg } => load_int(ctx, instance, memarg, 1, true),
        O::I32Load8U { memarg } => load_int(ctx, instance, memarg, 1, false),
        O::I32Load16S { memarg } => load_int(ctx, instance, memarg, 2, true),
        O::I32Load16U { memarg } => load_int(ctx, instance, memarg, 2, false),
        O::I64Load8S { memarg } => load_int64(ctx, instance, memarg, 1, true),
        O::I64Load8U { memarg } => load_int64(ctx, instance, memarg, 1, false),
        O::I64Load16S { memarg } => load_int64(ctx, instance, memarg, 2, true),
        O::I64Load16U { memarg } => load_int64(ctx, instance, memarg, 2, false),
        O::I64Load32S { memarg } => load_int64(ctx, instance, memarg, 4, true),
        O::I64Load32U { memarg } => load_int64(ctx, instance, memarg, 4, false),
        O::I32Store { memarg } => store_int(ctx, instance, memarg, 4),
        O::I32Store8 { memarg } => store_int(ctx, instance, memarg, 1),
        O::I32Store16 { memarg } => store_int(ctx, instance, memarg, 2),
        O::I64Store { memarg } => store_int64(ctx, instance, memarg, 8),
        O::I64Store8 { memarg } => store_int64(ctx, instance, memarg, 1),
        O::I64Store16 { memarg } => store_int64(ctx, instance, memarg, 2),
        O::I64Store32 { memarg } => store_int64(ctx, instance, memarg, 4),
        O::MemorySize { mem, .. } => {
            let size = instance.mems[*mem as usize].borrow().size_pages();
            ctx.stack.push_value(Value::I32(size as i32))?;
            Ok(Step::Advance)
        }
        O::MemoryGrow { mem, .. } => {
            let delta = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let result = instance.mems[*mem as usize].borrow_mut().grow(delta);
            ctx.stack.push_value(Value::I32(result.map(|v| v as i32).unwrap_or(-1)))?;
            Ok(Step::Advance)
        }
        O::MemoryFill { mem } => {
            let n = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let val = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u8;
            let dst = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let mut mem = instance.mems[*mem as usize].borrow_mut();
            let end = dst as usize + n as usize;
            if end > mem.data.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
            }
            mem.data[dst as usize..end].fill(val);
            Ok(Step::Advance)
        }
        O::MemoryCopy { dst_mem, src_mem } => {
            let n = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let src = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let dst = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            if *dst_mem == *src_mem {
                let mut mem = instance.mems[*dst_mem as usize].borrow_mut();
                if src + n > mem.data.len() || dst + n > mem.data.len() {
                    return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
                }
                mem.data.copy_within(src..src + n, dst);
            } else {
                let src_bytes = {
                    let src_mem_ref = instance.mems[*src_mem as usize].borrow();
                    if src + n > src_mem_ref.data.len() {
                        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
                    }
                    src_mem_ref.data[src..src + n].to_vec()
                };
                let mut dst_mem_ref = instance.mems[*dst_mem as usize].borrow_mut();
                if dst + n > dst_mem_ref.data.len() {
                    return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
                }
                dst_mem_ref.data[dst..dst + n].copy_from_slice(&src_bytes);
            }
            Ok(Step::Advance)
        }
        O::MemoryInit { data_index, mem } => {
            let n = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let src = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let dst = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            if instance.data_dropped.borrow()[*data_index as usize] {
                if n == 0 {
                    return Ok(Step::Advance);
                }
                return Err(Trap::new(TrapCode::OutOfBoundsDataAccess));
            }
            let data = &instance.module.datas[*data_index as usize].bytes;
            if src + n > data.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsDataAccess));
            }
            let mut mem = instance.mems[*mem as usize].borrow_mut();
            if dst + n > mem.data.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
            }
            mem.data[dst..dst + n].copy_from_slice(&data[src..src + n]);
            Ok(Step::Advance)
        }
        O::DataDrop { data_index } => {
            instance.data_dropped.borrow_mut()[*data_index as usize] = true;
            Ok(Step::Advance)
        }
        O::TableGet { table } => {
            let idx = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let t = instance.tables[*table as usize].borrow();
            if idx < 0 || idx as usize >= t.elems.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsTableAccess));
            }
            ctx.stack.push_value(t.elems[idx as usize])?;
            Ok(Step::Advance)
        }
        O::TableSet { table } => {
            let ty = instance.tables[*table as usize].borrow().ty.element;
            let val = ctx.stack.pop_value(ty);
            let idx = ctx.stack.pop_value(ValueType::I32).i32().unwrap();
            let mut t = instance.tables[*table as usize].borrow_mut();
            if idx < 0 || idx as usize >= t.elems.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsTableAccess));
            }
            t.elems[idx as usize] = val;
            Ok(Step::Advance)
        }
        O::TableSize { table } => {
            let size = instance.tables[*table as usize].borrow().elems.len() as i32;
            ctx.stack.push_value(Value::I32(size))?;
            Ok(Step::Advance)
        }
        O::TableGrow { table } => {
            let delta = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let ty = instance.tables[*table as usize].borrow().ty.element;
            let init = ctx.stack.pop_value(ty);
            let result = instance.tables[*table as usize].borrow_mut().grow(delta, init);
            ctx.stack.push_value(Value::I32(result.map(|v| v as i32).unwrap_or(-1)))?;
            Ok(Step::Advance)
        }
        O::TableFill { table } => {
            let n = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let ty = instance.tables[*table as usize].borrow().ty.element;
            let val = ctx.stack.pop_value(ty);
            let dst = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let mut t = instance.tables[*table as usize].borrow_mut();
            if dst + n > t.elems.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsTableAccess));
            }
            t.elems[dst..dst + n].fill(val);
            Ok(Step::Advance)
        }
        O::TableCopy { dst_table, src_table } => {
            let n = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let src = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let dst = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let items = {
                let src_t = instance.tables[*src_table as usize].borrow();
                if src + n > src_t.elems.len() {
                    return Err(Trap::new(TrapCode::OutOfBoundsTableAccess));
                }
                src_t.elems[src..src + n].to_vec()
            };
            let mut dst_t = instance.tables[*dst_table as usize].borrow_mut();
            if dst + n > dst_t.elems.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsTableAccess));
            }
            dst_t.elems[dst..dst + n].copy_from_slice(&items);
            Ok(Step::Advance)
        }
        O::TableInit { elem_index, table } => {
            let n = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let src = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            let dst = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as usize;
            if instance.elem_dropped.borrow()[*elem_index as usize] {
                if n == 0 {
                    return Ok(Step::Advance);
                }
                return Err(Trap::new(TrapCode::OutOfBoundsElementAccess));
            }
            let elem = &instance.module.elems[*elem_index as usize];
            if src + n > elem.items.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsElementAccess));
            }
            let values: Vec<Value> = elem.items[src..src + n]
                .iter()
                .map(|it| match it {
                    crate::module::ElementInit::Func(idx) => Value::FuncRef(wasmi_core::RefType::Func(*idx)),
                    crate::module::ElementInit::Null => ref_default(elem.ty),
                })
                .collect();
            let mut t = instance.tables[*table as usize].borrow_mut();
            if dst + n > t.elems.len() {
                return Err(Trap::new(TrapCode::OutOfBoundsTableAccess));
            }
            t.elems[dst..dst + n].copy_from_slice(&values);
            Ok(Step::Advance)
        }
        O::ElemDrop { elem_index } => {
            instance.elem_dropped.borrow_mut()[*elem_index as usize] = true;
            Ok(Step::Advance)
        }
        O::RefNull { hty } => {
            let ty = match hty {
                wasmparser::HeapType::Func => ValueType::FuncRef,
                _ => ValueType::ExternRef,
            };
            ctx.stack.push_value(ref_default(ty))?;
            Ok(Step::Advance)
        }
        O::RefIsNull => {
            let cells = ctx.stack.pop_cells(2);
            ctx.stack.push_value(Value::I32((cells[0].0 == 0) as i32))?;
            Ok(Step::Advance)
        }
        O::RefFunc { function_index } => {
            ctx.stack.push_value(Value::FuncRef(wasmi_core::RefType::Func(*function_index)))?;
            Ok(Step::Advance)
        }
        O::AtomicFence { .. } => Ok(Step::Advance),
        O::I32AtomicLoad { memarg } => atomic_load32(ctx, instance, memarg, 4),
        O::I32AtomicLoad8U { memarg } => atomic_load32(ctx, instance, memarg, 1),
        O::I32AtomicLoad16U { memarg } => atomic_load32(ctx, instance, memarg, 2),
        O::I64AtomicLoad { memarg } => atomic_load64(ctx, instance, memarg, 8),
        O::I64AtomicLoad8U { memarg } => atomic_load64(ctx, instance, memarg, 1),
        O::I64AtomicLoad16U { memarg } => atomic_load64(ctx, instance, memarg, 2),
        O::I64AtomicLoad32U { memarg } => atomic_load64(ctx, instance, memarg, 4),
        O::I32AtomicStore { memarg } => atomic_store32(ctx, instance, memarg, 4),
        O::I32AtomicStore8 { memarg } => atomic_store32(ctx, instance, memarg, 1),
        O::I32AtomicStore16 { memarg } => atomic_store32(ctx, instance, memarg, 2),
        O::I64AtomicStore { memarg } => atomic_store64(ctx, instance, memarg, 8),
        O::I64AtomicStore8 { memarg } => atomic_store64(ctx, instance, memarg, 1),
        O::I64AtomicStore16 { memarg } => atomic_store64(ctx, instance, memarg, 2),
        O::I64AtomicStore32 { memarg } => atomic_store64(ctx, instance, memarg, 4),
        O::I32AtomicRmwAdd { memarg } => atomic_rmw32(ctx, instance, memarg, 4, |a, b| a.wrapping_add(b)),
        O::I32AtomicRmwSub { memarg } => atomic_rmw32(ctx, instance, memarg, 4, |a, b| a.wrapping_sub(b)),
        O::I32AtomicRmwAnd { memarg } => atomic_rmw32(ctx, instance, memarg, 4, |a, b| a & b),
        O::I32AtomicRmwOr { memarg } => atomic_rmw32(ctx, instance, memarg, 4, |a, b| a | b),
        O::I32AtomicRmwXor { memarg } => atomic_rmw32(ctx, instance, memarg, 4, |a, b| a ^ b),
        O::I32AtomicRmwXchg { memarg } => atomic_rmw32(ctx, instance, memarg, 4, |_, b| b),
        O::I32AtomicRmw8AddU { memarg } => atomic_rmw32(ctx, instance, memarg, 1, |a, b| a.wrapping_add(b)),
        O::I32AtomicRmw8SubU { memarg } => atomic_rmw32(ctx, instance, memarg, 1, |a, b| a.wrapping_sub(b)),
        O::I32AtomicRmw8AndU { memarg } => atomic_rmw32(ctx, instance, memarg, 1, |a, b| a & b),
        O::I32AtomicRmw8OrU { memarg } => atomic_rmw32(ctx, instance, memarg, 1, |a, b| a | b),
        O::I32AtomicRmw8XorU { memarg } => atomic_rmw32(ctx, instance, memarg, 1, |a, b| a ^ b),
        O::I32AtomicRmw8XchgU { memarg } => atomic_rmw32(ctx, instance, memarg, 1, |_, b| b),
        O::I32AtomicRmw16AddU { memarg } => atomic_rmw32(ctx, instance, memarg, 2, |a, b| a.wrapping_add(b)),
        O::I32AtomicRmw16SubU { memarg } => atomic_rmw32(ctx, instance, memarg, 2, |a, b| a.wrapping_sub(b)),
        O::I32AtomicRmw16AndU { memarg } => atomic_rmw32(ctx, instance, memarg, 2, |a, b| a & b),
        O::I32AtomicRmw16OrU { memarg } => atomic_rmw32(ctx, instance, memarg, 2, |a, b| a | b),
        O::I32AtomicRmw16XorU { memarg } => atomic_rmw32(ctx, instance, memarg, 2, |a, b| a ^ b),
        O::I32AtomicRmw16XchgU { memarg } => atomic_rmw32(ctx, instance, memarg, 2, |_, b| b),
        O::I32AtomicRmwCmpxchg { memarg } => atomic_cmpxchg32(ctx, instance, memarg, 4),
        O::I32AtomicRmw8CmpxchgU { memarg } => atomic_cmpxchg32(ctx, instance, memarg, 1),
        O::I32AtomicRmw16CmpxchgU { memarg } => atomic_cmpxchg32(ctx, instance, memarg, 2),
        O::I64AtomicRmwAdd { memarg } => atomic_rmw64(ctx, instance, memarg, 8, |a, b| a.wrapping_add(b)),
        O::I64AtomicRmwSub { memarg } => atomic_rmw64(ctx, instance, memarg, 8, |a, b| a.wrapping_sub(b)),
        O::I64AtomicRmwAnd { memarg } => atomic_rmw64(ctx, instance, memarg, 8, |a, b| a & b),
        O::I64AtomicRmwOr { memarg } => atomic_rmw64(ctx, instance, memarg, 8, |a, b| a | b),
        O::I64AtomicRmwXor { memarg } => atomic_rmw64(ctx, instance, memarg, 8, |a, b| a ^ b),
        O::I64AtomicRmwXchg { memarg } => atomic_rmw64(ctx, instance, memarg, 8, |_, b| b),
        O::I64AtomicRmw8AddU { memarg } => atomic_rmw64(ctx, instance, memarg, 1, |a, b| a.wrapping_add(b)),
        O::I64AtomicRmw8SubU { memarg } => atomic_rmw64(ctx, instance, memarg, 1, |a, b| a.wrapping_sub(b)),
        O::I64AtomicRmw8AndU { memarg } => atomic_rmw64(ctx, instance, memarg, 1, |a, b| a & b),
        O::I64AtomicRmw8OrU { memarg } => atomic_rmw64(ctx, instance, memarg, 1, |a, b| a | b),
        O::I64AtomicRmw8XorU { memarg } => atomic_rmw64(ctx, instance, memarg, 1, |a, b| a ^ b),
        O::I64AtomicRmw8XchgU { memarg } => atomic_rmw64(ctx, instance, memarg, 1, |_, b| b),
        O::I64AtomicRmw16AddU { memarg } => atomic_rmw64(ctx, instance, memarg, 2, |a, b| a.wrapping_add(b)),
        O::I64AtomicRmw16SubU { memarg } => atomic_rmw64(ctx, instance, memarg, 2, |a, b| a.wrapping_sub(b)),
        O::I64AtomicRmw16AndU { memarg } => atomic_rmw64(ctx, instance, memarg, 2, |a, b| a & b),
        O::I64AtomicRmw16OrU { memarg } => atomic_rmw64(ctx, instance, memarg, 2, |a, b| a | b),
        O::I64AtomicRmw16XorU { memarg } => atomic_rmw64(ctx, instance, memarg, 2, |a, b| a ^ b),
        O::I64AtomicRmw16XchgU { memarg } => atomic_rmw64(ctx, instance, memarg, 2, |_, b| b),
        O::I64AtomicRmw32AddU { memarg } => atomic_rmw64(ctx, instance, memarg, 4, |a, b| a.wrapping_add(b)),
        O::I64AtomicRmw32SubU { memarg } => atomic_rmw64(ctx, instance, memarg, 4, |a, b| a.wrapping_sub(b)),
        O::I64AtomicRmw32AndU { memarg } => atomic_rmw64(ctx, instance, memarg, 4, |a, b| a & b),
        O::I64AtomicRmw32OrU { memarg } => atomic_rmw64(ctx, instance, memarg, 4, |a, b| a | b),
        O::I64AtomicRmw32XorU { memarg } => atomic_rmw64(ctx, instance, memarg, 4, |a, b| a ^ b),
        O::I64AtomicRmw32XchgU { memarg } => atomic_rmw64(ctx, instance, memarg, 4, |_, b| b),
        O::I64AtomicRmwCmpxchg { memarg } => atomic_cmpxchg64(ctx, instance, memarg, 8),
        O::I64AtomicRmw8CmpxchgU { memarg } => atomic_cmpxchg64(ctx, instance, memarg, 1),
        O::I64AtomicRmw16CmpxchgU { memarg } => atomic_cmpxchg64(ctx, instance, memarg, 2),
        O::I64AtomicRmw32CmpxchgU { memarg } => atomic_cmpxchg64(ctx, instance, memarg, 4),
        O::MemoryAtomicNotify { memarg } => {
            let count = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let addr = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let effective = (addr as u64).wrapping_add(memarg.offset);
            let mem = instance.mems[memarg.memory as usize].borrow();
            atomic_check(effective, mem.data.len(), 4)?;
            let key = (Rc::as_ptr(&instance.mems[memarg.memory as usize]) as usize, effective);
            drop(mem);
            let woken = ctx.wait_registry.as_ref().map(|r| r.notify(key, count)).unwrap_or(0);
            ctx.stack.push_value(Value::I32(woken as i32))?;
            Ok(Step::Advance)
        }
        O::MemoryAtomicWait32 { memarg } => {
            let timeout = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            let expected = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            let addr = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            atomic_wait(ctx, instance, memarg, addr, expected as u64, 4, timeout)
        }
        O::MemoryAtomicWait64 { memarg } => {
            let timeout = ctx.stack.pop_value(ValueType::I64).i64().unwrap();
            let expected = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
            let addr = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
            atomic_wait(ctx, instance, memarg, addr, expected, 8, timeout)
        }
        other => Err(Trap::with_message(
            TrapCode::Unreachable,
            alloc::format!("unimplemented instruction: {other:?}"),
        )),
    }
}

fn block_result_arity_of(instance: &Instance, bt: wasmparser::BlockType) -> u32 {
    match bt {
        wasmparser::BlockType::Empty => 0,
        wasmparser::BlockType::Type(t) => crate::module::valtype_from_wp(t).cells(),
        wasmparser::BlockType::FuncType(idx) => instance.module.types[idx as usize]
            .results()
            .iter()
            .map(|t| t.cells())
            .sum(),
    }
}

fn block_param_arity_of(instance: &Instance, bt: wasmparser::BlockType) -> u32 {
    match bt {
        wasmparser::BlockType::Empty | wasmparser::BlockType::Type(_) => 0,
        wasmparser::BlockType::FuncType(idx) => instance.module.types[idx as usize]
            .params()
            .iter()
            .map(|t| t.cells())
            .sum(),
    }
}

fn f32_unop(ctx: &mut ExecContext, f: impl Fn(wasmi_core::F32) -> wasmi_core::F32) -> Result<Step, Trap> {
    let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    ctx.stack.push_value(Value::F32(f(a)))?;
    Ok(Step::Advance)
}

fn f32_binop(ctx: &mut ExecContext, f: impl Fn(wasmi_core::F32, wasmi_core::F32) -> wasmi_core::F32) -> Result<Step, Trap> {
    let b = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    ctx.stack.push_value(Value::F32(f(a, b)))?;
    Ok(Step::Advance)
}

fn f32_relop(ctx: &mut ExecContext, f: impl Fn(f32, f32) -> bool) -> Result<Step, Trap> {
    let b = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    ctx.stack.push_value(Value::I32(f(a.to_float(), b.to_float()) as i32))?;
    Ok(Step::Advance)
}

fn f64_unop(ctx: &mut ExecContext, f: impl Fn(wasmi_core::F64) -> wasmi_core::F64) -> Result<Step, Trap> {
    let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    ctx.stack.push_value(Value::F64(f(a)))?;
    Ok(Step::Advance)
}

fn f64_binop(ctx: &mut ExecContext, f: impl Fn(wasmi_core::F64, wasmi_core::F64) -> wasmi_core::F64) -> Result<Step, Trap> {
    let b = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    ctx.stack.push_value(Value::F64(f(a, b)))?;
    Ok(Step::Advance)
}

fn f64_relop(ctx: &mut ExecContext, f: impl Fn(f64, f64) -> bool) -> Result<Step, Trap> {
    let b = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    ctx.stack.push_value(Value::I32(f(a.to_float(), b.to_float()) as i32))?;
    Ok(Step::Advance)
}

/// Shared range-checked float-to-int conversion. `saturating` selects
/// between the original trapping `trunc` instructions and the
/// nontrapping-float-to-int proposal's `trunc_sat` variants, which clamp to
/// the target range instead of trapping on NaN/overflow.
/// Returns the destination's bit pattern reinterpreted as `i64` (so an
/// unsigned 64-bit result round-trips through the same return type without
/// itself overflowing `i64`).
fn trunc_to_int(value: f64, signed: bool, bits: u32, saturating: bool) -> Result<i64, Trap> {
    if value.is_nan() {
        if saturating {
            return Ok(0);
        }
        return Err(Trap::new(TrapCode::InvalidConversionToInteger));
    }
    let in_range = match (signed, bits) {
        (true, 32) => value >= i32::MIN as f64 && value < i32::MAX as f64 + 1.0,
        (false, 32) => value >= 0.0 && value < u32::MAX as f64 + 1.0,
        (true, 64) => value >= i64::MIN as f64 && value < 9223372036854775808.0,
        (false, 64) => value >= 0.0 && value < 18446744073709551616.0,
        _ => unreachable!("only 32/64-bit targets"),
    };
    if !in_range {
        if !saturating {
            return Err(Trap::new(TrapCode::IntegerOverflow));
        }
        return Ok(match (signed, bits, value.is_sign_negative()) {
            (true, 32, true) => i32::MIN as i64,
            (true, 32, false) => i32::MAX as i64,
            (false, 32, true) => 0,
            (false, 32, false) => u32::MAX as i64,
            (true, 64, true) => i64::MIN,
            (true, 64, false) => i64::MAX,
            (false, 64, true) => 0,
            (false, 64, false) => u64::MAX as i64,
            _ => unreachable!("only 32/64-bit targets"),
        });
    }
    Ok(match (signed, bits) {
        (_, 32) => (value as i64 as i32) as i64,
        (true, 64) => value as i64,
        (false, 64) => value as u64 as i64,
        _ => unreachable!("only 32/64-bit targets"),
    })
}

fn trunc_f32_to_i32(ctx: &mut ExecContext, signed: bool, saturating: bool) -> Result<Step, Trap> {
    let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    let v = trunc_to_int(a.to_float() as f64, signed, 32, saturating)?;
    ctx.stack.push_value(Value::I32(v as i32))?;
    Ok(Step::Advance)
}

fn trunc_f64_to_i32(ctx: &mut ExecContext, signed: bool, saturating: bool) -> Result<Step, Trap> {
    let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    let v = trunc_to_int(a.to_float(), signed, 32, saturating)?;
    ctx.stack.push_value(Value::I32(v as i32))?;
    Ok(Step::Advance)
}

fn trunc_f32_to_i64(ctx: &mut ExecContext, signed: bool, saturating: bool) -> Result<Step, Trap> {
    let a = ctx.stack.pop_value(ValueType::F32).f32().unwrap();
    let v = trunc_to_int(a.to_float() as f64, signed, 64, saturating)?;
    ctx.stack.push_value(Value::I64(v))?;
    Ok(Step::Advance)
}

fn trunc_f64_to_i64(ctx: &mut ExecContext, signed: bool, saturating: bool) -> Result<Step, Trap> {
    let a = ctx.stack.pop_value(ValueType::F64).f64().unwrap();
    let v = trunc_to_int(a.to_float(), signed, 64, saturating)?;
    ctx.stack.push_value(Value::I64(v))?;
    Ok(Step::Advance)
}

fn local_slot(instance: &Instance, frame: &Frame, local_index: u32) -> (usize, ValueType) {
    let func_idx = frame.func_idx.expect("Wasm frame");
    let body = &instance.module.funcs[(func_idx - instance.module.num_imported_funcs()) as usize];
    let func_type = instance.module.functype_of(func_idx);
    let num_params = func_type.params().len() as u32;
    let ty = if local_index < num_params {
        func_type.params()[local_index as usize]
    } else {
        body.local_type(local_index - num_params).expect("validated local index")
    };
    let mut base = frame.locals_base;
    for i in 0..local_index {
        let t = if i < num_params {
            func_type.params()[i as usize]
        } else {
            body.local_type(i - num_params).expect("validated local index")
        };
        base += t.cells() as usize;
    }
    (base, ty)
}

fn load_int(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize, signed: bool) -> Result<Step, Trap> {
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mem = instance.mems[memarg.memory as usize].borrow();
    let end = effective.checked_add(size as u64).ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem.data.len() as u64 {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    let start = effective as usize;
    let mut buf = [0u8; 4];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let raw = u32::from_le_bytes(buf);
    let value = if signed {
        let shift = 32 - size * 8;
        (((raw << shift) as i32) >> shift) as i32
    } else {
        raw as i32
    };
    drop(mem);
    ctx.stack.push_value(Value::I32(value))?;
    Ok(Step::Advance)
}

fn load_int64(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize, signed: bool) -> Result<Step, Trap> {
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mem = instance.mems[memarg.memory as usize].borrow();
    let end = effective.checked_add(size as u64).ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem.data.len() as u64 {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    let start = effective as usize;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let raw = u64::from_le_bytes(buf);
    let value = if signed {
        let shift = 64 - size * 8;
        (((raw << shift) as i64) >> shift) as i64
    } else {
        raw as i64
    };
    drop(mem);
    ctx.stack.push_value(Value::I64(value))?;
    Ok(Step::Advance)
}

fn store_int(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let value = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let end = effective.checked_add(size as u64).ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem.data.len() as u64 {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    let start = effective as usize;
    let bytes = value.to_le_bytes();
    mem.data[start..start + size].copy_from_slice(&bytes[..size]);
    Ok(Step::Advance)
}

fn atomic_check(effective: u64, mem_len: usize, size: usize) -> Result<usize, Trap> {
    if effective % size as u64 != 0 {
        return Err(Trap::new(TrapCode::UnalignedAtomicOperation));
    }
    let end = effective.checked_add(size as u64).ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem_len as u64 {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    Ok(effective as usize)
}

fn atomic_load32(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mem = instance.mems[memarg.memory as usize].borrow();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 4];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let value = u32::from_le_bytes(buf) as i32;
    drop(mem);
    ctx.stack.push_value(Value::I32(value))?;
    Ok(Step::Advance)
}

fn atomic_load64(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mem = instance.mems[memarg.memory as usize].borrow();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let value = u64::from_le_bytes(buf) as i64;
    drop(mem);
    ctx.stack.push_value(Value::I64(value))?;
    Ok(Step::Advance)
}

fn atomic_store32(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let value = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let bytes = value.to_le_bytes();
    mem.data[start..start + size].copy_from_slice(&bytes[..size]);
    Ok(Step::Advance)
}

fn atomic_store64(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let value = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let bytes = value.to_le_bytes();
    mem.data[start..start + size].copy_from_slice(&bytes[..size]);
    Ok(Step::Advance)
}

fn atomic_rmw32(
    ctx: &mut ExecContext,
    instance: &Instance,
    memarg: &wasmparser::MemArg,
    size: usize,
    op: impl Fn(u32, u32) -> u32,
) -> Result<Step, Trap> {
    let operand = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 4];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let old = u32::from_le_bytes(buf);
    let new = op(old, operand);
    mem.data[start..start + size].copy_from_slice(&new.to_le_bytes()[..size]);
    drop(mem);
    ctx.stack.push_value(Value::I32(old as i32))?;
    Ok(Step::Advance)
}

fn atomic_rmw64(
    ctx: &mut ExecContext,
    instance: &Instance,
    memarg: &wasmparser::MemArg,
    size: usize,
    op: impl Fn(u64, u64) -> u64,
) -> Result<Step, Trap> {
    let operand = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let old = u64::from_le_bytes(buf);
    let new = op(old, operand);
    mem.data[start..start + size].copy_from_slice(&new.to_le_bytes()[..size]);
    drop(mem);
    ctx.stack.push_value(Value::I64(old as i64))?;
    Ok(Step::Advance)
}

fn atomic_cmpxchg32(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let replacement = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let expected = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 4];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let shift = 32 - size * 8;
    let mask = if shift == 32 { 0 } else { u32::MAX >> shift };
    let old = u32::from_le_bytes(buf) & mask;
    if old == (expected & mask) {
        mem.data[start..start + size].copy_from_slice(&replacement.to_le_bytes()[..size]);
    }
    drop(mem);
    ctx.stack.push_value(Value::I32(old as i32))?;
    Ok(Step::Advance)
}

fn atomic_cmpxchg64(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let replacement = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
    let expected = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let shift = 64 - size * 8;
    let mask = if shift == 64 { 0 } else { u64::MAX >> shift };
    let old = u64::from_le_bytes(buf) & mask;
    if old == (expected & mask) {
        mem.data[start..start + size].copy_from_slice(&replacement.to_le_bytes()[..size]);
    }
    drop(mem);
    ctx.stack.push_value(Value::I64(old as i64))?;
    Ok(Step::Advance)
}

/// `memory.atomic.wait32`/`wait64`: checked against the non-shared-memory
/// trap and alignment, then either resolved immediately (value mismatch, or
/// no cooperative cluster bound to park in) or parked via [`Step::Park`].
fn atomic_wait(
    ctx: &mut ExecContext,
    instance: &Instance,
    memarg: &wasmparser::MemArg,
    addr: u32,
    expected: u64,
    size: usize,
    _timeout_ns: i64,
) -> Result<Step, Trap> {
    let effective = (addr as u64).wrapping_add(memarg.offset);
    let mem = instance.mems[memarg.memory as usize].borrow();
    if !mem.ty.shared {
        return Err(Trap::new(TrapCode::AtomicWaitOnNonSharedMemory));
    }
    let start = atomic_check(effective, mem.data.len(), size)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&mem.data[start..start + size]);
    let current = u64::from_le_bytes(buf);
    let mask = if size == 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };
    let key = (Rc::as_ptr(&instance.mems[memarg.memory as usize]) as usize, effective);
    drop(mem);
    if (current & mask) != (expected & mask) {
        ctx.stack.push_value(Value::I32(1))?;
        return Ok(Step::Advance);
    }
    match &ctx.wait_registry {
        Some(registry) => {
            registry.register(key);
            ctx.parked_wait = Some(key);
            Ok(Step::Park)
        }
        None => {
            ctx.stack.push_value(Value::I32(2))?;
            Ok(Step::Advance)
        }
    }
}

fn store_int64(ctx: &mut ExecContext, instance: &Instance, memarg: &wasmparser::MemArg, size: usize) -> Result<Step, Trap> {
    let value = ctx.stack.pop_value(ValueType::I64).i64().unwrap() as u64;
    let base = ctx.stack.pop_value(ValueType::I32).i32().unwrap() as u32;
    let effective = (base as u64).wrapping_add(memarg.offset);
    let mut mem = instance.mems[memarg.memory as usize].borrow_mut();
    let end = effective.checked_add(size as u64).ok_or_else(|| Trap::new(TrapCode::OutOfBoundsMemoryAccess))?;
    if end > mem.data.len() as u64 {
        return Err(Trap::new(TrapCode::OutOfBoundsMemoryAccess));
    }
    let start = effective as usize;
    let bytes = value.to_le_bytes();
    mem.data[start..start + size].copy_from_slice(&bytes[..size]);
    Ok(Step::Advance)
}
