//! The instance builder (§4.3): the eight-step pipeline that turns a
//! [`Module`] plus a chain of import-objects into a live, callable
//! [`InstanceData`].
//!
//! Every step can fail; a failure partway through simply drops whatever has
//! been allocated so far (Rust's ordinary drop glue does the rollback, since
//! nothing is published to the caller until the final `Rc::new` below
//! succeeds) and returns a [`LinkError`] or propagates a trap from the start
//! function.

use alloc::{collections::BTreeMap, rc::Rc, vec::Vec};
use core::cell::RefCell;

use wasmi_core::{RefType, Value};

use crate::engine::{self, Config, ExecContext};
use crate::error::Error;
use crate::instance::{
    link_error, Extern, FuncInst, GlobalInst, InstanceData, MemInst, TableInst,
};
use crate::linker::Linker;
use crate::module::{ConstExpr, ElementInit, ElementMode, ExternKind, ImportDesc, Module};

/// Builds and fully initializes a new instance of `module`, resolving its
/// imports against `linker`.
pub fn instantiate(module: Rc<Module>, linker: &Linker, config: Rc<Config>) -> Result<Rc<InstanceData>, Error> {
    // Step 1: resolve imports. Imported funcs/mems/tables/globals occupy the
    // low end of each index space, ahead of this module's own definitions,
    // matching `Module`'s own indexing convention.
    let mut imported_funcs = Vec::new();
    let mut mems: Vec<Rc<RefCell<MemInst>>> = Vec::new();
    let mut tables: Vec<Rc<RefCell<TableInst>>> = Vec::new();
    let mut globals: Vec<Rc<RefCell<GlobalInst>>> = Vec::new();

    for import in &module.imports {
        let resolved = linker
            .resolve(&import.module, &import.name)
            .ok_or_else(|| link_error(import.module.clone(), import.name.clone(), "no entry found for import"))?;
        match (&import.desc, &resolved) {
            (ImportDesc::Func(type_idx), Extern::Func(f)) => {
                let expected = &module.types[*type_idx as usize];
                if f.ty() != *expected {
                    return Err(link_error(import.module.clone(), import.name.clone(), "function type mismatch"));
                }
                imported_funcs.push(f.clone());
            }
            (ImportDesc::Memory(expected), Extern::Memory(m)) => {
                let offered = m.borrow().ty;
                if offered.shared != expected.shared || !offered.limits.matches(&expected.limits) {
                    return Err(link_error(import.module.clone(), import.name.clone(), "memory limits mismatch"));
                }
                mems.push(m.clone());
            }
            (ImportDesc::Table(expected), Extern::Table(t)) => {
                let offered = t.borrow().ty;
                if offered.element != expected.element || !offered.limits.matches(&expected.limits) {
                    return Err(link_error(import.module.clone(), import.name.clone(), "table limits mismatch"));
                }
                tables.push(t.clone());
            }
            (ImportDesc::Global(expected), Extern::Global(g)) => {
                let offered = g.borrow().ty;
                if offered != *expected {
                    return Err(link_error(import.module.clone(), import.name.clone(), "global type/mutability mismatch"));
                }
                globals.push(g.clone());
            }
            _ => {
                return Err(link_error(
                    import.module.clone(),
                    import.name.clone(),
                    alloc::format!("expected {:?}, found a {}", import.desc, resolved.kind_name()),
                ))
            }
        }
    }

    // Steps 3-4: allocate this module's own memories and tables. Defined
    // functions (step 2) are filled in last since they need a strong handle
    // back to the instance under construction.
    for ty in &module.mems {
        mems.push(Rc::new(RefCell::new(MemInst::new(*ty))));
    }
    for ty in &module.tables {
        tables.push(Rc::new(RefCell::new(TableInst::new(*ty))));
    }

    // Step 5: allocate globals, evaluating each init expression. A
    // `global.get` operand may only reference an already-resolved *imported*
    // immutable global, which is exactly what `globals` holds at this point
    // since defined globals haven't been pushed yet.
    for def in &module.globals {
        let value = eval_const_expr(&def.init, &globals);
        globals.push(Rc::new(RefCell::new(GlobalInst { value, ty: def.ty })));
    }

    let data_dropped = RefCell::new(alloc::vec![false; module.datas.len()]);
    let elem_dropped = RefCell::new(alloc::vec![false; module.elems.len()]);

    // Now the whole non-func shape of the instance is known; build it with
    // an empty function table and populate that last, using a strong `Rc`
    // clone of the instance taken from inside the `RefCell` — the one part
    // of construction that has to happen after the instance itself exists.
    let instance = Rc::new(InstanceData {
        module: Rc::clone(&module),
        funcs: RefCell::new(Vec::new()),
        mems,
        tables,
        globals,
        exports: RefCell::new(BTreeMap::new()),
        data_dropped,
        elem_dropped,
    });

    // Step 2: allocate defined functions, now that `instance` exists for
    // them to point back to.
    let mut funcs = imported_funcs;
    let num_imported = funcs.len() as u32;
    for i in 0..module.funcs.len() as u32 {
        funcs.push(FuncInst::Wasm {
            instance: Rc::clone(&instance),
            func_idx: num_imported + i,
        });
    }
    *instance.funcs.borrow_mut() = funcs;

    // Step 6: element segments.
    for (elem_index, elem) in module.elems.iter().enumerate() {
        match elem.mode {
            ElementMode::Active { table_index } => {
                let offset_expr = elem.offset.as_ref().expect("active segment always carries an offset");
                let offset = eval_const_expr(offset_expr, &instance.globals).i32().expect("i32 offset") as usize;
                let values: Vec<Value> = elem
                    .items
                    .iter()
                    .map(|it| match it {
                        ElementInit::Func(idx) => Value::FuncRef(RefType::Func(*idx)),
                        ElementInit::Null => crate::module::ref_default(elem.ty),
                    })
                    .collect();
                let mut table = instance.tables[table_index as usize].borrow_mut();
                let end = offset + values.len();
                if end > table.elems.len() {
                    return Err(link_error("", "", "active element segment out of bounds"));
                }
                table.elems[offset..end].copy_from_slice(&values);
            }
            ElementMode::Declared => {
                instance.elem_dropped.borrow_mut()[elem_index] = true;
            }
            ElementMode::Passive => {}
        }
    }

    // Step 7: data segments.
    for data in module.datas.iter() {
        if let crate::module::DataMode::Active { memory_index } = data.mode {
            let offset_expr = data.offset.as_ref().expect("active segment always carries an offset");
            let offset = eval_const_expr(offset_expr, &instance.globals).i32().expect("i32 offset") as usize;
            let mut mem = instance.mems[memory_index as usize].borrow_mut();
            let end = offset + data.bytes.len();
            if end > mem.data.len() {
                return Err(link_error("", "", "active data segment out of bounds"));
            }
            mem.data[offset..end].copy_from_slice(&data.bytes);
        }
    }

    // Step 8: run the start function, if any.
    if let Some(start_idx) = module.start {
        let start_func = instance.funcs.borrow()[start_idx as usize].clone();
        let mut ctx = ExecContext::new(config);
        engine::run(&mut ctx, &start_func, &[])?;
    }

    build_exports(&instance);

    Ok(instance)
}

fn build_exports(instance: &Rc<InstanceData>) {
    let mut exports = BTreeMap::new();
    for export in &instance.module.exports {
        let item = match export.kind {
            ExternKind::Func => Extern::Func(instance.funcs.borrow()[export.index as usize].clone()),
            ExternKind::Memory => Extern::Memory(instance.mems[export.index as usize].clone()),
            ExternKind::Table => Extern::Table(instance.tables[export.index as usize].clone()),
            ExternKind::Global => Extern::Global(instance.globals[export.index as usize].clone()),
        };
        exports.insert(export.name.clone(), item);
    }
    *instance.exports.borrow_mut() = exports;
}

fn eval_const_expr(expr: &ConstExpr, globals: &[Rc<RefCell<GlobalInst>>]) -> Value {
    match expr {
        ConstExpr::I32(v) => Value::I32(*v),
        ConstExpr::I64(v) => Value::I64(*v),
        ConstExpr::F32(bits) => Value::F32(wasmi_core::F32::from_bits(*bits)),
        ConstExpr::F64(bits) => Value::F64(wasmi_core::F64::from_bits(*bits)),
        ConstExpr::RefNull(ty) => crate::module::ref_default(*ty),
        ConstExpr::RefFunc(idx) => Value::FuncRef(RefType::Func(*idx)),
        ConstExpr::GlobalGet(idx) => globals[*idx as usize].borrow().value,
    }
}
