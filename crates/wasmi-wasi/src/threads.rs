//! wasi-threads (§4.8): the `"wasi"` module's `thread_spawn` import, backed
//! by the cooperative scheduler in [`wasmi::Scheduler`].
//!
//! Unlike the preview-1 functions in the parent module, `thread_spawn`
//! doesn't need a [`wasmi::MemoryCell`]-style deferred binding: `Module`,
//! `Linker`, `Config`, `Cluster` and `Scheduler` are all known before the
//! spawning instance even exists, since they're instantiation's inputs
//! rather than its outputs. The closure just captures them directly.

use std::cell::RefCell;
use std::rc::Rc;

use wasmi::{decode_params, host_fn, host_module, Cluster, Config, HostModule, Instance, Linker, Module, Scheduler, ThreadId, Value, ValueType};

/// Builds the `"wasi"` module exposing `thread_spawn`. Every call
/// instantiates a fresh copy of `module` against `linker`, checks it
/// exports a shared `"memory"` and a `"wasi_thread_start"` entry point, and
/// hands it to `scheduler` as a new cooperative task.
pub fn wasi_threads(module: Module, linker: Linker, config: Rc<Config>, cluster: Rc<Cluster>, scheduler: Rc<RefCell<Scheduler>>) -> HostModule {
    let func = host_fn("(i)i", move |_ctx, params, results| {
        let values = decode_params(&[ValueType::I32], params);
        let start_arg = values[0].i32().expect("registered as an i32 param");
        let tid = spawn_one(&module, &linker, Rc::clone(&config), &cluster, &scheduler, start_arg).map(ThreadId::as_u32).map(|t| t as i32).unwrap_or(-1);
        wasmi::write_result(Value::I32(tid), results);
        Ok(())
    })
    .expect("well-formed type string");

    host_module("wasi", vec![("thread_spawn".into(), func)])
}

fn spawn_one(
    module: &Module,
    linker: &Linker,
    config: Rc<Config>,
    cluster: &Rc<Cluster>,
    scheduler: &Rc<RefCell<Scheduler>>,
    start_arg: i32,
) -> Option<ThreadId> {
    let instance = Instance::new(module, linker, Rc::clone(&config)).ok()?;
    let mem = instance.get_memory("memory")?;
    if !mem.borrow().ty.shared {
        return None;
    }
    let tid = cluster.tids().alloc()?;
    let entry = instance.get_func("wasi_thread_start")?;
    scheduler.borrow_mut().spawn(
        cluster,
        config,
        tid,
        instance.raw().clone(),
        entry.raw().clone(),
        vec![Value::I32(tid.as_u32() as i32), Value::I32(start_arg)],
    );
    Some(tid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_fails_without_shared_memory() {
        let module = Module::from_text(
            r#"(module
                (memory (export "memory") 1)
                (func (export "wasi_thread_start") (param i32 i32))
            )"#,
        )
        .unwrap();
        let linker = Linker::new();
        let config = Rc::new(Config::default());
        let cluster = Cluster::new();
        let scheduler = Rc::new(RefCell::new(Scheduler::new()));
        let tid = spawn_one(&module, &linker, config, &cluster, &scheduler, 0);
        assert!(tid.is_none());
    }
}
