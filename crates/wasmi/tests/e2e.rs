//! Black-box scenarios against the public embedder API.

use std::rc::Rc;

use wasmi::{Cluster, Config, Instance, Linker, Module, Scheduler, Value};

fn instantiate(wat: &str) -> (Instance, Rc<Config>) {
    let module = Module::from_text(wat).expect("valid module");
    let linker = Linker::new();
    let config = Rc::new(Config::default());
    let instance = Instance::new(&module, &linker, Rc::clone(&config)).expect("instantiation succeeds");
    (instance, config)
}

#[test]
fn arithmetic_add() {
    let (instance, config) = instantiate(
        r#"(module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))"#,
    );
    let add = instance.get_func("add").unwrap();
    let result = add.call(config, &[Value::I32(1), Value::I32(2)]).unwrap();
    assert_eq!(result, vec![Value::I32(3)]);
}

#[test]
fn division_by_zero_traps() {
    let (instance, config) = instantiate(
        r#"(module
            (func (export "div_s") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s))"#,
    );
    let div_s = instance.get_func("div_s").unwrap();
    let err = div_s.call(config, &[Value::I32(1), Value::I32(0)]).unwrap_err();
    assert_eq!(err.to_string(), "integer divide by zero");
}

#[test]
fn indirect_call_type_mismatch_traps() {
    let (instance, config) = instantiate(
        r#"(module
            (type $ret_i32 (func (result i32)))
            (type $no_args (func))
            (table 1 funcref)
            (func $f (type $ret_i32) (i32.const 0))
            (elem (i32.const 0) $f)
            (func (export "call_it")
                i32.const 0
                call_indirect (type $no_args)))"#,
    );
    let call_it = instance.get_func("call_it").unwrap();
    let err = call_it.call(config, &[]).unwrap_err();
    assert_eq!(err.to_string(), "indirect call type mismatch");
}

#[test]
fn memory_grow_and_bounds() {
    let (instance, config) = instantiate(
        r#"(module
            (memory (export "memory") 1)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow)
            (func (export "load") (param i32) (result i32)
                local.get 0
                i32.load))"#,
    );
    let grow = instance.get_func("grow").unwrap();
    let load = instance.get_func("load").unwrap();

    let grown = grow.call(Rc::clone(&config), &[Value::I32(1)]).unwrap();
    assert_eq!(grown, vec![Value::I32(1)]);

    let failed = grow.call(Rc::clone(&config), &[Value::I32(70000)]).unwrap();
    assert_eq!(failed, vec![Value::I32(-1)]);

    let ok = load.call(Rc::clone(&config), &[Value::I32(131071 - 3)]).unwrap();
    assert_eq!(ok, vec![Value::I32(0)]);

    let err = load.call(config, &[Value::I32(131072)]).unwrap_err();
    assert_eq!(err.to_string(), "out of bounds memory access");
}

#[test]
fn start_function_initializes_global() {
    let (instance, _config) = instantiate(
        r#"(module
            (global (export "g") (mut i32) (i32.const 0))
            (func $init
                i32.const 42
                global.set 0)
            (start $init))"#,
    );
    let global = match instance.get_export("g") {
        Some(wasmi::Extern::Global(g)) => g,
        _ => panic!("expected a global export"),
    };
    assert_eq!(global.borrow().value, Value::I32(42));
}

#[test]
fn wasi_threads_trap_propagates_and_tids_free() {
    let module = Module::from_text(
        r#"(module
            (memory (export "memory") (shared 1 1))
            (func (export "noop") (param i32 i32))
            (func (export "crash") (param i32 i32)
                unreachable))"#,
    )
    .expect("valid module");
    let linker = Linker::new();
    let config = Rc::new(Config::default());
    let cluster = Cluster::new();
    let mut scheduler = Scheduler::new();

    let instance = Instance::new(&module, &linker, Rc::clone(&config)).unwrap();
    let noop = instance.get_func("noop").unwrap();
    let crash = instance.get_func("crash").unwrap();

    let tid_a = cluster.tids().alloc().unwrap();
    scheduler.spawn(&cluster, Rc::clone(&config), tid_a, instance.raw().clone(), noop.raw().clone(), vec![Value::I32(tid_a.as_u32() as i32), Value::I32(0)]);

    let tid_b = cluster.tids().alloc().unwrap();
    scheduler.spawn(&cluster, Rc::clone(&config), tid_b, instance.raw().clone(), crash.raw().clone(), vec![Value::I32(tid_b.as_u32() as i32), Value::I32(0)]);

    let result = scheduler.run_to_completion(&cluster);
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "unreachable executed");
    assert_eq!(cluster.thread_count(), 0);
}

/// A `memory.atomic.wait32` that parks must resume past the wait, not
/// restart the waiting function from its entry point — this writes a
/// value computed both before and after the wait into memory so a
/// from-scratch restart (which would recompute and re-wait) is caught by
/// comparing the observed value against what only one correct pass could
/// produce.
#[test]
fn atomic_wait_resumes_past_the_wait_instead_of_restarting() {
    let module = Module::from_text(
        r#"(module
            (memory (export "memory") (shared 1 1))
            (func (export "waiter") (param i32 i32)
                (local i32)
                i32.const 2
                local.set 2
                i32.const 0
                i32.const 0
                i64.const -1
                memory.atomic.wait32
                drop
                i32.const 4
                local.get 2
                i32.const 5
                i32.add
                i32.store)
            (func (export "notifier") (param i32 i32)
                i32.const 0
                i32.const 1
                memory.atomic.notify
                drop))"#,
    )
    .expect("valid module");
    let linker = Linker::new();
    let config = Rc::new(Config::default());
    let cluster = Cluster::new();
    let mut scheduler = Scheduler::new();

    let instance = Instance::new(&module, &linker, Rc::clone(&config)).unwrap();
    let waiter = instance.get_func("waiter").unwrap();
    let notifier = instance.get_func("notifier").unwrap();

    let tid_waiter = cluster.tids().alloc().unwrap();
    scheduler.spawn(&cluster, Rc::clone(&config), tid_waiter, instance.raw().clone(), waiter.raw().clone(), vec![Value::I32(tid_waiter.as_u32() as i32), Value::I32(0)]);

    let tid_notifier = cluster.tids().alloc().unwrap();
    scheduler.spawn(&cluster, Rc::clone(&config), tid_notifier, instance.raw().clone(), notifier.raw().clone(), vec![Value::I32(tid_notifier.as_u32() as i32), Value::I32(0)]);

    scheduler.run_to_completion(&cluster).expect("no peer traps");
    assert_eq!(cluster.thread_count(), 0);

    let mem = instance.get_memory("memory").unwrap();
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&mem.borrow().data[4..8]);
    assert_eq!(i32::from_le_bytes(buf), 7);
}

/// Once one peer traps, the cluster's interrupt flag is set; any other
/// peer still parked at a `memory.atomic.wait` that never gets notified
/// must observe the interrupt on its next poll (`CallOutcome::Interrupted`)
/// rather than being requeued forever.
#[test]
fn interrupted_peer_is_retired_without_its_own_trap() {
    let module = Module::from_text(
        r#"(module
            (memory (export "memory") (shared 1 1))
            (func (export "waits_forever") (param i32 i32)
                i32.const 0
                i32.const 0
                i64.const -1
                memory.atomic.wait32
                drop)
            (func (export "crash") (param i32 i32)
                unreachable))"#,
    )
    .expect("valid module");
    let linker = Linker::new();
    let config = Rc::new(Config::default());
    let cluster = Cluster::new();
    let mut scheduler = Scheduler::new();

    let instance = Instance::new(&module, &linker, Rc::clone(&config)).unwrap();
    let waits_forever = instance.get_func("waits_forever").unwrap();
    let crash = instance.get_func("crash").unwrap();

    let tid_a = cluster.tids().alloc().unwrap();
    scheduler.spawn(&cluster, Rc::clone(&config), tid_a, instance.raw().clone(), waits_forever.raw().clone(), vec![Value::I32(tid_a.as_u32() as i32), Value::I32(0)]);

    let tid_b = cluster.tids().alloc().unwrap();
    scheduler.spawn(&cluster, Rc::clone(&config), tid_b, instance.raw().clone(), crash.raw().clone(), vec![Value::I32(tid_b.as_u32() as i32), Value::I32(0)]);

    let result = scheduler.run_to_completion(&cluster);
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "unreachable executed");
    assert_eq!(cluster.thread_count(), 0);
}
