//! The concurrency substrate (§4.6): a process-wide `Cluster` tracking live
//! wasi-threads, and the cooperative scheduler that stands in for real OS
//! threads.
//!
//! The instance model here is `Rc`/`RefCell` all the way down (see
//! [`crate::instance::InstanceData`]), which is `!Send` by construction — an
//! instance's memory, tables and functions cannot cross a real OS thread
//! boundary without giving every one of those types `Arc`/`Mutex` internals
//! instead. Rather than carry two instance representations, every spawned
//! thread here runs as a cooperative task on a single OS thread's run queue,
//! switching whenever a task suspends (`RestartState::Restart`) exactly the
//! way a single blocked `memory.atomic.wait` already does. `interrupt` is
//! still a real `AtomicU32` so [`ExecContext`]'s polling has one code path
//! regardless of which scheduler drives it.

use alloc::{collections::VecDeque, rc::Rc, vec::Vec};
use core::cell::{Cell as StdCell, RefCell};
use core::sync::atomic::{AtomicU32, Ordering};

use wasmi_core::{Trap, TrapCode, Value};

use crate::engine::{self, CallOutcome, Config, ExecContext, WaitRegistry};
use crate::instance::{FuncInst, Instance};

/// A spawned thread's identifier, allocated from the range wasi-threads
/// reserves (1..2^30; 0 and the top two bits are left for the embedder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

const MAX_THREAD_ID: u32 = 1 << 30;

/// Allocates thread IDs 1..2^30, reusing the lowest free slot once a thread
/// exits rather than growing forever.
#[derive(Default)]
pub struct ThreadIdAllocator {
    next: StdCell<u32>,
    freed: RefCell<Vec<u32>>,
}

impl ThreadIdAllocator {
    pub fn new() -> Self {
        Self {
            next: StdCell::new(1),
            freed: RefCell::new(Vec::new()),
        }
    }

    pub fn alloc(&self) -> Option<ThreadId> {
        if let Some(id) = self.freed.borrow_mut().pop() {
            return Some(ThreadId(id));
        }
        let id = self.next.get();
        if id >= MAX_THREAD_ID {
            return None;
        }
        self.next.set(id + 1);
        Some(ThreadId(id))
    }

    pub fn free(&self, id: ThreadId) {
        self.freed.borrow_mut().push(id.0);
    }
}

/// A process-wide coordination object shared by a module instance and every
/// thread it spawns.
pub struct Cluster {
    thread_count: StdCell<u32>,
    interrupt: Rc<AtomicU32>,
    /// The first non-`VoluntaryThreadExit` trap observed on any peer; `join`
    /// reports this one, matching "the main thread observes the canonical
    /// trap (the first one recorded)".
    canonical_trap: RefCell<Option<Trap>>,
    tids: ThreadIdAllocator,
    /// Shared across every spawned task so a `memory.atomic.wait`/`notify`
    /// pair on one thread can park and wake another.
    wait_registry: Rc<WaitRegistry>,
}

impl Cluster {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            thread_count: StdCell::new(0),
            interrupt: Rc::new(AtomicU32::new(0)),
            canonical_trap: RefCell::new(None),
            tids: ThreadIdAllocator::new(),
            wait_registry: Rc::new(WaitRegistry::new()),
        })
    }

    pub fn interrupt_flag(&self) -> Rc<AtomicU32> {
        Rc::clone(&self.interrupt)
    }

    pub fn wait_registry(&self) -> Rc<WaitRegistry> {
        Rc::clone(&self.wait_registry)
    }

    pub fn tids(&self) -> &ThreadIdAllocator {
        &self.tids
    }

    /// Asks every peer to unwind. Idempotent; only the first caller's trap
    /// becomes canonical.
    fn interrupt_all(&self, trap: Trap) {
        self.interrupt.store(1, Ordering::Release);
        let mut canonical = self.canonical_trap.borrow_mut();
        if canonical.is_none() {
            *canonical = Some(trap);
        }
    }

    fn thread_started(&self) {
        self.thread_count.set(self.thread_count.get() + 1);
    }

    fn thread_exited(&self) {
        self.thread_count.set(self.thread_count.get() - 1);
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count.get()
    }
}

/// One spawned thread's cooperative task state.
enum TaskState {
    NotStarted { args: Vec<Value> },
    Suspended,
}

struct Task {
    tid: ThreadId,
    ctx: ExecContext,
    instance: Instance,
    /// The entry function, needed on every resume so the result types line
    /// up once the call chain finally unwinds (see [`engine::resume`]).
    entry: FuncInst,
    state: TaskState,
}

/// A run queue of cooperative tasks, round-robining whenever one suspends.
/// Stands in for OS threads (see module docs); `run_to_completion` plays the
/// role `join` plays for a real thread pool.
#[derive(Default)]
pub struct Scheduler {
    queue: VecDeque<Task>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `entry(args)` as a new cooperative thread bound to
    /// `instance`, sharing `cluster`'s interrupt flag.
    pub fn spawn(&mut self, cluster: &Rc<Cluster>, config: Rc<Config>, tid: ThreadId, instance: Instance, entry: FuncInst, args: Vec<Value>) {
        cluster.thread_started();
        let ctx = ExecContext::new(config)
            .with_interrupt(cluster.interrupt_flag())
            .with_wait_registry(cluster.wait_registry());
        self.queue.push_back(Task {
            tid,
            ctx,
            instance,
            entry,
            state: TaskState::NotStarted { args },
        });
    }

    /// Runs every queued task to completion, round-robin, propagating the
    /// cluster's canonical trap (if any peer set one) once the queue drains.
    pub fn run_to_completion(&mut self, cluster: &Cluster) -> Result<(), Trap> {
        while let Some(mut task) = self.queue.pop_front() {
            let outcome = match core::mem::replace(&mut task.state, TaskState::Suspended) {
                TaskState::NotStarted { args } => engine::run(&mut task.ctx, &task.entry, &args),
                TaskState::Suspended => engine::resume(&mut task.ctx, &task.instance, &task.entry),
            };
            match outcome {
                Ok(CallOutcome::Finished(_)) => {
                    cluster.tids().free(task.tid);
                    cluster.thread_exited();
                }
                Ok(CallOutcome::Suspended) => {
                    self.queue.push_back(task);
                }
                Ok(CallOutcome::Interrupted) => {
                    // Some peer already recorded the canonical trap before
                    // this task observed the interrupt flag; just retire it.
                    cluster.tids().free(task.tid);
                    cluster.thread_exited();
                }
                Err(trap) if trap.code() == TrapCode::VoluntaryThreadExit => {
                    cluster.tids().free(task.tid);
                    cluster.thread_exited();
                }
                Err(trap) => {
                    cluster.tids().free(task.tid);
                    cluster.thread_exited();
                    cluster.interrupt_all(trap);
                }
            }
        }
        if let Some(trap) = cluster.canonical_trap.borrow_mut().take() {
            return Err(trap);
        }
        Ok(())
    }
}
