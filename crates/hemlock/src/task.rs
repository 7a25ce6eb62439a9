use std::{
    cell::RefCell,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crate::{
    context::RuntimeCtx,
    exception::{ExcKind, Exception, Unwind},
    eval::Interp,
    function::Function,
    sync,
    value::{ArgValues, Value},
};

/// Task lifecycle states. Transitions are `Ready -> Running -> Completed`,
/// with `Blocked` entered and left around blocking channel operations and
/// `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Ready,
    Running,
    Blocked,
    Completed,
}

/// Handle to a spawned task: one OS thread executing one function call.
///
/// The handle is shared between the spawner (who may `join` or `detach`) and
/// the task's own thread (which records its result and final state).
#[derive(Debug)]
pub(crate) struct TaskHandle {
    pub id: u64,
    state: Mutex<TaskState>,
    result: Mutex<Option<Result<Value, Exception>>>,
    joined: AtomicBool,
    detached: AtomicBool,
    /// Id of the task this task is blocked joining, for diagnostics.
    waiting_on: Mutex<Option<u64>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

thread_local! {
    /// The task executing on this thread, if it is a spawned task thread.
    static CURRENT_TASK: RefCell<Option<Arc<TaskHandle>>> = const { RefCell::new(None) };
}

/// Marks the current task `Blocked` for the guard's lifetime. No-op on the
/// main thread, which has no task handle.
pub(crate) fn blocked_guard() -> BlockGuard {
    let task = CURRENT_TASK.with(|t| t.borrow().clone());
    if let Some(task) = &task {
        task.set_state(TaskState::Blocked);
    }
    BlockGuard { task }
}

pub(crate) struct BlockGuard {
    task: Option<Arc<TaskHandle>>,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.set_state(TaskState::Running);
        }
    }
}

impl TaskHandle {
    fn set_state(&self, state: TaskState) {
        *sync::lock(&self.state) = state;
    }

    pub fn state(&self) -> TaskState {
        *sync::lock(&self.state)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Blocks until the task completes, then returns its result or rethrows
    /// the exception it terminated with. A task may be joined once; joining
    /// again or joining a detached task fails with `TaskAlreadyJoined`.
    pub fn join(self: &Arc<Self>) -> Result<Value, Exception> {
        if self.is_detached() {
            return Err(Exception::new(
                ExcKind::TaskAlreadyJoined,
                format!("task {} is detached and cannot be joined", self.id),
            ));
        }
        if self.joined.swap(true, Ordering::SeqCst) {
            return Err(Exception::new(
                ExcKind::TaskAlreadyJoined,
                format!("task {} was already joined", self.id),
            ));
        }
        if let Some(current) = CURRENT_TASK.with(|t| t.borrow().clone()) {
            *sync::lock(&current.waiting_on) = Some(self.id);
        }
        let _blocked = blocked_guard();
        let handle = sync::lock(&self.thread).take();
        let panicked = match handle {
            Some(handle) => handle.join().is_err(),
            None => false,
        };
        if let Some(current) = CURRENT_TASK.with(|t| t.borrow().clone()) {
            *sync::lock(&current.waiting_on) = None;
        }
        match sync::lock(&self.result).take() {
            Some(result) => result,
            None => {
                debug_assert!(panicked, "completed task must have a result");
                Err(Exception::new(
                    ExcKind::TypeError,
                    format!("task {} terminated abnormally", self.id),
                ))
            }
        }
    }

    /// Marks the task fire-and-forget. The runtime owns cleanup; an error
    /// that already escaped is logged to stderr now, later errors are logged
    /// by the task thread itself.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        if let Some(Err(exc)) = sync::lock(&self.result).take() {
            eprintln!("detached task {}: {exc}", self.id);
        }
    }
}

/// Starts a task running `func(args...)` on a new OS thread.
///
/// The task gets its own evaluator but shares the execution context (module
/// cache, FFI registry, global environment, print sink) with its spawner.
pub(crate) fn spawn_function(
    ctx: &Arc<RuntimeCtx>,
    func: Arc<Function>,
    args: ArgValues,
    self_val: Option<Value>,
    file: &str,
) -> Result<Arc<TaskHandle>, Exception> {
    let handle = Arc::new(TaskHandle {
        id: ctx.next_task_id(),
        state: Mutex::new(TaskState::Ready),
        result: Mutex::new(None),
        joined: AtomicBool::new(false),
        detached: AtomicBool::new(false),
        waiting_on: Mutex::new(None),
        thread: Mutex::new(None),
    });

    let thread_handle = {
        let handle = Arc::clone(&handle);
        let ctx = Arc::clone(ctx);
        let file = file.to_owned();
        thread::Builder::new()
            .name(format!("hemlock-task-{}", handle.id))
            .spawn(move || {
                CURRENT_TASK.with(|t| *t.borrow_mut() = Some(Arc::clone(&handle)));
                handle.set_state(TaskState::Running);
                let interp = Interp::for_task(ctx, file);
                let result = match interp.call_function(&func, args, self_val, 0) {
                    Ok(value) => Ok(value),
                    Err(Unwind::Return(value)) => Ok(value),
                    Err(Unwind::Throw(exc)) => Err(exc),
                    Err(Unwind::Break | Unwind::Continue) => Err(Exception::new(
                        ExcKind::TypeError,
                        "break or continue escaped task body",
                    )),
                };
                let failed = result.is_err();
                if handle.is_detached() && failed {
                    if let Err(exc) = &result {
                        eprintln!("detached task {}: {exc}", handle.id);
                    }
                } else {
                    *sync::lock(&handle.result) = Some(result);
                }
                handle.set_state(TaskState::Completed);
                CURRENT_TASK.with(|t| *t.borrow_mut() = None);
            })
            .map_err(|err| Exception::new(ExcKind::IOError, format!("failed to spawn task: {err}")))?
    };
    *sync::lock(&handle.thread) = Some(thread_handle);
    Ok(handle)
}
