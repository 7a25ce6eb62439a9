use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use ahash::AHashMap;

use crate::{
    builtins,
    env::{EnvRef, Environment},
    ffi::FfiRegistry,
    io::PrintWriter,
    modules::ModuleCache,
    object::ObjectTemplate,
    sync,
    value::Value,
};

/// Process-wide execution context shared by every task in one runtime.
///
/// The registries that outlive any single call — module cache, FFI symbol
/// table, nominal-type registry, signal-handler table, the task id counter —
/// live here and are passed through, never kept as ambient statics. The
/// exception and defer stacks are per-task and live on the evaluator
/// instead.
pub(crate) struct RuntimeCtx {
    /// The builtin/global environment every module scope inherits.
    pub globals: EnvRef,
    pub modules: ModuleCache,
    /// Nominal type templates registered by `define object`.
    pub types: Mutex<AHashMap<String, Arc<ObjectTemplate>>>,
    pub ffi: FfiRegistry,
    /// Installed signal handlers, keyed by signal number.
    pub signals: Mutex<AHashMap<i32, Value>>,
    pub print: Box<dyn PrintWriter>,
    /// Search roots for `@stdlib/` imports, in priority order.
    pub stdlib_dirs: Vec<PathBuf>,
    next_task: AtomicU64,
}

impl RuntimeCtx {
    pub fn new(print: Box<dyn PrintWriter>) -> Arc<Self> {
        let globals = Environment::root();
        builtins::install(&globals);
        Arc::new(Self {
            globals,
            modules: ModuleCache::new(),
            types: Mutex::new(AHashMap::new()),
            ffi: FfiRegistry::default(),
            signals: Mutex::new(AHashMap::new()),
            print,
            stdlib_dirs: stdlib_search_dirs(),
            next_task: AtomicU64::new(1),
        })
    }

    /// Monotone task id allocation.
    pub fn next_task_id(&self) -> u64 {
        self.next_task.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a nominal object type, replacing any previous definition of
    /// the same name.
    pub fn register_type(&self, template: Arc<ObjectTemplate>) {
        sync::lock(&self.types).insert(template.name.clone(), template);
    }

    pub fn lookup_type(&self, name: &str) -> Option<Arc<ObjectTemplate>> {
        sync::lock(&self.types).get(name).cloned()
    }

    /// Runs the cycle-break pass over everything the context keeps alive,
    /// then drops the registries.
    ///
    /// Walking starts from the global environment, every module exports
    /// environment, every type template's definition scope, and every
    /// registered signal handler; each reachable function value has its
    /// captured-environment reference detached. After this the plain
    /// reference-count teardown frees the whole graph.
    pub fn teardown(&self) {
        self.globals.break_cycles();
        for exports in self.modules.all_exports() {
            exports.break_cycles();
        }
        let templates: Vec<Arc<ObjectTemplate>> = sync::lock(&self.types).drain().map(|(_, t)| t).collect();
        for template in &templates {
            template.env.break_cycles();
            for method in template.methods.values() {
                if let Value::Function(func) = method {
                    func.detach_captured();
                }
            }
        }
        let handlers: Vec<Value> = sync::lock(&self.signals).drain().map(|(_, v)| v).collect();
        for handler in &handlers {
            if let Value::Function(func) = handler {
                func.detach_captured();
            }
        }
    }
}

impl std::fmt::Debug for RuntimeCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCtx").finish_non_exhaustive()
    }
}

/// Locates `stdlib/` next to the executable, under the working directory,
/// and at the fixed install location, in that order.
pub(crate) fn stdlib_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(3);
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        dirs.push(exe_dir.join("stdlib"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("stdlib"));
    }
    dirs.push(PathBuf::from("/usr/local/lib/hemlock/stdlib"));
    dirs
}
