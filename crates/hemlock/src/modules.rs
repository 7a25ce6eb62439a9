use std::{
    path::{Path, PathBuf},
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};

use ahash::AHashMap;

use crate::{
    ast::{ExportSpec, ImportSpec, StmtKind},
    env::{EnvRef, Environment},
    eval::Interp,
    exception::{ExcKind, Exception, RunResult, parse_failure},
    object::Object,
    parse::parse,
    sync,
    value::Value,
};

#[derive(Debug, Clone)]
enum ModuleState {
    /// The module's top-level statements are executing. The exports
    /// environment exists but may be incomplete; re-entry from the same
    /// thread observes it as-is (the cycle-break semantics), other threads
    /// wait for `Loaded`.
    Loading { thread: ThreadId, exports: EnvRef },
    Loaded { exports: EnvRef },
}

/// Process-wide module cache keyed by canonical absolute path.
#[derive(Debug)]
pub(crate) struct ModuleCache {
    inner: Mutex<AHashMap<PathBuf, ModuleState>>,
    loaded: Condvar,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AHashMap::new()),
            loaded: Condvar::new(),
        }
    }

    /// Exports environments of every cached module, for teardown.
    pub fn all_exports(&self) -> Vec<EnvRef> {
        sync::lock(&self.inner)
            .values()
            .map(|state| match state {
                ModuleState::Loading { exports, .. } | ModuleState::Loaded { exports } => exports.clone(),
            })
            .collect()
    }
}

/// Resolves an import specifier to the canonical absolute path that keys the
/// module cache.
///
/// `@stdlib/<name>` resolves against the runtime's stdlib directories,
/// absolute paths are used verbatim, and relative paths resolve against the
/// importing module's directory (not the working directory). `.hml` is
/// appended when absent, then the path canonicalizes (following symlinks).
pub(crate) fn resolve(spec: &str, importer_dir: &Path, stdlib_dirs: &[PathBuf]) -> Result<PathBuf, Exception> {
    let candidate = if let Some(rest) = spec.strip_prefix("@stdlib/") {
        let mut found = None;
        for dir in stdlib_dirs {
            let candidate = with_hml_extension(dir.join(rest));
            if candidate.is_file() {
                found = Some(candidate);
                break;
            }
        }
        found.ok_or_else(|| {
            Exception::new(
                ExcKind::ModuleNotFound,
                format!("stdlib module {rest:?} not found in any stdlib directory"),
            )
        })?
    } else if spec.starts_with('/') {
        with_hml_extension(PathBuf::from(spec))
    } else {
        with_hml_extension(importer_dir.join(spec))
    };
    candidate
        .canonicalize()
        .map_err(|err| Exception::new(ExcKind::ModuleNotFound, format!("cannot resolve module {spec:?}: {err}")))
}

fn with_hml_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "hml") {
        path
    } else {
        let mut os = path.into_os_string();
        os.push(".hml");
        os.into()
    }
}

/// Loads a module (or returns it from the cache) and yields its exports
/// environment.
///
/// A same-thread re-entry while the module is still `Loading` returns the
/// partially-populated exports — this is what breaks import cycles. A
/// different thread importing a `Loading` module blocks until the owner
/// finishes.
pub(crate) fn load(interp: &Interp, spec: &str) -> Result<EnvRef, Exception> {
    let path = resolve(spec, &interp.dir, &interp.ctx.stdlib_dirs)?;
    let cache = &interp.ctx.modules;
    let exports = {
        let mut inner = sync::lock(&cache.inner);
        loop {
            match inner.get(&path) {
                Some(ModuleState::Loaded { exports }) => return Ok(exports.clone()),
                Some(ModuleState::Loading { thread, exports }) => {
                    if *thread == thread::current().id() {
                        return Ok(exports.clone());
                    }
                    inner = cache
                        .loaded
                        .wait(inner)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                None => {
                    let exports = Environment::root();
                    inner.insert(
                        path.clone(),
                        ModuleState::Loading {
                            thread: thread::current().id(),
                            exports: exports.clone(),
                        },
                    );
                    break exports;
                }
            }
        }
    };

    match execute_module(interp, &path, &exports) {
        Ok(()) => {
            let mut inner = sync::lock(&cache.inner);
            inner.insert(path, ModuleState::Loaded { exports: exports.clone() });
            drop(inner);
            cache.loaded.notify_all();
            Ok(exports)
        }
        Err(exc) => {
            let mut inner = sync::lock(&cache.inner);
            inner.remove(&path);
            drop(inner);
            cache.loaded.notify_all();
            Err(exc)
        }
    }
}

/// Parses and runs a module's top level in a fresh environment that
/// inherits the builtin/global environment.
fn execute_module(interp: &Interp, path: &Path, exports: &EnvRef) -> Result<(), Exception> {
    let source = std::fs::read_to_string(path)
        .map_err(|err| Exception::new(ExcKind::IOError, format!("cannot read module {}: {err}", path.display())))?;
    let file = path.display().to_string();
    let stmts = parse(&source).map_err(|diags| parse_failure(&file, &diags))?;
    let dir = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let module_interp = Interp::for_module(interp.ctx.clone(), file, dir, exports.clone());
    let env = Environment::child(&interp.ctx.globals);
    module_interp.run_top_level(&stmts, &env)
}

/// Executes one import statement in the importing module's scope.
pub(crate) fn exec_import(interp: &Interp, env: &EnvRef, spec: &ImportSpec, line: u32) -> RunResult<()> {
    match spec {
        ImportSpec::Names { names, path } => {
            let exports = load(interp, path).map_err(|exc| exc.at(&interp.file, line))?;
            for (name, alias) in names {
                let value = exports.get(name).ok_or_else(|| {
                    Exception::new(ExcKind::NameError, format!("module {path:?} has no export `{name}`"))
                        .at(&interp.file, line)
                })?;
                env.define(alias.as_deref().unwrap_or(name), value, false);
            }
            Ok(())
        }
        ImportSpec::Namespace { alias, path } => {
            let exports = load(interp, path).map_err(|exc| exc.at(&interp.file, line))?;
            // Namespace imports are a snapshot: each exported value is
            // retained into a plain object, so later mutation of the
            // exported binding is not observed through the namespace.
            let mut ns = Object::new(None);
            for (name, value) in exports.snapshot() {
                ns.set(&name, value);
            }
            env.define(alias, Value::new_object(ns), false);
            Ok(())
        }
        ImportSpec::SideEffect { path } => {
            load(interp, path).map_err(|exc| exc.at(&interp.file, line))?;
            Ok(())
        }
    }
}

/// Executes one export statement: runs the declaration (if any) locally and
/// publishes the named values into the module's exports environment.
pub(crate) fn exec_export(interp: &Interp, env: &EnvRef, spec: &ExportSpec, line: u32) -> RunResult<()> {
    match spec {
        ExportSpec::Decl(stmt) => {
            interp.exec_stmt(stmt, env)?;
            if let Some(exports) = &interp.exports
                && let StmtKind::Let { name, is_const, .. } = &stmt.kind
            {
                let value = env.get(name).ok_or_else(|| {
                    Exception::new(ExcKind::NameError, format!("exported binding `{name}` vanished"))
                        .at(&interp.file, line)
                })?;
                exports.define(name, value, *is_const);
            }
            Ok(())
        }
        ExportSpec::Names { names, from } => {
            let Some(exports) = &interp.exports else {
                // `export { ... }` outside a module scope is a no-op.
                return Ok(());
            };
            match from {
                // Re-export: load the other module and republish.
                Some(path) => {
                    let other = load(interp, path).map_err(|exc| exc.at(&interp.file, line))?;
                    for (name, alias) in names {
                        let value = other.get(name).ok_or_else(|| {
                            Exception::new(ExcKind::NameError, format!("module {path:?} has no export `{name}`"))
                                .at(&interp.file, line)
                        })?;
                        exports.define(alias.as_deref().unwrap_or(name), value, false);
                    }
                }
                None => {
                    for (name, alias) in names {
                        let value = env.get(name).ok_or_else(|| {
                            Exception::new(ExcKind::NameError, format!("cannot export undefined name `{name}`"))
                                .at(&interp.file, line)
                        })?;
                        exports.define(alias.as_deref().unwrap_or(name), value, false);
                    }
                }
            }
            Ok(())
        }
    }
}
