//! Whole-program bundling: load an entry file and its transitive imports,
//! flatten them into a single statement sequence, and hand that to the AST
//! serializer.
//!
//! Flattening is topological, leaves first: each module's non-import top
//! level is inlined exactly once, import statements are dropped (their
//! effect has been inlined), and `export let x = ...` becomes a plain
//! `let x = ...`. Namespace imports and re-exports cannot be represented
//! faithfully in a flat stream, so bundling refuses them with a clear
//! diagnostic rather than silently changing semantics.

use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::{
    ast::{ExportSpec, ImportSpec, Stmt, StmtKind},
    exception::{ExcKind, Exception, parse_failure},
    modules,
    parse::parse,
};

/// Flattens `entry` and its transitive imports into one statement sequence.
pub(crate) fn bundle(entry: &Path, stdlib_dirs: &[PathBuf]) -> Result<Vec<Stmt>, Exception> {
    let mut visited = AHashSet::new();
    let mut out = Vec::new();
    flatten(entry, stdlib_dirs, &mut visited, &mut out)?;
    Ok(out)
}

fn flatten(
    path: &Path,
    stdlib_dirs: &[PathBuf],
    visited: &mut AHashSet<PathBuf>,
    out: &mut Vec<Stmt>,
) -> Result<(), Exception> {
    let canonical = path
        .canonicalize()
        .map_err(|err| Exception::new(ExcKind::ModuleNotFound, format!("{}: {err}", path.display())))?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }
    let source = std::fs::read_to_string(&canonical)
        .map_err(|err| Exception::new(ExcKind::IOError, format!("{}: {err}", canonical.display())))?;
    let file = canonical.display().to_string();
    let stmts = parse(&source).map_err(|diags| parse_failure(&file, &diags))?;
    let dir = canonical.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    // Dependencies first, so the flattened stream defines before use.
    for stmt in &stmts {
        match &stmt.kind {
            StmtKind::Import(ImportSpec::Namespace { alias, .. }) => {
                return Err(Exception::new(
                    ExcKind::ParseError,
                    format!(
                        "cannot bundle {file}: namespace import `* as {alias}` cannot be flattened; \
                         import the names explicitly"
                    ),
                ));
            }
            StmtKind::Import(ImportSpec::Names { path: spec, .. } | ImportSpec::SideEffect { path: spec }) => {
                let resolved = modules::resolve(spec, &dir, stdlib_dirs)?;
                flatten(&resolved, stdlib_dirs, visited, out)?;
            }
            StmtKind::Export(ExportSpec::Names { from: Some(_), .. }) => {
                return Err(Exception::new(
                    ExcKind::ParseError,
                    format!("cannot bundle {file}: re-exports (`export {{ ... }} from`) cannot be flattened"),
                ));
            }
            _ => {}
        }
    }

    for stmt in stmts {
        match stmt.kind {
            // Imports were inlined above.
            StmtKind::Import(_) => {}
            // Export declarations lose their publish half; the binding
            // itself stays.
            StmtKind::Export(ExportSpec::Decl(inner)) => out.push(*inner),
            // A local export list has no effect in a flat program.
            StmtKind::Export(ExportSpec::Names { .. }) => {}
            _ => out.push(stmt),
        }
    }
    Ok(())
}
