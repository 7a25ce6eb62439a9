//! Module loading: path resolution relative to the importer, the
//! import/export shapes, the cache, and cycle semantics.

use std::path::Path;

use hemlock::{CollectStringPrint, ExcKind, Exception, Runner};

/// Writes a module tree into a temp dir and runs `main.hml`, returning the
/// captured output.
fn run_tree(files: &[(&str, &str)]) -> Result<String, Exception> {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
    run_file(&dir.path().join("main.hml"))
}

fn run_file(path: &Path) -> Result<String, Exception> {
    let runner = Runner::load_file(path)?;
    let print = CollectStringPrint::new();
    runner.run_with(Box::new(print.clone()))?;
    Ok(print.output())
}

#[test]
fn named_import_binds_exports() {
    let output = run_tree(&[
        ("m.hml", "export let K = 42;"),
        ("main.hml", r#"import { K } from "./m"; print(K);"#),
    ])
    .unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn import_alias_renames() {
    let output = run_tree(&[
        ("m.hml", "export let K = 42;"),
        ("main.hml", r#"import { K as answer } from "./m"; print(answer);"#),
    ])
    .unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn exported_functions_are_callable() {
    let output = run_tree(&[
        ("lib.hml", "export fn double(x) { return x * 2; }"),
        ("main.hml", r#"import { double } from "./lib"; print(double(21));"#),
    ])
    .unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn namespace_import_snapshots_exports() {
    let output = run_tree(&[
        ("m.hml", "export let A = 1;\nexport let B = 2;"),
        ("main.hml", r#"import * as m from "./m"; print(m.A + m.B);"#),
    ])
    .unwrap();
    assert_eq!(output, "3\n");
}

#[test]
fn export_list_publishes_existing_locals() {
    let output = run_tree(&[
        ("m.hml", "let hidden = 41;\nlet shown = hidden + 1;\nexport { shown as K };"),
        ("main.hml", r#"import { K } from "./m"; print(K);"#),
    ])
    .unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn re_export_republishes() {
    let output = run_tree(&[
        ("base.hml", "export let K = 42;"),
        ("facade.hml", r#"export { K } from "./base";"#),
        ("main.hml", r#"import { K } from "./facade"; print(K);"#),
    ])
    .unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn relative_imports_resolve_against_the_importer() {
    // main -> sub/a -> sub/b: the inner import is relative to sub/, not to
    // the working directory.
    let output = run_tree(&[
        ("sub/b.hml", "export let V = 7;"),
        ("sub/a.hml", r#"import { V } from "./b"; export let W = V * 6;"#),
        ("main.hml", r#"import { W } from "./sub/a"; print(W);"#),
    ])
    .unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn side_effect_import_runs_once() {
    let output = run_tree(&[
        ("noisy.hml", r#"print("loaded");"#),
        ("main.hml", r#"import "./noisy"; import "./noisy";"#),
    ])
    .unwrap();
    assert_eq!(output, "loaded\n");
}

#[test]
fn module_body_runs_once_and_is_cached() {
    let output = run_tree(&[
        ("noisy.hml", r#"print("loaded"); export let X = 1;"#),
        (
            "main.hml",
            r#"import { X } from "./noisy"; import "./noisy"; print(X);"#,
        ),
    ])
    .unwrap();
    assert_eq!(output, "loaded\n1\n");
}

#[test]
fn missing_export_is_a_name_error() {
    let err = run_tree(&[
        ("m.hml", "export let K = 1;"),
        ("main.hml", r#"import { nope } from "./m";"#),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), ExcKind::NameError);
}

#[test]
fn missing_module_is_module_not_found() {
    let err = run_tree(&[("main.hml", r#"import { x } from "./ghost";"#)]).unwrap_err();
    assert_eq!(err.kind(), ExcKind::ModuleNotFound);
}

#[test]
fn import_cycle_observes_partial_exports() {
    // a defines A before importing b; b can therefore import A from the
    // still-loading a and finish, letting a complete.
    let output = run_tree(&[
        (
            "a.hml",
            r#"export let A = 1; import { B } from "./b"; export let A2 = B + 1;"#,
        ),
        ("b.hml", r#"import { A } from "./a"; export let B = A + 1;"#),
        ("main.hml", r#"import { A2 } from "./a"; print(A2);"#),
    ])
    .unwrap();
    assert_eq!(output, "3\n");
}

#[test]
fn cycle_fails_only_when_using_not_yet_defined_exports() {
    let err = run_tree(&[
        ("a.hml", r#"import { B } from "./b"; export let A = B + 1;"#),
        ("b.hml", r#"import { A } from "./a"; export let B = A + 1;"#),
        ("main.hml", r#"import { A } from "./a"; print(A);"#),
    ])
    .unwrap_err();
    // b observes a's partial exports, which do not contain A yet.
    assert_eq!(err.kind(), ExcKind::NameError);
}

#[test]
fn module_parse_errors_report_the_module_file() {
    let err = run_tree(&[
        ("broken.hml", "let = 1;"),
        ("main.hml", r#"import "./broken";"#),
    ])
    .unwrap_err();
    assert_eq!(err.kind(), ExcKind::ParseError);
    assert!(err.to_string().contains("broken.hml"), "{err}");
}
