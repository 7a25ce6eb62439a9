//! Bundler behavior: flattened programs must run identically to their
//! module-graph originals, and unflattenable shapes are refused.

use std::path::PathBuf;

use hemlock::{CollectStringPrint, ExcKind, Runner, bundle_file};

/// Writes a module tree, bundles `main.hml`, and returns both the direct
/// output and the bundled-run output.
fn bundle_and_run(files: &[(&str, &str)], compress: bool) -> (String, String) {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    let main = dir.path().join("main.hml");

    let direct = run_runner(&Runner::load_file(&main).unwrap());

    let bytes = bundle_file(&main, true, compress).unwrap();
    let out = dir.path().join(if compress { "b.hmlb" } else { "b.hmlc" });
    std::fs::write(&out, bytes).unwrap();
    let bundled = run_runner(&Runner::load_file(&out).unwrap());
    (direct, bundled)
}

fn run_runner(runner: &Runner) -> String {
    let print = CollectStringPrint::new();
    runner.run_with(Box::new(print.clone())).unwrap();
    print.output()
}

fn bundle_err(files: &[(&str, &str)]) -> hemlock::Exception {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }
    bundle_file(&dir.path().join("main.hml"), false, false).unwrap_err()
}

#[test]
fn bundled_program_matches_direct_run() {
    let (direct, bundled) = bundle_and_run(
        &[
            ("m.hml", "export let K = 42;"),
            ("main.hml", r#"import { K } from "./m"; print(K);"#),
        ],
        false,
    );
    assert_eq!(direct, "42\n");
    assert_eq!(bundled, "42\n");
}

#[test]
fn compressed_bundle_matches_direct_run() {
    let (direct, bundled) = bundle_and_run(
        &[
            ("m.hml", "export fn double(x) { return x * 2; }"),
            ("main.hml", r#"import { double } from "./m"; print(double(21));"#),
        ],
        true,
    );
    assert_eq!(direct, bundled);
    assert_eq!(bundled, "42\n");
}

#[test]
fn shared_dependency_is_inlined_once() {
    let (direct, bundled) = bundle_and_run(
        &[
            ("base.hml", r#"print("base"); export let V = 1;"#),
            ("a.hml", r#"import { V } from "./base"; export let A = V + 1;"#),
            ("b.hml", r#"import { V } from "./base"; export let B = V + 2;"#),
            (
                "main.hml",
                r#"import { A } from "./a"; import { B } from "./b"; print(A + B);"#,
            ),
        ],
        false,
    );
    assert_eq!(direct, "base\n5\n");
    // The flattened stream contains base's top level exactly once.
    assert_eq!(bundled, "base\n5\n");
}

#[test]
fn bundle_refuses_namespace_imports() {
    let err = bundle_err(&[
        ("m.hml", "export let K = 1;"),
        ("main.hml", r#"import * as m from "./m"; print(m.K);"#),
    ]);
    assert_eq!(err.kind(), ExcKind::ParseError);
    assert!(err.message().contains("namespace import"), "{err}");
}

#[test]
fn bundle_refuses_re_exports() {
    let err = bundle_err(&[
        ("base.hml", "export let K = 1;"),
        ("facade.hml", r#"export { K } from "./base";"#),
        ("main.hml", r#"import { K } from "./facade"; print(K);"#),
    ]);
    assert_eq!(err.kind(), ExcKind::ParseError);
    assert!(err.message().contains("re-export"), "{err}");
}

#[test]
fn bundle_of_missing_entry_fails() {
    let err = bundle_file(&PathBuf::from("/nonexistent/entry.hml"), false, false).unwrap_err();
    assert_eq!(err.kind(), ExcKind::ModuleNotFound);
}
