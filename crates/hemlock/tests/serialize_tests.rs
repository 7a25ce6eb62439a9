//! Compiled-file behavior: `.hmlc` and `.hmlb` files must run identically
//! to the source they were compiled from, and invalid files must fail
//! cleanly before execution.

use hemlock::{CollectStringPrint, ExcKind, Runner, compress_container};

fn run_output(runner: &Runner) -> String {
    let print = CollectStringPrint::new();
    runner.run_with(Box::new(print.clone())).unwrap();
    print.output()
}

const PROGRAM: &str = r#"
    fn greet(name) {
        return "hello " + name;
    }
    print(greet("world"));
    print([1, 2, 3].map(fn(x) { return x * 2; }));
"#;

#[test]
fn compiled_file_runs_like_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = Runner::new(PROGRAM.to_owned(), "p.hml").unwrap();
    let expected = run_output(&source);

    let path = dir.path().join("p.hmlc");
    std::fs::write(&path, source.compile(true)).unwrap();
    let compiled = Runner::load_file(&path).unwrap();
    assert_eq!(run_output(&compiled), expected);
}

#[test]
fn compressed_container_runs_like_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = Runner::new(PROGRAM.to_owned(), "p.hml").unwrap();
    let expected = run_output(&source);

    let path = dir.path().join("p.hmlb");
    std::fs::write(&path, compress_container(&source.compile(false))).unwrap();
    let compiled = Runner::load_file(&path).unwrap();
    assert_eq!(run_output(&compiled), expected);
}

#[test]
fn recompiling_a_loaded_module_is_byte_stable() {
    let dir = tempfile::tempdir().unwrap();
    let source = Runner::new(PROGRAM.to_owned(), "p.hml").unwrap();
    let first = source.compile(true);
    let path = dir.path().join("p.hmlc");
    std::fs::write(&path, &first).unwrap();
    let reloaded = Runner::load_file(&path).unwrap();
    assert_eq!(reloaded.compile(true), first);
}

#[test]
fn truncated_compiled_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let source = Runner::new("print(1);".to_owned(), "p.hml").unwrap();
    let bytes = source.compile(false);
    let path = dir.path().join("trunc.hmlc");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    let err = Runner::load_file(&path).unwrap_err();
    assert_eq!(err.kind(), ExcKind::IOError);
}

#[test]
fn non_utf8_non_magic_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.bin");
    std::fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();
    let err = Runner::load_file(&path).unwrap_err();
    assert_eq!(err.kind(), ExcKind::IOError);
}
