//! FFI surface: `extern fn` resolution against the process image (libc),
//! argument marshalling, and the buffer/pointer bridge.

#![cfg(unix)]

use hemlock::{CollectStringPrint, ExcKind, Exception, HostValue, Runner};

fn run(src: &str) -> (Result<HostValue, Exception>, String) {
    let runner = Runner::new(src.to_owned(), "ffi.hml").unwrap();
    let print = CollectStringPrint::new();
    let result = runner.run_with(Box::new(print.clone()));
    (result, print.output())
}

fn output(src: &str) -> String {
    let (result, output) = run(src);
    result.unwrap();
    output
}

#[test]
fn extern_fn_resolves_libc_abs() {
    let src = "extern fn abs(x: i32): i32;\nprint(abs(-5));";
    assert_eq!(output(src), "5\n");
}

#[test]
fn strings_marshal_as_c_pointers() {
    let src = "extern fn strlen(s: ptr): u64;\nprint(strlen(\"hello\"));";
    assert_eq!(output(src), "5\n");
}

#[test]
fn unknown_symbol_fails_at_first_call() {
    let src = "extern fn definitely_not_a_symbol_xyz(x: i64): i64;\ndefinitely_not_a_symbol_xyz(1);";
    let (result, _) = run(src);
    assert_eq!(result.unwrap_err().kind(), ExcKind::FFIError);
}

#[test]
fn arity_mismatch_fails_before_calling() {
    let src = "extern fn abs(x: i32): i32;\nabs(1, 2);";
    let (result, _) = run(src);
    assert_eq!(result.unwrap_err().kind(), ExcKind::FFIError);
}

#[test]
fn buffer_bridges_to_pointer_and_back() {
    let src = r#"
        let b = buffer("A");
        let p = buffer_to_ptr(b);
        print(ptr_read_u8(p));
        ptr_write_u8(p, 66);
        print(b[0]);
    "#;
    assert_eq!(output(src), "65\n66\n");
}

#[test]
fn alloc_write_read_free_roundtrip() {
    let src = r"
        let p = alloc(8);
        ptr_write_u64(p, 123456789);
        print(ptr_read_u64(p));
        ptr_write_u8(p + 1, 7);
        free(p);
    ";
    assert_eq!(output(src), "123456789\n");
}

#[test]
fn memset_and_memcpy_operate_on_raw_memory() {
    let src = r"
        let a = alloc(4);
        let b = alloc(4);
        memset(a, 65, 4);
        memcpy(b, a, 4);
        print(ptr_read_u8(b + 3));
        free(a);
        free(b);
    ";
    assert_eq!(output(src), "65\n");
}
