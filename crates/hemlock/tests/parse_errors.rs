//! Parser diagnostics: batching, recovery, and shape validation. All parse
//! errors surface before any execution starts.

use hemlock::{ExcKind, Runner};

fn parse_err(src: &str) -> hemlock::Exception {
    Runner::new(src.to_owned(), "bad.hml").unwrap_err()
}

#[test]
fn parse_errors_batch_across_statements() {
    let err = parse_err("let = 1;\nlet ok = 2;\nlet = 3;\n");
    assert_eq!(err.kind(), ExcKind::ParseError);
    let message = err.message();
    assert!(message.contains("line 1"), "{message}");
    assert!(message.contains("line 3"), "{message}");
}

#[test]
fn try_requires_catch_or_finally() {
    let err = parse_err("try { print(1); }");
    assert!(err.message().contains("catch"), "{err}");
}

#[test]
fn finally_without_catch_is_fine() {
    Runner::new("try { print(1); } finally { print(2); }".to_owned(), "ok.hml").unwrap();
}

#[test]
fn invalid_assignment_target() {
    let err = parse_err("1 + 2 = 3;");
    assert!(err.message().contains("assignment target"), "{err}");
}

#[test]
fn unterminated_string_reports_lexer_message() {
    let err = parse_err("let s = \"open;\n");
    assert!(err.message().contains("unterminated"), "{err}");
}

#[test]
fn unknown_escape_reports_lexer_message() {
    let err = parse_err(r#"let s = "\q";"#);
    assert!(err.message().contains("escape"), "{err}");
}

#[test]
fn malformed_number_suffix() {
    let err = parse_err("let n = 1zz;");
    assert!(err.message().contains("suffix"), "{err}");
}

#[test]
fn const_requires_initializer() {
    let err = parse_err("const k;");
    assert!(err.message().contains("initializer"), "{err}");
}

#[test]
fn recovery_continues_inside_blocks() {
    let err = parse_err("fn f() {\n    let = 1;\n    let = 2;\n}\n");
    let message = err.message();
    assert!(message.contains("line 2"), "{message}");
    assert!(message.contains("line 3"), "{message}");
}

#[test]
fn extern_params_require_types() {
    let err = parse_err("extern fn puts(s);");
    assert!(err.message().contains("type"), "{err}");
}

#[test]
fn import_shapes_parse() {
    let src = r#"
        import { a, b as c } from "./m";
        import * as ns from "./m";
        import "./side";
        export { a, b as c };
    "#;
    Runner::new(src.to_owned(), "shapes.hml").unwrap();
}

#[test]
fn ref_outside_parameters_is_rejected() {
    let err = parse_err("let x = ref 1;");
    assert!(err.message().contains("ref"), "{err}");
}
