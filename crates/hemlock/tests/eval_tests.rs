//! End-to-end evaluator tests: operators, typed numerics, control flow,
//! closures, exceptions, defer, and nominal object types.

use hemlock::{CollectStringPrint, ExcKind, Exception, HostValue, Runner};

/// Runs a program and returns its result plus everything it printed.
fn run(src: &str) -> (Result<HostValue, Exception>, String) {
    let runner = Runner::new(src.to_owned(), "test.hml").unwrap();
    let print = CollectStringPrint::new();
    let result = runner.run_with(Box::new(print.clone()));
    (result, print.output())
}

/// Runs a program expected to succeed and returns its printed output.
fn output(src: &str) -> String {
    let (result, output) = run(src);
    result.unwrap();
    output
}

/// Runs a program expected to fail and returns the exception.
fn error(src: &str) -> Exception {
    let (result, _) = run(src);
    result.unwrap_err()
}

#[test]
fn typed_binding_out_of_range() {
    let err = error("let x: u8 = 300;");
    assert_eq!(err.kind(), ExcKind::RangeError);
    assert!(err.to_string().contains("300 out of u8"), "{err}");
    assert_eq!(err.line(), 1);
}

#[test]
fn suffixed_literal_out_of_range() {
    let err = error("let x = 300u8;");
    assert_eq!(err.kind(), ExcKind::RangeError);
}

#[test]
fn map_reduce_pipeline() {
    let src = "let a = [1,2,3]; print(a.map(fn(x){return x*x;}).reduce(fn(s,x){return s+x;}, 0));";
    assert_eq!(output(src), "14\n");
}

#[test]
fn untyped_arithmetic_wraps_at_64_bits() {
    assert_eq!(output("let a = 9223372036854775807; print(a + 1);"), "-9223372036854775808\n");
    assert_eq!(output("print(9223372036854775807 * 2);"), "-2\n");
}

#[test]
fn same_tag_arithmetic_preserves_tag_and_wraps() {
    let src = "let a: u8 = 200; let b: u8 = 100; let c = a + b; print(typeof(c), c);";
    assert_eq!(output(src), "u8 44\n");
}

#[test]
fn mixed_tag_promotion_widens() {
    assert_eq!(output("let a: i16 = 5; let b: u8 = 2; print(typeof(a * b));"), "i16\n");
    assert_eq!(output("let a: u32 = 5; let b: i64 = 2; print(typeof(a + b));"), "i64\n");
    assert_eq!(output("let a: i32 = 5; print(typeof(a + 1.5));"), "f64\n");
}

#[test]
fn integer_division_by_zero_fails() {
    let err = error("print(1 / 0);");
    assert_eq!(err.kind(), ExcKind::DivisionByZero);
}

#[test]
fn float_division_by_zero_is_ieee() {
    assert_eq!(output("print(1.0 / 0.0);"), "inf\n");
    assert_eq!(output("print(-1.0 / 0.0);"), "-inf\n");
}

#[test]
fn string_concat_and_codepoint_indexing() {
    assert_eq!(output(r#"print("foo" + "bar");"#), "foobar\n");
    // Indexing is by codepoint and yields a rune, not a byte.
    assert_eq!(output(r#"let s = "héllo"; print(s[1]);"#), "é\n");
    assert_eq!(output(r#"print("héllo".len(), "héllo".byte_len());"#), "5 6\n");
    assert_eq!(output(r#"print(typeof("abc"[0]));"#), "rune\n");
}

#[test]
fn string_equality_is_content_array_is_identity() {
    assert_eq!(output(r#"print("ab" == "a" + "b");"#), "true\n");
    assert_eq!(output("let a = [1]; let b = [1]; print(a == b, a == a);"), "false true\n");
}

#[test]
fn cross_type_numeric_equality_promotes() {
    assert_eq!(output("let a: u8 = 7; let b: i64 = 7; print(a == b, a == 7.0);"), "true true\n");
}

#[test]
fn closures_retain_their_defining_scope() {
    let src = r"
        fn counter() {
            let n = 0;
            return fn() {
                n = n + 1;
                return n;
            };
        }
        let c = counter();
        c();
        c();
        print(c());
    ";
    assert_eq!(output(src), "3\n");
}

#[test]
fn const_reassignment_fails() {
    let err = error("const k = 1; k = 2;");
    assert_eq!(err.kind(), ExcKind::ConstReassignment);
}

#[test]
fn undefined_identifier_fails() {
    let err = error("print(nope);");
    assert_eq!(err.kind(), ExcKind::NameError);
}

#[test]
fn try_catch_finally_ordering() {
    let src = r#"try { throw "oops"; } catch (e) { print(e); } finally { print("done"); }"#;
    assert_eq!(output(src), "oops\ndone\n");
}

#[test]
fn finally_runs_on_return() {
    let src = r#"
        fn f() {
            try {
                return 1;
            } finally {
                print("finally");
            }
        }
        print(f());
    "#;
    assert_eq!(output(src), "finally\n1\n");
}

#[test]
fn uncaught_throw_carries_the_value() {
    let err = error(r#"throw "boom";"#);
    assert_eq!(err.kind(), ExcKind::Thrown);
    assert!(err.to_string().contains("boom"));
}

#[test]
fn runtime_errors_are_catchable() {
    let src = r"
        try {
            let x: u8 = 300;
        } catch (e) {
            print(e);
        }
    ";
    assert_eq!(output(src), "RangeError: 300 out of u8\n");
}

#[test]
fn defer_flushes_lifo_on_exit() {
    let src = r#"
        fn f() {
            defer print("first deferred");
            defer print("second deferred");
            print("body");
        }
        f();
    "#;
    assert_eq!(output(src), "body\nsecond deferred\nfirst deferred\n");
}

#[test]
fn defer_runs_on_throw() {
    let src = r#"
        fn f() {
            defer print("cleanup");
            throw "bad";
        }
        try { f(); } catch (e) { print(e); }
    "#;
    assert_eq!(output(src), "cleanup\nbad\n");
}

#[test]
fn loops_break_continue() {
    let src = r"
        let total = 0;
        for x in [1, 2, 3, 4, 5] {
            if x == 2 { continue; }
            if x == 5 { break; }
            total += x;
        }
        print(total);
    ";
    assert_eq!(output(src), "8\n");
}

#[test]
fn while_loop_counts() {
    let src = "let i = 0; while i < 3 { i += 1; } print(i);";
    assert_eq!(output(src), "3\n");
}

#[test]
fn for_iterates_string_codepoints() {
    let src = r#"for c in "héllo" { print(c); }"#;
    assert_eq!(output(src), "h\né\nl\nl\no\n");
}

#[test]
fn switch_without_fallthrough() {
    let src = r#"
        fn describe(n) {
            switch n {
                case 1:
                    return "one";
                case 2:
                    return "two";
                default:
                    return "many";
            }
        }
        print(describe(1), describe(2), describe(9));
    "#;
    assert_eq!(output(src), "one two many\n");
}

#[test]
fn define_object_defaults_and_methods() {
    let src = r"
        define object Point {
            x: f64 = 0.0,
            y: f64 = 0.0,
            norm2: fn() { return self.x * self.x + self.y * self.y; },
        }
        let p = Point { x: 3.0, y: 4.0 };
        print(p.norm2());
        let origin = Point {};
        print(origin.x, origin.y);
    ";
    assert_eq!(output(src), "25.0\n0.0 0.0\n");
}

#[test]
fn define_object_requires_non_optional_fields() {
    let src = "define object Named { name: string, nick?: string }\nlet n = Named { nick: \"x\" };";
    let err = error(src);
    assert_eq!(err.kind(), ExcKind::TypeError);
    assert!(err.message().contains("name"), "{err}");
}

#[test]
fn optional_fields_default_to_null() {
    let src = r#"
        define object Named { name: string, nick?: string }
        let n = Named { name: "ada" };
        print(n.nick ?? "none");
    "#;
    assert_eq!(output(src), "none\n");
}

#[test]
fn define_enum_binds_variants() {
    let src = "define enum Color { Red, Green, Blue } print(Color.Green);";
    assert_eq!(output(src), "1\n");
}

#[test]
fn self_resolves_from_call_site() {
    let src = "let o = { v: 10, get: fn() { return self.v; } }; print(o.get());";
    assert_eq!(output(src), "10\n");
}

#[test]
fn optional_chaining_and_coalescing() {
    assert_eq!(output("let o = null; print(o?.field ?? 42);"), "42\n");
    assert_eq!(output("let o = { a: 1 }; print(o?.a ?? 42);"), "1\n");
    let err = error("let o = null; print(o.field);");
    assert_eq!(err.kind(), ExcKind::NullAccess);
}

#[test]
fn typeof_and_sizeof() {
    assert_eq!(output("print(typeof(1), typeof(1.0), typeof(true), typeof(null));"), "i64 f64 bool null\n");
    assert_eq!(output("print(sizeof(i16), sizeof(u64), sizeof(rune));"), "2 8 4\n");
    let err = error("print(sizeof(1));");
    assert_eq!(err.kind(), ExcKind::TypeError);
}

#[test]
fn index_out_of_bounds() {
    let err = error("let a = [1]; print(a[3]);");
    assert_eq!(err.kind(), ExcKind::IndexOutOfBounds);
}

#[test]
fn array_methods_push_pop() {
    let src = "let a = []; a.push(1); a.push(2); print(a.pop(), a.len());";
    assert_eq!(output(src), "2 1\n");
}

#[test]
fn typed_assignment_keeps_checking_later_writes() {
    let err = error("let x: u8 = 1; x = 300;");
    assert_eq!(err.kind(), ExcKind::RangeError);
}

#[test]
fn program_result_is_last_expression() {
    let (result, _) = run("let x = 40; x + 2;");
    assert_eq!(result.unwrap(), HostValue::Int(42));
}

#[test]
fn assert_throws_a_catchable_value() {
    let src = r#"try { assert(false, "must hold"); } catch (e) { print(e); }"#;
    assert_eq!(output(src), "assertion failed: must hold\n");
}

#[test]
fn bitwise_and_shifts() {
    assert_eq!(output("print(6 & 3, 6 | 3, 6 ^ 3, 1 << 4, 256 >> 4);"), "2 7 5 16 16\n");
    // The untyped shift count promotes the u8 operand up to i64.
    let src = "let x: u8 = 1; let y = x << 9; print(typeof(y), y);";
    assert_eq!(output(src), "i64 512\n");
}

#[test]
fn compound_assignment_operators() {
    assert_eq!(output("let x = 10; x -= 3; x *= 2; print(x);"), "14\n");
    assert_eq!(output("let a = [5]; a[0] += 1; print(a[0]);"), "6\n");
}

#[test]
fn object_literal_and_property_assignment() {
    let src = "let o = { a: 1 }; o.b = 2; o.a += 10; print(o.a, o.b, len(o));";
    assert_eq!(output(src), "11 2 2\n");
}
