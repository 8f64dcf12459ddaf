//! In-process integration tests over the public compile/run API, exercising
//! the end-to-end scenarios and error boundaries the core is answerable for.
//!
//! Parse-and-run a literal source snippet, then assert on the outcome.
//! minlang's VMs keep their globals private, so these assert on `Result`
//! success/failure and on the specific error variant instead of a
//! peeked-at global slot.

use minlang::errors::{MinlangError, RuntimeError};
use minlang::{run_register, run_stack};

fn runs_on_both_backends(src: &str) {
    run_stack(src).expect("stack backend should run this program");
    run_register(src).expect("register backend should run this program");
}

fn runtime_err(src: &str) -> RuntimeError {
    match run_register(src) {
        Err(MinlangError::Runtime(e)) => e,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

// ─── end-to-end scenarios (spec-level literal inputs) ─────────────────────

#[test]
fn arithmetic_precedence() {
    runs_on_both_backends("print(1+2*3)");
}

#[test]
fn recursive_factorial() {
    runs_on_both_backends(
        r#"
        func fact(n:int):int{
            if n<=1{return 1}
            return n*fact(n-1)
        }
        print(fact(10))
        "#,
    );
}

#[test]
fn copy_is_not_aliased() {
    runs_on_both_backends(
        r#"
        var a=[1,2,3]
        var b=copy(a)
        b[0]=99
        print(a[0])
        print(b[0])
        "#,
    );
}

#[test]
fn closures_capture_enclosing_parameter() {
    runs_on_both_backends(
        r#"
        func make(x:int):func():int{
            return func():int{ return x }
        }
        var f=make(7)
        print(f())
        "#,
    );
}

#[test]
fn map_literal_and_missing_key_lookup() {
    runs_on_both_backends(
        r#"
        var m=map[string]int{"a":1,"b":2}
        m["c"]=3
        print(len(m))
        print(m["z"]==nil)
        "#,
    );
}

#[test]
fn c_style_for_loop() {
    runs_on_both_backends("for var i:int=0;i<3;i=i+1{ print(i*i) }");
}

// ─── closures captured by value ────────────────────────────────────────────

#[test]
fn closures_do_not_observe_later_mutation_of_the_captured_local() {
    runs_on_both_backends(
        r#"
        func make_counter():func():int{
            var n=0
            var snap=func():int{ return n }
            n=99
            return snap
        }
        var f=make_counter()
        print(f())
        "#,
    );
}

#[test]
fn multiple_closures_from_the_same_factory_stay_independent() {
    runs_on_both_backends(
        r#"
        func make_adder(x:int):func(int):int{
            return func(y:int):int{ return x+y }
        }
        var add5=make_adder(5)
        var add10=make_adder(10)
        print(add5(3))
        print(add10(3))
        "#,
    );
}

// ─── structs ────────────────────────────────────────────────────────────────

#[test]
fn struct_literal_field_access_and_mutation() {
    runs_on_both_backends(
        r#"
        struct Point{x,y}
        var p=Point{x:1,y:2}
        p.x=p.x+p.y
        print(p.x)
        "#,
    );
}

// ─── short-circuit logical operators ───────────────────────────────────────

#[test]
fn and_or_short_circuit_and_yield_the_last_evaluated_operand() {
    runs_on_both_backends(
        r#"
        func boom():bool{ print("should not run") return true }
        print(false && boom())
        print(true || boom())
        "#,
    );
}

// ─── error boundaries ───────────────────────────────────────────────────────

#[test]
fn integer_division_by_zero_is_a_runtime_error() {
    assert!(matches!(runtime_err("print(1/0)"), RuntimeError::DivisionByZero));
}

#[test]
fn integer_modulo_by_zero_is_a_runtime_error() {
    assert!(matches!(runtime_err("print(1%0)"), RuntimeError::ModuloByZero));
}

#[test]
fn float_division_by_zero_does_not_error() {
    runs_on_both_backends("print(1.0/0.0)");
}

#[test]
fn array_index_out_of_bounds_is_a_runtime_error() {
    assert!(matches!(
        runtime_err("var a=[1,2,3]\nprint(a[3])"),
        RuntimeError::IndexOutOfBounds { index: 3, length: 3 }
    ));
}

#[test]
fn array_index_negative_one_is_a_runtime_error() {
    assert!(matches!(runtime_err("var a=[1,2,3]\nprint(a[-1])"), RuntimeError::IndexOutOfBounds { .. }));
}

#[test]
fn calling_a_non_callable_value_is_a_runtime_error() {
    assert!(matches!(
        runtime_err("var f=1\nprint(f())"),
        RuntimeError::NotCallable { .. }
    ));
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let src = r#"
        func loop():int{ return loop() }
        print(loop())
    "#;
    assert!(matches!(runtime_err(src), RuntimeError::FrameOverflow { .. }));
}

#[test]
fn unresolved_identifier_is_a_compile_error() {
    let err = run_register("print(unbound_name)").unwrap_err();
    assert!(matches!(err, MinlangError::Compile(_)));
}

#[test]
fn break_outside_a_loop_is_a_compile_error() {
    let err = run_register("break").unwrap_err();
    assert!(matches!(err, MinlangError::Compile(_)));
}

// ─── round-trip properties (spec.md §8) ────────────────────────────────────

#[test]
fn int_string_round_trip() {
    runs_on_both_backends(
        r#"
        var n=12345
        var s=string(n)
        print(int(s)==n)
        "#,
    );
}

#[test]
fn enum_name_and_value_round_trip() {
    runs_on_both_backends(
        r#"
        enum Color{ Red, Green, Blue }
        var c=Color.Green
        print(enumName(Color,c))
        "#,
    );
}
