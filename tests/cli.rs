//! End-to-end CLI tests: spawn the compiled `minlang` binary against a
//! temporary source file and assert on stdout, stderr, and exit codes.
//!
//! Grounded on the convention of driving `env!("CARGO_BIN_EXE_<name>")` with
//! `std::process::Command` — the dependency-free way to test a CLI's actual
//! process boundary rather than its library internals, used here instead of
//! pulling in an assert_cmd-style helper crate.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

fn write_source(name: &str, src: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("minlang_test_{name}_{}.ml", std::process::id()));
    let mut f = std::fs::File::create(&path).expect("create temp source file");
    f.write_all(src.as_bytes()).expect("write temp source file");
    path
}

fn run_cli(path: &PathBuf, extra_args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_minlang"))
        .args(extra_args)
        .arg(path)
        .output()
        .expect("spawn minlang binary")
}

fn stdout_lines(path: &PathBuf, backend: &str) -> Vec<String> {
    let output = run_cli(path, &["--backend", backend]);
    assert!(output.status.success(), "backend={backend} stderr={}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).expect("utf8 stdout").lines().map(str::to_owned).collect()
}

#[test]
fn print_arithmetic_matches_expected_value_on_both_backends() {
    let path = write_source("arith", "print(1+2*3)");
    assert_eq!(stdout_lines(&path, "stack"), vec!["7"]);
    assert_eq!(stdout_lines(&path, "register"), vec!["7"]);
    let _ = std::fs::remove_file(path);
}

#[test]
fn recursive_factorial_matches_on_both_backends() {
    let src = r#"
        func fact(n:int):int{
            if n<=1{return 1}
            return n*fact(n-1)
        }
        print(fact(10))
    "#;
    let path = write_source("fact", src);
    let stack = stdout_lines(&path, "stack");
    let register = stdout_lines(&path, "register");
    assert_eq!(stack, vec!["3628800"]);
    assert_eq!(stack, register, "both back ends must agree byte-for-byte");
    let _ = std::fs::remove_file(path);
}

#[test]
fn copy_does_not_alias_the_original_array() {
    let src = r#"
        var a=[1,2,3]
        var b=copy(a)
        b[0]=99
        print(a[0])
        print(b[0])
    "#;
    let path = write_source("copy", src);
    let stack = stdout_lines(&path, "stack");
    let register = stdout_lines(&path, "register");
    assert_eq!(stack, vec!["1", "99"]);
    assert_eq!(stack, register);
    let _ = std::fs::remove_file(path);
}

#[test]
fn closure_over_a_parameter_matches_on_both_backends() {
    let src = r#"
        func make(x:int):func():int{
            return func():int{ return x }
        }
        var f=make(7)
        print(f())
    "#;
    let path = write_source("closure", src);
    let stack = stdout_lines(&path, "stack");
    let register = stdout_lines(&path, "register");
    assert_eq!(stack, vec!["7"]);
    assert_eq!(stack, register);
    let _ = std::fs::remove_file(path);
}

#[test]
fn map_length_and_missing_key_lookup_match_on_both_backends() {
    let src = r#"
        var m=map[string]int{"a":1,"b":2}
        m["c"]=3
        print(len(m))
        print(m["z"]==nil)
    "#;
    let path = write_source("map", src);
    let stack = stdout_lines(&path, "stack");
    let register = stdout_lines(&path, "register");
    assert_eq!(stack, vec!["3", "true"]);
    assert_eq!(stack, register);
    let _ = std::fs::remove_file(path);
}

#[test]
fn c_style_for_loop_prints_squares_on_both_backends() {
    let path = write_source("forloop", "for var i:int=0;i<3;i=i+1{ print(i*i) }");
    let stack = stdout_lines(&path, "stack");
    let register = stdout_lines(&path, "register");
    assert_eq!(stack, vec!["0", "1", "4"]);
    assert_eq!(stack, register);
    let _ = std::fs::remove_file(path);
}

#[test]
fn division_by_zero_exits_nonzero_with_a_phase_prefixed_runtime_error() {
    let path = write_source("divzero", "print(1/0)");
    let output = run_cli(&path, &[]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("runtime error"), "stderr was: {stderr}");
    let _ = std::fs::remove_file(path);
}

#[test]
fn unresolved_identifier_exits_nonzero_with_a_phase_prefixed_compile_error() {
    let path = write_source("unresolved", "print(nope)");
    let output = run_cli(&path, &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("compile error"), "stderr was: {stderr}");
    let _ = std::fs::remove_file(path);
}

#[test]
fn missing_source_file_is_reported_as_an_io_error() {
    let mut missing = std::env::temp_dir();
    missing.push(format!("minlang_does_not_exist_{}.ml", std::process::id()));
    let output = run_cli(&missing, &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("io error"), "stderr was: {stderr}");
}

#[test]
fn debug_flag_prints_a_disassembly_to_stdout_before_running() {
    let path = write_source("debugflag", "print(1+1)");
    let output = run_cli(&path, &["--debug"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("constants"), "expected a disassembly header, got: {stdout}");
    assert!(stdout.lines().last() == Some("2"), "program output should follow the disassembly");
    let _ = std::fs::remove_file(path);
}
