//! minlang: a small dynamically-typed language with two interchangeable
//! bytecode back ends (a variable-width stack form and a fixed-width
//! register form) that must agree on every program's observable output.
//!
//! A thin façade that re-exports the pipeline stages (lex → parse → compile
//! → run) as free functions, leaving `main.rs` to own CLI concerns and
//! error rendering.

pub mod ast;
pub mod builtins;
pub mod bytecode_register;
pub mod bytecode_stack;
pub mod compiler_common;
pub mod compiler_register;
pub mod compiler_stack;
pub mod diagnostics;
pub mod errors;
pub mod interp_ops;
pub mod lexer;
pub mod parser;
pub mod profiler;
pub mod value;
pub mod vm_register;
pub mod vm_stack;

use std::sync::Arc;

use errors::MinlangError;
use profiler::Profiler;
use value::{FunctionObj, Value};

/// Lexes and parses `source` into a syntax tree, the shared front end for
/// both back ends.
pub fn parse_program(source: &str) -> Result<ast::Program, MinlangError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    let program = parser::parse(tokens)?;
    Ok(program)
}

pub fn compile_stack(source: &str) -> Result<compiler_stack::Bytecode, MinlangError> {
    let program = parse_program(source)?;
    Ok(compiler_stack::compile(&program)?)
}

pub fn compile_register(source: &str) -> Result<compiler_register::Bytecode, MinlangError> {
    let program = parse_program(source)?;
    Ok(compiler_register::compile(&program)?)
}

/// Compiles and runs `source` on the stack back end, returning once the
/// program halts (or a runtime error aborts it).
pub fn run_stack(source: &str) -> Result<(), MinlangError> {
    let bc = compile_stack(source)?;
    let mut vm = vm_stack::Vm::new();
    vm.run(&bc.main, &bc.constants)?;
    Ok(())
}

pub fn run_register(source: &str) -> Result<(), MinlangError> {
    let bc = compile_register(source)?;
    let mut vm = vm_register::Vm::new();
    vm.run(&bc.main, &bc.constants, &bc.field_names)?;
    Ok(())
}

/// Selected bytecode back end; mirrors the CLI's `--backend` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Stack,
    Register,
}

/// Compiles and runs `source` on the requested back end, optionally
/// recording a [`Profiler`] report and/or printing a disassembly first.
pub fn run(source: &str, backend: Backend, debug: bool, mut profiler: Option<&mut Profiler>) -> Result<(), MinlangError> {
    match backend {
        Backend::Stack => {
            let bc = compile_stack(source)?;
            if debug {
                print_stack_disassembly(&bc);
            }
            let mut vm = vm_stack::Vm::new();
            vm.run_profiled(&bc.main, &bc.constants, profiler.as_deref_mut())?;
        }
        Backend::Register => {
            let bc = compile_register(source)?;
            if debug {
                print_register_disassembly(&bc);
            }
            let mut vm = vm_register::Vm::new();
            vm.run_profiled(&bc.main, &bc.constants, &bc.field_names, profiler.as_deref_mut())?;
        }
    }
    Ok(())
}

fn print_stack_disassembly(bc: &compiler_stack::Bytecode) {
    println!("; constants: {} entries", bc.constants.len());
    for (i, v) in bc.constants.iter().enumerate() {
        println!(";   [{i}] {}", v.display());
    }
    println!("{}", disassemble_stack_function(&bc.main, &bc.constants));
}

fn disassemble_stack_function(f: &Arc<FunctionObj>, consts: &[Value]) -> String {
    match &f.code {
        value::Code::Stack(code) => bytecode_stack::disassemble_bytes(code, consts),
        value::Code::Register(_) => String::new(),
    }
}

fn print_register_disassembly(bc: &compiler_register::Bytecode) {
    println!("; constants: {} entries", bc.constants.len());
    for (i, v) in bc.constants.iter().enumerate() {
        println!(";   [{i}] {}", v.display());
    }
    if let value::Code::Register(proto) = &bc.main.code {
        println!("{}", proto.disassemble(&bc.constants));
        for child in &proto.child_protos {
            println!("{}", child.disassemble(&bc.constants));
        }
    }
}
