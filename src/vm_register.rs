//! Register virtual machine: executes the fixed-width `Proto` form produced
//! by [`crate::compiler_register`].
//!
//! Shares the same fetch-decode-dispatch loop shape as [`crate::vm_stack`],
//! but each frame owns a flat register window (`Vec<Value>` sized to the
//! callee's `reg_count`) instead of sharing one operand stack — a
//! register-machine call convention that windows registers per call rather
//! than pushing frames onto a shared value stack.

use std::sync::Arc;

use crate::builtins;
use crate::bytecode_register::{Op, Proto};
use crate::errors::RuntimeError;
use crate::interp_ops;
use crate::profiler::Profiler;
use crate::value::{ClosureObj, Code, FunctionObj, Value};

const DEFAULT_FRAME_CAP: usize = 1024;
const GLOBALS_CAP: usize = 65536;

struct Frame {
    closure: Arc<ClosureObj>,
    proto: Arc<Proto>,
    ip: usize,
    registers: Vec<Value>,
    /// Register in the *parent* frame (the one active when this frame's
    /// `Call` was executed) that the return value gets written into.
    result_reg: u8,
}

pub struct Vm {
    globals: Vec<Value>,
    frames: Vec<Frame>,
    last_value: Option<Value>,
}

type VResult<T> = Result<T, RuntimeError>;

impl Vm {
    pub fn new() -> Self {
        Vm { globals: vec![Value::Nil; GLOBALS_CAP], frames: Vec::with_capacity(DEFAULT_FRAME_CAP), last_value: None }
    }

    pub fn run(&mut self, main: &Arc<FunctionObj>, constants: &[Value], field_names: &[String]) -> VResult<()> {
        self.run_profiled(main, constants, field_names, None)
    }

    pub fn run_profiled(
        &mut self,
        main: &Arc<FunctionObj>,
        constants: &[Value],
        field_names: &[String],
        mut profiler: Option<&mut Profiler>,
    ) -> VResult<()> {
        let proto = main.code.as_register().expect("register VM given stack bytecode").clone();
        let registers = vec![Value::Nil; proto.reg_count as usize];
        let main_closure = Arc::new(ClosureObj { function: main.clone(), free: Vec::new() });
        self.frames.push(Frame { closure: main_closure, proto, ip: 0, registers, result_reg: 0 });

        loop {
            let frame_idx = self.frames.len() - 1;
            let ip = self.frames[frame_idx].ip;
            let proto = self.frames[frame_idx].proto.clone();
            if ip >= proto.code.len() {
                break;
            }
            let instr = proto.code[ip];
            let op = instr.op();
            if let Some(p) = profiler.as_deref_mut() {
                p.record(op_name(op));
            }
            self.frames[frame_idx].ip = ip + 1;

            match op {
                Op::LoadK => {
                    let v = constants[instr.bx() as usize].clone();
                    self.set_reg(instr.a(), v);
                }
                Op::LoadNil => self.set_reg(instr.a(), Value::Nil),
                Op::LoadBool => self.set_reg(instr.a(), Value::Bool(instr.b() != 0)),
                Op::Move => {
                    let v = self.reg(instr.b()).clone();
                    self.set_reg(instr.a(), v);
                }
                Op::LoadGlobal => {
                    let v = self.globals[instr.bx() as usize].clone();
                    self.set_reg(instr.a(), v);
                }
                Op::StoreGlobal => {
                    let g = instr.bx() as usize;
                    if g >= self.globals.len() {
                        return Err(RuntimeError::GlobalsOverflow { capacity: GLOBALS_CAP });
                    }
                    let v = self.reg(instr.a()).clone();
                    self.globals[g] = v;
                }
                Op::LoadUpval => {
                    let v = self.frames[frame_idx].closure.free[instr.b() as usize].clone();
                    self.set_reg(instr.a(), v);
                }
                Op::StoreUpval => {
                    unreachable!("StoreUpval is never emitted: closures capture by value and are immutable")
                }

                Op::Add | Op::AddInt | Op::AddFloat | Op::Concat => {
                    let v = interp_ops::add(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Sub | Op::SubInt | Op::SubFloat => {
                    let v = interp_ops::sub(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Mul | Op::MulInt | Op::MulFloat => {
                    let v = interp_ops::mul(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Div | Op::DivInt | Op::DivFloat => {
                    let v = interp_ops::div(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Mod | Op::ModInt => {
                    let v = interp_ops::rem(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Neg => {
                    let v = interp_ops::neg(self.reg(instr.b()))?;
                    self.set_reg(instr.a(), v);
                }

                Op::AddConstInt => {
                    let v = const_int_fold(self.reg(instr.a()), instr.bx() as i16, |x, k| x.wrapping_add(k))?;
                    self.set_reg(instr.a(), v);
                }
                Op::SubConstInt => {
                    let v = const_int_fold(self.reg(instr.a()), instr.bx() as i16, |x, k| x.wrapping_sub(k))?;
                    self.set_reg(instr.a(), v);
                }
                Op::MulConstInt => {
                    let v = const_int_fold(self.reg(instr.a()), instr.bx() as i16, |x, k| x.wrapping_mul(k))?;
                    self.set_reg(instr.a(), v);
                }
                Op::SquareInt => {
                    let v = interp_ops::mul(self.reg(instr.a()), self.reg(instr.a()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::SquareFloat => {
                    let v = interp_ops::mul(self.reg(instr.a()), self.reg(instr.a()))?;
                    self.set_reg(instr.a(), v);
                }

                Op::Eq => {
                    let v = interp_ops::eq(self.reg(instr.b()), self.reg(instr.c()));
                    self.set_reg(instr.a(), v);
                }
                Op::Ne => {
                    let v = interp_ops::ne(self.reg(instr.b()), self.reg(instr.c()));
                    self.set_reg(instr.a(), v);
                }
                Op::Lt | Op::LtInt | Op::LtFloat => {
                    let v = interp_ops::lt(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Le | Op::LeInt | Op::LeFloat => {
                    let v = interp_ops::le(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Gt | Op::GtInt | Op::GtFloat => {
                    let v = interp_ops::gt(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Ge | Op::GeInt | Op::GeFloat => {
                    let v = interp_ops::ge(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::Not => {
                    let v = Value::Bool(!self.reg(instr.b()).is_truthy());
                    self.set_reg(instr.a(), v);
                }

                Op::Jump => {
                    self.frames[frame_idx].ip = (ip as i64 + instr.sbx() as i64) as usize;
                }
                Op::JumpF => {
                    if !self.reg(instr.a()).is_truthy() {
                        self.frames[frame_idx].ip = (ip as i64 + instr.sbx() as i64) as usize;
                    }
                }
                Op::JumpT => {
                    if self.reg(instr.a()).is_truthy() {
                        self.frames[frame_idx].ip = (ip as i64 + instr.sbx() as i64) as usize;
                    }
                }

                Op::Call => {
                    let base = instr.a();
                    let n = instr.b() as usize;
                    self.do_call(base, n)?;
                }
                Op::Return => {
                    let v = self.reg(instr.a()).clone();
                    self.do_return(v)?;
                }
                Op::ReturnNil => {
                    self.do_return(Value::Nil)?;
                }
                Op::Closure => {
                    self.make_closure(instr.a(), instr.bx());
                }

                Op::NewArray => {
                    let base = instr.a();
                    let n = instr.bx() as usize;
                    let items: Vec<Value> = (1..=n).map(|i| self.reg(base + i as u8).clone()).collect();
                    self.set_reg(base, Value::array(items));
                }
                Op::GetIdx => {
                    let v = interp_ops::index_get(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::SetIdx => {
                    interp_ops::index_set(self.reg(instr.a()), self.reg(instr.b()), self.reg(instr.c()).clone())?;
                }
                Op::ArrayLen => {
                    let v = match self.reg(instr.b()) {
                        Value::Array(a) => Value::Int(a.lock().len() as i64),
                        Value::Str(s) => Value::Int(s.chars().count() as i64),
                        other => {
                            return Err(RuntimeError::TypeMismatch {
                                message: format!("cannot take length of {}", other.type_name()),
                            })
                        }
                    };
                    self.set_reg(instr.a(), v);
                }

                Op::NewMap => {
                    let base = instr.a();
                    let n = instr.bx() as usize;
                    let mut map = std::collections::HashMap::with_capacity(n);
                    for i in 0..n {
                        let k = self.reg(base + 1 + (2 * i) as u8).clone();
                        let v = self.reg(base + 1 + (2 * i + 1) as u8).clone();
                        map.insert(interp_ops::value_to_map_key(&k), v);
                    }
                    self.set_reg(base, Value::map(map));
                }
                Op::MapGet => {
                    let v = interp_ops::index_get(self.reg(instr.b()), self.reg(instr.c()))?;
                    self.set_reg(instr.a(), v);
                }
                Op::MapSet => {
                    interp_ops::index_set(self.reg(instr.a()), self.reg(instr.b()), self.reg(instr.c()).clone())?;
                }

                Op::NewStruct => {
                    let base = instr.a();
                    let meta = match &constants[instr.bx() as usize] {
                        Value::Array(a) => a.lock().clone(),
                        other => panic!("NewStruct metadata constant is not an array: {other:?}"),
                    };
                    let type_name = meta[0].display();
                    let struct_fields: Vec<String> = meta[1..].iter().map(Value::display).collect();
                    let field_values: Vec<Value> =
                        (1..=struct_fields.len()).map(|i| self.reg(base + i as u8).clone()).collect();
                    self.set_reg(base, interp_ops::new_struct(type_name, struct_fields, field_values));
                }
                Op::GetField => {
                    let name = &field_names[instr.c() as usize];
                    let v = interp_ops::get_field(self.reg(instr.b()), name)?;
                    self.set_reg(instr.a(), v);
                }
                Op::SetField => {
                    let name = &field_names[instr.c() as usize];
                    interp_ops::set_field(self.reg(instr.a()), name, self.reg(instr.b()).clone())?;
                }

                Op::GetBuiltin => {
                    self.set_reg(instr.a(), Value::Builtin(instr.bx() as usize));
                }
                Op::Print => {
                    let base = instr.a();
                    let n = instr.b() as usize;
                    let args: Vec<Value> = (0..n).map(|i| self.reg(base + i as u8).clone()).collect();
                    print!("{}", builtins::print_values(&args));
                }
                Op::LastValue => {
                    self.last_value = Some(self.reg(instr.a()).clone());
                }
                Op::Halt => {
                    self.frames[frame_idx].ip = proto.code.len();
                }
            }
        }

        if let Some(p) = profiler {
            p.finish();
        }

        if let Some(v) = self.last_value.take() {
            println!("{}", v.display());
        }
        Ok(())
    }

    fn reg(&self, idx: u8) -> &Value {
        &self.frames.last().expect("no active frame").registers[idx as usize]
    }

    fn set_reg(&mut self, idx: u8, v: Value) {
        self.frames.last_mut().expect("no active frame").registers[idx as usize] = v;
    }

    fn do_call(&mut self, base: u8, n: usize) -> VResult<()> {
        let callee = self.reg(base).clone();
        let args: Vec<Value> = (1..=n).map(|i| self.reg(base + i as u8).clone()).collect();
        match callee {
            Value::Closure(c) => {
                if n != c.function.num_params {
                    return Err(RuntimeError::ArityMismatch { expected: c.function.num_params, found: n });
                }
                if self.frames.len() >= DEFAULT_FRAME_CAP {
                    return Err(RuntimeError::FrameOverflow { max_frames: DEFAULT_FRAME_CAP });
                }
                let proto = c.function.code.as_register().expect("register VM given stack closure").clone();
                let mut registers = vec![Value::Nil; proto.reg_count as usize];
                registers[..n].clone_from_slice(&args);
                self.frames.push(Frame { closure: c, proto, ip: 0, registers, result_reg: base });
                Ok(())
            }
            Value::Builtin(idx) => {
                let result = builtins::call(idx, &args);
                self.set_reg(base, result);
                Ok(())
            }
            other => Err(RuntimeError::NotCallable { type_name: other.type_name().to_string() }),
        }
    }

    fn do_return(&mut self, value: Value) -> VResult<()> {
        if self.frames.len() == 1 {
            // Stray top-level return: treat as program termination.
            let frame = self.frames.last_mut().unwrap();
            frame.ip = frame.proto.code.len();
            self.last_value = Some(value);
            return Ok(());
        }
        let done = self.frames.pop().unwrap();
        self.set_reg(done.result_reg, value);
        Ok(())
    }

    fn make_closure(&mut self, dst: u8, child_idx: u16) {
        let frame_idx = self.frames.len() - 1;
        let parent_proto = self.frames[frame_idx].proto.clone();
        let child = parent_proto.child_protos[child_idx as usize].clone();
        let free: Vec<Value> = child
            .upvals
            .iter()
            .map(|u| {
                if u.in_stack {
                    self.frames[frame_idx].registers[u.index as usize].clone()
                } else {
                    self.frames[frame_idx].closure.free[u.index as usize].clone()
                }
            })
            .collect();
        let function = FunctionObj {
            name: child.name.clone(),
            num_params: child.param_count as usize,
            num_locals: child.reg_count as usize,
            code: Code::Register(child),
        };
        self.set_reg(dst, Value::Closure(Arc::new(ClosureObj { function: Arc::new(function), free })));
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

fn const_int_fold(v: &Value, k: i16, f: impl Fn(i64, i64) -> i64) -> VResult<Value> {
    match v {
        Value::Int(x) => Ok(Value::Int(f(*x, k as i64))),
        other => Err(RuntimeError::TypeMismatch {
            message: format!("cannot apply integer constant-fold to {}", other.type_name()),
        }),
    }
}

fn op_name(op: Op) -> &'static str {
    match op {
        Op::LoadK => "LoadK",
        Op::LoadNil => "LoadNil",
        Op::LoadBool => "LoadBool",
        Op::Move => "Move",
        Op::LoadGlobal => "LoadGlobal",
        Op::StoreGlobal => "StoreGlobal",
        Op::LoadUpval => "LoadUpval",
        Op::StoreUpval => "StoreUpval",
        Op::Add => "Add",
        Op::Sub => "Sub",
        Op::Mul => "Mul",
        Op::Div => "Div",
        Op::Mod => "Mod",
        Op::Neg => "Neg",
        Op::AddInt => "AddInt",
        Op::SubInt => "SubInt",
        Op::MulInt => "MulInt",
        Op::DivInt => "DivInt",
        Op::ModInt => "ModInt",
        Op::AddFloat => "AddFloat",
        Op::SubFloat => "SubFloat",
        Op::MulFloat => "MulFloat",
        Op::DivFloat => "DivFloat",
        Op::AddConstInt => "AddConstInt",
        Op::SubConstInt => "SubConstInt",
        Op::MulConstInt => "MulConstInt",
        Op::SquareInt => "SquareInt",
        Op::SquareFloat => "SquareFloat",
        Op::Concat => "Concat",
        Op::Eq => "Eq",
        Op::Ne => "Ne",
        Op::Lt => "Lt",
        Op::Le => "Le",
        Op::Gt => "Gt",
        Op::Ge => "Ge",
        Op::LtInt => "LtInt",
        Op::LeInt => "LeInt",
        Op::GtInt => "GtInt",
        Op::GeInt => "GeInt",
        Op::LtFloat => "LtFloat",
        Op::LeFloat => "LeFloat",
        Op::GtFloat => "GtFloat",
        Op::GeFloat => "GeFloat",
        Op::Not => "Not",
        Op::Jump => "Jump",
        Op::JumpT => "JumpT",
        Op::JumpF => "JumpF",
        Op::Call => "Call",
        Op::Return => "Return",
        Op::ReturnNil => "ReturnNil",
        Op::Closure => "Closure",
        Op::NewArray => "NewArray",
        Op::GetIdx => "GetIdx",
        Op::SetIdx => "SetIdx",
        Op::ArrayLen => "ArrayLen",
        Op::NewMap => "NewMap",
        Op::MapGet => "MapGet",
        Op::MapSet => "MapSet",
        Op::NewStruct => "NewStruct",
        Op::GetField => "GetField",
        Op::SetField => "SetField",
        Op::GetBuiltin => "GetBuiltin",
        Op::Print => "Print",
        Op::LastValue => "LastValue",
        Op::Halt => "Halt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler_register::compile;
    use crate::lexer::Lexer;
    use crate::parser::parse;

    fn compile_src(src: &str) -> crate::compiler_register::Bytecode {
        let toks = Lexer::new(src).tokenize().unwrap();
        let program = parse(toks).unwrap();
        compile(&program).unwrap()
    }

    #[test]
    fn runs_arithmetic_and_prints_result() {
        let bc = compile_src("print(1+2*3);");
        let mut vm = Vm::new();
        vm.run(&bc.main, &bc.constants, &bc.field_names).unwrap();
    }

    #[test]
    fn last_value_is_not_printed_twice_after_a_print_statement() {
        let bc = compile_src("print(42);");
        let mut vm = Vm::new();
        vm.run(&bc.main, &bc.constants, &bc.field_names).unwrap();
        assert!(vm.last_value.is_none());
    }

    #[test]
    fn bare_expression_statement_sets_last_value() {
        let bc = compile_src("7;");
        let mut vm = Vm::new();
        vm.run(&bc.main, &bc.constants, &bc.field_names).unwrap();
    }

    #[test]
    fn closures_capture_by_value_at_creation_time() {
        let bc = compile_src(
            "func make(x:int):func():int{ return func():int{ return x } } var f=make(7); print(f());",
        );
        let mut vm = Vm::new();
        vm.run(&bc.main, &bc.constants, &bc.field_names).unwrap();
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let bc = compile_src("var x = 1/0;");
        let mut vm = Vm::new();
        assert!(matches!(vm.run(&bc.main, &bc.constants, &bc.field_names), Err(RuntimeError::DivisionByZero)));
    }

    #[test]
    fn struct_literal_round_trips_through_get_field() {
        let bc = compile_src(
            "struct Point{x,y} var p = Point{x:1,y:2}; print(p.x + p.y);",
        );
        let mut vm = Vm::new();
        vm.run(&bc.main, &bc.constants, &bc.field_names).unwrap();
    }

    #[test]
    fn recursive_function_computes_factorial() {
        let bc = compile_src(
            "func fact(n:int):int{ if n<=1{return 1} return n*fact(n-1) } print(fact(5));",
        );
        let mut vm = Vm::new();
        vm.run(&bc.main, &bc.constants, &bc.field_names).unwrap();
    }
}
