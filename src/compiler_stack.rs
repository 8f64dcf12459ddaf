//! Stack compiler back end: lowers a syntax tree to the variable-width byte
//! stream form.
//!
//! A `Compiler` struct threads a mutable symbol/constant allocator through
//! statement/expression lowering, targeting [`crate::bytecode_stack`]'s
//! variable-width byte stream rather than a fixed-width word form.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Expr, FuncDecl, InfixOp, Item, PrefixOp, Program, Stmt};
use crate::bytecode_stack::{Chunk, Op};
use crate::compiler_common::{infer, CapturedVar, ConstPool, InferredType, ParentRef, Resolution, SymbolTable};
use crate::errors::{CompileError, Span};
use crate::value::{Code, FunctionObj, Value};

struct LoopCtx {
    break_patches: Vec<usize>,
    continue_target_patches: Vec<usize>,
}

struct FuncCtx {
    chunk: Chunk,
    local_count: u8,
    hints: HashMap<String, InferredType>,
    loops: Vec<LoopCtx>,
}

impl FuncCtx {
    fn new() -> Self {
        FuncCtx { chunk: Chunk::new(), local_count: 0, hints: HashMap::new(), loops: Vec::new() }
    }

    fn alloc_local(&mut self) -> Result<u8, CompileError> {
        if self.local_count == u8::MAX {
            return Err(CompileError::TooManyRegisters { span: Span::default() });
        }
        let idx = self.local_count;
        self.local_count += 1;
        Ok(idx)
    }
}

pub struct Bytecode {
    pub constants: Vec<Value>,
    pub main: Arc<FunctionObj>,
}

pub struct Compiler {
    consts: ConstPool,
    symtab: SymbolTable,
    structs: HashMap<String, Vec<String>>,
    depth: u32,
    ctx_stack: Vec<FuncCtx>,
}

type CResult<T> = Result<T, CompileError>;

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            consts: ConstPool::new(),
            symtab: SymbolTable::new(),
            structs: HashMap::new(),
            depth: 0,
            ctx_stack: Vec::new(),
        }
    }

    fn cur(&self) -> &FuncCtx {
        self.ctx_stack.last().expect("no active function context")
    }

    fn cur_mut(&mut self) -> &mut FuncCtx {
        self.ctx_stack.last_mut().expect("no active function context")
    }

    fn emit_op(&mut self, op: Op, line: u32) -> usize {
        self.cur_mut().chunk.emit_op(op, line)
    }

    fn emit_u16(&mut self, op: Op, v: u16, line: u32) -> usize {
        self.cur_mut().chunk.emit_u16(op, v, line)
    }

    pub fn compile_program(mut self, program: &Program) -> CResult<Bytecode> {
        for item in &program.items {
            match item {
                Item::FuncDecl(f) => {
                    self.symtab.declare_global(&f.name);
                }
                Item::StructDecl(s) => {
                    self.structs.insert(s.name.clone(), s.fields.clone());
                }
                Item::EnumDecl(_) => {}
                Item::Stmt(_) => {}
            }
        }

        self.ctx_stack.push(FuncCtx::new());
        for item in &program.items {
            self.compile_item(item)?;
        }
        self.emit_op(Op::Halt, 0);
        let ctx = self.ctx_stack.pop().expect("main context");

        let main = FunctionObj {
            name: "main".to_string(),
            num_params: 0,
            num_locals: ctx.local_count as usize,
            code: Code::Stack(Arc::new(ctx.chunk.code)),
        };

        Ok(Bytecode { constants: self.consts.values, main: Arc::new(main) })
    }

    fn compile_item(&mut self, item: &Item) -> CResult<()> {
        match item {
            Item::FuncDecl(f) => self.compile_func_decl(f),
            Item::StructDecl(_) | Item::EnumDecl(_) => Ok(()),
            Item::Stmt(s) => self.compile_stmt(s),
        }
    }

    fn compile_func_decl(&mut self, f: &FuncDecl) -> CResult<()> {
        let (k, captures) = self.compile_function_value(&f.name, &f.params, &f.body)?;
        self.emit_capture_loads(&captures, f.span.line);
        self.cur_mut().chunk.emit_u16_u16(Op::MakeClosure, k, captures.len() as u16, f.span.line);
        let g = self.symtab.declare_global(&f.name);
        self.emit_u16(Op::StoreGlobal, g, f.span.line);
        Ok(())
    }

    /// Compiles a function body into its own chunk and appends the resulting
    /// function object to the constant pool. Returns the constant index and
    /// the free variables it needs captured from the *current* context.
    fn compile_function_value(
        &mut self,
        name: &str,
        params: &[String],
        body: &[Stmt],
    ) -> CResult<(u16, Vec<CapturedVar>)> {
        self.symtab.push_function();
        self.depth += 1;
        self.ctx_stack.push(FuncCtx::new());
        for p in params {
            let idx = self.cur_mut().alloc_local()?;
            if !self.symtab.declare_local(p, idx) {
                return Err(CompileError::DuplicateDeclaration { name: p.clone(), span: Span::default() });
            }
        }
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        // Implicit `return nil` if control falls off the end; harmless dead
        // code when every path already returned explicitly.
        self.emit_implicit_return();

        let ctx = self.ctx_stack.pop().expect("function context");
        self.depth -= 1;
        let captures = self.symtab.pop_function();

        let func = FunctionObj {
            name: name.to_string(),
            num_params: params.len(),
            num_locals: ctx.local_count as usize,
            code: Code::Stack(Arc::new(ctx.chunk.code)),
        };
        let k = self.consts.function(Value::Function(Arc::new(func)));
        Ok((k, captures))
    }

    fn emit_implicit_return(&mut self) {
        let nil_k = self.push_nil_const();
        self.emit_u16(Op::Push, nil_k, 0);
        self.emit_op(Op::Return, 0);
    }

    fn push_nil_const(&mut self) -> u16 {
        // Nil has no dedicated scalar constant kind; represent it with a
        // sentinel empty value recognised by the stack VM's `Push` handler.
        self.consts.nil()
    }

    fn emit_capture_loads(&mut self, captures: &[CapturedVar], line: u32) {
        for cap in captures {
            match cap.from {
                ParentRef::Local(idx) => {
                    self.emit_u16(Op::LoadLocal, idx as u16, line);
                }
                ParentRef::Free(idx) => {
                    self.emit_u16(Op::LoadFree, idx as u16, line);
                }
            }
        }
    }

    // ---- statements -----------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::VarDecl { name, value, span } | Stmt::ConstDecl { name, value, span } => {
                self.compile_expr(value)?;
                let t = infer(value, &self.cur().hints);
                self.cur_mut().hints.insert(name.clone(), t);
                self.declare_and_store(name, *span)
            }
            Stmt::Block(stmts) => {
                self.symtab.push_scope();
                for s in stmts {
                    self.compile_stmt(s)?;
                }
                self.symtab.pop_scope();
                Ok(())
            }
            Stmt::If { cond, then_branch, else_branch, span } => {
                self.compile_expr(cond)?;
                let else_jump = self.cur_mut().chunk.emit_jump(Op::JumpIfFalse, span.line);
                self.symtab.push_scope();
                for s in then_branch {
                    self.compile_stmt(s)?;
                }
                self.symtab.pop_scope();
                if let Some(else_stmts) = else_branch {
                    let end_jump = self.cur_mut().chunk.emit_jump(Op::Jump, span.line);
                    let here = self.cur().chunk.here();
                    self.cur_mut().chunk.patch_jump(else_jump, here);
                    self.symtab.push_scope();
                    for s in else_stmts {
                        self.compile_stmt(s)?;
                    }
                    self.symtab.pop_scope();
                    let here = self.cur().chunk.here();
                    self.cur_mut().chunk.patch_jump(end_jump, here);
                } else {
                    let here = self.cur().chunk.here();
                    self.cur_mut().chunk.patch_jump(else_jump, here);
                }
                Ok(())
            }
            Stmt::While { cond, body, span } => {
                let loop_start = self.cur().chunk.here();
                self.cur_mut().loops.push(LoopCtx { break_patches: Vec::new(), continue_target_patches: Vec::new() });
                self.compile_expr(cond)?;
                let exit_jump = self.cur_mut().chunk.emit_jump(Op::JumpIfFalse, span.line);
                self.symtab.push_scope();
                for s in body {
                    self.compile_stmt(s)?;
                }
                self.symtab.pop_scope();
                self.cur_mut().chunk.emit_u16(Op::Jump, loop_start as u16, span.line);
                let here = self.cur().chunk.here();
                self.cur_mut().chunk.patch_jump(exit_jump, here);
                let loop_ctx = self.cur_mut().loops.pop().unwrap();
                for p in loop_ctx.break_patches {
                    self.cur_mut().chunk.patch_jump(p, here);
                }
                for p in loop_ctx.continue_target_patches {
                    self.cur_mut().chunk.patch_jump(p, loop_start);
                }
                Ok(())
            }
            Stmt::For { init, cond, step, body, span } => {
                self.symtab.push_scope();
                if let Some(init) = init {
                    self.compile_stmt(init)?;
                }
                let loop_start = self.cur().chunk.here();
                self.cur_mut().loops.push(LoopCtx { break_patches: Vec::new(), continue_target_patches: Vec::new() });
                let exit_jump = if let Some(cond) = cond {
                    self.compile_expr(cond)?;
                    Some(self.cur_mut().chunk.emit_jump(Op::JumpIfFalse, span.line))
                } else {
                    None
                };
                for s in body {
                    self.compile_stmt(s)?;
                }
                let step_start = self.cur().chunk.here();
                if let Some(step) = step {
                    self.compile_stmt(step)?;
                }
                self.cur_mut().chunk.emit_u16(Op::Jump, loop_start as u16, span.line);
                let here = self.cur().chunk.here();
                if let Some(exit_jump) = exit_jump {
                    self.cur_mut().chunk.patch_jump(exit_jump, here);
                }
                let loop_ctx = self.cur_mut().loops.pop().unwrap();
                for p in loop_ctx.break_patches {
                    self.cur_mut().chunk.patch_jump(p, here);
                }
                for p in loop_ctx.continue_target_patches {
                    self.cur_mut().chunk.patch_jump(p, step_start);
                }
                self.symtab.pop_scope();
                Ok(())
            }
            Stmt::Break(span) => {
                if self.cur().loops.is_empty() {
                    return Err(CompileError::BreakOutsideLoop { span: *span });
                }
                let p = self.cur_mut().chunk.emit_jump(Op::Jump, span.line);
                self.cur_mut().loops.last_mut().unwrap().break_patches.push(p);
                Ok(())
            }
            Stmt::Continue(span) => {
                if self.cur().loops.is_empty() {
                    return Err(CompileError::ContinueOutsideLoop { span: *span });
                }
                let p = self.cur_mut().chunk.emit_jump(Op::Jump, span.line);
                self.cur_mut().loops.last_mut().unwrap().continue_target_patches.push(p);
                Ok(())
            }
            Stmt::Return { value, span } => {
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        let k = self.push_nil_const();
                        self.emit_u16(Op::Push, k, span.line);
                    }
                }
                self.emit_op(Op::Return, span.line);
                Ok(())
            }
            Stmt::Print { args, span } => {
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit_u16(Op::Print, args.len() as u16, span.line);
                Ok(())
            }
            Stmt::Assignment { target, value, span } => self.compile_assignment(target, value, *span),
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.emit_op(Op::Pop, e.span().line);
                Ok(())
            }
        }
    }

    fn declare_and_store(&mut self, name: &str, span: Span) -> CResult<()> {
        if self.depth == 0 {
            let g = self.symtab.declare_global(name);
            self.emit_u16(Op::StoreGlobal, g, span.line);
        } else {
            let idx = self.cur_mut().alloc_local()?;
            if !self.symtab.declare_local(name, idx) {
                return Err(CompileError::DuplicateDeclaration { name: name.to_string(), span });
            }
            self.emit_u16(Op::StoreLocal, idx as u16, span.line);
        }
        Ok(())
    }

    fn compile_assignment(&mut self, target: &Expr, value: &Expr, span: Span) -> CResult<()> {
        match target {
            Expr::Identifier { name, .. } => {
                self.compile_expr(value)?;
                let t = infer(value, &self.cur().hints);
                self.cur_mut().hints.insert(name.clone(), t);
                match self.symtab.resolve(name) {
                    Resolution::Global(g) => self.emit_u16(Op::StoreGlobal, g, span.line),
                    Resolution::Local(i) => self.emit_u16(Op::StoreLocal, i as u16, span.line),
                    Resolution::Free(_) => {
                        return Err(CompileError::UnresolvedIdentifier { name: name.clone(), span })
                    }
                };
                Ok(())
            }
            Expr::Index { collection, key, .. } => {
                self.compile_expr(collection)?;
                self.compile_expr(key)?;
                self.compile_expr(value)?;
                let op = if self.index_op(collection) == Op::MapGet { Op::MapSet } else { Op::ArraySet };
                self.emit_op(op, span.line);
                Ok(())
            }
            Expr::Field { record, name, .. } => {
                self.compile_expr(record)?;
                let k = self.consts.string(name);
                self.emit_u16(Op::Push, k, span.line);
                self.compile_expr(value)?;
                self.emit_op(Op::SetField, span.line);
                Ok(())
            }
            _ => Err(CompileError::UnresolvedIdentifier {
                name: "<assignment target>".to_string(),
                span,
            }),
        }
    }

    // ---- expressions ------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> CResult<()> {
        match expr {
            Expr::IntLiteral { value, span } => {
                let k = self.consts.int(*value);
                self.emit_u16(Op::Push, k, span.line);
                Ok(())
            }
            Expr::FloatLiteral { value, span } => {
                let k = self.consts.float(*value);
                self.emit_u16(Op::Push, k, span.line);
                Ok(())
            }
            Expr::BoolLiteral { value, span } => {
                let k = self.consts.boolean(*value);
                self.emit_u16(Op::Push, k, span.line);
                Ok(())
            }
            Expr::StringLiteral { value, span } => {
                let k = self.consts.string(value);
                self.emit_u16(Op::Push, k, span.line);
                Ok(())
            }
            Expr::NilLiteral { span } => {
                let k = self.push_nil_const();
                self.emit_u16(Op::Push, k, span.line);
                Ok(())
            }
            Expr::Identifier { name, span } => self.compile_identifier(name, *span),
            Expr::Prefix { op, expr, span } => self.compile_prefix(*op, expr, *span),
            Expr::Infix { op, left, right, span } => self.compile_infix(*op, left, right, *span),
            Expr::Call { callee, args, span } => self.compile_call(callee, args, *span),
            Expr::Index { collection, key, span } => {
                self.compile_expr(collection)?;
                self.compile_expr(key)?;
                self.emit_op(self.index_op(collection), span.line);
                Ok(())
            }
            Expr::Field { record, name, span } => {
                self.compile_expr(record)?;
                let k = self.consts.string(name);
                self.emit_u16(Op::Push, k, span.line);
                self.emit_op(Op::GetField, span.line);
                Ok(())
            }
            Expr::ArrayLit { elements, span } => {
                for e in elements {
                    self.compile_expr(e)?;
                }
                self.emit_u16(Op::Array, elements.len() as u16, span.line);
                Ok(())
            }
            Expr::MapLit { pairs, span } => {
                for (k, v) in pairs {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                self.emit_u16(Op::Map, pairs.len() as u16, span.line);
                Ok(())
            }
            Expr::StructLit { type_name, fields, span } => {
                let field_order = self
                    .structs
                    .get(type_name)
                    .cloned()
                    .unwrap_or_else(|| fields.iter().map(|(n, _)| n.clone()).collect());
                let tk = self.consts.string(type_name);
                self.emit_u16(Op::Push, tk, span.line);
                for fname in &field_order {
                    let value_expr = fields.iter().find(|(n, _)| n == fname).map(|(_, v)| v);
                    let nk = self.consts.string(fname);
                    self.emit_u16(Op::Push, nk, span.line);
                    match value_expr {
                        Some(v) => self.compile_expr(v)?,
                        None => {
                            let k = self.push_nil_const();
                            self.emit_u16(Op::Push, k, span.line);
                        }
                    }
                }
                self.emit_u16(Op::Struct, field_order.len() as u16, span.line);
                Ok(())
            }
            Expr::FunctionLit { params, body, span } => {
                let (k, captures) = self.compile_function_value("<lambda>", params, body)?;
                self.emit_capture_loads(&captures, span.line);
                self.cur_mut().chunk.emit_u16_u16(Op::MakeClosure, k, captures.len() as u16, span.line);
                Ok(())
            }
            Expr::EnumRef { type_name, variant, span } => {
                let k = self.consts.string(&format!("{type_name}.{variant}"));
                self.emit_u16(Op::Push, k, span.line);
                Ok(())
            }
        }
    }

    fn compile_identifier(&mut self, name: &str, span: Span) -> CResult<()> {
        match self.symtab.resolve(name) {
            Resolution::Global(g) => {
                self.emit_u16(Op::LoadGlobal, g, span.line);
            }
            Resolution::Local(i) => {
                self.emit_u16(Op::LoadLocal, i as u16, span.line);
            }
            Resolution::Free(f) => {
                self.emit_u16(Op::LoadFree, f as u16, span.line);
            }
        }
        Ok(())
    }

    fn compile_prefix(&mut self, op: PrefixOp, expr: &Expr, span: Span) -> CResult<()> {
        self.compile_expr(expr)?;
        match op {
            PrefixOp::Neg => self.emit_op(Op::Neg, span.line),
            PrefixOp::Not => self.emit_op(Op::Not, span.line),
        };
        Ok(())
    }

    fn compile_infix(&mut self, op: InfixOp, left: &Expr, right: &Expr, span: Span) -> CResult<()> {
        match op {
            InfixOp::And => {
                self.compile_expr(left)?;
                self.cur_mut().chunk.emit_op(Op::Dup, span.line);
                let short_circuit = self.cur_mut().chunk.emit_jump(Op::JumpIfFalse, span.line);
                self.emit_op(Op::Pop, span.line);
                self.compile_expr(right)?;
                let here = self.cur().chunk.here();
                self.cur_mut().chunk.patch_jump(short_circuit, here);
                return Ok(());
            }
            InfixOp::Or => {
                self.compile_expr(left)?;
                self.cur_mut().chunk.emit_op(Op::Dup, span.line);
                let short_circuit = self.cur_mut().chunk.emit_jump(Op::JumpIfTrue, span.line);
                self.emit_op(Op::Pop, span.line);
                self.compile_expr(right)?;
                let here = self.cur().chunk.here();
                self.cur_mut().chunk.patch_jump(short_circuit, here);
                return Ok(());
            }
            _ => {}
        }

        // Fused local-arithmetic peephole: "pop x; push x op local[i]".
        if matches!(op, InfixOp::Add | InfixOp::Sub | InfixOp::Mul | InfixOp::Div) {
            if let Expr::Identifier { name, .. } = right {
                if let Resolution::Local(idx) = self.symtab.resolve(name) {
                    self.compile_expr(left)?;
                    let fused = match op {
                        InfixOp::Add => Op::AddLocal,
                        InfixOp::Sub => Op::SubLocal,
                        InfixOp::Mul => Op::MulLocal,
                        InfixOp::Div => Op::DivLocal,
                        _ => unreachable!(),
                    };
                    self.emit_u16(fused, idx as u16, span.line);
                    return Ok(());
                }
            }
        }

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        let lt = infer(left, &self.cur().hints);
        let rt = infer(right, &self.cur().hints);
        let op_code = specialise(op, lt, rt);
        self.emit_op(op_code, span.line);
        Ok(())
    }

    /// Picks `ArrayGet`/`ArraySet`'s opcode family vs `MapGet`/`MapSet`'s for
    /// an index expression, from the collection's inferred type. Only a
    /// compile-time hint — both opcode families dispatch on the operand's
    /// actual runtime kind in the VM, so this never affects correctness.
    fn index_op(&self, collection: &Expr) -> Op {
        match infer(collection, &self.cur().hints) {
            InferredType::Map => Op::MapGet,
            _ => Op::ArrayGet,
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> CResult<()> {
        if let Expr::Identifier { name, .. } = callee {
            if let Some(idx) = builtin_index(name) {
                self.emit_u16(Op::GetBuiltin, idx, span.line);
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit_u16(Op::Call, args.len() as u16, span.line);
                return Ok(());
            }
        }
        self.compile_expr(callee)?;
        for a in args {
            self.compile_expr(a)?;
        }
        self.emit_u16(Op::Call, args.len() as u16, span.line);
        Ok(())
    }
}

fn specialise(op: InfixOp, lt: InferredType, rt: InferredType) -> Op {
    use InferredType::*;
    match (op, lt, rt) {
        (InfixOp::Add, Int, Int) => Op::AddInt,
        (InfixOp::Add, Float, Float) => Op::AddFloat,
        (InfixOp::Add, String, _) | (InfixOp::Add, _, String) => Op::AddString,
        (InfixOp::Sub, Int, Int) => Op::SubInt,
        (InfixOp::Sub, Float, Float) => Op::SubFloat,
        (InfixOp::Mul, Int, Int) => Op::MulInt,
        (InfixOp::Mul, Float, Float) => Op::MulFloat,
        (InfixOp::Div, Int, Int) => Op::DivInt,
        (InfixOp::Div, Float, Float) => Op::DivFloat,
        (InfixOp::Mod, Int, Int) => Op::ModInt,
        (InfixOp::Add, _, _) => Op::Add,
        (InfixOp::Sub, _, _) => Op::Sub,
        (InfixOp::Mul, _, _) => Op::Mul,
        (InfixOp::Div, _, _) => Op::Div,
        (InfixOp::Mod, _, _) => Op::Mod,
        (InfixOp::Eq, _, _) => Op::Eq,
        (InfixOp::Ne, _, _) => Op::Ne,
        (InfixOp::Lt, _, _) => Op::Lt,
        (InfixOp::Gt, _, _) => Op::Gt,
        (InfixOp::Le, _, _) => Op::Le,
        (InfixOp::Ge, _, _) => Op::Ge,
        (InfixOp::And, _, _) | (InfixOp::Or, _, _) => unreachable!("handled via short-circuit jumps"),
    }
}

/// Index into the fixed built-in function table; order matches
/// [`crate::builtins::BUILTIN_NAMES`].
fn builtin_index(name: &str) -> Option<u16> {
    crate::builtins::index_of(name)
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

pub fn compile(program: &Program) -> CResult<Bytecode> {
    Compiler::new().compile_program(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse;

    fn compile_src(src: &str) -> Bytecode {
        let toks = Lexer::new(src).tokenize().unwrap();
        let program = parse(toks).unwrap();
        compile(&program).unwrap()
    }

    #[test]
    fn compiles_simple_arithmetic_to_specialised_op() {
        let bc = compile_src("print(1+2*3);");
        let code = match &bc.main.code {
            Code::Stack(c) => c,
            _ => panic!("expected stack code"),
        };
        assert!(code.contains(&(Op::AddInt as u8)));
        assert!(code.contains(&(Op::MulInt as u8)));
    }

    #[test]
    fn recursive_function_resolves_its_own_global_slot() {
        let bc = compile_src(
            "func fact(n:int):int{ if n<=1{return 1} return n*fact(n-1) } print(fact(10));",
        );
        assert!(!bc.constants.is_empty());
    }

    #[test]
    fn closure_capture_records_one_free_variable() {
        let bc = compile_src(
            "func make(x:int):func():int{ return func():int{ return x } } var f=make(7); print(f());",
        );
        // The inner lambda's function constant should exist alongside make's.
        let fn_count = bc
            .constants
            .iter()
            .filter(|v| matches!(v, Value::Function(_)))
            .count();
        assert_eq!(fn_count, 2);
    }
}
