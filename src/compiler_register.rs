//! Register compiler back end: lowers a syntax tree to the fixed-width
//! instruction form, one function `Proto` per nested function.
//!
//! Register-allocation discipline: a per-function bump allocator where every
//! sub-expression's compilation starts at the allocator's current top and
//! leaves exactly one live register there when it returns — the "stack
//! discipline" that keeps the allocator as simple as a counter while still
//! reusing registers freely across sibling sub-expressions. Closures are
//! nested `Proto`s (`child_protos`), a proto-per-function layout rather
//! than stuffing function values into the shared constant pool the way
//! [`crate::compiler_stack`] does.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Expr, FuncDecl, InfixOp, Item, PrefixOp, Program, Stmt};
use crate::bytecode_register::{Instr, Op, Proto, UpvalDesc};
use crate::compiler_common::{infer, ConstPool, InferredType, ParentRef, Resolution, SymbolTable};
use crate::errors::{CompileError, Span};
use crate::value::{Code, FunctionObj, Value};

struct LoopCtx {
    break_patches: Vec<usize>,
    continue_target_patches: Vec<usize>,
}

struct FuncCtx {
    proto: Proto,
    next_reg: u8,
    max_reg: u8,
    locals_top: u8,
    hints: HashMap<String, InferredType>,
    loops: Vec<LoopCtx>,
}

impl FuncCtx {
    fn new(name: &str, param_count: u8) -> Self {
        FuncCtx {
            proto: Proto::new(name, param_count),
            next_reg: param_count,
            max_reg: param_count,
            locals_top: param_count,
            hints: HashMap::new(),
            loops: Vec::new(),
        }
    }

    /// Allocates the next free register. Every `compile_expr` call is
    /// required to invoke this exactly once per live value it produces, and
    /// to have reclaimed everything else by the time it returns — that
    /// invariant is what lets callers (binops, calls, array/struct literals)
    /// assume sub-expressions land in consecutive registers for free.
    fn alloc_temp(&mut self) -> Result<u8, CompileError> {
        if self.next_reg == u8::MAX {
            return Err(CompileError::TooManyRegisters { span: Span::default() });
        }
        let r = self.next_reg;
        self.next_reg += 1;
        if self.next_reg > self.max_reg {
            self.max_reg = self.next_reg;
        }
        Ok(r)
    }
}

pub struct Bytecode {
    pub constants: Vec<Value>,
    pub main: Arc<FunctionObj>,
    pub field_names: Vec<String>,
}

pub struct Compiler {
    consts: ConstPool,
    symtab: SymbolTable,
    structs: HashMap<String, Vec<String>>,
    depth: u32,
    ctx_stack: Vec<FuncCtx>,
    field_names: Vec<String>,
    field_name_index: HashMap<String, u8>,
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
            field_names: Vec::new(),
            field_name_index: HashMap::new(),
        }
    }

    /// `GetField`/`SetField` pack their field name as an 8-bit index into
    /// this dedicated table rather than into the shared constant pool
    /// (`ConstPool`'s index is a `u16` and can run past 256 entries in any
    /// program with enough literals), so the index stays valid regardless of
    /// how large the rest of the constant pool grows.
    fn field_name_index(&mut self, name: &str, span: Span) -> CResult<u8> {
        if let Some(&i) = self.field_name_index.get(name) {
            return Ok(i);
        }
        if self.field_names.len() >= u8::MAX as usize {
            return Err(CompileError::TooManyFieldNames { span });
        }
        let i = self.field_names.len() as u8;
        self.field_names.push(name.to_string());
        self.field_name_index.insert(name.to_string(), i);
        Ok(i)
    }

    fn cur(&self) -> &FuncCtx {
        self.ctx_stack.last().expect("no active function context")
    }

    fn cur_mut(&mut self) -> &mut FuncCtx {
        self.ctx_stack.last_mut().expect("no active function context")
    }

    fn emit(&mut self, instr: Instr, line: u32) -> usize {
        self.cur_mut().proto.emit(instr, line)
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

        self.ctx_stack.push(FuncCtx::new("main", 0));
        for item in &program.items {
            self.compile_item(item)?;
        }
        self.emit(Instr::abc(Op::Halt, 0, 0, 0), 0);
        let ctx = self.ctx_stack.pop().expect("main context");
        let mut proto = ctx.proto;
        proto.reg_count = ctx.max_reg;

        let main = FunctionObj {
            name: "main".to_string(),
            num_params: 0,
            num_locals: proto.reg_count as usize,
            code: Code::Register(Arc::new(proto)),
        };

        Ok(Bytecode { constants: self.consts.values, main: Arc::new(main), field_names: self.field_names })
    }

    fn compile_item(&mut self, item: &Item) -> CResult<()> {
        match item {
            Item::FuncDecl(f) => self.compile_func_decl(f),
            Item::StructDecl(_) | Item::EnumDecl(_) => Ok(()),
            Item::Stmt(s) => self.compile_stmt(s),
        }
    }

    fn compile_func_decl(&mut self, f: &FuncDecl) -> CResult<()> {
        let child_idx = self.compile_function_value(&f.name, &f.params, &f.body)?;
        let mark = self.cur().locals_top;
        let dst = self.cur_mut().alloc_temp()?;
        debug_assert_eq!(dst, mark);
        self.emit(Instr::abx(Op::Closure, dst, child_idx), f.span.line);
        let g = self.symtab.declare_global(&f.name);
        self.emit(Instr::abx(Op::StoreGlobal, dst, g), f.span.line);
        self.cur_mut().next_reg = mark;
        Ok(())
    }

    /// Compiles a function body into its own `Proto`, appended to the
    /// enclosing function's `child_protos`, and returns its index there.
    fn compile_function_value(&mut self, name: &str, params: &[String], body: &[Stmt]) -> CResult<u16> {
        if params.len() > u8::MAX as usize {
            return Err(CompileError::TooManyRegisters { span: Span::default() });
        }
        self.symtab.push_function();
        self.depth += 1;
        let param_count = params.len() as u8;
        self.ctx_stack.push(FuncCtx::new(name, param_count));
        for (i, p) in params.iter().enumerate() {
            if !self.symtab.declare_local(p, i as u8) {
                return Err(CompileError::DuplicateDeclaration { name: p.clone(), span: Span::default() });
            }
        }
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.emit(Instr::abc(Op::ReturnNil, 0, 0, 0), 0);

        let ctx = self.ctx_stack.pop().expect("function context");
        self.depth -= 1;
        let captures = self.symtab.pop_function();

        let mut proto = ctx.proto;
        proto.reg_count = ctx.max_reg.max(param_count);
        proto.upvals = captures
            .iter()
            .map(|c| match c.from {
                ParentRef::Local(idx) => UpvalDesc { in_stack: true, index: idx },
                ParentRef::Free(idx) => UpvalDesc { in_stack: false, index: idx },
            })
            .collect();

        let parent = self.cur_mut();
        let idx = parent.proto.child_protos.len() as u16;
        parent.proto.child_protos.push(Arc::new(proto));
        Ok(idx)
    }

    // ---- statements -----------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::VarDecl { name, value, span } | Stmt::ConstDecl { name, value, span } => {
                let t = infer(value, &self.cur().hints);
                let r = self.compile_expr(value)?;
                self.cur_mut().hints.insert(name.clone(), t);
                self.declare_and_store(name, r, *span)
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
                let mark = self.cur().locals_top;
                let cond_reg = self.compile_expr(cond)?;
                let else_jump = self.cur_mut().proto.emit_jump(Op::JumpF, cond_reg, span.line);
                self.cur_mut().next_reg = mark;
                self.symtab.push_scope();
                for s in then_branch {
                    self.compile_stmt(s)?;
                }
                self.symtab.pop_scope();
                if let Some(else_stmts) = else_branch {
                    let end_jump = self.cur_mut().proto.emit_jump(Op::Jump, 0, span.line);
                    let here = self.cur().proto.code.len();
                    self.cur_mut().proto.patch_jump(else_jump, here);
                    self.symtab.push_scope();
                    for s in else_stmts {
                        self.compile_stmt(s)?;
                    }
                    self.symtab.pop_scope();
                    let here = self.cur().proto.code.len();
                    self.cur_mut().proto.patch_jump(end_jump, here);
                } else {
                    let here = self.cur().proto.code.len();
                    self.cur_mut().proto.patch_jump(else_jump, here);
                }
                Ok(())
            }
            Stmt::While { cond, body, span } => {
                let mark = self.cur().locals_top;
                let loop_start = self.cur().proto.code.len();
                self.cur_mut().loops.push(LoopCtx { break_patches: Vec::new(), continue_target_patches: Vec::new() });
                let cond_reg = self.compile_expr(cond)?;
                let exit_jump = self.cur_mut().proto.emit_jump(Op::JumpF, cond_reg, span.line);
                self.cur_mut().next_reg = mark;
                self.symtab.push_scope();
                for s in body {
                    self.compile_stmt(s)?;
                }
                self.symtab.pop_scope();
                let back = self.cur_mut().proto.emit_jump(Op::Jump, 0, span.line);
                self.cur_mut().proto.patch_jump(back, loop_start);
                let here = self.cur().proto.code.len();
                self.cur_mut().proto.patch_jump(exit_jump, here);
                let loop_ctx = self.cur_mut().loops.pop().unwrap();
                for p in loop_ctx.break_patches {
                    self.cur_mut().proto.patch_jump(p, here);
                }
                for p in loop_ctx.continue_target_patches {
                    self.cur_mut().proto.patch_jump(p, loop_start);
                }
                Ok(())
            }
            Stmt::For { init, cond, step, body, span } => {
                let mark = self.cur().locals_top;
                self.symtab.push_scope();
                if let Some(init) = init {
                    self.compile_stmt(init)?;
                }
                let loop_start = self.cur().proto.code.len();
                self.cur_mut().loops.push(LoopCtx { break_patches: Vec::new(), continue_target_patches: Vec::new() });
                let exit_jump = if let Some(cond) = cond {
                    let inner_mark = self.cur().locals_top;
                    let cond_reg = self.compile_expr(cond)?;
                    let j = self.cur_mut().proto.emit_jump(Op::JumpF, cond_reg, span.line);
                    self.cur_mut().next_reg = inner_mark;
                    Some(j)
                } else {
                    None
                };
                for s in body {
                    self.compile_stmt(s)?;
                }
                let step_start = self.cur().proto.code.len();
                if let Some(step) = step {
                    self.compile_stmt(step)?;
                }
                let back = self.cur_mut().proto.emit_jump(Op::Jump, 0, span.line);
                self.cur_mut().proto.patch_jump(back, loop_start);
                let here = self.cur().proto.code.len();
                if let Some(exit_jump) = exit_jump {
                    self.cur_mut().proto.patch_jump(exit_jump, here);
                }
                let loop_ctx = self.cur_mut().loops.pop().unwrap();
                for p in loop_ctx.break_patches {
                    self.cur_mut().proto.patch_jump(p, here);
                }
                for p in loop_ctx.continue_target_patches {
                    self.cur_mut().proto.patch_jump(p, step_start);
                }
                self.symtab.pop_scope();
                self.cur_mut().next_reg = mark;
                self.cur_mut().locals_top = mark;
                Ok(())
            }
            Stmt::Break(span) => {
                if self.cur().loops.is_empty() {
                    return Err(CompileError::BreakOutsideLoop { span: *span });
                }
                let p = self.cur_mut().proto.emit_jump(Op::Jump, 0, span.line);
                self.cur_mut().loops.last_mut().unwrap().break_patches.push(p);
                Ok(())
            }
            Stmt::Continue(span) => {
                if self.cur().loops.is_empty() {
                    return Err(CompileError::ContinueOutsideLoop { span: *span });
                }
                let p = self.cur_mut().proto.emit_jump(Op::Jump, 0, span.line);
                self.cur_mut().loops.last_mut().unwrap().continue_target_patches.push(p);
                Ok(())
            }
            Stmt::Return { value, span } => {
                match value {
                    Some(e) => {
                        let r = self.compile_expr(e)?;
                        self.emit(Instr::abc(Op::Return, r, 0, 0), span.line);
                    }
                    None => {
                        self.emit(Instr::abc(Op::ReturnNil, 0, 0, 0), span.line);
                    }
                }
                Ok(())
            }
            Stmt::Print { args, span } => {
                let mark = self.cur().locals_top;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit(Instr::abc(Op::Print, mark, args.len() as u8, 0), span.line);
                self.cur_mut().next_reg = mark;
                Ok(())
            }
            Stmt::Assignment { target, value, span } => self.compile_assignment(target, value, *span),
            Stmt::Expr(e) => {
                let mark = self.cur().locals_top;
                let r = self.compile_expr(e)?;
                self.emit(Instr::abc(Op::LastValue, r, 0, 0), e.span().line);
                self.cur_mut().next_reg = mark;
                Ok(())
            }
        }
    }

    fn declare_and_store(&mut self, name: &str, value_reg: u8, span: Span) -> CResult<()> {
        if self.depth == 0 {
            let g = self.symtab.declare_global(name);
            self.emit(Instr::abx(Op::StoreGlobal, value_reg, g), span.line);
            self.cur_mut().next_reg = self.cur().locals_top;
            Ok(())
        } else {
            // `value_reg` is guaranteed (by the bump allocator's invariant)
            // to already sit at `locals_top`, so promoting it to a named
            // local costs nothing beyond bookkeeping.
            if !self.symtab.declare_local(name, value_reg) {
                return Err(CompileError::DuplicateDeclaration { name: name.to_string(), span });
            }
            self.cur_mut().locals_top = value_reg + 1;
            Ok(())
        }
    }

    fn compile_assignment(&mut self, target: &Expr, value: &Expr, span: Span) -> CResult<()> {
        let mark = self.cur().locals_top;
        match target {
            Expr::Identifier { name, .. } => {
                let t = infer(value, &self.cur().hints);
                let r = self.compile_expr(value)?;
                self.cur_mut().hints.insert(name.clone(), t);
                match self.symtab.resolve(name) {
                    Resolution::Global(g) => {
                        self.emit(Instr::abx(Op::StoreGlobal, r, g), span.line);
                    }
                    Resolution::Local(local_reg) => {
                        if local_reg != r {
                            self.emit(Instr::abc(Op::Move, local_reg, r, 0), span.line);
                        }
                    }
                    Resolution::Free(_) => {
                        return Err(CompileError::UnresolvedIdentifier { name: name.clone(), span })
                    }
                }
                self.cur_mut().next_reg = mark;
                Ok(())
            }
            Expr::Index { collection, key, .. } => {
                let coll_reg = self.compile_expr(collection)?;
                let key_reg = self.compile_expr(key)?;
                let value_reg = self.compile_expr(value)?;
                let op = if self.index_op(collection) == Op::MapGet { Op::MapSet } else { Op::SetIdx };
                self.emit(Instr::abc(op, coll_reg, key_reg, value_reg), span.line);
                self.cur_mut().next_reg = mark;
                Ok(())
            }
            Expr::Field { record, name, .. } => {
                let record_reg = self.compile_expr(record)?;
                let value_reg = self.compile_expr(value)?;
                let name_const = self.field_name_index(name, span)?;
                self.emit(Instr::abc(Op::SetField, record_reg, value_reg, name_const), span.line);
                self.cur_mut().next_reg = mark;
                Ok(())
            }
            _ => Err(CompileError::UnresolvedIdentifier { name: "<assignment target>".to_string(), span }),
        }
    }

    // ---- expressions ------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> CResult<u8> {
        match expr {
            Expr::IntLiteral { value, span } => {
                let k = self.consts.int(*value);
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::LoadK, dst, k), span.line);
                Ok(dst)
            }
            Expr::FloatLiteral { value, span } => {
                let k = self.consts.float(*value);
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::LoadK, dst, k), span.line);
                Ok(dst)
            }
            Expr::BoolLiteral { value, span } => {
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abc(Op::LoadBool, dst, *value as u8, 0), span.line);
                Ok(dst)
            }
            Expr::StringLiteral { value, span } => {
                let k = self.consts.string(value);
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::LoadK, dst, k), span.line);
                Ok(dst)
            }
            Expr::NilLiteral { span } => {
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abc(Op::LoadNil, dst, 0, 0), span.line);
                Ok(dst)
            }
            Expr::Identifier { name, span } => self.compile_identifier(name, *span),
            Expr::Prefix { op, expr, span } => self.compile_prefix(*op, expr, *span),
            Expr::Infix { op, left, right, span } => self.compile_infix(*op, left, right, *span),
            Expr::Call { callee, args, span } => self.compile_call(callee, args, *span),
            Expr::Index { collection, key, span } => {
                let coll_reg = self.compile_expr(collection)?;
                let key_reg = self.compile_expr(key)?;
                self.emit(Instr::abc(self.index_op(collection), coll_reg, coll_reg, key_reg), span.line);
                self.cur_mut().next_reg = coll_reg + 1;
                Ok(coll_reg)
            }
            Expr::Field { record, name, span } => {
                let record_reg = self.compile_expr(record)?;
                let name_const = self.field_name_index(name, *span)?;
                self.emit(Instr::abc(Op::GetField, record_reg, record_reg, name_const), span.line);
                Ok(record_reg)
            }
            Expr::ArrayLit { elements, span } => {
                let base = self.cur_mut().alloc_temp()?;
                for e in elements {
                    self.compile_expr(e)?;
                }
                self.emit(Instr::abx(Op::NewArray, base, elements.len() as u16), span.line);
                self.cur_mut().next_reg = base + 1;
                Ok(base)
            }
            Expr::MapLit { pairs, span } => {
                let base = self.cur_mut().alloc_temp()?;
                for (k, v) in pairs {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                self.emit(Instr::abx(Op::NewMap, base, pairs.len() as u16), span.line);
                self.cur_mut().next_reg = base + 1;
                Ok(base)
            }
            Expr::StructLit { type_name, fields, span } => {
                let field_order = self
                    .structs
                    .get(type_name)
                    .cloned()
                    .unwrap_or_else(|| fields.iter().map(|(n, _)| n.clone()).collect());
                let mut meta = Vec::with_capacity(field_order.len() + 1);
                meta.push(Value::str(type_name.clone()));
                meta.extend(field_order.iter().map(|n| Value::str(n.clone())));
                let meta_idx = self.consts.raw(Value::array(meta));

                let base = self.cur_mut().alloc_temp()?;
                for fname in &field_order {
                    let value_expr = fields.iter().find(|(n, _)| n == fname).map(|(_, v)| v);
                    match value_expr {
                        Some(v) => {
                            self.compile_expr(v)?;
                        }
                        None => {
                            let dst = self.cur_mut().alloc_temp()?;
                            self.emit(Instr::abc(Op::LoadNil, dst, 0, 0), span.line);
                        }
                    }
                }
                self.emit(Instr::abx(Op::NewStruct, base, meta_idx), span.line);
                self.cur_mut().next_reg = base + 1;
                Ok(base)
            }
            Expr::FunctionLit { params, body, span } => {
                let child_idx = self.compile_function_value("<lambda>", params, body)?;
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::Closure, dst, child_idx), span.line);
                Ok(dst)
            }
            Expr::EnumRef { type_name, variant, span } => {
                let k = self.consts.string(&format!("{type_name}.{variant}"));
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::LoadK, dst, k), span.line);
                Ok(dst)
            }
        }
    }

    fn compile_identifier(&mut self, name: &str, span: Span) -> CResult<u8> {
        match self.symtab.resolve(name) {
            Resolution::Global(g) => {
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::LoadGlobal, dst, g), span.line);
                Ok(dst)
            }
            Resolution::Local(src) => {
                let dst = self.cur_mut().alloc_temp()?;
                if dst != src {
                    self.emit(Instr::abc(Op::Move, dst, src, 0), span.line);
                }
                Ok(dst)
            }
            Resolution::Free(idx) => {
                let dst = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abc(Op::LoadUpval, dst, idx, 0), span.line);
                Ok(dst)
            }
        }
    }

    fn compile_prefix(&mut self, op: PrefixOp, expr: &Expr, span: Span) -> CResult<u8> {
        let src = self.compile_expr(expr)?;
        let opc = match op {
            PrefixOp::Neg => Op::Neg,
            PrefixOp::Not => Op::Not,
        };
        self.emit(Instr::abc(opc, src, src, 0), span.line);
        Ok(src)
    }

    fn compile_infix(&mut self, op: InfixOp, left: &Expr, right: &Expr, span: Span) -> CResult<u8> {
        match op {
            InfixOp::And => {
                let left_reg = self.compile_expr(left)?;
                let skip = self.cur_mut().proto.emit_jump(Op::JumpF, left_reg, span.line);
                let right_reg = self.compile_expr(right)?;
                if right_reg != left_reg {
                    self.emit(Instr::abc(Op::Move, left_reg, right_reg, 0), span.line);
                }
                self.cur_mut().next_reg = left_reg + 1;
                let here = self.cur().proto.code.len();
                self.cur_mut().proto.patch_jump(skip, here);
                return Ok(left_reg);
            }
            InfixOp::Or => {
                let left_reg = self.compile_expr(left)?;
                let skip = self.cur_mut().proto.emit_jump(Op::JumpT, left_reg, span.line);
                let right_reg = self.compile_expr(right)?;
                if right_reg != left_reg {
                    self.emit(Instr::abc(Op::Move, left_reg, right_reg, 0), span.line);
                }
                self.cur_mut().next_reg = left_reg + 1;
                let here = self.cur().proto.code.len();
                self.cur_mut().proto.patch_jump(skip, here);
                return Ok(left_reg);
            }
            _ => {}
        }

        let lt = infer(left, &self.cur().hints);
        let rt = infer(right, &self.cur().hints);
        let a = self.compile_expr(left)?;
        let b = self.compile_expr(right)?;
        let opc = specialise(op, lt, rt);
        self.emit(Instr::abc(opc, a, a, b), span.line);
        self.cur_mut().next_reg = a + 1;
        Ok(a)
    }

    /// Same role as [`crate::compiler_stack::Compiler::index_op`]: a
    /// compile-time hint only, the VM dispatches on the operand's actual
    /// runtime kind regardless of which opcode is emitted.
    fn index_op(&self, collection: &Expr) -> Op {
        match infer(collection, &self.cur().hints) {
            InferredType::Map => Op::MapGet,
            _ => Op::GetIdx,
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> CResult<u8> {
        let base = if let Expr::Identifier { name, .. } = callee {
            if let Some(idx) = builtin_index(name) {
                let base = self.cur_mut().alloc_temp()?;
                self.emit(Instr::abx(Op::GetBuiltin, base, idx), span.line);
                base
            } else {
                self.compile_expr(callee)?
            }
        } else {
            self.compile_expr(callee)?
        };
        for a in args {
            self.compile_expr(a)?;
        }
        self.emit(Instr::abc(Op::Call, base, args.len() as u8, 0), span.line);
        self.cur_mut().next_reg = base + 1;
        Ok(base)
    }
}

fn specialise(op: InfixOp, lt: InferredType, rt: InferredType) -> Op {
    use InferredType::*;
    match (op, lt, rt) {
        (InfixOp::Add, Int, Int) => Op::AddInt,
        (InfixOp::Add, Float, Float) => Op::AddFloat,
        (InfixOp::Add, String, _) | (InfixOp::Add, _, String) => Op::Concat,
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
        (InfixOp::Lt, Int, Int) => Op::LtInt,
        (InfixOp::Lt, Float, Float) => Op::LtFloat,
        (InfixOp::Lt, _, _) => Op::Lt,
        (InfixOp::Gt, Int, Int) => Op::GtInt,
        (InfixOp::Gt, Float, Float) => Op::GtFloat,
        (InfixOp::Gt, _, _) => Op::Gt,
        (InfixOp::Le, Int, Int) => Op::LeInt,
        (InfixOp::Le, Float, Float) => Op::LeFloat,
        (InfixOp::Le, _, _) => Op::Le,
        (InfixOp::Ge, Int, Int) => Op::GeInt,
        (InfixOp::Ge, Float, Float) => Op::GeFloat,
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
        let proto = match &bc.main.code {
            Code::Register(p) => p,
            _ => panic!("expected register code"),
        };
        assert!(proto.code.iter().any(|i| i.op() == Op::AddInt));
        assert!(proto.code.iter().any(|i| i.op() == Op::MulInt));
    }

    #[test]
    fn recursive_function_resolves_its_own_global_slot() {
        let bc = compile_src(
            "func fact(n:int):int{ if n<=1{return 1} return n*fact(n-1) } print(fact(10));",
        );
        let proto = match &bc.main.code {
            Code::Register(p) => p,
            _ => panic!("expected register code"),
        };
        assert_eq!(proto.child_protos.len(), 1);
    }

    #[test]
    fn closure_nests_a_child_proto_with_one_upvalue() {
        let bc = compile_src(
            "func make(x:int):func():int{ return func():int{ return x } } var f=make(7); print(f());",
        );
        let proto = match &bc.main.code {
            Code::Register(p) => p,
            _ => panic!("expected register code"),
        };
        assert_eq!(proto.child_protos.len(), 1);
        let make_proto = &proto.child_protos[0];
        assert_eq!(make_proto.child_protos.len(), 1);
        assert_eq!(make_proto.child_protos[0].upvals.len(), 1);
    }
}
