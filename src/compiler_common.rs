//! Pieces shared by both compiler back ends: the constant pool, the symbol
//! table (global / local / free-variable resolution), and best-effort type
//! inference used only to pick specialised opcodes.
//!
//! A single symbol table shape serves both back ends: the same resolution
//! logic covers the stack back end's local slot indices and the register
//! back end's register numbers, both just "the index this name lives at in
//! its function" to the symbol table.

use std::collections::HashMap;

use crate::ast::{Expr, InfixOp, PrefixOp};
use crate::value::Value;

// ---- constant pool ------------------------------------------------------

/// Scalar/string constants dedupe by value; function constants never do
/// (spec.md §3: "Function objects appear in the constant pool... without
/// dedup").
#[derive(Default)]
pub struct ConstPool {
    pub values: Vec<Value>,
    scalar_index: HashMap<ScalarKey, u16>,
}

#[derive(PartialEq, Eq, Hash)]
enum ScalarKey {
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(String),
    Nil,
}

impl ConstPool {
    pub fn new() -> Self {
        ConstPool::default()
    }

    fn push(&mut self, v: Value) -> u16 {
        let idx = self.values.len() as u16;
        self.values.push(v);
        idx
    }

    pub fn int(&mut self, v: i64) -> u16 {
        self.dedup(ScalarKey::Int(v), || Value::Int(v))
    }

    pub fn float(&mut self, v: f64) -> u16 {
        self.dedup(ScalarKey::Float(v.to_bits()), || Value::Float(v))
    }

    pub fn boolean(&mut self, v: bool) -> u16 {
        self.dedup(ScalarKey::Bool(v), || Value::Bool(v))
    }

    pub fn string(&mut self, v: &str) -> u16 {
        self.dedup(ScalarKey::Str(v.to_string()), || Value::str(v))
    }

    pub fn nil(&mut self) -> u16 {
        self.dedup(ScalarKey::Nil, || Value::Nil)
    }

    fn dedup(&mut self, key: ScalarKey, make: impl FnOnce() -> Value) -> u16 {
        if let Some(&idx) = self.scalar_index.get(&key) {
            return idx;
        }
        let idx = self.push(make());
        self.scalar_index.insert(key, idx);
        idx
    }

    /// Functions are appended without dedup and return their own index.
    pub fn function(&mut self, v: Value) -> u16 {
        self.push(v)
    }

    /// Appends any value without dedup; used for compiler-internal metadata
    /// (e.g. a struct literal's type/field-name table) that happens to reuse
    /// the `Value` representation but is never dedup-worthy.
    pub fn raw(&mut self, v: Value) -> u16 {
        self.push(v)
    }
}

// ---- symbol table ---------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Resolution {
    Global(u16),
    Local(u8),
    Free(u8),
}

#[derive(Debug, Clone, Copy)]
pub enum ParentRef {
    Local(u8),
    Free(u8),
}

#[derive(Debug, Clone)]
pub struct CapturedVar {
    pub name: String,
    pub from: ParentRef,
}

#[derive(Debug, Default)]
struct FuncLevel {
    scopes: Vec<HashMap<String, u8>>,
    captures: Vec<CapturedVar>,
}

impl FuncLevel {
    fn new() -> Self {
        FuncLevel { scopes: vec![HashMap::new()], captures: Vec::new() }
    }

    fn find_local(&self, name: &str) -> Option<u8> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn find_capture(&self, name: &str) -> Option<u8> {
        self.captures.iter().position(|c| c.name == name).map(|i| i as u8)
    }
}

#[derive(Default)]
pub struct SymbolTable {
    globals: HashMap<String, u16>,
    next_global: u16,
    levels: Vec<FuncLevel>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable { globals: HashMap::new(), next_global: 0, levels: vec![FuncLevel::new()] }
    }

    pub fn declare_global(&mut self, name: &str) -> u16 {
        if let Some(&i) = self.globals.get(name) {
            return i;
        }
        let i = self.next_global;
        self.next_global += 1;
        self.globals.insert(name.to_string(), i);
        i
    }

    pub fn push_function(&mut self) {
        self.levels.push(FuncLevel::new());
    }

    pub fn pop_function(&mut self) -> Vec<CapturedVar> {
        self.levels.pop().expect("unbalanced function scope").captures
    }

    pub fn push_scope(&mut self) {
        self.levels.last_mut().expect("no active function scope").scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.levels.last_mut().expect("no active function scope").scopes.pop();
    }

    pub fn is_top_level(&self) -> bool {
        self.levels.len() == 1
    }

    /// Returns `false` without declaring if `name` already exists in the
    /// innermost scope (a duplicate declaration).
    pub fn declare_local(&mut self, name: &str, index: u8) -> bool {
        let level = self.levels.last_mut().expect("no active function scope");
        let scope = level.scopes.last_mut().expect("no active block scope");
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), index);
        true
    }

    pub fn resolve(&mut self, name: &str) -> Resolution {
        let top = self.levels.len() - 1;
        self.resolve_from(top, name)
    }

    fn resolve_from(&mut self, level: usize, name: &str) -> Resolution {
        if let Some(idx) = self.levels[level].find_local(name) {
            return Resolution::Local(idx);
        }
        if let Some(idx) = self.levels[level].find_capture(name) {
            return Resolution::Free(idx);
        }
        if level == 0 {
            return Resolution::Global(self.declare_global(name));
        }
        match self.resolve_from(level - 1, name) {
            Resolution::Global(g) => Resolution::Global(g),
            Resolution::Local(idx) => {
                Resolution::Free(self.add_capture(level, name, ParentRef::Local(idx)))
            }
            Resolution::Free(idx) => {
                Resolution::Free(self.add_capture(level, name, ParentRef::Free(idx)))
            }
        }
    }

    fn add_capture(&mut self, level: usize, name: &str, from: ParentRef) -> u8 {
        let lvl = &mut self.levels[level];
        if let Some(i) = lvl.captures.iter().position(|c| c.name == name) {
            return i as u8;
        }
        lvl.captures.push(CapturedVar { name: name.to_string(), from });
        (lvl.captures.len() - 1) as u8
    }
}

// ---- type inference --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Int,
    Float,
    Bool,
    String,
    Array,
    Map,
    Unknown,
}

/// Best-effort, purely syntactic: literals carry their obvious type,
/// identifiers consult the caller's running `hints` map (populated from
/// prior declarations/assignments in the same compiler pass), and everything
/// else that doesn't clearly resolve falls back to `Unknown`. Unknown always
/// means "emit the generic opcode" — never a correctness hazard.
///
/// `Array`/`Map` are tracked too, but only to pick which of the two named
/// indexing opcodes (`ArrayGet`/`MapGet`, or the register form's `GetIdx`/
/// `MapGet`) the compiler emits; the VM's handler for either dispatches on
/// the operand's actual runtime kind, so a wrong guess here never produces
/// wrong behaviour, only a missed fast path.
pub fn infer(expr: &Expr, hints: &HashMap<String, InferredType>) -> InferredType {
    match expr {
        Expr::IntLiteral { .. } => InferredType::Int,
        Expr::FloatLiteral { .. } => InferredType::Float,
        Expr::BoolLiteral { .. } => InferredType::Bool,
        Expr::StringLiteral { .. } => InferredType::String,
        Expr::NilLiteral { .. } => InferredType::Unknown,
        Expr::ArrayLit { .. } => InferredType::Array,
        Expr::MapLit { .. } => InferredType::Map,
        Expr::Identifier { name, .. } => hints.get(name).copied().unwrap_or(InferredType::Unknown),
        Expr::Prefix { op: PrefixOp::Neg, expr, .. } => infer(expr, hints),
        Expr::Prefix { op: PrefixOp::Not, .. } => InferredType::Bool,
        Expr::Infix { op, left, right, .. } => infer_infix(*op, left, right, hints),
        Expr::Call { callee, .. } => infer_call(callee),
        _ => InferredType::Unknown,
    }
}

fn infer_call(callee: &Expr) -> InferredType {
    match callee {
        Expr::Identifier { name, .. } => match name.as_str() {
            "copy" | "append" | "keys" | "values" | "split" => InferredType::Array,
            "len" => InferredType::Int,
            "sqrt" | "floor" | "ceil" => InferredType::Float,
            "int" => InferredType::Int,
            "float" => InferredType::Float,
            "string" | "enumName" | "enumValue" => InferredType::String,
            _ => InferredType::Unknown,
        },
        _ => InferredType::Unknown,
    }
}

fn infer_infix(
    op: InfixOp,
    left: &Expr,
    right: &Expr,
    hints: &HashMap<String, InferredType>,
) -> InferredType {
    use InfixOp::*;
    match op {
        Eq | Ne | Lt | Gt | Le | Ge | And | Or => InferredType::Bool,
        Add | Sub | Mul | Div | Mod => {
            let l = infer(left, hints);
            let r = infer(right, hints);
            match (l, r) {
                (InferredType::Int, InferredType::Int) => InferredType::Int,
                (InferredType::String, _) | (_, InferredType::String) if op == Add => {
                    InferredType::String
                }
                (InferredType::Float, InferredType::Float)
                | (InferredType::Int, InferredType::Float)
                | (InferredType::Float, InferredType::Int) => InferredType::Float,
                _ => InferredType::Unknown,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Span;

    fn id(name: &str) -> Expr {
        Expr::Identifier { name: name.to_string(), span: Span::default() }
    }

    #[test]
    fn const_pool_dedups_scalars_but_not_functions() {
        let mut pool = ConstPool::new();
        let a = pool.int(5);
        let b = pool.int(5);
        assert_eq!(a, b);
        let f1 = pool.function(Value::Nil);
        let f2 = pool.function(Value::Nil);
        assert_ne!(f1, f2);
    }

    #[test]
    fn resolves_local_then_promotes_to_free_in_nested_function() {
        let mut table = SymbolTable::new();
        table.declare_local("x", 0); // top level treated as local-ish for this test
        table.push_function();
        assert!(matches!(table.resolve("x"), Resolution::Free(0)));
        let captures = table.pop_function();
        assert_eq!(captures.len(), 1);
        assert!(matches!(captures[0].from, ParentRef::Local(0)));
    }

    #[test]
    fn resolves_unknown_name_as_global() {
        let mut table = SymbolTable::new();
        assert!(matches!(table.resolve("g"), Resolution::Global(_)));
    }

    #[test]
    fn infers_int_plus_int_as_int() {
        let mut hints = HashMap::new();
        hints.insert("n".to_string(), InferredType::Int);
        let expr = Expr::Infix {
            op: InfixOp::Add,
            left: Box::new(id("n")),
            right: Box::new(Expr::IntLiteral { value: 1, span: Span::default() }),
            span: Span::default(),
        };
        assert_eq!(infer(&expr, &hints), InferredType::Int);
    }
}
