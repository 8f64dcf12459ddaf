//! Error types shared by every phase: lex, parse, compile, run.
//!
//! A phase-tagged error taxonomy (E1xx lexer, E2xx parser, E3xx compile,
//! E4xx runtime codes). Every variant carries a `Span` so the CLI can
//! render a miette diagnostic with a source snippet.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32) -> Self {
        Span { start, end, line }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum LexError {
    #[error("[E101] unexpected character '{ch}' at line {}", .span.line)]
    UnexpectedCharacter { ch: char, span: Span },
    #[error("[E102] unterminated string literal starting at line {}", .span.line)]
    UnterminatedString { span: Span },
    #[error("[E103] invalid number literal '{text}' at line {}", .span.line)]
    InvalidNumber { text: String, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedCharacter { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::InvalidNumber { span, .. } => *span,
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ParseError {
    #[error("[E201] expected {expected}, found {found} at line {}", .span.line)]
    UnexpectedToken { expected: String, found: String, span: Span },
    #[error("[E202] unexpected end of input while parsing {context}")]
    UnexpectedEof { context: String, span: Span },
    #[error("[E203] invalid syntax in {context} at line {}", .span.line)]
    InvalidSyntax { context: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::UnexpectedEof { span, .. }
            | ParseError::InvalidSyntax { span, .. } => *span,
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum CompileError {
    #[error("[E301] unresolved identifier '{name}' at line {}", .span.line)]
    UnresolvedIdentifier { name: String, span: Span },
    #[error("[E302] '{name}' is already declared in this scope (line {})", .span.line)]
    DuplicateDeclaration { name: String, span: Span },
    #[error("[E303] {name} expects {expected} argument(s), found {found} (line {})", .span.line)]
    ArityMismatch { name: String, expected: usize, found: usize, span: Span },
    #[error("[E304] 'break' outside of a loop (line {})", .span.line)]
    BreakOutsideLoop { span: Span },
    #[error("[E305] 'continue' outside of a loop (line {})", .span.line)]
    ContinueOutsideLoop { span: Span },
    #[error("[E306] jump target out of addressable range (line {})", .span.line)]
    JumpRangeExceeded { span: Span },
    #[error("[E307] function uses more than 256 registers (line {})", .span.line)]
    TooManyRegisters { span: Span },
    #[error("[E308] program declares more than 256 distinct struct field names (line {})", .span.line)]
    TooManyFieldNames { span: Span },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::UnresolvedIdentifier { span, .. }
            | CompileError::DuplicateDeclaration { span, .. }
            | CompileError::ArityMismatch { span, .. }
            | CompileError::BreakOutsideLoop { span }
            | CompileError::ContinueOutsideLoop { span }
            | CompileError::JumpRangeExceeded { span }
            | CompileError::TooManyRegisters { span }
            | CompileError::TooManyFieldNames { span } => *span,
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("[E401] division by zero")]
    DivisionByZero,
    #[error("[E402] modulo by zero")]
    ModuloByZero,
    #[error("[E403] index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: usize },
    #[error("[E404] struct '{type_name}' has no field '{field}'")]
    MissingField { type_name: String, field: String },
    #[error("[E405] type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("[E406] wrong number of arguments: expected {expected}, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("[E407] value of type '{type_name}' is not callable")]
    NotCallable { type_name: String },
    #[error("[E408] operand stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },
    #[error("[E409] call stack overflow (max frames {max_frames})")]
    FrameOverflow { max_frames: usize },
    #[error("[E410] globals exhausted (capacity {capacity})")]
    GlobalsOverflow { capacity: usize },
    #[error("[E411] unknown built-in function index {index}")]
    UnknownBuiltin { index: usize },
}

/// Top-level wrapper so the CLI can match on a single error type.
#[derive(Debug, Error)]
pub enum MinlangError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}
