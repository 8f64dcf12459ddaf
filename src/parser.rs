//! Hand-rolled recursive-descent parser: no parser-generator dependency,
//! Pratt-style precedence climbing for expressions, a thin pre-scan for
//! names that need to be known before the expression grammar can
//! disambiguate them.

use std::collections::HashSet;

use crate::ast::*;
use crate::errors::{ParseError, Span};
use crate::lexer::{Tok, Token};

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    enum_names: HashSet<String>,
    no_struct_lit: bool,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    pub fn new(toks: Vec<Token>) -> Self {
        let enum_names = Self::scan_enum_names(&toks);
        Parser { toks, pos: 0, enum_names, no_struct_lit: false }
    }

    /// One-pass lookahead over the raw token stream for `enum Name { ... }`
    /// declarations, so the expression grammar can tell `Color.Red` (an enum
    /// reference) from `point.x` (a field access) without semantic analysis.
    fn scan_enum_names(toks: &[Token]) -> HashSet<String> {
        let mut names = HashSet::new();
        let mut i = 0;
        while i < toks.len() {
            if toks[i].tok == Tok::Enum {
                if let Some(Token { tok: Tok::Ident(name), .. }) = toks.get(i + 1) {
                    names.insert(name.clone());
                }
            }
            i += 1;
        }
        names
    }

    fn peek(&self) -> &Tok {
        &self.toks[self.pos.min(self.toks.len() - 1)].tok
    }

    fn peek_span(&self) -> Span {
        self.toks[self.pos.min(self.toks.len() - 1)].span
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.toks[self.pos.min(self.toks.len() - 1)].clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, context: &str) -> PResult<Token> {
        if self.check(&tok) {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: format!("{:?} in {context}", tok),
                found: format!("{:?}", self.peek()),
                span: self.peek_span(),
            })
        }
    }

    fn expect_ident(&mut self, context: &str) -> PResult<(String, Span)> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                let span = self.peek_span();
                self.advance();
                Ok((name, span))
            }
            other => Err(ParseError::UnexpectedToken {
                expected: format!("identifier in {context}"),
                found: format!("{:?}", other),
                span: self.peek_span(),
            }),
        }
    }

    // ---- entry point -------------------------------------------------

    pub fn parse_program(mut self) -> PResult<Program> {
        let mut items = Vec::new();
        while !self.at_eof() {
            items.push(self.parse_item()?);
        }
        Ok(Program { items })
    }

    fn parse_item(&mut self) -> PResult<Item> {
        match self.peek() {
            Tok::Func => Ok(Item::FuncDecl(self.parse_func_decl()?)),
            Tok::Struct => Ok(Item::StructDecl(self.parse_struct_decl()?)),
            Tok::Enum => Ok(Item::EnumDecl(self.parse_enum_decl()?)),
            _ => Ok(Item::Stmt(self.parse_stmt()?)),
        }
    }

    fn parse_func_decl(&mut self) -> PResult<FuncDecl> {
        let start = self.peek_span();
        self.expect(Tok::Func, "function declaration")?;
        let (name, _) = self.expect_ident("function name")?;
        let params = self.parse_param_list()?;
        if self.eat(&Tok::Colon) {
            self.parse_type()?;
        }
        let body = self.parse_block()?;
        Ok(FuncDecl { name, params, body, span: start })
    }

    fn parse_param_list(&mut self) -> PResult<Vec<String>> {
        self.expect(Tok::LParen, "parameter list")?;
        let mut params = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                let (name, _) = self.expect_ident("parameter name")?;
                if self.eat(&Tok::Colon) {
                    self.parse_type()?;
                }
                params.push(name);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, "parameter list")?;
        Ok(params)
    }

    fn parse_struct_decl(&mut self) -> PResult<StructDecl> {
        let start = self.peek_span();
        self.expect(Tok::Struct, "struct declaration")?;
        let (name, _) = self.expect_ident("struct name")?;
        self.expect(Tok::LBrace, "struct body")?;
        let mut fields = Vec::new();
        while !self.check(&Tok::RBrace) {
            let (fname, _) = self.expect_ident("field name")?;
            if self.eat(&Tok::Colon) {
                self.parse_type()?;
            }
            fields.push(fname);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RBrace, "struct body")?;
        Ok(StructDecl { name, fields, span: start })
    }

    fn parse_enum_decl(&mut self) -> PResult<EnumDecl> {
        let start = self.peek_span();
        self.expect(Tok::Enum, "enum declaration")?;
        let (name, _) = self.expect_ident("enum name")?;
        self.expect(Tok::LBrace, "enum body")?;
        let mut variants = Vec::new();
        while !self.check(&Tok::RBrace) {
            let (vname, _) = self.expect_ident("variant name")?;
            variants.push(vname);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RBrace, "enum body")?;
        Ok(EnumDecl { name, variants, span: start })
    }

    /// Consumes a type expression without building a node: the core does its
    /// own best-effort type inference over the syntax tree rather than trust
    /// source-level annotations (the type checker is a separate collaborator).
    fn parse_type(&mut self) -> PResult<()> {
        match self.peek().clone() {
            Tok::Func => {
                self.advance();
                self.expect(Tok::LParen, "function type")?;
                if !self.check(&Tok::RParen) {
                    loop {
                        self.parse_type()?;
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Tok::RParen, "function type")?;
                if self.eat(&Tok::Colon) {
                    self.parse_type()?;
                }
                Ok(())
            }
            Tok::Map => {
                self.advance();
                self.expect(Tok::LBracket, "map type")?;
                self.parse_type()?;
                self.expect(Tok::RBracket, "map type")?;
                self.parse_type()?;
                Ok(())
            }
            Tok::LBracket => {
                self.advance();
                self.expect(Tok::RBracket, "array type")?;
                self.parse_type()?;
                Ok(())
            }
            Tok::Ident(_) => {
                self.advance();
                Ok(())
            }
            other => Err(ParseError::InvalidSyntax {
                context: format!("type, found {:?}", other),
                span: self.peek_span(),
            }),
        }
    }

    // ---- statements ----------------------------------------------------

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Tok::LBrace, "block")?;
        let mut stmts = Vec::new();
        while !self.check(&Tok::RBrace) {
            if self.at_eof() {
                return Err(ParseError::UnexpectedEof {
                    context: "block".into(),
                    span: self.peek_span(),
                });
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(Tok::RBrace, "block")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Tok::Var => self.parse_var_decl(false),
            Tok::Const => self.parse_var_decl(true),
            Tok::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            Tok::If => self.parse_if(),
            Tok::While => self.parse_while(),
            Tok::For => self.parse_for(),
            Tok::Break => {
                let span = self.peek_span();
                self.advance();
                self.eat(&Tok::Semicolon);
                Ok(Stmt::Break(span))
            }
            Tok::Continue => {
                let span = self.peek_span();
                self.advance();
                self.eat(&Tok::Semicolon);
                Ok(Stmt::Continue(span))
            }
            Tok::Return => {
                let span = self.peek_span();
                self.advance();
                let value = if self.check(&Tok::Semicolon) || self.check(&Tok::RBrace) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.eat(&Tok::Semicolon);
                Ok(Stmt::Return { value, span })
            }
            Tok::Print => {
                let span = self.peek_span();
                self.advance();
                self.expect(Tok::LParen, "print arguments")?;
                let mut args = Vec::new();
                if !self.check(&Tok::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Tok::RParen, "print arguments")?;
                self.eat(&Tok::Semicolon);
                Ok(Stmt::Print { args, span })
            }
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    fn parse_var_decl(&mut self, is_const: bool) -> PResult<Stmt> {
        let span = self.peek_span();
        self.advance(); // 'var' or 'const'
        let (name, _) = self.expect_ident("declaration name")?;
        if self.eat(&Tok::Colon) {
            self.parse_type()?;
        }
        self.expect(Tok::Assign, "declaration initializer")?;
        let value = self.parse_expr()?;
        self.eat(&Tok::Semicolon);
        if is_const {
            Ok(Stmt::ConstDecl { name, value, span })
        } else {
            Ok(Stmt::VarDecl { name, value, span })
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Tok::If, "if statement")?;
        self.no_struct_lit = true;
        let cond = self.parse_expr()?;
        self.no_struct_lit = false;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat(&Tok::Else) {
            if self.check(&Tok::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_branch, else_branch, span })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Tok::While, "while statement")?;
        self.no_struct_lit = true;
        let cond = self.parse_expr()?;
        self.no_struct_lit = false;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body, span })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        self.expect(Tok::For, "for statement")?;
        self.no_struct_lit = true;
        let init = if self.check(&Tok::Var) {
            Some(Box::new(self.parse_var_decl(false)?))
        } else {
            None
        };
        self.eat(&Tok::Semicolon);
        let cond = if self.check(&Tok::Semicolon) { None } else { Some(self.parse_expr()?) };
        self.eat(&Tok::Semicolon);
        let step = if self.check(&Tok::LBrace) {
            None
        } else {
            Some(Box::new(self.parse_expr_or_assign_stmt_no_semi()?))
        };
        self.no_struct_lit = false;
        let body = self.parse_block()?;
        Ok(Stmt::For { init, cond, step, body, span })
    }

    fn parse_expr_or_assign_stmt_no_semi(&mut self) -> PResult<Stmt> {
        let span = self.peek_span();
        let expr = self.parse_expr()?;
        if self.eat(&Tok::Assign) {
            let value = self.parse_expr()?;
            Ok(Stmt::Assignment { target: expr, value, span })
        } else {
            Ok(Stmt::Expr(expr))
        }
    }

    fn parse_expr_or_assign_stmt(&mut self) -> PResult<Stmt> {
        let stmt = self.parse_expr_or_assign_stmt_no_semi()?;
        self.eat(&Tok::Semicolon);
        Ok(stmt)
    }

    // ---- expressions (precedence climbing) -----------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&Tok::Or) {
            let span = self.peek_span();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Infix {
                op: InfixOp::Or,
                span: left.span().merge(right.span()).merge(span),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.check(&Tok::And) {
            let span = self.peek_span();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Infix {
                op: InfixOp::And,
                span: left.span().merge(right.span()).merge(span),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Tok::Eq => InfixOp::Eq,
                Tok::Ne => InfixOp::Ne,
                _ => break,
            };
            let span = self.peek_span();
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Infix {
                op,
                span: left.span().merge(right.span()).merge(span),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => InfixOp::Lt,
                Tok::Gt => InfixOp::Gt,
                Tok::Le => InfixOp::Le,
                Tok::Ge => InfixOp::Ge,
                _ => break,
            };
            let span = self.peek_span();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Infix {
                op,
                span: left.span().merge(right.span()).merge(span),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => InfixOp::Add,
                Tok::Minus => InfixOp::Sub,
                _ => break,
            };
            let span = self.peek_span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Infix {
                op,
                span: left.span().merge(right.span()).merge(span),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => InfixOp::Mul,
                Tok::Slash => InfixOp::Div,
                Tok::Percent => InfixOp::Mod,
                _ => break,
            };
            let span = self.peek_span();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Infix {
                op,
                span: left.span().merge(right.span()).merge(span),
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match self.peek() {
            Tok::Minus => {
                let span = self.peek_span();
                self.advance();
                let expr = self.parse_unary()?;
                let span = span.merge(expr.span());
                Ok(Expr::Prefix { op: PrefixOp::Neg, expr: Box::new(expr), span })
            }
            Tok::Not => {
                let span = self.peek_span();
                self.advance();
                let expr = self.parse_unary()?;
                let span = span.merge(expr.span());
                Ok(Expr::Prefix { op: PrefixOp::Not, expr: Box::new(expr), span })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    let start = expr.span();
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Tok::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.peek_span();
                    self.expect(Tok::RParen, "call arguments")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        span: start.merge(end),
                    };
                }
                Tok::LBracket => {
                    let start = expr.span();
                    self.advance();
                    let key = self.parse_expr()?;
                    let end = self.peek_span();
                    self.expect(Tok::RBracket, "index expression")?;
                    expr = Expr::Index {
                        collection: Box::new(expr),
                        key: Box::new(key),
                        span: start.merge(end),
                    };
                }
                Tok::Dot => {
                    let start = expr.span();
                    self.advance();
                    let (name, name_span) = self.expect_ident("field access")?;
                    let span = start.merge(name_span);
                    expr = match &expr {
                        Expr::Identifier { name: base, .. } if self.enum_names.contains(base) => {
                            Expr::EnumRef { type_name: base.clone(), variant: name, span }
                        }
                        _ => Expr::Field { record: Box::new(expr), name, span },
                    };
                }
                Tok::LBrace if !self.no_struct_lit => {
                    if let Expr::Identifier { name, span } = &expr {
                        let type_name = name.clone();
                        let start = *span;
                        expr = self.parse_struct_lit(type_name, start)?;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_struct_lit(&mut self, type_name: String, start: Span) -> PResult<Expr> {
        self.expect(Tok::LBrace, "struct literal")?;
        let mut fields = Vec::new();
        while !self.check(&Tok::RBrace) {
            let (fname, _) = self.expect_ident("struct field name")?;
            self.expect(Tok::Colon, "struct field value")?;
            let value = self.parse_expr()?;
            fields.push((fname, value));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        let end = self.peek_span();
        self.expect(Tok::RBrace, "struct literal")?;
        Ok(Expr::StructLit { type_name, fields, span: start.merge(end) })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.peek_span();
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::IntLiteral { value: v, span })
            }
            Tok::Float(v) => {
                self.advance();
                Ok(Expr::FloatLiteral { value: v, span })
            }
            Tok::True => {
                self.advance();
                Ok(Expr::BoolLiteral { value: true, span })
            }
            Tok::False => {
                self.advance();
                Ok(Expr::BoolLiteral { value: false, span })
            }
            Tok::Nil => {
                self.advance();
                Ok(Expr::NilLiteral { span })
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::StringLiteral { value: s, span })
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(Expr::Identifier { name, span })
            }
            Tok::LParen => {
                self.advance();
                let saved = self.no_struct_lit;
                self.no_struct_lit = false;
                let expr = self.parse_expr()?;
                self.no_struct_lit = saved;
                self.expect(Tok::RParen, "parenthesised expression")?;
                Ok(expr)
            }
            Tok::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&Tok::RBracket) {
                    loop {
                        elements.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                let end = self.peek_span();
                self.expect(Tok::RBracket, "array literal")?;
                Ok(Expr::ArrayLit { elements, span: span.merge(end) })
            }
            Tok::Map => {
                self.advance();
                self.expect(Tok::LBracket, "map literal key type")?;
                self.parse_type()?;
                self.expect(Tok::RBracket, "map literal key type")?;
                self.parse_type()?;
                self.expect(Tok::LBrace, "map literal body")?;
                let mut pairs = Vec::new();
                if !self.check(&Tok::RBrace) {
                    loop {
                        let key = self.parse_expr()?;
                        self.expect(Tok::Colon, "map literal entry")?;
                        let value = self.parse_expr()?;
                        pairs.push((key, value));
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                let end = self.peek_span();
                self.expect(Tok::RBrace, "map literal body")?;
                Ok(Expr::MapLit { pairs, span: span.merge(end) })
            }
            Tok::Func => {
                self.advance();
                let params = self.parse_param_list()?;
                if self.eat(&Tok::Colon) {
                    self.parse_type()?;
                }
                let body = self.parse_block()?;
                Ok(Expr::FunctionLit { params, body, span })
            }
            other => Err(ParseError::InvalidSyntax {
                context: format!("expression, found {:?}", other),
                span,
            }),
        }
    }
}

pub fn parse(toks: Vec<Token>) -> PResult<Program> {
    Parser::new(toks).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_src(src: &str) -> Program {
        let toks = Lexer::new(src).tokenize().unwrap();
        parse(toks).unwrap()
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let prog = parse_src("print(1+2*3);");
        assert_eq!(prog.items.len(), 1);
    }

    #[test]
    fn parses_factorial_function() {
        let prog = parse_src(
            "func fact(n:int):int{ if n<=1{return 1} return n*fact(n-1) }",
        );
        match &prog.items[0] {
            Item::FuncDecl(f) => {
                assert_eq!(f.name, "fact");
                assert_eq!(f.params, vec!["n".to_string()]);
            }
            _ => panic!("expected function declaration"),
        }
    }

    #[test]
    fn parses_map_literal() {
        let prog = parse_src(r#"var m=map[string]int{"a":1,"b":2};"#);
        match &prog.items[0] {
            Item::Stmt(Stmt::VarDecl { value: Expr::MapLit { pairs, .. }, .. }) => {
                assert_eq!(pairs.len(), 2);
            }
            _ => panic!("expected map literal var decl"),
        }
    }

    #[test]
    fn parses_for_loop() {
        let prog = parse_src("for var i:int=0;i<3;i=i+1{ print(i*i) }");
        assert!(matches!(&prog.items[0], Item::Stmt(Stmt::For { .. })));
    }

    #[test]
    fn parses_nested_function_literal() {
        let prog = parse_src(
            "func make(x:int):func():int{ return func():int{ return x } }",
        );
        assert!(matches!(&prog.items[0], Item::FuncDecl(_)));
    }

    #[test]
    fn if_condition_does_not_swallow_struct_literal_brace() {
        let prog = parse_src("if x { print(1) }");
        match &prog.items[0] {
            Item::Stmt(Stmt::If { cond, then_branch, .. }) => {
                assert!(matches!(cond, Expr::Identifier { .. }));
                assert_eq!(then_branch.len(), 1);
            }
            _ => panic!("expected if statement"),
        }
    }

    #[test]
    fn enum_reference_resolved_against_prescan() {
        let prog = parse_src("enum Color{Red,Green,Blue} var c=Color.Red;");
        match &prog.items[1] {
            Item::Stmt(Stmt::VarDecl { value: Expr::EnumRef { type_name, variant, .. }, .. }) => {
                assert_eq!(type_name, "Color");
                assert_eq!(variant, "Red");
            }
            _ => panic!("expected enum reference"),
        }
    }
}
