use std::{str::FromStr, sync::Arc};

use crate::{
    ast::{BinaryOp, ExportSpec, Expr, ExprKind, FieldDef, FnLiteral, ImportSpec, Param, Stmt, StmtKind, UnaryOp},
    exception::ParseDiagnostic,
    lexer::{Keyword, Lexer, Token, TokenKind},
    value::TypeTag,
};

/// Maximum nesting depth for expressions during parsing. Prevents stack
/// overflow from pathological inputs like `((((((...))))))`.
const MAX_NESTING_DEPTH: u32 = 200;

/// Parses a whole program. Returns the statement list, or the full batch of
/// diagnostics when anything failed — the parser recovers at statement
/// boundaries so a single pass can surface several errors.
pub(crate) fn parse(src: &str) -> Result<Vec<Stmt>, Vec<ParseDiagnostic>> {
    let mut parser = Parser::new(src);
    let stmts = parser.program();
    if parser.diags.is_empty() {
        Ok(stmts)
    } else {
        Err(parser.diags)
    }
}

/// Marker for an already-reported parse failure; the diagnostic itself lives
/// in `Parser::diags`.
struct ParseFail;

type PResult<T> = Result<T, ParseFail>;

struct Parser<'src> {
    lexer: Lexer<'src>,
    tok: Token,
    diags: Vec<ParseDiagnostic>,
    /// Nonzero while parsing `if`/`while`/`for`/`switch` headers, where a
    /// `{` begins the body rather than an object literal.
    no_obj_literal: u32,
    depth: u32,
}

impl<'src> Parser<'src> {
    fn new(src: &'src str) -> Self {
        let mut lexer = Lexer::new(src);
        let tok = lexer.next_token();
        Self {
            lexer,
            tok,
            diags: Vec::new(),
            no_obj_literal: 0,
            depth: 0,
        }
    }

    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.tok, self.lexer.next_token())
    }

    fn line(&self) -> u32 {
        self.tok.line
    }

    fn error<T>(&mut self, message: impl Into<String>) -> PResult<T> {
        self.diags.push(ParseDiagnostic {
            line: self.tok.line,
            message: message.into(),
        });
        Err(ParseFail)
    }

    fn unexpected<T>(&mut self, wanted: &str) -> PResult<T> {
        // A lexer error carries its own message; prefer it.
        if let TokenKind::Error(msg) = &self.tok.kind {
            let msg = msg.clone();
            self.advance();
            return self.error(msg);
        }
        let found = self.tok.kind.describe();
        self.error(format!("expected {wanted}, found {found}"))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.tok.kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Kw(kw))
    }

    fn expect(&mut self, kind: &TokenKind, wanted: &str) -> PResult<()> {
        if self.eat(kind) { Ok(()) } else { self.unexpected(wanted) }
    }

    fn expect_ident(&mut self, wanted: &str) -> PResult<String> {
        match &self.tok.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.unexpected(wanted),
        }
    }

    fn expect_string(&mut self, wanted: &str) -> PResult<String> {
        match &self.tok.kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => self.unexpected(wanted),
        }
    }

    /// Skips to the next statement boundary: past the next `;`, or up to a
    /// closing `}` / end of input. Always makes progress.
    fn synchronize(&mut self) {
        loop {
            match &self.tok.kind {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RBrace | TokenKind::Eof => return,
                TokenKind::LBrace => {
                    // Skip a balanced block so we do not resynchronize into
                    // the middle of a nested body.
                    self.advance();
                    let mut depth = 1u32;
                    while depth > 0 {
                        match &self.tok.kind {
                            TokenKind::LBrace => depth += 1,
                            TokenKind::RBrace => depth -= 1,
                            TokenKind::Eof => return,
                            _ => {}
                        }
                        self.advance();
                    }
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn program(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while self.tok.kind != TokenKind::Eof {
            match self.stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(ParseFail) => {
                    self.synchronize();
                    // A stray `}` at top level would stall recovery; eat it.
                    if self.tok.kind == TokenKind::RBrace {
                        self.advance();
                    }
                }
            }
        }
        stmts
    }

    /// `{ stmts }` with per-statement recovery, so one bad statement does not
    /// hide errors in its siblings.
    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        loop {
            match &self.tok.kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(stmts);
                }
                TokenKind::Eof => return self.unexpected("`}`"),
                _ => match self.stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(ParseFail) => self.synchronize(),
                },
            }
        }
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        match &self.tok.kind {
            TokenKind::Kw(Keyword::Let) => {
                self.advance();
                self.let_stmt(false, line)
            }
            TokenKind::Kw(Keyword::Const) => {
                self.advance();
                self.let_stmt(true, line)
            }
            TokenKind::Kw(Keyword::Fn) => {
                self.advance();
                self.fn_stmt(false, line)
            }
            TokenKind::Kw(Keyword::Async) => {
                self.advance();
                self.expect(&TokenKind::Kw(Keyword::Fn), "`fn` after `async`")?;
                self.fn_stmt(true, line)
            }
            TokenKind::Kw(Keyword::Define) => {
                self.advance();
                self.define_stmt(line)
            }
            TokenKind::Kw(Keyword::Import) => {
                self.advance();
                self.import_stmt(line)
            }
            TokenKind::Kw(Keyword::Export) => {
                self.advance();
                self.export_stmt(line)
            }
            TokenKind::Kw(Keyword::Extern) => {
                self.advance();
                self.extern_stmt(line)
            }
            TokenKind::Kw(Keyword::If) => {
                self.advance();
                self.if_stmt(line)
            }
            TokenKind::Kw(Keyword::While) => {
                self.advance();
                let cond = self.header_expr()?;
                let body = self.block()?;
                Ok(Stmt::new(StmtKind::While { cond, body }, line))
            }
            TokenKind::Kw(Keyword::For) => {
                self.advance();
                let var = self.expect_ident("loop variable")?;
                self.expect(&TokenKind::Kw(Keyword::In), "`in`")?;
                let iter = self.header_expr()?;
                let body = self.block()?;
                Ok(Stmt::new(StmtKind::For { var, iter, body }, line))
            }
            TokenKind::Kw(Keyword::Try) => {
                self.advance();
                self.try_stmt(line)
            }
            TokenKind::Kw(Keyword::Switch) => {
                self.advance();
                self.switch_stmt(line)
            }
            TokenKind::Kw(Keyword::Break) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "`;` after `break`")?;
                Ok(Stmt::new(StmtKind::Break, line))
            }
            TokenKind::Kw(Keyword::Continue) => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "`;` after `continue`")?;
                Ok(Stmt::new(StmtKind::Continue, line))
            }
            TokenKind::Kw(Keyword::Return) => {
                self.advance();
                let value = if self.tok.kind == TokenKind::Semicolon {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&TokenKind::Semicolon, "`;` after `return`")?;
                Ok(Stmt::new(StmtKind::Return(value), line))
            }
            TokenKind::Kw(Keyword::Throw) => {
                self.advance();
                let value = self.expr()?;
                self.expect(&TokenKind::Semicolon, "`;` after `throw`")?;
                Ok(Stmt::new(StmtKind::Throw(value), line))
            }
            TokenKind::Kw(Keyword::Defer) => {
                self.advance();
                let expr = self.expr()?;
                self.expect(&TokenKind::Semicolon, "`;` after `defer`")?;
                Ok(Stmt::new(StmtKind::Defer(expr), line))
            }
            _ => {
                let expr = self.expr()?;
                self.expect(&TokenKind::Semicolon, "`;` after expression")?;
                Ok(Stmt::new(StmtKind::Expr(expr), line))
            }
        }
    }

    fn let_stmt(&mut self, is_const: bool, line: u32) -> PResult<Stmt> {
        let name = self.expect_ident("binding name")?;
        let tag = if self.eat(&TokenKind::Colon) {
            Some(self.type_annotation()?)
        } else {
            None
        };
        let init = if self.eat(&TokenKind::Eq) { Some(self.expr()?) } else { None };
        if is_const && init.is_none() {
            return self.error("`const` binding requires an initializer");
        }
        self.expect(&TokenKind::Semicolon, "`;` after binding")?;
        Ok(Stmt::new(
            StmtKind::Let {
                name,
                tag,
                init,
                is_const,
            },
            line,
        ))
    }

    /// Named function statement — sugar for `let name = fn ...`; both forms
    /// produce the same function-literal node.
    fn fn_stmt(&mut self, is_async: bool, line: u32) -> PResult<Stmt> {
        let name = self.expect_ident("function name")?;
        let lit = self.fn_rest(Some(name.clone()), is_async)?;
        Ok(Stmt::new(
            StmtKind::Let {
                name,
                tag: None,
                init: Some(Expr::new(ExprKind::FnLit(lit), line)),
                is_const: false,
            },
            line,
        ))
    }

    /// Parameter list, optional return annotation, and body. The leading
    /// `fn name?` has already been consumed.
    fn fn_rest(&mut self, name: Option<String>, is_async: bool) -> PResult<FnLiteral> {
        self.expect(&TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let by_ref = self.eat_kw(Keyword::Ref);
                let pname = self.expect_ident("parameter name")?;
                let tag = if self.eat(&TokenKind::Colon) {
                    Some(self.type_annotation()?)
                } else {
                    None
                };
                params.push(Param {
                    name: pname,
                    tag,
                    by_ref,
                });
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma, "`,` or `)` in parameter list")?;
            }
        }
        let ret = if self.eat(&TokenKind::Colon) {
            Some(self.type_annotation()?)
        } else {
            None
        };
        // The body must parse as statements even when the literal appears in
        // a header expression.
        let saved = std::mem::take(&mut self.no_obj_literal);
        let body = self.block();
        self.no_obj_literal = saved;
        Ok(FnLiteral {
            name,
            params,
            ret,
            is_async,
            body: Arc::from(body?),
        })
    }

    fn define_stmt(&mut self, line: u32) -> PResult<Stmt> {
        if self.eat_kw(Keyword::Object) {
            let name = self.expect_ident("object type name")?;
            self.expect(&TokenKind::LBrace, "`{`")?;
            let mut fields = Vec::new();
            while !self.eat(&TokenKind::RBrace) {
                let fname = self.expect_ident("field name")?;
                let optional = self.eat(&TokenKind::Question);
                let tag = if self.eat(&TokenKind::Colon) {
                    Some(self.type_annotation()?)
                } else {
                    None
                };
                let default = if self.eat(&TokenKind::Eq) { Some(self.expr()?) } else { None };
                fields.push(FieldDef {
                    name: fname,
                    optional,
                    tag,
                    default,
                });
                if !self.eat(&TokenKind::Comma) {
                    self.expect(&TokenKind::RBrace, "`,` or `}` in field list")?;
                    break;
                }
            }
            Ok(Stmt::new(StmtKind::DefineObject { name, fields }, line))
        } else if self.eat_kw(Keyword::Enum) {
            let name = self.expect_ident("enum name")?;
            self.expect(&TokenKind::LBrace, "`{`")?;
            let mut variants = Vec::new();
            while !self.eat(&TokenKind::RBrace) {
                variants.push(self.expect_ident("variant name")?);
                if !self.eat(&TokenKind::Comma) {
                    self.expect(&TokenKind::RBrace, "`,` or `}` in variant list")?;
                    break;
                }
            }
            Ok(Stmt::new(StmtKind::DefineEnum { name, variants }, line))
        } else {
            self.unexpected("`object` or `enum` after `define`")
        }
    }

    fn import_stmt(&mut self, line: u32) -> PResult<Stmt> {
        let spec = match &self.tok.kind {
            TokenKind::Str(path) => {
                let path = path.clone();
                self.advance();
                ImportSpec::SideEffect { path }
            }
            TokenKind::Star => {
                self.advance();
                self.expect(&TokenKind::Kw(Keyword::As), "`as` after `import *`")?;
                let alias = self.expect_ident("namespace alias")?;
                self.expect(&TokenKind::Kw(Keyword::From), "`from`")?;
                let path = self.expect_string("module path string")?;
                ImportSpec::Namespace { alias, path }
            }
            TokenKind::LBrace => {
                let names = self.name_list()?;
                self.expect(&TokenKind::Kw(Keyword::From), "`from`")?;
                let path = self.expect_string("module path string")?;
                ImportSpec::Names { names, path }
            }
            _ => return self.unexpected("import specifier"),
        };
        self.expect(&TokenKind::Semicolon, "`;` after import")?;
        Ok(Stmt::new(StmtKind::Import(spec), line))
    }

    fn export_stmt(&mut self, line: u32) -> PResult<Stmt> {
        match &self.tok.kind {
            TokenKind::Kw(Keyword::Let | Keyword::Const | Keyword::Fn | Keyword::Async) => {
                let inner = self.stmt()?;
                Ok(Stmt::new(StmtKind::Export(ExportSpec::Decl(Box::new(inner))), line))
            }
            TokenKind::LBrace => {
                let names = self.name_list()?;
                let from = if self.eat_kw(Keyword::From) {
                    Some(self.expect_string("module path string")?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semicolon, "`;` after export")?;
                Ok(Stmt::new(StmtKind::Export(ExportSpec::Names { names, from }), line))
            }
            _ => self.unexpected("declaration or `{` after `export`"),
        }
    }

    /// `{ a, b as c }`
    fn name_list(&mut self) -> PResult<Vec<(String, Option<String>)>> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut names = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            let name = self.expect_ident("export name")?;
            let alias = if self.eat_kw(Keyword::As) {
                Some(self.expect_ident("alias")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace, "`,` or `}` in name list")?;
                break;
            }
        }
        Ok(names)
    }

    fn extern_stmt(&mut self, line: u32) -> PResult<Stmt> {
        let lib = match &self.tok.kind {
            TokenKind::Str(path) => {
                let path = path.clone();
                self.advance();
                Some(path)
            }
            _ => None,
        };
        self.expect(&TokenKind::Kw(Keyword::Fn), "`fn` after `extern`")?;
        let name = self.expect_ident("extern function name")?;
        self.expect(&TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let pname = self.expect_ident("parameter name")?;
                self.expect(&TokenKind::Colon, "`:` (extern parameters require a type)")?;
                let tag = self.type_annotation()?;
                params.push(Param {
                    name: pname,
                    tag: Some(tag),
                    by_ref: false,
                });
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma, "`,` or `)` in parameter list")?;
            }
        }
        let ret = if self.eat(&TokenKind::Colon) {
            Some(self.type_annotation()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, "`;` after extern declaration")?;
        Ok(Stmt::new(StmtKind::ExternFn { name, lib, params, ret }, line))
    }

    fn if_stmt(&mut self, line: u32) -> PResult<Stmt> {
        let cond = self.header_expr()?;
        let then_body = self.block()?;
        let else_body = if self.eat_kw(Keyword::Else) {
            if self.tok.kind == TokenKind::Kw(Keyword::If) {
                let else_line = self.line();
                self.advance();
                Some(vec![self.if_stmt(else_line)?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_body,
                else_body,
            },
            line,
        ))
    }

    fn try_stmt(&mut self, line: u32) -> PResult<Stmt> {
        let body = self.block()?;
        let catch = if self.eat_kw(Keyword::Catch) {
            self.expect(&TokenKind::LParen, "`(`")?;
            let name = self.expect_ident("catch binding")?;
            self.expect(&TokenKind::RParen, "`)`")?;
            Some((name, self.block()?))
        } else {
            None
        };
        let finally = if self.eat_kw(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return self.error("`try` requires at least one `catch` or `finally` block");
        }
        Ok(Stmt::new(StmtKind::Try { body, catch, finally }, line))
    }

    fn switch_stmt(&mut self, line: u32) -> PResult<Stmt> {
        let subject = self.header_expr()?;
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut cases: Vec<(Expr, Vec<Stmt>)> = Vec::new();
        let mut default: Option<Vec<Stmt>> = None;
        loop {
            match &self.tok.kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(Stmt::new(
                        StmtKind::Switch { subject, cases, default },
                        line,
                    ));
                }
                TokenKind::Kw(Keyword::Case) => {
                    self.advance();
                    let value = self.expr()?;
                    self.expect(&TokenKind::Colon, "`:` after case value")?;
                    cases.push((value, self.case_body()?));
                }
                TokenKind::Kw(Keyword::Default) => {
                    self.advance();
                    self.expect(&TokenKind::Colon, "`:` after `default`")?;
                    if default.is_some() {
                        return self.error("duplicate `default` in switch");
                    }
                    default = Some(self.case_body()?);
                }
                _ => return self.unexpected("`case`, `default`, or `}`"),
            }
        }
    }

    /// Statements until the next `case`/`default`/`}`. Cases do not fall
    /// through.
    fn case_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match &self.tok.kind {
                TokenKind::Kw(Keyword::Case | Keyword::Default) | TokenKind::RBrace => return Ok(stmts),
                TokenKind::Eof => return self.unexpected("`}`"),
                _ => match self.stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(ParseFail) => self.synchronize(),
                },
            }
        }
    }

    /// A condition/subject expression, with object literals suppressed so the
    /// following `{` reads as the body.
    fn header_expr(&mut self) -> PResult<Expr> {
        self.no_obj_literal += 1;
        let result = self.expr();
        self.no_obj_literal -= 1;
        result
    }

    /// Type annotation after `:`. Built-in names resolve to their tag; any
    /// other identifier names a nominal object type and checks as `object`.
    fn type_annotation(&mut self) -> PResult<TypeTag> {
        match &self.tok.kind {
            TokenKind::TypeName(tag) => {
                let tag = *tag;
                self.advance();
                Ok(tag)
            }
            TokenKind::Ident(name) => {
                let tag = TypeTag::from_str(name).unwrap_or(TypeTag::Object);
                self.advance();
                Ok(tag)
            }
            TokenKind::Kw(Keyword::Fn) => {
                self.advance();
                Ok(TypeTag::Function)
            }
            _ => self.unexpected("type name"),
        }
    }

    // === Expressions ===

    fn expr(&mut self) -> PResult<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            return self.error("expression nesting too deep");
        }
        self.depth += 1;
        let result = self.assignment();
        self.depth -= 1;
        result
    }

    /// Assignment is lowest precedence and right-associative. Compound
    /// operators desugar to `target op= value` nodes carrying the operator.
    fn assignment(&mut self) -> PResult<Expr> {
        let lhs = self.binary(0)?;
        let op = match &self.tok.kind {
            TokenKind::Eq => None,
            TokenKind::PlusEq => Some(BinaryOp::Add),
            TokenKind::MinusEq => Some(BinaryOp::Sub),
            TokenKind::StarEq => Some(BinaryOp::Mul),
            TokenKind::SlashEq => Some(BinaryOp::Div),
            TokenKind::PercentEq => Some(BinaryOp::Rem),
            TokenKind::AmpEq => Some(BinaryOp::BitAnd),
            TokenKind::PipeEq => Some(BinaryOp::BitOr),
            TokenKind::CaretEq => Some(BinaryOp::BitXor),
            TokenKind::ShlEq => Some(BinaryOp::Shl),
            TokenKind::ShrEq => Some(BinaryOp::Shr),
            _ => return Ok(lhs),
        };
        let line = self.line();
        if !matches!(
            lhs.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Property { .. }
        ) {
            return self.error("invalid assignment target");
        }
        self.advance();
        let value = self.expr()?;
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(lhs),
                op,
                value: Box::new(value),
            },
            line,
        ))
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let (op, bp) = match &self.tok.kind {
            TokenKind::QuestionQuestion => (BinaryOp::Coalesce, 1),
            TokenKind::PipePipe => (BinaryOp::Or, 2),
            TokenKind::AmpAmp => (BinaryOp::And, 3),
            TokenKind::EqEq => (BinaryOp::Eq, 4),
            TokenKind::BangEq => (BinaryOp::Ne, 4),
            TokenKind::Lt => (BinaryOp::Lt, 5),
            TokenKind::Le => (BinaryOp::Le, 5),
            TokenKind::Gt => (BinaryOp::Gt, 5),
            TokenKind::Ge => (BinaryOp::Ge, 5),
            TokenKind::Pipe => (BinaryOp::BitOr, 6),
            TokenKind::Caret => (BinaryOp::BitXor, 7),
            TokenKind::Amp => (BinaryOp::BitAnd, 8),
            TokenKind::Shl => (BinaryOp::Shl, 9),
            TokenKind::Shr => (BinaryOp::Shr, 9),
            TokenKind::Plus => (BinaryOp::Add, 10),
            TokenKind::Minus => (BinaryOp::Sub, 10),
            TokenKind::Star => (BinaryOp::Mul, 11),
            TokenKind::Slash => (BinaryOp::Div, 11),
            TokenKind::Percent => (BinaryOp::Rem, 11),
            _ => return None,
        };
        Some((op, bp))
    }

    /// Precedence-climbing loop over the left-associative binary ladder.
    fn binary(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, bp)) = self.binary_op() {
            if bp < min_bp {
                break;
            }
            let line = self.line();
            self.advance();
            let rhs = self.binary(bp + 1)?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let op = match &self.tok.kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Kw(Keyword::Await) => {
                self.advance();
                let expr = self.unary()?;
                return Ok(Expr::new(ExprKind::Await(Box::new(expr)), line));
            }
            TokenKind::Kw(Keyword::Ref) => {
                return self.error("`ref` is only valid on function parameters");
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let expr = self.unary()?;
                Ok(Expr::new(ExprKind::Unary { op, expr: Box::new(expr) }, line))
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let line = self.line();
            match &self.tok.kind {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        // Arguments are full expressions; the header flag does
                        // not apply inside the parentheses.
                        let saved = std::mem::take(&mut self.no_obj_literal);
                        loop {
                            match self.expr() {
                                Ok(arg) => args.push(arg),
                                Err(fail) => {
                                    self.no_obj_literal = saved;
                                    return Err(fail);
                                }
                            }
                            if self.eat(&TokenKind::RParen) {
                                break;
                            }
                            if let Err(fail) = self.expect(&TokenKind::Comma, "`,` or `)` in argument list") {
                                self.no_obj_literal = saved;
                                return Err(fail);
                            }
                        }
                        self.no_obj_literal = saved;
                    }
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let saved = std::mem::take(&mut self.no_obj_literal);
                    let index = self.expr();
                    self.no_obj_literal = saved;
                    let index = index?;
                    self.expect(&TokenKind::RBracket, "`]`")?;
                    expr = Expr::new(
                        ExprKind::Index {
                            obj: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident("property name")?;
                    expr = Expr::new(
                        ExprKind::Property {
                            obj: Box::new(expr),
                            name,
                            optional: false,
                        },
                        line,
                    );
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    let name = self.expect_ident("property name")?;
                    expr = Expr::new(
                        ExprKind::Property {
                            obj: Box::new(expr),
                            name,
                            optional: true,
                        },
                        line,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let line = self.line();
        match &self.tok.kind {
            TokenKind::Int { value, tag } => {
                let (value, tag) = (*value, *tag);
                self.advance();
                Ok(Expr::new(ExprKind::Int { value, tag }, line))
            }
            TokenKind::Float { value, tag } => {
                let (value, tag) = (*value, *tag);
                self.advance();
                Ok(Expr::new(ExprKind::Float { value, tag }, line))
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(Expr::new(ExprKind::Str(s), line))
            }
            TokenKind::Rune(c) => {
                let c = *c;
                self.advance();
                Ok(Expr::new(ExprKind::Rune(c), line))
            }
            TokenKind::Kw(Keyword::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), line))
            }
            TokenKind::Kw(Keyword::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), line))
            }
            TokenKind::Kw(Keyword::Null) => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, line))
            }
            TokenKind::Kw(Keyword::SelfKw) => {
                self.advance();
                Ok(Expr::new(ExprKind::SelfRef, line))
            }
            TokenKind::TypeName(tag) => {
                let tag = *tag;
                self.advance();
                Ok(Expr::new(ExprKind::TypeName(tag), line))
            }
            TokenKind::Kw(Keyword::Fn) => {
                self.advance();
                let name = match &self.tok.kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                let lit = self.fn_rest(name, false)?;
                Ok(Expr::new(ExprKind::FnLit(lit), line))
            }
            TokenKind::Kw(Keyword::Async) => {
                self.advance();
                self.expect(&TokenKind::Kw(Keyword::Fn), "`fn` after `async`")?;
                let name = match &self.tok.kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                let lit = self.fn_rest(name, true)?;
                Ok(Expr::new(ExprKind::FnLit(lit), line))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                if self.tok.kind == TokenKind::LBrace && self.no_obj_literal == 0 {
                    let fields = self.object_fields()?;
                    Ok(Expr::new(
                        ExprKind::ObjectLit {
                            type_name: Some(name),
                            fields,
                        },
                        line,
                    ))
                } else {
                    Ok(Expr::new(ExprKind::Ident(name), line))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let saved = std::mem::take(&mut self.no_obj_literal);
                let expr = self.expr();
                self.no_obj_literal = saved;
                let expr = expr?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                let saved = std::mem::take(&mut self.no_obj_literal);
                while !self.eat(&TokenKind::RBracket) {
                    match self.expr() {
                        Ok(item) => items.push(item),
                        Err(fail) => {
                            self.no_obj_literal = saved;
                            return Err(fail);
                        }
                    }
                    if self.eat(&TokenKind::RBracket) {
                        break;
                    }
                    if let Err(fail) = self.expect(&TokenKind::Comma, "`,` or `]` in array literal") {
                        self.no_obj_literal = saved;
                        return Err(fail);
                    }
                }
                self.no_obj_literal = saved;
                Ok(Expr::new(ExprKind::Array(items), line))
            }
            TokenKind::LBrace if self.no_obj_literal == 0 => {
                let fields = self.object_fields()?;
                Ok(Expr::new(
                    ExprKind::ObjectLit {
                        type_name: None,
                        fields,
                    },
                    line,
                ))
            }
            _ => self.unexpected("expression"),
        }
    }

    /// `{ name: expr, ... }` — shared by anonymous literals and nominal
    /// instantiation.
    fn object_fields(&mut self) -> PResult<Vec<(String, Expr)>> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let saved = std::mem::take(&mut self.no_obj_literal);
        let mut fields = Vec::new();
        let result = loop {
            if self.eat(&TokenKind::RBrace) {
                break Ok(fields);
            }
            let name = match self.expect_ident("field name") {
                Ok(name) => name,
                Err(fail) => break Err(fail),
            };
            if let Err(fail) = self.expect(&TokenKind::Colon, "`:` after field name") {
                break Err(fail);
            }
            match self.expr() {
                Ok(value) => fields.push((name, value)),
                Err(fail) => break Err(fail),
            }
            if self.eat(&TokenKind::RBrace) {
                break Ok(fields);
            }
            if let Err(fail) = self.expect(&TokenKind::Comma, "`,` or `}` in object literal") {
                break Err(fail);
            }
        };
        self.no_obj_literal = saved;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_and_batches_errors() {
        let src = "let = 1;\nlet y = 2;\nlet = 3;\n";
        let diags = parse(src).unwrap_err();
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].line, 1);
        assert_eq!(diags[1].line, 3);
    }

    #[test]
    fn try_requires_catch_or_finally() {
        let diags = parse("try { print(1); }").unwrap_err();
        assert!(diags[0].message.contains("catch"));
    }

    #[test]
    fn fn_statement_lowers_to_let() {
        let stmts = parse("fn add(a, b) { return a + b; }").unwrap();
        assert!(matches!(
            &stmts[0].kind,
            StmtKind::Let { name, init: Some(_), .. } if name == "add"
        ));
    }

    #[test]
    fn header_suppresses_object_literal() {
        let stmts = parse("if ready { go(); }").unwrap();
        assert!(matches!(&stmts[0].kind, StmtKind::If { .. }));
        let stmts = parse("let p = Point { x: 1.0 };").unwrap();
        assert!(matches!(&stmts[0].kind, StmtKind::Let { .. }));
    }
}
