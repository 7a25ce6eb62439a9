//! AST node types produced by the parser and consumed by the evaluator,
//! serializer, and bundler.

use std::sync::Arc;

use crate::value::TypeTag;

/// A statement with its source line (1-based; 0 means unknown, e.g. after a
/// deserialization without debug info).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

/// An expression with its source line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

/// A function parameter: name, optional type tag, optional `ref` modifier.
///
/// `ref` is accepted for heap-typed parameters where it documents intent;
/// heap payloads are reference-counted so the semantics are unchanged.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param {
    pub name: String,
    pub tag: Option<TypeTag>,
    pub by_ref: bool,
}

/// An anonymous or named function literal. Named function statements are
/// sugar for `let name = fn ...` and produce this same node.
///
/// The body is shared so that evaluating the same literal repeatedly (e.g.
/// inside a loop) does not clone the statement tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FnLiteral {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub ret: Option<TypeTag>,
    pub is_async: bool,
    pub body: Arc<[Stmt]>,
}

/// A field in a `define object` declaration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldDef {
    pub name: String,
    /// Marked with `?`; optional fields may be omitted at instantiation.
    /// A field with a default is optional whether or not it carries `?`.
    pub optional: bool,
    pub tag: Option<TypeTag>,
    pub default: Option<Expr>,
}

/// The three import statement shapes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ImportSpec {
    /// `import { a, b as c } from "path"`
    Names {
        names: Vec<(String, Option<String>)>,
        path: String,
    },
    /// `import * as ns from "path"`
    Namespace { alias: String, path: String },
    /// `import "path"` — load for side effects only.
    SideEffect { path: String },
}

/// The export statement shapes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExportSpec {
    /// `export let|const|fn ...` — declares locally and publishes.
    Decl(Box<Stmt>),
    /// `export { a, b as c }` or `export { a } from "path"` (re-export).
    Names {
        names: Vec<(String, Option<String>)>,
        from: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StmtKind {
    /// `let`/`const` binding; named `fn` statements lower to this with a
    /// function-literal initializer.
    Let {
        name: String,
        tag: Option<TypeTag>,
        init: Option<Expr>,
        is_const: bool,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    /// `for name in expr` — iterates arrays, strings (by codepoint), and
    /// channels (until closed).
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catch: Option<(String, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    },
    /// `defer expr` — the expression is captured with its environment and
    /// evaluated when the enclosing function exits, LIFO.
    Defer(Expr),
    Switch {
        subject: Expr,
        cases: Vec<(Expr, Vec<Stmt>)>,
        default: Option<Vec<Stmt>>,
    },
    DefineObject {
        name: String,
        fields: Vec<FieldDef>,
    },
    DefineEnum {
        name: String,
        variants: Vec<String>,
    },
    Import(ImportSpec),
    Export(ExportSpec),
    /// `extern fn name(params): ret;` — registers an FFI symbol, resolved at
    /// first call. The optional library string pins the source library.
    ExternFn {
        name: String,
        lib: Option<String>,
        params: Vec<Param>,
        ret: Option<TypeTag>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `&&` — short-circuiting.
    And,
    /// `||` — short-circuiting.
    Or,
    /// `??` — evaluates the right side only when the left is `null`.
    Coalesce,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprKind {
    Null,
    Bool(bool),
    /// Integer literal. The raw magnitude is kept unsigned; the sign comes
    /// from an enclosing unary minus. Without a suffix the producer type is
    /// `i64`, or `u64` when the magnitude exceeds `i64::MAX`.
    Int { value: u64, tag: Option<TypeTag> },
    Float { value: f64, tag: Option<TypeTag> },
    Str(String),
    Rune(char),
    Ident(String),
    /// `self` — tagged by the parser, resolved by the evaluator from the
    /// call-site binding; not expanded syntactically.
    SelfRef,
    /// A bare type name in expression position (`i32`, `string`).
    TypeName(TypeTag),
    Array(Vec<Expr>),
    /// `{ a: 1 }` or `Point { x: 1.0 }` — the latter instantiates a nominal
    /// template registered by `define object`.
    ObjectLit {
        type_name: Option<String>,
        fields: Vec<(String, Expr)>,
    },
    FnLit(FnLiteral),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Assignment or compound assignment; target is an identifier, index, or
    /// property expression.
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
    },
    Property {
        obj: Box<Expr>,
        name: String,
        /// `?.` — yields `null` instead of raising `NullAccess` when the
        /// receiver is `null`.
        optional: bool,
    },
    Await(Box<Expr>),
}

impl Stmt {
    pub fn new(kind: StmtKind, line: u32) -> Self {
        Self { kind, line }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Self { kind, line }
    }
}
