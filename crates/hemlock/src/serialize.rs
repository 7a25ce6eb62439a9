//! Binary serialization of parsed ASTs: the `.hmlc` compiled-module format
//! and the zlib-wrapped `.hmlb` bundle container.
//!
//! The format is deterministic: the string table is deduplicated in
//! first-seen order, so serialize -> deserialize -> serialize is
//! byte-identical. Decoding validates the header and every string index
//! before constructing nodes and fails with a structured error on invalid
//! input.

use std::{fmt, io::Read as _, io::Write as _, sync::Arc};

use indexmap::IndexSet;

use crate::{
    ast::{BinaryOp, ExportSpec, Expr, ExprKind, FieldDef, FnLiteral, ImportSpec, Param, Stmt, StmtKind, UnaryOp},
    value::TypeTag,
};

/// `"HMLC"` in little-endian byte order.
pub(crate) const HMLC_MAGIC: u32 = 0x434C_4D48;
pub(crate) const HMLB_MAGIC: [u8; 4] = *b"HMLB";
pub(crate) const FORMAT_VERSION: u16 = 1;
/// Header flag: line numbers are present on every node.
pub(crate) const FLAG_DEBUG: u16 = 0x0001;
/// Header flag reserved for in-body compression; currently never set.
pub(crate) const FLAG_COMPRESS: u16 = 0x0002;

const HEADER_LEN: usize = 20;

/// Structured decoding failure. Nothing is partially constructed when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    BadMagic,
    UnsupportedVersion(u16),
    /// Input ended inside a field.
    Truncated,
    /// Input continued past the last declared statement.
    TrailingBytes,
    BadStringIndex(u32),
    /// A string-table entry was not valid UTF-8.
    BadString,
    /// An unknown node/operator/type discriminator.
    BadTag(u8),
    ChecksumMismatch,
    BadBundle(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a compiled Hemlock module (bad magic)"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            Self::Truncated => write!(f, "truncated input"),
            Self::TrailingBytes => write!(f, "trailing bytes after last statement"),
            Self::BadStringIndex(idx) => write!(f, "string index {idx} out of bounds"),
            Self::BadString => write!(f, "string table entry is not valid UTF-8"),
            Self::BadTag(tag) => write!(f, "unknown discriminator byte 0x{tag:02x}"),
            Self::ChecksumMismatch => write!(f, "body checksum mismatch"),
            Self::BadBundle(msg) => write!(f, "invalid bundle: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Serializes top-level statements into the `.hmlc` byte format. With
/// `debug` set, line numbers are retained (and the DEBUG header flag set).
pub(crate) fn serialize(stmts: &[Stmt], debug: bool) -> Vec<u8> {
    let mut enc = Encoder {
        buf: Vec::new(),
        strings: IndexSet::new(),
        debug,
    };
    for stmt in stmts {
        enc.stmt(stmt);
    }

    // Body: string table first, then the statement stream.
    let mut body = Vec::new();
    for s in &enc.strings {
        put_uvarint(&mut body, s.len() as u64);
        body.extend_from_slice(s.as_bytes());
    }
    body.extend_from_slice(&enc.buf);

    let mut crc = flate2::Crc::new();
    crc.update(&body);

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&HMLC_MAGIC.to_le_bytes());
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    let flags = if debug { FLAG_DEBUG } else { 0 };
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&(enc.strings.len() as u32).to_le_bytes());
    out.extend_from_slice(&(stmts.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Deserializes a `.hmlc` buffer back into statements.
pub(crate) fn deserialize(bytes: &[u8]) -> Result<Vec<Stmt>, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(if bytes.len() >= 4 && bytes[..4] != HMLC_MAGIC.to_le_bytes() {
            DecodeError::BadMagic
        } else {
            DecodeError::Truncated
        });
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != HMLC_MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
    let string_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let stmt_count = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let stored_crc = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);

    let body = &bytes[HEADER_LEN..];
    if stored_crc != 0 {
        let mut crc = flate2::Crc::new();
        crc.update(body);
        if crc.sum() != stored_crc {
            return Err(DecodeError::ChecksumMismatch);
        }
    }

    let mut dec = Decoder {
        bytes: body,
        pos: 0,
        strings: Vec::new(),
        debug: flags & FLAG_DEBUG != 0,
    };
    for _ in 0..string_count {
        let len = dec.uvarint()? as usize;
        let slice = dec.take(len)?;
        let s = std::str::from_utf8(slice)
            .map_err(|_| DecodeError::BadString)?
            .to_owned();
        dec.strings.push(s);
    }
    let mut stmts = Vec::with_capacity(stmt_count.min(4096) as usize);
    for _ in 0..stmt_count {
        stmts.push(dec.stmt()?);
    }
    if dec.pos != dec.bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(stmts)
}

/// Wraps a serialized `.hmlc` payload in the compressed `.hmlb` container:
/// `magic(4) | version(2) | uncompressed-size(4) | zlib data`.
pub(crate) fn wrap_bundle(hmlc: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&HMLB_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(hmlc.len() as u32).to_le_bytes());
    let mut encoder = flate2::write::ZlibEncoder::new(out, flate2::Compression::best());
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(hmlc);
    encoder.finish().unwrap_or_default()
}

/// Unwraps a `.hmlb` container back to the `.hmlc` payload.
pub(crate) fn unwrap_bundle(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.len() < 10 {
        return Err(DecodeError::Truncated);
    }
    if bytes[..4] != HMLB_MAGIC {
        return Err(DecodeError::BadBundle("bad magic"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let size = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let mut payload = Vec::with_capacity(size);
    let mut decoder = flate2::read::ZlibDecoder::new(&bytes[10..]);
    decoder
        .read_to_end(&mut payload)
        .map_err(|_| DecodeError::BadBundle("zlib stream corrupt"))?;
    if payload.len() != size {
        return Err(DecodeError::BadBundle("uncompressed size mismatch"));
    }
    Ok(payload)
}

// === varints ===

fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

// === type/operator discriminators ===

fn tag_code(tag: TypeTag) -> u8 {
    match tag {
        TypeTag::I8 => 0,
        TypeTag::I16 => 1,
        TypeTag::I32 => 2,
        TypeTag::I64 => 3,
        TypeTag::U8 => 4,
        TypeTag::U16 => 5,
        TypeTag::U32 => 6,
        TypeTag::U64 => 7,
        TypeTag::F32 => 8,
        TypeTag::F64 => 9,
        TypeTag::Bool => 10,
        TypeTag::Rune => 11,
        TypeTag::Null => 12,
        TypeTag::Ptr => 13,
        TypeTag::Str => 14,
        TypeTag::Buffer => 15,
        TypeTag::Array => 16,
        TypeTag::Object => 17,
        TypeTag::File => 18,
        TypeTag::Function => 19,
        TypeTag::BuiltinFn => 20,
        TypeTag::FfiFunction => 21,
        TypeTag::Task => 22,
        TypeTag::Channel => 23,
        TypeTag::Type => 24,
    }
}

fn tag_from(code: u8) -> Option<TypeTag> {
    Some(match code {
        0 => TypeTag::I8,
        1 => TypeTag::I16,
        2 => TypeTag::I32,
        3 => TypeTag::I64,
        4 => TypeTag::U8,
        5 => TypeTag::U16,
        6 => TypeTag::U32,
        7 => TypeTag::U64,
        8 => TypeTag::F32,
        9 => TypeTag::F64,
        10 => TypeTag::Bool,
        11 => TypeTag::Rune,
        12 => TypeTag::Null,
        13 => TypeTag::Ptr,
        14 => TypeTag::Str,
        15 => TypeTag::Buffer,
        16 => TypeTag::Array,
        17 => TypeTag::Object,
        18 => TypeTag::File,
        19 => TypeTag::Function,
        20 => TypeTag::BuiltinFn,
        21 => TypeTag::FfiFunction,
        22 => TypeTag::Task,
        23 => TypeTag::Channel,
        24 => TypeTag::Type,
        _ => return None,
    })
}

fn binop_code(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::Rem => 4,
        BinaryOp::Eq => 5,
        BinaryOp::Ne => 6,
        BinaryOp::Lt => 7,
        BinaryOp::Le => 8,
        BinaryOp::Gt => 9,
        BinaryOp::Ge => 10,
        BinaryOp::And => 11,
        BinaryOp::Or => 12,
        BinaryOp::Coalesce => 13,
        BinaryOp::BitAnd => 14,
        BinaryOp::BitOr => 15,
        BinaryOp::BitXor => 16,
        BinaryOp::Shl => 17,
        BinaryOp::Shr => 18,
    }
}

fn binop_from(code: u8) -> Option<BinaryOp> {
    Some(match code {
        0 => BinaryOp::Add,
        1 => BinaryOp::Sub,
        2 => BinaryOp::Mul,
        3 => BinaryOp::Div,
        4 => BinaryOp::Rem,
        5 => BinaryOp::Eq,
        6 => BinaryOp::Ne,
        7 => BinaryOp::Lt,
        8 => BinaryOp::Le,
        9 => BinaryOp::Gt,
        10 => BinaryOp::Ge,
        11 => BinaryOp::And,
        12 => BinaryOp::Or,
        13 => BinaryOp::Coalesce,
        14 => BinaryOp::BitAnd,
        15 => BinaryOp::BitOr,
        16 => BinaryOp::BitXor,
        17 => BinaryOp::Shl,
        18 => BinaryOp::Shr,
        _ => return None,
    })
}

fn unop_code(op: UnaryOp) -> u8 {
    match op {
        UnaryOp::Neg => 0,
        UnaryOp::Not => 1,
        UnaryOp::BitNot => 2,
    }
}

fn unop_from(code: u8) -> Option<UnaryOp> {
    Some(match code {
        0 => UnaryOp::Neg,
        1 => UnaryOp::Not,
        2 => UnaryOp::BitNot,
        _ => return None,
    })
}

// Statement discriminators.
const S_LET: u8 = 1;
const S_EXPR: u8 = 2;
const S_IF: u8 = 3;
const S_WHILE: u8 = 4;
const S_FOR: u8 = 5;
const S_BREAK: u8 = 6;
const S_CONTINUE: u8 = 7;
const S_RETURN: u8 = 8;
const S_THROW: u8 = 9;
const S_TRY: u8 = 10;
const S_DEFER: u8 = 11;
const S_SWITCH: u8 = 12;
const S_DEFINE_OBJECT: u8 = 13;
const S_DEFINE_ENUM: u8 = 14;
const S_IMPORT: u8 = 15;
const S_EXPORT: u8 = 16;
const S_EXTERN_FN: u8 = 17;

// Expression discriminators.
const E_NULL: u8 = 1;
const E_BOOL: u8 = 2;
const E_INT: u8 = 3;
const E_FLOAT: u8 = 4;
const E_STR: u8 = 5;
const E_RUNE: u8 = 6;
const E_IDENT: u8 = 7;
const E_SELF: u8 = 8;
const E_TYPE_NAME: u8 = 9;
const E_ARRAY: u8 = 10;
const E_OBJECT_LIT: u8 = 11;
const E_FN_LIT: u8 = 12;
const E_UNARY: u8 = 13;
const E_BINARY: u8 = 14;
const E_ASSIGN: u8 = 15;
const E_CALL: u8 = 16;
const E_INDEX: u8 = 17;
const E_PROPERTY: u8 = 18;
const E_AWAIT: u8 = 19;

struct Encoder {
    buf: Vec<u8>,
    strings: IndexSet<String>,
    debug: bool,
}

impl Encoder {
    fn intern(&mut self, s: &str) -> u32 {
        match self.strings.get_index_of(s) {
            Some(idx) => idx as u32,
            None => self.strings.insert_full(s.to_owned()).0 as u32,
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn uvarint(&mut self, v: u64) {
        put_uvarint(&mut self.buf, v);
    }

    fn str_idx(&mut self, s: &str) {
        let idx = self.intern(s);
        self.uvarint(u64::from(idx));
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.u8(1);
                self.str_idx(s);
            }
            None => self.u8(0),
        }
    }

    fn opt_tag(&mut self, tag: Option<TypeTag>) {
        match tag {
            Some(tag) => {
                self.u8(1);
                self.u8(tag_code(tag));
            }
            None => self.u8(0),
        }
    }

    fn line(&mut self, line: u32) {
        if self.debug {
            self.uvarint(u64::from(line));
        }
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        self.uvarint(stmts.len() as u64);
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn opt_stmts(&mut self, stmts: Option<&Vec<Stmt>>) {
        match stmts {
            Some(stmts) => {
                self.u8(1);
                self.stmts(stmts);
            }
            None => self.u8(0),
        }
    }

    fn opt_expr(&mut self, expr: Option<&Expr>) {
        match expr {
            Some(expr) => {
                self.u8(1);
                self.expr(expr);
            }
            None => self.u8(0),
        }
    }

    fn params(&mut self, params: &[Param]) {
        self.uvarint(params.len() as u64);
        for param in params {
            self.str_idx(&param.name);
            self.opt_tag(param.tag);
            self.u8(u8::from(param.by_ref));
        }
    }

    fn names(&mut self, names: &[(String, Option<String>)]) {
        self.uvarint(names.len() as u64);
        for (name, alias) in names {
            self.str_idx(name);
            self.opt_str(alias.as_deref());
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let {
                name,
                tag,
                init,
                is_const,
            } => {
                self.u8(S_LET);
                self.line(stmt.line);
                self.str_idx(name);
                self.opt_tag(*tag);
                self.opt_expr(init.as_ref());
                self.u8(u8::from(*is_const));
            }
            StmtKind::Expr(expr) => {
                self.u8(S_EXPR);
                self.line(stmt.line);
                self.expr(expr);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.u8(S_IF);
                self.line(stmt.line);
                self.expr(cond);
                self.stmts(then_body);
                self.opt_stmts(else_body.as_ref());
            }
            StmtKind::While { cond, body } => {
                self.u8(S_WHILE);
                self.line(stmt.line);
                self.expr(cond);
                self.stmts(body);
            }
            StmtKind::For { var, iter, body } => {
                self.u8(S_FOR);
                self.line(stmt.line);
                self.str_idx(var);
                self.expr(iter);
                self.stmts(body);
            }
            StmtKind::Break => {
                self.u8(S_BREAK);
                self.line(stmt.line);
            }
            StmtKind::Continue => {
                self.u8(S_CONTINUE);
                self.line(stmt.line);
            }
            StmtKind::Return(value) => {
                self.u8(S_RETURN);
                self.line(stmt.line);
                self.opt_expr(value.as_ref());
            }
            StmtKind::Throw(value) => {
                self.u8(S_THROW);
                self.line(stmt.line);
                self.expr(value);
            }
            StmtKind::Try { body, catch, finally } => {
                self.u8(S_TRY);
                self.line(stmt.line);
                self.stmts(body);
                match catch {
                    Some((name, stmts)) => {
                        self.u8(1);
                        self.str_idx(name);
                        self.stmts(stmts);
                    }
                    None => self.u8(0),
                }
                self.opt_stmts(finally.as_ref());
            }
            StmtKind::Defer(expr) => {
                self.u8(S_DEFER);
                self.line(stmt.line);
                self.expr(expr);
            }
            StmtKind::Switch { subject, cases, default } => {
                self.u8(S_SWITCH);
                self.line(stmt.line);
                self.expr(subject);
                self.uvarint(cases.len() as u64);
                for (value, body) in cases {
                    self.expr(value);
                    self.stmts(body);
                }
                self.opt_stmts(default.as_ref());
            }
            StmtKind::DefineObject { name, fields } => {
                self.u8(S_DEFINE_OBJECT);
                self.line(stmt.line);
                self.str_idx(name);
                self.uvarint(fields.len() as u64);
                for field in fields {
                    self.str_idx(&field.name);
                    self.u8(u8::from(field.optional));
                    self.opt_tag(field.tag);
                    self.opt_expr(field.default.as_ref());
                }
            }
            StmtKind::DefineEnum { name, variants } => {
                self.u8(S_DEFINE_ENUM);
                self.line(stmt.line);
                self.str_idx(name);
                self.uvarint(variants.len() as u64);
                for variant in variants {
                    self.str_idx(variant);
                }
            }
            StmtKind::Import(spec) => {
                self.u8(S_IMPORT);
                self.line(stmt.line);
                match spec {
                    ImportSpec::Names { names, path } => {
                        self.u8(0);
                        self.names(names);
                        self.str_idx(path);
                    }
                    ImportSpec::Namespace { alias, path } => {
                        self.u8(1);
                        self.str_idx(alias);
                        self.str_idx(path);
                    }
                    ImportSpec::SideEffect { path } => {
                        self.u8(2);
                        self.str_idx(path);
                    }
                }
            }
            StmtKind::Export(spec) => {
                self.u8(S_EXPORT);
                self.line(stmt.line);
                match spec {
                    ExportSpec::Decl(inner) => {
                        self.u8(0);
                        self.stmt(inner);
                    }
                    ExportSpec::Names { names, from } => {
                        self.u8(1);
                        self.names(names);
                        self.opt_str(from.as_deref());
                    }
                }
            }
            StmtKind::ExternFn { name, lib, params, ret } => {
                self.u8(S_EXTERN_FN);
                self.line(stmt.line);
                self.str_idx(name);
                self.opt_str(lib.as_deref());
                self.params(params);
                self.opt_tag(*ret);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Null => {
                self.u8(E_NULL);
                self.line(expr.line);
            }
            ExprKind::Bool(b) => {
                self.u8(E_BOOL);
                self.line(expr.line);
                self.u8(u8::from(*b));
            }
            ExprKind::Int { value, tag } => {
                self.u8(E_INT);
                self.line(expr.line);
                self.uvarint(*value);
                self.opt_tag(*tag);
            }
            ExprKind::Float { value, tag } => {
                self.u8(E_FLOAT);
                self.line(expr.line);
                self.buf.extend_from_slice(&value.to_le_bytes());
                self.opt_tag(*tag);
            }
            ExprKind::Str(s) => {
                self.u8(E_STR);
                self.line(expr.line);
                self.str_idx(s);
            }
            ExprKind::Rune(c) => {
                self.u8(E_RUNE);
                self.line(expr.line);
                self.uvarint(u64::from(u32::from(*c)));
            }
            ExprKind::Ident(name) => {
                self.u8(E_IDENT);
                self.line(expr.line);
                self.str_idx(name);
            }
            ExprKind::SelfRef => {
                self.u8(E_SELF);
                self.line(expr.line);
            }
            ExprKind::TypeName(tag) => {
                self.u8(E_TYPE_NAME);
                self.line(expr.line);
                self.u8(tag_code(*tag));
            }
            ExprKind::Array(items) => {
                self.u8(E_ARRAY);
                self.line(expr.line);
                self.uvarint(items.len() as u64);
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::ObjectLit { type_name, fields } => {
                self.u8(E_OBJECT_LIT);
                self.line(expr.line);
                self.opt_str(type_name.as_deref());
                self.uvarint(fields.len() as u64);
                for (name, value) in fields {
                    self.str_idx(name);
                    self.expr(value);
                }
            }
            ExprKind::FnLit(lit) => {
                self.u8(E_FN_LIT);
                self.line(expr.line);
                self.opt_str(lit.name.as_deref());
                self.params(&lit.params);
                self.opt_tag(lit.ret);
                self.u8(u8::from(lit.is_async));
                self.stmts(&lit.body);
            }
            ExprKind::Unary { op, expr: inner } => {
                self.u8(E_UNARY);
                self.line(expr.line);
                self.u8(unop_code(*op));
                self.expr(inner);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.u8(E_BINARY);
                self.line(expr.line);
                self.u8(binop_code(*op));
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Assign { target, op, value } => {
                self.u8(E_ASSIGN);
                self.line(expr.line);
                match op {
                    Some(op) => {
                        self.u8(1);
                        self.u8(binop_code(*op));
                    }
                    None => self.u8(0),
                }
                self.expr(target);
                self.expr(value);
            }
            ExprKind::Call { callee, args } => {
                self.u8(E_CALL);
                self.line(expr.line);
                self.expr(callee);
                self.uvarint(args.len() as u64);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::Index { obj, index } => {
                self.u8(E_INDEX);
                self.line(expr.line);
                self.expr(obj);
                self.expr(index);
            }
            ExprKind::Property { obj, name, optional } => {
                self.u8(E_PROPERTY);
                self.line(expr.line);
                self.expr(obj);
                self.str_idx(name);
                self.u8(u8::from(*optional));
            }
            ExprKind::Await(inner) => {
                self.u8(E_AWAIT);
                self.line(expr.line);
                self.expr(inner);
            }
        }
    }
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    strings: Vec<String>,
    debug: bool,
}

impl Decoder<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn uvarint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return Err(DecodeError::Truncated);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        let slice = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(slice);
        Ok(f64::from_le_bytes(bytes))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let idx = self.uvarint()?;
        let idx32 = u32::try_from(idx).map_err(|_| DecodeError::BadStringIndex(u32::MAX))?;
        self.strings
            .get(idx as usize)
            .cloned()
            .ok_or(DecodeError::BadStringIndex(idx32))
    }

    fn opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        Ok(if self.u8()? == 0 { None } else { Some(self.string()?) })
    }

    fn opt_tag(&mut self) -> Result<Option<TypeTag>, DecodeError> {
        if self.u8()? == 0 {
            Ok(None)
        } else {
            let code = self.u8()?;
            tag_from(code).map(Some).ok_or(DecodeError::BadTag(code))
        }
    }

    fn tag(&mut self) -> Result<TypeTag, DecodeError> {
        let code = self.u8()?;
        tag_from(code).ok_or(DecodeError::BadTag(code))
    }

    fn line(&mut self) -> Result<u32, DecodeError> {
        if self.debug {
            Ok(self.uvarint()? as u32)
        } else {
            Ok(0)
        }
    }

    fn stmt_vec(&mut self) -> Result<Vec<Stmt>, DecodeError> {
        let count = self.uvarint()? as usize;
        let mut stmts = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn opt_stmt_vec(&mut self) -> Result<Option<Vec<Stmt>>, DecodeError> {
        Ok(if self.u8()? == 0 { None } else { Some(self.stmt_vec()?) })
    }

    fn opt_expr(&mut self) -> Result<Option<Expr>, DecodeError> {
        Ok(if self.u8()? == 0 { None } else { Some(self.expr()?) })
    }

    fn params(&mut self) -> Result<Vec<Param>, DecodeError> {
        let count = self.uvarint()? as usize;
        let mut params = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let name = self.string()?;
            let tag = self.opt_tag()?;
            let by_ref = self.u8()? != 0;
            params.push(Param { name, tag, by_ref });
        }
        Ok(params)
    }

    fn names(&mut self) -> Result<Vec<(String, Option<String>)>, DecodeError> {
        let count = self.uvarint()? as usize;
        let mut names = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let name = self.string()?;
            let alias = self.opt_string()?;
            names.push((name, alias));
        }
        Ok(names)
    }

    fn stmt(&mut self) -> Result<Stmt, DecodeError> {
        let tag = self.u8()?;
        let line = self.line()?;
        let kind = match tag {
            S_LET => {
                let name = self.string()?;
                let binding_tag = self.opt_tag()?;
                let init = self.opt_expr()?;
                let is_const = self.u8()? != 0;
                StmtKind::Let {
                    name,
                    tag: binding_tag,
                    init,
                    is_const,
                }
            }
            S_EXPR => StmtKind::Expr(self.expr()?),
            S_IF => StmtKind::If {
                cond: self.expr()?,
                then_body: self.stmt_vec()?,
                else_body: self.opt_stmt_vec()?,
            },
            S_WHILE => StmtKind::While {
                cond: self.expr()?,
                body: self.stmt_vec()?,
            },
            S_FOR => StmtKind::For {
                var: self.string()?,
                iter: self.expr()?,
                body: self.stmt_vec()?,
            },
            S_BREAK => StmtKind::Break,
            S_CONTINUE => StmtKind::Continue,
            S_RETURN => StmtKind::Return(self.opt_expr()?),
            S_THROW => StmtKind::Throw(self.expr()?),
            S_TRY => {
                let body = self.stmt_vec()?;
                let catch = if self.u8()? == 0 {
                    None
                } else {
                    let name = self.string()?;
                    Some((name, self.stmt_vec()?))
                };
                let finally = self.opt_stmt_vec()?;
                StmtKind::Try { body, catch, finally }
            }
            S_DEFER => StmtKind::Defer(self.expr()?),
            S_SWITCH => {
                let subject = self.expr()?;
                let count = self.uvarint()? as usize;
                let mut cases = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let value = self.expr()?;
                    cases.push((value, self.stmt_vec()?));
                }
                let default = self.opt_stmt_vec()?;
                StmtKind::Switch { subject, cases, default }
            }
            S_DEFINE_OBJECT => {
                let name = self.string()?;
                let count = self.uvarint()? as usize;
                let mut fields = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let fname = self.string()?;
                    let optional = self.u8()? != 0;
                    let ftag = self.opt_tag()?;
                    let default = self.opt_expr()?;
                    fields.push(FieldDef {
                        name: fname,
                        optional,
                        tag: ftag,
                        default,
                    });
                }
                StmtKind::DefineObject { name, fields }
            }
            S_DEFINE_ENUM => {
                let name = self.string()?;
                let count = self.uvarint()? as usize;
                let mut variants = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    variants.push(self.string()?);
                }
                StmtKind::DefineEnum { name, variants }
            }
            S_IMPORT => {
                let sub = self.u8()?;
                let spec = match sub {
                    0 => {
                        let names = self.names()?;
                        ImportSpec::Names {
                            names,
                            path: self.string()?,
                        }
                    }
                    1 => ImportSpec::Namespace {
                        alias: self.string()?,
                        path: self.string()?,
                    },
                    2 => ImportSpec::SideEffect { path: self.string()? },
                    other => return Err(DecodeError::BadTag(other)),
                };
                StmtKind::Import(spec)
            }
            S_EXPORT => {
                let sub = self.u8()?;
                let spec = match sub {
                    0 => ExportSpec::Decl(Box::new(self.stmt()?)),
                    1 => {
                        let names = self.names()?;
                        ExportSpec::Names {
                            names,
                            from: self.opt_string()?,
                        }
                    }
                    other => return Err(DecodeError::BadTag(other)),
                };
                StmtKind::Export(spec)
            }
            S_EXTERN_FN => StmtKind::ExternFn {
                name: self.string()?,
                lib: self.opt_string()?,
                params: self.params()?,
                ret: self.opt_tag()?,
            },
            other => return Err(DecodeError::BadTag(other)),
        };
        Ok(Stmt::new(kind, line))
    }

    fn expr(&mut self) -> Result<Expr, DecodeError> {
        let tag = self.u8()?;
        let line = self.line()?;
        let kind = match tag {
            E_NULL => ExprKind::Null,
            E_BOOL => ExprKind::Bool(self.u8()? != 0),
            E_INT => {
                let value = self.uvarint()?;
                ExprKind::Int {
                    value,
                    tag: self.opt_tag()?,
                }
            }
            E_FLOAT => {
                let value = self.f64()?;
                ExprKind::Float {
                    value,
                    tag: self.opt_tag()?,
                }
            }
            E_STR => ExprKind::Str(self.string()?),
            E_RUNE => {
                let code = self.uvarint()?;
                let code = u32::try_from(code).map_err(|_| DecodeError::Truncated)?;
                ExprKind::Rune(char::from_u32(code).ok_or(DecodeError::BadTag(0))?)
            }
            E_IDENT => ExprKind::Ident(self.string()?),
            E_SELF => ExprKind::SelfRef,
            E_TYPE_NAME => ExprKind::TypeName(self.tag()?),
            E_ARRAY => {
                let count = self.uvarint()? as usize;
                let mut items = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    items.push(self.expr()?);
                }
                ExprKind::Array(items)
            }
            E_OBJECT_LIT => {
                let type_name = self.opt_string()?;
                let count = self.uvarint()? as usize;
                let mut fields = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let name = self.string()?;
                    fields.push((name, self.expr()?));
                }
                ExprKind::ObjectLit { type_name, fields }
            }
            E_FN_LIT => {
                let name = self.opt_string()?;
                let params = self.params()?;
                let ret = self.opt_tag()?;
                let is_async = self.u8()? != 0;
                let body = self.stmt_vec()?;
                ExprKind::FnLit(FnLiteral {
                    name,
                    params,
                    ret,
                    is_async,
                    body: Arc::from(body),
                })
            }
            E_UNARY => {
                let code = self.u8()?;
                let op = unop_from(code).ok_or(DecodeError::BadTag(code))?;
                ExprKind::Unary {
                    op,
                    expr: Box::new(self.expr()?),
                }
            }
            E_BINARY => {
                let code = self.u8()?;
                let op = binop_from(code).ok_or(DecodeError::BadTag(code))?;
                ExprKind::Binary {
                    op,
                    lhs: Box::new(self.expr()?),
                    rhs: Box::new(self.expr()?),
                }
            }
            E_ASSIGN => {
                let op = if self.u8()? == 0 {
                    None
                } else {
                    let code = self.u8()?;
                    Some(binop_from(code).ok_or(DecodeError::BadTag(code))?)
                };
                ExprKind::Assign {
                    op,
                    target: Box::new(self.expr()?),
                    value: Box::new(self.expr()?),
                }
            }
            E_CALL => {
                let callee = Box::new(self.expr()?);
                let count = self.uvarint()? as usize;
                let mut args = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    args.push(self.expr()?);
                }
                ExprKind::Call { callee, args }
            }
            E_INDEX => ExprKind::Index {
                obj: Box::new(self.expr()?),
                index: Box::new(self.expr()?),
            },
            E_PROPERTY => {
                let obj = Box::new(self.expr()?);
                let name = self.string()?;
                let optional = self.u8()? != 0;
                ExprKind::Property { obj, name, optional }
            }
            E_AWAIT => ExprKind::Await(Box::new(self.expr()?)),
            other => return Err(DecodeError::BadTag(other)),
        };
        Ok(Expr::new(kind, line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn roundtrip(src: &str, debug: bool) {
        let stmts = parse(src).unwrap();
        let first = serialize(&stmts, debug);
        let decoded = deserialize(&first).unwrap();
        let second = serialize(&decoded, debug);
        assert_eq!(first, second, "serializer must be stable for {src:?}");
    }

    #[test]
    fn roundtrip_is_byte_stable() {
        let src = r#"
            let x: u8 = 1;
            fn square(n: i64): i64 { return n * n; }
            let a = [1, 2, 3];
            print(a.map(square));
            if x > 0 { print("pos"); } else { print("neg"); }
            try { throw "oops"; } catch (e) { print(e); } finally { print("done"); }
        "#;
        roundtrip(src, true);
        roundtrip(src, false);
    }

    #[test]
    fn string_table_dedups_first_seen() {
        let stmts = parse(r#"print("a"); print("a"); print("b");"#).unwrap();
        let bytes = serialize(&stmts, false);
        let string_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        // "print", "a", "b"
        assert_eq!(string_count, 3);
    }

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(deserialize(b"NOPE____________________"), Err(DecodeError::BadMagic));
    }

    #[test]
    fn rejects_bad_version() {
        let stmts = parse("let x = 1;").unwrap();
        let mut bytes = serialize(&stmts, false);
        bytes[4] = 0xff;
        assert!(matches!(deserialize(&bytes), Err(DecodeError::UnsupportedVersion(_))));
    }

    #[test]
    fn rejects_corrupt_body() {
        let stmts = parse("let x = 1;").unwrap();
        let mut bytes = serialize(&stmts, false);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        assert!(matches!(
            deserialize(&bytes),
            Err(DecodeError::ChecksumMismatch | DecodeError::BadTag(_) | DecodeError::Truncated)
        ));
    }

    #[test]
    fn debug_flag_round_trips_lines() {
        let stmts = parse("let x = 1;\nlet y = 2;").unwrap();
        let decoded = deserialize(&serialize(&stmts, true)).unwrap();
        assert_eq!(decoded[1].line, 2);
        let stripped = deserialize(&serialize(&stmts, false)).unwrap();
        assert_eq!(stripped[1].line, 0);
    }

    #[test]
    fn bundle_container_roundtrip() {
        let stmts = parse("print(1 + 2);").unwrap();
        let hmlc = serialize(&stmts, false);
        let bundle = wrap_bundle(&hmlc);
        assert_eq!(&bundle[..4], b"HMLB");
        assert_eq!(unwrap_bundle(&bundle).unwrap(), hmlc);
        assert!(matches!(
            unwrap_bundle(b"HMLBxxxxxxxx"),
            Err(DecodeError::UnsupportedVersion(_) | DecodeError::BadBundle(_))
        ));
    }
}
