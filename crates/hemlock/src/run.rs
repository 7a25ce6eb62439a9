//! Public interface for running Hemlock code.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    bundle,
    context::RuntimeCtx,
    env::Environment,
    eval::Interp,
    exception::{ExcKind, Exception, parse_failure},
    io::{PrintWriter, StdPrint},
    parse::parse,
    serialize::{self, HMLB_MAGIC, HMLC_MAGIC},
    sync,
    value::Value,
};

/// A runtime value exchanged with the host: the result of [`Runner::run`].
///
/// Scalars map directly; arrays and objects convert their contents; values
/// with no host representation (functions, tasks, channels, open files)
/// collapse to [`HostValue::Opaque`] carrying the type name.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Rune(char),
    Str(String),
    Array(Vec<HostValue>),
    Object(Vec<(String, HostValue)>),
    Opaque(&'static str),
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Rune(c) => write!(f, "{c}"),
            Self::Str(s) => f.write_str(s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Opaque(kind) => write!(f, "<{kind}>"),
        }
    }
}

impl From<&Value> for HostValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(*v),
            Value::I8(v) => Self::Int(i64::from(*v)),
            Value::I16(v) => Self::Int(i64::from(*v)),
            Value::I32(v) => Self::Int(i64::from(*v)),
            Value::I64(v) => Self::Int(*v),
            Value::U8(v) => Self::Int(i64::from(*v)),
            Value::U16(v) => Self::Int(i64::from(*v)),
            Value::U32(v) => Self::Int(i64::from(*v)),
            Value::U64(v) => Self::Uint(*v),
            Value::F32(v) => Self::Float(f64::from(*v)),
            Value::F64(v) => Self::Float(*v),
            Value::Rune(c) => Self::Rune(*c),
            Value::Str(s) => Self::Str(s.as_str().to_owned()),
            Value::Array(array) => Self::Array(sync::lock(array).items.iter().map(Self::from).collect()),
            Value::Object(object) => Self::Object(
                sync::lock(object)
                    .fields
                    .iter()
                    .map(|(name, field)| (name.clone(), Self::from(field)))
                    .collect(),
            ),
            other => Self::Opaque(other.type_name()),
        }
    }
}

/// Primary interface for running Hemlock code.
///
/// A `Runner` holds a parsed program; `run` executes it to completion. Parse
/// errors are collected into a single batched `Exception` before any
/// execution starts.
///
/// # Example
/// ```
/// use hemlock::{CollectStringPrint, Runner};
///
/// let runner = Runner::new("print(1 + 2);".to_owned(), "example.hml").unwrap();
/// let print = CollectStringPrint::new();
/// runner.run_with(Box::new(print.clone())).unwrap();
/// assert_eq!(print.output(), "3\n");
/// ```
#[derive(Debug)]
pub struct Runner {
    file: String,
    dir: PathBuf,
    stmts: Vec<crate::ast::Stmt>,
}

impl Runner {
    /// Parses the given source code.
    ///
    /// # Errors
    /// Returns a `ParseError` exception carrying every diagnostic the parse
    /// produced.
    pub fn new(code: String, script_name: &str) -> Result<Self, Exception> {
        let stmts = parse(&code).map_err(|diags| parse_failure(script_name, &diags))?;
        Ok(Self {
            file: script_name.to_owned(),
            dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            stmts,
        })
    }

    /// Loads a program from disk, dispatching on magic bytes: `.hmlb`
    /// bundles and `.hmlc` compiled modules deserialize, anything else
    /// parses as source text.
    pub fn load_file(path: &Path) -> Result<Self, Exception> {
        let bytes = std::fs::read(path)
            .map_err(|err| Exception::new(ExcKind::IOError, format!("cannot read {}: {err}", path.display())))?;
        let file = path.display().to_string();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let stmts = if bytes.starts_with(&HMLB_MAGIC) {
            let payload = serialize::unwrap_bundle(&bytes)
                .map_err(|err| Exception::new(ExcKind::IOError, format!("{file}: {err}")))?;
            serialize::deserialize(&payload)
                .map_err(|err| Exception::new(ExcKind::IOError, format!("{file}: {err}")))?
        } else if bytes.starts_with(&HMLC_MAGIC.to_le_bytes()) {
            serialize::deserialize(&bytes).map_err(|err| Exception::new(ExcKind::IOError, format!("{file}: {err}")))?
        } else {
            let code = String::from_utf8(bytes)
                .map_err(|_| Exception::new(ExcKind::IOError, format!("{file} is not valid UTF-8")))?;
            parse(&code).map_err(|diags| parse_failure(&file, &diags))?
        };
        Ok(Self { file, dir, stmts })
    }

    /// Executes the program, printing to stdout.
    pub fn run(&self) -> Result<HostValue, Exception> {
        self.run_with(Box::new(StdPrint))
    }

    /// Executes the program with a custom print sink and returns the value
    /// of the final expression statement.
    ///
    /// Before the root environment is released, the cycle-break pass walks
    /// every reachable function value and detaches its captured
    /// environment, so a leak-free teardown does not depend on user code
    /// avoiding closure cycles.
    pub fn run_with(&self, print: Box<dyn PrintWriter>) -> Result<HostValue, Exception> {
        let ctx = RuntimeCtx::new(print);
        let interp = Interp::new_main(Arc::clone(&ctx), self.file.clone(), self.dir.clone());
        let env = Environment::child(&ctx.globals);
        let result = interp.run_main(&self.stmts, &env);
        let converted = result.map(|value| HostValue::from(&value));
        env.break_cycles();
        ctx.teardown();
        converted
    }

    /// Serializes the parsed AST to `.hmlc` bytes. `debug` retains line
    /// numbers.
    #[must_use]
    pub fn compile(&self, debug: bool) -> Vec<u8> {
        serialize::serialize(&self.stmts, debug)
    }

    /// The script name this runner was created with.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }
}

/// Bundles `entry` and its transitive imports into `.hmlc` bytes (or a
/// compressed `.hmlb` container).
///
/// # Errors
/// Fails on unresolvable imports, parse errors in any module, or programs
/// using namespace imports / re-exports (which cannot be flattened).
pub fn bundle_file(entry: &Path, debug: bool, compress: bool) -> Result<Vec<u8>, Exception> {
    let stdlib_dirs = crate::context::stdlib_search_dirs();
    let stmts = bundle::bundle(entry, &stdlib_dirs)?;
    let hmlc = serialize::serialize(&stmts, debug);
    Ok(if compress { serialize::wrap_bundle(&hmlc) } else { hmlc })
}

/// Wraps already-serialized `.hmlc` bytes in the compressed `.hmlb`
/// container.
#[must_use]
pub fn compress_container(hmlc: &[u8]) -> Vec<u8> {
    serialize::wrap_bundle(hmlc)
}
