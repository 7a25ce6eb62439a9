use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can unwind the evaluator.
pub(crate) type RunResult<T> = Result<T, Unwind>;

/// Runtime error kinds raised by the interpreter.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `RangeError` -> "RangeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcKind {
    /// Source text could not be parsed. Parse errors are batched and reported
    /// before any execution starts.
    ParseError,
    /// A value of the wrong kind was given to an operation.
    TypeError,
    /// A typed assignment received a value outside the tag's range.
    RangeError,
    /// An identifier was not found in any enclosing scope.
    NameError,
    /// Assignment to a binding declared `const`.
    ConstReassignment,
    /// Integer division or remainder by zero.
    DivisionByZero,
    IndexOutOfBounds,
    /// Property access or method call on `null` without `?.`.
    NullAccess,
    IOError,
    /// Import path did not resolve to a readable module.
    ModuleNotFound,
    /// The module loader's partial-load contract was violated.
    CircularImport,
    /// Send on a closed channel.
    ClosedChannel,
    /// `join` on a task that was already joined or detached.
    TaskAlreadyJoined,
    FFIError,
    /// A user `throw` of an arbitrary value. Display omits the kind prefix.
    Thrown,
}

/// A runtime exception: kind, message, source location, and (for user throws)
/// the thrown value itself.
///
/// Displays as `file:line: Kind: message`. The location is filled in lazily by
/// the evaluator as the exception propagates; the first frame that knows its
/// position wins.
#[derive(Debug)]
pub struct Exception {
    kind: ExcKind,
    message: String,
    file: String,
    line: u32,
    pub(crate) value: Option<Value>,
}

impl Exception {
    /// Creates an exception with no source location attached yet.
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: String::new(),
            line: 0,
            value: None,
        }
    }

    /// Wraps a user-thrown value. The message is the value's printed form so
    /// an uncaught throw still produces a readable diagnostic.
    pub(crate) fn thrown(value: Value) -> Self {
        Self {
            kind: ExcKind::Thrown,
            message: value.to_string(),
            file: String::new(),
            line: 0,
            value: Some(value),
        }
    }

    /// Fills in the source location unless one was already recorded.
    #[must_use]
    pub(crate) fn at(mut self, file: &str, line: u32) -> Self {
        if self.line == 0 && line != 0 {
            self.line = line;
            self.file = file.to_owned();
        }
        self
    }

    /// The value a `catch` clause binds: the thrown value for user throws,
    /// or the rendered diagnostic string for runtime errors.
    pub(crate) fn payload(&self) -> Value {
        match &self.value {
            Some(v) => v.clone(),
            None => Value::new_str(format!("{}: {}", self.kind, self.message)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ExcKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The source line the exception was raised at, or 0 if unknown.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.file.is_empty() {
            write!(f, "{}:{}: ", self.file, self.line)?;
        }
        if self.kind == ExcKind::Thrown {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for Exception {}

/// Non-local control flow during evaluation.
///
/// `break`/`continue` unwind to the nearest loop, `return` to the nearest
/// function call, and `Throw` to the nearest matching `catch` (running
/// `finally` blocks and `defer`s on the way out).
#[derive(Debug)]
pub(crate) enum Unwind {
    Return(Value),
    Break,
    Continue,
    Throw(Exception),
}

impl From<Exception> for Unwind {
    fn from(exc: Exception) -> Self {
        Self::Throw(exc)
    }
}

impl Unwind {
    /// Attaches a source location to a propagating throw; other unwind kinds
    /// pass through unchanged.
    #[must_use]
    pub(crate) fn at(self, file: &str, line: u32) -> Self {
        match self {
            Self::Throw(exc) => Self::Throw(exc.at(file, line)),
            other => other,
        }
    }
}

/// A single parse diagnostic. The parser recovers at statement boundaries and
/// keeps going, so one parse may surface several of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Folds a batch of parse diagnostics into a single reportable exception.
pub(crate) fn parse_failure(file: &str, diags: &[ParseDiagnostic]) -> Exception {
    let mut message = String::new();
    for (i, diag) in diags.iter().enumerate() {
        if i > 0 {
            message.push('\n');
        }
        message.push_str(&diag.to_string());
    }
    let line = diags.first().map_or(0, |d| d.line);
    Exception::new(ExcKind::ParseError, message).at(file, line)
}
