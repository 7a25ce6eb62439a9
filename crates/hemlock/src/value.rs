use std::{
    cmp::Ordering,
    fmt::{self, Write as _},
    sync::{Arc, Mutex, OnceLock},
};

use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    builtins::Builtins,
    channel::Channel,
    ffi::FfiFunction,
    function::Function,
    object::Object,
    sync,
    task::TaskHandle,
};

/// Evaluated call arguments. Calls are overwhelmingly low-arity, so the
/// values stay inline instead of allocating a Vec per call.
pub(crate) type ArgValues = SmallVec<[Value; 4]>;

/// Runtime type tags, one per `Value` variant.
///
/// The numeric tags drive range checking and binary promotion; the rest are
/// reported by `typeof` and accepted in type annotations. The string
/// representation is the surface-syntax name (e.g., `Str` -> "string").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum TypeTag {
    #[strum(serialize = "i8")]
    I8,
    #[strum(serialize = "i16")]
    I16,
    #[strum(serialize = "i32")]
    I32,
    #[strum(serialize = "i64")]
    I64,
    #[strum(serialize = "u8")]
    U8,
    #[strum(serialize = "u16")]
    U16,
    #[strum(serialize = "u32")]
    U32,
    #[strum(serialize = "u64")]
    U64,
    #[strum(serialize = "f32")]
    F32,
    #[strum(serialize = "f64")]
    F64,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "rune")]
    Rune,
    #[strum(serialize = "null")]
    Null,
    #[strum(serialize = "ptr")]
    Ptr,
    #[strum(serialize = "string")]
    Str,
    #[strum(serialize = "buffer")]
    Buffer,
    #[strum(serialize = "array")]
    Array,
    #[strum(serialize = "object")]
    Object,
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "builtin_fn")]
    BuiltinFn,
    #[strum(serialize = "ffi_function")]
    FfiFunction,
    #[strum(serialize = "task")]
    Task,
    #[strum(serialize = "channel")]
    Channel,
    #[strum(serialize = "type_tag")]
    Type,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_int() || self.is_float()
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Bit width of an integer tag; `None` for everything else.
    pub fn bit_width(self) -> Option<u32> {
        match self {
            Self::I8 | Self::U8 => Some(8),
            Self::I16 | Self::U16 => Some(16),
            Self::I32 | Self::U32 => Some(32),
            Self::I64 | Self::U64 => Some(64),
            _ => None,
        }
    }

    /// Byte size of a scalar tag, as reported by `sizeof`. Heap-backed tags
    /// have no fixed size and return `None`.
    pub fn size_of(self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 | Self::Bool => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 | Self::Rune => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::Ptr => Some(std::mem::size_of::<usize>()),
            _ => None,
        }
    }

    /// Inclusive integer range of an integer tag.
    ///
    /// # Panics
    /// Panics if called on a non-integer tag; callers gate on `is_int`.
    pub fn int_range(self) -> (i128, i128) {
        match self {
            Self::I8 => (i128::from(i8::MIN), i128::from(i8::MAX)),
            Self::I16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
            Self::I32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
            Self::I64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
            Self::U8 => (0, i128::from(u8::MAX)),
            Self::U16 => (0, i128::from(u16::MAX)),
            Self::U32 => (0, i128::from(u32::MAX)),
            Self::U64 => (0, i128::from(u64::MAX)),
            _ => panic!("int_range on non-integer tag {self:?}"),
        }
    }

    pub fn contains_int(self, v: i128) -> bool {
        let (lo, hi) = self.int_range();
        (lo..=hi).contains(&v)
    }
}

/// Integer promotion: the result tag for a binary operation over two numeric
/// tags.
///
/// Float beats integer and the wider float wins. Two integers widen to the
/// larger bit width, keeping the signedness of the wider side; at equal width
/// with mixed signedness the signed tag wins.
pub(crate) fn promote(a: TypeTag, b: TypeTag) -> Option<TypeTag> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    if a.is_float() || b.is_float() {
        return Some(if a == TypeTag::F64 || b == TypeTag::F64 {
            TypeTag::F64
        } else {
            TypeTag::F32
        });
    }
    let wa = a.bit_width().unwrap_or(64);
    let wb = b.bit_width().unwrap_or(64);
    Some(match wa.cmp(&wb) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.is_signed() == b.is_signed() {
                a
            } else {
                signed_of_width(wa)
            }
        }
    })
}

fn signed_of_width(bits: u32) -> TypeTag {
    match bits {
        8 => TypeTag::I8,
        16 => TypeTag::I16,
        32 => TypeTag::I32,
        _ => TypeTag::I64,
    }
}

/// A heap-allocated UTF-8 string.
///
/// The codepoint length is computed on first use and cached; byte length is
/// always available. Strings are immutable once allocated, so the payload
/// needs no lock.
#[derive(Debug)]
pub(crate) struct Str {
    data: String,
    char_len: OnceLock<usize>,
}

impl Str {
    pub fn new(data: String) -> Self {
        Self {
            data,
            char_len: OnceLock::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Codepoint count, cached after the first call.
    pub fn char_len(&self) -> usize {
        *self.char_len.get_or_init(|| self.data.chars().count())
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.data.chars().nth(index)
    }

    pub fn byte_at(&self, index: usize) -> Option<u8> {
        self.data.as_bytes().get(index).copied()
    }

    /// Substring by codepoint indices, end-exclusive.
    pub fn substring(&self, start: usize, end: usize) -> Option<String> {
        if start > end || end > self.char_len() {
            return None;
        }
        Some(self.data.chars().skip(start).take(end - start).collect())
    }
}

/// An owned region of raw bytes, addressable both by index and (through the
/// FFI surface) as a raw pointer.
#[derive(Debug)]
pub(crate) struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub fn zeroed(len: usize) -> Self {
        Self { bytes: vec![0; len] }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    pub fn set(&mut self, index: usize, byte: u8) -> bool {
        match self.bytes.get_mut(index) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }
}

/// A contiguous vector of values with an optional homogeneous element tag.
///
/// When the tag is present (from a typed binding like `let a: array = ...`
/// annotated element types), pushes and element assignments range-check
/// against it.
#[derive(Debug)]
pub(crate) struct Array {
    pub items: Vec<Value>,
    pub elem_tag: Option<TypeTag>,
}

impl Array {
    pub fn new(items: Vec<Value>, elem_tag: Option<TypeTag>) -> Self {
        Self { items, elem_tag }
    }
}

/// An open (or closed) OS file handle.
#[derive(Debug)]
pub(crate) struct FileHandle {
    pub file: Option<std::fs::File>,
    pub path: String,
    pub mode: String,
}

impl FileHandle {
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

/// Primary value type representing Hemlock values at runtime.
///
/// Scalar variants are stored inline; the remaining variants hold a shared
/// owning reference to a heap payload. Cloning a heap variant retains the
/// payload (the `Arc` count is the reference count); dropping releases it.
/// Payloads that can be mutated after construction sit behind a lock because
/// values cross task boundaries through `spawn` arguments and channels.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// A single Unicode codepoint. String indexing produces runes, not bytes.
    Rune(char),
    /// An untyped native address, produced by `alloc` and `buffer_to_ptr`.
    Ptr(usize),
    Str(Arc<Str>),
    Buffer(Arc<Mutex<Buffer>>),
    Array(Arc<Mutex<Array>>),
    Object(Arc<Mutex<Object>>),
    File(Arc<Mutex<FileHandle>>),
    Function(Arc<Function>),
    Builtin(Builtins),
    FfiFunction(Arc<FfiFunction>),
    Task(Arc<TaskHandle>),
    Channel(Arc<Channel>),
    /// A reified type tag, as produced by a bare type name in expression
    /// position (`sizeof(i32)` evaluates its argument to one of these).
    Type(TypeTag),
}

impl Value {
    pub fn new_str(s: impl Into<String>) -> Self {
        Self::Str(Arc::new(Str::new(s.into())))
    }

    pub fn new_array(items: Vec<Self>, elem_tag: Option<TypeTag>) -> Self {
        Self::Array(Arc::new(Mutex::new(Array::new(items, elem_tag))))
    }

    pub fn new_buffer(buffer: Buffer) -> Self {
        Self::Buffer(Arc::new(Mutex::new(buffer)))
    }

    pub fn new_object(object: Object) -> Self {
        Self::Object(Arc::new(Mutex::new(object)))
    }

    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::Null,
            Self::Bool(_) => TypeTag::Bool,
            Self::I8(_) => TypeTag::I8,
            Self::I16(_) => TypeTag::I16,
            Self::I32(_) => TypeTag::I32,
            Self::I64(_) => TypeTag::I64,
            Self::U8(_) => TypeTag::U8,
            Self::U16(_) => TypeTag::U16,
            Self::U32(_) => TypeTag::U32,
            Self::U64(_) => TypeTag::U64,
            Self::F32(_) => TypeTag::F32,
            Self::F64(_) => TypeTag::F64,
            Self::Rune(_) => TypeTag::Rune,
            Self::Ptr(_) => TypeTag::Ptr,
            Self::Str(_) => TypeTag::Str,
            Self::Buffer(_) => TypeTag::Buffer,
            Self::Array(_) => TypeTag::Array,
            Self::Object(_) => TypeTag::Object,
            Self::File(_) => TypeTag::File,
            Self::Function(_) => TypeTag::Function,
            Self::Builtin(_) => TypeTag::BuiltinFn,
            Self::FfiFunction(_) => TypeTag::FfiFunction,
            Self::Task(_) => TypeTag::Task,
            Self::Channel(_) => TypeTag::Channel,
            Self::Type(_) => TypeTag::Type,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.tag().name()
    }

    /// Integer payload widened to i128, for integer variants only.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Self::I8(v) => Some(i128::from(*v)),
            Self::I16(v) => Some(i128::from(*v)),
            Self::I32(v) => Some(i128::from(*v)),
            Self::I64(v) => Some(i128::from(*v)),
            Self::U8(v) => Some(i128::from(*v)),
            Self::U16(v) => Some(i128::from(*v)),
            Self::U32(v) => Some(i128::from(*v)),
            Self::U64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric payload as f64; used for mixed int/float comparison.
    pub fn as_numeric_f64(&self) -> Option<f64> {
        self.as_float().or_else(|| self.as_int().map(|v| v as f64))
    }

    /// Reinterprets `v` into `tag`'s width by two's-complement wrapping.
    ///
    /// This is the overflow rule for arithmetic: untyped (i64) operations
    /// wrap at 64 bits, and same-tag narrow operations wrap within the tag.
    /// Typed *assignment* goes through `checked_int` instead.
    pub fn wrap_int(v: i128, tag: TypeTag) -> Self {
        match tag {
            TypeTag::I8 => Self::I8(v as i8),
            TypeTag::I16 => Self::I16(v as i16),
            TypeTag::I32 => Self::I32(v as i32),
            TypeTag::I64 => Self::I64(v as i64),
            TypeTag::U8 => Self::U8(v as u8),
            TypeTag::U16 => Self::U16(v as u16),
            TypeTag::U32 => Self::U32(v as u32),
            TypeTag::U64 => Self::U64(v as u64),
            _ => panic!("wrap_int on non-integer tag {tag:?}"),
        }
    }

    /// Range-checked conversion of `v` into an integer tag.
    pub fn checked_int(v: i128, tag: TypeTag) -> Option<Self> {
        tag.contains_int(v).then(|| Self::wrap_int(v, tag))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::F32(v) => *v != 0.0,
            Self::F64(v) => *v != 0.0,
            Self::Str(s) => s.byte_len() > 0,
            Self::Array(a) => !sync::lock(a).items.is_empty(),
            Self::Rune(c) => *c != '\0',
            Self::Ptr(p) => *p != 0,
            _ => match self.as_int() {
                Some(v) => v != 0,
                None => true,
            },
        }
    }

    /// Equality per the value model: numeric values compare after promotion
    /// (runes participate as their codepoint), strings compare by content,
    /// other heap values compare by identity.
    pub fn eq_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a.as_str() == b.as_str(),
            (Self::Rune(a), Self::Rune(b)) => a == b,
            (Self::Ptr(a), Self::Ptr(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => Arc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::File(a), Self::File(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::FfiFunction(a), Self::FfiFunction(b)) => Arc::ptr_eq(a, b),
            (Self::Task(a), Self::Task(b)) => Arc::ptr_eq(a, b),
            (Self::Channel(a), Self::Channel(b)) => Arc::ptr_eq(a, b),
            _ => match (self.scalar_int(), other.scalar_int()) {
                (Some(a), Some(b)) => a == b,
                _ => match (self.as_numeric_f64(), other.as_numeric_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            },
        }
    }

    /// Integer-like scalar payload: integers plus runes (by codepoint).
    fn scalar_int(&self) -> Option<i128> {
        match self {
            Self::Rune(c) => Some(i128::from(u32::from(*c))),
            _ => self.as_int(),
        }
    }

    /// Ordering for `<` and friends. `None` means the operands are not
    /// comparable and the evaluator raises `TypeError`.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.as_str().cmp(b.as_str())),
            (Self::Rune(a), Self::Rune(b)) => Some(a.cmp(b)),
            _ => match (self.scalar_int(), other.scalar_int()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => {
                    let a = self.as_numeric_f64()?;
                    let b = other.as_numeric_f64()?;
                    a.partial_cmp(&b)
                }
            },
        }
    }

    /// Coerces a value into a binding or parameter tag.
    ///
    /// Integers range-check (this is where `let x: u8 = 300;` fails with
    /// `RangeError`); floats widen or narrow; integers widen into float
    /// tags; `null` is accepted for heap-backed tags. Anything else is a
    /// kind mismatch.
    pub fn coerce(&self, tag: TypeTag) -> Result<Self, CoerceFailure> {
        if self.tag() == tag {
            return Ok(self.clone());
        }
        if tag.is_int() {
            let v = match self {
                Self::Rune(c) => i128::from(u32::from(*c)),
                _ => self.as_int().ok_or(CoerceFailure::Kind)?,
            };
            return Self::checked_int(v, tag).ok_or(CoerceFailure::Range);
        }
        match tag {
            TypeTag::F32 => {
                let v = self.as_numeric_f64().ok_or(CoerceFailure::Kind)?;
                Ok(Self::F32(v as f32))
            }
            TypeTag::F64 => {
                let v = self.as_numeric_f64().ok_or(CoerceFailure::Kind)?;
                Ok(Self::F64(v))
            }
            TypeTag::Rune => {
                let v = self.as_int().ok_or(CoerceFailure::Kind)?;
                let code = u32::try_from(v).map_err(|_| CoerceFailure::Range)?;
                char::from_u32(code).map(Self::Rune).ok_or(CoerceFailure::Range)
            }
            TypeTag::Str
            | TypeTag::Buffer
            | TypeTag::Array
            | TypeTag::Object
            | TypeTag::File
            | TypeTag::Function
            | TypeTag::BuiltinFn
            | TypeTag::FfiFunction
            | TypeTag::Task
            | TypeTag::Channel
            | TypeTag::Ptr => match self {
                Self::Null => Ok(Self::Null),
                _ => Err(CoerceFailure::Kind),
            },
            _ => Err(CoerceFailure::Kind),
        }
    }

    /// Printed form with strings quoted, used inside containers.
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("{:?}", s.as_str()),
            Self::Rune(c) => format!("{c:?}"),
            _ => self.to_string(),
        }
    }
}

/// Why a coercion into a tag failed: the value was the right kind but out
/// of range, or the wrong kind entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoerceFailure {
    Range,
    Kind,
}

const MAX_DISPLAY_DEPTH: usize = 16;

fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_finite() {
        let mut buffer = ryu::Buffer::new();
        f.write_str(buffer.format_finite(v))
    } else if v.is_nan() {
        f.write_str("nan")
    } else if v > 0.0 {
        f.write_str("inf")
    } else {
        f.write_str("-inf")
    }
}

fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    if depth > MAX_DISPLAY_DEPTH {
        return f.write_str("...");
    }
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::I8(v) => write!(f, "{v}"),
        Value::I16(v) => write!(f, "{v}"),
        Value::I32(v) => write!(f, "{v}"),
        Value::I64(v) => write!(f, "{v}"),
        Value::U8(v) => write!(f, "{v}"),
        Value::U16(v) => write!(f, "{v}"),
        Value::U32(v) => write!(f, "{v}"),
        Value::U64(v) => write!(f, "{v}"),
        Value::F32(v) => fmt_float(f, f64::from(*v)),
        Value::F64(v) => fmt_float(f, *v),
        Value::Rune(c) => write!(f, "{c}"),
        Value::Ptr(p) => write!(f, "0x{p:x}"),
        Value::Str(s) => f.write_str(s.as_str()),
        Value::Buffer(b) => write!(f, "<buffer len={}>", sync::lock(b).len()),
        Value::Array(items) => {
            // Snapshot before recursing: the payload lock is not reentrant
            // and self-referential arrays are legal.
            let items: Vec<Value> = sync::lock(items).items.clone();
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match item {
                    Value::Str(s) => write!(f, "{:?}", s.as_str())?,
                    Value::Rune(c) => write!(f, "{c:?}")?,
                    other => fmt_value(other, f, depth + 1)?,
                }
            }
            f.write_char(']')
        }
        Value::Object(obj) => {
            let (type_name, fields) = {
                let guard = sync::lock(obj);
                let fields: Vec<(String, Value)> = guard.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                (guard.type_name.clone(), fields)
            };
            if let Some(name) = type_name {
                write!(f, "{name} ")?;
            }
            f.write_char('{')?;
            for (i, (name, field)) in fields.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}: ")?;
                match field {
                    Value::Str(s) => write!(f, "{:?}", s.as_str())?,
                    other => fmt_value(other, f, depth + 1)?,
                }
            }
            f.write_char('}')
        }
        Value::File(handle) => write!(f, "<file {}>", sync::lock(handle).path),
        Value::Function(func) => match func.name() {
            Some(name) => write!(f, "<fn {name}>"),
            None => f.write_str("<fn>"),
        },
        Value::Builtin(b) => write!(f, "<builtin {b}>"),
        Value::FfiFunction(func) => write!(f, "<extern fn {}>", func.name),
        Value::Task(task) => write!(f, "<task {}>", task.id),
        Value::Channel(_) => f.write_str("<channel>"),
        Value::Type(tag) => f.write_str(tag.name()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_prefers_floats() {
        assert_eq!(promote(TypeTag::I32, TypeTag::F32), Some(TypeTag::F32));
        assert_eq!(promote(TypeTag::F32, TypeTag::F64), Some(TypeTag::F64));
        assert_eq!(promote(TypeTag::U64, TypeTag::F64), Some(TypeTag::F64));
    }

    #[test]
    fn promotion_widens_preserving_wider_signedness() {
        assert_eq!(promote(TypeTag::I16, TypeTag::U8), Some(TypeTag::I16));
        assert_eq!(promote(TypeTag::I16, TypeTag::U32), Some(TypeTag::U32));
        assert_eq!(promote(TypeTag::I64, TypeTag::U32), Some(TypeTag::I64));
    }

    #[test]
    fn promotion_equal_width_mixed_sign_is_signed() {
        assert_eq!(promote(TypeTag::U32, TypeTag::I32), Some(TypeTag::I32));
        assert_eq!(promote(TypeTag::U64, TypeTag::I64), Some(TypeTag::I64));
    }

    #[test]
    fn promotion_rejects_non_numeric() {
        assert_eq!(promote(TypeTag::Str, TypeTag::I32), None);
        assert_eq!(promote(TypeTag::Bool, TypeTag::Bool), None);
    }

    #[test]
    fn checked_int_range() {
        assert!(Value::checked_int(255, TypeTag::U8).is_some());
        assert!(Value::checked_int(256, TypeTag::U8).is_none());
        assert!(Value::checked_int(-1, TypeTag::U8).is_none());
        assert!(Value::checked_int(-128, TypeTag::I8).is_some());
        assert!(Value::checked_int(-129, TypeTag::I8).is_none());
    }

    #[test]
    fn wrap_int_is_twos_complement() {
        assert!(matches!(Value::wrap_int(300, TypeTag::U8), Value::U8(44)));
        assert!(matches!(Value::wrap_int(128, TypeTag::I8), Value::I8(-128)));
    }

    #[test]
    fn string_equality_is_by_content() {
        let a = Value::new_str("hello");
        let b = Value::new_str("hello");
        assert!(a.eq_value(&b));
    }

    #[test]
    fn array_equality_is_by_identity() {
        let a = Value::new_array(vec![Value::I64(1)], None);
        let b = Value::new_array(vec![Value::I64(1)], None);
        assert!(!a.eq_value(&b));
        assert!(a.eq_value(&a.clone()));
    }

    #[test]
    fn cross_type_numeric_equality() {
        assert!(Value::I64(7).eq_value(&Value::U8(7)));
        assert!(Value::F64(7.0).eq_value(&Value::I32(7)));
        assert!(!Value::I64(7).eq_value(&Value::new_str("7")));
    }

    #[test]
    fn cached_char_len() {
        let s = Str::new("héllo".to_owned());
        assert_eq!(s.byte_len(), 6);
        assert_eq!(s.char_len(), 5);
        assert_eq!(s.char_at(1), Some('é'));
    }

    #[test]
    fn float_display() {
        assert_eq!(Value::F64(1.0).to_string(), "1.0");
        assert_eq!(Value::F64(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::F64(f64::NAN).to_string(), "nan");
    }
}
