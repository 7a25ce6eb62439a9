//! Builtin functions pre-bound in the root environment.
//!
//! Each builtin is a variant of [`Builtins`]; the value form is
//! `Value::Builtin`, which is `Copy`-cheap and dispatches through
//! [`Builtins::call`]. Grouped implementations live in the submodules.

mod math;
mod mem;
pub(crate) mod os;
mod print;
pub(crate) mod seq;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    channel::Channel,
    env::EnvRef,
    eval::Interp,
    exception::{ExcKind, Exception, RunResult, Unwind},
    signal, task,
    value::{ArgValues, Value},
};

/// Every builtin function, named by its snake_case form (`buffer_to_ptr`,
/// `ptr_read_u32`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Builtins {
    Print,
    Typeof,
    Sizeof,
    Len,
    Assert,
    Panic,
    Alloc,
    Free,
    Realloc,
    Memset,
    Memcpy,
    Buffer,
    BufferToPtr,
    PtrReadU8,
    PtrReadU32,
    PtrReadU64,
    PtrWriteU8,
    PtrWriteU32,
    PtrWriteU64,
    Channel,
    Spawn,
    Join,
    Detach,
    Signal,
    Raise,
    Open,
    Exec,
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Pow,
    Min,
    Max,
    Map,
    Filter,
    Reduce,
}

/// Binds every builtin into the given (root) environment as a const.
pub(crate) fn install(globals: &EnvRef) {
    for builtin in Builtins::iter() {
        let name: &'static str = builtin.into();
        globals.define(name, Value::Builtin(builtin), true);
    }
}

impl Builtins {
    pub fn call(self, interp: &Interp, args: ArgValues, line: u32) -> RunResult<Value> {
        match self {
            Self::Print => print::print(interp, &args),
            Self::Typeof => {
                exact(&args, 1, "typeof")?;
                Ok(Value::new_str(args[0].type_name()))
            }
            Self::Sizeof => sizeof(&args),
            Self::Len => seq::len(&args),
            Self::Assert => assert_builtin(&args),
            Self::Panic => panic_builtin(&args),
            Self::Alloc => mem::alloc(&args),
            Self::Free => mem::free(&args),
            Self::Realloc => mem::realloc(&args),
            Self::Memset => mem::memset(&args),
            Self::Memcpy => mem::memcpy(&args),
            Self::Buffer => mem::buffer(&args),
            Self::BufferToPtr => mem::buffer_to_ptr(&args),
            Self::PtrReadU8 => mem::ptr_read(&args, 1),
            Self::PtrReadU32 => mem::ptr_read(&args, 4),
            Self::PtrReadU64 => mem::ptr_read(&args, 8),
            Self::PtrWriteU8 => mem::ptr_write(&args, 1),
            Self::PtrWriteU32 => mem::ptr_write(&args, 4),
            Self::PtrWriteU64 => mem::ptr_write(&args, 8),
            Self::Channel => channel_builtin(&args),
            Self::Spawn => spawn_builtin(interp, args),
            Self::Join => join_builtin(&args),
            Self::Detach => detach_builtin(&args),
            Self::Signal => signal_builtin(interp, &args),
            Self::Raise => raise_builtin(&args),
            Self::Open => os::open(&args),
            Self::Exec => os::exec(&args),
            Self::Abs => math::abs(&args),
            Self::Floor => math::floor(&args),
            Self::Ceil => math::ceil(&args),
            Self::Sqrt => math::sqrt(&args),
            Self::Pow => math::pow(&args),
            Self::Min => math::min(&args),
            Self::Max => math::max(&args),
            Self::Map => {
                exact(&args, 2, "map")?;
                seq::map(interp, &args[0], &args[1], line)
            }
            Self::Filter => {
                exact(&args, 2, "filter")?;
                seq::filter(interp, &args[0], &args[1], line)
            }
            Self::Reduce => {
                if args.len() != 2 && args.len() != 3 {
                    return Err(arity_error("reduce", "2 or 3", args.len()).into());
                }
                seq::reduce(interp, &args[0], &args[1], args.get(2).cloned(), line)
            }
        }
    }
}

pub(super) fn arity_error(name: &str, wanted: impl std::fmt::Display, got: usize) -> Exception {
    Exception::new(ExcKind::TypeError, format!("{name} expects {wanted} arguments, got {got}"))
}

pub(super) fn exact(args: &[Value], n: usize, name: &str) -> RunResult<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(arity_error(name, n, args.len()).into())
    }
}

pub(super) fn type_error(name: &str, wanted: &str, got: &Value) -> Unwind {
    Exception::new(
        ExcKind::TypeError,
        format!("{name} expects {wanted}, got {}", got.type_name()),
    )
    .into()
}

pub(super) fn int_arg(args: &[Value], idx: usize, name: &str) -> RunResult<i128> {
    args[idx].as_int().ok_or_else(|| type_error(name, "an integer", &args[idx]))
}

pub(super) fn usize_arg(args: &[Value], idx: usize, name: &str) -> RunResult<usize> {
    let v = int_arg(args, idx, name)?;
    usize::try_from(v).map_err(|_| {
        Unwind::from(Exception::new(
            ExcKind::RangeError,
            format!("{name}: {v} is not a valid size"),
        ))
    })
}

pub(super) fn str_arg<'a>(args: &'a [Value], idx: usize, name: &str) -> RunResult<&'a str> {
    match &args[idx] {
        Value::Str(s) => Ok(s.as_str()),
        other => Err(type_error(name, "a string", other)),
    }
}

fn sizeof(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "sizeof")?;
    match &args[0] {
        Value::Type(tag) => match tag.size_of() {
            Some(size) => Ok(Value::I64(size as i64)),
            None => Err(Exception::new(
                ExcKind::TypeError,
                format!("sizeof: {} is not a scalar type", tag.name()),
            )
            .into()),
        },
        other => Err(type_error("sizeof", "a type", other)),
    }
}

fn assert_builtin(args: &[Value]) -> RunResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("assert", "1 or 2", args.len()).into());
    }
    if args[0].is_truthy() {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(msg) => format!("assertion failed: {msg}"),
        None => "assertion failed".to_owned(),
    };
    Err(Exception::thrown(Value::new_str(message)).into())
}

fn panic_builtin(args: &[Value]) -> RunResult<Value> {
    let message = args.first().map(ToString::to_string).unwrap_or_default();
    eprintln!("panic: {message}");
    std::process::exit(1);
}

fn channel_builtin(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "channel")?;
    let capacity = usize_arg(args, 0, "channel")?;
    Ok(Value::Channel(Channel::new(capacity)))
}

fn spawn_builtin(interp: &Interp, mut args: ArgValues) -> RunResult<Value> {
    if args.is_empty() {
        return Err(arity_error("spawn", "at least 1", 0).into());
    }
    let func = args.remove(0);
    let Value::Function(func) = func else {
        return Err(type_error("spawn", "a function", &func));
    };
    let handle = task::spawn_function(&interp.ctx, func, args, None, &interp.file)?;
    Ok(Value::Task(handle))
}

fn join_builtin(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "join")?;
    match &args[0] {
        Value::Task(handle) => handle.join().map_err(Unwind::from),
        other => Err(type_error("join", "a task", other)),
    }
}

fn detach_builtin(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "detach")?;
    match &args[0] {
        Value::Task(handle) => {
            handle.detach();
            Ok(Value::Null)
        }
        other => Err(type_error("detach", "a task", other)),
    }
}

fn signal_builtin(interp: &Interp, args: &[Value]) -> RunResult<Value> {
    exact(args, 2, "signal")?;
    let sig = int_arg(args, 0, "signal")? as i32;
    if !matches!(args[1], Value::Function(_)) {
        return Err(type_error("signal", "a handler function", &args[1]));
    }
    signal::install(sig)?;
    crate::sync::lock(&interp.ctx.signals).insert(sig, args[1].clone());
    Ok(Value::Null)
}

fn raise_builtin(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "raise")?;
    let sig = int_arg(args, 0, "raise")? as i32;
    signal::raise(sig)?;
    Ok(Value::Null)
}
