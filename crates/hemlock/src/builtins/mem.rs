//! Raw-memory builtins: `alloc`/`free`/`realloc`, `memset`/`memcpy`, buffer
//! construction, and the `ptr_read_*`/`ptr_write_*` accessors that bridge
//! FFI memory back into typed values.

use super::{exact, int_arg, type_error, usize_arg};
use crate::{
    exception::{ExcKind, Exception, RunResult},
    sync,
    value::{Buffer, Value},
};

pub(super) fn alloc(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "alloc")?;
    let size = usize_arg(args, 0, "alloc")?;
    // SAFETY: plain C allocation; a null return is surfaced as an error.
    let ptr = unsafe { libc::malloc(size) };
    if ptr.is_null() && size != 0 {
        return Err(Exception::new(ExcKind::IOError, format!("alloc({size}) failed")).into());
    }
    Ok(Value::Ptr(ptr as usize))
}

pub(super) fn free(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "free")?;
    match &args[0] {
        Value::Ptr(p) => {
            // SAFETY: the pointer came from `alloc`/`realloc`; freeing an
            // invalid pointer is the program's contract violation, exactly
            // as in C.
            unsafe { libc::free(*p as *mut libc::c_void) };
            Ok(Value::Null)
        }
        other => Err(type_error("free", "a ptr", other)),
    }
}

pub(super) fn realloc(args: &[Value]) -> RunResult<Value> {
    exact(args, 2, "realloc")?;
    let Value::Ptr(p) = &args[0] else {
        return Err(type_error("realloc", "a ptr", &args[0]));
    };
    let size = usize_arg(args, 1, "realloc")?;
    // SAFETY: as for alloc/free.
    let ptr = unsafe { libc::realloc(*p as *mut libc::c_void, size) };
    if ptr.is_null() && size != 0 {
        return Err(Exception::new(ExcKind::IOError, format!("realloc({size}) failed")).into());
    }
    Ok(Value::Ptr(ptr as usize))
}

pub(super) fn memset(args: &[Value]) -> RunResult<Value> {
    exact(args, 3, "memset")?;
    let Value::Ptr(p) = &args[0] else {
        return Err(type_error("memset", "a ptr", &args[0]));
    };
    let byte = int_arg(args, 1, "memset")? as i32;
    let len = usize_arg(args, 2, "memset")?;
    // SAFETY: the pointer and length describe memory the program owns; this
    // is the same contract as C memset.
    unsafe { libc::memset(*p as *mut libc::c_void, byte, len) };
    Ok(Value::Null)
}

pub(super) fn memcpy(args: &[Value]) -> RunResult<Value> {
    exact(args, 3, "memcpy")?;
    let (Value::Ptr(dst), Value::Ptr(src)) = (&args[0], &args[1]) else {
        return Err(Exception::new(ExcKind::TypeError, "memcpy expects two ptr arguments").into());
    };
    let len = usize_arg(args, 2, "memcpy")?;
    // SAFETY: same contract as C memcpy: both regions must be valid for
    // `len` bytes and must not overlap.
    unsafe { libc::memcpy(*dst as *mut libc::c_void, *src as *const libc::c_void, len) };
    Ok(Value::Null)
}

/// `buffer(len)` — a zero-filled byte region; `buffer(str)` — the string's
/// UTF-8 bytes.
pub(super) fn buffer(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "buffer")?;
    match &args[0] {
        Value::Str(s) => Ok(Value::new_buffer(Buffer::from_vec(s.as_str().as_bytes().to_vec()))),
        value => {
            let len = value.as_int().ok_or_else(|| type_error("buffer", "a size or string", value))?;
            let len = usize::try_from(len)
                .map_err(|_| Exception::new(ExcKind::RangeError, format!("buffer: invalid size {len}")))?;
            Ok(Value::new_buffer(Buffer::zeroed(len)))
        }
    }
}

/// Exposes a buffer's byte region as a raw pointer.
///
/// The pointer stays valid while the buffer payload is alive and unresized;
/// that lifetime contract is the caller's, exactly as with `alloc`.
pub(super) fn buffer_to_ptr(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "buffer_to_ptr")?;
    match &args[0] {
        Value::Buffer(buffer) => {
            let ptr = sync::lock(buffer).as_mut_ptr();
            Ok(Value::Ptr(ptr as usize))
        }
        other => Err(type_error("buffer_to_ptr", "a buffer", other)),
    }
}

/// `ptr_read_u8/u32/u64(ptr)` — reads a little-endian scalar at the address.
pub(super) fn ptr_read(args: &[Value], width: usize) -> RunResult<Value> {
    exact(args, 1, "ptr_read")?;
    let Value::Ptr(p) = &args[0] else {
        return Err(type_error("ptr_read", "a ptr", &args[0]));
    };
    let addr = *p as *const u8;
    // SAFETY: the address must be readable for `width` bytes; this is the
    // raw-memory contract the ptr type exists for.
    unsafe {
        Ok(match width {
            1 => Value::U8(addr.read_unaligned()),
            4 => Value::U32((addr as *const u32).read_unaligned()),
            _ => Value::U64((addr as *const u64).read_unaligned()),
        })
    }
}

/// `ptr_write_u8/u32/u64(ptr, value)` — writes a little-endian scalar.
pub(super) fn ptr_write(args: &[Value], width: usize) -> RunResult<Value> {
    exact(args, 2, "ptr_write")?;
    let Value::Ptr(p) = &args[0] else {
        return Err(type_error("ptr_write", "a ptr", &args[0]));
    };
    let value = int_arg(args, 1, "ptr_write")?;
    let addr = *p as *mut u8;
    // SAFETY: the address must be writable for `width` bytes.
    unsafe {
        match width {
            1 => addr.write_unaligned(value as u8),
            4 => (addr as *mut u32).write_unaligned(value as u32),
            _ => (addr as *mut u64).write_unaligned(value as u64),
        }
    }
    Ok(Value::Null)
}
