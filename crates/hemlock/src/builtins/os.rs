//! File and process builtins: `open`, `exec`, and the file methods the
//! evaluator dispatches (`read`, `write`, `seek`, `close`).

use std::{
    io::{Read as _, Seek as _, SeekFrom, Write as _},
    process::Command,
    sync::{Arc, Mutex},
};

use super::{exact, str_arg, type_error};
use crate::{
    exception::{ExcKind, Exception, RunResult, Unwind},
    object::Object,
    sync,
    value::{FileHandle, Value},
};

fn io_error(context: &str, err: &std::io::Error) -> Unwind {
    Exception::new(ExcKind::IOError, format!("{context}: {err}")).into()
}

/// `open(path, mode)` with C-style modes: `r`, `w`, `a`, `r+`, `w+`, `a+`.
pub(super) fn open(args: &[Value]) -> RunResult<Value> {
    exact(args, 2, "open")?;
    let path = str_arg(args, 0, "open")?;
    let mode = str_arg(args, 1, "open")?;
    let mut options = std::fs::OpenOptions::new();
    match mode {
        "r" => options.read(true),
        "w" => options.write(true).create(true).truncate(true),
        "a" => options.append(true).create(true),
        "r+" => options.read(true).write(true),
        "w+" => options.read(true).write(true).create(true).truncate(true),
        "a+" => options.read(true).append(true).create(true),
        other => {
            return Err(Exception::new(ExcKind::TypeError, format!("open: invalid mode {other:?}")).into());
        }
    };
    let file = options
        .open(path)
        .map_err(|err| io_error(&format!("open {path:?}"), &err))?;
    Ok(Value::File(Arc::new(Mutex::new(FileHandle {
        file: Some(file),
        path: path.to_owned(),
        mode: mode.to_owned(),
    }))))
}

/// `exec(cmd, args?)` — runs a process to completion and returns an object
/// `{ status, stdout, stderr }`.
pub(super) fn exec(args: &[Value]) -> RunResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(super::arity_error("exec", "1 or 2", args.len()).into());
    }
    let cmd = str_arg(args, 0, "exec")?;
    let mut command = Command::new(cmd);
    if let Some(arg_list) = args.get(1) {
        let Value::Array(array) = arg_list else {
            return Err(type_error("exec", "an array of argument strings", arg_list));
        };
        for item in &sync::lock(array).items {
            match item {
                Value::Str(s) => {
                    command.arg(s.as_str());
                }
                other => return Err(type_error("exec", "an array of argument strings", other)),
            }
        }
    }
    let output = command
        .output()
        .map_err(|err| io_error(&format!("exec {cmd:?}"), &err))?;
    let mut result = Object::new(None);
    result.set("status", Value::I64(i64::from(output.status.code().unwrap_or(-1))));
    result.set("stdout", Value::new_str(String::from_utf8_lossy(&output.stdout).into_owned()));
    result.set("stderr", Value::new_str(String::from_utf8_lossy(&output.stderr).into_owned()));
    Ok(Value::new_object(result))
}

fn with_open_file<T>(
    handle: &Arc<Mutex<FileHandle>>,
    op: &str,
    f: impl FnOnce(&mut std::fs::File) -> Result<T, std::io::Error>,
) -> RunResult<T> {
    let mut guard = sync::lock(handle);
    let path = guard.path.clone();
    match guard.file.as_mut() {
        Some(file) => f(file).map_err(|err| io_error(&format!("{op} {path:?}"), &err)),
        None => Err(Exception::new(ExcKind::IOError, format!("{op} on closed file {path:?}")).into()),
    }
}

/// `file.read()` reads to end; `file.read(n)` reads up to `n` bytes. Both
/// decode lossily to a string.
pub(crate) fn file_read(handle: &Arc<Mutex<FileHandle>>, args: &[Value]) -> RunResult<Value> {
    let text = match args.first() {
        None => with_open_file(handle, "read", |file| {
            let mut out = String::new();
            file.read_to_string(&mut out)?;
            Ok(out)
        })?,
        Some(limit) => {
            let n = limit
                .as_int()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| type_error("read", "a byte count", limit))?;
            with_open_file(handle, "read", |file| {
                let mut buf = vec![0u8; n];
                let read = file.read(&mut buf)?;
                buf.truncate(read);
                Ok(String::from_utf8_lossy(&buf).into_owned())
            })?
        }
    };
    Ok(Value::new_str(text))
}

/// `file.write(string | buffer)` — returns the number of bytes written.
pub(crate) fn file_write(handle: &Arc<Mutex<FileHandle>>, args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "write")?;
    let written = match &args[0] {
        Value::Str(s) => with_open_file(handle, "write", |file| {
            file.write_all(s.as_str().as_bytes())?;
            Ok(s.byte_len())
        })?,
        Value::Buffer(buffer) => {
            let bytes = sync::lock(buffer).as_slice().to_vec();
            with_open_file(handle, "write", |file| {
                file.write_all(&bytes)?;
                Ok(bytes.len())
            })?
        }
        other => return Err(type_error("write", "a string or buffer", other)),
    };
    Ok(Value::I64(written as i64))
}

/// `file.seek(pos)` — absolute seek; returns the new position.
pub(crate) fn file_seek(handle: &Arc<Mutex<FileHandle>>, args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "seek")?;
    let pos = args[0]
        .as_int()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| type_error("seek", "a byte offset", &args[0]))?;
    let new_pos = with_open_file(handle, "seek", |file| file.seek(SeekFrom::Start(pos)))?;
    Ok(Value::I64(new_pos as i64))
}

pub(crate) fn file_close(handle: &Arc<Mutex<FileHandle>>) -> RunResult<Value> {
    sync::lock(handle).file = None;
    Ok(Value::Null)
}
