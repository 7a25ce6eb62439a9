//! Higher-order operations over arrays and strings (`map`, `filter`,
//! `reduce`) plus `len`. Available both as builtins (`map(a, f)`) and as
//! methods (`a.map(f)`) — the evaluator's method dispatch routes here.

use smallvec::smallvec;

use super::type_error;
use crate::{
    eval::Interp,
    exception::{ExcKind, Exception, RunResult},
    sync,
    value::Value,
};

/// Snapshot of a value's elements for iteration: array items, string
/// codepoints (as runes), or buffer bytes.
pub(crate) fn iter_items(value: &Value, op: &str) -> RunResult<Vec<Value>> {
    match value {
        Value::Array(array) => Ok(sync::lock(array).items.clone()),
        Value::Str(s) => Ok(s.as_str().chars().map(Value::Rune).collect()),
        Value::Buffer(buffer) => Ok(sync::lock(buffer).as_slice().iter().map(|b| Value::U8(*b)).collect()),
        other => Err(type_error(op, "an array or string", other)),
    }
}

pub(crate) fn len(args: &[Value]) -> RunResult<Value> {
    super::exact(args, 1, "len")?;
    let len = match &args[0] {
        Value::Str(s) => s.char_len(),
        Value::Array(array) => sync::lock(array).items.len(),
        Value::Buffer(buffer) => sync::lock(buffer).len(),
        Value::Object(object) => sync::lock(object).fields.len(),
        other => return Err(type_error("len", "a string, array, buffer, or object", other)),
    };
    Ok(Value::I64(len as i64))
}

pub(crate) fn map(interp: &Interp, recv: &Value, f: &Value, line: u32) -> RunResult<Value> {
    let items = iter_items(recv, "map")?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(interp.call_callable(f, smallvec![item], line)?);
    }
    Ok(Value::new_array(out, None))
}

pub(crate) fn filter(interp: &Interp, recv: &Value, f: &Value, line: u32) -> RunResult<Value> {
    let items = iter_items(recv, "filter")?;
    let mut out = Vec::new();
    for item in items {
        if interp.call_callable(f, smallvec![item.clone()], line)?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::new_array(out, None))
}

/// `reduce(seq, f, init?)` — without an initial accumulator the first
/// element seeds the fold; reducing an empty sequence without one is an
/// error.
pub(crate) fn reduce(
    interp: &Interp,
    recv: &Value,
    f: &Value,
    init: Option<Value>,
    line: u32,
) -> RunResult<Value> {
    let items = iter_items(recv, "reduce")?;
    let mut iter = items.into_iter();
    let mut acc = match init {
        Some(init) => init,
        None => iter.next().ok_or_else(|| {
            Exception::new(ExcKind::TypeError, "reduce of empty sequence with no initial value")
        })?,
    };
    for item in iter {
        acc = interp.call_callable(f, smallvec![acc, item], line)?;
    }
    Ok(acc)
}
