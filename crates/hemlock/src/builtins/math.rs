use super::{arity_error, exact, type_error};
use crate::{
    exception::{ExcKind, Exception, RunResult},
    value::Value,
};

pub(super) fn abs(args: &[Value]) -> RunResult<Value> {
    exact(args, 1, "abs")?;
    match &args[0] {
        Value::F32(v) => Ok(Value::F32(v.abs())),
        Value::F64(v) => Ok(Value::F64(v.abs())),
        value => match value.as_int() {
            Some(v) => Ok(Value::wrap_int(v.abs(), value.tag())),
            None => Err(type_error("abs", "a number", value)),
        },
    }
}

pub(super) fn floor(args: &[Value]) -> RunResult<Value> {
    unary_float(args, "floor", f64::floor)
}

pub(super) fn ceil(args: &[Value]) -> RunResult<Value> {
    unary_float(args, "ceil", f64::ceil)
}

pub(super) fn sqrt(args: &[Value]) -> RunResult<Value> {
    unary_float(args, "sqrt", f64::sqrt)
}

fn unary_float(args: &[Value], name: &str, f: fn(f64) -> f64) -> RunResult<Value> {
    exact(args, 1, name)?;
    match args[0].as_numeric_f64() {
        Some(v) => Ok(Value::F64(f(v))),
        None => Err(type_error(name, "a number", &args[0])),
    }
}

/// `pow(base, exp)` — integer result for integer operands with a
/// non-negative exponent (wrapping at 64 bits), float otherwise.
pub(super) fn pow(args: &[Value]) -> RunResult<Value> {
    exact(args, 2, "pow")?;
    if let (Some(base), Some(exp)) = (args[0].as_int(), args[1].as_int())
        && let Ok(exp) = u32::try_from(exp)
    {
        let result = (base as i64).wrapping_pow(exp);
        return Ok(Value::I64(result));
    }
    match (args[0].as_numeric_f64(), args[1].as_numeric_f64()) {
        (Some(base), Some(exp)) => Ok(Value::F64(base.powf(exp))),
        _ => Err(Exception::new(ExcKind::TypeError, "pow expects two numbers").into()),
    }
}

pub(super) fn min(args: &[Value]) -> RunResult<Value> {
    extremum(args, "min", std::cmp::Ordering::Less)
}

pub(super) fn max(args: &[Value]) -> RunResult<Value> {
    extremum(args, "max", std::cmp::Ordering::Greater)
}

fn extremum(args: &[Value], name: &str, keep: std::cmp::Ordering) -> RunResult<Value> {
    if args.is_empty() {
        return Err(arity_error(name, "at least 1", 0).into());
    }
    let mut best = args[0].clone();
    for candidate in &args[1..] {
        let ordering = candidate.compare(&best).ok_or_else(|| {
            Exception::new(
                ExcKind::TypeError,
                format!("{name}: cannot compare {} with {}", candidate.type_name(), best.type_name()),
            )
        })?;
        if ordering == keep {
            best = candidate.clone();
        }
    }
    Ok(best)
}
