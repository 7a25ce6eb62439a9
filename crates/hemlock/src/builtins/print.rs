use crate::{
    eval::Interp,
    exception::RunResult,
    value::Value,
};

/// `print(args...)` — arguments separated by single spaces, terminated by a
/// newline, routed through the context's `PrintWriter`.
pub(super) fn print(interp: &Interp, args: &[Value]) -> RunResult<Value> {
    let out = interp.ctx.print.as_ref();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_char(' ');
        }
        out.write_str(&arg.to_string());
    }
    out.push_char('\n');
    Ok(Value::Null)
}
