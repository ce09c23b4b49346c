//! Logic and null-handling builtins: `not`, `??`, and the internal `assert`.
//!
//! `and`/`or` are compiler-level short-circuit forms and never appear here.

use crate::{
    builtins::one,
    error::{RunError, RunResult},
    value::Value,
};

pub fn not(args: Vec<Value>) -> RunResult<Value> {
    Ok(Value::Bool(!one("not", args)?.truthy()))
}

/// `??(a, b)`: `a` unless it is `Null`, else `b`. Both arguments are
/// evaluated before the call; this is selection, not short-circuiting.
pub fn coalesce(args: Vec<Value>) -> RunResult<Value> {
    if args.len() != 2 {
        return Err(RunError::arity("??", "2", args.len()));
    }
    let mut args = args;
    let b = args.pop().expect("length checked");
    let a = args.pop().expect("length checked");
    Ok(match a {
        Value::Null => b,
        other => other,
    })
}

/// `assert(v, msg?)`: yields `Null` when `v` is truthy, otherwise raises.
/// Reached via the lowering of the `assert` effect form, so assertion
/// failures surface as runtime errors rather than host effects.
pub fn assert_(args: Vec<Value>) -> RunResult<Value> {
    let (value, message) = match args.len() {
        1 => {
            let mut args = args;
            (args.pop().expect("length checked"), None)
        }
        2 => {
            let mut args = args;
            let msg = args.pop().expect("length checked");
            (args.pop().expect("length checked"), Some(msg))
        }
        n => return Err(RunError::arity("assert", "1 or 2", n)),
    };
    if value.truthy() {
        return Ok(Value::Null);
    }
    Err(match message {
        Some(msg) => RunError::runtime(format!("Assertion failed: {}", msg.to_display_string())),
        None => RunError::runtime("Assertion failed"),
    })
}
