//! Comparison builtins: structural `==`/`!=`, numeric-coercing ordered
//! comparisons.

use crate::{
    builtins::{Builtins, two},
    error::RunResult,
    value::Value,
};

pub fn eq(args: Vec<Value>) -> RunResult<Value> {
    let (a, b) = two("==", args)?;
    Ok(Value::Bool(a.equal(&b)))
}

pub fn ne(args: Vec<Value>) -> RunResult<Value> {
    let (a, b) = two("!=", args)?;
    Ok(Value::Bool(!a.equal(&b)))
}

/// Ordered comparisons coerce both operands to numbers; any comparison
/// involving `NaN` is false.
pub fn ordered(op: Builtins, args: Vec<Value>) -> RunResult<Value> {
    let (a, b) = two(op.name(), args)?;
    let a = a.to_number();
    let b = b.to_number();
    let result = match op {
        Builtins::Lt => a < b,
        Builtins::Gt => a > b,
        Builtins::Le => a <= b,
        Builtins::Ge => a >= b,
        _ => unreachable!("ordered() is only dispatched for ordered comparison builtins"),
    };
    Ok(Value::Bool(result))
}
