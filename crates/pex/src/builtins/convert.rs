//! Conversion builtins: `int`, `float`, `string`, `bool`.

use crate::{builtins::one, error::RunResult, value::Value};

/// `int(v)`: numeric coercion truncated toward zero; `NaN` becomes 0.
pub fn int(args: Vec<Value>) -> RunResult<Value> {
    let n = one("int", args)?.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    Ok(Value::Number(n))
}

/// `float(v)`: numeric coercion; `NaN` becomes 0.
pub fn float(args: Vec<Value>) -> RunResult<Value> {
    let n = one("float", args)?.to_number();
    Ok(Value::Number(if n.is_nan() { 0.0 } else { n }))
}

/// `string(v)`: the canonical display form.
pub fn string(args: Vec<Value>) -> RunResult<Value> {
    Ok(Value::str(one("string", args)?.to_display_string()))
}

/// `bool(v)`: truthiness as a boolean.
pub fn bool_(args: Vec<Value>) -> RunResult<Value> {
    Ok(Value::Bool(one("bool", args)?.truthy()))
}
