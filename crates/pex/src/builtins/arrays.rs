//! Array builtins: `first`, `last`, and the total accessor `get`.

use crate::{
    builtins::{one, two_or_three},
    error::{RunError, RunResult},
    value::Value,
};

pub fn first(args: Vec<Value>) -> RunResult<Value> {
    let value = one("first", args)?;
    match &value {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
        other => Err(RunError::type_mismatch("first", "an array", other.type_name())),
    }
}

pub fn last(args: Vec<Value>) -> RunResult<Value> {
    let value = one("last", args)?;
    match &value {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
        other => Err(RunError::type_mismatch("last", "an array", other.type_name())),
    }
}

/// `get(arr, idx, default?)`: total accessor backing `$N`: a non-array
/// subject or an out-of-range index yields the default (or `Null`) instead
/// of aborting the pipeline.
pub fn get(args: Vec<Value>) -> RunResult<Value> {
    let (subject, index, default) = two_or_three("get", args)?;
    let fallback = default.unwrap_or(Value::Null);
    let Value::Array(items) = &subject else {
        return Ok(fallback);
    };
    let Value::Number(n) = &index else {
        return Ok(fallback);
    };
    if n.fract() != 0.0 || *n < 0.0 || n.is_nan() {
        return Ok(fallback);
    }
    match items.get(*n as usize) {
        Some(item) => Ok(item.clone()),
        None => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_last_of_empty_are_null() {
        let empty = Value::array(vec![]);
        assert!(first(vec![empty.clone()]).unwrap().equal(&Value::Null));
        assert!(last(vec![empty]).unwrap().equal(&Value::Null));
        assert!(first(vec![Value::Null]).is_err());
    }

    #[test]
    fn get_is_total() {
        let arr = Value::array(vec![Value::str("a"), Value::str("b")]);
        assert!(
            get(vec![arr.clone(), Value::Number(1.0)])
                .unwrap()
                .equal(&Value::str("b"))
        );
        assert!(get(vec![arr.clone(), Value::Number(9.0)]).unwrap().equal(&Value::Null));
        let with_default = get(vec![arr, Value::Number(9.0), Value::str("d")]).unwrap();
        assert!(with_default.equal(&Value::str("d")));
        // non-array subjects fall back rather than error
        assert!(get(vec![Value::Number(3.0), Value::Number(0.0)]).unwrap().equal(&Value::Null));
    }
}
