//! Regex builtins: `match` and `test`.

use std::rc::Rc;

use crate::{
    builtins::{expect_str, two},
    error::{RunError, RunResult},
    value::{RegexValue, Value},
};

fn expect_regex<'v>(name: &str, value: &'v Value) -> RunResult<&'v Rc<RegexValue>> {
    match value {
        Value::Regex(rx) => Ok(rx),
        other => Err(RunError::type_mismatch(name, "a regex", other.type_name())),
    }
}

/// `match(str, rx)`: without the `g` flag, an array of the full match and
/// each capture group (`Null` for groups that did not participate); with
/// `g`, an array of every full match. `Null` when nothing matches.
pub fn match_(args: Vec<Value>) -> RunResult<Value> {
    let (subject, pattern) = two("match", args)?;
    let subject = expect_str("match", &subject)?;
    let rx = expect_regex("match", &pattern)?;
    let compiled = rx.compiled()?;

    if rx.has_flag('g') {
        let matches: Vec<Value> = compiled.find_iter(subject).map(|m| Value::str(m.as_str())).collect();
        if matches.is_empty() {
            return Ok(Value::Null);
        }
        return Ok(Value::array(matches));
    }

    match compiled.captures(subject) {
        Some(captures) => {
            let groups = captures
                .iter()
                .map(|group| group.map_or(Value::Null, |m| Value::str(m.as_str())))
                .collect();
            Ok(Value::array(groups))
        }
        None => Ok(Value::Null),
    }
}

/// `test(str, rx)`: whether the pattern matches anywhere.
pub fn test(args: Vec<Value>) -> RunResult<Value> {
    let (subject, pattern) = two("test", args)?;
    let subject = expect_str("test", &subject)?;
    let rx = expect_regex("test", &pattern)?;
    Ok(Value::Bool(rx.compiled()?.is_match(subject)))
}
