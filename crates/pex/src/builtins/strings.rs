//! String builtins: `split`, `join`, `trim`, `upper`, `lower`, `replace`,
//! `substring`, and `len`.

use crate::{
    builtins::{expect_number, expect_str, one, three, two_or_three},
    error::{RunError, RunResult},
    value::Value,
};

/// `split(str, delim, limit?)`: splits on a string delimiter. An empty
/// delimiter splits into characters; a limit caps the number of pieces.
pub fn split(args: Vec<Value>) -> RunResult<Value> {
    let (subject, delim, limit) = two_or_three("split", args)?;
    let subject = expect_str("split", &subject)?;
    let delim = expect_str("split", &delim)?;
    let limit = match limit {
        Some(v) => {
            let n = expect_number("split", &v)?;
            if n.is_nan() || n < 0.0 {
                Some(0)
            } else {
                Some(n as usize)
            }
        }
        None => None,
    };

    let mut pieces: Vec<Value> = if delim.is_empty() {
        subject.chars().map(|c| Value::str(c.to_string())).collect()
    } else {
        subject.split(delim).map(Value::str).collect()
    };
    if let Some(limit) = limit {
        pieces.truncate(limit);
    }
    Ok(Value::array(pieces))
}

/// `join(…)`: concatenates the display forms of its arguments with no
/// separator; array arguments contribute each element in turn.
#[must_use]
pub fn join(args: &[Value]) -> Value {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Array(items) => {
                for item in items.iter() {
                    out.push_str(&item.to_display_string());
                }
            }
            other => out.push_str(&other.to_display_string()),
        }
    }
    Value::str(out)
}

pub fn trim(args: Vec<Value>) -> RunResult<Value> {
    let value = one("trim", args)?;
    Ok(Value::str(expect_str("trim", &value)?.trim()))
}

pub fn upper(args: Vec<Value>) -> RunResult<Value> {
    let value = one("upper", args)?;
    Ok(Value::str(expect_str("upper", &value)?.to_uppercase()))
}

pub fn lower(args: Vec<Value>) -> RunResult<Value> {
    let value = one("lower", args)?;
    Ok(Value::str(expect_str("lower", &value)?.to_lowercase()))
}

/// `replace(str, pat, rep)`: with a string pattern replaces the first
/// occurrence; with a regex pattern, the first match, or every match when
/// the `g` flag is set. `$1`-style group references work in the replacement.
pub fn replace(args: Vec<Value>) -> RunResult<Value> {
    let (subject, pattern, replacement) = three("replace", args)?;
    let subject = expect_str("replace", &subject)?;
    let replacement = expect_str("replace", &replacement)?;
    match &pattern {
        Value::Str(pat) => Ok(Value::str(subject.replacen(pat.as_ref(), replacement, 1))),
        Value::Regex(rx) => {
            let compiled = rx.compiled()?;
            let result = if rx.has_flag('g') {
                compiled.replace_all(subject, replacement)
            } else {
                compiled.replace(subject, replacement)
            };
            Ok(Value::str(result))
        }
        other => Err(RunError::type_mismatch(
            "replace",
            "a string or regex pattern",
            other.type_name(),
        )),
    }
}

/// `substring(str, start, end?)`: character-indexed; bounds clamp to the
/// string and swap when reversed.
pub fn substring(args: Vec<Value>) -> RunResult<Value> {
    let (subject, start, end) = two_or_three("substring", args)?;
    let subject = expect_str("substring", &subject)?;
    let char_count = subject.chars().count();
    let clamp = |v: f64| -> usize {
        if v.is_nan() || v < 0.0 {
            0
        } else {
            (v as usize).min(char_count)
        }
    };
    let mut start = clamp(expect_number("substring", &start)?);
    let mut end = match end {
        Some(v) => clamp(expect_number("substring", &v)?),
        None => char_count,
    };
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    let result: String = subject.chars().skip(start).take(end - start).collect();
    Ok(Value::str(result))
}

/// `len(str|arr)`: character count for strings, element count for arrays.
pub fn len(args: Vec<Value>) -> RunResult<Value> {
    let value = one("len", args)?;
    match &value {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::Array(items) => Ok(Value::Number(items.len() as f64)),
        other => Err(RunError::type_mismatch("len", "a string or array", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_with_limit() {
        let result = split(vec![Value::str("a,b,c"), Value::str(","), Value::Number(2.0)]).unwrap();
        assert_eq!(result.to_display_string(), "[\"a\", \"b\"]");
    }

    #[test]
    fn split_empty_delim_chars() {
        let result = split(vec![Value::str("héllo"), Value::str("")]).unwrap();
        let Value::Array(items) = &result else { panic!() };
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn join_flattens_arrays() {
        let arr = Value::array(vec![Value::str("a"), Value::Number(1.0)]);
        let result = join(&[arr, Value::str("-"), Value::Bool(true)]);
        assert_eq!(result.to_display_string(), "a1-true");
    }

    #[test]
    fn replace_string_pattern_is_first_only() {
        let result = replace(vec![Value::str("aaa"), Value::str("a"), Value::str("b")]).unwrap();
        assert_eq!(result.to_display_string(), "baa");
    }

    #[test]
    fn substring_clamps_and_swaps() {
        let result = substring(vec![Value::str("hello"), Value::Number(4.0), Value::Number(1.0)]).unwrap();
        assert_eq!(result.to_display_string(), "ell");
        let result = substring(vec![Value::str("hello"), Value::Number(2.0)]).unwrap();
        assert_eq!(result.to_display_string(), "llo");
    }

    #[test]
    fn len_counts_chars_not_bytes() {
        let result = len(vec![Value::str("héllo")]).unwrap();
        assert!(result.equal(&Value::Number(5.0)));
        assert!(len(vec![Value::Number(1.0)]).is_err());
    }
}
