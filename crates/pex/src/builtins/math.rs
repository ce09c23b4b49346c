//! Arithmetic builtins. The VM's fast-path opcodes cover the common
//! two-number case and fall back here by name for everything else, so these
//! define the authoritative semantics.

use crate::{
    builtins::expect_number,
    error::{RunError, RunResult},
    value::Value,
};

/// `+`: variadic sum with identity 0. Every argument must be a number.
pub fn add(args: Vec<Value>) -> RunResult<Value> {
    let mut total = 0.0;
    for arg in &args {
        total += expect_number("+", arg)?;
    }
    Ok(Value::Number(total))
}

/// `-`: binary subtraction, or unary negation with a single argument.
pub fn sub(args: Vec<Value>) -> RunResult<Value> {
    match args.len() {
        1 => Ok(Value::Number(-expect_number("-", &args[0])?)),
        2 => {
            let a = expect_number("-", &args[0])?;
            let b = expect_number("-", &args[1])?;
            Ok(Value::Number(a - b))
        }
        n => Err(RunError::arity("-", "1 or 2", n)),
    }
}

/// `*`: variadic product with identity 1.
pub fn mul(args: Vec<Value>) -> RunResult<Value> {
    let mut total = 1.0;
    for arg in &args {
        total *= expect_number("*", arg)?;
    }
    Ok(Value::Number(total))
}

/// `/`: binary division; a zero divisor is an error rather than IEEE
/// infinity.
pub fn div(args: Vec<Value>) -> RunResult<Value> {
    if args.len() != 2 {
        return Err(RunError::arity("/", "2", args.len()));
    }
    let a = expect_number("/", &args[0])?;
    let b = expect_number("/", &args[1])?;
    if b == 0.0 {
        return Err(RunError::runtime("Division by zero"));
    }
    Ok(Value::Number(a / b))
}

/// `%`: binary remainder with the dividend's sign; a zero divisor is an
/// error.
pub fn modulo(args: Vec<Value>) -> RunResult<Value> {
    if args.len() != 2 {
        return Err(RunError::arity("%", "2", args.len()));
    }
    let a = expect_number("%", &args[0])?;
    let b = expect_number("%", &args[1])?;
    if b == 0.0 {
        return Err(RunError::runtime("Division by zero"));
    }
    Ok(Value::Number(a % b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_variadic_with_identity() {
        assert!(add(vec![]).unwrap().equal(&Value::Number(0.0)));
        let sum = add(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]).unwrap();
        assert!(sum.equal(&Value::Number(6.0)));
    }

    #[test]
    fn add_rejects_non_numbers() {
        let err = add(vec![Value::Number(1.0), Value::str("2")]).unwrap_err();
        assert!(err.to_string().contains('+'), "{err}");
    }

    #[test]
    fn sub_is_negation_with_one_arg() {
        assert!(sub(vec![Value::Number(4.0)]).unwrap().equal(&Value::Number(-4.0)));
    }

    #[test]
    fn mul_identity_is_one() {
        assert!(mul(vec![]).unwrap().equal(&Value::Number(1.0)));
    }

    #[test]
    fn div_and_mod_reject_zero() {
        assert!(div(vec![Value::Number(1.0), Value::Number(0.0)]).is_err());
        assert!(modulo(vec![Value::Number(1.0), Value::Number(0.0)]).is_err());
        assert!(div(vec![Value::Number(1.0), Value::Number(-0.0)]).is_err());
    }

    #[test]
    fn mod_keeps_dividend_sign() {
        let r = modulo(vec![Value::Number(-7.0), Value::Number(3.0)]).unwrap();
        assert!(r.equal(&Value::Number(-1.0)));
    }
}
