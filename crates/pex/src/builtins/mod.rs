//! Host functions available through the global table.
//!
//! Every builtin is pure with respect to the VM: it receives its popped
//! argument values and returns a result or a runtime error naming itself and
//! the offending types or counts. Related builtins share a submodule.

mod arrays;
mod compare;
mod convert;
mod logic;
mod math;
mod regex_fns;
mod strings;

use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{RunError, RunResult},
    value::Value,
};

/// Enumerates every interpreter-native builtin function.
///
/// The strum derives give the surface-name mapping used by `LOAD_GLOBAL`:
/// word builtins serialize to lowercase, operator builtins to their symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtins {
    // strings
    Split,
    Join,
    Trim,
    Upper,
    Lower,
    Replace,
    Substring,
    Len,
    // conversion
    Int,
    Float,
    String,
    Bool,
    // arrays
    First,
    Last,
    Get,
    // comparison
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    // math
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    // logic and null handling
    Not,
    #[strum(serialize = "??")]
    Coalesce,
    // regex
    Match,
    Test,
    /// Raises a runtime error when its argument is falsy. The lowerer routes
    /// `assert` here so failures never reach the effect handler.
    Assert,
}

impl Builtins {
    /// Looks a builtin up by its surface name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    /// The surface name, as it appears in source and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Calls this builtin with the given popped arguments.
    pub fn call(self, args: Vec<Value>) -> RunResult<Value> {
        match self {
            Self::Split => strings::split(args),
            Self::Join => Ok(strings::join(&args)),
            Self::Trim => strings::trim(args),
            Self::Upper => strings::upper(args),
            Self::Lower => strings::lower(args),
            Self::Replace => strings::replace(args),
            Self::Substring => strings::substring(args),
            Self::Len => strings::len(args),
            Self::Int => convert::int(args),
            Self::Float => convert::float(args),
            Self::String => convert::string(args),
            Self::Bool => convert::bool_(args),
            Self::First => arrays::first(args),
            Self::Last => arrays::last(args),
            Self::Get => arrays::get(args),
            Self::Eq => compare::eq(args),
            Self::Ne => compare::ne(args),
            Self::Lt | Self::Gt | Self::Le | Self::Ge => compare::ordered(self, args),
            Self::Add => math::add(args),
            Self::Sub => math::sub(args),
            Self::Mul => math::mul(args),
            Self::Div => math::div(args),
            Self::Mod => math::modulo(args),
            Self::Not => logic::not(args),
            Self::Coalesce => logic::coalesce(args),
            Self::Match => regex_fns::match_(args),
            Self::Test => regex_fns::test(args),
            Self::Assert => logic::assert_(args),
        }
    }
}

/// Extracts exactly one argument.
fn one(name: &str, mut args: Vec<Value>) -> RunResult<Value> {
    if args.len() != 1 {
        return Err(RunError::arity(name, "1", args.len()));
    }
    Ok(args.pop().expect("length checked"))
}

/// Extracts exactly two arguments.
fn two(name: &str, mut args: Vec<Value>) -> RunResult<(Value, Value)> {
    if args.len() != 2 {
        return Err(RunError::arity(name, "2", args.len()));
    }
    let b = args.pop().expect("length checked");
    let a = args.pop().expect("length checked");
    Ok((a, b))
}

/// Extracts exactly three arguments.
fn three(name: &str, mut args: Vec<Value>) -> RunResult<(Value, Value, Value)> {
    if args.len() != 3 {
        return Err(RunError::arity(name, "3", args.len()));
    }
    let c = args.pop().expect("length checked");
    let b = args.pop().expect("length checked");
    let a = args.pop().expect("length checked");
    Ok((a, b, c))
}

/// Extracts two required arguments plus one optional.
fn two_or_three(name: &str, mut args: Vec<Value>) -> RunResult<(Value, Value, Option<Value>)> {
    match args.len() {
        2 => {
            let b = args.pop().expect("length checked");
            let a = args.pop().expect("length checked");
            Ok((a, b, None))
        }
        3 => {
            let c = args.pop().expect("length checked");
            let b = args.pop().expect("length checked");
            let a = args.pop().expect("length checked");
            Ok((a, b, Some(c)))
        }
        n => Err(RunError::arity(name, "2 or 3", n)),
    }
}

/// Borrows a string payload, or fails naming the builtin.
fn expect_str<'v>(name: &str, value: &'v Value) -> RunResult<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(RunError::type_mismatch(name, "a string", other.type_name())),
    }
}

/// Extracts a number payload, or fails naming the builtin.
fn expect_number(name: &str, value: &Value) -> RunResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(RunError::type_mismatch(name, "a number", other.type_name())),
    }
}
