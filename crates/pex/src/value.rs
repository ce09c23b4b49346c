//! The tagged runtime value and its core operations.
//!
//! Small variants (`Null`, `Bool`, `Number`) are stored inline; `Str`,
//! `Array`, `Object`, `Regex`, and closure bodies live behind `Rc` owners.
//! The language has no way to build reference cycles from source, so plain
//! reference counting reclaims everything.

use std::{
    cell::{OnceCell, RefCell},
    fmt::{self, Write},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    builtins::Builtins,
    error::{RunError, RunResult},
};

/// Primary value type flowing through pipelines at runtime.
///
/// Exactly one variant is populated. `Builtin` and `Closure` are the two
/// faces of the language's `Function` type; they compare by identity, while
/// every other variant compares structurally.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// IEEE-754 double. `NaN` is falsy; `-0 == 0`.
    Number(f64),
    /// Immutable UTF-8 string.
    Str(Rc<str>),
    /// Ordered sequence; insertion order is preserved and indexable.
    Array(Rc<Vec<Value>>),
    /// String-keyed mapping; iteration order is insertion order.
    Object(Rc<IndexMap<String, Value>>),
    /// Regex literal, compiled lazily on first use.
    Regex(Rc<RegexValue>),
    /// Opaque host callable with no bytecode body.
    Builtin(Builtins),
    /// Function template paired with its captured upvalues.
    Closure(Rc<Closure>),
}

impl Value {
    /// Convenience constructor for string values.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Convenience constructor for array values.
    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(items))
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Regex(_) => "regex",
            Self::Builtin(_) | Self::Closure(_) => "function",
        }
    }

    /// Truthiness predicate used by `JUMP_IF_FALSE`, `bool`, and `not`.
    ///
    /// `Null` is false; booleans are themselves; numbers are true unless
    /// zero or `NaN`; strings are true unless empty; everything else is true.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Regex(_) | Self::Builtin(_) | Self::Closure(_) => true,
        }
    }

    /// Numeric coercion: identity for numbers, 1/0 for booleans, IEEE parse
    /// for strings (invalid input yields `NaN`), 0 for `Null`, `NaN` for
    /// everything else.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Str(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Self::Null => 0.0,
            _ => f64::NAN,
        }
    }

    /// Structural equality; functions compare by identity, regexes by
    /// pattern and flags. Values of different tags are never equal.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            // IEEE: NaN != NaN, -0 == 0
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                Rc::ptr_eq(a, b) || (a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equal(y)))
            }
            (Self::Object(a), Self::Object(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter()
                            .all(|(k, v)| b.get(k).is_some_and(|other_v| v.equal(other_v))))
            }
            (Self::Regex(a), Self::Regex(b)) => a.pattern == b.pattern && a.flags == b.flags,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Canonical display form: bare strings, `null`, shortest round-trip
    /// numbers, bracketed collections with comma-space separators.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            _ => {
                let mut out = String::new();
                self.write_repr(&mut out).expect("writing to String cannot fail");
                out
            }
        }
    }

    /// Writes the repr form: like display, but strings are double-quoted
    /// with escapes. Used for collection elements and `debug` output.
    pub fn write_repr(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(true) => f.write_str("true"),
            Self::Bool(false) => f.write_str("false"),
            Self::Number(n) => f.write_str(&number_repr(*n)),
            Self::Str(s) => write_quoted(s, f),
            Self::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_repr(f)?;
                }
                f.write_char(']')
            }
            Self::Object(entries) => {
                f.write_char('{')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: ")?;
                    value.write_repr(f)?;
                }
                f.write_char('}')
            }
            Self::Regex(rx) => write!(f, "/{}/{}", rx.pattern, rx.flags),
            Self::Builtin(b) => write!(f, "<builtin {b}>"),
            Self::Closure(_) => f.write_str("<fn>"),
        }
    }

    /// Converts a JSON document into a runtime value.
    ///
    /// This is the host-input path: the CLI reads the program input as JSON
    /// and feeds the result to `Vm::run`. Object key order is preserved.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::str(s),
            serde_json::Value::Array(items) => Self::array(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(entries) => Self::Object(Rc::new(
                entries.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect(),
            )),
        }
    }

    /// Converts a runtime value back to JSON.
    ///
    /// Functions and regexes have no JSON form and serialize as their repr
    /// string; non-finite numbers serialize as `null` (JSON has no NaN).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.to_string()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Regex(_) | Self::Builtin(_) | Self::Closure(_) => {
                serde_json::Value::String(self.to_display_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            _ => self.write_repr(f),
        }
    }
}

/// Renders a number in its canonical display form.
///
/// Integral finite values print without a fractional part; other finite
/// values use the shortest representation that round-trips through IEEE-754.
#[must_use]
pub fn number_repr(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    // Integral values inside the exactly-representable range drop the ".0";
    // -0 renders as "0" since -0 == 0.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return format!("{}", n as i64);
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(n).to_owned()
}

fn write_quoted(s: &str, f: &mut impl Write) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            _ => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

/// A regex value: pattern plus flags, compiled on first use.
///
/// Flags are drawn from `{g,i,m,s,u,v,y}`. `i`/`m`/`s` map onto the engine's
/// inline flags; `g` selects find-all semantics in `match`/`replace`; `y`
/// anchors matching at the start; `u`/`v` are accepted and ignored because
/// the engine is always Unicode-aware.
#[derive(Debug)]
pub struct RegexValue {
    pub pattern: String,
    pub flags: String,
    compiled: OnceCell<regex::Regex>,
}

impl RegexValue {
    /// Creates an uncompiled regex value.
    #[must_use]
    pub fn new(pattern: String, flags: String) -> Self {
        Self {
            pattern,
            flags,
            compiled: OnceCell::new(),
        }
    }

    /// Whether the given flag letter is set.
    #[must_use]
    pub fn has_flag(&self, flag: char) -> bool {
        self.flags.contains(flag)
    }

    /// Returns the compiled engine regex, compiling on first use.
    ///
    /// Compilation failures surface as runtime errors at the call site that
    /// first exercises the pattern, not at load time.
    pub fn compiled(&self) -> RunResult<&regex::Regex> {
        if let Some(rx) = self.compiled.get() {
            return Ok(rx);
        }
        let mut source = String::new();
        let mut inline = String::new();
        for flag in ['i', 'm', 's'] {
            if self.has_flag(flag) {
                inline.push(flag);
            }
        }
        if !inline.is_empty() {
            write!(source, "(?{inline})").expect("writing to String cannot fail");
        }
        if self.has_flag('y') {
            // Sticky matching anchors at the start of the haystack.
            source.push_str("\\A");
        }
        write!(source, "(?:{})", self.pattern).expect("writing to String cannot fail");
        let rx = regex::Regex::new(&source)
            .map_err(|err| RunError::runtime(format!("invalid regex /{}/{}: {err}", self.pattern, self.flags)))?;
        Ok(self.compiled.get_or_init(|| rx))
    }
}

/// A runtime closure: a function template plus the upvalue cells it
/// captured when `MAKE_CLOSURE` executed.
#[derive(Debug)]
pub struct Closure {
    /// Index into the program's function template array.
    pub template: u32,
    /// Captured cells, in the template's upvalue-descriptor order.
    pub upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

/// An indirection cell shared by a closure and its enclosing scope.
///
/// Open cells point at a live frame's local slot (an absolute operand-stack
/// index); when the frame returns, the VM copies the slot's value into the
/// cell and flips it to `Closed`, so escaping closures observe the value the
/// binding held at the moment its enclosing scope ended.
#[derive(Debug)]
pub enum Upvalue {
    /// Still pointing at a live frame's slot.
    Open(usize),
    /// The frame has returned; the cell owns the final value.
    Closed(Value),
}
