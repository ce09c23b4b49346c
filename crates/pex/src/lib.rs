#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are range-checked")]
#![expect(clippy::float_cmp, reason = "value semantics require exact float comparison")]

mod ast;
mod builtins;
mod bytecode;
mod effect;
mod error;
mod io;
mod ir;
mod lower;
mod parse;
mod run;
mod value;

pub use crate::{
    ast::{Expr, Node, Span},
    builtins::Builtins,
    bytecode::{BytecodeFile, Opcode, Vm, container},
    effect::{Continuation, DefaultHandler, EffectHandler},
    error::{HostError, MalformedBytecode, RunError, RunResult},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    ir::{Constant, IrExpr, IrModule, IrNode},
    lower::lower,
    parse::{ParseError, ParseOptions, parse},
    run::{CompileOptions, Program, compile_module, compile_source},
    value::{Closure, RegexValue, Upvalue, Value, number_repr},
};
