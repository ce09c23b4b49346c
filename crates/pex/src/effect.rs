//! The algebraic-effect handler protocol.
//!
//! `EFFECT` is the VM's only suspension point: the handler runs
//! synchronously on the VM's thread and must resume the continuation exactly
//! once before returning. `Continuation::resume` consumes the handle, so a
//! double resume is unrepresentable; a handler that returns without
//! resuming is detected by the VM and raised as a runtime error.

use std::{cell::RefCell, rc::Rc};

use crate::{error::HostError, io::PrintWriter, value::Value};

/// Host-side handler for named effects.
///
/// The handler may run arbitrary host code, including other VM instances
/// (nested effects re-enter the handler). Returning `Err` propagates the
/// host error out of `Vm::run` unchanged.
pub trait EffectHandler {
    fn handle(&mut self, name: &str, args: &[Value], k: Continuation) -> Result<(), HostError>;
}

pub(crate) enum ResumeState {
    Pending,
    Resumed(Value),
}

/// Single-use resumption handle for one effect dispatch.
#[must_use = "an effect continuation must be resumed exactly once"]
pub struct Continuation {
    state: Rc<RefCell<ResumeState>>,
}

impl Continuation {
    pub(crate) fn new() -> (Self, Rc<RefCell<ResumeState>>) {
        let state = Rc::new(RefCell::new(ResumeState::Pending));
        (Self { state: state.clone() }, state)
    }

    /// Supplies the value the suspended `EFFECT` instruction will push.
    /// Consumes the handle; each dispatch can be resumed only once.
    pub fn resume(self, value: Value) {
        *self.state.borrow_mut() = ResumeState::Resumed(value);
    }
}

/// The handler installed by `Vm::new`: `print` and `debug` write their
/// arguments to a `PrintWriter` and resume `Null`; any other effect is an
/// error.
#[derive(Debug, Default)]
pub struct DefaultHandler<W: PrintWriter> {
    out: W,
}

impl<W: PrintWriter> DefaultHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: PrintWriter> EffectHandler for DefaultHandler<W> {
    fn handle(&mut self, name: &str, args: &[Value], k: Continuation) -> Result<(), HostError> {
        match name {
            "print" => {
                let line = args.iter().map(Value::to_display_string).collect::<Vec<_>>().join(" ");
                self.out.write_line(&line);
                k.resume(Value::Null);
                Ok(())
            }
            "debug" => {
                let mut line = String::from("debug:");
                for arg in args {
                    line.push(' ');
                    arg.write_repr(&mut line).expect("writing to String cannot fail");
                }
                self.out.write_line(&line);
                k.resume(Value::Null);
                Ok(())
            }
            _ => Err(format!("no handler for effect '{name}'").into()),
        }
    }
}
