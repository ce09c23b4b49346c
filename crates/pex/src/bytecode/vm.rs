//! The stack virtual machine.
//!
//! Execution uses one operand stack that also holds frame locals Lua-style:
//! a frame's `base` indexes its local slots, and operands push above
//! `base + local_count`. Each frame owns its instruction pointer; the run
//! loop keeps the hot `ip`/`base` pair in locals and reloads them whenever
//! the frame stack changes.
//!
//! Closures capture through shared upvalue cells. A cell starts *open*,
//! pointing at an absolute stack slot of a live frame, and is registered in
//! that frame's open-upvalue list; when the frame returns (or is reused by a
//! tail call) every cell in the list is *closed* by copying the slot's value
//! into it. Escaping closures therefore observe the value a binding held at
//! the moment its scope ended.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    builtins::Builtins,
    bytecode::{
        file::{BytecodeFile, FunctionTemplate},
        op::Opcode,
    },
    effect::{Continuation, DefaultHandler, EffectHandler, ResumeState},
    error::{RunError, RunResult},
    io::StdPrint,
    ir::Constant,
    run::Program,
    value::{Closure, RegexValue, Upvalue, Value},
};

/// Maximum call-frame depth; exceeding it is a runtime error.
pub const MAX_CALL_DEPTH: usize = 1000;
/// Maximum operand-stack height in slots, locals included.
pub const MAX_STACK: usize = 65536;

/// Fetches one code byte, advancing the instruction pointer.
macro_rules! fetch_u8 {
    ($code:expr, $ip:expr) => {{
        let byte = *$code
            .get($ip)
            .ok_or_else(|| RunError::runtime("instruction pointer out of bounds"))?;
        $ip += 1;
        byte
    }};
}

/// Fetches a little-endian u16 operand.
macro_rules! fetch_u16 {
    ($code:expr, $ip:expr) => {{
        let lo = fetch_u8!($code, $ip);
        let hi = fetch_u8!($code, $ip);
        u16::from_le_bytes([lo, hi])
    }};
}

/// Fetches a little-endian i16 operand.
macro_rules! fetch_i16 {
    ($code:expr, $ip:expr) => {{
        let lo = fetch_u8!($code, $ip);
        let hi = fetch_u8!($code, $ip);
        i16::from_le_bytes([lo, hi])
    }};
}

/// Reloads the cached `ip`/`base` pair from the current frame.
macro_rules! reload_cache {
    ($self:expr, $ip:ident, $base:ident) => {{
        let frame = $self.frames.last().expect("reload with no active frame");
        $ip = frame.ip;
        $base = frame.base;
    }};
}

/// A single function activation record.
#[derive(Debug)]
struct Frame {
    /// Saved instruction pointer; current only while an inner call runs.
    ip: usize,
    /// Absolute stack index of local slot 0.
    base: usize,
    /// The closure being executed; `None` for the entry frame.
    closure: Option<Rc<Closure>>,
    /// Open cells pointing into this frame's slots, closed on exit.
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

/// Outcome of a return: either the program finished or the caller resumes.
enum Returned {
    Finished(Value),
    Resumed,
}

/// A virtual machine executing one loaded program.
///
/// The program's constant pool, name table, and templates are immutable and
/// may back any number of VMs; the global table, stacks, and upvalue lists
/// are owned per-VM. A VM is single-threaded and reusable: `run` resets all
/// execution state.
pub struct Vm<'p, H: EffectHandler> {
    file: &'p BytecodeFile,
    handler: H,
    /// Constant pool converted to runtime values at construction.
    consts: Vec<Value>,
    /// Per-VM globals consulted before the builtin table.
    globals: AHashMap<String, Value>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl<'p> Vm<'p, DefaultHandler<StdPrint>> {
    /// Creates a VM with the default effect handler: `print`/`debug` go to
    /// stdout, all other effects are errors.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self::with_handler(program, DefaultHandler::new(StdPrint))
    }
}

impl<'p, H: EffectHandler> Vm<'p, H> {
    /// Creates a VM dispatching effects to the given handler.
    pub fn with_handler(program: &'p Program, handler: H) -> Self {
        let file = program.file();
        let consts = file.constants.iter().map(constant_to_value).collect();
        Self {
            file,
            handler,
            consts,
            globals: AHashMap::new(),
            stack: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Defines or replaces a per-VM global visible to `LOAD_GLOBAL`.
    /// Globals shadow same-named builtins.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Gives the handler back, consuming the VM.
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Executes the program with `input` bound to `$$`.
    ///
    /// Any runtime error unwinds all frames, closing their upvalues, before
    /// surfacing; host errors from the effect handler propagate unchanged.
    pub fn run(&mut self, input: Value) -> RunResult<Value> {
        self.stack.clear();
        self.frames.clear();

        let entry_index = self.file.entry_point as usize;
        let entry = &self.file.templates[entry_index];
        for _ in 0..entry.local_count {
            self.push(Value::Null)?;
        }
        // the entry template binds the program input in local slot 0
        if entry.local_count > 0 {
            self.stack[0] = input;
        }
        self.frames.push(Frame {
            ip: entry.code_offset as usize,
            base: 0,
            closure: None,
            open_upvalues: Vec::new(),
        });

        let result = self.execute();
        if result.is_err() {
            self.unwind();
        }
        result
    }

    /// Closes every live frame's upvalues and clears all execution state.
    fn unwind(&mut self) {
        while let Some(mut frame) = self.frames.pop() {
            close_upvalues(&self.stack, &mut frame);
        }
        self.stack.clear();
    }

    fn execute(&mut self) -> RunResult<Value> {
        let file = self.file;
        let code = file.code.as_slice();
        let mut ip;
        let mut base;
        reload_cache!(self, ip, base);

        loop {
            let op_byte = fetch_u8!(code, ip);
            let Some(op) = Opcode::from_repr(op_byte) else {
                return Err(RunError::runtime(format!("invalid opcode {op_byte}")));
            };
            match op {
                Opcode::LoadConst => {
                    let idx = fetch_u16!(code, ip) as usize;
                    let value = self
                        .consts
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| RunError::runtime("constant index out of range"))?;
                    self.push(value)?;
                }
                Opcode::LoadLocal => {
                    let slot = fetch_u16!(code, ip) as usize;
                    let value = self
                        .stack
                        .get(base + slot)
                        .cloned()
                        .ok_or_else(|| RunError::runtime("local slot out of range"))?;
                    self.push(value)?;
                }
                Opcode::StoreLocal => {
                    let slot = fetch_u16!(code, ip) as usize;
                    let value = self.pop()?;
                    let cell = self
                        .stack
                        .get_mut(base + slot)
                        .ok_or_else(|| RunError::runtime("local slot out of range"))?;
                    *cell = value;
                }
                Opcode::LoadUpvalue => {
                    let idx = fetch_u16!(code, ip) as usize;
                    let cell = self.upvalue_cell(idx)?;
                    let value = match &*cell.borrow() {
                        Upvalue::Open(slot) => self
                            .stack
                            .get(*slot)
                            .cloned()
                            .ok_or_else(|| RunError::runtime("open upvalue slot out of range"))?,
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.push(value)?;
                }
                Opcode::StoreUpvalue => {
                    let idx = fetch_u16!(code, ip) as usize;
                    let value = self.pop()?;
                    let cell = self.upvalue_cell(idx)?;
                    let open_slot = match &*cell.borrow() {
                        Upvalue::Open(slot) => Some(*slot),
                        Upvalue::Closed(_) => None,
                    };
                    match open_slot {
                        Some(slot) => {
                            let target = self
                                .stack
                                .get_mut(slot)
                                .ok_or_else(|| RunError::runtime("open upvalue slot out of range"))?;
                            *target = value;
                        }
                        None => *cell.borrow_mut() = Upvalue::Closed(value),
                    }
                }
                Opcode::LoadGlobal => {
                    let idx = fetch_u16!(code, ip) as usize;
                    let name = file
                        .names
                        .get(idx)
                        .ok_or_else(|| RunError::runtime("name index out of range"))?;
                    let value = self.load_global(name)?;
                    self.push(value)?;
                }
                Opcode::MakeClosure => {
                    let template_idx = fetch_u16!(code, ip) as usize;
                    let closure = self.make_closure(template_idx)?;
                    self.push(closure)?;
                }
                Opcode::Call => {
                    let argc = fetch_u8!(code, ip) as usize;
                    self.call_value(argc, &mut ip, &mut base)?;
                }
                Opcode::TailCall => {
                    let argc = fetch_u8!(code, ip) as usize;
                    if let Returned::Finished(value) = self.tail_call_value(argc, &mut ip, &mut base)? {
                        return Ok(value);
                    }
                }
                Opcode::Return => {
                    let value = self.pop()?;
                    match self.do_return(value)? {
                        Returned::Finished(value) => return Ok(value),
                        Returned::Resumed => reload_cache!(self, ip, base),
                    }
                }
                Opcode::Jump => {
                    let offset = fetch_i16!(code, ip);
                    jump_relative(&mut ip, offset)?;
                }
                Opcode::JumpIfFalse => {
                    let offset = fetch_i16!(code, ip);
                    let value = self.pop()?;
                    if !value.truthy() {
                        jump_relative(&mut ip, offset)?;
                    }
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Effect => {
                    let name_idx = fetch_u16!(code, ip) as usize;
                    let argc = fetch_u8!(code, ip) as usize;
                    self.dispatch_effect(name_idx, argc)?;
                }
                Opcode::Neg => {
                    let value = self.pop()?;
                    let result = match &value {
                        Value::Number(n) => Value::Number(-n),
                        _ => Builtins::Sub.call(vec![value])?,
                    };
                    self.push(result)?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = binary_fast_path(op, a, b)?;
                    self.push(result)?;
                }
            }
        }
    }

    fn push(&mut self, value: Value) -> RunResult<()> {
        if self.stack.len() >= MAX_STACK {
            return Err(RunError::runtime("operand stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::runtime("operand stack underflow"))
    }

    fn load_global(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = Builtins::by_name(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(RunError::runtime(format!("Undefined variable '{name}'")))
    }

    fn upvalue_cell(&self, idx: usize) -> RunResult<Rc<RefCell<Upvalue>>> {
        let frame = self.frames.last().expect("executing with no active frame");
        let closure = frame
            .closure
            .as_ref()
            .ok_or_else(|| RunError::runtime("upvalue access outside a closure"))?;
        closure
            .upvalues
            .get(idx)
            .cloned()
            .ok_or_else(|| RunError::runtime("upvalue index out of range"))
    }

    /// Builds a closure from a template's upvalue descriptors. Local
    /// descriptors capture (or reuse) an open cell for the current frame's
    /// slot; non-local descriptors share the parent closure's cell.
    fn make_closure(&mut self, template_idx: usize) -> RunResult<Value> {
        let template = self
            .file
            .templates
            .get(template_idx)
            .ok_or_else(|| RunError::runtime("closure template index out of range"))?;
        let mut upvalues = Vec::with_capacity(template.upvalues.len());
        for desc in &template.upvalues {
            let frame = self.frames.last_mut().expect("executing with no active frame");
            if desc.is_local {
                let slot = frame.base + desc.index as usize;
                let existing = frame.open_upvalues.iter().find(|cell| {
                    matches!(&*cell.borrow(), Upvalue::Open(open_slot) if *open_slot == slot)
                });
                let cell = match existing {
                    Some(cell) => cell.clone(),
                    None => {
                        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
                        frame.open_upvalues.push(cell.clone());
                        cell
                    }
                };
                upvalues.push(cell);
            } else {
                let parent = frame
                    .closure
                    .as_ref()
                    .ok_or_else(|| RunError::runtime("upvalue capture outside a closure"))?;
                let cell = parent
                    .upvalues
                    .get(desc.index as usize)
                    .cloned()
                    .ok_or_else(|| RunError::runtime("parent upvalue index out of range"))?;
                upvalues.push(cell);
            }
        }
        Ok(Value::Closure(Rc::new(Closure {
            template: template_idx as u32,
            upvalues,
        })))
    }

    /// `CALL argc`: the callee sits below its arguments. Builtins execute
    /// in place; closures push a frame whose locals start where the
    /// arguments already are.
    fn call_value(&mut self, argc: usize, ip: &mut usize, base: &mut usize) -> RunResult<()> {
        let callee_idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| RunError::runtime("operand stack underflow"))?;
        let callee = std::mem::replace(&mut self.stack[callee_idx], Value::Null);
        match callee {
            Value::Builtin(builtin) => {
                let args = self.stack.split_off(callee_idx + 1);
                self.stack.pop();
                let result = builtin.call(args)?;
                self.push(result)?;
                Ok(())
            }
            Value::Closure(closure) => {
                let template_idx = closure.template as usize;
                let template = &self.file.templates[template_idx];
                self.check_arity(template, argc)?;
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(RunError::runtime("maximum call depth exceeded"));
                }
                self.stack.remove(callee_idx);
                let new_base = callee_idx;
                for _ in argc..template.local_count as usize {
                    self.push(Value::Null)?;
                }
                let frame = self.frames.last_mut().expect("caller frame exists");
                frame.ip = *ip;
                let entry_ip = template.code_offset as usize;
                self.frames.push(Frame {
                    ip: entry_ip,
                    base: new_base,
                    closure: Some(closure),
                    open_upvalues: Vec::new(),
                });
                *ip = entry_ip;
                *base = new_base;
                Ok(())
            }
            other => Err(RunError::runtime(format!(
                "'{}' value is not callable",
                other.type_name()
            ))),
        }
    }

    /// `TAIL_CALL argc`: reuses the current frame, closing its upvalues
    /// first since its scope is ending. Keeps recursion depth-bounded.
    fn tail_call_value(&mut self, argc: usize, ip: &mut usize, base: &mut usize) -> RunResult<Returned> {
        let callee_idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| RunError::runtime("operand stack underflow"))?;
        let callee = std::mem::replace(&mut self.stack[callee_idx], Value::Null);
        match callee {
            Value::Builtin(builtin) => {
                let args = self.stack.split_off(callee_idx + 1);
                self.stack.pop();
                let result = builtin.call(args)?;
                let returned = self.do_return(result)?;
                if matches!(returned, Returned::Resumed) {
                    let frame = self.frames.last().expect("caller frame exists");
                    *ip = frame.ip;
                    *base = frame.base;
                }
                Ok(returned)
            }
            Value::Closure(closure) => {
                let template_idx = closure.template as usize;
                let template = &self.file.templates[template_idx];
                self.check_arity(template, argc)?;
                let args = self.stack.split_off(callee_idx + 1);
                self.stack.pop();
                let frame = self.frames.last_mut().expect("executing with no active frame");
                close_upvalues(&self.stack, frame);
                self.stack.truncate(frame.base);
                for arg in args {
                    self.stack.push(arg);
                }
                let local_count = template.local_count as usize;
                let entry_ip = template.code_offset as usize;
                for _ in argc..local_count {
                    self.push(Value::Null)?;
                }
                let frame = self.frames.last_mut().expect("executing with no active frame");
                frame.closure = Some(closure);
                frame.ip = entry_ip;
                *ip = entry_ip;
                *base = frame.base;
                Ok(Returned::Resumed)
            }
            other => Err(RunError::runtime(format!(
                "'{}' value is not callable",
                other.type_name()
            ))),
        }
    }

    fn check_arity(&self, template: &FunctionTemplate, argc: usize) -> RunResult<()> {
        if argc == template.param_count as usize {
            return Ok(());
        }
        let name = template
            .name_index
            .and_then(|idx| self.file.names.get(idx as usize))
            .map_or("<anonymous>", String::as_str);
        Err(RunError::arity(
            name,
            &template.param_count.to_string(),
            argc,
        ))
    }

    /// Pops the current frame: closes its upvalues, truncates its stack
    /// region, and hands the return value to the caller.
    fn do_return(&mut self, value: Value) -> RunResult<Returned> {
        let mut frame = self.frames.pop().expect("return with no active frame");
        close_upvalues(&self.stack, &mut frame);
        self.stack.truncate(frame.base);
        if self.frames.is_empty() {
            return Ok(Returned::Finished(value));
        }
        self.push(value)?;
        Ok(Returned::Resumed)
    }

    /// `EFFECT name argc`: pops the arguments, hands them to the handler
    /// with a fresh single-use continuation, and pushes the resumed value.
    /// A handler that returns without resuming is fatal.
    fn dispatch_effect(&mut self, name_idx: usize, argc: usize) -> RunResult<()> {
        let name = self
            .file
            .names
            .get(name_idx)
            .ok_or_else(|| RunError::runtime("effect name index out of range"))?;
        let start = self
            .stack
            .len()
            .checked_sub(argc)
            .ok_or_else(|| RunError::runtime("operand stack underflow"))?;
        let args: SmallVec<[Value; 4]> = self.stack.drain(start..).collect();
        let (continuation, state) = Continuation::new();
        self.handler
            .handle(name, &args, continuation)
            .map_err(RunError::Host)?;
        let resumed = match std::mem::replace(&mut *state.borrow_mut(), ResumeState::Pending) {
            ResumeState::Resumed(value) => value,
            ResumeState::Pending => {
                return Err(RunError::runtime(format!("effect '{name}' was not resumed")));
            }
        };
        self.push(resumed)
    }
}

/// Closes every open cell registered on `frame` by copying the slot values
/// in, then empties the list.
fn close_upvalues(stack: &[Value], frame: &mut Frame) {
    for cell in frame.open_upvalues.drain(..) {
        let mut cell = cell.borrow_mut();
        if let Upvalue::Open(slot) = &*cell {
            let value = stack.get(*slot).cloned().unwrap_or(Value::Null);
            *cell = Upvalue::Closed(value);
        }
    }
}

fn jump_relative(ip: &mut usize, offset: i16) -> RunResult<()> {
    let target = i64::try_from(*ip).expect("instruction pointer fits i64") + i64::from(offset);
    *ip = usize::try_from(target).map_err(|_| RunError::runtime("jump target out of bounds"))?;
    Ok(())
}

/// The numeric fast paths behind `ADD`..`MOD`, with the builtin fallback
/// when either operand is not a number. The fast `DIV`/`MOD` paths raise on
/// a zero divisor, matching the builtins.
fn binary_fast_path(op: Opcode, a: Value, b: Value) -> RunResult<Value> {
    if let (Value::Number(x), Value::Number(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            Opcode::Add => Ok(Value::Number(x + y)),
            Opcode::Sub => Ok(Value::Number(x - y)),
            Opcode::Mul => Ok(Value::Number(x * y)),
            Opcode::Div => {
                if y == 0.0 {
                    Err(RunError::runtime("Division by zero"))
                } else {
                    Ok(Value::Number(x / y))
                }
            }
            Opcode::Mod => {
                if y == 0.0 {
                    Err(RunError::runtime("Division by zero"))
                } else {
                    Ok(Value::Number(x % y))
                }
            }
            _ => unreachable!("binary_fast_path only handles arithmetic opcodes"),
        };
    }
    let builtin = match op {
        Opcode::Add => Builtins::Add,
        Opcode::Sub => Builtins::Sub,
        Opcode::Mul => Builtins::Mul,
        Opcode::Div => Builtins::Div,
        Opcode::Mod => Builtins::Mod,
        _ => unreachable!("binary_fast_path only handles arithmetic opcodes"),
    };
    builtin.call(vec![a, b])
}

/// Converts a pool constant into its runtime value. Regex constants stay
/// uncompiled until first use.
fn constant_to_value(constant: &Constant) -> Value {
    match constant {
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Number(n) => Value::Number(*n),
        Constant::Str(s) => Value::str(s),
        Constant::Regex { pattern, flags } => {
            Value::Regex(Rc::new(RegexValue::new(pattern.clone(), flags.clone())))
        }
    }
}
