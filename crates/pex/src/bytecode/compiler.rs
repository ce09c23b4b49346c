//! Compiles the IR into a bytecode container.
//!
//! One function template is emitted per `Fn` node, plus a synthesized entry
//! template (always index 0) for the module body. Template indices in
//! `MakeClosure` operands always refer to the final template array, entry
//! included. Each template's code is built in its own buffer and the buffers
//! are concatenated into the flat code section at the end.

use ahash::AHashMap;

use crate::{
    bytecode::{
        builder::CodeBuilder,
        file::{BytecodeFile, DebugInfo, FunctionDebug, FunctionTemplate, InstructionLocation, UpvalueDesc},
        op::Opcode,
    },
    ir::{Constant, IrExpr, IrModule, IrNode},
};

/// Operator names with dedicated fast-path opcodes.
const FAST_BINARY_OPS: [(&str, Opcode); 5] = [
    ("+", Opcode::Add),
    ("-", Opcode::Sub),
    ("*", Opcode::Mul),
    ("/", Opcode::Div),
    ("%", Opcode::Mod),
];

/// Options controlling code generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Emit the debug section: per-function local names and an
    /// instruction → source position table.
    pub debug: bool,
}

/// Compiles a lowered module into a container.
#[must_use]
pub fn compile(module: &IrModule, options: &CompileOptions) -> BytecodeFile {
    let mut compiler = Compiler {
        constants: Vec::new(),
        const_map: AHashMap::new(),
        names: Vec::new(),
        name_map: AHashMap::new(),
        templates: vec![None],
        ctxs: Vec::new(),
    };

    let mut entry = FnCtx::new(0, 0);
    entry.declare_local("input");
    compiler.ctxs.push(entry);
    compiler.compile_expr(&module.body, true);
    compiler.ctx().builder.emit(Opcode::Return);
    let entry = compiler.ctxs.pop().expect("entry context pushed above");
    compiler.finish_template(entry, None, Vec::new());

    compiler.into_file(options)
}

/// One local slot in the compile-time scope table.
///
/// A slot whose binding was captured by a closure is pinned (`name: None`)
/// instead of freed at scope end: the open upvalue cell still points at it,
/// and a sibling binding reusing the slot would be observed through the cell.
#[derive(Debug)]
struct LocalSlot {
    name: Option<String>,
    captured: bool,
}

/// Per-function emission state.
#[derive(Debug)]
struct FnCtx {
    template_index: usize,
    builder: CodeBuilder,
    locals: Vec<LocalSlot>,
    /// Highest slot count seen; becomes the template's `local_count`.
    high_water: u32,
    param_count: u32,
    /// This function's capture names; positions are its upvalue indices.
    captures: Vec<String>,
    /// Slot → most recent binding name, for the debug section.
    local_names: Vec<String>,
}

impl FnCtx {
    fn new(template_index: usize, param_count: u32) -> Self {
        Self {
            template_index,
            builder: CodeBuilder::new(),
            locals: Vec::new(),
            high_water: 0,
            param_count,
            captures: Vec::new(),
            local_names: Vec::new(),
        }
    }

    /// Allocates the next slot for `name` and returns it.
    fn declare_local(&mut self, name: &str) -> u16 {
        let slot = self.locals.len();
        self.locals.push(LocalSlot {
            name: Some(name.to_owned()),
            captured: false,
        });
        self.high_water = self.high_water.max(self.locals.len() as u32);
        if slot < self.local_names.len() {
            self.local_names[slot] = name.to_owned();
        } else {
            self.local_names.push(name.to_owned());
        }
        u16::try_from(slot).expect("more than 65535 locals in one function")
    }

    /// Ends the scope of the binding in `slot`: frees it when possible,
    /// pins it when a closure captured it.
    fn end_scope(&mut self, slot: u16) {
        let index = slot as usize;
        let is_top = index == self.locals.len() - 1;
        let entry = &mut self.locals[index];
        if is_top && !entry.captured {
            self.locals.pop();
        } else {
            entry.name = None;
        }
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.locals
            .iter()
            .rposition(|slot| slot.name.as_deref() == Some(name))
            .map(|slot| slot as u16)
    }

    fn resolve_upvalue(&self, name: &str) -> Option<u16> {
        self.captures.iter().position(|c| c == name).map(|idx| idx as u16)
    }
}

struct Compiler {
    constants: Vec<Constant>,
    const_map: AHashMap<Constant, u16>,
    names: Vec<String>,
    name_map: AHashMap<String, u16>,
    /// Template slots, reserved at allocation so `MakeClosure` operands are
    /// known before nested bodies finish compiling.
    templates: Vec<Option<BuiltTemplate>>,
    /// Enclosing-function chain; the innermost is last.
    ctxs: Vec<FnCtx>,
}

#[derive(Debug)]
struct BuiltTemplate {
    name_index: Option<u32>,
    param_count: u32,
    local_count: u32,
    upvalues: Vec<UpvalueDesc>,
    code: Vec<u8>,
    locations: Vec<InstructionLocation>,
    local_names: Vec<String>,
}

impl Compiler {
    fn ctx(&mut self) -> &mut FnCtx {
        self.ctxs.last_mut().expect("compiler always has an active context")
    }

    /// Interns a constant; equal values share one pool index.
    fn intern_const(&mut self, constant: &Constant) -> u16 {
        if let Some(&idx) = self.const_map.get(constant) {
            return idx;
        }
        let idx = u16::try_from(self.constants.len()).expect("more than 65535 constants");
        self.constants.push(constant.clone());
        self.const_map.insert(constant.clone(), idx);
        idx
    }

    /// Interns a name-table entry; equal names share one index.
    fn intern_name(&mut self, name: &str) -> u16 {
        if let Some(&idx) = self.name_map.get(name) {
            return idx;
        }
        let idx = u16::try_from(self.names.len()).expect("more than 65535 names");
        self.names.push(name.to_owned());
        self.name_map.insert(name.to_owned(), idx);
        idx
    }

    fn compile_expr(&mut self, node: &IrNode, tail: bool) {
        self.ctx().builder.set_location(node.span);
        match &node.expr {
            IrExpr::Const(constant) => {
                let idx = self.intern_const(constant);
                self.ctx().builder.emit_u16(Opcode::LoadConst, idx);
            }
            IrExpr::Var(name) => self.compile_var(name),
            IrExpr::If { cond, then, els } => {
                self.compile_expr(cond, false);
                let to_else = self.ctx().builder.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(then, tail);
                let to_end = self.ctx().builder.emit_jump(Opcode::Jump);
                self.ctx().builder.patch_jump(to_else);
                self.compile_expr(els, tail);
                self.ctx().builder.patch_jump(to_end);
            }
            IrExpr::Let { name, value, body } => {
                let slot = if let IrExpr::Fn {
                    params,
                    body: fn_body,
                    captures,
                } = &value.expr
                {
                    // A function that captures its own binding (recursion)
                    // needs the slot declared before its descriptors
                    // resolve; the open cell then observes the closure once
                    // StoreLocal runs. A capture of a same-named outer
                    // binding still resolves to the outer slot.
                    let recursive = captures.iter().any(|c| c == name) && self.resolves_to_global(name);
                    if recursive {
                        let slot = self.ctx().declare_local(name);
                        self.compile_fn(params, fn_body, captures, Some(name));
                        slot
                    } else {
                        self.compile_fn(params, fn_body, captures, Some(name));
                        self.ctx().declare_local(name)
                    }
                } else {
                    self.compile_expr(value, false);
                    self.ctx().declare_local(name)
                };
                self.ctx().builder.emit_u16(Opcode::StoreLocal, slot);
                self.compile_expr(body, tail);
                self.ctx().end_scope(slot);
            }
            IrExpr::Seq(items) => {
                let Some((last, rest)) = items.split_last() else {
                    let idx = self.intern_const(&Constant::Null);
                    self.ctx().builder.emit_u16(Opcode::LoadConst, idx);
                    return;
                };
                for item in rest {
                    self.compile_expr(item, false);
                    self.ctx().builder.emit(Opcode::Pop);
                }
                self.compile_expr(last, tail);
            }
            IrExpr::Call { callee, args } => self.compile_call(callee, args, tail),
            IrExpr::Fn { params, body, captures } => {
                self.compile_fn(params, body, captures, None);
            }
            IrExpr::Effect { name, args } => {
                let name_idx = self.intern_name(name);
                for arg in args {
                    self.compile_expr(arg, false);
                }
                let argc = u8::try_from(args.len()).expect("more than 255 effect arguments");
                self.ctx().builder.emit_u16_u8(Opcode::Effect, name_idx, argc);
            }
        }
    }

    fn compile_var(&mut self, name: &str) {
        if let Some(slot) = self.ctx().resolve_local(name) {
            self.ctx().builder.emit_u16(Opcode::LoadLocal, slot);
        } else if let Some(idx) = self.ctx().resolve_upvalue(name) {
            self.ctx().builder.emit_u16(Opcode::LoadUpvalue, idx);
        } else {
            let name_idx = self.intern_name(name);
            self.ctx().builder.emit_u16(Opcode::LoadGlobal, name_idx);
        }
    }

    /// True when `name` would compile to a global load in the current scope,
    /// making an operator eligible for its fast-path opcode.
    fn resolves_to_global(&mut self, name: &str) -> bool {
        self.ctx().resolve_local(name).is_none() && self.ctx().resolve_upvalue(name).is_none()
    }

    fn compile_call(&mut self, callee: &IrNode, args: &[IrNode], tail: bool) {
        if let IrExpr::Var(name) = &callee.expr
            && self.resolves_to_global(name)
        {
            if name == "-" && args.len() == 1 {
                self.compile_expr(&args[0], false);
                self.ctx().builder.emit(Opcode::Neg);
                return;
            }
            if args.len() == 2
                && let Some(&(_, op)) = FAST_BINARY_OPS.iter().find(|(n, _)| n == name)
            {
                self.compile_expr(&args[0], false);
                self.compile_expr(&args[1], false);
                self.ctx().builder.emit(op);
                return;
            }
        }
        self.compile_expr(callee, false);
        for arg in args {
            self.compile_expr(arg, false);
        }
        let argc = u8::try_from(args.len()).expect("more than 255 call arguments");
        let op = if tail { Opcode::TailCall } else { Opcode::Call };
        self.ctx().builder.emit_u8(op, argc);
    }

    fn compile_fn(&mut self, params: &[String], body: &IrNode, captures: &[String], name: Option<&str>) {
        // Resolve upvalue descriptors against the enclosing scope before
        // entering the new one. A capture that names an enclosing local is
        // `(true, slot)`; one that names an enclosing capture is
        // `(false, upvalue index)`. The lowerer threads captures through
        // every intermediate function, so one-level resolution suffices.
        let mut descriptors = Vec::with_capacity(captures.len());
        for capture in captures {
            let enclosing = self.ctx();
            if let Some(slot) = enclosing.resolve_local(capture) {
                enclosing.locals[slot as usize].captured = true;
                descriptors.push(UpvalueDesc {
                    is_local: true,
                    index: u32::from(slot),
                });
            } else if let Some(idx) = enclosing.resolve_upvalue(capture) {
                descriptors.push(UpvalueDesc {
                    is_local: false,
                    index: u32::from(idx),
                });
            } else {
                unreachable!("lowerer only records captures bound in an enclosing scope");
            }
        }

        let name_index = name.map(|n| u32::from(self.intern_name(n)));
        let template_index = self.templates.len();
        self.templates.push(None);

        let param_count = u32::try_from(params.len()).expect("more than 4 billion parameters");
        let mut ctx = FnCtx::new(template_index, param_count);
        for param in params {
            ctx.declare_local(param);
        }
        ctx.captures = captures.to_vec();
        self.ctxs.push(ctx);
        self.compile_expr(body, true);
        self.ctx().builder.emit(Opcode::Return);
        let ctx = self.ctxs.pop().expect("function context pushed above");
        self.finish_template(ctx, name_index, descriptors);

        let operand = u16::try_from(template_index).expect("more than 65535 function templates");
        self.ctx().builder.emit_u16(Opcode::MakeClosure, operand);
    }

    fn finish_template(&mut self, ctx: FnCtx, name_index: Option<u32>, upvalues: Vec<UpvalueDesc>) {
        let FnCtx {
            template_index,
            builder,
            high_water,
            param_count,
            local_names,
            ..
        } = ctx;
        let (code, locations) = builder.build();
        let local_count = high_water.max(param_count);
        self.templates[template_index] = Some(BuiltTemplate {
            name_index,
            param_count,
            local_count,
            upvalues,
            code,
            locations,
            local_names,
        });
    }

    fn into_file(self, options: &CompileOptions) -> BytecodeFile {
        let mut code = Vec::new();
        let mut templates = Vec::with_capacity(self.templates.len());
        let mut debug_functions = Vec::new();
        for (index, built) in self.templates.into_iter().enumerate() {
            let built = built.expect("every reserved template slot is finished");
            let code_offset = code.len() as u32;
            code.extend_from_slice(&built.code);
            templates.push(FunctionTemplate {
                name_index: built.name_index,
                param_count: built.param_count,
                local_count: built.local_count,
                upvalues: built.upvalues,
                code_offset,
                code_length: built.code.len() as u32,
            });
            if options.debug {
                debug_functions.push(FunctionDebug {
                    function_index: index as u32,
                    local_names: built.local_names,
                    locations: built.locations,
                });
            }
        }
        BytecodeFile {
            version_major: super::file::VERSION_MAJOR,
            version_minor: super::file::VERSION_MINOR,
            entry_point: 0,
            constants: self.constants,
            names: self.names,
            templates,
            code,
            debug: options.debug.then_some(DebugInfo {
                functions: debug_functions,
            }),
        }
    }
}
