//! Upvalue cell lifecycle tests.
//!
//! The surface language has no assignment, so the mutation-visibility cases
//! are driven with hand-assembled containers: they pin down that open cells
//! read and write through the live frame slot, and that cells close over
//! the slot's final value when the frame returns.

use pex::{
    Constant, Opcode, Program, Value, Vm,
    container::{BytecodeFile, FunctionTemplate, UpvalueDesc, VERSION_MAJOR, VERSION_MINOR},
};

#[derive(Default)]
struct Code(Vec<u8>);

impl Code {
    fn op(mut self, op: Opcode) -> Self {
        self.0.push(op as u8);
        self
    }

    fn op_u16(mut self, op: Opcode, operand: u16) -> Self {
        self.0.push(op as u8);
        self.0.extend_from_slice(&operand.to_le_bytes());
        self
    }

    fn op_u8(mut self, op: Opcode, operand: u8) -> Self {
        self.0.push(op as u8);
        self.0.push(operand);
        self
    }
}

fn template(param_count: u32, local_count: u32, upvalues: Vec<UpvalueDesc>, window: (u32, u32)) -> FunctionTemplate {
    FunctionTemplate {
        name_index: None,
        param_count,
        local_count,
        upvalues,
        code_offset: window.0,
        code_length: window.1,
    }
}

fn build(constants: Vec<Constant>, functions: Vec<(u32, u32, Vec<UpvalueDesc>, Code)>) -> Program {
    let mut code = Vec::new();
    let mut templates = Vec::new();
    for (param_count, local_count, upvalues, body) in functions {
        let offset = code.len() as u32;
        code.extend_from_slice(&body.0);
        let length = code.len() as u32 - offset;
        templates.push(template(param_count, local_count, upvalues, (offset, length)));
    }
    let file = BytecodeFile {
        version_major: VERSION_MAJOR,
        version_minor: VERSION_MINOR,
        entry_point: 0,
        constants,
        names: Vec::new(),
        templates,
        code,
        debug: None,
    };
    Program::from_file(&file).expect("hand-built container validates")
}

#[test]
fn open_upvalue_reads_the_live_slot() {
    // entry: x = 10; f = closure over x; x = 99; (f) -> 99
    let entry = Code::default()
        .op_u16(Opcode::LoadConst, 0)
        .op_u16(Opcode::StoreLocal, 1)
        .op_u16(Opcode::MakeClosure, 1)
        .op_u16(Opcode::StoreLocal, 2)
        .op_u16(Opcode::LoadConst, 1)
        .op_u16(Opcode::StoreLocal, 1)
        .op_u16(Opcode::LoadLocal, 2)
        .op_u8(Opcode::Call, 0)
        .op(Opcode::Return);
    let reader = Code::default().op_u16(Opcode::LoadUpvalue, 0).op(Opcode::Return);

    let program = build(
        vec![Constant::Number(10.0), Constant::Number(99.0)],
        vec![
            (0, 3, Vec::new(), entry),
            (0, 0, vec![UpvalueDesc { is_local: true, index: 1 }], reader),
        ],
    );
    let result = Vm::new(&program).run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(99.0)));
}

#[test]
fn store_through_open_upvalue_writes_the_slot() {
    // entry: x = 10; f = closure over x; (f) sets x = 5; x -> 5
    let entry = Code::default()
        .op_u16(Opcode::LoadConst, 0)
        .op_u16(Opcode::StoreLocal, 1)
        .op_u16(Opcode::MakeClosure, 1)
        .op_u8(Opcode::Call, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::LoadLocal, 1)
        .op(Opcode::Return);
    let writer = Code::default()
        .op_u16(Opcode::LoadConst, 1)
        .op_u16(Opcode::StoreUpvalue, 0)
        .op_u16(Opcode::LoadConst, 2)
        .op(Opcode::Return);

    let program = build(
        vec![Constant::Number(10.0), Constant::Number(5.0), Constant::Null],
        vec![
            (0, 2, Vec::new(), entry),
            (0, 0, vec![UpvalueDesc { is_local: true, index: 1 }], writer),
        ],
    );
    let result = Vm::new(&program).run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(5.0)));
}

#[test]
fn cell_closes_over_the_value_at_frame_return() {
    // maker: a = 7; return closure over a. entry calls maker, churns the
    // stack where maker's frame lived, then calls the escaped closure.
    let entry = Code::default()
        .op_u16(Opcode::MakeClosure, 1)
        .op_u8(Opcode::Call, 0)
        .op_u16(Opcode::StoreLocal, 1)
        .op_u16(Opcode::LoadConst, 1)
        .op(Opcode::Pop)
        .op_u16(Opcode::LoadLocal, 1)
        .op_u8(Opcode::Call, 0)
        .op(Opcode::Return);
    let maker = Code::default()
        .op_u16(Opcode::LoadConst, 0)
        .op_u16(Opcode::StoreLocal, 0)
        .op_u16(Opcode::MakeClosure, 2)
        .op(Opcode::Return);
    let escaped = Code::default().op_u16(Opcode::LoadUpvalue, 0).op(Opcode::Return);

    let program = build(
        vec![Constant::Number(7.0), Constant::Number(99.0)],
        vec![
            (0, 2, Vec::new(), entry),
            (0, 1, Vec::new(), maker),
            (0, 0, vec![UpvalueDesc { is_local: true, index: 0 }], escaped),
        ],
    );
    let result = Vm::new(&program).run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(7.0)));
}

#[test]
fn sibling_closures_share_one_cell() {
    // two closures over the same slot: the writer mutates, the reader sees
    // the mutation through the shared cell
    let entry = Code::default()
        .op_u16(Opcode::LoadConst, 0)
        .op_u16(Opcode::StoreLocal, 1)
        .op_u16(Opcode::MakeClosure, 1)
        .op_u16(Opcode::StoreLocal, 2)
        .op_u16(Opcode::MakeClosure, 2)
        .op_u16(Opcode::StoreLocal, 3)
        .op_u16(Opcode::LoadLocal, 2)
        .op_u8(Opcode::Call, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::LoadLocal, 3)
        .op_u8(Opcode::Call, 0)
        .op(Opcode::Return);
    let writer = Code::default()
        .op_u16(Opcode::LoadConst, 1)
        .op_u16(Opcode::StoreUpvalue, 0)
        .op_u16(Opcode::LoadConst, 2)
        .op(Opcode::Return);
    let reader = Code::default().op_u16(Opcode::LoadUpvalue, 0).op(Opcode::Return);

    let program = build(
        vec![Constant::Number(1.0), Constant::Number(42.0), Constant::Null],
        vec![
            (0, 4, Vec::new(), entry),
            (0, 0, vec![UpvalueDesc { is_local: true, index: 1 }], writer),
            (0, 0, vec![UpvalueDesc { is_local: true, index: 1 }], reader),
        ],
    );
    let result = Vm::new(&program).run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(42.0)));
}
