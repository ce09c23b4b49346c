//! Container format tests: round-trip identity, writer determinism, and
//! the reader's validation failures.

use pex::{
    CompileOptions, Constant, MalformedBytecode, Opcode, Program, Value, Vm,
    container::{
        BytecodeFile, DebugInfo, FLAG_HAS_DEBUG_INFO, FunctionDebug, FunctionTemplate, InstructionLocation,
        UpvalueDesc, VERSION_MAJOR, VERSION_MINOR,
    },
};
use pretty_assertions::assert_eq;

/// A file exercising every constant tag, named and anonymous templates,
/// upvalue descriptors, and debug info.
fn rich_file() -> BytecodeFile {
    let entry_code = vec![Opcode::LoadConst as u8, 0, 0, Opcode::Return as u8];
    let fn_code = vec![Opcode::LoadUpvalue as u8, 0, 0, Opcode::Return as u8];
    let mut code = entry_code.clone();
    code.extend_from_slice(&fn_code);
    BytecodeFile {
        version_major: VERSION_MAJOR,
        version_minor: VERSION_MINOR,
        entry_point: 0,
        constants: vec![
            Constant::Null,
            Constant::Bool(true),
            Constant::Bool(false),
            Constant::Number(3.0),
            Constant::Number(-2.5),
            Constant::Number(f64::NAN),
            Constant::Str("héllo".to_owned()),
            Constant::Regex {
                pattern: r"\d+".to_owned(),
                flags: "gi".to_owned(),
            },
        ],
        names: vec!["input".to_owned(), "helper".to_owned()],
        templates: vec![
            FunctionTemplate {
                name_index: None,
                param_count: 0,
                local_count: 2,
                upvalues: Vec::new(),
                code_offset: 0,
                code_length: entry_code.len() as u32,
            },
            FunctionTemplate {
                name_index: Some(1),
                param_count: 1,
                local_count: 2,
                upvalues: vec![
                    UpvalueDesc { is_local: true, index: 1 },
                    UpvalueDesc { is_local: false, index: 0 },
                ],
                code_offset: entry_code.len() as u32,
                code_length: fn_code.len() as u32,
            },
        ],
        code,
        debug: Some(DebugInfo {
            functions: vec![FunctionDebug {
                function_index: 0,
                local_names: vec!["input".to_owned(), "x".to_owned()],
                locations: vec![
                    InstructionLocation {
                        byte_offset: 0,
                        line: 1,
                        column: 1,
                    },
                    InstructionLocation {
                        byte_offset: 3,
                        line: 2,
                        column: 5,
                    },
                ],
            }],
        }),
    }
}

#[test]
fn read_inverts_write() {
    let file = rich_file();
    let bytes = file.write();
    let reread = BytecodeFile::read(&bytes).unwrap();
    assert_eq!(reread, file);
    // and writing the reread file is byte-identical
    assert_eq!(reread.write(), bytes);
}

#[test]
fn writer_is_deterministic() {
    let file = rich_file();
    assert_eq!(file.write(), file.write());
}

#[test]
fn reserved_byte_is_zero() {
    let bytes = rich_file().write();
    assert_eq!(bytes[7], 0);
}

#[test]
fn compiled_programs_round_trip() {
    let source = "let: x 10; fn: add (y) (+ x y); (add 5)";
    let bytes = pex::compile_source(source, &CompileOptions { debug: true, shell_mode: false }).unwrap();
    let file = BytecodeFile::read(&bytes).unwrap();
    assert_eq!(file.write(), bytes);
    // and the reread program still runs
    let program = Program::load(&bytes).unwrap();
    let result = Vm::new(&program).run(Value::Null).unwrap();
    assert!(result.equal(&Value::Number(15.0)));
}

fn expect_malformed(bytes: &[u8], needle: &str) -> MalformedBytecode {
    let err = BytecodeFile::read(bytes).expect_err("read should fail");
    assert!(
        err.reason.contains(needle),
        "expected reason containing {needle:?}, got: {err}"
    );
    err
}

#[test]
fn rejects_bad_magic() {
    let mut bytes = rich_file().write();
    bytes[0] ^= 0xFF;
    let err = expect_malformed(&bytes, "bad magic");
    assert_eq!(err.offset, 0);
}

#[test]
fn rejects_incompatible_major_version() {
    let mut bytes = rich_file().write();
    bytes[4] = VERSION_MAJOR + 1;
    expect_malformed(&bytes, "incompatible major version");
}

#[test]
fn accepts_any_minor_version() {
    let mut bytes = rich_file().write();
    bytes[5] = 200;
    assert!(BytecodeFile::read(&bytes).is_ok());
}

#[test]
fn rejects_wrong_constant_pool_offset() {
    let mut bytes = rich_file().write();
    bytes[12] = 17;
    expect_malformed(&bytes, "constant pool offset");
}

#[test]
fn rejects_truncation_at_every_length() {
    let bytes = rich_file().write();
    for len in 0..bytes.len() {
        assert!(
            BytecodeFile::read(&bytes[..len]).is_err(),
            "a {len}-byte prefix of a {}-byte file must not parse",
            bytes.len()
        );
    }
}

#[test]
fn rejects_trailing_bytes() {
    let mut bytes = rich_file().write();
    bytes.push(0);
    expect_malformed(&bytes, "trailing bytes");
}

#[test]
fn rejects_unknown_constant_tag() {
    let mut bytes = rich_file().write();
    // first constant tag sits right after the header and pool count
    bytes[20] = 250;
    expect_malformed(&bytes, "unknown constant tag");
}

#[test]
fn rejects_invalid_utf8_in_strings() {
    let bytes = rich_file().write();
    // corrupt the 2-byte UTF-8 sequence in the "héllo" constant
    let pos = bytes
        .windows(2)
        .position(|w| w == [0xC3, 0xA9])
        .expect("é is encoded in the constant pool");
    let mut bytes = bytes;
    bytes[pos] = 0xFF;
    expect_malformed(&bytes, "not valid UTF-8");
}

#[test]
fn rejects_entry_point_out_of_range() {
    let mut file = rich_file();
    file.entry_point = 7;
    expect_malformed(&file.write(), "entry point 7 out of range");
}

#[test]
fn rejects_entry_template_with_params() {
    let mut file = rich_file();
    file.entry_point = 1;
    expect_malformed(&file.write(), "entry template must take no parameters");
}

#[test]
fn rejects_param_count_above_local_count() {
    let mut file = rich_file();
    file.templates[1].param_count = 5;
    file.templates[1].local_count = 2;
    expect_malformed(&file.write(), "exceeds local count");
}

#[test]
fn rejects_code_window_past_section_end() {
    let mut file = rich_file();
    file.templates[1].code_length = 1000;
    expect_malformed(&file.write(), "exceeds code section");
}

#[test]
fn rejects_debug_flag_without_section() {
    let mut file = rich_file();
    file.debug = None;
    let mut bytes = file.write();
    bytes[6] |= FLAG_HAS_DEBUG_INFO;
    expect_malformed(&bytes, "no debug section follows");
}

#[test]
fn rejects_section_without_debug_flag() {
    let mut bytes = rich_file().write();
    // clearing the flag leaves the debug section as trailing garbage
    bytes[6] &= !FLAG_HAS_DEBUG_INFO;
    assert!(BytecodeFile::read(&bytes).is_err());
}

#[test]
fn rejects_invalid_upvalue_flag() {
    let bytes = rich_file().write();
    // locate the second template's first upvalue flag byte (value 1,
    // following its u32 upvalue count of 2) and corrupt it
    let pos = bytes
        .windows(5)
        .position(|w| w == [2, 0, 0, 0, 1])
        .expect("upvalue count and flag are adjacent");
    let mut bytes = bytes;
    bytes[pos + 4] = 9;
    expect_malformed(&bytes, "invalid upvalue flag");
}

#[test]
fn nan_constants_survive_the_round_trip() {
    let file = rich_file();
    let reread = BytecodeFile::read(&file.write()).unwrap();
    let Constant::Number(n) = &reread.constants[5] else {
        panic!("expected the NaN constant");
    };
    assert!(n.is_nan());
}
