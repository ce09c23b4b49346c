//! Public interface for compiling and running PEX code.
//!
//! The compile path is source → AST → IR → container bytes; the execute
//! path is bytes → validated `Program` → `Vm`. The two halves meet only at
//! the byte level, so a program compiled once can be stored and executed by
//! any later host with a matching container major version.

use crate::{
    bytecode::{BytecodeFile, CompileOptions as CodegenOptions, compile},
    error::MalformedBytecode,
    ir::IrModule,
    lower::lower,
    parse::{ParseError, ParseOptions, parse},
};

/// Options for the source → container pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Emit the debug-info section.
    pub debug: bool,
    /// Front-end shell mode: inject `$$` into the last top-level expression
    /// when no source reference appears in it.
    pub shell_mode: bool,
}

/// Compiles source text to container bytes.
pub fn compile_source(source: &str, options: &CompileOptions) -> Result<Vec<u8>, ParseError> {
    let ast = parse(
        source,
        &ParseOptions {
            shell_mode: options.shell_mode,
        },
    )?;
    let module = lower(&ast);
    let file = compile(&module, &CodegenOptions { debug: options.debug });
    Ok(file.write())
}

/// Compiles a lowered IR module to a container, for hosts that build IR
/// directly instead of going through the front end.
#[must_use]
pub fn compile_module(module: &IrModule, debug: bool) -> BytecodeFile {
    compile(module, &CodegenOptions { debug })
}

/// A validated, immutable program ready for execution.
///
/// The underlying container (constant pool, name table, templates, code) is
/// never mutated after load and may back any number of `Vm` instances,
/// including on different threads; each VM owns its own global table and
/// stacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    file: BytecodeFile,
}

impl Program {
    /// Reads and validates container bytes.
    ///
    /// Validation is eager and exhaustive; once this returns `Ok`, the VM
    /// performs no structural re-checks at execution time.
    pub fn load(bytes: &[u8]) -> Result<Self, MalformedBytecode> {
        BytecodeFile::read(bytes).map(|file| Self { file })
    }

    /// Wraps an in-memory container, re-validating it through a write/read
    /// round trip so hand-built files get the same checks as loaded ones.
    pub fn from_file(file: &BytecodeFile) -> Result<Self, MalformedBytecode> {
        Self::load(&file.write())
    }

    /// Serializes the program back to container bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.file.write()
    }

    pub(crate) fn file(&self) -> &BytecodeFile {
        &self.file
    }
}
