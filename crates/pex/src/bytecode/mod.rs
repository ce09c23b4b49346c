//! Bytecode: container format, code generation, and the virtual machine.
//!
//! - `op`: opcode definitions
//! - `file`: the binary container model with its reader and writer
//! - `builder`: per-function bytecode emission
//! - `compiler`: IR to container compilation
//! - `vm`: the stack machine executing a loaded container

pub use compiler::{CompileOptions, compile};
pub use file::BytecodeFile;
pub use op::Opcode;
pub use vm::Vm;

mod builder;
mod compiler;
mod file;
mod op;
mod vm;

pub mod container {
    //! Re-exports of the container data model for hosts that construct or
    //! inspect bytecode files directly.
    pub use super::file::{
        BytecodeFile, DebugInfo, FLAG_HAS_DEBUG_INFO, FunctionDebug, FunctionTemplate, InstructionLocation, MAGIC,
        UpvalueDesc, VERSION_MAJOR, VERSION_MINOR,
    };
}
