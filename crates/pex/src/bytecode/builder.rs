//! Builder for emitting one function's bytecode during compilation.
//!
//! Handles encoding opcodes and operands, forward jumps with patching, and
//! source-location tracking for the optional debug section. The compiler
//! concatenates the finished buffers into the container's flat code section.

use crate::{
    ast::Span,
    bytecode::{file::InstructionLocation, op::Opcode},
};

/// Label returned by `emit_jump`, consumed by `patch_jump`.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct JumpLabel(usize);

/// Emits bytecode for a single function template.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    /// The instruction bytes being built.
    bytecode: Vec<u8>,

    /// Source positions per instruction start, deduplicated against the
    /// previous entry. Offsets are relative to this function's window.
    location_table: Vec<InstructionLocation>,

    /// Position recorded for the next emitted instruction.
    current_location: Option<Span>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source position attached to subsequently emitted
    /// instructions.
    pub fn set_location(&mut self, span: Option<Span>) {
        if span.is_some() {
            self.current_location = span;
        }
    }

    fn start_instruction(&mut self) {
        if let Some(span) = self.current_location {
            let entry = InstructionLocation {
                byte_offset: self.bytecode.len() as u32,
                line: span.line,
                column: span.column,
            };
            match self.location_table.last() {
                Some(last) if last.line == entry.line && last.column == entry.column => {}
                _ => self.location_table.push(entry),
            }
        }
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.start_instruction();
        self.bytecode.push(op as u8);
    }

    /// Emits an instruction with a u8 operand.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
    }

    /// Emits an instruction with a u16 operand (little-endian).
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emits an instruction with a u16 operand followed by a u8 operand.
    ///
    /// Used for `Effect`: name index (u16) + argument count (u8).
    pub fn emit_u16_u8(&mut self, op: Opcode, operand1: u16, operand2: u8) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand1.to_le_bytes());
        self.bytecode.push(operand2);
    }

    /// Emits a forward jump with a placeholder offset, returning a label to
    /// patch once the target is known.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.start_instruction();
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        label
    }

    /// Patches a forward jump to land at the current position.
    ///
    /// The offset is relative to the position after the jump's operand.
    ///
    /// # Panics
    ///
    /// Panics when the offset exceeds i16 range, meaning the function is too
    /// large; an explicit failure beats silent truncation.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.bytecode.len();
        let raw_offset = target as i64 - label.0 as i64 - 3;
        let offset = i16::try_from(raw_offset).expect("jump offset exceeds i16 range; function too large");
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0 + 1] = bytes[0];
        self.bytecode[label.0 + 2] = bytes[1];
    }

    /// Finishes the build, returning the raw bytes and the location table.
    #[must_use]
    pub fn build(self) -> (Vec<u8>, Vec<InstructionLocation>) {
        (self.bytecode, self.location_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_forward_jumps() {
        let mut builder = CodeBuilder::new();
        let jump = builder.emit_jump(Opcode::JumpIfFalse);
        builder.emit_u16(Opcode::LoadConst, 0);
        builder.patch_jump(jump);
        let (code, _) = builder.build();
        // operand lands past the LoadConst (3 bytes)
        assert_eq!(i16::from_le_bytes([code[1], code[2]]), 3);
    }

    #[test]
    fn deduplicates_location_entries() {
        let mut builder = CodeBuilder::new();
        builder.set_location(Some(Span::new(1, 1)));
        builder.emit(Opcode::Pop);
        builder.emit(Opcode::Pop);
        builder.set_location(Some(Span::new(2, 1)));
        builder.emit(Opcode::Return);
        let (_, locations) = builder.build();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[1].byte_offset, 2);
        assert_eq!(locations[1].line, 2);
    }
}
