//! The bytecode container: an in-memory model of the binary format plus a
//! byte-exact reader and writer.
//!
//! The two are inverses over the set of valid files: `read(write(f)) == f`,
//! and the writer is deterministic, so equal files produce identical bytes.
//! All multi-byte integers are little-endian; strings are u32-length-prefixed
//! UTF-8 with no terminator. The reader validates eagerly and exhaustively;
//! after a successful read the VM repeats no structural checks.

use crate::{error::MalformedBytecode, ir::Constant};

/// File magic, `b"PEXB"` read as a little-endian u32.
pub const MAGIC: u32 = u32::from_le_bytes(*b"PEXB");
/// Container major version; readers accept only an exact match.
pub const VERSION_MAJOR: u8 = 1;
/// Container minor version; informational.
pub const VERSION_MINOR: u8 = 0;
/// Header flag bit 0: a `DebugInfo` section follows the code section.
pub const FLAG_HAS_DEBUG_INFO: u8 = 0x01;

/// Fixed header size; the constant pool starts immediately after.
const HEADER_SIZE: u32 = 16;

/// Constant pool wire tags.
const TAG_NULL: u8 = 0;
const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;
const TAG_INT32: u8 = 3;
const TAG_FLOAT64: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_REGEX: u8 = 6;

/// One upvalue descriptor: where `MAKE_CLOSURE` finds the captured binding.
///
/// `is_local` means the binding lives in the enclosing function's local slot
/// `index`; otherwise `index` names the enclosing closure's own upvalue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u32,
}

/// Static description of one function: a window into the flat code section
/// plus slot counts and upvalue descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTemplate {
    /// Index into the name table; `None` for anonymous functions
    /// (serialized as -1).
    pub name_index: Option<u32>,
    pub param_count: u32,
    /// Total local slots, parameters included. Always ≥ `param_count`.
    pub local_count: u32,
    pub upvalues: Vec<UpvalueDesc>,
    pub code_offset: u32,
    pub code_length: u32,
}

/// Per-function debug payload: local slot names and an instruction → source
/// position table (byte offsets relative to the function's code window).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDebug {
    pub function_index: u32,
    pub local_names: Vec<String>,
    pub locations: Vec<InstructionLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionLocation {
    pub byte_offset: u32,
    pub line: u32,
    pub column: u32,
}

/// Optional trailing section mapping bytecode back to source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    pub functions: Vec<FunctionDebug>,
}

/// The complete container contents.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeFile {
    pub version_major: u8,
    pub version_minor: u8,
    /// Index of the template executed by `Vm::run`; takes no parameters.
    pub entry_point: u32,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub templates: Vec<FunctionTemplate>,
    /// Flat instruction buffer; each template owns a contiguous window.
    pub code: Vec<u8>,
    pub debug: Option<DebugInfo>,
}

impl BytecodeFile {
    /// Serializes the file. Deterministic: equal files yield identical
    /// bytes, with the reserved header byte always zero.
    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(self.version_major);
        out.push(self.version_minor);
        out.push(if self.debug.is_some() { FLAG_HAS_DEBUG_INFO } else { 0 });
        out.push(0); // reserved
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        out.extend_from_slice(&HEADER_SIZE.to_le_bytes());

        write_u32(&mut out, self.constants.len() as u32);
        for constant in &self.constants {
            write_constant(&mut out, constant);
        }

        write_u32(&mut out, self.names.len() as u32);
        for name in &self.names {
            write_str(&mut out, name);
        }

        write_u32(&mut out, self.templates.len() as u32);
        for template in &self.templates {
            let name_index = template.name_index.map_or(-1i32, |idx| idx as i32);
            out.extend_from_slice(&name_index.to_le_bytes());
            write_u32(&mut out, template.param_count);
            write_u32(&mut out, template.local_count);
            write_u32(&mut out, template.upvalues.len() as u32);
            for upvalue in &template.upvalues {
                out.push(u8::from(upvalue.is_local));
                write_u32(&mut out, upvalue.index);
            }
            write_u32(&mut out, template.code_offset);
            write_u32(&mut out, template.code_length);
        }

        write_u32(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);

        if let Some(debug) = &self.debug {
            write_u32(&mut out, debug.functions.len() as u32);
            for function in &debug.functions {
                write_u32(&mut out, function.function_index);
                write_u32(&mut out, function.local_names.len() as u32);
                for name in &function.local_names {
                    write_str(&mut out, name);
                }
                write_u32(&mut out, function.locations.len() as u32);
                for location in &function.locations {
                    write_u32(&mut out, location.byte_offset);
                    write_u32(&mut out, location.line);
                    write_u32(&mut out, location.column);
                }
            }
        }

        out
    }

    /// Deserializes and validates a container.
    pub fn read(data: &[u8]) -> Result<Self, MalformedBytecode> {
        let mut r = Reader { data, offset: 0 };

        let magic = r.u32("header magic")?;
        if magic != MAGIC {
            return Err(MalformedBytecode::new(0, "bad magic"));
        }
        let version_major = r.u8("version")?;
        if version_major != VERSION_MAJOR {
            return Err(MalformedBytecode::new(
                4,
                format!("incompatible major version {version_major} (expected {VERSION_MAJOR})"),
            ));
        }
        let version_minor = r.u8("version")?;
        let flags = r.u8("flags")?;
        let _reserved = r.u8("reserved")?;
        let entry_point = r.u32("entry point")?;
        let constant_pool_offset = r.u32("constant pool offset")?;
        if constant_pool_offset != HEADER_SIZE {
            return Err(MalformedBytecode::new(
                12,
                format!("constant pool offset must be {HEADER_SIZE}, found {constant_pool_offset}"),
            ));
        }

        let constant_count = r.u32("constant count")?;
        let mut constants = Vec::with_capacity(constant_count.min(1 << 16) as usize);
        for _ in 0..constant_count {
            constants.push(r.constant()?);
        }

        let name_count = r.u32("name count")?;
        let mut names = Vec::with_capacity(name_count.min(1 << 16) as usize);
        for _ in 0..name_count {
            names.push(r.string("name table entry")?);
        }

        let template_count = r.u32("template count")?;
        let mut templates = Vec::with_capacity(template_count.min(1 << 16) as usize);
        let mut template_offsets = Vec::with_capacity(templates.capacity());
        for _ in 0..template_count {
            template_offsets.push(r.offset);
            templates.push(r.template(names.len())?);
        }

        let code_length = r.u32("code section length")?;
        let code = r.bytes(code_length as usize, "code section")?.to_vec();

        for (template, start) in templates.iter().zip(&template_offsets) {
            let end = u64::from(template.code_offset) + u64::from(template.code_length);
            if end > code.len() as u64 {
                return Err(MalformedBytecode::new(
                    *start,
                    format!(
                        "code window {}..{} exceeds code section of {} bytes",
                        template.code_offset,
                        end,
                        code.len()
                    ),
                ));
            }
        }

        let Some(entry) = templates.get(entry_point as usize) else {
            return Err(MalformedBytecode::new(
                8,
                format!("entry point {entry_point} out of range ({template_count} templates)"),
            ));
        };
        if entry.param_count != 0 {
            return Err(MalformedBytecode::new(8, "entry template must take no parameters"));
        }

        let has_debug_flag = flags & FLAG_HAS_DEBUG_INFO != 0;
        let at_end = r.offset == data.len();
        let debug = if has_debug_flag {
            if at_end {
                return Err(MalformedBytecode::new(
                    r.offset,
                    "debug flag is set but no debug section follows",
                ));
            }
            Some(r.debug_info(templates.len())?)
        } else {
            None
        };

        if r.offset != data.len() {
            return Err(MalformedBytecode::new(
                r.offset,
                format!("{} unconsumed trailing bytes", data.len() - r.offset),
            ));
        }

        Ok(Self {
            version_major,
            version_minor,
            entry_point,
            constants,
            names,
            templates,
            code,
            debug,
        })
    }
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) {
    match constant {
        Constant::Null => out.push(TAG_NULL),
        Constant::Bool(true) => out.push(TAG_TRUE),
        Constant::Bool(false) => out.push(TAG_FALSE),
        Constant::Number(n) => {
            // Integral values in i32 range take the compact tag. Negative
            // zero is excluded: i32 cannot represent it, and the tag choice
            // must round-trip the exact bit pattern.
            let negative_zero = *n == 0.0 && n.is_sign_negative();
            let integral = n.fract() == 0.0 && *n >= f64::from(i32::MIN) && *n <= f64::from(i32::MAX);
            if integral && !negative_zero {
                out.push(TAG_INT32);
                out.extend_from_slice(&(*n as i32).to_le_bytes());
            } else {
                out.push(TAG_FLOAT64);
                out.extend_from_slice(&n.to_le_bytes());
            }
        }
        Constant::Str(s) => {
            out.push(TAG_STRING);
            write_str(out, s);
        }
        Constant::Regex { pattern, flags } => {
            out.push(TAG_REGEX);
            write_str(out, pattern);
            write_str(out, flags);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn err(&self, reason: impl Into<String>) -> MalformedBytecode {
        MalformedBytecode::new(self.offset, reason)
    }

    fn bytes(&mut self, len: usize, what: &str) -> Result<&[u8], MalformedBytecode> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or_else(|| self.err(format!("{what} length overflows")))?;
        if end > self.data.len() {
            return Err(self.err(format!("truncated {what}: need {len} bytes")));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, MalformedBytecode> {
        Ok(self.bytes(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32, MalformedBytecode> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self, what: &str) -> Result<i32, MalformedBytecode> {
        let b = self.bytes(4, what)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self, what: &str) -> Result<f64, MalformedBytecode> {
        let b = self.bytes(8, what)?;
        Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn string(&mut self, what: &str) -> Result<String, MalformedBytecode> {
        let start = self.offset;
        let len = self.u32(what)? as usize;
        let bytes = self.bytes(len, what)?;
        std::str::from_utf8(bytes)
            .map(ToOwned::to_owned)
            .map_err(|_| MalformedBytecode::new(start, format!("{what} is not valid UTF-8")))
    }

    fn constant(&mut self) -> Result<Constant, MalformedBytecode> {
        let tag_offset = self.offset;
        let tag = self.u8("constant tag")?;
        match tag {
            TAG_NULL => Ok(Constant::Null),
            TAG_TRUE => Ok(Constant::Bool(true)),
            TAG_FALSE => Ok(Constant::Bool(false)),
            TAG_INT32 => Ok(Constant::Number(f64::from(self.i32("int constant")?))),
            TAG_FLOAT64 => Ok(Constant::Number(self.f64("float constant")?)),
            TAG_STRING => Ok(Constant::Str(self.string("string constant")?)),
            TAG_REGEX => Ok(Constant::Regex {
                pattern: self.string("regex pattern")?,
                flags: self.string("regex flags")?,
            }),
            _ => Err(MalformedBytecode::new(
                tag_offset,
                format!("unknown constant tag {tag}"),
            )),
        }
    }

    fn template(&mut self, name_count: usize) -> Result<FunctionTemplate, MalformedBytecode> {
        let start = self.offset;
        let raw_name = self.i32("template name index")?;
        let name_index = match raw_name {
            -1 => None,
            n if n >= 0 && (n as usize) < name_count => Some(n as u32),
            _ => {
                return Err(MalformedBytecode::new(
                    start,
                    format!("template name index {raw_name} out of range ({name_count} names)"),
                ));
            }
        };
        let param_count = self.u32("param count")?;
        let local_count = self.u32("local count")?;
        if param_count > local_count {
            return Err(MalformedBytecode::new(
                start,
                format!("param count {param_count} exceeds local count {local_count}"),
            ));
        }
        let upvalue_count = self.u32("upvalue count")?;
        let mut upvalues = Vec::with_capacity(upvalue_count.min(1 << 16) as usize);
        for _ in 0..upvalue_count {
            let flag_offset = self.offset;
            let is_local = match self.u8("upvalue flag")? {
                0 => false,
                1 => true,
                other => {
                    return Err(MalformedBytecode::new(
                        flag_offset,
                        format!("invalid upvalue flag {other}"),
                    ));
                }
            };
            let index = self.u32("upvalue index")?;
            upvalues.push(UpvalueDesc { is_local, index });
        }
        let code_offset = self.u32("code offset")?;
        let code_length = self.u32("code length")?;
        Ok(FunctionTemplate {
            name_index,
            param_count,
            local_count,
            upvalues,
            code_offset,
            code_length,
        })
    }

    fn debug_info(&mut self, template_count: usize) -> Result<DebugInfo, MalformedBytecode> {
        let function_count = self.u32("debug function count")?;
        let mut functions = Vec::with_capacity(function_count.min(1 << 16) as usize);
        for _ in 0..function_count {
            let start = self.offset;
            let function_index = self.u32("debug function index")?;
            if function_index as usize >= template_count {
                return Err(MalformedBytecode::new(
                    start,
                    format!("debug function index {function_index} out of range ({template_count} templates)"),
                ));
            }
            let local_name_count = self.u32("local name count")?;
            let mut local_names = Vec::with_capacity(local_name_count.min(1 << 16) as usize);
            for _ in 0..local_name_count {
                local_names.push(self.string("local name")?);
            }
            let location_count = self.u32("location count")?;
            let mut locations = Vec::with_capacity(location_count.min(1 << 16) as usize);
            for _ in 0..location_count {
                locations.push(InstructionLocation {
                    byte_offset: self.u32("location byte offset")?,
                    line: self.u32("location line")?,
                    column: self.u32("location column")?,
                });
            }
            functions.push(FunctionDebug {
                function_index,
                local_names,
                locations,
            });
        }
        Ok(DebugInfo { functions })
    }
}
