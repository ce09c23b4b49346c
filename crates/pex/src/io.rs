//! Output sinks for the `print` and `debug` effects.
//!
//! The default effect handler writes through a `PrintWriter` so embedders and
//! tests can capture program output without touching stdout.

use std::{cell::RefCell, rc::Rc};

/// Destination for lines produced by the default `print`/`debug` handling.
pub trait PrintWriter {
    /// Writes one complete line (without a trailing newline).
    fn write_line(&mut self, line: &str);
}

/// Writes to stdout via `println!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_line(&mut self, _line: &str) {}
}

/// Collects output into a shared string, one `\n`-terminated line per write.
///
/// Clones share the same buffer, so a test can keep one handle and hand the
/// other to the VM's handler.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint {
    buffer: Rc<RefCell<String>>,
}

impl CollectStringPrint {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_line(&mut self, line: &str) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push_str(line);
        buffer.push('\n');
    }
}
