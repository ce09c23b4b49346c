use std::{error::Error, fmt};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// An error raised by the host effect handler.
///
/// Host errors propagate out of `Vm::run` unchanged; the VM never inspects
/// or recovers from them.
pub type HostError = Box<dyn Error + Send + Sync + 'static>;

/// Error produced while executing bytecode.
///
/// The VM never attempts recovery: any runtime error unwinds all frames
/// (closing their upvalues) before surfacing to the caller.
#[derive(Debug)]
pub enum RunError {
    /// VM-level failure: undefined variable, arity mismatch, type mismatch,
    /// division by zero, assertion failure, effect protocol violation, or a
    /// VM invariant violation (unreachable in well-formed bytecode).
    Runtime {
        /// Human-readable description naming the operation and offending
        /// types or counts.
        message: String,
    },
    /// An error raised by the host effect handler, surfaced unchanged.
    Host(HostError),
}

impl RunError {
    /// Creates a runtime error with the given message.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Arity failure for a named callable.
    pub fn arity(name: &str, expected: &str, got: usize) -> Self {
        Self::runtime(format!("{name}() expects {expected} arguments, got {got}"))
    }

    /// Type failure for a named callable.
    pub fn type_mismatch(name: &str, expected: &str, got: &str) -> Self {
        Self::runtime(format!("{name}() expects {expected}, got {got}"))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime { message } => write!(f, "RuntimeError: {message}"),
            Self::Host(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Runtime { .. } => None,
            Self::Host(err) => Some(err.as_ref()),
        }
    }
}

/// Error returned by the bytecode reader when a container fails validation.
///
/// Surfaced by `Program::load` only; once a container loads successfully the
/// VM repeats no structural checks at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedBytecode {
    /// Byte offset at which the problem was detected.
    pub offset: usize,
    /// What was wrong at that offset.
    pub reason: String,
}

impl MalformedBytecode {
    pub(crate) fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedBytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed bytecode at offset {}: {}", self.offset, self.reason)
    }
}

impl Error for MalformedBytecode {}
