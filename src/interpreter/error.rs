//! Error taxonomy
//!
//! `spec.md` §7: data errors are catchable with `try/catch`; non-local
//! control signals (`return`, `break`, `continue`, `exit`, breakpoint hit,
//! cancellation) are distinct and only some of them are catchable.

use thiserror::Error;

use crate::ast::Position;
use crate::context::Frame;
use crate::value::Value;

/// Catchable data errors (`spec.md` §7). `Throw` carries the arbitrary
/// value a script passed to `throw(value)`.
#[derive(Error, Debug, Clone)]
pub enum DuError {
    #[error("undefined variable or member: {0}")]
    Undefined(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("datastore error: {0}")]
    Datastore(String),
    #[error("{0}")]
    Throw(Value),
    #[error("recursion depth limit ({0}) exceeded")]
    RecursionDepth(usize),
    #[error("parse error: {0}")]
    Parse(String),
}

/// A caught or uncaught data error plus the propagation context `spec.md`
/// §7 requires: file path, position, and a clone of the call stack.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: DuError,
    pub file: String,
    pub position: Position,
    pub call_stack: Vec<Frame>,
}

impl RuntimeError {
    pub fn new(kind: DuError, file: impl Into<String>, position: Position, call_stack: Vec<Frame>) -> Self {
        Self { kind, file: file.into(), position, call_stack }
    }

    pub fn message(&self) -> String {
        format!("{}", self.kind)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.position, self.kind)
    }
}

/// A debug-stepping suspension: a snapshot of the call stack at the
/// moment a breakpoint fired (`spec.md` §4.C "Stepping").
#[derive(Debug, Clone)]
pub struct BreakpointSnapshot {
    pub file: String,
    pub position: Position,
    pub call_stack: Vec<Frame>,
    pub locals: Vec<(String, Value)>,
}

/// Everything that can unwind evaluation of a statement or expression.
/// `Error` is the only catchable branch; every other variant is a
/// non-local control signal that `try/catch` must not intercept.
#[derive(Debug, Clone)]
pub enum Flow {
    Error(RuntimeError),
    Return(Value),
    Break,
    Continue,
    Exit(Value),
    Cancellation,
}

impl Flow {
    pub fn is_catchable(&self) -> bool {
        matches!(self, Flow::Error(_))
    }
}

pub type EvalResult<T> = Result<T, Flow>;

/// Turns a bare [`DuError`] into a [`Flow::Error`], stamping it with the
/// current file/position/call-stack.
pub fn data_error(
    kind: DuError,
    file: &str,
    position: Position,
    call_stack: &[Frame],
) -> Flow {
    Flow::Error(RuntimeError::new(kind, file.to_string(), position, call_stack.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_error_variant_is_catchable() {
        let err = Flow::Error(RuntimeError::new(
            DuError::Undefined("x".into()),
            "main.du",
            Position::default(),
            vec![],
        ));
        assert!(err.is_catchable());
        assert!(!Flow::Exit(Value::Nil).is_catchable());
        assert!(!Flow::Cancellation.is_catchable());
        assert!(!Flow::Break.is_catchable());
    }

    #[test]
    fn runtime_error_displays_file_and_position() {
        let err = RuntimeError::new(
            DuError::Type("bad".into()),
            "main.du",
            Position { line: 3, column: 4, offset: 0 },
            vec![],
        );
        assert_eq!(format!("{}", err), "main.du:3:4: type error: bad");
    }
}
