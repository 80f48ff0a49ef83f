//! Execution Context
//!
//! Per-evaluator state: call stack, recursion depth, cancellation token,
//! step/breakpoint state, and the `context()` builtin's payload
//! (`spec.md` §3 "Execution Context", §4.B, §4.C "Stepping").

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ast::Position;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Frame {
    pub name: String,
    pub position: Position,
    pub args: Vec<Value>,
}

/// A monotonic, cheaply-cloneable flag checked at statement boundaries and
/// datastore blocking calls (`spec.md` §4.B, §5 "Cancellation and
/// timeouts"). Tripping it is not catchable by `try/catch`.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Into,
    Over,
    Out,
}

#[derive(Debug, Clone)]
pub struct StepState {
    pub mode: StepMode,
    pub target_depth: usize,
    pub last_position: Option<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDirective {
    Continue,
    StepInto,
    StepOver,
    StepOut,
}

/// The `context()` builtin's return payload: either a spawned child's
/// `args`, or an HTTP handler's request object. At the top level, neither
/// is present and `context()` returns nil.
#[derive(Clone)]
pub enum ContextPayload {
    SpawnArgs(Value),
    Request(crate::runtime::http::request::RequestContext),
}

pub struct ExecutionContext {
    pub file_path: String,
    pub call_stack: Vec<Frame>,
    pub depth: usize,
    pub max_depth: usize,
    pub cancellation: CancellationToken,
    pub step_state: Option<StepState>,
    pub payload: Option<ContextPayload>,
    pub parent: Option<Box<ExecutionContext>>,
    /// Variable names registered via the `watch()` builtin; resolved into
    /// a breakpoint snapshot's `locals` on the next stop (`spec.md` §4.C
    /// "Control" builtin group).
    pub watched: Vec<String>,
    /// Library search directory passed via `-L`/`--lib-path`. Recorded
    /// for future `require`/`include` resolution, which stays out of
    /// scope (`spec.md` §1, §6.1).
    pub lib_path: Option<String>,
}

static RECURSION_DEPTH_DEFAULT: AtomicUsize = AtomicUsize::new(10_000);

impl ExecutionContext {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            call_stack: Vec::new(),
            depth: 0,
            max_depth: RECURSION_DEPTH_DEFAULT.load(Ordering::Relaxed),
            cancellation: CancellationToken::new(),
            step_state: None,
            payload: None,
            parent: None,
            watched: Vec::new(),
            lib_path: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_lib_path(mut self, lib_path: impl Into<String>) -> Self {
        self.lib_path = Some(lib_path.into());
        self
    }

    pub fn with_payload(mut self, payload: ContextPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Pushes a call frame and checks recursion depth (`spec.md` §3
    /// invariant 1, §4.C "Recursion depth"). Returns `false` on
    /// exceedance; the caller turns that into a recoverable runtime error.
    pub fn push_frame(&mut self, frame: Frame) -> bool {
        if self.depth >= self.max_depth {
            return false;
        }
        self.depth += 1;
        self.call_stack.push(frame);
        true
    }

    pub fn pop_frame(&mut self) {
        self.call_stack.pop();
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn snapshot_call_stack(&self) -> Vec<Frame> {
        self.call_stack.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_token_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn push_frame_respects_max_depth() {
        let mut ctx = ExecutionContext::new("test.du").with_max_depth(2);
        assert!(ctx.push_frame(Frame { name: "a".into(), position: Position::default(), args: vec![] }));
        assert!(ctx.push_frame(Frame { name: "b".into(), position: Position::default(), args: vec![] }));
        assert!(!ctx.push_frame(Frame { name: "c".into(), position: Position::default(), args: vec![] }));
    }

    #[test]
    fn pop_frame_restores_depth() {
        let mut ctx = ExecutionContext::new("test.du").with_max_depth(5);
        ctx.push_frame(Frame { name: "a".into(), position: Position::default(), args: vec![] });
        ctx.pop_frame();
        assert_eq!(ctx.depth, 0);
        assert!(ctx.call_stack.is_empty());
    }
}
