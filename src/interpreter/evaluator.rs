//! The tree-walking evaluator itself.
//!
//! Public contract mirrors `spec.md` §4.C: `Execute`, `ExecuteNode`,
//! `RegisterBuiltin`, `GetVariable`/`SetVariable`, `Call`.

use std::sync::Arc;

use crate::ast::{Position, Program, Stmt};
use crate::context::{
    BreakpointSnapshot, CancellationToken, ContextPayload, ExecutionContext, Frame,
    ResumeDirective, StepMode,
};
use crate::datastore::DatastoreRegistry;
use crate::env::Env;
use crate::interpreter::error::{data_error, DuError, EvalResult, Flow, RuntimeError};
use crate::parser::{parse, ParseError};
use crate::runtime::http::HttpServerRegistry;
use crate::runtime::process::ProcessRegistry;
use crate::value::{NamedArgs, NativeFn, Value};

pub type BreakpointHandler = Arc<dyn Fn(&BreakpointSnapshot) -> ResumeDirective + Send + Sync>;

/// A tree-walking interpreter instance bound to one [`Env`] chain and one
/// [`ExecutionContext`]. Single-threaded by contract (`spec.md` §5): a
/// spawned/HTTP-handled script gets a fresh `Evaluator` on its own task.
pub struct Evaluator {
    pub(crate) globals: Env,
    pub ctx: ExecutionContext,
    pub datastores: Arc<DatastoreRegistry>,
    pub processes: Arc<ProcessRegistry>,
    pub http_servers: Arc<HttpServerRegistry>,
    pub output: String,
    pub breakpoint_handler: Option<BreakpointHandler>,
    /// The lexical scope of the statement currently executing, refreshed
    /// at every `exec_stmt` entry. Lets builtins that need scope access
    /// (`breakpoint()`) reach it despite `NativeFn` not threading an
    /// `Env` through the call path.
    pub(crate) current_env: Option<Env>,
}

impl Evaluator {
    pub async fn new(
        file_path: impl Into<String>,
        datastores: Arc<DatastoreRegistry>,
        processes: Arc<ProcessRegistry>,
    ) -> Self {
        Self::with_http_servers(file_path, datastores, processes, Arc::new(HttpServerRegistry::new())).await
    }

    pub async fn with_http_servers(
        file_path: impl Into<String>,
        datastores: Arc<DatastoreRegistry>,
        processes: Arc<ProcessRegistry>,
        http_servers: Arc<HttpServerRegistry>,
    ) -> Self {
        let globals = Env::root();
        let mut ev = Self {
            globals,
            ctx: ExecutionContext::new(file_path),
            datastores,
            processes,
            http_servers,
            output: String::new(),
            breakpoint_handler: None,
            current_env: None,
        };
        crate::interpreter::builtins::register_all(&mut ev).await;
        ev
    }

    /// Creates a child evaluator (spawn/run/parallel/HTTP handler) that
    /// shares the process-wide datastore, process, and HTTP-server
    /// registries but owns an independent environment and execution
    /// context (`spec.md` §3 invariant 4, §5).
    pub async fn spawn_child(
        file_path: impl Into<String>,
        datastores: Arc<DatastoreRegistry>,
        processes: Arc<ProcessRegistry>,
        payload: Option<ContextPayload>,
    ) -> Self {
        let mut child = Self::new(file_path, datastores, processes).await;
        if let Some(payload) = payload {
            child.ctx = child.ctx.with_payload(payload);
        }
        child
    }

    /// Like [`Self::spawn_child`] but propagates the parent's HTTP-server
    /// registry too (used when an HTTP handler itself spawns children).
    pub async fn spawn_child_full(
        file_path: impl Into<String>,
        datastores: Arc<DatastoreRegistry>,
        processes: Arc<ProcessRegistry>,
        http_servers: Arc<HttpServerRegistry>,
        payload: Option<ContextPayload>,
    ) -> Self {
        let mut child = Self::with_http_servers(file_path, datastores, processes, http_servers).await;
        if let Some(payload) = payload {
            child.ctx = child.ctx.with_payload(payload);
        }
        child
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancellation.clone()
    }

    pub fn install_breakpoint_handler(&mut self, handler: BreakpointHandler) {
        self.breakpoint_handler = Some(handler);
    }

    /// Adds a native callable to the root environment (`spec.md` §4.C
    /// `RegisterBuiltin`).
    pub async fn register_builtin(&mut self, name: &str, f: NativeFn) {
        self.globals.define(name, Value::Native(f)).await;
    }

    pub async fn get_variable(&self, name: &str) -> Option<Value> {
        self.globals.get(name).await
    }

    pub async fn set_variable(&self, name: &str, value: Value) {
        if !self.globals.set(name, value.clone()).await {
            self.globals.define(name, value).await;
        }
    }

    /// Re-entrant invocation (`spec.md` §4.C `Call`). Native callables
    /// recurse straight into their closure; script functions get a fresh
    /// child scope.
    pub async fn call(&mut self, func: Value, args: NamedArgs) -> EvalResult<Value> {
        let pos = self.ctx.call_stack.last().map(|f| f.position).unwrap_or_default();
        self.call_value(&func, args, pos).await
    }

    pub(crate) async fn call_value(&mut self, func: &Value, args: NamedArgs, pos: Position) -> EvalResult<Value> {
        match func {
            Value::Native(f) => f(self, args, pos).await,
            Value::Function(closure) => self.call_closure(closure.clone(), args, pos).await,
            other => Err(self.data_err(
                DuError::Type(format!("value of type {} is not callable", other.type_name())),
                pos,
            )),
        }
    }

    pub(crate) async fn call_closure(
        &mut self,
        closure: Arc<crate::value::Closure>,
        args: NamedArgs,
        pos: Position,
    ) -> EvalResult<Value> {
        let call_env = closure.env.child();
        for (i, param) in closure.params.iter().enumerate() {
            let value = if let Some(v) = args.get_positional(i) {
                v.clone()
            } else if let Some(v) = args.get_named(&param.name) {
                v.clone()
            } else if let Some(default_expr) = &param.default {
                self.eval_expr(&call_env, default_expr).await?
            } else {
                Value::Nil
            };
            call_env.define(param.name.clone(), value).await;
        }
        // Named overrides applied after positional binding (spec.md §9).
        for param in &closure.params {
            if let Some(v) = args.get_named(&param.name) {
                call_env.define(param.name.clone(), v.clone()).await;
            }
        }

        let frame = Frame {
            name: closure.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
            position: pos,
            args: args.positional.clone(),
        };
        if !self.ctx.push_frame(frame) {
            return Err(self.data_err(DuError::RecursionDepth(self.ctx.max_depth), pos));
        }
        let result = self.exec_block(&call_env, &closure.body).await;
        self.ctx.pop_frame();

        match result {
            Ok(()) => Ok(Value::Nil),
            Err(Flow::Return(v)) => Ok(v),
            Err(other) => Err(other),
        }
    }

    /// Stamps a bare [`DuError`] into a [`Flow::Error`] using this
    /// evaluator's current file path and call stack.
    pub(crate) fn data_err(&self, kind: DuError, pos: Position) -> Flow {
        data_error(kind, &self.ctx.file_path, pos, &self.ctx.call_stack)
    }

    pub(crate) fn check_cancel(&self) -> EvalResult<()> {
        if self.ctx.cancellation.is_cancelled() {
            return Err(Flow::Cancellation);
        }
        Ok(())
    }

    /// Evaluates a single statement (`spec.md` §4.C `ExecuteNode`, used by
    /// debug stepping).
    pub async fn execute_node(&mut self, stmt: &Stmt) -> EvalResult<()> {
        let env = self.globals.clone();
        self.exec_stmt(&env, stmt).await
    }

    /// Runs a whole parsed program to completion, surfacing a top-level
    /// `exit(value)` or `return value` as `Ok(value)`.
    pub async fn run_program(&mut self, program: &Program) -> EvalResult<Value> {
        let env = self.globals.clone();
        match self.exec_block(&env, &program.statements).await {
            Ok(()) => Ok(Value::Nil),
            Err(Flow::Exit(v)) => Ok(v),
            Err(Flow::Return(v)) => Ok(v),
            Err(other) => Err(other),
        }
    }

    /// Parses then evaluates a whole program (`spec.md` §4.C `Execute`).
    pub async fn execute(&mut self, source: &str) -> (String, Option<RuntimeError>) {
        self.output.clear();
        let program = match parse(source) {
            Ok(p) => p,
            Err(e) => {
                let pos = match &e {
                    ParseError::Lex(le) => le.pos,
                    ParseError::Syntax { pos, .. } => *pos,
                };
                return (
                    self.output.clone(),
                    Some(RuntimeError::new(
                        DuError::Parse(e.to_string()),
                        self.ctx.file_path.clone(),
                        pos,
                        vec![],
                    )),
                );
            }
        };
        match self.run_program(&program).await {
            Ok(_) => (self.output.clone(), None),
            Err(Flow::Error(re)) => (self.output.clone(), Some(re)),
            Err(_) => (self.output.clone(), None),
        }
    }

    /// Arms step-state for debug stepping (`spec.md` §4.C "Stepping").
    pub fn set_step_mode(&mut self, mode: StepMode) {
        self.ctx.step_state = Some(crate::context::StepState {
            mode,
            target_depth: self.ctx.depth,
            last_position: None,
        });
    }

    pub(crate) async fn maybe_breakpoint(&mut self, env: &Env, pos: Position) -> EvalResult<()> {
        let Some(handler) = self.breakpoint_handler.clone() else {
            return Ok(());
        };
        let should_stop = if let Some(step) = &self.ctx.step_state {
            let line_changed = step.last_position.map(|p| p.line != pos.line).unwrap_or(true);
            let depth_ok = match step.mode {
                StepMode::Into => true,
                StepMode::Over => self.ctx.depth <= step.target_depth,
                StepMode::Out => self.ctx.depth < step.target_depth,
            };
            line_changed && depth_ok
        } else {
            false
        };
        if !should_stop {
            return Ok(());
        }
        self.stop_at_breakpoint(env, pos, handler).await
    }

    /// Unconditionally invokes the breakpoint handler (`breakpoint()`
    /// builtin), independent of step-mode state.
    pub(crate) async fn force_breakpoint(&mut self, env: &Env, pos: Position) -> EvalResult<()> {
        let Some(handler) = self.breakpoint_handler.clone() else {
            return Ok(());
        };
        self.stop_at_breakpoint(env, pos, handler).await
    }

    /// Same as [`Self::force_breakpoint`] but resolves the scope from
    /// [`Self::current_env`] for callers (the `breakpoint()` builtin) that
    /// don't have direct access to the enclosing `Env`.
    pub(crate) async fn force_breakpoint_current(&mut self, pos: Position) -> EvalResult<()> {
        let Some(env) = self.current_env.clone() else {
            return Ok(());
        };
        self.force_breakpoint(&env, pos).await
    }

    async fn stop_at_breakpoint(&mut self, env: &Env, pos: Position, handler: BreakpointHandler) -> EvalResult<()> {
        let mut locals = Vec::with_capacity(self.ctx.watched.len());
        for name in self.ctx.watched.clone() {
            if let Some(v) = env.get(&name).await {
                locals.push((name, v));
            }
        }
        let snapshot = BreakpointSnapshot {
            file: self.ctx.file_path.clone(),
            position: pos,
            call_stack: self.ctx.snapshot_call_stack(),
            locals,
        };
        let directive = handler(&snapshot);
        match directive {
            ResumeDirective::Continue => self.ctx.step_state = None,
            ResumeDirective::StepInto => {
                self.ctx.step_state =
                    Some(crate::context::StepState { mode: StepMode::Into, target_depth: self.ctx.depth, last_position: Some(pos) })
            }
            ResumeDirective::StepOver => {
                self.ctx.step_state =
                    Some(crate::context::StepState { mode: StepMode::Over, target_depth: self.ctx.depth, last_position: Some(pos) })
            }
            ResumeDirective::StepOut => {
                self.ctx.step_state = Some(crate::context::StepState {
                    mode: StepMode::Out,
                    target_depth: self.ctx.depth.saturating_sub(1),
                    last_position: Some(pos),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::process::ProcessRegistry;

    async fn new_eval() -> Evaluator {
        Evaluator::new("test.du", Arc::new(DatastoreRegistry::new()), Arc::new(ProcessRegistry::new())).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn executes_simple_arithmetic_program() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute("var x = 1 + 2\nreturn x").await;
        assert!(err.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reports_parse_errors() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute("var x = ").await;
        assert!(err.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undefined_variable_is_catchable_data_error() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute("missing_var + 1").await;
        assert!(err.is_some());
        assert!(matches!(err.unwrap().kind, DuError::Undefined(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recursion_depth_is_enforced() {
        let mut ev = new_eval().await;
        ev.ctx.max_depth = 5;
        let (_, err) = ev
            .execute("function rec(n) return rec(n + 1) end\nrec(0)")
            .await;
        assert!(matches!(err.unwrap().kind, DuError::RecursionDepth(5)));
    }
}
