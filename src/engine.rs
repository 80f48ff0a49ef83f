//! Duso Engine
//!
//! Main embedding entry point. Ties together the parser, evaluator, and
//! the process-wide shared registries (datastores, child processes, HTTP
//! servers) that every spawned/HTTP-handled script's own `Evaluator`
//! draws from (`spec.md` §3 "Execution Context", §5).

use std::sync::Arc;

use crate::datastore::DatastoreRegistry;
use crate::interpreter::error::RuntimeError;
use crate::interpreter::evaluator::{BreakpointHandler, Evaluator};
use crate::runtime::http::HttpServerRegistry;
use crate::runtime::process::ProcessRegistry;

/// Options for creating a Duso engine.
#[derive(Default)]
pub struct DusoOptions {
    /// Recursion depth limit applied to every evaluator this engine spawns.
    pub max_depth: Option<usize>,
    /// Installed on every top-level evaluator this engine spawns; absent
    /// on children created by `spawn`/`run`/`parallel`/HTTP dispatch,
    /// which always run unattended.
    pub breakpoint_handler: Option<BreakpointHandler>,
    /// Recorded on every top-level evaluator's context (`-L`/`--lib-path`).
    pub lib_path: Option<String>,
}

/// The main Duso runtime environment. Holds the registries that make
/// spawned scripts, datastores, and HTTP servers visible across
/// concurrently-running evaluators, and hands out a fresh top-level
/// [`Evaluator`] per [`Self::exec`] call.
pub struct Duso {
    datastores: Arc<DatastoreRegistry>,
    processes: Arc<ProcessRegistry>,
    http_servers: Arc<HttpServerRegistry>,
    max_depth: Option<usize>,
    breakpoint_handler: Option<BreakpointHandler>,
    lib_path: Option<String>,
}

impl Duso {
    pub fn new(options: DusoOptions) -> Self {
        Self {
            datastores: Arc::new(DatastoreRegistry::new()),
            processes: Arc::new(ProcessRegistry::new()),
            http_servers: Arc::new(HttpServerRegistry::new()),
            max_depth: options.max_depth,
            breakpoint_handler: options.breakpoint_handler,
            lib_path: options.lib_path,
        }
    }

    /// Builds a fresh top-level evaluator bound to `file_path`, sharing
    /// this engine's registries (`spec.md` §3 invariant 4: one Environment
    /// and Context per Evaluator).
    pub async fn evaluator(&self, file_path: impl Into<String>) -> Evaluator {
        let mut ev = Evaluator::with_http_servers(
            file_path,
            self.datastores.clone(),
            self.processes.clone(),
            self.http_servers.clone(),
        )
        .await;
        if let Some(max_depth) = self.max_depth {
            ev.ctx.max_depth = max_depth;
        }
        if let Some(lib_path) = &self.lib_path {
            ev.ctx.lib_path = Some(lib_path.clone());
        }
        if let Some(handler) = self.breakpoint_handler.clone() {
            ev.install_breakpoint_handler(handler);
        }
        ev
    }

    /// Parses and runs `source` to completion on a fresh evaluator,
    /// returning its accumulated `print()` output and an uncaught error,
    /// if any (`spec.md` §4.C `Execute`).
    pub async fn exec(&self, file_path: impl Into<String>, source: &str) -> (String, Option<RuntimeError>) {
        let mut ev = self.evaluator(file_path).await;
        ev.execute(source).await
    }

    /// Launches `path` as a detached top-level script, returning its pid
    /// (`spec.md` §4.E `spawn`). Distinct from the `spawn()` builtin only
    /// in that it has no parent evaluator to inherit context from.
    pub async fn spawn(&self, path: impl Into<String>, args: crate::value::Value) -> crate::interpreter::error::EvalResult<crate::value::Value> {
        let ev = self.evaluator("<engine>").await;
        crate::runtime::process::spawn(&ev, path.into(), args).await
    }

    pub fn datastores(&self) -> Arc<DatastoreRegistry> {
        self.datastores.clone()
    }

    pub fn processes(&self) -> Arc<ProcessRegistry> {
        self.processes.clone()
    }

    pub fn http_servers(&self) -> Arc<HttpServerRegistry> {
        self.http_servers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn exec_runs_a_script_and_collects_output() {
        let engine = Duso::new(DusoOptions::default());
        let (out, err) = engine.exec("test.du", "print(1 + 2)").await;
        assert!(err.is_none());
        assert_eq!(out, "3\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn datastores_are_shared_across_separate_exec_calls() {
        let engine = Duso::new(DusoOptions::default());
        let (_, err1) = engine.exec("a.du", r#"datastore("shared").set("k", 42)"#).await;
        assert!(err1.is_none());
        let (out, err2) = engine.exec("b.du", r#"print(datastore("shared").get("k"))"#).await;
        assert!(err2.is_none());
        assert_eq!(out, "42\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn max_depth_is_applied_to_new_evaluators() {
        let engine = Duso::new(DusoOptions { max_depth: Some(3), breakpoint_handler: None, lib_path: None });
        let ev = engine.evaluator("test.du").await;
        assert_eq!(ev.ctx.max_depth, 3);
    }
}
