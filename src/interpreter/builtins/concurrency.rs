//! Concurrency: `spawn`, `run`, `parallel`, `context`, `datastore`,
//! `http_server`.

use std::time::Duration;

use crate::ast::Position;
use crate::context::ContextPayload;
use crate::interpreter::builtins::arg_type_error;
use crate::interpreter::error::{DuError, Flow};
use crate::interpreter::evaluator::Evaluator;
use crate::runtime::http::HttpServerHandle;
use crate::value::{BoxFuture, HandleKind, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("spawn", std::sync::Arc::new(spawn_fn)).await;
    ev.register_builtin("run", std::sync::Arc::new(run_fn)).await;
    ev.register_builtin("kill", std::sync::Arc::new(kill_fn)).await;
    ev.register_builtin("parallel", std::sync::Arc::new(parallel_fn)).await;
    ev.register_builtin("context", std::sync::Arc::new(context_fn)).await;
    ev.register_builtin("datastore", std::sync::Arc::new(datastore_fn)).await;
    ev.register_builtin("http_server", std::sync::Arc::new(http_server_fn)).await;
}

fn path_arg(ev: &Evaluator, args: &NamedArgs, pos: Position, fn_name: &str) -> Result<String, Flow> {
    match args.get_positional(0) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        _ => Err(arg_type_error(ev, pos, format!("{}() expects a script path string", fn_name))),
    }
}

/// Launches `path` as a detached child script and returns its pid
/// immediately (`spec.md` §4.E `spawn`).
fn spawn_fn(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let path = path_arg(ev, &args, pos, "spawn")?;
        let script_args = args.get_positional(1).cloned().unwrap_or(Value::Nil);
        crate::runtime::process::spawn(ev, path, script_args).await
    })
}

/// Runs `path` as a child script and blocks for its result (`spec.md`
/// §4.E `run`).
fn run_fn(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let path = path_arg(ev, &args, pos, "run")?;
        let script_args = args.get_positional(1).cloned().unwrap_or(Value::Nil);
        crate::runtime::process::run(ev, path, script_args).await
    })
}

/// Cooperatively cancels a child spawned via `spawn()`: trips its
/// cancellation token so it unwinds at its next statement boundary or
/// blocking datastore call (`spec.md` §4.E `kill(pid)`).
fn kill_fn(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let Some(pid) = args.get_positional(0).map(|v| v.to_number()).filter(|n| n.is_finite() && *n >= 0.0) else {
            return Err(arg_type_error(ev, pos, "kill() expects a numeric pid argument"));
        };
        Ok(Value::Bool(ev.processes.kill(pid as u64).await))
    })
}

/// Fans `args` (closures) out to independent child evaluators and joins
/// them, returning results in input order (`spec.md` §4.E `parallel`).
fn parallel_fn(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { crate::runtime::parallel::parallel(ev, args.positional, pos).await })
}

/// Returns the current execution context's payload: a spawned child's
/// `args`, an HTTP handler's request object, or `nil` at the top level
/// (`spec.md` §3 "Execution Context", §4.E).
fn context_fn(ev: &mut Evaluator, _args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        Ok(match &ev.ctx.payload {
            Some(ContextPayload::SpawnArgs(v)) => v.clone(),
            Some(ContextPayload::Request(rc)) => rc.to_value(),
            None => Value::Nil,
        })
    })
}

/// Wraps a logical namespace name as a `Value::Handle`; the registry
/// entry itself is created lazily on first method call (`spec.md` §4.D
/// `datastore(name)`).
fn datastore_fn(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let name = match args.get_positional(0) {
            Some(Value::Str(s)) => s.to_string(),
            _ => return Err(arg_type_error(ev, pos, "datastore() expects a namespace name string")),
        };
        Ok(Value::Handle(HandleKind::Datastore(name)))
    })
}

/// Constructs and registers an HTTP server handle from an options object
/// (`spec.md` §4.E `http_server(opts)`).
fn http_server_fn(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let Some(Value::Object(opts)) = args.get_positional(0) else {
            return Err(arg_type_error(ev, pos, "http_server() expects an options object"));
        };
        let opts = opts.read().await;

        let port = match opts.get("port").map(|v| v.to_number()) {
            Some(n) if n.is_finite() && n > 0.0 && n < 65536.0 => n as u16,
            _ => return Err(ev.data_err(DuError::Type("http_server() requires a numeric 'port'".into()), pos)),
        };
        let max_connections = opts.get("max_connections").map(|v| v.to_number()).filter(|n| n.is_finite() && *n > 0.0).map(|n| n as usize);
        let request_timeout = opts
            .get("request_handler_timeout")
            .map(|v| v.to_number())
            .filter(|n| n.is_finite() && *n > 0.0)
            .map(Duration::from_secs_f64);
        let on_shutdown = match opts.get("on_shutdown") {
            Some(Value::Str(s)) => Some(s.to_string()),
            _ => None,
        };

        let id = ev.http_servers.fresh_id();
        let handle = std::sync::Arc::new(HttpServerHandle::new(
            id.clone(),
            port,
            max_connections,
            request_timeout,
            on_shutdown,
            ev.datastores.clone(),
            ev.processes.clone(),
            ev.http_servers.clone(),
        ));

        if let Some(Value::Object(routes)) = opts.get("routes") {
            for (pattern, handler) in routes.read().await.iter() {
                let Value::Str(handler_path) = handler else { continue };
                let Some((method, prefix)) = pattern.split_once(' ') else { continue };
                handle.add_route(method, prefix, handler_path.to_string()).await;
            }
        }

        ev.http_servers.insert(id.clone(), handle).await;
        Ok(Value::Handle(HandleKind::HttpServer(id)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DatastoreRegistry;
    use crate::runtime::process::ProcessRegistry;
    use std::sync::Arc;

    async fn new_eval() -> Evaluator {
        Evaluator::new("test.du", Arc::new(DatastoreRegistry::new()), Arc::new(ProcessRegistry::new())).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn context_is_nil_at_top_level() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("print(context())").await;
        assert!(err.is_none());
        assert_eq!(out, "nil\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn datastore_returns_a_handle_usable_for_method_calls() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var d = datastore(\"counters\")\nd.set(\"n\", 1)\nprint(d.get(\"n\"))").await;
        assert!(err.is_none());
        assert_eq!(out, "1\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_server_rejects_missing_port() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute(r#"http_server({})"#).await;
        assert!(err.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn kill_on_unknown_pid_returns_false() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("print(kill(999999))").await;
        assert!(err.is_none());
        assert_eq!(out, "false\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_runs_closures_concurrently_and_preserves_order() {
        let mut ev = new_eval().await;
        let (out, err) = ev
            .execute("var r = parallel(function() return 1 end, function() return 2 end)\nprint(r)")
            .await;
        assert!(err.is_none());
        assert_eq!(out, "[1,2]\n");
    }
}
