//! `parallel(fn1, fn2, ...)` — runs N closures concurrently, each on its
//! own child evaluator/task, and returns results in input order. The
//! first error (if any) surfaces only after every sibling has finished
//! (`spec.md` §4.E `parallel`).

use crate::ast::Position;
use crate::context::ContextPayload;
use crate::interpreter::error::{DuError, EvalResult, Flow};
use crate::interpreter::evaluator::Evaluator;
use crate::value::{Closure, NamedArgs, Value};

pub async fn parallel(ev: &mut Evaluator, closures: Vec<Value>, pos: Position) -> EvalResult<Value> {
    let datastores = ev.datastores.clone();
    let processes = ev.processes.clone();
    let http_servers = ev.http_servers.clone();
    let file_path = ev.ctx.file_path.clone();

    let mut handles = Vec::with_capacity(closures.len());
    for value in closures {
        let closure = match value {
            Value::Function(c) => c,
            other => {
                return Err(ev.data_err(
                    DuError::Type(format!("parallel() arguments must be functions, got {}", other.type_name())),
                    pos,
                ))
            }
        };
        let datastores = datastores.clone();
        let processes = processes.clone();
        let http_servers = http_servers.clone();
        let file_path = file_path.clone();
        handles.push(tokio::spawn(run_arm(closure, datastores, processes, http_servers, file_path, pos)));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(v)) => results.push(v),
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                results.push(Value::Nil);
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error = Some(ev.data_err(DuError::Type(format!("parallel arm panicked: {}", join_err)), pos));
                }
                results.push(Value::Nil);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    Ok(Value::array(results))
}

async fn run_arm(
    closure: std::sync::Arc<Closure>,
    datastores: std::sync::Arc<crate::datastore::DatastoreRegistry>,
    processes: std::sync::Arc<crate::runtime::process::ProcessRegistry>,
    http_servers: std::sync::Arc<crate::runtime::http::HttpServerRegistry>,
    file_path: String,
    pos: Position,
) -> EvalResult<Value> {
    let mut child =
        Evaluator::spawn_child_full(file_path, datastores, processes, http_servers, Some(ContextPayload::SpawnArgs(Value::Nil))).await;
    child.call_closure(closure, NamedArgs::default(), pos).await
}
