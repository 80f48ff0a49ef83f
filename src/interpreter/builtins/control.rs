//! Control: `exit`, `throw`, `breakpoint`, `watch`.

use crate::ast::Position;
use crate::interpreter::error::{DuError, Flow, RuntimeError};
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("exit", std::sync::Arc::new(exit)).await;
    ev.register_builtin("throw", std::sync::Arc::new(throw)).await;
    ev.register_builtin("breakpoint", std::sync::Arc::new(breakpoint)).await;
    ev.register_builtin("watch", std::sync::Arc::new(watch)).await;
}

/// Terminates the running script/task with the given value as its result
/// (`spec.md` §4.C "Control" builtin group). Not catchable by `try/catch`.
fn exit(_ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Err(Flow::Exit(v))
    })
}

/// Raises a catchable data error carrying an arbitrary script value
/// (`spec.md` §7).
fn throw(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Err(Flow::Error(RuntimeError::new(
            DuError::Throw(v),
            ev.ctx.file_path.clone(),
            pos,
            ev.ctx.snapshot_call_stack(),
        )))
    })
}

/// Unconditionally stops at the call site, regardless of step-mode state
/// (`spec.md` §4.C "Stepping"). A no-op when no breakpoint handler is
/// installed.
fn breakpoint(ev: &mut Evaluator, _args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        ev.force_breakpoint_current(pos).await?;
        Ok(Value::Nil)
    })
}

/// Registers one or more variable names to be resolved into a breakpoint
/// snapshot's `locals` on the next stop (`spec.md` §4.C "Control" builtin
/// group). Names already watched are not duplicated.
fn watch(ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        for v in &args.positional {
            if let Value::Str(s) = v {
                let name = s.to_string();
                if !ev.ctx.watched.iter().any(|w| w == &name) {
                    ev.ctx.watched.push(name);
                }
            }
        }
        Ok(Value::Nil)
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
    async fn exit_short_circuits_remaining_statements() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("print(1)\nexit(nil)\nprint(2)").await;
        assert!(err.is_none());
        assert_eq!(out, "1\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn throw_is_caught_by_try_catch() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute(r#"try throw("boom") catch e print(e) end"#).await;
        assert!(err.is_none());
        assert_eq!(out, "boom\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watch_records_variable_names_without_duplication() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute("watch(\"x\")\nwatch(\"x\")\nwatch(\"y\")").await;
        assert!(err.is_none());
        assert_eq!(ev.ctx.watched, vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn breakpoint_is_a_no_op_without_a_handler() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("breakpoint()\nprint(1)").await;
        assert!(err.is_none());
        assert_eq!(out, "1\n");
    }
}
