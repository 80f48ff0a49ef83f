//! Binds `handle.method_name` member access to a callable native closure
//! over the concrete resource the handle names (`spec.md` §3 "handle"):
//! a datastore instance or an HTTP server handle. Dispatch happens lazily
//! at call time against the evaluator's shared registries, since the
//! `Value::Handle` itself only carries a logical name.

use std::time::Duration;

use crate::interpreter::error::{DuError, EvalResult, Flow};
use crate::value::{HandleKind, NamedArgs, NativeFn, Value};

pub fn bind_handle_method(handle: HandleKind, method: String) -> Option<Value> {
    let recognized = match &handle {
        HandleKind::Datastore(_) => datastore_method(&method),
        HandleKind::HttpServer(_) => http_method(&method),
    };
    recognized.then(|| make_native(handle, method))
}

fn datastore_method(name: &str) -> bool {
    matches!(
        name,
        "get" | "set" | "set_once" | "exists" | "delete" | "rename" | "keys" | "clear" | "increment" | "swap"
            | "push" | "unshift" | "pop" | "shift" | "shift_wait" | "pop_wait" | "wait" | "wait_for" | "expire"
    )
}

fn http_method(name: &str) -> bool {
    matches!(name, "route" | "start" | "stop")
}

fn make_native(handle: HandleKind, method: String) -> Value {
    let f: NativeFn = std::sync::Arc::new(move |ev, args, pos| {
        let handle = handle.clone();
        let method = method.clone();
        Box::pin(async move {
            match &handle {
                HandleKind::Datastore(name) => call_datastore_method(ev, name, &method, args, pos).await,
                HandleKind::HttpServer(id) => call_http_method(ev, id, &method, args, pos).await,
            }
        })
    });
    Value::Native(f)
}

async fn call_datastore_method(
    ev: &mut crate::interpreter::evaluator::Evaluator,
    namespace: &str,
    method: &str,
    args: NamedArgs,
    pos: crate::ast::Position,
) -> EvalResult<Value> {
    let store = ev.datastores.get_or_create(namespace).await;
    let key_arg = |i: usize| -> EvalResult<String> {
        match args.get_positional(i) {
            Some(Value::Str(s)) => Ok(s.to_string()),
            _ => Err(Flow::Error(crate::interpreter::error::RuntimeError::new(
                DuError::Type(format!("{}() expects a string key argument", method)),
                ev.ctx.file_path.clone(),
                pos,
                ev.ctx.call_stack.clone(),
            ))),
        }
    };
    let timeout_arg = |i: usize| -> Duration {
        args.get_positional(i).map(|v| v.to_number()).filter(|n| n.is_finite() && *n >= 0.0).map(Duration::from_secs_f64).unwrap_or(Duration::from_secs(3600))
    };

    match method {
        "get" => Ok(store.get(&key_arg(0)?).await.unwrap_or(Value::Nil)),
        "set" => {
            let key = key_arg(0)?;
            let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
            store.set(&key, value).await;
            Ok(Value::Nil)
        }
        "set_once" => {
            let key = key_arg(0)?;
            let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
            Ok(Value::Bool(store.set_once(&key, value).await))
        }
        "exists" => Ok(Value::Bool(store.exists(&key_arg(0)?).await)),
        "delete" => Ok(Value::Bool(store.delete(&key_arg(0)?).await)),
        "rename" => Ok(Value::Bool(store.rename(&key_arg(0)?, &key_arg(1)?).await)),
        "keys" => Ok(Value::array(store.keys().await.into_iter().map(Value::string).collect())),
        "clear" => {
            store.clear().await;
            Ok(Value::Nil)
        }
        "increment" => {
            let key = key_arg(0)?;
            let delta = args.get_positional(1).map(|v| v.to_number()).unwrap_or(1.0);
            Ok(Value::Number(store.increment(&key, delta).await))
        }
        "swap" => {
            let key = key_arg(0)?;
            let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
            Ok(store.swap(&key, value).await)
        }
        "push" => {
            let key = key_arg(0)?;
            let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
            store.push(&key, value).await.map(|n| Value::Number(n as f64)).map_err(|m| ev.data_err(DuError::Datastore(m), pos))
        }
        "unshift" => {
            let key = key_arg(0)?;
            let value = args.get_positional(1).cloned().unwrap_or(Value::Nil);
            store.unshift(&key, value).await.map(|n| Value::Number(n as f64)).map_err(|m| ev.data_err(DuError::Datastore(m), pos))
        }
        "pop" => store.pop(&key_arg(0)?).await.map(|v| v.unwrap_or(Value::Nil)).map_err(|m| ev.data_err(DuError::Datastore(m), pos)),
        "shift" => store.shift(&key_arg(0)?).await.map(|v| v.unwrap_or(Value::Nil)).map_err(|m| ev.data_err(DuError::Datastore(m), pos)),
        "expire" => {
            let key = key_arg(0)?;
            let ttl = args.get_positional(1).map(|v| v.to_number()).unwrap_or(0.0).max(0.0);
            store.expire(&key, Duration::from_secs_f64(ttl)).await;
            Ok(Value::Nil)
        }
        "wait" => {
            let key = key_arg(0)?;
            let timeout = timeout_arg(1);
            wait_for_change(ev, &store, &key, timeout, pos).await
        }
        "shift_wait" => {
            let key = key_arg(0)?;
            let timeout = timeout_arg(1);
            loop_until_available(ev, &store, &key, timeout, pos, true).await
        }
        "pop_wait" => {
            let key = key_arg(0)?;
            let timeout = timeout_arg(1);
            loop_until_available(ev, &store, &key, timeout, pos, false).await
        }
        "wait_for" => {
            let key = key_arg(0)?;
            let predicate = args.get_positional(1).cloned();
            let timeout = timeout_arg(2);
            wait_for_predicate(ev, &store, &key, predicate, timeout, pos).await
        }
        other => Err(ev.data_err(DuError::Undefined(format!("no datastore method '{}'", other)), pos)),
    }
}

/// Blocks until the key's value differs from its value at entry — set for
/// the first time, deleted, or changed to something structurally unequal —
/// or until `timeout` elapses (`spec.md` §4.D "block until the key is set
/// (or its value changes)").
async fn wait_for_change(
    ev: &mut crate::interpreter::evaluator::Evaluator,
    store: &crate::datastore::DatastoreInstance,
    key: &str,
    timeout: Duration,
    pos: crate::ast::Position,
) -> EvalResult<Value> {
    let initial = store.get(key).await;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        ev.check_cancel()?;
        let current = store.get(key).await;
        let changed = match (&initial, &current) {
            (None, None) => false,
            (None, Some(_)) | (Some(_), None) => true,
            (Some(i), Some(c)) => !i.structural_eq(c).await,
        };
        if changed {
            return Ok(current.unwrap_or(Value::Nil));
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ev.data_err(DuError::Datastore(format!("wait on '{}' timed out", key)), pos));
        }
        match store.wait_raw(key, remaining, &ev.ctx.cancellation).await {
            crate::datastore::WaitOutcome::Cancelled => return Err(Flow::Cancellation),
            _ => continue,
        }
    }
}

async fn loop_until_available(
    ev: &mut crate::interpreter::evaluator::Evaluator,
    store: &crate::datastore::DatastoreInstance,
    key: &str,
    timeout: Duration,
    pos: crate::ast::Position,
    from_front: bool,
) -> EvalResult<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        ev.check_cancel()?;
        let popped = if from_front { store.shift(key).await } else { store.pop(key).await };
        match popped {
            Ok(Some(v)) => return Ok(v),
            Ok(None) => {}
            Err(m) => return Err(ev.data_err(DuError::Datastore(m), pos)),
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ev.data_err(DuError::Datastore(format!("wait on '{}' timed out", key)), pos));
        }
        match store.wait_raw(key, remaining, &ev.ctx.cancellation).await {
            crate::datastore::WaitOutcome::Cancelled => return Err(Flow::Cancellation),
            _ => continue,
        }
    }
}

async fn wait_for_predicate(
    ev: &mut crate::interpreter::evaluator::Evaluator,
    store: &crate::datastore::DatastoreInstance,
    key: &str,
    predicate: Option<Value>,
    timeout: Duration,
    pos: crate::ast::Position,
) -> EvalResult<Value> {
    let Some(predicate) = predicate else {
        return Err(ev.data_err(DuError::Type("wait_for() requires a predicate function".into()), pos));
    };
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        ev.check_cancel()?;
        let current = store.get(key).await.unwrap_or(Value::Nil);
        let matched = ev.call_value(&predicate, NamedArgs::positional_only(vec![current.clone()]), pos).await?;
        if matched.is_truthy().await {
            return Ok(current);
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ev.data_err(DuError::Datastore(format!("wait_for on '{}' timed out", key)), pos));
        }
        match store.wait_raw(key, remaining, &ev.ctx.cancellation).await {
            crate::datastore::WaitOutcome::Cancelled => return Err(Flow::Cancellation),
            _ => continue,
        }
    }
}

async fn call_http_method(
    ev: &mut crate::interpreter::evaluator::Evaluator,
    id: &str,
    method: &str,
    args: NamedArgs,
    pos: crate::ast::Position,
) -> EvalResult<Value> {
    let Some(handle) = ev.http_servers.get(id).await else {
        return Err(ev.data_err(DuError::Type(format!("http server handle '{}' no longer exists", id)), pos));
    };
    match method {
        "route" => {
            let http_method = match args.get_positional(0) {
                Some(Value::Str(s)) => s.to_string(),
                _ => return Err(ev.data_err(DuError::Type("route() expects a method string".into()), pos)),
            };
            let pattern = match args.get_positional(1) {
                Some(Value::Str(s)) => s.to_string(),
                _ => return Err(ev.data_err(DuError::Type("route() expects a path prefix string".into()), pos)),
            };
            let handler_path = match args.get_positional(2) {
                Some(Value::Str(s)) => s.to_string(),
                _ => return Err(ev.data_err(DuError::Type("route() expects a handler script path".into()), pos)),
            };
            handle.add_route(&http_method, &pattern, handler_path).await;
            Ok(Value::Nil)
        }
        "start" => {
            handle.start().await.map_err(|e| ev.data_err(DuError::Type(format!("http server failed: {}", e)), pos))?;
            Ok(Value::Nil)
        }
        "stop" => {
            handle.stop();
            Ok(Value::Nil)
        }
        other => Err(ev.data_err(DuError::Undefined(format!("no http server method '{}'", other)), pos)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DatastoreRegistry;
    use crate::runtime::process::ProcessRegistry;
    use std::sync::Arc;

    async fn new_eval() -> crate::interpreter::evaluator::Evaluator {
        crate::interpreter::evaluator::Evaluator::new("test.du", Arc::new(DatastoreRegistry::new()), Arc::new(ProcessRegistry::new())).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_blocks_until_a_concurrent_writer_changes_the_key() {
        let mut ev = new_eval().await;
        let store = ev.datastores.get_or_create("ns").await;
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            writer.set("k", Value::Number(1.0)).await;
        });

        let start = tokio::time::Instant::now();
        let result = call_datastore_method(
            &mut ev,
            "ns",
            "wait",
            NamedArgs::positional_only(vec![Value::string("k"), Value::Number(5.0)]),
            crate::ast::Position::default(),
        )
        .await
        .unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(40));
        assert_eq!(result.to_number(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_times_out_when_the_key_never_changes() {
        let mut ev = new_eval().await;
        let result = call_datastore_method(
            &mut ev,
            "ns",
            "wait",
            NamedArgs::positional_only(vec![Value::string("k"), Value::Number(0.05)]),
            crate::ast::Position::default(),
        )
        .await;
        assert!(matches!(result, Err(Flow::Error(re)) if matches!(re.kind, DuError::Datastore(_))));
    }
}
