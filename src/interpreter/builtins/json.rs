//! JSON: `parse_json`, `format_json`.

use crate::ast::Position;
use crate::interpreter::builtins::arg_type_error;
use crate::interpreter::error::{DuError, Flow};
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("parse_json", std::sync::Arc::new(parse_json)).await;
    ev.register_builtin("format_json", std::sync::Arc::new(format_json)).await;
}

fn parse_json(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let Some(Value::Str(s)) = args.get_positional(0) else {
            return Err(arg_type_error(ev, pos, "parse_json() expects a string argument"));
        };
        match serde_json::from_str::<serde_json::Value>(s) {
            Ok(json) => Ok(Value::from_json(&json)),
            Err(e) => Err(ev.data_err(DuError::Type(format!("invalid JSON: {}", e)), pos)),
        }
    })
}

fn format_json(_ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Ok(Value::string(v.to_json_string().await))
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
    async fn roundtrips_object_through_json() {
        let mut ev = new_eval().await;
        let (out, err) = ev
            .execute(
                r#"var o = parse_json("{\"a\": 1}")
print(format_json(o))"#,
            )
            .await;
        assert!(err.is_none());
        assert_eq!(out, "{\"a\":1}\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_json_is_catchable() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute(r#"parse_json("not json")"#).await;
        assert!(err.is_some());
    }
}
