//! Types/coercion: `type`, `tostring`, `tonumber`, `tobool`.

use crate::ast::Position;
use crate::interpreter::error::Flow;
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("type", std::sync::Arc::new(type_of)).await;
    ev.register_builtin("tostring", std::sync::Arc::new(to_string_fn)).await;
    ev.register_builtin("tonumber", std::sync::Arc::new(to_number_fn)).await;
    ev.register_builtin("tobool", std::sync::Arc::new(to_bool_fn)).await;
}

fn type_of(_ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Ok(Value::string(v.type_name()))
    })
}

fn to_string_fn(_ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Ok(Value::string(v.to_display_string().await))
    })
}

fn to_number_fn(_ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Ok(Value::Number(v.to_number_lenient()))
    })
}

fn to_bool_fn(_ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = args.get_positional(0).cloned().unwrap_or(Value::Nil);
        Ok(Value::Bool(v.is_truthy().await))
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
    async fn type_reports_each_kind() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(type(1), type("x"), type(nil), type([1]))"#).await;
        assert_eq!(out, "number string nil array\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tonumber_parses_numeric_strings() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(tonumber("42") + 1)"#).await;
        assert_eq!(out, "43\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tonumber_surfaces_invalid_input_as_zero_not_nan() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(tonumber("abc"))"#).await;
        assert_eq!(out, "0\n");
    }
}
