//! Output capture. Not named in the builtin catalog's table but required
//! by the embedding contract's "execute -> textual captured output"
//! (`spec.md` §6 "Embedding API").

use crate::ast::Position;
use crate::interpreter::error::Flow;
use crate::interpreter::evaluator::Evaluator;
use crate::value::{NamedArgs, Value};
use crate::value::BoxFuture;

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("print", std::sync::Arc::new(print)).await;
}

fn print(ev: &mut Evaluator, args: NamedArgs, _pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let mut parts = Vec::with_capacity(args.positional.len());
        for v in &args.positional {
            parts.push(v.to_display_string().await);
        }
        ev.output.push_str(&parts.join(" "));
        ev.output.push('\n');
        Ok(Value::Nil)
    })
}
