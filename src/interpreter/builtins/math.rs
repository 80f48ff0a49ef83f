//! Math: `abs`, `floor`, `ceil`, `round`, `min`, `max`, `sqrt`, `pow`,
//! `clamp`, `random`.

use rand::Rng;

use crate::ast::Position;
use crate::interpreter::builtins::arg_type_error;
use crate::interpreter::error::Flow;
use crate::interpreter::evaluator::Evaluator;
use crate::value::{BoxFuture, NamedArgs, Value};

pub(super) async fn register(ev: &mut Evaluator) {
    ev.register_builtin("abs", std::sync::Arc::new(abs)).await;
    ev.register_builtin("floor", std::sync::Arc::new(floor)).await;
    ev.register_builtin("ceil", std::sync::Arc::new(ceil)).await;
    ev.register_builtin("round", std::sync::Arc::new(round)).await;
    ev.register_builtin("min", std::sync::Arc::new(min)).await;
    ev.register_builtin("max", std::sync::Arc::new(max)).await;
    ev.register_builtin("sqrt", std::sync::Arc::new(sqrt)).await;
    ev.register_builtin("pow", std::sync::Arc::new(pow)).await;
    ev.register_builtin("clamp", std::sync::Arc::new(clamp)).await;
    ev.register_builtin("random", std::sync::Arc::new(random)).await;
}

fn num(ev: &Evaluator, args: &NamedArgs, i: usize, pos: Position, fn_name: &str) -> Result<f64, Flow> {
    match args.get_positional(i) {
        Some(v @ Value::Number(_)) => Ok(v.to_number()),
        _ => Err(arg_type_error(ev, pos, format!("{}() expects a numeric argument", fn_name))),
    }
}

fn abs(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::Number(num(ev, &args, 0, pos, "abs")?.abs())) })
}

fn floor(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::Number(num(ev, &args, 0, pos, "floor")?.floor())) })
}

fn ceil(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::Number(num(ev, &args, 0, pos, "ceil")?.ceil())) })
}

fn round(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::Number(num(ev, &args, 0, pos, "round")?.round())) })
}

fn min(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        if args.positional.is_empty() {
            return Err(arg_type_error(ev, pos, "min() expects at least one argument"));
        }
        let mut best = num(ev, &args, 0, pos, "min")?;
        for i in 1..args.len() {
            best = best.min(num(ev, &args, i, pos, "min")?);
        }
        Ok(Value::Number(best))
    })
}

fn max(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        if args.positional.is_empty() {
            return Err(arg_type_error(ev, pos, "max() expects at least one argument"));
        }
        let mut best = num(ev, &args, 0, pos, "max")?;
        for i in 1..args.len() {
            best = best.max(num(ev, &args, i, pos, "max")?);
        }
        Ok(Value::Number(best))
    })
}

fn sqrt(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move { Ok(Value::Number(num(ev, &args, 0, pos, "sqrt")?.sqrt())) })
}

fn pow(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let base = num(ev, &args, 0, pos, "pow")?;
        let exp = num(ev, &args, 1, pos, "pow")?;
        Ok(Value::Number(base.powf(exp)))
    })
}

fn clamp(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        let v = num(ev, &args, 0, pos, "clamp")?;
        let lo = num(ev, &args, 1, pos, "clamp")?;
        let hi = num(ev, &args, 2, pos, "clamp")?;
        Ok(Value::Number(v.clamp(lo, hi)))
    })
}

/// `random()` is a float in `[0, 1)`; `random(n)` an integer in
/// `[0, n)`; `random(min, max)` an integer in `[min, max)` (`spec.md`
/// §4.C.1).
fn random(ev: &mut Evaluator, args: NamedArgs, pos: Position) -> BoxFuture<'_, Result<Value, Flow>> {
    Box::pin(async move {
        match args.len() {
            0 => Ok(Value::Number(rand::thread_rng().gen_range(0.0..1.0))),
            1 => {
                let n = num(ev, &args, 0, pos, "random")?;
                random_int(ev, pos, 0.0, n)
            }
            _ => {
                let lo = num(ev, &args, 0, pos, "random")?;
                let hi = num(ev, &args, 1, pos, "random")?;
                random_int(ev, pos, lo, hi)
            }
        }
    })
}

fn random_int(ev: &Evaluator, pos: Position, lo: f64, hi: f64) -> Result<Value, Flow> {
    if !(hi > lo) {
        return Err(arg_type_error(ev, pos, "random() requires its upper bound to exceed its lower bound"));
    }
    Ok(Value::Number(rand::thread_rng().gen_range((lo as i64)..(hi as i64)) as f64))
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
    async fn clamp_restricts_to_bounds() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute("print(clamp(15, 0, 10))").await;
        assert_eq!(out, "10\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn random_stays_within_unit_interval() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var r = random()\nprint(r >= 0 and r < 1)").await;
        assert!(err.is_none());
        assert_eq!(out, "true\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn random_with_bounds_stays_in_range() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("var r = random(5, 10)\nprint(r >= 5 and r < 10)").await;
        assert!(err.is_none());
        assert_eq!(out, "true\n");
    }
}
